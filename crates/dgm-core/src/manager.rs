//! # Subgraph Manager
//!
//! Commits and deletes the subgraph of one document against a `GraphStore`.
//!
//! A vertex stands for a logical document, not a version: committing a newer
//! version of a document overwrites the version recorded on its vertex, and
//! committing an older one is rejected. The committed subgraph is
//! authoritative for every edge the document owns, so owned edges missing
//! from it are removed. An edge belongs to the first document that commits
//! it; a later commit from another document declaring the same edge fails.
//!
//! Both operations run inside one graph transaction and roll back on error.

use std::collections::BTreeSet;

use crate::graph::GraphStore;
use crate::subgraph::{Subgraph, edge_id};
use crate::types::{DgmError, Direction, DocumentId, DocumentKey, EdgeKey, EdgeRef, VertexRef};

/// What a commit changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    pub vertex: VertexRef,
    pub edges_created: usize,
    pub edges_removed: usize,
    pub vertices_removed: usize,
}

/// What became of a document's vertex on delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The document had no vertex.
    Absent,
    /// Other documents still reference the vertex; it is now symbolic.
    Demoted(VertexRef),
    /// The vertex is gone.
    Removed,
}

/// Stateless subgraph commit/delete protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubgraphManager;

impl SubgraphManager {
    /// Make `subgraph` the current contribution of document `id`.
    ///
    /// # Errors
    ///
    /// `InvalidSubgraph` for a symbolic `id`, `ReservedProperty` for a
    /// reserved property name, `Store` when the graph store fails. The graph
    /// is left unchanged on error.
    pub fn commit_subgraph<G: GraphStore + ?Sized>(
        graph: &mut G,
        id: &DocumentId,
        subgraph: &Subgraph,
    ) -> Result<CommitSummary, DgmError> {
        if id.is_symbolic() {
            return Err(DgmError::InvalidSubgraph(format!(
                "cannot commit a subgraph for symbolic {}",
                id
            )));
        }
        subgraph.validate()?;

        let summary = transactional(graph, |graph| apply_commit(graph, id, subgraph))?;
        tracing::debug!(
            id = %id,
            created = summary.edges_created,
            removed = summary.edges_removed,
            vertices_removed = summary.vertices_removed,
            "subgraph committed"
        );
        Ok(summary)
    }

    /// Remove the contribution of document `id` from the graph.
    ///
    /// # Errors
    ///
    /// `Store` when the graph store fails; the graph is left unchanged.
    pub fn delete_subgraph<G: GraphStore + ?Sized>(
        graph: &mut G,
        id: &DocumentId,
    ) -> Result<DeleteOutcome, DgmError> {
        let outcome = transactional(graph, |graph| apply_delete(graph, id))?;
        tracing::debug!(id = %id, outcome = ?outcome, "subgraph deleted");
        Ok(outcome)
    }
}

fn transactional<G: GraphStore + ?Sized, T>(
    graph: &mut G,
    op: impl FnOnce(&mut G) -> Result<T, DgmError>,
) -> Result<T, DgmError> {
    graph.begin()?;
    match op(graph) {
        Ok(value) => {
            graph.commit()?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback) = graph.rollback() {
                tracing::error!(error = %rollback, "graph rollback failed");
            }
            Err(error)
        }
    }
}

fn apply_commit<G: GraphStore + ?Sized>(
    graph: &mut G,
    id: &DocumentId,
    subgraph: &Subgraph,
) -> Result<CommitSummary, DgmError> {
    let center = match graph.find_vertex(id)? {
        Some(vertex) => {
            if let Some(recorded) = graph.vertex_id(vertex)?
                && recorded.version() > id.version()
            {
                return Err(DgmError::InvalidSubgraph(format!(
                    "cannot override {} with older version {}",
                    recorded,
                    id.version()
                )));
            }
            graph.set_vertex_id(vertex, id)?;
            vertex
        }
        None => graph.create_vertex(id)?,
    };

    let owner = id.key();
    let mut wanted: BTreeSet<EdgeKey> = BTreeSet::new();
    let mut edges_created = 0;

    for edge in subgraph.edges() {
        graph.find_or_create_symbolic_vertex(edge.other())?;
        let edge_identity = edge_id(id, edge);
        wanted.insert(edge_identity.key());

        let reference = match graph.find_edge(&edge_identity)? {
            Some(existing) => match graph.edge_owner(existing)? {
                Some(claimed) if claimed == owner => existing,
                Some(claimed) => {
                    return Err(DgmError::InvalidSubgraph(format!(
                        "edge {} is already owned by {}",
                        edge_identity, claimed
                    )));
                }
                None => {
                    return Err(DgmError::InvalidSubgraph(format!(
                        "edge {} has no owner",
                        edge_identity
                    )));
                }
            },
            None => {
                edges_created += 1;
                graph.create_edge(&edge_identity, id)?
            }
        };
        if graph.edge_properties(reference)? != *edge.properties() {
            graph.set_edge_properties(reference, edge.properties().clone())?;
        }
    }

    let mut edges_removed = 0;
    let mut neighbours = BTreeSet::new();
    for (edge, other) in owned_edges(graph, center, &owner)? {
        let Some(identity) = graph.edge_id(edge)? else {
            continue;
        };
        if !wanted.contains(&identity.key()) {
            graph.remove_edge(edge)?;
            neighbours.insert(other);
            edges_removed += 1;
        }
    }
    neighbours.remove(&center);
    let vertices_removed = remove_dangling_symbolic(graph, neighbours)?;

    graph.set_properties(center, subgraph.properties().clone())?;

    Ok(CommitSummary {
        vertex: center,
        edges_created,
        edges_removed,
        vertices_removed,
    })
}

fn apply_delete<G: GraphStore + ?Sized>(
    graph: &mut G,
    id: &DocumentId,
) -> Result<DeleteOutcome, DgmError> {
    let Some(center) = graph.find_vertex(id)? else {
        return Ok(DeleteOutcome::Absent);
    };

    let owner = id.key();
    let mut neighbours = BTreeSet::new();
    for (edge, other) in owned_edges(graph, center, &owner)? {
        graph.remove_edge(edge)?;
        neighbours.insert(other);
    }
    neighbours.remove(&center);
    remove_dangling_symbolic(graph, neighbours)?;

    if has_edges(graph, center)? {
        graph.set_vertex_id(center, &id.symbolic())?;
        graph.set_properties(center, Default::default())?;
        Ok(DeleteOutcome::Demoted(center))
    } else {
        graph.remove_vertex(center)?;
        Ok(DeleteOutcome::Removed)
    }
}

/// Edges incident on `vertex`, in either direction, owned by `owner`.
fn owned_edges<G: GraphStore + ?Sized>(
    graph: &G,
    vertex: VertexRef,
    owner: &DocumentKey,
) -> Result<Vec<(EdgeRef, VertexRef)>, DgmError> {
    let mut seen = BTreeSet::new();
    let mut owned = Vec::new();
    for direction in [Direction::Inwards, Direction::Outwards] {
        for (edge, other) in graph.edges_of(vertex, direction)? {
            if seen.insert(edge) && graph.edge_owner(edge)?.as_ref() == Some(owner) {
                owned.push((edge, other));
            }
        }
    }
    Ok(owned)
}

fn has_edges<G: GraphStore + ?Sized>(graph: &G, vertex: VertexRef) -> Result<bool, DgmError> {
    Ok(!graph.edges_of(vertex, Direction::Inwards)?.is_empty()
        || !graph.edges_of(vertex, Direction::Outwards)?.is_empty())
}

/// Remove the symbolic vertices among `candidates` that have no edges left.
fn remove_dangling_symbolic<G: GraphStore + ?Sized>(
    graph: &mut G,
    candidates: BTreeSet<VertexRef>,
) -> Result<usize, DgmError> {
    let mut removed = 0;
    for vertex in candidates {
        let symbolic = graph
            .vertex_id(vertex)?
            .is_some_and(|id| id.is_symbolic());
        if symbolic && !has_edges(graph, vertex)? {
            graph.remove_vertex(vertex)?;
            removed += 1;
        }
    }
    Ok(removed)
}

// =============================================================================
// TESTS
// =============================================================================
