//! # Graph Store
//!
//! The graph storage boundary of the engine.
//!
//! This module defines the `GraphStore` trait consumed by the subgraph
//! manager, the graph walker and the orchestrator, and `Graph`, the
//! in-memory implementation. All data structures use `BTreeMap` for
//! deterministic ordering.
//!
//! ## Identity
//!
//! Vertices are indexed by logical document key `(index, type, id)`; the
//! version stored on a vertex is overwritten in place on each commit. Edges
//! are indexed by logical edge key and remember the document that owns them
//! (the document whose subgraph created the edge).
//!
//! ## Transactions
//!
//! `begin` starts journaling every change; `rollback` replays the journal in
//! reverse and `commit` discards it. There is exactly one writer (the
//! graph-mutation worker), so transactions never nest.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{DgmError, Direction, DocumentId, DocumentKey, EdgeId, EdgeKey, EdgeRef, VertexRef};

// =============================================================================
// GRAPHSTORE TRAIT
// =============================================================================

/// The GraphStore trait defines the graph operations the engine relies on.
///
/// All fallible operations return `Result<T, DgmError>` to support both
/// in-memory and persistent storage backends uniformly.
pub trait GraphStore: Send + Sync {
    /// Find the vertex for the logical document of `id` (version ignored).
    fn find_vertex(&self, id: &DocumentId) -> Result<Option<VertexRef>, DgmError>;

    /// Create a vertex carrying `id`. Fails if the logical document already has one.
    fn create_vertex(&mut self, id: &DocumentId) -> Result<VertexRef, DgmError>;

    /// Return the vertex for `id`, creating it at the symbolic version if absent.
    /// An existing vertex keeps its recorded version.
    fn find_or_create_symbolic_vertex(&mut self, id: &DocumentId) -> Result<VertexRef, DgmError>;

    /// The identity recorded on a vertex, if it has one.
    fn vertex_id(&self, vertex: VertexRef) -> Result<Option<DocumentId>, DgmError>;

    /// Overwrite the identity of a vertex. The logical key may not change.
    fn set_vertex_id(&mut self, vertex: VertexRef, id: &DocumentId) -> Result<(), DgmError>;

    /// The property bag of a vertex.
    fn vertex_properties(&self, vertex: VertexRef) -> Result<BTreeMap<String, Value>, DgmError>;

    /// Replace the property bag of a vertex.
    fn set_properties(
        &mut self,
        vertex: VertexRef,
        properties: BTreeMap<String, Value>,
    ) -> Result<(), DgmError>;

    /// Edges incident on `vertex` in `direction`, paired with the vertex at the other end.
    ///
    /// `Inwards` yields edges pointing at `vertex`, `Outwards` edges leaving it.
    fn edges_of(
        &self,
        vertex: VertexRef,
        direction: Direction,
    ) -> Result<Vec<(EdgeRef, VertexRef)>, DgmError>;

    /// Find an edge by logical identity (versions ignored).
    fn find_edge(&self, edge: &EdgeId) -> Result<Option<EdgeRef>, DgmError>;

    /// Create an edge between the existing vertices of `edge`, owned by `owner`.
    fn create_edge(&mut self, edge: &EdgeId, owner: &DocumentId) -> Result<EdgeRef, DgmError>;

    /// Identity of an edge, built from the current identities of its endpoints.
    fn edge_id(&self, edge: EdgeRef) -> Result<Option<EdgeId>, DgmError>;

    /// The document that owns an edge.
    fn edge_owner(&self, edge: EdgeRef) -> Result<Option<DocumentKey>, DgmError>;

    /// The property bag of an edge.
    fn edge_properties(&self, edge: EdgeRef) -> Result<BTreeMap<String, Value>, DgmError>;

    /// Replace the property bag of an edge.
    fn set_edge_properties(
        &mut self,
        edge: EdgeRef,
        properties: BTreeMap<String, Value>,
    ) -> Result<(), DgmError>;

    /// Remove an edge.
    fn remove_edge(&mut self, edge: EdgeRef) -> Result<(), DgmError>;

    /// Remove a vertex together with every edge incident on it.
    fn remove_vertex(&mut self, vertex: VertexRef) -> Result<(), DgmError>;

    /// Get the total number of vertices.
    fn vertex_count(&self) -> Result<usize, DgmError>;

    /// Get the total number of edges.
    fn edge_count(&self) -> Result<usize, DgmError>;

    /// Start a transaction around a batch of changes.
    fn begin(&mut self) -> Result<(), DgmError>;

    /// Make the changes since `begin` durable.
    fn commit(&mut self) -> Result<(), DgmError>;

    /// Undo every change since `begin`.
    fn rollback(&mut self) -> Result<(), DgmError>;
}

// =============================================================================
// RECORDS
// =============================================================================

/// Stored state of one vertex.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VertexRecord {
    /// Identity of the document; `None` for an unidentified placeholder.
    pub id: Option<DocumentId>,
    pub properties: BTreeMap<String, Value>,
}

/// Stored state of one edge.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub key: EdgeKey,
    pub tail: VertexRef,
    pub head: VertexRef,
    pub owner: Option<DocumentKey>,
    pub properties: BTreeMap<String, Value>,
}

/// Journal entry: how to undo one change.
#[derive(Debug, Clone)]
enum Undo {
    CreateVertex(VertexRef),
    RemoveVertex(VertexRef, VertexRecord),
    UpdateVertex(VertexRef, VertexRecord),
    CreateEdge(EdgeRef),
    RemoveEdge(EdgeRef, EdgeRecord),
    UpdateEdge(EdgeRef, EdgeRecord),
}

/// Vertices and edges changed inside the current transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchedRecords {
    pub vertices: BTreeSet<VertexRef>,
    pub edges: BTreeSet<EdgeRef>,
}

pub(crate) fn missing_vertex(vertex: VertexRef) -> DgmError {
    DgmError::Store(format!("vertex {} not found", vertex.0))
}

pub(crate) fn missing_edge(edge: EdgeRef) -> DgmError {
    DgmError::Store(format!("edge {} not found", edge.0))
}

// =============================================================================
// GRAPH IMPLEMENTATION
// =============================================================================

/// The in-memory graph.
///
/// Uses `BTreeMap` exclusively for deterministic ordering.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// Vertex storage: VertexRef -> VertexRecord
    vertices: BTreeMap<VertexRef, VertexRecord>,

    /// Edge storage: EdgeRef -> EdgeRecord
    edges: BTreeMap<EdgeRef, EdgeRecord>,

    /// Adjacency: tail -> edges leaving it
    outgoing: BTreeMap<VertexRef, BTreeSet<EdgeRef>>,

    /// Adjacency: head -> edges pointing at it
    incoming: BTreeMap<VertexRef, BTreeSet<EdgeRef>>,

    /// Reverse lookup: logical document -> vertex
    vertex_index: BTreeMap<DocumentKey, VertexRef>,

    /// Reverse lookup: logical edge -> edge
    edge_index: BTreeMap<EdgeKey, EdgeRef>,

    next_vertex_id: u64,
    next_edge_id: u64,

    /// Undo journal of the open transaction, if any.
    journal: Option<Vec<Undo>>,
}

impl Graph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a vertex that carries no identity.
    ///
    /// Such vertices never match a lookup; walks resolve them to no document.
    pub fn create_unidentified_vertex(&mut self) -> VertexRef {
        let vertex = self.allocate_vertex();
        self.raw_insert_vertex(vertex, VertexRecord::default());
        self.record(Undo::CreateVertex(vertex));
        vertex
    }

    /// Iterate over all vertices in deterministic order.
    pub fn vertices(&self) -> impl Iterator<Item = (VertexRef, &VertexRecord)> {
        self.vertices.iter().map(|(v, r)| (*v, r))
    }

    /// Iterate over all edges in deterministic order.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeRef, &EdgeRecord)> {
        self.edges.iter().map(|(e, r)| (*e, r))
    }

    #[must_use]
    pub fn vertex_record(&self, vertex: VertexRef) -> Option<&VertexRecord> {
        self.vertices.get(&vertex)
    }

    #[must_use]
    pub fn edge_record(&self, edge: EdgeRef) -> Option<&EdgeRecord> {
        self.edges.get(&edge)
    }

    /// Next handle values `(vertex, edge)` to be allocated.
    #[must_use]
    pub fn next_ids(&self) -> (u64, u64) {
        (self.next_vertex_id, self.next_edge_id)
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.journal.is_some()
    }

    /// Records changed since `begin`.
    #[must_use]
    pub fn touched(&self) -> TouchedRecords {
        let mut touched = TouchedRecords::default();
        for undo in self.journal.iter().flatten() {
            match undo {
                Undo::CreateVertex(v) | Undo::RemoveVertex(v, _) | Undo::UpdateVertex(v, _) => {
                    touched.vertices.insert(*v);
                }
                Undo::CreateEdge(e) | Undo::RemoveEdge(e, _) | Undo::UpdateEdge(e, _) => {
                    touched.edges.insert(*e);
                }
            }
        }
        touched
    }

    /// Rebuild a graph from stored records, preserving handles.
    pub fn from_records(
        vertices: impl IntoIterator<Item = (VertexRef, VertexRecord)>,
        edges: impl IntoIterator<Item = (EdgeRef, EdgeRecord)>,
        next_ids: (u64, u64),
    ) -> Self {
        let mut graph = Self {
            next_vertex_id: next_ids.0,
            next_edge_id: next_ids.1,
            ..Self::default()
        };
        for (vertex, record) in vertices {
            graph.next_vertex_id = graph.next_vertex_id.max(vertex.0.saturating_add(1));
            graph.raw_insert_vertex(vertex, record);
        }
        for (edge, record) in edges {
            graph.next_edge_id = graph.next_edge_id.max(edge.0.saturating_add(1));
            graph.raw_insert_edge(edge, record);
        }
        graph
    }

    // -------------------------------------------------------------------------
    // Raw mutation: maintains indices, never journals
    // -------------------------------------------------------------------------

    fn allocate_vertex(&mut self) -> VertexRef {
        let vertex = VertexRef(self.next_vertex_id);
        self.next_vertex_id = self.next_vertex_id.saturating_add(1);
        vertex
    }

    fn allocate_edge(&mut self) -> EdgeRef {
        let edge = EdgeRef(self.next_edge_id);
        self.next_edge_id = self.next_edge_id.saturating_add(1);
        edge
    }

    fn raw_insert_vertex(&mut self, vertex: VertexRef, record: VertexRecord) {
        if let Some(id) = &record.id {
            self.vertex_index.insert(id.key(), vertex);
        }
        self.vertices.insert(vertex, record);
    }

    fn raw_remove_vertex(&mut self, vertex: VertexRef) -> Option<VertexRecord> {
        let record = self.vertices.remove(&vertex)?;
        if let Some(id) = &record.id {
            self.vertex_index.remove(&id.key());
        }
        self.outgoing.remove(&vertex);
        self.incoming.remove(&vertex);
        Some(record)
    }

    fn raw_insert_edge(&mut self, edge: EdgeRef, record: EdgeRecord) {
        self.outgoing.entry(record.tail).or_default().insert(edge);
        self.incoming.entry(record.head).or_default().insert(edge);
        self.edge_index.insert(record.key.clone(), edge);
        self.edges.insert(edge, record);
    }

    fn raw_remove_edge(&mut self, edge: EdgeRef) -> Option<EdgeRecord> {
        let record = self.edges.remove(&edge)?;
        if let Some(set) = self.outgoing.get_mut(&record.tail) {
            set.remove(&edge);
        }
        if let Some(set) = self.incoming.get_mut(&record.head) {
            set.remove(&edge);
        }
        self.edge_index.remove(&record.key);
        Some(record)
    }

    fn record(&mut self, undo: Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(undo);
        }
    }

    fn vertex(&self, vertex: VertexRef) -> Result<&VertexRecord, DgmError> {
        self.vertices.get(&vertex).ok_or_else(|| missing_vertex(vertex))
    }

    fn edge(&self, edge: EdgeRef) -> Result<&EdgeRecord, DgmError> {
        self.edges.get(&edge).ok_or_else(|| missing_edge(edge))
    }
}

impl GraphStore for Graph {
    fn find_vertex(&self, id: &DocumentId) -> Result<Option<VertexRef>, DgmError> {
        Ok(self.vertex_index.get(&id.key()).copied())
    }

    fn create_vertex(&mut self, id: &DocumentId) -> Result<VertexRef, DgmError> {
        if self.vertex_index.contains_key(&id.key()) {
            return Err(DgmError::Store(format!("vertex for {} already exists", id)));
        }
        let vertex = self.allocate_vertex();
        self.raw_insert_vertex(
            vertex,
            VertexRecord {
                id: Some(id.clone()),
                properties: BTreeMap::new(),
            },
        );
        self.record(Undo::CreateVertex(vertex));
        Ok(vertex)
    }

    fn find_or_create_symbolic_vertex(&mut self, id: &DocumentId) -> Result<VertexRef, DgmError> {
        match self.find_vertex(id)? {
            Some(vertex) => Ok(vertex),
            None => self.create_vertex(&id.symbolic()),
        }
    }

    fn vertex_id(&self, vertex: VertexRef) -> Result<Option<DocumentId>, DgmError> {
        Ok(self.vertex(vertex)?.id.clone())
    }

    fn set_vertex_id(&mut self, vertex: VertexRef, id: &DocumentId) -> Result<(), DgmError> {
        let previous = self.vertex(vertex)?.clone();
        match &previous.id {
            Some(old) if !old.same_document(id) => {
                return Err(DgmError::Store(format!(
                    "cannot re-key vertex {} from {} to {}",
                    vertex.0, old, id
                )));
            }
            None if self.vertex_index.contains_key(&id.key()) => {
                return Err(DgmError::Store(format!("vertex for {} already exists", id)));
            }
            _ => {}
        }
        let mut record = previous.clone();
        record.id = Some(id.clone());
        if let Some(old) = &previous.id {
            self.vertex_index.remove(&old.key());
        }
        self.vertex_index.insert(id.key(), vertex);
        self.vertices.insert(vertex, record);
        self.record(Undo::UpdateVertex(vertex, previous));
        Ok(())
    }

    fn vertex_properties(&self, vertex: VertexRef) -> Result<BTreeMap<String, Value>, DgmError> {
        Ok(self.vertex(vertex)?.properties.clone())
    }

    fn set_properties(
        &mut self,
        vertex: VertexRef,
        properties: BTreeMap<String, Value>,
    ) -> Result<(), DgmError> {
        let previous = self.vertex(vertex)?.clone();
        let mut record = previous.clone();
        record.properties = properties;
        self.vertices.insert(vertex, record);
        self.record(Undo::UpdateVertex(vertex, previous));
        Ok(())
    }

    fn edges_of(
        &self,
        vertex: VertexRef,
        direction: Direction,
    ) -> Result<Vec<(EdgeRef, VertexRef)>, DgmError> {
        self.vertex(vertex)?;
        let adjacency = match direction {
            Direction::Inwards => &self.incoming,
            Direction::Outwards => &self.outgoing,
        };
        let mut result = Vec::new();
        for edge in adjacency.get(&vertex).into_iter().flatten() {
            let record = self.edge(*edge)?;
            let other = match direction {
                Direction::Inwards => record.tail,
                Direction::Outwards => record.head,
            };
            result.push((*edge, other));
        }
        Ok(result)
    }

    fn find_edge(&self, edge: &EdgeId) -> Result<Option<EdgeRef>, DgmError> {
        Ok(self.edge_index.get(&edge.key()).copied())
    }

    fn create_edge(&mut self, edge: &EdgeId, owner: &DocumentId) -> Result<EdgeRef, DgmError> {
        let key = edge.key();
        if self.edge_index.contains_key(&key) {
            return Err(DgmError::Store(format!("edge {} already exists", edge)));
        }
        let endpoint = |id: &DocumentId| {
            self.vertex_index
                .get(&id.key())
                .copied()
                .ok_or_else(|| DgmError::Store(format!("edge endpoint {} has no vertex", id)))
        };
        let tail = endpoint(edge.tail())?;
        let head = endpoint(edge.head())?;

        let reference = self.allocate_edge();
        self.raw_insert_edge(
            reference,
            EdgeRecord {
                key,
                tail,
                head,
                owner: Some(owner.key()),
                properties: BTreeMap::new(),
            },
        );
        self.record(Undo::CreateEdge(reference));
        Ok(reference)
    }

    fn edge_id(&self, edge: EdgeRef) -> Result<Option<EdgeId>, DgmError> {
        let record = self.edge(edge)?;
        let tail = self.vertex(record.tail)?.id.clone();
        let head = self.vertex(record.head)?.id.clone();
        Ok(match (tail, head) {
            (Some(tail), Some(head)) => Some(EdgeId::new(tail, record.key.label.clone(), head)),
            _ => None,
        })
    }

    fn edge_owner(&self, edge: EdgeRef) -> Result<Option<DocumentKey>, DgmError> {
        Ok(self.edge(edge)?.owner.clone())
    }

    fn edge_properties(&self, edge: EdgeRef) -> Result<BTreeMap<String, Value>, DgmError> {
        Ok(self.edge(edge)?.properties.clone())
    }

    fn set_edge_properties(
        &mut self,
        edge: EdgeRef,
        properties: BTreeMap<String, Value>,
    ) -> Result<(), DgmError> {
        let previous = self.edge(edge)?.clone();
        let mut record = previous.clone();
        record.properties = properties;
        self.edges.insert(edge, record);
        self.record(Undo::UpdateEdge(edge, previous));
        Ok(())
    }

    fn remove_edge(&mut self, edge: EdgeRef) -> Result<(), DgmError> {
        let record = self.raw_remove_edge(edge).ok_or_else(|| missing_edge(edge))?;
        self.record(Undo::RemoveEdge(edge, record));
        Ok(())
    }

    fn remove_vertex(&mut self, vertex: VertexRef) -> Result<(), DgmError> {
        self.vertex(vertex)?;
        let incident: BTreeSet<EdgeRef> = self
            .outgoing
            .get(&vertex)
            .into_iter()
            .chain(self.incoming.get(&vertex))
            .flatten()
            .copied()
            .collect();
        for edge in incident {
            self.remove_edge(edge)?;
        }
        let record = self
            .raw_remove_vertex(vertex)
            .ok_or_else(|| missing_vertex(vertex))?;
        self.record(Undo::RemoveVertex(vertex, record));
        Ok(())
    }

    fn vertex_count(&self) -> Result<usize, DgmError> {
        Ok(self.vertices.len())
    }

    fn edge_count(&self) -> Result<usize, DgmError> {
        Ok(self.edges.len())
    }

    fn begin(&mut self) -> Result<(), DgmError> {
        if self.journal.is_some() {
            return Err(DgmError::Store("transaction already open".to_string()));
        }
        self.journal = Some(Vec::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DgmError> {
        self.journal
            .take()
            .map(|_| ())
            .ok_or_else(|| DgmError::Store("no open transaction".to_string()))
    }

    fn rollback(&mut self) -> Result<(), DgmError> {
        let journal = self
            .journal
            .take()
            .ok_or_else(|| DgmError::Store("no open transaction".to_string()))?;
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::CreateVertex(v) => {
                    self.raw_remove_vertex(v);
                }
                Undo::RemoveVertex(v, record) => self.raw_insert_vertex(v, record),
                Undo::UpdateVertex(v, record) => {
                    if let Some(current) = self.vertices.get(&v).and_then(|r| r.id.clone()) {
                        self.vertex_index.remove(&current.key());
                    }
                    if let Some(id) = &record.id {
                        self.vertex_index.insert(id.key(), v);
                    }
                    self.vertices.insert(v, record);
                }
                Undo::CreateEdge(e) => {
                    self.raw_remove_edge(e);
                }
                Undo::RemoveEdge(e, record) => self.raw_insert_edge(e, record),
                Undo::UpdateEdge(e, record) => {
                    self.edges.insert(e, record);
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
