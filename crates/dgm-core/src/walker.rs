//! # Graph Walker
//!
//! Breadth-first walks over a `GraphStore`, materialized as a `Tree`.
//!
//! Every visited vertex yields one tree node per edge used to reach it: a
//! vertex reachable over two distinct edges appears twice. Whether a node
//! is expanded further is decided by an `ExpansionPolicy`; depth limiting and
//! cycle suppression are separate policies that compose with `AllOf`.
//!
//! Walks capture snapshots of vertex and edge state, so the resulting tree
//! stays valid after the graph lock is released.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::graph::GraphStore;
use crate::primitives::MAX_WALK_DEPTH;
use crate::tree::Tree;
use crate::types::{DgmError, Direction, DocumentId, EdgeId, EdgeRef, VertexRef};

// =============================================================================
// PATH ELEMENTS
// =============================================================================

/// Snapshot of a vertex reached by a walk.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexView {
    pub reference: VertexRef,
    pub id: Option<DocumentId>,
    pub properties: BTreeMap<String, Value>,
}

/// Snapshot of an edge traversed by a walk.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeView {
    pub reference: EdgeRef,
    pub id: Option<EdgeId>,
    pub properties: BTreeMap<String, Value>,
}

impl EdgeView {
    /// Label of the edge, if it still has an identity.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.id.as_ref().map(EdgeId::label)
    }
}

/// One node of a walk: the edge used to get here (none at the root) and the vertex reached.
#[derive(Debug, Clone, PartialEq)]
pub struct PathElement {
    pub edge: Option<EdgeView>,
    pub vertex: VertexView,
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = self.edge.as_ref().and_then(EdgeView::label) {
            write!(f, "-[{}]-> ", label)?;
        }
        match &self.vertex.id {
            Some(id) => write!(f, "{}", id),
            None => write!(f, "<vertex {}>", self.vertex.reference.0),
        }
    }
}

// =============================================================================
// EXPANSION POLICIES
// =============================================================================

/// A node about to be expanded.
#[derive(Debug, Clone, Copy)]
pub struct WalkStep<'a> {
    /// Distance from the root; the root is at depth 0.
    pub depth: usize,
    pub vertex: VertexRef,
    /// Vertices on the path from the root to this node, root first, excluding this node.
    pub ancestors: &'a [VertexRef],
}

/// Decides whether a node's children are generated.
pub trait ExpansionPolicy: Send + Sync {
    fn expand(&self, step: &WalkStep<'_>) -> bool;
}

/// Expand only nodes shallower than the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthLimit(pub usize);

impl ExpansionPolicy for DepthLimit {
    fn expand(&self, step: &WalkStep<'_>) -> bool {
        step.depth < self.0
    }
}

/// Render a vertex already seen on the same path from the root as a leaf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathCycleGuard;

impl ExpansionPolicy for PathCycleGuard {
    fn expand(&self, step: &WalkStep<'_>) -> bool {
        !step.ancestors.contains(&step.vertex)
    }
}

/// Expand only when every policy agrees.
#[derive(Default)]
pub struct AllOf(pub Vec<Box<dyn ExpansionPolicy>>);

impl AllOf {
    #[must_use]
    pub fn with(mut self, policy: impl ExpansionPolicy + 'static) -> Self {
        self.0.push(Box::new(policy));
        self
    }
}

impl ExpansionPolicy for AllOf {
    fn expand(&self, step: &WalkStep<'_>) -> bool {
        self.0.iter().all(|p| p.expand(step))
    }
}

/// Depth-limited, cycle-suppressing policy used by configured walks.
#[must_use]
pub fn bounded_policy(max_depth: usize) -> AllOf {
    AllOf::default()
        .with(DepthLimit(max_depth.min(MAX_WALK_DEPTH)))
        .with(PathCycleGuard)
}

// =============================================================================
// WALKING
// =============================================================================

struct Slot {
    element: PathElement,
    parent: Option<usize>,
    depth: usize,
    children: Vec<usize>,
}

fn vertex_view<G: GraphStore + ?Sized>(graph: &G, vertex: VertexRef) -> Result<VertexView, DgmError> {
    Ok(VertexView {
        reference: vertex,
        id: graph.vertex_id(vertex)?,
        properties: graph.vertex_properties(vertex)?,
    })
}

fn edge_view<G: GraphStore + ?Sized>(graph: &G, edge: EdgeRef) -> Result<EdgeView, DgmError> {
    Ok(EdgeView {
        reference: edge,
        id: graph.edge_id(edge)?,
        properties: graph.edge_properties(edge)?,
    })
}

fn ancestors_of(slots: &[Slot], index: usize) -> Vec<VertexRef> {
    let mut path = Vec::new();
    let mut cursor = slots[index].parent;
    while let Some(parent) = cursor {
        path.push(slots[parent].element.vertex.reference);
        cursor = slots[parent].parent;
    }
    path.reverse();
    path
}

/// Walk breadth-first from `root` along edges in `direction`.
///
/// Nodes are expanded while `policy` allows it and never past
/// `MAX_WALK_DEPTH`.
pub fn walk<G: GraphStore + ?Sized>(
    graph: &G,
    root: VertexRef,
    direction: Direction,
    policy: &dyn ExpansionPolicy,
) -> Result<Tree<PathElement>, DgmError> {
    let mut slots = vec![Slot {
        element: PathElement {
            edge: None,
            vertex: vertex_view(graph, root)?,
        },
        parent: None,
        depth: 0,
        children: Vec::new(),
    }];
    let mut queue = VecDeque::from([0usize]);

    while let Some(index) = queue.pop_front() {
        let vertex = slots[index].element.vertex.reference;
        let depth = slots[index].depth;
        if depth >= MAX_WALK_DEPTH {
            tracing::warn!(root = root.0, depth, "walk reached the hard depth cap");
            continue;
        }
        let ancestors = ancestors_of(&slots, index);
        let step = WalkStep {
            depth,
            vertex,
            ancestors: &ancestors,
        };
        if !policy.expand(&step) {
            continue;
        }

        for (edge, other) in graph.edges_of(vertex, direction)? {
            let child = slots.len();
            slots.push(Slot {
                element: PathElement {
                    edge: Some(edge_view(graph, edge)?),
                    vertex: vertex_view(graph, other)?,
                },
                parent: Some(index),
                depth: depth + 1,
                children: Vec::new(),
            });
            slots[index].children.push(child);
            queue.push_back(child);
        }
    }

    // Children always sit after their parent, so assemble back to front.
    let mut built: Vec<Option<Tree<PathElement>>> = Vec::with_capacity(slots.len());
    built.resize_with(slots.len(), || None);
    for (index, slot) in slots.into_iter().enumerate().rev() {
        let children = slot
            .children
            .iter()
            .filter_map(|c| built[*c].take())
            .collect();
        built[index] = Some(Tree::new(slot.element, children));
    }
    built
        .first_mut()
        .and_then(Option::take)
        .ok_or_else(|| DgmError::Unknown("walk produced no root".to_string()))
}

/// Walk with a depth limit and a per-path cycle guard.
pub fn walk_bounded<G: GraphStore + ?Sized>(
    graph: &G,
    root: VertexRef,
    direction: Direction,
    max_depth: usize,
) -> Result<Tree<PathElement>, DgmError> {
    walk(graph, root, direction, &bounded_policy(max_depth))
}

/// Concrete documents reachable from `root` in either direction.
///
/// The root itself and symbolic or unidentified vertices are skipped. Each
/// logical document is listed once, in breadth-first order, inwards walk first.
pub fn reachable_documents<G: GraphStore + ?Sized>(
    graph: &G,
    root: VertexRef,
    max_depth: usize,
) -> Result<Vec<DocumentId>, DgmError> {
    let mut seen = BTreeSet::new();
    let mut found = Vec::new();

    for direction in [Direction::Inwards, Direction::Outwards] {
        let tree = walk_bounded(graph, root, direction, max_depth)?;
        for element in tree.bfs() {
            if element.vertex.reference == root {
                continue;
            }
            let Some(id) = &element.vertex.id else {
                continue;
            };
            if id.is_symbolic() {
                continue;
            }
            if seen.insert(id.key()) {
                found.push(id.clone());
            }
        }
    }

    Ok(found)
}

// =============================================================================
// TESTS
// =============================================================================
