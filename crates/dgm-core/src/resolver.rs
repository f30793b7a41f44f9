//! # Document Resolver
//!
//! Attaches current documents to the nodes of a walk.
//!
//! For each `(edge, vertex)` node:
//! - no identity on the vertex, or a symbolic identity: no document, no lookup
//! - document missing from the store: no document
//! - stored version differs from the version recorded in the graph: expiry
//! - otherwise the document is attached
//!
//! Expiry is not absence. It means the graph is stale relative to the store
//! and must be reported up so the stale document gets degraphmalized again.

use std::sync::Arc;
use tokio::task::JoinSet;

use crate::documents::{Document, DocumentStore};
use crate::tree::Tree;
use crate::types::{DgmError, DocumentId};
use crate::walker::{EdgeView, PathElement, VertexView};

/// A walk node with its document, if one could be attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPathElement {
    /// Edge used to reach the vertex; `None` at the root.
    pub edge: Option<EdgeView>,
    pub vertex: VertexView,
    pub document: Option<Document>,
}

impl ResolvedPathElement {
    /// Identity recorded on the vertex.
    #[must_use]
    pub fn id(&self) -> Option<&DocumentId> {
        self.vertex.id.as_ref()
    }

    /// Label of the edge used to reach this node.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.edge.as_ref().and_then(EdgeView::label)
    }
}

/// Outcome of resolving one walk node.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ResolvedPathElement),
    /// The graph records this version, the store holds another.
    Expired(DocumentId),
}

/// Outcome of resolving a whole walk.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeResolution {
    Complete(Tree<ResolvedPathElement>),
    /// Every stale identity found in the tree, sorted and deduplicated.
    Expired(Vec<DocumentId>),
}

/// Resolves walk nodes against a document store.
#[derive(Debug)]
pub struct DocumentResolver<D: ?Sized> {
    store: Arc<D>,
}

impl<D: ?Sized> Clone for DocumentResolver<D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<D: DocumentStore + ?Sized + 'static> DocumentResolver<D> {
    #[must_use]
    pub fn new(store: Arc<D>) -> Self {
        Self { store }
    }

    /// Resolve a single node.
    pub fn resolve(&self, element: PathElement) -> Result<Resolution, DgmError> {
        resolve_with(self.store.as_ref(), element)
    }

    /// Resolve every node of a walk, fetching documents concurrently on the
    /// blocking pool. Stale nodes anywhere in the tree are all collected.
    pub async fn resolve_tree(&self, tree: Tree<PathElement>) -> Result<TreeResolution, DgmError> {
        let mut elements = Vec::new();
        let shape = tree.map_into(&mut |element| {
            elements.push(element);
            elements.len() - 1
        });

        let mut resolved: Vec<Option<ResolvedPathElement>> = Vec::with_capacity(elements.len());
        resolved.resize_with(elements.len(), || None);

        let mut tasks = JoinSet::new();
        for (index, element) in elements.into_iter().enumerate() {
            let store = Arc::clone(&self.store);
            tasks.spawn_blocking(move || (index, resolve_with(store.as_ref(), element)));
        }

        let mut expired = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined.map_err(|e| DgmError::Unknown(e.to_string()))?;
            match outcome? {
                Resolution::Resolved(element) => resolved[index] = Some(element),
                Resolution::Expired(id) => expired.push(id),
            }
        }

        if !expired.is_empty() {
            expired.sort();
            expired.dedup();
            return Ok(TreeResolution::Expired(expired));
        }

        let tree = shape.try_map(&mut |index| {
            resolved[*index]
                .take()
                .ok_or_else(|| DgmError::Unknown("walk node left unresolved".to_string()))
        })?;
        Ok(TreeResolution::Complete(tree))
    }
}

fn resolve_with<D: DocumentStore + ?Sized>(
    store: &D,
    element: PathElement,
) -> Result<Resolution, DgmError> {
    let PathElement { edge, vertex } = element;
    let document = match &vertex.id {
        None => None,
        Some(id) if id.is_symbolic() => None,
        Some(id) => match store.fetch(id)? {
            None => None,
            Some(document) if document.id.version() != id.version() => {
                tracing::warn!(
                    graph = %id,
                    store_version = document.id.version(),
                    "graph version expired"
                );
                return Ok(Resolution::Expired(id.clone()));
            }
            Some(document) => Some(document),
        },
    };
    Ok(Resolution::Resolved(ResolvedPathElement {
        edge,
        vertex,
        document,
    }))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::documents::MemoryDocumentStore;
    use crate::graph::{Graph, GraphStore};
    use crate::types::{Direction, EdgeId, VertexRef};
    use crate::walker::walk_bounded;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn element(id: Option<DocumentId>) -> PathElement {
        PathElement {
            edge: None,
            vertex: VertexView {
                reference: VertexRef(0),
                id,
                properties: BTreeMap::new(),
            },
        }
    }

    fn resolver() -> (Arc<MemoryDocumentStore>, DocumentResolver<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        let resolver = DocumentResolver::new(Arc::clone(&store));
        (store, resolver)
    }

    fn document_of(resolution: Resolution) -> Option<Document> {
        match resolution {
            Resolution::Resolved(element) => element.document,
            Resolution::Expired(id) => panic!("unexpected expiry of {id}"),
        }
    }

    #[test]
    fn unidentified_vertex_is_absent() {
        let (_, resolver) = resolver();
        let resolution = resolver.resolve(element(None)).expect("resolve");
        assert_eq!(document_of(resolution), None);
    }

    #[test]
    fn symbolic_vertex_is_absent_without_lookup() {
        let (store, resolver) = resolver();
        store.put("i", "t", "a", &json!({})).expect("put");
        let id = DocumentId::symbolic_of("i", "t", "a");
        let resolution = resolver.resolve(element(Some(id))).expect("resolve");
        assert_eq!(document_of(resolution), None);
    }

    #[test]
    fn missing_document_is_absent() {
        let (_, resolver) = resolver();
        let id = DocumentId::new("i", "t", "a", 1);
        let resolution = resolver.resolve(element(Some(id))).expect("resolve");
        assert_eq!(document_of(resolution), None);
    }

    #[test]
    fn version_mismatch_is_expired_not_absent() {
        let (store, resolver) = resolver();
        store.put("i", "t", "a", &json!({"v": 1})).expect("put");
        store.put("i", "t", "a", &json!({"v": 2})).expect("put");

        let stale = DocumentId::new("i", "t", "a", 1);
        let resolution = resolver.resolve(element(Some(stale.clone()))).expect("resolve");
        assert_eq!(resolution, Resolution::Expired(stale));
    }

    #[test]
    fn matching_version_attaches_document() {
        let (store, resolver) = resolver();
        store.put("i", "t", "a", &json!({"v": 1})).expect("put");

        let id = DocumentId::new("i", "t", "a", 1);
        let document = document_of(resolver.resolve(element(Some(id.clone()))).expect("resolve"));
        assert_eq!(document, Some(Document::new(id, json!({"v": 1}))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_tree_collects_every_expiry() {
        let (store, resolver) = resolver();
        let mut graph = Graph::new();
        let root = DocumentId::new("i", "t", "root", 1);
        store.put("i", "t", "root", &json!({})).expect("put");
        let root_vertex = graph.create_vertex(&root).expect("root");
        for name in ["a", "b"] {
            store.put("i", "t", name, &json!({})).expect("put");
            store.put("i", "t", name, &json!({})).expect("put");
            let id = DocumentId::new("i", "t", name, 1);
            graph.create_vertex(&id).expect("vertex");
            graph
                .create_edge(&EdgeId::new(root.clone(), "ref", id), &root)
                .expect("edge");
        }

        let tree = walk_bounded(&graph, root_vertex, Direction::Outwards, 5).expect("walk");
        let resolution = resolver.resolve_tree(tree).await.expect("resolve");
        assert_eq!(
            resolution,
            TreeResolution::Expired(vec![
                DocumentId::new("i", "t", "a", 1),
                DocumentId::new("i", "t", "b", 1),
            ])
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_tree_keeps_shape() {
        let (store, resolver) = resolver();
        let mut graph = Graph::new();
        let root = DocumentId::new("i", "t", "root", 1);
        let child = DocumentId::new("i", "t", "child", 1);
        store.put("i", "t", "root", &json!({"name": "root"})).expect("put");
        store.put("i", "t", "child", &json!({"name": "child"})).expect("put");
        let root_vertex = graph.create_vertex(&root).expect("root");
        graph.create_vertex(&child).expect("child");
        graph
            .create_edge(&EdgeId::new(root.clone(), "ref", child), &root)
            .expect("edge");

        let tree = walk_bounded(&graph, root_vertex, Direction::Outwards, 5).expect("walk");
        let TreeResolution::Complete(resolved) = resolver.resolve_tree(tree).await.expect("resolve")
        else {
            panic!("expected a complete tree");
        };

        let names: Vec<_> = resolved
            .bfs()
            .map(|e| e.document.as_ref().map(|d| d.source["name"].clone()))
            .collect();
        assert_eq!(names, vec![Some(json!("root")), Some(json!("child"))]);
        assert_eq!(resolved.children()[0].value().label(), Some("ref"));
    }
}
