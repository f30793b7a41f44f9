//! # Recompute Engine
//!
//! Recomputes the output document of one root document for one type
//! configuration.
//!
//! ```text
//! START -> EXTRACT_SOURCE -> WALK_AND_REDUCE -> WRITE -> SUCCESS
//!               |                 |              |
//!        SOURCE_MISSING        EXPIRED       EXCEPTION
//!           FILTERED
//! ```
//!
//! Any stage may end in `EXCEPTION`; errors never escape a recompute. An
//! expired recompute reports every stale identity found across all walks
//! and writes nothing.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::configuration::{EngineSettings, TypeConfig};
use crate::documents::{Document, DocumentStore};
use crate::graph::GraphStore;
use crate::reducer::{merge_properties, reduce_walk};
use crate::resolver::{DocumentResolver, TreeResolution};
use crate::types::{DgmError, DocumentId};
use crate::walker::walk_bounded;

// =============================================================================
// ACTIONS AND RESULTS
// =============================================================================

/// Recompute `root` under `config`.
#[derive(Clone)]
pub struct RecomputeAction {
    pub root: DocumentId,
    pub config: Arc<dyn TypeConfig>,
    /// Hash of the degraphmalize action that scheduled this recompute.
    pub parent: Option<String>,
}

impl RecomputeAction {
    #[must_use]
    pub fn new(root: DocumentId, config: Arc<dyn TypeConfig>) -> Self {
        Self {
            root,
            config,
            parent: None,
        }
    }
}

impl fmt::Debug for RecomputeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecomputeAction")
            .field("root", &self.root)
            .field("config", &self.config.name())
            .field("parent", &self.parent)
            .finish()
    }
}

/// A written output document.
#[derive(Debug, Clone, PartialEq)]
pub struct RecomputeSuccess {
    /// Identity of the written target document, at the version written.
    pub index_response: DocumentId,
    pub source: Document,
    pub result: Value,
    /// Derived properties merged into the result, by name.
    pub properties: BTreeMap<String, Value>,
}

/// Why a recompute produced no output without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Filtered,
    SourceMissing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecomputeOutcome {
    Success(Box<RecomputeSuccess>),
    /// Stale identities found, sorted and deduplicated.
    Expired(Vec<DocumentId>),
    Exception(DgmError),
    Failed(FailureReason),
}

/// Flat status of a recompute outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeStatus {
    Success,
    Expired,
    Exception,
    Filtered,
    SourceMissing,
}

#[derive(Debug, Clone)]
pub struct RecomputeResult {
    pub action: RecomputeAction,
    pub outcome: RecomputeOutcome,
}

impl RecomputeResult {
    #[must_use]
    pub fn status(&self) -> RecomputeStatus {
        match &self.outcome {
            RecomputeOutcome::Success(_) => RecomputeStatus::Success,
            RecomputeOutcome::Expired(_) => RecomputeStatus::Expired,
            RecomputeOutcome::Exception(_) => RecomputeStatus::Exception,
            RecomputeOutcome::Failed(FailureReason::Filtered) => RecomputeStatus::Filtered,
            RecomputeOutcome::Failed(FailureReason::SourceMissing) => RecomputeStatus::SourceMissing,
        }
    }

    /// Stale identities, if the recompute expired.
    #[must_use]
    pub fn expired(&self) -> &[DocumentId] {
        match &self.outcome {
            RecomputeOutcome::Expired(ids) => ids,
            _ => &[],
        }
    }

    #[must_use]
    pub fn success(&self) -> Option<&RecomputeSuccess> {
        match &self.outcome {
            RecomputeOutcome::Success(success) => Some(success),
            _ => None,
        }
    }
}

// =============================================================================
// BLOCKING BRIDGE
// =============================================================================

/// Run a synchronous store operation on the blocking pool.
pub(crate) async fn run_blocking<T: Send + 'static>(
    op: impl FnOnce() -> Result<T, DgmError> + Send + 'static,
) -> Result<T, DgmError> {
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| DgmError::Unknown(e.to_string()))?
}

// =============================================================================
// RECOMPUTER
// =============================================================================

/// Runs recompute actions against a shared graph and a document store.
pub struct Recomputer<G: ?Sized, D: ?Sized> {
    graph: Arc<RwLock<G>>,
    documents: Arc<D>,
    resolver: DocumentResolver<D>,
    settings: Arc<EngineSettings>,
}

impl<G: ?Sized, D: ?Sized> Clone for Recomputer<G, D> {
    fn clone(&self) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            documents: Arc::clone(&self.documents),
            resolver: self.resolver.clone(),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<G, D> Recomputer<G, D>
where
    G: GraphStore + ?Sized + 'static,
    D: DocumentStore + ?Sized + 'static,
{
    #[must_use]
    pub fn new(graph: Arc<RwLock<G>>, documents: Arc<D>, settings: EngineSettings) -> Self {
        Self {
            resolver: DocumentResolver::new(Arc::clone(&documents)),
            graph,
            documents,
            settings: Arc::new(settings),
        }
    }

    /// Run one recompute to completion. Never fails: errors become `Exception`.
    pub async fn recompute(&self, action: RecomputeAction) -> RecomputeResult {
        let outcome = match self.run(&action).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(root = %action.root, config = action.config.name(), error = %error, "recompute failed");
                RecomputeOutcome::Exception(error)
            }
        };
        RecomputeResult { action, outcome }
    }

    /// Like `recompute`, on its own task so that a panicking configuration
    /// is reported as `Exception` as well.
    pub async fn recompute_isolated(&self, action: RecomputeAction) -> RecomputeResult {
        let recomputer = self.clone();
        let task = tokio::spawn({
            let action = action.clone();
            async move { recomputer.recompute(action).await }
        });
        match task.await {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(root = %action.root, error = %error, "recompute task aborted");
                RecomputeResult {
                    action,
                    outcome: RecomputeOutcome::Exception(DgmError::Unknown(error.to_string())),
                }
            }
        }
    }

    async fn run(&self, action: &RecomputeAction) -> Result<RecomputeOutcome, DgmError> {
        let config = &action.config;

        // EXTRACT_SOURCE
        let source = {
            let documents = Arc::clone(&self.documents);
            let root = action.root.clone();
            run_blocking(move || documents.fetch(&root)).await?
        };
        let Some(source) = source else {
            tracing::debug!(root = %action.root, "source missing");
            return Ok(RecomputeOutcome::Failed(FailureReason::SourceMissing));
        };
        if !action.root.is_symbolic() && source.id.version() != action.root.version() {
            tracing::warn!(
                root = %action.root,
                store_version = source.id.version(),
                "recompute root expired"
            );
            return Ok(RecomputeOutcome::Expired(vec![action.root.clone()]));
        }

        if !config.filter(&source) {
            tracing::debug!(root = %action.root, config = config.name(), "filtered");
            return Ok(RecomputeOutcome::Failed(FailureReason::Filtered));
        }

        // WALK_AND_REDUCE
        let mut properties = BTreeMap::new();
        let mut expired = Vec::new();
        for walk in config.walks().values() {
            let graph = Arc::clone(&self.graph);
            let root = action.root.clone();
            let direction = walk.direction();
            let depth = self.settings.walk_depth(walk.as_ref());
            let tree = run_blocking(move || {
                let graph = graph.read();
                let vertex = graph
                    .find_vertex(&root)?
                    .ok_or_else(|| DgmError::NotFoundInGraph(root.clone()))?;
                walk_bounded(&*graph, vertex, direction, depth)
            })
            .await?;

            match self.resolver.resolve_tree(tree).await? {
                TreeResolution::Complete(resolved) => {
                    properties.extend(reduce_walk(walk.as_ref(), &resolved)?);
                }
                TreeResolution::Expired(ids) => expired.extend(ids),
            }
        }
        if !expired.is_empty() {
            expired.sort();
            expired.dedup();
            tracing::warn!(root = %action.root, stale = expired.len(), "recompute expired");
            return Ok(RecomputeOutcome::Expired(expired));
        }

        // WRITE
        let mut result = merge_properties(config.transform(&source)?, properties.clone())?;
        if let (Some(field), Value::Object(object)) =
            (&self.settings.source_reference_field, &mut result)
        {
            let reference =
                serde_json::to_value(&source.id).map_err(|e| DgmError::Serialization(e.to_string()))?;
            object.insert(field.clone(), reference);
        }

        let target_index = config.target_index().to_string();
        let target_type = config.target_type().to_string();
        let target_id = action.root.id().to_string();
        let written = {
            let documents = Arc::clone(&self.documents);
            let result = result.clone();
            let (index, type_name, id) = (target_index.clone(), target_type.clone(), target_id.clone());
            run_blocking(move || documents.put(&index, &type_name, &id, &result)).await?
        };
        let index_response = DocumentId::new(target_index, target_type, target_id, written);
        tracing::debug!(root = %action.root, target = %index_response, "target written");

        Ok(RecomputeOutcome::Success(Box::new(RecomputeSuccess {
            index_response,
            source,
            result,
            properties,
        })))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::configuration::{FnPropertyConfig, FnTypeConfig, FnWalkConfig};
    use crate::documents::MemoryDocumentStore;
    use crate::graph::Graph;
    use crate::manager::SubgraphManager;
    use crate::reducer::collect_ids;
    use crate::subgraph::SubgraphBuilder;
    use crate::types::Direction;
    use serde_json::json;

    struct Fixture {
        graph: Arc<RwLock<Graph>>,
        documents: Arc<MemoryDocumentStore>,
        recomputer: Recomputer<Graph, MemoryDocumentStore>,
    }

    fn fixture(settings: EngineSettings) -> Fixture {
        let graph = Arc::new(RwLock::new(Graph::new()));
        let documents = Arc::new(MemoryDocumentStore::new());
        let recomputer = Recomputer::new(Arc::clone(&graph), Arc::clone(&documents), settings);
        Fixture {
            graph,
            documents,
            recomputer,
        }
    }

    fn index(fixture: &Fixture, id: &str, source: Value, links: &[&str]) -> DocumentId {
        let version = fixture.documents.put("cms", "page", id, &source).expect("put");
        let doc_id = DocumentId::new("cms", "page", id, version);
        let mut builder = SubgraphBuilder::new();
        for link in links {
            builder.edge("ref", DocumentId::symbolic_of("cms", "page", *link), Direction::Outwards);
        }
        SubgraphManager::commit_subgraph(
            &mut *fixture.graph.write(),
            &doc_id,
            &builder.build().expect("build"),
        )
        .expect("commit");
        doc_id
    }

    fn pages() -> Arc<dyn TypeConfig> {
        Arc::new(
            FnTypeConfig::new("pages", "cms", "page", "site", "page").walk(
                FnWalkConfig::new("referrers", Direction::Inwards)
                    .property(FnPropertyConfig::new("referrers", |t| Ok(collect_ids(t)))),
            ),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_writes_target_with_properties() {
        let fx = fixture(EngineSettings::default());
        let a = index(&fx, "a", json!({"title": "A"}), &[]);
        index(&fx, "b", json!({"title": "B"}), &["a"]);

        let result = fx.recomputer.recompute(RecomputeAction::new(a, pages())).await;
        let success = result.success().expect("success");

        assert_eq!(success.index_response, DocumentId::new("site", "page", "a", 1));
        assert_eq!(success.result["title"], json!("A"));
        assert_eq!(success.result["referrers"], json!(["b"]));
        assert_eq!(success.result["_fromSource"]["id"], json!("a"));
        let written = fx.documents.get("site", "page", "a").expect("get").expect("written");
        assert_eq!(written.source, success.result);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_neighbour_expires_without_write() {
        let fx = fixture(EngineSettings::default());
        let a = index(&fx, "a", json!({}), &[]);
        let b = index(&fx, "b", json!({}), &["a"]);
        fx.documents.put("cms", "page", "b", &json!({"changed": true})).expect("put");

        let result = fx.recomputer.recompute(RecomputeAction::new(a, pages())).await;

        assert_eq!(result.status(), RecomputeStatus::Expired);
        assert_eq!(result.expired(), &[b]);
        assert!(fx.documents.get("site", "page", "a").expect("get").is_none());
    }

    fn both_ways() -> Arc<dyn TypeConfig> {
        Arc::new(
            FnTypeConfig::new("pages", "cms", "page", "site", "page")
                .walk(
                    FnWalkConfig::new("referrers", Direction::Inwards)
                        .property(FnPropertyConfig::new("referrers", |t| Ok(collect_ids(t)))),
                )
                .walk(
                    FnWalkConfig::new("references", Direction::Outwards)
                        .property(FnPropertyConfig::new("references", |t| Ok(collect_ids(t)))),
                ),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn one_stale_walk_expires_the_whole_recompute() {
        let fx = fixture(EngineSettings::default());
        let a = index(&fx, "a", json!({}), &["c"]);
        let b = index(&fx, "b", json!({}), &["a"]);
        index(&fx, "c", json!({}), &[]);
        fx.documents.put("cms", "page", "b", &json!({"changed": true})).expect("put");

        let result = fx.recomputer.recompute(RecomputeAction::new(a, both_ways())).await;

        assert_eq!(result.outcome, RecomputeOutcome::Expired(vec![b]));
        assert!(fx.documents.get("site", "page", "a").expect("get").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expiries_from_every_walk_are_reported() {
        let fx = fixture(EngineSettings::default());
        let a = index(&fx, "a", json!({}), &["c"]);
        let b = index(&fx, "b", json!({}), &["a"]);
        let c = index(&fx, "c", json!({}), &[]);
        fx.documents.put("cms", "page", "b", &json!({"changed": true})).expect("put");
        fx.documents.put("cms", "page", "c", &json!({"changed": true})).expect("put");

        let result = fx.recomputer.recompute(RecomputeAction::new(a, both_ways())).await;

        assert_eq!(result.status(), RecomputeStatus::Expired);
        let expired = result.expired();
        assert_eq!(expired.len(), 2);
        assert!(expired.contains(&b));
        assert!(expired.contains(&c));
        assert!(fx.documents.documents_in("site").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_root_expires() {
        let fx = fixture(EngineSettings::default());
        let a = index(&fx, "a", json!({}), &[]);
        fx.documents.put("cms", "page", "a", &json!({})).expect("put");

        let result = fx.recomputer.recompute(RecomputeAction::new(a.clone(), pages())).await;
        assert_eq!(result.outcome, RecomputeOutcome::Expired(vec![a]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn filtered_writes_nothing() {
        let fx = fixture(EngineSettings::default());
        let a = index(&fx, "a", json!({"draft": true}), &[]);
        let config: Arc<dyn TypeConfig> = Arc::new(
            FnTypeConfig::new("pages", "cms", "page", "site", "page")
                .filter_with(|doc| doc.source["draft"] != json!(true)),
        );

        let result = fx.recomputer.recompute(RecomputeAction::new(a, config)).await;

        assert_eq!(result.status(), RecomputeStatus::Filtered);
        assert!(fx.documents.documents_in("site").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_source_is_reported() {
        let fx = fixture(EngineSettings::default());
        let result = fx
            .recomputer
            .recompute(RecomputeAction::new(DocumentId::new("cms", "page", "x", 1), pages()))
            .await;
        assert_eq!(result.status(), RecomputeStatus::SourceMissing);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scalar_transform_is_an_exception() {
        let fx = fixture(EngineSettings::default());
        let a = index(&fx, "a", json!({}), &[]);
        let config: Arc<dyn TypeConfig> = Arc::new(
            FnTypeConfig::new("pages", "cms", "page", "site", "page").transform_with(|_| Ok(json!(42))),
        );

        let result = fx.recomputer.recompute(RecomputeAction::new(a, config)).await;
        assert_eq!(
            result.outcome,
            RecomputeOutcome::Exception(DgmError::NotAnObject("number".to_string()))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_config_is_isolated() {
        let fx = fixture(EngineSettings::default());
        let a = index(&fx, "a", json!({}), &[]);
        let config: Arc<dyn TypeConfig> = Arc::new(
            FnTypeConfig::new("pages", "cms", "page", "site", "page")
                .filter_with(|_| panic!("broken filter")),
        );

        let result = fx.recomputer.recompute_isolated(RecomputeAction::new(a, config)).await;
        assert_eq!(result.status(), RecomputeStatus::Exception);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn source_reference_can_be_disabled() {
        let fx = fixture(EngineSettings {
            source_reference_field: None,
            ..EngineSettings::default()
        });
        let a = index(&fx, "a", json!({"title": "A"}), &[]);
        let config: Arc<dyn TypeConfig> =
            Arc::new(FnTypeConfig::new("pages", "cms", "page", "site", "page"));

        let result = fx.recomputer.recompute(RecomputeAction::new(a, config)).await;
        assert_eq!(result.success().expect("success").result, json!({"title": "A"}));
    }
}
