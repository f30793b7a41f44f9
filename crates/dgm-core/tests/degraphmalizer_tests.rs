//! # Degraphmalizer Tests
//!
//! End-to-end scenarios through the job orchestrator: extraction, context
//! computation, recompute fan-out, expiry and resubmission.

use dgm_core::reducer::collect_ids;
use dgm_core::{
    ActionType, Configuration, DegraphmalizeAction, DegraphmalizeResult, DegraphmalizeStatus,
    Degraphmalizer, DgmError, Direction, Document, DocumentId, DocumentStore, EngineSettings,
    FnPropertyConfig, FnTypeConfig, FnWalkConfig, Graph, GraphStore, MemoryDocumentStore,
    NoopStatus, RecomputeAction, RecomputeResult, RecomputeStatus, Subgraph, SubgraphBuilder,
    TypeConfig,
};
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// =============================================================================
// FIXTURES
// =============================================================================

fn page(id: &str, version: u64) -> DocumentId {
    DocumentId::new("cms", "page", id, version)
}

/// One outwards `ref` edge per id listed in the `links` field.
fn extract_links(document: &Document) -> Result<Subgraph, DgmError> {
    let mut builder = SubgraphBuilder::new();
    if let Some(links) = document.source.get("links").and_then(Value::as_array) {
        for link in links.iter().filter_map(Value::as_str) {
            builder.edge(
                "ref",
                DocumentId::symbolic_of(document.id.index(), document.id.type_name(), link),
                Direction::Outwards,
            );
        }
    }
    builder.build()
}

fn pages() -> FnTypeConfig {
    FnTypeConfig::new("pages", "cms", "page", "site", "page")
        .extract_with(extract_links)
        .filter_with(|doc| doc.source.get("published") != Some(&json!(false)))
        .walk(
            FnWalkConfig::new("referrers", Direction::Inwards)
                .property(FnPropertyConfig::new("referrers", |t| Ok(collect_ids(t)))),
        )
        .walk(
            FnWalkConfig::new("references", Direction::Outwards)
                .property(FnPropertyConfig::new("references", |t| Ok(collect_ids(t)))),
        )
}

struct Harness {
    documents: Arc<MemoryDocumentStore>,
    engine: Degraphmalizer<Graph, MemoryDocumentStore>,
}

impl Harness {
    fn new(settings: EngineSettings) -> Self {
        Self::with_config(pages(), settings)
    }

    fn with_config(config: FnTypeConfig, settings: EngineSettings) -> Self {
        let documents = Arc::new(MemoryDocumentStore::new());
        let engine = Degraphmalizer::start(
            Arc::new(RwLock::new(Graph::new())),
            Arc::clone(&documents),
            Configuration::new(vec![Arc::new(config)]).expect("configuration"),
            settings,
        );
        Self { documents, engine }
    }

    fn put(&self, id: &str, source: Value) -> DocumentId {
        let version = self.documents.put("cms", "page", id, &source).expect("put");
        page(id, version)
    }

    async fn update(&self, id: &str) -> DegraphmalizeResult {
        self.engine
            .degraphmalize(ActionType::Update, page(id, 0), Arc::new(NoopStatus))
            .expect("submit")
            .wait()
            .await
            .expect("result")
    }

    fn target(&self, id: &str) -> Option<(u64, Value)> {
        self.documents
            .get("site", "page", id)
            .expect("get")
            .map(|doc| (doc.version, doc.source))
    }
}

fn result_for<'a>(result: &'a DegraphmalizeResult, id: &str) -> &'a RecomputeResult {
    result
        .results()
        .iter()
        .find(|r| r.action.root.id() == id)
        .expect("recompute scheduled")
}

// =============================================================================
// END-TO-END SCENARIOS
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn new_reference_recomputes_both_ends() {
    let h = Harness::new(EngineSettings::default());
    h.put("a", json!({"title": "A"}));
    h.update("a").await;
    h.put("b", json!({"title": "B", "links": ["a"]}));

    let result = h.update("b").await;

    let roots: Vec<&str> = result.results().iter().map(|r| r.action.root.id()).collect();
    assert_eq!(roots, vec!["b", "a"]);
    let a = result_for(&result, "a").success().expect("a recomputed");
    assert_eq!(a.result["referrers"], json!(["b"]));
    let b = result_for(&result, "b").success().expect("b recomputed");
    assert_eq!(b.result["references"], json!(["a"]));
    assert_eq!(h.target("a").expect("written").1["referrers"], json!(["b"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn reference_to_unknown_document_stays_symbolic() {
    let h = Harness::new(EngineSettings::default());
    h.put("b", json!({"links": ["ghost"]}));

    let result = h.update("b").await;

    assert_eq!(result.results().len(), 1);
    let b = result_for(&result, "b").success().expect("success");
    assert_eq!(b.result["references"], json!([]));
    let graph = h.engine.graph().read();
    let ghost = graph.find_vertex(&page("ghost", 0)).expect("find").expect("vertex");
    assert_eq!(graph.vertex_id(ghost).expect("id"), Some(page("ghost", 0)));
}

#[tokio::test(flavor = "multi_thread")]
async fn external_change_surfaces_expiry_without_writes() {
    let h = Harness::new(EngineSettings {
        max_expiry_cascade: 0,
        ..EngineSettings::default()
    });
    let a1 = h.put("a", json!({"title": "A"}));
    h.update("a").await;
    h.put("a", json!({"title": "A2"}));
    h.put("b", json!({"links": ["a"]}));

    let result = h.update("b").await;

    let b = result_for(&result, "b");
    assert_eq!(b.status(), RecomputeStatus::Expired);
    assert_eq!(b.expired(), &[a1.clone()]);
    assert_eq!(result_for(&result, "a").expired(), &[a1]);
    assert!(h.target("b").is_none());
    assert_eq!(h.target("a").expect("first write").0, 1);
    assert!(result.resubmitted.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn expiry_cascade_converges() {
    let h = Harness::new(EngineSettings::default());
    h.put("a", json!({"title": "A"}));
    h.update("a").await;
    h.put("a", json!({"title": "A2"}));
    h.put("b", json!({"links": ["a"]}));

    let all = h
        .engine
        .degraphmalize(ActionType::Update, page("b", 0), Arc::new(NoopStatus))
        .expect("submit")
        .wait_all()
        .await
        .expect("results");

    assert_eq!(all.len(), 2);
    assert_eq!(all[1].action.id(), &page("a", 1));
    assert_eq!(all[1].action.cascade(), 1);
    let (_, b) = h.target("b").expect("b written");
    assert_eq!(b["references"], json!(["a"]));
    let (_, a) = h.target("a").expect("a written");
    assert_eq!(a["title"], json!("A2"));
    assert_eq!(a["referrers"], json!(["b"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn filtered_document_is_in_graph_but_not_written() {
    let h = Harness::new(EngineSettings::default());
    h.put("a", json!({"published": false, "links": ["b"]}));

    let result = h.update("a").await;

    assert_eq!(result_for(&result, "a").status(), RecomputeStatus::Filtered);
    assert!(h.target("a").is_none());
    assert_eq!(h.engine.graph().read().edge_count().expect("count"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_reference_recomputes_former_target() {
    let h = Harness::new(EngineSettings::default());
    h.put("a", json!({}));
    h.update("a").await;
    h.put("b", json!({"links": ["a"]}));
    h.update("b").await;
    h.put("b", json!({"links": []}));

    let result = h.update("b").await;

    let a = result_for(&result, "a").success().expect("a recomputed from pre-context");
    assert_eq!(a.result["referrers"], json!([]));
    assert_eq!(h.engine.graph().read().edge_count().expect("count"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_recomputes_context_and_reports_missing_source() {
    let h = Harness::new(EngineSettings::default());
    h.put("a", json!({}));
    h.update("a").await;
    let b = h.put("b", json!({"links": ["a"]}));
    h.update("b").await;
    h.documents.remove("cms", "page", "b");

    let result = h
        .engine
        .degraphmalize(ActionType::Delete, b, Arc::new(NoopStatus))
        .expect("submit")
        .wait()
        .await
        .expect("result");

    assert_eq!(result_for(&result, "b").status(), RecomputeStatus::SourceMissing);
    let a = result_for(&result, "a").success().expect("a recomputed");
    assert_eq!(a.result["referrers"], json!([]));
    assert!(h.engine.graph().read().find_vertex(&page("b", 0)).expect("find").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn extraction_failure_aborts_the_action() {
    let config = FnTypeConfig::new("pages", "cms", "page", "site", "page")
        .extract_with(|_| Err(DgmError::Unknown("bad extraction".to_string())));
    let h = Harness::with_config(config, EngineSettings::default());
    h.put("a", json!({}));

    let result = h.update("a").await;

    assert_eq!(result.error(), Some(&DgmError::Unknown("bad extraction".to_string())));
    assert!(result.results().is_empty());
    assert_eq!(h.engine.graph().read().vertex_count().expect("count"), 0);
}

// =============================================================================
// STATUS CALLBACKS
// =============================================================================

#[derive(Default)]
struct CountingStatus {
    started: AtomicUsize,
    recompute_started: AtomicUsize,
    recompute_complete: AtomicUsize,
    complete: AtomicUsize,
    exception: AtomicUsize,
}

impl DegraphmalizeStatus for CountingStatus {
    fn started(&self, _action: &DegraphmalizeAction) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn recompute_started(&self, _action: &RecomputeAction) {
        self.recompute_started.fetch_add(1, Ordering::SeqCst);
    }

    fn recompute_complete(&self, _result: &RecomputeResult) {
        self.recompute_complete.fetch_add(1, Ordering::SeqCst);
    }

    fn complete(&self, _result: &DegraphmalizeResult) {
        self.complete.fetch_add(1, Ordering::SeqCst);
    }

    fn exception(&self, _result: &DegraphmalizeResult) {
        self.exception.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn callbacks_fire_once_per_event() {
    let h = Harness::new(EngineSettings::default());
    h.put("a", json!({}));
    h.update("a").await;
    h.put("b", json!({"links": ["a"]}));

    let status = Arc::new(CountingStatus::default());
    let result = h
        .engine
        .degraphmalize(ActionType::Update, page("b", 0), status.clone())
        .expect("submit")
        .wait()
        .await
        .expect("result");

    assert_eq!(status.started.load(Ordering::SeqCst), 1);
    assert_eq!(status.recompute_started.load(Ordering::SeqCst), result.results().len());
    assert_eq!(status.recompute_complete.load(Ordering::SeqCst), result.results().len());
    assert_eq!(status.complete.load(Ordering::SeqCst), 1);
    assert_eq!(status.exception.load(Ordering::SeqCst), 0);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_submissions_are_serialized() {
    let h = Harness::new(EngineSettings::default());
    h.put("hub", json!({}));
    h.update("hub").await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let id = format!("spoke-{i}");
        h.put(&id, json!({"links": ["hub"]}));
        handles.push(
            h.engine
                .degraphmalize(ActionType::Update, page(&id, 0), Arc::new(NoopStatus))
                .expect("submit"),
        );
    }
    for handle in handles {
        let result = handle.wait().await.expect("result");
        assert!(result.error().is_none());
    }

    let graph = h.engine.graph().read();
    assert_eq!(graph.vertex_count().expect("count"), 21);
    assert_eq!(graph.edge_count().expect("count"), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_handle_does_not_stall_the_engine() {
    let h = Harness::new(EngineSettings::default());
    h.put("a", json!({"title": "A"}));
    let status = Arc::new(CountingStatus::default());
    drop(
        h.engine
            .degraphmalize(ActionType::Update, page("a", 0), status.clone())
            .expect("submit"),
    );

    h.put("b", json!({"links": ["a"]}));
    let result = h.update("b").await;

    assert!(result.error().is_none());
    assert_eq!(status.started.load(Ordering::SeqCst), 1);
    assert_eq!(status.exception.load(Ordering::SeqCst), 0);
    let graph = h.engine.graph().read();
    let a = graph.find_vertex(&page("a", 0)).expect("find").expect("vertex");
    assert_eq!(graph.vertex_id(a).expect("id"), Some(page("a", 1)));
}

#[tokio::test(flavor = "multi_thread")]
async fn configs_can_be_passed_explicitly() {
    let h = Harness::new(EngineSettings::default());
    h.put("a", json!({}));
    let config: Arc<dyn TypeConfig> =
        Arc::new(FnTypeConfig::new("mirror", "cms", "page", "mirror", "page"));

    let result = h
        .engine
        .submit(ActionType::Update, page("a", 0), vec![config], Arc::new(NoopStatus))
        .wait()
        .await
        .expect("result");

    assert_eq!(result.results()[0].action.config.name(), "mirror");
    assert!(h.documents.get("mirror", "page", "a").expect("get").is_some());
}
