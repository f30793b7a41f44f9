//! # Fixtures
//!
//! A fixture seeds the document store, replays a list of changes through
//! the engine and states which output documents are expected afterwards.
//!
//! ```json
//! {
//!   "documents": [
//!     {"index": "cms", "type": "page", "id": "a", "source": {"title": "A"}}
//!   ],
//!   "changes": [
//!     {"action": "update", "index": "cms", "type": "page", "id": "b",
//!      "source": {"title": "B", "links": ["a"]}},
//!     {"action": "update", "index": "cms", "type": "page", "id": "a"}
//!   ],
//!   "expected": [
//!     {"index": "site", "type": "page", "id": "a", "source": {"referrers": ["b"]}}
//!   ]
//! }
//! ```
//!
//! An UPDATE carrying a `source` writes it before degraphmalizing; a DELETE
//! removes the document first. Expected sources match as a subset unless
//! `exact` is set; a `null` source expects the document to be absent.

use dgm_core::{
    ActionType, DegraphmalizeStatus, Degraphmalizer, DocumentId, DocumentStore, GraphStore,
    MemoryDocumentStore, RecomputeStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use crate::error::CliError;

// =============================================================================
// FIXTURE FORMAT
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Fixture {
    /// Written to the document store before any change.
    pub documents: Vec<FixtureDocument>,
    /// Degraphmalized in order.
    pub changes: Vec<Change>,
    pub expected: Vec<Expectation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureDocument {
    pub index: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
    pub source: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub action: ActionType,
    pub index: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
    #[serde(default)]
    pub source: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    pub index: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
    pub source: Option<Value>,
    #[serde(default)]
    pub exact: bool,
}

impl Fixture {
    /// Read and parse a fixture file.
    ///
    /// # Errors
    ///
    /// `CliError::Io` if the file cannot be read, `CliError::Fixture` if it
    /// is not a valid fixture.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CliError::Io(format!("Cannot read fixture '{}': {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// # Errors
    ///
    /// `CliError::Fixture` on malformed JSON or unknown fields.
    pub fn parse(text: &str) -> Result<Self, CliError> {
        serde_json::from_str(text).map_err(|e| CliError::Fixture(e.to_string()))
    }

    /// Write the seed documents.
    ///
    /// # Errors
    ///
    /// Propagates document store failures.
    pub fn seed(&self, store: &dyn DocumentStore) -> Result<(), CliError> {
        for doc in &self.documents {
            store.put(&doc.index, &doc.type_name, &doc.id, &doc.source)?;
        }
        tracing::debug!(documents = self.documents.len(), "fixture seeded");
        Ok(())
    }
}

// =============================================================================
// REPLAY
// =============================================================================

/// What one change did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeReport {
    pub action: ActionType,
    pub id: DocumentId,
    /// Actions run, counting resubmissions.
    pub actions: usize,
    /// Recompute outcomes by status.
    pub recomputes: BTreeMap<&'static str, usize>,
    /// Failures of the change or of any resubmitted action.
    pub errors: Vec<String>,
}

/// Apply every change of `fixture` in order, waiting for each to settle
/// (resubmissions included) before the next.
///
/// A change no configuration matches is reported, not fatal.
///
/// # Errors
///
/// Document store failures, or `EngineStopped` if the engine went away.
pub async fn replay<G>(
    engine: &Degraphmalizer<G, MemoryDocumentStore>,
    fixture: &Fixture,
    status: &Arc<dyn DegraphmalizeStatus>,
) -> Result<Vec<ChangeReport>, CliError>
where
    G: GraphStore + ?Sized + 'static,
{
    let store = engine.documents();
    let mut reports = Vec::with_capacity(fixture.changes.len());

    for change in &fixture.changes {
        let id = apply_to_store(store, change)?;
        let mut report = ChangeReport {
            action: change.action,
            id: id.clone(),
            actions: 0,
            recomputes: BTreeMap::new(),
            errors: Vec::new(),
        };

        match engine.degraphmalize(change.action, id, Arc::clone(status)) {
            Ok(handle) => {
                for result in handle.wait_all().await? {
                    report.actions += 1;
                    if let Some(error) = result.error() {
                        report.errors.push(error.to_string());
                    }
                    for recompute in result.results() {
                        *report.recomputes.entry(status_name(recompute.status())).or_default() += 1;
                    }
                }
            }
            Err(error) => report.errors.push(error.to_string()),
        }

        tracing::info!(
            action = %report.action,
            id = %report.id,
            actions = report.actions,
            errors = report.errors.len(),
            "change replayed"
        );
        reports.push(report);
    }
    Ok(reports)
}

fn apply_to_store(store: &MemoryDocumentStore, change: &Change) -> Result<DocumentId, CliError> {
    let symbolic = DocumentId::symbolic_of(&*change.index, &*change.type_name, &*change.id);
    match change.action {
        ActionType::Update => {
            if let Some(source) = &change.source {
                let version = store.put(&change.index, &change.type_name, &change.id, source)?;
                return Ok(symbolic.with_version(version));
            }
            Ok(store
                .current_id(&change.index, &change.type_name, &change.id)
                .unwrap_or(symbolic))
        }
        ActionType::Delete => Ok(store
            .remove(&change.index, &change.type_name, &change.id)
            .map_or(symbolic.clone(), |removed| symbolic.with_version(removed.version))),
    }
}

fn status_name(status: RecomputeStatus) -> &'static str {
    match status {
        RecomputeStatus::Success => "success",
        RecomputeStatus::Expired => "expired",
        RecomputeStatus::Exception => "exception",
        RecomputeStatus::Filtered => "filtered",
        RecomputeStatus::SourceMissing => "source_missing",
    }
}

// =============================================================================
// OUTPUT AND VERIFICATION
// =============================================================================

/// Every document in the target index and type of a configured rule.
#[must_use]
pub fn target_documents<G>(engine: &Degraphmalizer<G, MemoryDocumentStore>) -> Vec<(DocumentId, Value)>
where
    G: GraphStore + ?Sized + 'static,
{
    let targets: BTreeSet<(&str, &str)> = engine
        .configuration()
        .types()
        .iter()
        .map(|config| (config.target_index(), config.target_type()))
        .collect();

    let indexes: BTreeSet<&str> = targets.iter().map(|(index, _)| *index).collect();
    indexes
        .into_iter()
        .flat_map(|index| engine.documents().documents_in(index))
        .filter(|(id, _)| targets.contains(&(id.index(), id.type_name())))
        .collect()
}

/// An expected document that did not match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub id: DocumentId,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

/// Check every expectation against the store.
///
/// # Errors
///
/// Propagates document store failures.
pub fn verify(store: &dyn DocumentStore, expected: &[Expectation]) -> Result<Vec<Mismatch>, CliError> {
    let mut mismatches = Vec::new();
    for expectation in expected {
        let actual = store
            .get(&expectation.index, &expectation.type_name, &expectation.id)?
            .map(|stored| stored.source);

        let matched = match (&expectation.source, &actual) {
            (None, None) => true,
            (Some(expected), Some(actual)) if expectation.exact => expected == actual,
            (Some(expected), Some(actual)) => contains(actual, expected),
            _ => false,
        };

        if !matched {
            let id = DocumentId::symbolic_of(
                &*expectation.index,
                &*expectation.type_name,
                &*expectation.id,
            );
            tracing::warn!(%id, "expected document did not match");
            mismatches.push(Mismatch {
                id,
                expected: expectation.source.clone(),
                actual,
            });
        }
    }
    Ok(mismatches)
}

/// Whether `actual` holds everything in `expected`: objects match per key,
/// recursively; anything else must be equal.
fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => expected.iter().all(|(key, value)| {
            actual.get(key).is_some_and(|present| contains(present, value))
        }),
        _ => actual == expected,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contains_is_a_recursive_subset() {
        let actual = json!({"a": 1, "b": {"c": [1, 2], "d": true}});
        assert!(contains(&actual, &json!({})));
        assert!(contains(&actual, &json!({"b": {"d": true}})));
        assert!(!contains(&actual, &json!({"b": {"c": [1]}})));
        assert!(!contains(&actual, &json!({"e": null})));
    }

    #[test]
    fn parse_defaults_and_actions() {
        let fixture = Fixture::parse(
            r#"{"changes": [
                {"action": "update", "index": "cms", "type": "page", "id": "a", "source": {}},
                {"action": "delete", "index": "cms", "type": "page", "id": "a"}
            ]}"#,
        )
        .expect("parse");

        assert!(fixture.documents.is_empty());
        assert_eq!(fixture.changes[0].action, ActionType::Update);
        assert_eq!(fixture.changes[1].action, ActionType::Delete);
        assert_eq!(fixture.changes[1].source, None);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let parsed = Fixture::parse(
            r#"{"changes": [{"action": "upsert", "index": "cms", "type": "page", "id": "a"}]}"#,
        );
        assert!(matches!(parsed, Err(CliError::Fixture(_))));
    }

    #[test]
    fn store_changes_carry_versions() {
        let store = MemoryDocumentStore::new();
        let update = |source: Option<Value>| Change {
            action: ActionType::Update,
            index: "cms".to_string(),
            type_name: "page".to_string(),
            id: "a".to_string(),
            source,
        };

        assert_eq!(apply_to_store(&store, &update(None)).expect("apply").version(), 0);
        assert_eq!(apply_to_store(&store, &update(Some(json!({})))).expect("apply").version(), 1);
        assert_eq!(apply_to_store(&store, &update(None)).expect("apply").version(), 1);

        let delete = Change {
            action: ActionType::Delete,
            ..update(None)
        };
        assert_eq!(apply_to_store(&store, &delete).expect("apply").version(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn verify_reports_missing_and_different() {
        let store = MemoryDocumentStore::new();
        store.put("site", "page", "a", &json!({"n": 1})).expect("put");
        let expect = |id: &str, source: Option<Value>, exact: bool| Expectation {
            index: "site".to_string(),
            type_name: "page".to_string(),
            id: id.to_string(),
            source,
            exact,
        };

        let mismatches = verify(
            &store,
            &[
                expect("a", Some(json!({"n": 1})), false),
                expect("a", Some(json!({})), true),
                expect("b", None, false),
                expect("b", Some(json!({})), false),
            ],
        )
        .expect("verify");

        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].actual, Some(json!({"n": 1})));
        assert_eq!(mismatches[1].actual, None);
    }
}
