//! # Property Reducer
//!
//! Runs the property reductions of a walk over its resolved tree and merges
//! the results into the output document.
//!
//! The reductions themselves belong to the configuration; this module only
//! applies them and enforces that the output is a JSON object. A handful of
//! common reductions over the descendants of the root are provided for
//! configurations to reuse.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::configuration::WalkConfig;
use crate::resolver::ResolvedPathElement;
use crate::tree::Tree;
use crate::types::DgmError;

/// Apply every property of `walk` to `tree`, keyed by property name.
pub fn reduce_walk(
    walk: &dyn WalkConfig,
    tree: &Tree<ResolvedPathElement>,
) -> Result<BTreeMap<String, Value>, DgmError> {
    let mut values = BTreeMap::new();
    for (name, property) in walk.properties() {
        let value = property.reduce(tree)?;
        tracing::trace!(walk = walk.name(), property = %name, "reduced property");
        values.insert(name.clone(), value);
    }
    Ok(values)
}

/// Name of the JSON kind of `value`, for error messages.
#[must_use]
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Insert `properties` into `document` under their names.
///
/// # Errors
///
/// Returns `DgmError::NotAnObject` if `document` is not a JSON object.
pub fn merge_properties(
    document: Value,
    properties: BTreeMap<String, Value>,
) -> Result<Value, DgmError> {
    match document {
        Value::Object(mut object) => {
            object.extend(properties);
            Ok(Value::Object(object))
        }
        other => Err(DgmError::NotAnObject(json_kind(&other).to_string())),
    }
}

// =============================================================================
// COMMON REDUCTIONS
// =============================================================================

/// Descendants of the root that resolved to a document, breadth-first.
pub fn documented_descendants(
    tree: &Tree<ResolvedPathElement>,
) -> impl Iterator<Item = &ResolvedPathElement> {
    tree.bfs().skip(1).filter(|e| e.document.is_some())
}

/// Number of descendants with a document.
#[must_use]
pub fn count_documents(tree: &Tree<ResolvedPathElement>) -> Value {
    Value::from(documented_descendants(tree).count())
}

/// Ids of the descendants with a document.
#[must_use]
pub fn collect_ids(tree: &Tree<ResolvedPathElement>) -> Value {
    documented_descendants(tree)
        .filter_map(|e| e.document.as_ref())
        .map(|d| Value::String(d.id.id().to_string()))
        .collect()
}

/// Values of `field` in the descendants' documents, where present.
#[must_use]
pub fn collect_field(tree: &Tree<ResolvedPathElement>, field: &str) -> Value {
    documented_descendants(tree)
        .filter_map(|e| e.document.as_ref())
        .filter_map(|d| d.source.get(field).cloned())
        .collect()
}

/// Nested object view of the tree: each node's id, label and children.
#[must_use]
pub fn nested(tree: &Tree<ResolvedPathElement>) -> Value {
    let element = tree.value();
    let mut object = Map::new();
    if let Some(id) = element.id() {
        object.insert("id".to_string(), Value::String(id.id().to_string()));
    }
    if let Some(label) = element.label() {
        object.insert("label".to_string(), Value::String(label.to_string()));
    }
    object.insert(
        "children".to_string(),
        tree.children().iter().map(nested).collect(),
    );
    Value::Object(object)
}

// =============================================================================
// TESTS
// =============================================================================
