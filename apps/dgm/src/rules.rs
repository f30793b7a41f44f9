//! # Declarative Type Rules
//!
//! Type configurations described as data, so a settings file can drive the
//! engine without code. A rule names its source and target, an optional
//! equality filter, the fields its transform drops, the fields its edges are
//! extracted from, and walks whose properties use built-in reducers.
//!
//! ```toml
//! [[types]]
//! name = "pages"
//! source_index = "cms"
//! source_type = "page"
//! target_index = "site"
//! target_type = "page"
//! filter = { published = true }
//! drop_fields = ["draft_notes"]
//!
//! [[types.edges]]
//! field = "links"
//! label = "links-to"
//!
//! [[types.walks]]
//! name = "referrers"
//! direction = "inwards"
//! properties = [{ name = "referrers", reducer = "collect_ids" }]
//! ```

use dgm_core::reducer::{collect_field, collect_ids, count_documents, nested};
use dgm_core::{
    DgmError, Direction, Document, DocumentId, FnPropertyConfig, FnTypeConfig, FnWalkConfig,
    Subgraph, SubgraphBuilder,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// RULES
// =============================================================================

/// One declarative type configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRule {
    pub name: String,
    pub source_index: String,
    pub source_type: String,
    pub target_index: String,
    pub target_type: String,

    /// Fields the source must carry with exactly these values.
    #[serde(default)]
    pub filter: Map<String, Value>,

    /// Fields removed from the source by the transform.
    #[serde(default)]
    pub drop_fields: Vec<String>,

    #[serde(default)]
    pub edges: Vec<EdgeRule>,

    #[serde(default)]
    pub walks: Vec<WalkRule>,
}

/// Edges read from a document field holding an id or an array of ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRule {
    pub field: String,
    pub label: String,

    #[serde(default = "outwards")]
    pub direction: Direction,

    /// Index of the referenced documents; the source index when absent.
    #[serde(default)]
    pub index: Option<String>,

    /// Type of the referenced documents; the source type when absent.
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
}

fn outwards() -> Direction {
    Direction::Outwards
}

/// A named walk and the properties reduced from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkRule {
    pub name: String,
    pub direction: Direction,

    #[serde(default)]
    pub max_depth: Option<usize>,

    #[serde(default)]
    pub properties: Vec<PropertyRule>,
}

/// A named property and the reducer producing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRule {
    pub name: String,

    #[serde(flatten)]
    pub reducer: Reducer,
}

/// Built-in reductions over a resolved walk tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reducer", rename_all = "snake_case")]
pub enum Reducer {
    /// Number of related documents.
    Count,
    /// Ids of the related documents.
    CollectIds,
    /// One field of each related document that has it.
    CollectField { field: String },
    /// The walk as nested `{id, label, children}` objects.
    Tree,
}

// =============================================================================
// COMPILATION
// =============================================================================

impl TypeRule {
    /// Build the engine configuration described by this rule.
    #[must_use]
    pub fn to_config(&self) -> FnTypeConfig {
        let filter = self.filter.clone();
        let drop_fields = self.drop_fields.clone();
        let edges = self.edges.clone();

        let mut config = FnTypeConfig::new(
            self.name.as_str(),
            self.source_index.as_str(),
            self.source_type.as_str(),
            self.target_index.as_str(),
            self.target_type.as_str(),
        )
        .filter_with(move |document| matches_filter(&filter, &document.source))
        .transform_with(move |document| Ok(drop_from(&document.source, &drop_fields)))
        .extract_with(move |document| extract_edges(&edges, document));

        for walk in &self.walks {
            config = config.walk(walk.to_config());
        }
        config
    }
}

impl WalkRule {
    #[must_use]
    pub fn to_config(&self) -> FnWalkConfig {
        let mut config = FnWalkConfig::new(self.name.as_str(), self.direction);
        if let Some(depth) = self.max_depth {
            config = config.with_max_depth(depth);
        }
        for property in &self.properties {
            config = config.property(property.to_config());
        }
        config
    }
}

impl PropertyRule {
    #[must_use]
    pub fn to_config(&self) -> FnPropertyConfig {
        match self.reducer.clone() {
            Reducer::Count => FnPropertyConfig::new(self.name.as_str(), |tree| Ok(count_documents(tree))),
            Reducer::CollectIds => FnPropertyConfig::new(self.name.as_str(), |tree| Ok(collect_ids(tree))),
            Reducer::CollectField { field } => {
                FnPropertyConfig::new(self.name.as_str(), move |tree| Ok(collect_field(tree, &field)))
            }
            Reducer::Tree => FnPropertyConfig::new(self.name.as_str(), |tree| Ok(nested(tree))),
        }
    }
}

fn matches_filter(filter: &Map<String, Value>, source: &Value) -> bool {
    filter
        .iter()
        .all(|(field, expected)| source.get(field) == Some(expected))
}

fn drop_from(source: &Value, fields: &[String]) -> Value {
    let mut output = source.clone();
    if let Value::Object(object) = &mut output {
        object.retain(|field, _| !fields.contains(field));
    }
    output
}

fn extract_edges(rules: &[EdgeRule], document: &Document) -> Result<Subgraph, DgmError> {
    let mut builder = SubgraphBuilder::new();
    for rule in rules {
        let index = rule.index.as_deref().unwrap_or(document.id.index());
        let type_name = rule.type_name.as_deref().unwrap_or(document.id.type_name());
        for target in referenced_ids(document.source.get(&rule.field)) {
            builder.edge(
                rule.label.as_str(),
                DocumentId::symbolic_of(index, type_name, target),
                rule.direction,
            );
        }
    }
    builder.build()
}

/// Ids held by a field: a string or number, or an array of them.
fn referenced_ids(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_id).collect(),
        Some(other) => scalar_id(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use dgm_core::TypeConfig;
    use serde_json::json;

    fn rule() -> TypeRule {
        serde_json::from_value(json!({
            "name": "pages",
            "source_index": "cms",
            "source_type": "page",
            "target_index": "site",
            "target_type": "page",
            "filter": {"published": true},
            "drop_fields": ["notes"],
            "edges": [
                {"field": "links", "label": "links-to"},
                {"field": "author", "label": "written-by", "direction": "inwards", "index": "people", "type": "person"}
            ],
            "walks": [{
                "name": "referrers",
                "direction": "inwards",
                "max_depth": 2,
                "properties": [
                    {"name": "count", "reducer": "count"},
                    {"name": "titles", "reducer": "collect_field", "field": "title"}
                ]
            }]
        }))
        .expect("rule")
    }

    fn page(source: Value) -> Document {
        Document::new(DocumentId::new("cms", "page", "a", 1), source)
    }

    #[test]
    fn filter_requires_equal_fields() {
        let config = rule().to_config();
        assert!(config.filter(&page(json!({"published": true}))));
        assert!(!config.filter(&page(json!({"published": false}))));
        assert!(!config.filter(&page(json!({}))));
    }

    #[test]
    fn transform_drops_fields() {
        let config = rule().to_config();
        let output = config
            .transform(&page(json!({"title": "A", "notes": "x"})))
            .expect("transform");
        assert_eq!(output, json!({"title": "A"}));
    }

    #[test]
    fn edges_come_from_strings_and_arrays() {
        let config = rule().to_config();
        let subgraph = config
            .extract(&page(json!({"links": ["b", "c", 7, null], "author": "ann"})))
            .expect("extract");

        let targets: Vec<String> = subgraph.edges().iter().map(|e| e.other().to_string()).collect();
        assert_eq!(
            targets,
            vec![
                "(cms,page,b,0)",
                "(cms,page,c,0)",
                "(cms,page,7,0)",
                "(people,person,ann,0)",
            ]
        );
        assert_eq!(subgraph.edges()[3].direction(), Direction::Inwards);
    }

    #[test]
    fn missing_field_extracts_nothing() {
        let config = rule().to_config();
        let subgraph = config.extract(&page(json!({"title": "A"}))).expect("extract");
        assert!(subgraph.edges().is_empty());
    }

    #[test]
    fn walks_carry_depth_and_properties() {
        let config = rule().to_config();
        let walk = config.walks().get("referrers").expect("walk");
        assert_eq!(walk.direction(), Direction::Inwards);
        assert_eq!(walk.max_depth(), Some(2));
        assert_eq!(
            walk.properties().keys().collect::<Vec<_>>(),
            vec!["count", "titles"]
        );
    }

    #[test]
    fn unknown_reducer_is_rejected() {
        let parsed: Result<PropertyRule, _> =
            serde_json::from_value(json!({"name": "x", "reducer": "median"}));
        assert!(parsed.is_err());
    }
}
