//! # Subgraph
//!
//! The edges and properties a single document version contributes to the graph.
//!
//! Subgraphs are built incrementally with a `SubgraphBuilder` (one per
//! extraction step), frozen with `build()`, and merged into one `Subgraph`
//! per document before being committed by the `SubgraphManager`.
//!
//! ## Merge Rules
//!
//! - Edge lists are concatenated
//! - A duplicate edge (same other document, label and direction) is kept
//!   once and reported as a `MergeWarning`
//! - Duplicate property keys resolve last-write-wins and are reported

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::primitives::is_reserved_property;
use crate::types::{DgmError, DocumentId, DocumentKey, Direction, EdgeId};

// =============================================================================
// SUBGRAPH TYPES
// =============================================================================

/// One edge of a subgraph, expressed relative to the document's own vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgraphEdge {
    label: String,
    other: DocumentId,
    direction: Direction,
    properties: BTreeMap<String, Value>,
}

impl SubgraphEdge {
    #[must_use]
    pub fn new(label: impl Into<String>, other: DocumentId, direction: Direction) -> Self {
        Self {
            label: label.into(),
            other,
            direction,
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn other(&self) -> &DocumentId {
        &self.other
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    fn duplicate_key(&self) -> (DocumentKey, String, Direction) {
        (self.other.key(), self.label.clone(), self.direction)
    }
}

/// Frozen set of edges and properties contributed by one document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Subgraph {
    edges: Vec<SubgraphEdge>,
    properties: BTreeMap<String, Value>,
}

impl Subgraph {
    /// The empty subgraph: no edges, no properties.
    pub const EMPTY: Subgraph = Subgraph {
        edges: Vec::new(),
        properties: BTreeMap::new(),
    };

    #[must_use]
    pub fn edges(&self) -> &[SubgraphEdge] {
        &self.edges
    }

    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.properties.is_empty()
    }

    /// Check that no property name (vertex or edge) uses the reserved prefix.
    pub fn validate(&self) -> Result<(), DgmError> {
        let edge_names = self.edges.iter().flat_map(|e| e.properties.keys());
        for name in self.properties.keys().chain(edge_names) {
            if is_reserved_property(name) {
                return Err(DgmError::ReservedProperty(name.clone()));
            }
        }
        Ok(())
    }
}

// =============================================================================
// EDGE IDENTITY DERIVATION
// =============================================================================

/// Canonical edge identity for `edge` as seen from `center`.
///
/// `Inwards` edges point into the center (`other -> center`), `Outwards`
/// edges point out of it (`center -> other`).
#[must_use]
pub fn edge_id(center: &DocumentId, edge: &SubgraphEdge) -> EdgeId {
    match edge.direction {
        Direction::Inwards => EdgeId::new(edge.other.clone(), edge.label.clone(), center.clone()),
        Direction::Outwards => EdgeId::new(center.clone(), edge.label.clone(), edge.other.clone()),
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Mutable builder used by extraction functions.
#[derive(Debug, Clone, Default)]
pub struct SubgraphBuilder {
    edges: Vec<SubgraphEdge>,
    properties: BTreeMap<String, Value>,
}

impl SubgraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge without properties.
    pub fn edge(
        &mut self,
        label: impl Into<String>,
        other: DocumentId,
        direction: Direction,
    ) -> &mut Self {
        self.edges.push(SubgraphEdge::new(label, other, direction));
        self
    }

    /// Add an edge carrying its own property bag.
    pub fn edge_with_properties(
        &mut self,
        label: impl Into<String>,
        other: DocumentId,
        direction: Direction,
        properties: BTreeMap<String, Value>,
    ) -> &mut Self {
        let mut edge = SubgraphEdge::new(label, other, direction);
        edge.properties = properties;
        self.edges.push(edge);
        self
    }

    /// Set a vertex property, replacing an earlier value for the same key.
    pub fn property(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Freeze the builder into a `Subgraph`.
    ///
    /// # Errors
    ///
    /// Returns `DgmError::ReservedProperty` if any property name uses the
    /// reserved bookkeeping prefix.
    pub fn build(&self) -> Result<Subgraph, DgmError> {
        let subgraph = Subgraph {
            edges: self.edges.clone(),
            properties: self.properties.clone(),
        };
        subgraph.validate()?;
        Ok(subgraph)
    }
}

// =============================================================================
// MERGING
// =============================================================================

/// A conflict found while merging subgraphs. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeWarning {
    /// The same edge was contributed more than once; it is kept once.
    DuplicateEdge {
        label: String,
        other: DocumentId,
        direction: Direction,
    },
    /// The same property was set more than once; the last value wins.
    DuplicateProperty { name: String },
}

/// Merge several subgraphs of the same document into one.
///
/// Returns the merged subgraph and the conflicts encountered. Each conflict
/// is also logged as a warning.
pub fn merge(parts: impl IntoIterator<Item = Subgraph>) -> (Subgraph, Vec<MergeWarning>) {
    let mut merged = Subgraph::default();
    let mut warnings = Vec::new();
    let mut seen = BTreeSet::new();

    for part in parts {
        for edge in part.edges {
            if seen.insert(edge.duplicate_key()) {
                merged.edges.push(edge);
            } else {
                tracing::warn!(
                    label = %edge.label,
                    other = %edge.other,
                    direction = %edge.direction,
                    "duplicate edge in merged subgraph"
                );
                warnings.push(MergeWarning::DuplicateEdge {
                    label: edge.label,
                    other: edge.other,
                    direction: edge.direction,
                });
            }
        }

        for (name, value) in part.properties {
            if merged.properties.insert(name.clone(), value).is_some() {
                tracing::warn!(property = %name, "duplicate property in merged subgraph");
                warnings.push(MergeWarning::DuplicateProperty { name });
            }
        }
    }

    (merged, warnings)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, version: u64) -> DocumentId {
        DocumentId::new("idx", "page", id, version)
    }

    #[test]
    fn edge_id_orientation() {
        let center = doc("a", 2);
        let inwards = SubgraphEdge::new("parent", doc("b", 0), Direction::Inwards);
        let outwards = SubgraphEdge::new("parent", doc("b", 0), Direction::Outwards);

        let in_id = edge_id(&center, &inwards);
        assert_eq!(in_id.head(), &center);
        assert_eq!(in_id.tail(), &doc("b", 0));

        let out_id = edge_id(&center, &outwards);
        assert_eq!(out_id.tail(), &center);
        assert_eq!(out_id.head(), &doc("b", 0));
    }

    #[test]
    fn empty_constant_is_empty() {
        assert!(Subgraph::EMPTY.is_empty());
        assert_eq!(Subgraph::EMPTY, Subgraph::default());
    }

    #[test]
    fn builder_rejects_reserved_names() {
        let mut builder = SubgraphBuilder::new();
        builder.property("_owner", json!("x"));
        assert_eq!(
            builder.build(),
            Err(DgmError::ReservedProperty("_owner".to_string()))
        );

        let mut edge_props = BTreeMap::new();
        edge_props.insert("_symbolic".to_string(), json!(true));
        let mut builder = SubgraphBuilder::new();
        builder.edge_with_properties("ref", doc("b", 0), Direction::Outwards, edge_props);
        assert!(builder.build().is_err());
    }

    #[test]
    fn merge_disjoint_concatenates() {
        let mut first = SubgraphBuilder::new();
        first.edge("ref", doc("b", 0), Direction::Outwards);
        let mut second = SubgraphBuilder::new();
        second
            .edge("ref", doc("c", 0), Direction::Outwards)
            .edge("ref", doc("b", 0), Direction::Inwards);

        let (merged, warnings) = merge([
            first.build().expect("build"),
            second.build().expect("build"),
        ]);

        assert_eq!(merged.edges().len(), 3);
        assert!(warnings.is_empty());
    }

    #[test]
    fn merge_duplicate_edge_kept_once() {
        let mut first = SubgraphBuilder::new();
        first.edge("ref", doc("b", 0), Direction::Outwards);
        let mut second = SubgraphBuilder::new();
        second.edge("ref", doc("b", 3), Direction::Outwards);

        let (merged, warnings) = merge([
            first.build().expect("build"),
            second.build().expect("build"),
        ]);

        assert_eq!(merged.edges().len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], MergeWarning::DuplicateEdge { .. }));
    }

    #[test]
    fn merge_duplicate_property_last_wins() {
        let mut first = SubgraphBuilder::new();
        first.property("title", json!("old"));
        let mut second = SubgraphBuilder::new();
        second.property("title", json!("new"));

        let (merged, warnings) = merge([
            first.build().expect("build"),
            second.build().expect("build"),
        ]);

        assert_eq!(merged.properties().get("title"), Some(&json!("new")));
        assert_eq!(
            warnings,
            vec![MergeWarning::DuplicateProperty {
                name: "title".to_string()
            }]
        );
    }
}
