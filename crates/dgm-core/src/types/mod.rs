//! # Core Types
//!
//! This module contains the identity model shared by every part of the engine:
//! - Versioned document identity (`DocumentId`) and its logical key
//! - Edge identity (`EdgeId`) with canonical tail/head orientation
//! - Walk direction (`Direction`)
//! - Opaque graph handles (`VertexRef`, `EdgeRef`)
//! - Error types (`DgmError`)
//!
//! ## Identity Guarantees
//!
//! All identifiers in this module:
//! - Are immutable values; derivation helpers return new values
//! - Compare and hash structurally over every field
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::primitives::SYMBOLIC_VERSION;

// =============================================================================
// DOCUMENT IDENTITY
// =============================================================================

/// Versioned identity of a document: `(index, type, id, version)`.
///
/// Version `0` is reserved for *symbolic* identities: the document is known to
/// exist (something references it) but no concrete version has been observed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId {
    index: String,
    #[serde(rename = "type")]
    type_name: String,
    id: String,
    version: u64,
}

impl DocumentId {
    /// Create a new document identity.
    #[must_use]
    pub fn new(
        index: impl Into<String>,
        type_name: impl Into<String>,
        id: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            index: index.into(),
            type_name: type_name.into(),
            id: id.into(),
            version,
        }
    }

    /// Create a symbolic identity (version 0).
    #[must_use]
    pub fn symbolic_of(
        index: impl Into<String>,
        type_name: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self::new(index, type_name, id, SYMBOLIC_VERSION)
    }

    #[must_use]
    pub fn index(&self) -> &str {
        &self.index
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// True when no concrete version of this document has been observed.
    #[must_use]
    pub fn is_symbolic(&self) -> bool {
        self.version == SYMBOLIC_VERSION
    }

    #[must_use]
    pub fn with_index(&self, index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_type(&self, type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_version(&self, version: u64) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }

    /// The same document with its version reset to symbolic.
    #[must_use]
    pub fn symbolic(&self) -> Self {
        self.with_version(SYMBOLIC_VERSION)
    }

    /// The version-independent key under which the graph indexes this document.
    #[must_use]
    pub fn key(&self) -> DocumentKey {
        DocumentKey {
            index: self.index.clone(),
            type_name: self.type_name.clone(),
            id: self.id.clone(),
        }
    }

    /// True when both identities name the same logical document.
    #[must_use]
    pub fn same_document(&self, other: &Self) -> bool {
        self.index == other.index && self.type_name == other.type_name && self.id == other.id
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},{},{})",
            self.index, self.type_name, self.id, self.version
        )
    }
}

/// Logical document key `(index, type, id)`: a `DocumentId` without version.
///
/// A graph vertex represents a logical document, so vertices are indexed by
/// this key rather than by the full versioned identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub index: String,
    pub type_name: String,
    pub id: String,
}

impl DocumentKey {
    /// Attach a version to this key.
    #[must_use]
    pub fn at_version(&self, version: u64) -> DocumentId {
        DocumentId::new(
            self.index.clone(),
            self.type_name.clone(),
            self.id.clone(),
            version,
        )
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.index, self.type_name, self.id)
    }
}

// =============================================================================
// EDGE IDENTITY
// =============================================================================

/// Identity of a directed edge `tail -- label --> head`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId {
    tail: DocumentId,
    label: String,
    head: DocumentId,
}

impl EdgeId {
    #[must_use]
    pub fn new(tail: DocumentId, label: impl Into<String>, head: DocumentId) -> Self {
        Self {
            tail,
            label: label.into(),
            head,
        }
    }

    #[must_use]
    pub fn tail(&self) -> &DocumentId {
        &self.tail
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn head(&self) -> &DocumentId {
        &self.head
    }

    /// The endpoint opposite to `center`, seen from `direction`.
    ///
    /// For `Outwards` the edge leaves the center, so the other end is the head.
    #[must_use]
    pub fn other_end(&self, direction: Direction) -> &DocumentId {
        match direction {
            Direction::Outwards => &self.head,
            Direction::Inwards => &self.tail,
        }
    }

    /// The version-independent key under which the graph indexes this edge.
    #[must_use]
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            tail: self.tail.key(),
            label: self.label.clone(),
            head: self.head.key(),
        }
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -- {} --> {}", self.tail, self.label, self.head)
    }
}

/// Logical edge key: tail and head document keys plus the label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub tail: DocumentKey,
    pub label: String,
    pub head: DocumentKey,
}

// =============================================================================
// DIRECTION
// =============================================================================

/// Direction of an edge relative to a center vertex, and direction of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The edge points into the center: `other -> center`.
    Inwards,
    /// The edge points out of the center: `center -> other`.
    Outwards,
}

impl Direction {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Inwards => Self::Outwards,
            Self::Outwards => Self::Inwards,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inwards => f.write_str("INWARDS"),
            Self::Outwards => f.write_str("OUTWARDS"),
        }
    }
}

// =============================================================================
// GRAPH HANDLES
// =============================================================================

/// Opaque handle to a vertex inside a `GraphStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VertexRef(pub u64);

/// Opaque handle to an edge inside a `GraphStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeRef(pub u64);

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the degraphmalizer engine.
///
/// - No silent failures
/// - Use `Result<T, DgmError>` for fallible operations
/// - Errors cross the orchestrator boundary only as reported results
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DgmError {
    /// The graph store or document store failed, or a transaction could not commit.
    #[error("Store error: {0}")]
    Store(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No type configuration matches the document.
    #[error("No configuration for {index}/{type_name}")]
    ConfigurationMismatch { index: String, type_name: String },

    /// The graph recorded versions that no longer match the document store.
    #[error("Expired: {} stale document(s)", .0.len())]
    Expired(Vec<DocumentId>),

    /// The type configuration filter excluded the document.
    #[error("Document filtered: {0}")]
    Filtered(DocumentId),

    /// The source document is absent from the document store.
    #[error("Source document missing: {0}")]
    SourceMissing(DocumentId),

    /// Named properties cannot be merged into a non-object JSON value.
    #[error("Cannot merge properties into a JSON {0}")]
    NotAnObject(String),

    /// The property name uses the prefix reserved for engine bookkeeping.
    #[error("Reserved property name: {0}")]
    ReservedProperty(String),

    /// The subgraph cannot be committed as given.
    #[error("Invalid subgraph: {0}")]
    InvalidSubgraph(String),

    /// The type configuration set is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The document has no vertex in the graph.
    #[error("Not found in graph: {0}")]
    NotFoundInGraph(DocumentId),

    /// The graph-mutation worker is no longer running.
    #[error("Engine stopped")]
    EngineStopped,

    /// Any unanticipated failure.
    #[error("Unknown failure: {0}")]
    Unknown(String),
}

// =============================================================================
// TESTS
// =============================================================================
