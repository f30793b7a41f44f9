//! # dgm-core
//!
//! The graph synchronization and recompute engine.
//!
//! When a document changes, the engine extracts the relationships of the
//! new version into a graph, works out which other documents depend on the
//! change, and recomputes the denormalized output of each of them by walking
//! the graph, fetching the current version of every related document and
//! reducing the walk into derived JSON properties.
//!
//! ## Architectural Constraints
//!
//! - All graph mutation runs on one serialized worker
//! - Recomputes run concurrently, off the mutation worker
//! - Stale reads are detected as expiry and repaired by resubmission
//! - The graph store, document store and type configuration are traits;
//!   the engine never depends on how they are implemented

// =============================================================================
// MODULES
// =============================================================================

pub mod configuration;
pub mod degraphmalizer;
pub mod documents;
pub mod graph;
pub mod manager;
pub mod primitives;
pub mod recompute;
pub mod reducer;
pub mod resolver;
pub mod status;
pub mod storage;
pub mod subgraph;
pub mod tree;
pub mod types;
pub mod walker;

// =============================================================================
// RE-EXPORTS: Identity and Errors
// =============================================================================

pub use types::{
    DgmError, Direction, DocumentId, DocumentKey, EdgeId, EdgeKey, EdgeRef, VertexRef,
};

// =============================================================================
// RE-EXPORTS: Graph
// =============================================================================

pub use graph::{EdgeRecord, Graph, GraphStore, VertexRecord};
pub use manager::{CommitSummary, DeleteOutcome, SubgraphManager};
pub use storage::RedbGraph;
pub use subgraph::{MergeWarning, Subgraph, SubgraphBuilder, SubgraphEdge, edge_id, merge};
pub use tree::Tree;
pub use walker::{
    AllOf, DepthLimit, ExpansionPolicy, PathCycleGuard, PathElement, reachable_documents, walk,
    walk_bounded,
};

// =============================================================================
// RE-EXPORTS: Documents and Configuration
// =============================================================================

pub use configuration::{
    Configuration, EngineSettings, FnPropertyConfig, FnTypeConfig, FnWalkConfig, PropertyConfig,
    TypeConfig, WalkConfig,
};
pub use documents::{Document, DocumentStore, MemoryDocumentStore, StoredDocument};
pub use resolver::{DocumentResolver, ResolvedPathElement, TreeResolution};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use degraphmalizer::{
    ActionType, AtomicSequence, DegraphmalizeAction, DegraphmalizeHandle, DegraphmalizeOutcome,
    DegraphmalizeResult, Degraphmalizer, SequenceSource,
};
pub use recompute::{
    RecomputeAction, RecomputeOutcome, RecomputeResult, RecomputeStatus, RecomputeSuccess,
    Recomputer,
};
pub use status::{DegraphmalizeStatus, LoggingStatus, NoopStatus};
