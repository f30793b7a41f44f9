//! # Persistent Storage
//!
//! Durable `GraphStore` backends.

mod redb_graph;

pub use redb_graph::RedbGraph;
