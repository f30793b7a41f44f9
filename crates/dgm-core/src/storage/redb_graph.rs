//! # Redb Graph Storage
//!
//! Disk-backed `GraphStore` using redb for ACID persistence.
//!
//! The full graph image is kept in memory (a `Graph`) so walks never touch
//! the disk. Every change is journaled by the in-memory image; on commit the
//! vertex and edge records touched by the transaction are written in a
//! single redb write transaction. If that write fails the in-memory image is
//! rolled back, so memory and disk never diverge.
//!
//! Mutations issued outside `begin`/`commit` are committed one by one.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::graph::{EdgeRecord, Graph, GraphStore, VertexRecord};
use crate::types::{
    DgmError, Direction, DocumentId, DocumentKey, EdgeId, EdgeKey, EdgeRef, VertexRef,
};

/// Table for vertices: VertexRef(u64) -> serialized StoredVertex bytes
const VERTICES: TableDefinition<u64, &[u8]> = TableDefinition::new("vertices");

/// Table for edges: EdgeRef(u64) -> serialized StoredEdge bytes
const EDGES: TableDefinition<u64, &[u8]> = TableDefinition::new("edges");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_VERTEX_ID: &str = "next_vertex_id";
const NEXT_EDGE_ID: &str = "next_edge_id";

/// On-disk vertex. Property values are stored as JSON text because postcard
/// is not self-describing.
#[derive(Debug, Serialize, Deserialize)]
struct StoredVertex {
    id: Option<DocumentId>,
    properties: Vec<(String, String)>,
}

/// On-disk edge.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEdge {
    key: EdgeKey,
    tail: u64,
    head: u64,
    owner: Option<DocumentKey>,
    properties: Vec<(String, String)>,
}

fn store_err(e: impl std::fmt::Display) -> DgmError {
    DgmError::Store(e.to_string())
}

fn encode_properties(properties: &BTreeMap<String, Value>) -> Result<Vec<(String, String)>, DgmError> {
    properties
        .iter()
        .map(|(k, v)| {
            serde_json::to_string(v)
                .map(|text| (k.clone(), text))
                .map_err(|e| DgmError::Serialization(e.to_string()))
        })
        .collect()
}

fn decode_properties(properties: Vec<(String, String)>) -> Result<BTreeMap<String, Value>, DgmError> {
    properties
        .into_iter()
        .map(|(k, text)| {
            serde_json::from_str(&text)
                .map(|v| (k, v))
                .map_err(|e| DgmError::Serialization(e.to_string()))
        })
        .collect()
}

/// A disk-backed graph store using redb.
pub struct RedbGraph {
    /// The redb database handle.
    db: Database,
    /// In-memory image of the stored graph.
    graph: Graph,
}

impl std::fmt::Debug for RedbGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbGraph")
            .field("next_ids", &self.graph.next_ids())
            .field("in_transaction", &self.graph.in_transaction())
            .finish_non_exhaustive()
    }
}

impl RedbGraph {
    /// Open or create a graph database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DgmError> {
        let db = Database::create(path.as_ref()).map_err(store_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(store_err)?;
            let _ = write_txn.open_table(VERTICES).map_err(store_err)?;
            let _ = write_txn.open_table(EDGES).map_err(store_err)?;
            let _ = write_txn.open_table(METADATA).map_err(store_err)?;
            write_txn.commit().map_err(store_err)?;
        }

        let read_txn = db.begin_read().map_err(store_err)?;

        let next_ids = {
            let table = read_txn.open_table(METADATA).map_err(store_err)?;
            let vertex = table
                .get(NEXT_VERTEX_ID)
                .map_err(store_err)?
                .map(|v| v.value())
                .unwrap_or(0);
            let edge = table
                .get(NEXT_EDGE_ID)
                .map_err(store_err)?
                .map(|v| v.value())
                .unwrap_or(0);
            (vertex, edge)
        };

        let mut vertices = Vec::new();
        {
            let table = read_txn.open_table(VERTICES).map_err(store_err)?;
            for entry in table.iter().map_err(store_err)? {
                let (key, value) = entry.map_err(store_err)?;
                let stored: StoredVertex = postcard::from_bytes(value.value())
                    .map_err(|e| DgmError::Serialization(e.to_string()))?;
                vertices.push((
                    VertexRef(key.value()),
                    VertexRecord {
                        id: stored.id,
                        properties: decode_properties(stored.properties)?,
                    },
                ));
            }
        }

        let mut edges = Vec::new();
        {
            let table = read_txn.open_table(EDGES).map_err(store_err)?;
            for entry in table.iter().map_err(store_err)? {
                let (key, value) = entry.map_err(store_err)?;
                let stored: StoredEdge = postcard::from_bytes(value.value())
                    .map_err(|e| DgmError::Serialization(e.to_string()))?;
                edges.push((
                    EdgeRef(key.value()),
                    EdgeRecord {
                        key: stored.key,
                        tail: VertexRef(stored.tail),
                        head: VertexRef(stored.head),
                        owner: stored.owner,
                        properties: decode_properties(stored.properties)?,
                    },
                ));
            }
        }

        let vertex_count = vertices.len();
        let edge_count = edges.len();
        let graph = Graph::from_records(vertices, edges, next_ids);
        tracing::debug!(
            vertices = vertex_count,
            edges = edge_count,
            "opened redb graph"
        );

        Ok(Self { db, graph })
    }

    /// Write every record touched by the open transaction in one redb transaction.
    fn persist(&self) -> Result<(), DgmError> {
        let touched = self.graph.touched();
        let (next_vertex, next_edge) = self.graph.next_ids();

        let write_txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut vertex_table = write_txn.open_table(VERTICES).map_err(store_err)?;
            for vertex in &touched.vertices {
                match self.graph.vertex_record(*vertex) {
                    Some(record) => {
                        let stored = StoredVertex {
                            id: record.id.clone(),
                            properties: encode_properties(&record.properties)?,
                        };
                        let bytes = postcard::to_allocvec(&stored)
                            .map_err(|e| DgmError::Serialization(e.to_string()))?;
                        vertex_table
                            .insert(vertex.0, bytes.as_slice())
                            .map_err(store_err)?;
                    }
                    None => {
                        vertex_table.remove(vertex.0).map_err(store_err)?;
                    }
                }
            }

            let mut edge_table = write_txn.open_table(EDGES).map_err(store_err)?;
            for edge in &touched.edges {
                match self.graph.edge_record(*edge) {
                    Some(record) => {
                        let stored = StoredEdge {
                            key: record.key.clone(),
                            tail: record.tail.0,
                            head: record.head.0,
                            owner: record.owner.clone(),
                            properties: encode_properties(&record.properties)?,
                        };
                        let bytes = postcard::to_allocvec(&stored)
                            .map_err(|e| DgmError::Serialization(e.to_string()))?;
                        edge_table
                            .insert(edge.0, bytes.as_slice())
                            .map_err(store_err)?;
                    }
                    None => {
                        edge_table.remove(edge.0).map_err(store_err)?;
                    }
                }
            }

            let mut meta_table = write_txn.open_table(METADATA).map_err(store_err)?;
            meta_table
                .insert(NEXT_VERTEX_ID, next_vertex)
                .map_err(store_err)?;
            meta_table
                .insert(NEXT_EDGE_ID, next_edge)
                .map_err(store_err)?;
        }
        write_txn.commit().map_err(store_err)?;

        tracing::trace!(
            vertices = touched.vertices.len(),
            edges = touched.edges.len(),
            "persisted graph transaction"
        );
        Ok(())
    }

    /// Apply one mutation, committing it on its own unless a transaction is open.
    fn write<T>(
        &mut self,
        op: impl FnOnce(&mut Graph) -> Result<T, DgmError>,
    ) -> Result<T, DgmError> {
        if self.graph.in_transaction() {
            return op(&mut self.graph);
        }
        self.graph.begin()?;
        let outcome = op(&mut self.graph);
        match outcome.and_then(|value| self.persist().map(|()| value)) {
            Ok(value) => {
                self.graph.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.graph.rollback()?;
                Err(e)
            }
        }
    }
}

impl GraphStore for RedbGraph {
    fn find_vertex(&self, id: &DocumentId) -> Result<Option<VertexRef>, DgmError> {
        self.graph.find_vertex(id)
    }

    fn create_vertex(&mut self, id: &DocumentId) -> Result<VertexRef, DgmError> {
        self.write(|g| g.create_vertex(id))
    }

    fn find_or_create_symbolic_vertex(&mut self, id: &DocumentId) -> Result<VertexRef, DgmError> {
        self.write(|g| g.find_or_create_symbolic_vertex(id))
    }

    fn vertex_id(&self, vertex: VertexRef) -> Result<Option<DocumentId>, DgmError> {
        self.graph.vertex_id(vertex)
    }

    fn set_vertex_id(&mut self, vertex: VertexRef, id: &DocumentId) -> Result<(), DgmError> {
        self.write(|g| g.set_vertex_id(vertex, id))
    }

    fn vertex_properties(&self, vertex: VertexRef) -> Result<BTreeMap<String, Value>, DgmError> {
        self.graph.vertex_properties(vertex)
    }

    fn set_properties(
        &mut self,
        vertex: VertexRef,
        properties: BTreeMap<String, Value>,
    ) -> Result<(), DgmError> {
        self.write(|g| g.set_properties(vertex, properties))
    }

    fn edges_of(
        &self,
        vertex: VertexRef,
        direction: Direction,
    ) -> Result<Vec<(EdgeRef, VertexRef)>, DgmError> {
        self.graph.edges_of(vertex, direction)
    }

    fn find_edge(&self, edge: &EdgeId) -> Result<Option<EdgeRef>, DgmError> {
        self.graph.find_edge(edge)
    }

    fn create_edge(&mut self, edge: &EdgeId, owner: &DocumentId) -> Result<EdgeRef, DgmError> {
        self.write(|g| g.create_edge(edge, owner))
    }

    fn edge_id(&self, edge: EdgeRef) -> Result<Option<EdgeId>, DgmError> {
        self.graph.edge_id(edge)
    }

    fn edge_owner(&self, edge: EdgeRef) -> Result<Option<DocumentKey>, DgmError> {
        self.graph.edge_owner(edge)
    }

    fn edge_properties(&self, edge: EdgeRef) -> Result<BTreeMap<String, Value>, DgmError> {
        self.graph.edge_properties(edge)
    }

    fn set_edge_properties(
        &mut self,
        edge: EdgeRef,
        properties: BTreeMap<String, Value>,
    ) -> Result<(), DgmError> {
        self.write(|g| g.set_edge_properties(edge, properties))
    }

    fn remove_edge(&mut self, edge: EdgeRef) -> Result<(), DgmError> {
        self.write(|g| g.remove_edge(edge))
    }

    fn remove_vertex(&mut self, vertex: VertexRef) -> Result<(), DgmError> {
        self.write(|g| g.remove_vertex(vertex))
    }

    fn vertex_count(&self) -> Result<usize, DgmError> {
        self.graph.vertex_count()
    }

    fn edge_count(&self) -> Result<usize, DgmError> {
        self.graph.edge_count()
    }

    fn begin(&mut self) -> Result<(), DgmError> {
        self.graph.begin()
    }

    fn commit(&mut self) -> Result<(), DgmError> {
        if let Err(e) = self.persist() {
            self.graph.rollback()?;
            return Err(e);
        }
        self.graph.commit()
    }

    fn rollback(&mut self) -> Result<(), DgmError> {
        self.graph.rollback()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn doc(id: &str, version: u64) -> DocumentId {
        DocumentId::new("idx", "page", id, version)
    }

    #[test]
    fn basic_operations() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        let mut graph = RedbGraph::open(&db_path).expect("open db");

        let a = graph.create_vertex(&doc("a", 1)).expect("create");
        let b = graph
            .find_or_create_symbolic_vertex(&doc("b", 2))
            .expect("symbolic");
        assert_ne!(a, b);
        assert_eq!(graph.vertex_count().expect("count"), 2);

        graph
            .create_edge(&EdgeId::new(doc("a", 1), "ref", doc("b", 0)), &doc("a", 1))
            .expect("edge");
        assert_eq!(graph.edge_count().expect("count"), 1);
        assert_eq!(graph.edges_of(a, Direction::Outwards).expect("out").len(), 1);
    }

    #[test]
    fn persistence() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        {
            let mut graph = RedbGraph::open(&db_path).expect("open db");
            graph.begin().expect("begin");
            let a = graph.create_vertex(&doc("a", 3)).expect("create");
            graph.create_vertex(&doc("b", 1)).expect("create");
            let mut props = BTreeMap::new();
            props.insert("title".to_string(), json!({"nested": [1, 2]}));
            graph.set_properties(a, props).expect("props");
            let edge = graph
                .create_edge(&EdgeId::new(doc("a", 3), "ref", doc("b", 1)), &doc("a", 3))
                .expect("edge");
            let mut edge_props = BTreeMap::new();
            edge_props.insert("weight".to_string(), json!(2));
            graph.set_edge_properties(edge, edge_props).expect("edge props");
            graph.commit().expect("commit");
        }

        let graph = RedbGraph::open(&db_path).expect("reopen db");
        let a = graph
            .find_vertex(&doc("a", 0))
            .expect("find")
            .expect("vertex exists");
        assert_eq!(graph.vertex_id(a).expect("id"), Some(doc("a", 3)));
        assert_eq!(
            graph.vertex_properties(a).expect("props").get("title"),
            Some(&json!({"nested": [1, 2]}))
        );
        let edges = graph.edges_of(a, Direction::Outwards).expect("edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(
            graph.edge_properties(edges[0].0).expect("props").get("weight"),
            Some(&json!(2))
        );
        assert_eq!(
            graph.edge_owner(edges[0].0).expect("owner"),
            Some(doc("a", 3).key())
        );
    }

    #[test]
    fn rolled_back_changes_are_not_persisted() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        {
            let mut graph = RedbGraph::open(&db_path).expect("open db");
            graph.create_vertex(&doc("a", 1)).expect("create");
            graph.begin().expect("begin");
            graph.create_vertex(&doc("b", 1)).expect("create");
            graph.rollback().expect("rollback");
        }

        let graph = RedbGraph::open(&db_path).expect("reopen db");
        assert_eq!(graph.vertex_count().expect("count"), 1);
        assert_eq!(graph.find_vertex(&doc("b", 1)).expect("find"), None);
    }

    #[test]
    fn removals_are_persisted() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        {
            let mut graph = RedbGraph::open(&db_path).expect("open db");
            let a = graph.create_vertex(&doc("a", 1)).expect("create");
            graph.create_vertex(&doc("b", 1)).expect("create");
            graph
                .create_edge(&EdgeId::new(doc("a", 1), "ref", doc("b", 1)), &doc("a", 1))
                .expect("edge");
            graph.remove_vertex(a).expect("remove");
        }

        let mut graph = RedbGraph::open(&db_path).expect("reopen db");
        assert_eq!(graph.vertex_count().expect("count"), 1);
        assert_eq!(graph.edge_count().expect("count"), 0);

        // Handles keep increasing across reopen
        let c = graph.create_vertex(&doc("c", 1)).expect("create");
        assert_eq!(c, VertexRef(2));
    }
}
