//! # Document Store
//!
//! The versioned document store the engine reads sources from and writes
//! targets to, plus `MemoryDocumentStore`, an in-process implementation.
//!
//! The store must tolerate unbounded concurrent reads and writes keyed by
//! document id; the engine does no locking around it.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::{DgmError, DocumentId, DocumentKey};

/// A document as stored: its current version and JSON source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub version: u64,
    pub source: Value,
}

/// A document together with the identity it was read under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub source: Value,
}

impl Document {
    #[must_use]
    pub fn new(id: DocumentId, source: Value) -> Self {
        Self { id, source }
    }
}

/// Versioned get/put access to documents.
pub trait DocumentStore: Send + Sync {
    /// Fetch the current version of a document.
    fn get(&self, index: &str, type_name: &str, id: &str) -> Result<Option<StoredDocument>, DgmError>;

    /// Write a document, returning the version written.
    fn put(&self, index: &str, type_name: &str, id: &str, source: &Value) -> Result<u64, DgmError>;

    /// Fetch the current version of the document named by `id`, whatever version `id` carries.
    fn fetch(&self, id: &DocumentId) -> Result<Option<Document>, DgmError> {
        Ok(self
            .get(id.index(), id.type_name(), id.id())?
            .map(|stored| Document::new(id.with_version(stored.version), stored.source)))
    }
}

/// One key's slot: the last version handed out and the document, if present.
#[derive(Debug, Default)]
struct Slot {
    version: u64,
    source: Option<Value>,
}

impl Slot {
    fn stored(&self) -> Option<StoredDocument> {
        self.source.as_ref().map(|source| StoredDocument {
            version: self.version,
            source: source.clone(),
        })
    }
}

/// In-memory document store.
///
/// Versions start at 1 and increase by one on every write of the same id,
/// including after removal. The version and the document are updated under
/// one lock, so the stored version never goes backwards.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    slots: RwLock<BTreeMap<DocumentKey, Slot>>,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a document, returning what was stored.
    pub fn remove(&self, index: &str, type_name: &str, id: &str) -> Option<StoredDocument> {
        let key = DocumentId::symbolic_of(index, type_name, id).key();
        let mut slots = self.slots.write();
        let slot = slots.get_mut(&key)?;
        let source = slot.source.take()?;
        Some(StoredDocument {
            version: slot.version,
            source,
        })
    }

    /// Current identity of a stored document, with its version.
    #[must_use]
    pub fn current_id(&self, index: &str, type_name: &str, id: &str) -> Option<DocumentId> {
        let key = DocumentId::symbolic_of(index, type_name, id).key();
        self.slots
            .read()
            .get(&key)
            .filter(|slot| slot.source.is_some())
            .map(|slot| key.at_version(slot.version))
    }

    /// All documents of an index, in key order.
    #[must_use]
    pub fn documents_in(&self, index: &str) -> Vec<(DocumentId, Value)> {
        self.slots
            .read()
            .iter()
            .filter(|(key, _)| key.index == index)
            .filter_map(|(key, slot)| {
                slot.source
                    .as_ref()
                    .map(|source| (key.at_version(slot.version), source.clone()))
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.source.is_some())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, index: &str, type_name: &str, id: &str) -> Result<Option<StoredDocument>, DgmError> {
        let key = DocumentId::symbolic_of(index, type_name, id).key();
        Ok(self.slots.read().get(&key).and_then(Slot::stored))
    }

    fn put(&self, index: &str, type_name: &str, id: &str, source: &Value) -> Result<u64, DgmError> {
        let key = DocumentId::symbolic_of(index, type_name, id).key();
        let mut slots = self.slots.write();
        let slot = slots.entry(key).or_default();
        slot.version = slot.version.saturating_add(1);
        slot.source = Some(source.clone());
        Ok(slot.version)
    }
}

// =============================================================================
// TESTS
// =============================================================================
