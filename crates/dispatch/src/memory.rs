//! In-memory storage backend for tests and local development.
//!
//! Mirrors the transactional behavior of the PostgreSQL backend behind the
//! same session surface: writes made through a [`MemorySession`] are staged
//! and only become visible to other sessions when the owning unit of work
//! commits.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::message::MessageId;
use crate::outbox::OutboxRecord;

#[derive(Default)]
struct MemoryInner {
    /// Aggregate documents, keyed by collection name and entity ID.
    collections: HashMap<String, HashMap<String, serde_json::Value>>,
    /// Committed outbox records in staging order.
    outbox: Vec<OutboxRecord>,
}

/// Shared in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session(&self) -> MemorySession {
        MemorySession {
            store: self.clone(),
            staged: Vec::new(),
            staged_outbox: Vec::new(),
        }
    }

    /// Returns a committed document, if present.
    pub async fn document(&self, collection: &str, id: &str) -> Option<serde_json::Value> {
        self.inner
            .read()
            .await
            .collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned()
    }

    /// Returns the number of committed outbox records.
    pub async fn outbox_len(&self) -> usize {
        self.inner.read().await.outbox.len()
    }

    pub(crate) async fn fetch_outbox(&self) -> Vec<OutboxRecord> {
        self.inner.read().await.outbox.clone()
    }

    pub(crate) async fn delete_outbox(&self, ids: &[MessageId]) {
        self.inner
            .write()
            .await
            .outbox
            .retain(|record| !ids.contains(&record.message_id));
    }
}

/// A staged view over the shared store, owned by one unit of work.
///
/// Reads see staged writes first, then committed state. Dropping the
/// session discards everything staged.
pub struct MemorySession {
    store: MemoryStore,
    staged: Vec<(String, String, serde_json::Value)>,
    staged_outbox: Vec<OutboxRecord>,
}

impl MemorySession {
    /// Reads a document, preferring writes staged in this session.
    pub async fn get(&self, collection: &str, id: &str) -> Option<serde_json::Value> {
        if let Some((_, _, document)) = self
            .staged
            .iter()
            .rev()
            .find(|(c, i, _)| c == collection && i == id)
        {
            return Some(document.clone());
        }
        self.store.document(collection, id).await
    }

    /// Stages an upsert of a document.
    pub fn put(&mut self, collection: &str, id: &str, document: serde_json::Value) {
        self.staged
            .push((collection.to_string(), id.to_string(), document));
    }

    pub(crate) fn stage_outbox(&mut self, record: OutboxRecord) {
        self.staged_outbox.push(record);
    }

    pub(crate) async fn commit(self) {
        let mut inner = self.store.inner.write().await;
        for (collection, id, document) in self.staged {
            inner
                .collections
                .entry(collection)
                .or_default()
                .insert(id, document);
        }
        for record in self.staged_outbox {
            // Same keyed-ignore semantics as ON CONFLICT DO NOTHING.
            if !inner
                .outbox
                .iter()
                .any(|existing| existing.message_id == record.message_id)
            {
                inner.outbox.push(record);
            }
        }
    }
}
