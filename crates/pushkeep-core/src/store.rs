//! Document store client interface + in-memory backend.
//!
//! The remote store is an external collaborator; this module fixes the
//! narrow surface the subsystem needs (merge-write, delete, get, list) and
//! ships [`MemoryStore`] for tests, the simulator and single-process use.
//! Timestamps named in a [`DocumentWrite`] are assigned by the store at
//! write time, never taken from the caller's clock.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Document fields.
pub type Fields = Map<String, Value>;

/// Future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Address of a single document: `{collection}/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    collection: String,
    id: String,
}

impl DocumentPath {
    /// Build a path; the collection must have an odd number of non-empty
    /// segments and the id must be a single non-empty segment.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Result<Self, StoreError> {
        let collection = collection.into();
        let id = id.into();
        let segments: Vec<&str> = collection.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) || segments.len() % 2 == 0 {
            return Err(StoreError::InvalidPath(collection));
        }
        if id.is_empty() || id.contains('/') {
            return Err(StoreError::InvalidPath(format!("{collection}/{id}")));
        }
        Ok(Self { collection, id })
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Store-assigned timestamp field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampField {
    /// Set only when the write creates the document.
    OnCreate(String),
    /// Set on every write.
    OnWrite(String),
}

/// A merge write: listed fields overwrite, unlisted fields are preserved.
#[derive(Debug, Clone, Default)]
pub struct DocumentWrite {
    pub fields: Fields,
    pub timestamps: Vec<TimestampField>,
}

impl DocumentWrite {
    #[must_use]
    pub fn new(fields: Fields) -> Self {
        Self {
            fields,
            timestamps: Vec::new(),
        }
    }

    #[must_use]
    pub fn created_at(mut self, field: impl Into<String>) -> Self {
        self.timestamps.push(TimestampField::OnCreate(field.into()));
        self
    }

    #[must_use]
    pub fn updated_at(mut self, field: impl Into<String>) -> Self {
        self.timestamps.push(TimestampField::OnWrite(field.into()));
        self
    }
}

/// Remote document store client.
pub trait DocumentStore: Send + Sync {
    /// Merge-upsert a document.
    fn merge<'a>(&'a self, path: &'a DocumentPath, write: DocumentWrite) -> StoreFuture<'a, ()>;

    /// Delete a document. Deleting a missing document succeeds.
    fn delete<'a>(&'a self, path: &'a DocumentPath) -> StoreFuture<'a, ()>;

    /// Fetch a document.
    fn get<'a>(&'a self, path: &'a DocumentPath) -> StoreFuture<'a, Option<Fields>>;

    /// List `(id, fields)` pairs of a collection, ordered by id.
    fn list<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, Vec<(String, Fields)>>;
}

/// In-memory document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, BTreeMap<String, Fields>>>,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent merges fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent deletes fail with [`StoreError::Unavailable`].
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of merge writes accepted.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of delete calls received (accepted or not).
    #[must_use]
    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Number of documents in a collection.
    #[must_use]
    pub fn count(&self, collection: &str) -> usize {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        docs.get(collection).map_or(0, BTreeMap::len)
    }

    fn apply_merge(&self, path: &DocumentPath, write: DocumentWrite) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("write to {path} refused")));
        }
        let now = Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));
        let mut docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        let collection = docs.entry(path.collection.clone()).or_default();
        let creating = !collection.contains_key(&path.id);
        let doc = collection.entry(path.id.clone()).or_default();

        for (key, value) in write.fields {
            doc.insert(key, value);
        }
        for stamp in write.timestamps {
            match stamp {
                TimestampField::OnCreate(field) if creating => {
                    doc.insert(field, now.clone());
                }
                TimestampField::OnCreate(_) => {}
                TimestampField::OnWrite(field) => {
                    doc.insert(field, now.clone());
                }
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn apply_delete(&self, path: &DocumentPath) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("delete of {path} refused")));
        }
        let mut docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(collection) = docs.get_mut(&path.collection) {
            collection.remove(&path.id);
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn merge<'a>(&'a self, path: &'a DocumentPath, write: DocumentWrite) -> StoreFuture<'a, ()> {
        let result = self.apply_merge(path, write);
        Box::pin(async move { result })
    }

    fn delete<'a>(&'a self, path: &'a DocumentPath) -> StoreFuture<'a, ()> {
        let result = self.apply_delete(path);
        Box::pin(async move { result })
    }

    fn get<'a>(&'a self, path: &'a DocumentPath) -> StoreFuture<'a, Option<Fields>> {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        let doc = docs
            .get(&path.collection)
            .and_then(|c| c.get(&path.id))
            .cloned();
        Box::pin(async move { Ok::<_, StoreError>(doc) })
    }

    fn list<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, Vec<(String, Fields)>> {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        let items: Vec<(String, Fields)> = docs
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Box::pin(async move { Ok::<_, StoreError>(items) })
    }
}
