//! Durable key-value storage private to the background worker.
//!
//! The worker outlives any page and has no session, so what it needs to act
//! on its own (the renewal metadata) lives here rather than in the remote
//! store. Two backends: [`MemoryStorage`] and [`FileStorage`] (one JSON file
//! per key, replaced atomically under an advisory lock). File access runs on
//! the blocking pool.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;

use fs2::FileExt;
use serde_json::Value;

use crate::error::StoreError;

/// Future returned by worker storage operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Worker-local durable key-value storage.
pub trait WorkerStorage: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<Value>>;

    /// Replace the value stored under `key`.
    fn put<'a>(&'a self, key: &'a str, value: Value) -> StorageFuture<'a, ()>;

    fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()>;
}

/// In-memory worker storage (lost when the process exits).
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkerStorage for MemoryStorage {
    fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<Value>> {
        let value = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        Box::pin(async move { Ok::<_, StoreError>(value) })
    }

    fn put<'a>(&'a self, key: &'a str, value: Value) -> StorageFuture<'a, ()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
        Box::pin(async move { Ok::<_, StoreError>(()) })
    }

    fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Box::pin(async move { Ok::<_, StoreError>(()) })
    }
}

/// File-backed worker storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open (and create if needed) a storage directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidPath(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }

    fn lock(&self) -> Result<File, StoreError> {
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.root.join(".lock"))?;
        lock.lock_exclusive()?;
        Ok(lock)
    }

    fn read_entry(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.entry_path(key)?;
        let _lock = self.lock()?;
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display()))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_entry(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.entry_path(key)?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StoreError::Corrupt(format!("{key}: {e}")))?;
        let lock = self.lock()?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        drop(lock);
        Ok(())
    }

    fn remove_entry(&self, key: &str) -> Result<(), StoreError> {
        let path = self.entry_path(key)?;
        let _lock = self.lock()?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Run a filesystem operation off the async runtime threads.
async fn blocking<T, F>(op: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(format!("storage task failed: {e}"))))?
}

impl WorkerStorage for FileStorage {
    fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<Value>> {
        let storage = self.clone();
        let key = key.to_string();
        Box::pin(blocking(move || storage.read_entry(&key)))
    }

    fn put<'a>(&'a self, key: &'a str, value: Value) -> StorageFuture<'a, ()> {
        let storage = self.clone();
        let key = key.to_string();
        Box::pin(blocking(move || storage.write_entry(&key, &value)))
    }

    fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        let storage = self.clone();
        let key = key.to_string();
        Box::pin(blocking(move || storage.remove_entry(&key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_put_replaces() {
        let storage = MemoryStorage::new();
        assert!(storage.get("k").await.unwrap().is_none());
        storage.put("k", json!(1)).await.unwrap();
        storage.put("k", json!(2)).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(json!(2)));
        storage.remove("k").await.unwrap();
        assert!(storage.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("worker")).unwrap();
        storage.put("push-metadata", json!({"userId": "u1"})).await.unwrap();

        let reopened = FileStorage::open(dir.path().join("worker")).unwrap();
        assert_eq!(
            reopened.get("push-metadata").await.unwrap(),
            Some(json!({"userId": "u1"}))
        );
        reopened.remove("push-metadata").await.unwrap();
        reopened.remove("push-metadata").await.unwrap();
        assert!(reopened.get("push-metadata").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_storage_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        for key in ["", "../escape", "a/b", ".lock"] {
            assert!(matches!(
                storage.put(key, json!(null)).await,
                Err(StoreError::InvalidPath(_))
            ));
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn file_access_waits_for_a_held_lock_without_stalling_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        let held = storage.lock().unwrap();

        let writer = {
            let storage = storage.clone();
            tokio::spawn(async move { storage.put("k", json!(1)).await })
        };
        // The single runtime thread is still free while the writer waits.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        drop(held);
        writer.await.unwrap().unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn corrupt_entry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        fs::write(dir.path().join("bad.json"), b"{oops").unwrap();
        assert!(matches!(
            storage.get("bad").await,
            Err(StoreError::Corrupt(_))
        ));
    }
}
