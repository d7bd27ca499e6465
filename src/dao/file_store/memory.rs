use std::{
    collections::HashSet,
    io::Error as IoError,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use dashmap::DashMap;
use futures::future::BoxFuture;

use crate::dao::{
    file_store::FileStore,
    storage::{StorageError, StorageResult},
};

/// Volatile file backend used by tests and dry runs.
///
/// Individual keys can be marked as failing to exercise requeue paths.
#[derive(Clone, Default)]
pub struct MemoryFileStore {
    files: Arc<DashMap<String, String>>,
    failing: Arc<DashMap<String, ()>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryFileStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file without counting it as a write.
    pub fn insert(&self, key: impl Into<String>, contents: impl Into<String>) {
        self.files.insert(key.into(), contents.into());
    }

    /// Current contents of a file, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        self.files.get(key).map(|entry| entry.value().clone())
    }

    /// Make every subsequent write to `key` fail until [`Self::heal`] is called.
    pub fn fail_writes_to(&self, key: impl Into<String>) {
        self.failing.insert(key.into(), ());
    }

    /// Stop failing writes to `key`.
    pub fn heal(&self, key: &str) {
        self.failing.remove(key);
    }

    /// Number of successful writes performed so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Names of all stored files.
    pub fn keys(&self) -> HashSet<String> {
        self.files.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl FileStore for MemoryFileStore {
    fn read(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let value = self.get(key);
        Box::pin(async move { Ok(value) })
    }

    fn write(&self, key: &str, contents: String) -> BoxFuture<'static, StorageResult<()>> {
        let key = key.to_string();
        let files = self.files.clone();
        let failing = self.failing.contains_key(&key);
        let writes = self.writes.clone();
        Box::pin(async move {
            if failing {
                return Err(StorageError::Write {
                    path: PathBuf::from(key),
                    source: IoError::other("injected write failure"),
                });
            }
            files.insert(key, contents);
            writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
