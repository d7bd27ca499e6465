use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{
    dao::{file_store::FileStore, storage::StorageError},
    dto::admin::{CacheStatus, FlushReport},
};

/// Errors surfaced by [`WriteBehindCache`] to its callers.
///
/// Flushing never fails as a whole; only encoding and direct I/O do.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A value could not be serialized.
    #[error("failed to encode `{key}`")]
    Encode {
        /// Logical file name.
        key: String,
        /// Serializer error.
        #[source]
        source: serde_yaml::Error,
    },
    /// A stored payload could not be parsed.
    #[error("failed to decode `{key}`")]
    Decode {
        /// Logical file name.
        key: String,
        /// Parser error.
        #[source]
        source: serde_yaml::Error,
    },
    /// The backend failed a direct read or write.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Write-behind cache over named logical files.
///
/// Writes are coalesced per key and flushed on an interval, when the queue
/// reaches its threshold, or on request. Files whose write fails stay queued.
pub struct WriteBehindCache {
    store: Arc<dyn FileStore>,
    queue: Mutex<IndexMap<String, String>>,
    flush_gate: Mutex<()>,
    threshold: usize,
    wakeup: Notify,
}

impl WriteBehindCache {
    /// Create an empty cache over `store`. A zero threshold is treated as one.
    pub fn new(store: Arc<dyn FileStore>, threshold: usize) -> Self {
        Self {
            store,
            queue: Mutex::new(IndexMap::new()),
            flush_gate: Mutex::new(()),
            threshold: threshold.max(1),
            wakeup: Notify::new(),
        }
    }

    /// Queue `value` for `key`, replacing any payload already waiting for that key.
    pub async fn queue_write<T>(&self, key: &str, value: &T) -> Result<(), PersistenceError>
    where
        T: Serialize + ?Sized,
    {
        let payload = encode(key, value)?;
        let pending = {
            let mut queue = self.queue.lock().await;
            queue.insert(key.to_string(), payload);
            queue.len()
        };

        debug!(key, pending, "write queued");
        if pending >= self.threshold {
            self.wakeup.notify_one();
        }
        Ok(())
    }

    /// Write `value` straight through, dropping any older queued payload for `key`.
    ///
    /// Waits for a running flush so an older payload cannot land afterwards.
    pub async fn immediate_write<T>(&self, key: &str, value: &T) -> Result<(), PersistenceError>
    where
        T: Serialize + ?Sized,
    {
        let payload = encode(key, value)?;
        let _gate = self.flush_gate.lock().await;
        self.queue.lock().await.shift_remove(key);
        self.store.write(key, payload).await?;
        Ok(())
    }

    /// Read and decode `key`, preferring a queued payload over the stored file.
    pub async fn read<T>(&self, key: &str) -> Result<Option<T>, PersistenceError>
    where
        T: DeserializeOwned,
    {
        let Some(raw) = self.read_raw(key).await? else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_yaml::from_str(&raw)
            .map(Some)
            .map_err(|source| PersistenceError::Decode {
                key: key.to_string(),
                source,
            })
    }

    /// Raw text for `key`, preferring a queued payload over the stored file.
    pub async fn read_raw(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        if let Some(queued) = self.queue.lock().await.get(key).cloned() {
            return Ok(Some(queued));
        }
        Ok(self.store.read(key).await?)
    }

    /// Number of logical files waiting to be written.
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Queue length, threshold and whether a flush is running.
    pub async fn status(&self) -> CacheStatus {
        CacheStatus {
            pending: self.pending().await,
            threshold: self.threshold,
            flushing: self.flush_gate.try_lock().is_err(),
        }
    }

    /// Flush everything queued, waiting for a flush already in progress to finish first.
    pub async fn force_flush(&self) -> FlushReport {
        let _gate = self.flush_gate.lock().await;
        self.flush_locked().await
    }

    /// Flush unless another flush is running, in which case `None` is returned.
    pub async fn try_flush(&self) -> Option<FlushReport> {
        let _gate = self.flush_gate.try_lock().ok()?;
        Some(self.flush_locked().await)
    }

    async fn flush_locked(&self) -> FlushReport {
        // Payloads stay queued until written so reads never fall back to an older file.
        let batch = self.queue.lock().await.clone();
        if batch.is_empty() {
            return FlushReport::default();
        }

        let mut written = 0;
        let mut failed = 0;
        for (key, payload) in batch {
            match self.store.write(&key, payload.clone()).await {
                Ok(()) => {
                    written += 1;
                    let mut queue = self.queue.lock().await;
                    if queue.get(&key) == Some(&payload) {
                        queue.shift_remove(&key);
                    }
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "flush failed; keeping it queued");
                    failed += 1;
                }
            }
        }

        let pending = self.pending().await;
        info!(written, failed, pending, "write-behind flush finished");
        FlushReport {
            written,
            failed,
            pending,
        }
    }

    /// Run the periodic/threshold flusher until the returned handle is aborted.
    pub fn spawn_flusher(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.wakeup.notified() => {
                        debug!("write queue reached its threshold");
                    }
                }
                if self.pending().await > 0 {
                    let _ = self.try_flush().await;
                }
            }
        })
    }
}

fn encode<T>(key: &str, value: &T) -> Result<String, PersistenceError>
where
    T: Serialize + ?Sized,
{
    serde_yaml::to_string(value).map_err(|source| PersistenceError::Encode {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::file_store::MemoryFileStore;

    /// Delays every write so a flush can be observed while it is running.
    struct SlowStore {
        inner: MemoryFileStore,
        delay: Duration,
    }

    impl FileStore for SlowStore {
        fn read(
            &self,
            key: &str,
        ) -> futures::future::BoxFuture<'static, crate::dao::storage::StorageResult<Option<String>>>
        {
            self.inner.read(key)
        }

        fn write(
            &self,
            key: &str,
            contents: String,
        ) -> futures::future::BoxFuture<'static, crate::dao::storage::StorageResult<()>> {
            let write = self.inner.write(key, contents);
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                write.await
            })
        }
    }

    fn slow_cache() -> (MemoryFileStore, Arc<WriteBehindCache>) {
        let store = MemoryFileStore::new();
        let slow = SlowStore {
            inner: store.clone(),
            delay: Duration::from_millis(200),
        };
        (store, Arc::new(WriteBehindCache::new(Arc::new(slow), 50)))
    }

    fn cache(threshold: usize) -> (MemoryFileStore, WriteBehindCache) {
        let store = MemoryFileStore::new();
        let cache = WriteBehindCache::new(Arc::new(store.clone()), threshold);
        (store, cache)
    }

    #[tokio::test]
    async fn queued_writes_are_coalesced_per_key() {
        let (store, cache) = cache(50);
        cache.queue_write("a.yml", &vec![1]).await.unwrap();
        cache.queue_write("a.yml", &vec![2]).await.unwrap();
        assert_eq!(cache.pending().await, 1);

        let report = cache.force_flush().await;
        assert_eq!(report.written, 1);
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.get("a.yml").as_deref(), Some("- 2\n"));
    }

    #[tokio::test]
    async fn read_prefers_queued_payload() {
        let (store, cache) = cache(50);
        store.insert("a.yml", "- 1\n");
        cache.queue_write("a.yml", &vec![7]).await.unwrap();

        let value: Option<Vec<u32>> = cache.read("a.yml").await.unwrap();
        assert_eq!(value, Some(vec![7]));
    }

    #[tokio::test]
    async fn forced_flush_drains_queue_and_requeues_failures() {
        let (store, cache) = cache(3);
        store.fail_writes_to("broken.yml");
        for index in 0..5 {
            cache
                .queue_write(&format!("file-{index}.yml"), &index)
                .await
                .unwrap();
        }
        cache.queue_write("broken.yml", &"x").await.unwrap();

        let report = cache.force_flush().await;
        assert_eq!(report.written, 5);
        assert_eq!(report.failed, 1);
        assert_eq!(report.pending, 1);
        assert_eq!(cache.pending().await, 1);

        store.heal("broken.yml");
        let report = cache.force_flush().await;
        assert_eq!(report.written, 1);
        assert_eq!(cache.pending().await, 0);
    }

    #[tokio::test]
    async fn immediate_write_supersedes_queued_payload() {
        let (store, cache) = cache(50);
        cache.queue_write("a.yml", &1).await.unwrap();
        cache.immediate_write("a.yml", &2).await.unwrap();

        assert_eq!(cache.pending().await, 0);
        assert_eq!(store.get("a.yml").as_deref(), Some("2\n"));
    }

    #[tokio::test]
    async fn threshold_wakes_the_flusher() {
        let (store, cache) = cache(2);
        let cache = Arc::new(cache);
        let flusher = cache.clone().spawn_flusher(Duration::from_secs(3600));

        cache.queue_write("a.yml", &1).await.unwrap();
        cache.queue_write("b.yml", &2).await.unwrap();

        for _ in 0..50 {
            if store.write_count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        flusher.abort();
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn reads_during_a_flush_see_the_queued_payload() {
        let (store, cache) = slow_cache();
        store.insert("a.yml", "- old\n");
        cache.queue_write("a.yml", &vec!["new"]).await.unwrap();

        let flushing = tokio::spawn({
            let cache = cache.clone();
            async move { cache.force_flush().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let value: Option<Vec<String>> = cache.read("a.yml").await.unwrap();
        assert_eq!(value, Some(vec!["new".to_string()]));

        let report = flushing.await.unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(cache.pending().await, 0);
        assert_eq!(store.get("a.yml").as_deref(), Some("- new\n"));
    }

    #[tokio::test]
    async fn immediate_write_is_not_overwritten_by_a_running_flush() {
        let (store, cache) = slow_cache();
        cache.queue_write("a.yml", &1).await.unwrap();
        cache.queue_write("b.yml", &1).await.unwrap();

        let flushing = tokio::spawn({
            let cache = cache.clone();
            async move { cache.force_flush().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.immediate_write("b.yml", &2).await.unwrap();
        flushing.await.unwrap();

        assert_eq!(store.get("b.yml").as_deref(), Some("2\n"));
        assert_eq!(cache.pending().await, 0);
    }

    #[tokio::test]
    async fn write_queued_during_a_flush_stays_pending() {
        let (store, cache) = slow_cache();
        cache.queue_write("a.yml", &1).await.unwrap();

        let flushing = tokio::spawn({
            let cache = cache.clone();
            async move { cache.force_flush().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.queue_write("a.yml", &2).await.unwrap();
        let report = flushing.await.unwrap();

        assert_eq!(report.pending, 1);
        assert_eq!(store.get("a.yml").as_deref(), Some("1\n"));
        let value: Option<u32> = cache.read("a.yml").await.unwrap();
        assert_eq!(value, Some(2));
    }
}
