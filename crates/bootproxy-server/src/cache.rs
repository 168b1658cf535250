//! In-memory cache of rendered config drives.
//!
//! Entries expire after a TTL and the total payload size is bounded; when an
//! insert would exceed the bound, the oldest entries are evicted first.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    payload: Bytes,
    source_version: String,
    inserted: Instant,
    // Breaks timestamp ties so eviction order is insertion order.
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    size: usize,
    next_seq: u64,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.size -= entry.payload.len();
        Some(entry)
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.inserted, e.seq))
            .map(|(k, _)| k.clone());
        match oldest {
            Some(key) => {
                self.remove(&key);
                tracing::debug!(key = %key, "Evicted config drive");
                true
            }
            None => false,
        }
    }
}

/// Size-bounded TTL cache keyed by config-drive id.
#[derive(Debug)]
pub struct ConfigDriveCache {
    inner: RwLock<Inner>,
    ttl: Duration,
    max_size: usize,
}

impl ConfigDriveCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            ttl,
            max_size,
        }
    }

    /// Returns the configured TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the payload for `key` unless it is absent or older than the TTL.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let inner = self.inner.read();
        let entry = inner.entries.get(key)?;
        (entry.inserted.elapsed() <= self.ttl).then(|| entry.payload.clone())
    }

    /// Like [`Self::get`], but also requires the entry to have been rendered
    /// from `source_version`.
    #[must_use]
    pub fn get_if_current(&self, key: &str, source_version: &str) -> Option<Bytes> {
        let inner = self.inner.read();
        let entry = inner.entries.get(key)?;
        (entry.inserted.elapsed() <= self.ttl && entry.source_version == source_version)
            .then(|| entry.payload.clone())
    }

    /// Stores `payload` under `key`, evicting the oldest entries as needed to
    /// stay within the size limit.
    ///
    /// A payload larger than the whole limit is not stored, and any previous
    /// entry for `key` is dropped.
    pub fn set(&self, key: impl Into<String>, payload: Bytes, source_version: impl Into<String>) {
        let key = key.into();
        let mut inner = self.inner.write();
        inner.remove(&key);

        if payload.len() > self.max_size {
            tracing::warn!(
                key = %key,
                size = payload.len(),
                max_size = self.max_size,
                "Config drive exceeds cache size, not caching"
            );
            return;
        }

        while inner.size + payload.len() > self.max_size {
            if !inner.evict_oldest() {
                break;
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.size += payload.len();
        inner.entries.insert(
            key,
            Entry {
                payload,
                source_version: source_version.into(),
                inserted: Instant::now(),
                seq,
            },
        );
    }

    /// Removes the entry for `key`.
    pub fn delete(&self, key: &str) {
        self.inner.write().remove(key);
    }

    /// Removes every entry older than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.inserted.elapsed() > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Total cached payload bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.read().size
    }

    /// Number of cached entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Starts the background sweep, running every half TTL until the returned
    /// handle is shut down or dropped.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let cache = Arc::clone(self);
        let period = (self.ttl / 2).max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired config drives");
                        }
                    }
                }
            }
        });

        SweeperHandle { shutdown_tx, task }
    }
}

/// Handle for stopping the cache sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn payload(len: usize) -> Bytes {
        Bytes::from(vec![0u8; len])
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_and_set() {
        let cache = ConfigDriveCache::new(TTL, 1024);
        assert!(cache.get("m1").is_none());

        cache.set("m1", Bytes::from_static(b"iso"), "v1");
        assert_eq!(cache.get("m1").as_deref(), Some(&b"iso"[..]));
        assert_eq!(cache.size(), 3);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_expired_before_sweep() {
        let cache = ConfigDriveCache::new(TTL, 1024);
        cache.set("m1", payload(10), "v1");

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        assert!(cache.get("m1").is_none());
        // Not reclaimed until the sweep runs.
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 10);

        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_oldest_first() {
        let cache = ConfigDriveCache::new(TTL, 100);
        cache.set("a", payload(40), "v1");
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set("b", payload(40), "v1");
        tokio::time::advance(Duration::from_secs(1)).await;

        cache.set("c", payload(40), "v1");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.size(), 80);

        cache.set("d", payload(90), "v1");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("d").is_some());
        assert!(cache.size() <= 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_order_with_equal_timestamps() {
        let cache = ConfigDriveCache::new(TTL, 30);
        cache.set("a", payload(10), "v1");
        cache.set("b", payload(10), "v1");
        cache.set("c", payload(10), "v1");
        cache.set("d", payload(10), "v1");

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert_eq!(cache.size(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_accounts_size_once() {
        let cache = ConfigDriveCache::new(TTL, 100);
        cache.set("a", payload(60), "v1");
        cache.set("a", payload(70), "v2");
        assert_eq!(cache.size(), 70);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_if_current("a", "v2").is_some());
        assert!(cache.get_if_current("a", "v1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversize_payload_not_cached() {
        let cache = ConfigDriveCache::new(TTL, 100);
        cache.set("a", payload(50), "v1");
        cache.set("b", payload(20), "v1");
        cache.set("a", payload(200), "v2");

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert_eq!(cache.size(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete() {
        let cache = ConfigDriveCache::new(TTL, 100);
        cache.set("a", payload(50), "v1");
        cache.delete("a");
        cache.delete("missing");
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_expired() {
        let cache = Arc::new(ConfigDriveCache::new(TTL, 100));
        let sweeper = cache.spawn_sweeper();
        cache.set("a", payload(50), "v1");

        // Ticks at 30s (entry fresh), 60s (age == TTL, kept) and 90s.
        tokio::time::sleep(TTL / 2 * 3 + Duration::from_secs(1)).await;
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);

        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_shutdown() {
        let cache = Arc::new(ConfigDriveCache::new(TTL, 100));
        let sweeper = cache.spawn_sweeper();
        sweeper.shutdown().await;

        cache.set("a", payload(50), "v1");
        tokio::time::sleep(TTL * 3).await;
        assert_eq!(cache.len(), 1);
    }
}
