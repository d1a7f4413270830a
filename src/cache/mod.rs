//! Two-tier (memory + disk) bounded cache with LRU eviction inside each
//! tier, lazy plus periodic expiration, and atomic hit/miss statistics.

mod disk;
mod memory;
mod stats;

pub use stats::{Stats, StatsSnapshot};

use bytes::Bytes;
use disk::DiskTier;
use memory::MemoryTier;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::observability::Metrics;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("disk tier error: {0}")]
    Disk(#[from] disk::DiskError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

pub struct CacheConfig {
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub disk_path: std::path::PathBuf,
    pub default_ttl: Duration,
    pub sweep_interval: Duration,
    pub metrics: Arc<Metrics>,
}

/// Two-tier cache: memory (fast, small, LRU) in front of disk (bigger,
/// persistent, LRU). Lookup order is memory then disk; a disk hit is
/// promoted into memory. All operations are safe to call concurrently;
/// the last writer for a given key wins.
pub struct Cache {
    memory: MemoryTier,
    disk: DiskTier,
    stats: Arc<Stats>,
    default_ttl: Duration,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
    metrics: Arc<Metrics>,
}

impl Cache {
    pub fn open(config: CacheConfig) -> Result<Self> {
        let disk = DiskTier::open(&config.disk_path, config.disk_bytes)?;
        Ok(Self {
            memory: MemoryTier::new(config.memory_bytes),
            disk,
            stats: Arc::new(Stats::default()),
            default_ttl: config.default_ttl,
            sweeper: std::sync::Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
            metrics: config.metrics,
        })
    }

    /// Start the background sweep task that evicts expired entries on a
    /// fixed interval. Idempotent within the lifetime of one `Cache`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let cache = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                    _ = shutdown.notified() => {
                        debug!("cache sweeper stopping");
                        break;
                    }
                }
            }
        });
        *self.sweeper.lock().expect("sweeper mutex poisoned") = Some(handle);
    }

    fn sweep(&self) {
        let mem_expired = self.memory.sweep_expired();
        self.stats.expirations.fetch_add(mem_expired.len() as u64, Ordering::Relaxed);
        match self.disk.sweep_expired() {
            Ok(disk_expired) => {
                self.stats.expirations.fetch_add(disk_expired.len() as u64, Ordering::Relaxed);
            }
            Err(e) => tracing::warn!(error = %e, "disk sweep failed"),
        }
    }

    pub fn get(&self, key: &str) -> (Option<Bytes>, bool) {
        if let Some(bytes) = self.memory.get(key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            self.stats.memory_hits.fetch_add(1, Ordering::Relaxed);
            return (Some(bytes), true);
        }

        match self.disk.get(key) {
            Ok(Some(bytes)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                self.stats.disk_hits.fetch_add(1, Ordering::Relaxed);
                if self
                    .memory
                    .insert(key.to_string(), bytes.clone(), Instant::now() + self.default_ttl)
                    .is_some()
                {
                    self.stats.promotions.fetch_add(1, Ordering::Relaxed);
                }
                (Some(bytes), true)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                (None, false)
            }
            Err(e) => {
                // Cache failures are non-fatal; callers fall through to
                // MetaStore on a miss.
                tracing::warn!(error = %e, key, "disk cache read failed");
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                (None, false)
            }
        }
    }

    pub fn set(&self, key: &str, bytes: Bytes, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.stats.bytes_in.fetch_add(bytes.len() as u64, Ordering::Relaxed);

        if let Some(report) = self.memory.insert(key.to_string(), bytes.clone(), Instant::now() + ttl) {
            if !report.evicted_keys.is_empty() {
                let count = report.evicted_keys.len() as u64;
                self.stats.evictions.fetch_add(count, Ordering::Relaxed);
                self.stats.memory_evictions.fetch_add(count, Ordering::Relaxed);
                self.metrics.cache_eviction(count);
            }
        }

        match self.disk.insert(key, bytes, ttl) {
            Ok(evicted) => {
                if !evicted.is_empty() {
                    let count = evicted.len() as u64;
                    self.stats.evictions.fetch_add(count, Ordering::Relaxed);
                    self.stats.disk_evictions.fetch_add(count, Ordering::Relaxed);
                    self.metrics.cache_eviction(count);
                }
            }
            Err(e) => tracing::warn!(error = %e, key, "disk cache write failed"),
        }

        self.stats.item_count.store(self.memory.len() as u64, Ordering::Relaxed);
    }

    pub fn delete(&self, key: &str) {
        self.memory.remove(key);
        if let Err(e) = self.disk.remove(key) {
            tracing::warn!(error = %e, key, "disk cache delete failed");
        }
    }

    pub fn clear(&self) {
        self.memory.clear();
        if let Err(e) = self.disk.clear() {
            tracing::warn!(error = %e, "disk cache clear failed");
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the sweeper and release resources. Safe to call more than once.
    pub async fn close(&self) {
        self.shutdown.notify_waiters();
        let handle = self.sweeper.lock().expect("sweeper mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Build a stable cache-key fingerprint for a mirror request. Not a
/// cryptographic hash — just a deterministic, filesystem/partition-safe
/// key from the request's identifying parts.
pub fn fingerprint(parts: &[&str]) -> String {
    parts.join("\u{1f}")
}

pub fn ensure_disk_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache(dir: &TempDir) -> Cache {
        Cache::open(CacheConfig {
            memory_bytes: 1024,
            disk_bytes: 4096,
            disk_path: dir.path().to_path_buf(),
            default_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            metrics: Arc::new(Metrics::new()),
        })
        .unwrap()
    }

    #[test]
    fn test_set_then_get_is_hit() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.set("k", Bytes::from_static(b"v"), None);
        let (bytes, hit) = cache.get("k");
        assert!(hit);
        assert_eq!(bytes, Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn test_set_delete_get_is_miss() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.set("k", Bytes::from_static(b"v"), None);
        cache.delete("k");
        let (bytes, hit) = cache.get("k");
        assert!(!hit);
        assert_eq!(bytes, None);
    }

    #[test]
    fn test_disk_hit_promotes_to_memory() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.set("k", Bytes::from_static(b"v"), None);
        // Evict from memory directly, leaving only the disk copy.
        cache.memory.remove("k");
        let (bytes, hit) = cache.get("k");
        assert!(hit);
        assert_eq!(bytes, Some(Bytes::from_static(b"v")));
        let snap = cache.stats();
        assert_eq!(snap.promotions, 1);
        // Now memory should serve it directly.
        assert!(cache.memory.get("k").is_some());
    }

    #[test]
    fn test_stats_hit_rate() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.set("k", Bytes::from_static(b"v"), None);
        cache.get("k");
        cache.get("missing");
        let snap = cache.stats();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.hit_rate(), 0.5);
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.set("a", Bytes::from_static(b"1"), None);
        cache.set("b", Bytes::from_static(b"2"), None);
        cache.clear();
        assert_eq!(cache.get("a").1, false);
        assert_eq!(cache.get("b").1, false);
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(fingerprint(&["acme", "foo", "1.2.3"]), fingerprint(&["acme", "foo", "1.2.3"]));
        assert_ne!(fingerprint(&["acme", "foo"]), fingerprint(&["acme", "bar"]));
    }
}
