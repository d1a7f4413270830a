use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

struct MemEntry {
    bytes: Bytes,
    expiry: Instant,
    size: u64,
    last_access: u64,
}

/// Bounded-by-bytes in-memory tier with LRU eviction. Recency is tracked
/// with a monotonic logical clock rather than a linked list — eviction
/// scans for the minimum, which is fine at the entry counts this tier is
/// sized for (bounded by `memory_bytes`, typically far under a million
/// small entries).
pub struct MemoryTier {
    bound: u64,
    entries: Mutex<HashMap<String, MemEntry>>,
    current_bytes: AtomicU64,
    clock: AtomicU64,
}

pub struct EvictionReport {
    pub evicted_keys: Vec<String>,
    pub evicted_bytes: u64,
}

impl MemoryTier {
    pub fn new(bound: u64) -> Self {
        Self {
            bound,
            entries: Mutex::new(HashMap::new()),
            current_bytes: AtomicU64::new(0),
            clock: AtomicU64::new(0),
        }
    }

    pub fn current_bytes(&self) -> u64 {
        self.current_bytes.load(Ordering::Relaxed)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns `Some(bytes)` on a live hit, bumping recency; `None` on a
    /// miss or lazy-expired entry (the latter is removed here).
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let tick = self.tick();
        let mut guard = self.entries.lock().expect("memory tier mutex poisoned");
        match guard.get_mut(key) {
            Some(entry) if entry.expiry > now => {
                entry.last_access = tick;
                Some(entry.bytes.clone())
            }
            Some(entry) => {
                let size = entry.size;
                guard.remove(key);
                self.current_bytes.fetch_sub(size, Ordering::Relaxed);
                None
            }
            None => None,
        }
    }

    /// Insert `bytes`, evicting least-recently-used entries until there is
    /// room. Returns `None` (no admission, caller should fall through to
    /// disk only) if the entry is larger than the whole tier bound.
    pub fn insert(&self, key: String, bytes: Bytes, expiry: Instant) -> Option<EvictionReport> {
        let size = bytes.len() as u64;
        if size > self.bound {
            return None;
        }

        let tick = self.tick();
        let mut guard = self.entries.lock().expect("memory tier mutex poisoned");

        if let Some(old) = guard.remove(key.as_str()) {
            self.current_bytes.fetch_sub(old.size, Ordering::Relaxed);
        }

        let mut evicted_keys = Vec::new();
        let mut evicted_bytes = 0u64;
        while self.current_bytes.load(Ordering::Relaxed) + size > self.bound {
            let Some(victim) = guard
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            if let Some(entry) = guard.remove(&victim) {
                self.current_bytes.fetch_sub(entry.size, Ordering::Relaxed);
                evicted_bytes += entry.size;
            }
            evicted_keys.push(victim);
        }

        guard.insert(
            key,
            MemEntry {
                bytes,
                expiry,
                size,
                last_access: tick,
            },
        );
        self.current_bytes.fetch_add(size, Ordering::Relaxed);

        Some(EvictionReport { evicted_keys, evicted_bytes })
    }

    pub fn remove(&self, key: &str) {
        let mut guard = self.entries.lock().expect("memory tier mutex poisoned");
        if let Some(entry) = guard.remove(key) {
            self.current_bytes.fetch_sub(entry.size, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        let mut guard = self.entries.lock().expect("memory tier mutex poisoned");
        guard.clear();
        self.current_bytes.store(0, Ordering::Relaxed);
    }

    /// Remove and return the keys of all entries whose TTL has elapsed.
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let mut guard = self.entries.lock().expect("memory tier mutex poisoned");
        let expired: Vec<String> = guard
            .iter()
            .filter(|(_, e)| e.expiry <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = guard.remove(key) {
                self.current_bytes.fetch_sub(entry.size, Ordering::Relaxed);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("memory tier mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_insert_and_get() {
        let tier = MemoryTier::new(1024);
        tier.insert("a".into(), Bytes::from_static(b"hello"), Instant::now() + Duration::from_secs(60));
        assert_eq!(tier.get("a"), Some(Bytes::from_static(b"hello")));
    }

    #[test]
    fn test_oversized_entry_bypasses_memory() {
        let tier = MemoryTier::new(4);
        let report = tier.insert("a".into(), Bytes::from_static(b"hello"), Instant::now() + Duration::from_secs(60));
        assert!(report.is_none());
        assert_eq!(tier.get("a"), None);
    }

    #[test]
    fn test_exact_bound_is_admitted() {
        let tier = MemoryTier::new(5);
        let report = tier.insert("a".into(), Bytes::from_static(b"hello"), Instant::now() + Duration::from_secs(60));
        assert!(report.is_some());
        assert_eq!(tier.current_bytes(), 5);
    }

    #[test]
    fn test_lru_eviction_bounds_bytes() {
        let tier = MemoryTier::new(10);
        tier.insert("a".into(), Bytes::from(vec![0u8; 5]), Instant::now() + Duration::from_secs(60));
        tier.insert("b".into(), Bytes::from(vec![0u8; 5]), Instant::now() + Duration::from_secs(60));
        // touch "b" so "a" becomes the LRU victim
        tier.get("b");
        let report = tier.insert("c".into(), Bytes::from(vec![0u8; 5]), Instant::now() + Duration::from_secs(60));
        assert!(report.unwrap().evicted_keys.contains(&"a".to_string()));
        assert!(tier.current_bytes() <= 10);
        assert_eq!(tier.get("a"), None);
        assert!(tier.get("b").is_some());
        assert!(tier.get("c").is_some());
    }

    #[test]
    fn test_expired_entry_is_lazily_removed() {
        let tier = MemoryTier::new(1024);
        tier.insert("a".into(), Bytes::from_static(b"x"), Instant::now() - Duration::from_secs(1));
        assert_eq!(tier.get("a"), None);
    }

    #[test]
    fn test_delete_then_get_is_miss() {
        let tier = MemoryTier::new(1024);
        tier.insert("a".into(), Bytes::from_static(b"x"), Instant::now() + Duration::from_secs(60));
        tier.remove("a");
        assert_eq!(tier.get("a"), None);
    }
}
