use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic hit/miss/eviction counters for the two-tier cache. Cheap to
/// update from any task; `snapshot()` gives a point-in-time read.
#[derive(Debug, Default)]
pub struct Stats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub memory_hits: AtomicU64,
    pub disk_hits: AtomicU64,
    pub evictions: AtomicU64,
    pub memory_evictions: AtomicU64,
    pub disk_evictions: AtomicU64,
    pub expirations: AtomicU64,
    pub promotions: AtomicU64,
    pub bytes_in: AtomicU64,
    pub item_count: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub evictions: u64,
    pub memory_evictions: u64,
    pub disk_evictions: u64,
    pub expirations: u64,
    pub promotions: u64,
    pub bytes_in: u64,
    pub item_count: u64,
}

impl StatsSnapshot {
    /// `hits / (hits + misses)`, `0.0` when undefined (no requests yet).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            memory_evictions: self.memory_evictions.load(Ordering::Relaxed),
            disk_evictions: self.disk_evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            item_count: self.item_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_undefined_is_zero() {
        let snap = StatsSnapshot::default();
        assert_eq!(snap.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_computed() {
        let snap = StatsSnapshot { hits: 3, misses: 1, ..Default::default() };
        assert_eq!(snap.hit_rate(), 0.75);
    }
}
