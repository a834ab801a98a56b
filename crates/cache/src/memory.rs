//! Memory bounds and eviction policy
//!
//! The memory manager decides when the cache is over capacity and which
//! entries to evict. Capacity has two axes: a hard entry count and an
//! estimated byte footprint. The byte estimate samples up to 100 entries,
//! averages their sizes, and extrapolates to the full entry count; when no
//! sample is available it falls back to a rough per-entry constant so the
//! count bound alone still protects the process.
//!
//! Eviction prefers entries that are idle longest, least re-read, and
//! largest: `score = idle_time * (2 - hit_rate) * size_kb`, highest score
//! first. The eviction loop is capped at twice the shard count so it
//! terminates on pathological inputs.

use crate::entry::CacheEntry;
use crate::sharded::Shard;
use rustc_hash::FxHashMap;
use sentra_core::now_epoch;
use tracing::{debug, warn};

/// Sample size for memory estimation
const MEMORY_SAMPLE_SIZE: usize = 100;

/// Fallback per-entry estimate when nothing can be sampled (~0.5 KB)
const FALLBACK_ENTRY_BYTES: f64 = 512.0;

/// Entry-count cap applied in paranoia mode
pub const PARANOIA_MAX_ENTRIES: usize = 10_000;
/// Memory cap in MB applied in paranoia mode
pub const PARANOIA_MAX_MEMORY_MB: usize = 10;

/// Bounds checking and LRU victim selection for the sharded cache
#[derive(Debug, Clone)]
pub struct MemoryManager {
    max_entries: usize,
    max_memory_mb: usize,
}

impl MemoryManager {
    /// Create a manager; paranoia mode lowers both limits to conservative
    /// defaults
    pub fn new(max_entries: usize, max_memory_mb: usize, paranoia_mode: bool) -> Self {
        let (max_entries, max_memory_mb) = if paranoia_mode {
            (
                max_entries.min(PARANOIA_MAX_ENTRIES),
                max_memory_mb.min(PARANOIA_MAX_MEMORY_MB),
            )
        } else {
            (max_entries, max_memory_mb)
        };
        MemoryManager {
            max_entries,
            max_memory_mb,
        }
    }

    /// Effective entry-count bound
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Effective memory bound in MB
    pub fn max_memory_mb(&self) -> usize {
        self.max_memory_mb
    }

    /// Whether the cache is within both the count and memory bounds
    pub fn check_bounds(&self, shards: &[Shard], current_size: usize) -> bool {
        if current_size > self.max_entries {
            warn!(
                current_size,
                max_entries = self.max_entries,
                "cache size exceeds bounds"
            );
            return false;
        }
        self.check_memory_bounds(shards, current_size)
    }

    fn check_memory_bounds(&self, shards: &[Shard], current_size: usize) -> bool {
        let estimated_mb = self.estimate_memory_mb(shards, current_size);
        let threshold = self.max_memory_mb as f64 * 0.8;
        if estimated_mb > threshold {
            warn!(
                estimated_mb,
                max_memory_mb = self.max_memory_mb,
                "cache memory approaching limit"
            );
            if estimated_mb > self.max_memory_mb as f64 {
                warn!(
                    estimated_mb,
                    max_memory_mb = self.max_memory_mb,
                    "cache memory exceeds limit"
                );
                return false;
            }
        }
        true
    }

    /// Estimate total cache memory in MB by sampling
    ///
    /// Locks each shard briefly; never holds two shard locks at once.
    pub fn estimate_memory_mb(&self, shards: &[Shard], current_size: usize) -> f64 {
        if current_size == 0 {
            return 0.0;
        }

        let sample_target = MEMORY_SAMPLE_SIZE.min(current_size);
        let mut sample_bytes = 0usize;
        let mut sample_count = 0usize;

        for shard in shards {
            if sample_count >= sample_target {
                break;
            }
            let map = shard.lock();
            for (key, entry) in map.iter() {
                if sample_count >= sample_target {
                    break;
                }
                sample_bytes += entry.approx_size(key);
                sample_count += 1;
            }
        }

        let avg = if sample_count > 0 {
            sample_bytes as f64 / sample_count as f64
        } else {
            FALLBACK_ENTRY_BYTES
        };
        (avg * current_size as f64) / (1024.0 * 1024.0)
    }

    /// Least-recently-accessed key in one shard map, optionally skipping one
    pub fn lru_key(map: &FxHashMap<String, CacheEntry>, exclude_key: Option<&str>) -> Option<String> {
        map.iter()
            .filter(|(key, _)| exclude_key != Some(key.as_str()))
            .min_by(|(_, a), (_, b)| {
                a.accessed_at
                    .partial_cmp(&b.accessed_at)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(key, _)| key.clone())
    }

    /// Eviction priority: higher scores are evicted first
    fn eviction_score(key: &str, entry: &CacheEntry, now: f64) -> f64 {
        let size_kb = entry.approx_size(key) as f64 / 1000.0;
        entry.idle_time(now) * (2.0 - entry.hit_rate(now)) * size_kb.max(0.001)
    }

    /// Evict entries until the bounds hold or the iteration cap is reached
    ///
    /// Never evicts `exclude_key`. Returns (entries evicted, bytes freed).
    /// Shard locks are taken one at a time, never nested.
    pub fn evict_to_fit(
        &self,
        shards: &[Shard],
        exclude_key: Option<&str>,
    ) -> (usize, usize) {
        let max_evictions = shards.len() * 2;
        let mut evicted = 0usize;
        let mut bytes_freed = 0usize;

        while evicted < max_evictions {
            let current_size: usize = shards.iter().map(Shard::len).sum();
            if self.check_bounds(shards, current_size) {
                break;
            }

            // Pick the highest-scoring victim across all shards
            let now = now_epoch();
            let mut victim: Option<(usize, String, f64)> = None;
            for (index, shard) in shards.iter().enumerate() {
                let map = shard.lock();
                for (key, entry) in map.iter() {
                    if exclude_key == Some(key.as_str()) {
                        continue;
                    }
                    let score = Self::eviction_score(key, entry, now);
                    if victim.as_ref().map_or(true, |(_, _, best)| score > *best) {
                        victim = Some((index, key.clone(), score));
                    }
                }
            }

            let (shard_index, key, _) = match victim {
                Some(v) => v,
                None => break,
            };

            // Re-lock the owning shard; the entry may have raced away
            let removed = {
                let mut map = shards[shard_index].lock();
                map.remove(&key).map(|entry| entry.approx_size(&key))
            };
            match removed {
                Some(size) => {
                    shards[shard_index].decrement_len();
                    bytes_freed += size;
                    evicted += 1;
                    debug!(key = %key, shard = shard_index, "evicted for capacity");
                }
                None => continue,
            }
        }

        (evicted, bytes_freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::Value;

    fn shard_with(entries: Vec<(&str, CacheEntry)>) -> Shard {
        let shard = Shard::default();
        {
            let mut map = shard.lock();
            for (key, entry) in entries {
                map.insert(key.to_string(), entry);
                shard.increment_len();
            }
        }
        shard
    }

    fn entry_accessed_at(offset_secs: f64) -> CacheEntry {
        let mut entry = CacheEntry::new(Value::I64(1), 600.0);
        entry.created_at -= 100.0;
        entry.accessed_at = entry.created_at + offset_secs;
        entry
    }

    #[test]
    fn test_paranoia_clamps() {
        let manager = MemoryManager::new(1_000_000, 500, true);
        assert_eq!(manager.max_entries(), PARANOIA_MAX_ENTRIES);
        assert_eq!(manager.max_memory_mb(), PARANOIA_MAX_MEMORY_MB);
    }

    #[test]
    fn test_count_bound() {
        let manager = MemoryManager::new(2, 100, false);
        let shards = vec![shard_with(vec![
            ("a", CacheEntry::new(Value::I64(1), 60.0)),
            ("b", CacheEntry::new(Value::I64(2), 60.0)),
        ])];
        assert!(manager.check_bounds(&shards, 2));
        assert!(!manager.check_bounds(&shards, 3));
    }

    #[test]
    fn test_lru_picks_oldest_access() {
        let shard = shard_with(vec![
            ("old", entry_accessed_at(1.0)),
            ("mid", entry_accessed_at(50.0)),
            ("new", entry_accessed_at(99.0)),
        ]);
        let map = shard.lock();
        assert_eq!(MemoryManager::lru_key(&map, None).as_deref(), Some("old"));
    }

    #[test]
    fn test_lru_respects_exclusion() {
        let shard = shard_with(vec![
            ("old", entry_accessed_at(1.0)),
            ("new", entry_accessed_at(99.0)),
        ]);
        let map = shard.lock();
        assert_eq!(
            MemoryManager::lru_key(&map, Some("old")).as_deref(),
            Some("new")
        );
    }

    #[test]
    fn test_lru_empty_shard() {
        let shard = Shard::default();
        let map = shard.lock();
        assert_eq!(MemoryManager::lru_key(&map, None), None);
    }

    #[test]
    fn test_evict_to_fit_respects_exclusion_and_cap() {
        let manager = MemoryManager::new(1, 100, false);
        let shards = vec![shard_with(vec![
            ("keep", entry_accessed_at(99.0)),
            ("victim", entry_accessed_at(1.0)),
        ])];

        let (evicted, bytes) = manager.evict_to_fit(&shards, Some("keep"));
        assert_eq!(evicted, 1);
        assert!(bytes > 0);
        let map = shards[0].lock();
        assert!(map.contains_key("keep"));
        assert!(!map.contains_key("victim"));
    }

    #[test]
    fn test_evict_stops_when_only_excluded_remains() {
        let manager = MemoryManager::new(0, 100, false);
        let shards = vec![shard_with(vec![("keep", entry_accessed_at(1.0))])];
        let (evicted, _) = manager.evict_to_fit(&shards, Some("keep"));
        assert_eq!(evicted, 0);
        assert!(shards[0].lock().contains_key("keep"));
    }

    #[test]
    fn test_memory_estimate_scales_with_entries() {
        let manager = MemoryManager::new(1000, 100, false);
        let big = CacheEntry::new(Value::Str("x".repeat(10_000)), 60.0);
        let shards = vec![shard_with(vec![("a", big)])];
        let one = manager.estimate_memory_mb(&shards, 1);
        let many = manager.estimate_memory_mb(&shards, 100);
        assert!(many > one * 50.0);
    }

    #[test]
    fn test_memory_estimate_empty() {
        let manager = MemoryManager::new(1000, 100, false);
        let shards = vec![Shard::default()];
        assert_eq!(manager.estimate_memory_mb(&shards, 0), 0.0);
    }
}
