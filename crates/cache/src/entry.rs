//! Cache entry with TTL and access tracking
//!
//! An entry is live while `now - created_at <= ttl`. Expiry is judged
//! against the creation timestamp only; reads refresh a separate access
//! timestamp used for LRU selection and the adaptive-TTL heuristics, so a
//! frequently read entry still expires on schedule unless the warming loop
//! explicitly extends it.

use sentra_core::{now_epoch, Value};

/// Hard ceiling for adaptive TTL extension (24 hours)
pub const ADAPTIVE_TTL_CAP_SECS: f64 = 86_400.0;

/// A single cached value with its lifecycle bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Value payload
    pub value: Value,
    /// Creation time, epoch seconds; expiry is judged against this
    pub created_at: f64,
    /// Last access time, epoch seconds; LRU is judged against this
    pub accessed_at: f64,
    /// Time-to-live in seconds
    pub ttl: f64,
    /// Number of reads since creation
    pub access_count: u64,
}

impl CacheEntry {
    /// Create a fresh entry stamped with the current time
    pub fn new(value: Value, ttl: f64) -> Self {
        let now = now_epoch();
        CacheEntry {
            value,
            created_at: now,
            accessed_at: now,
            ttl,
            access_count: 0,
        }
    }

    /// Rebuild an entry from persisted fields (snapshot restore, WAL replay)
    pub fn restored(value: Value, created_at: f64, ttl: f64) -> Self {
        CacheEntry {
            value,
            created_at,
            accessed_at: created_at,
            ttl,
            access_count: 0,
        }
    }

    /// Whether the entry has outlived its TTL at `now`
    #[inline]
    pub fn is_expired(&self, now: f64) -> bool {
        now - self.created_at > self.ttl
    }

    /// Record a read: refresh the access timestamp and bump the counter
    pub fn record_access(&mut self, now: f64) {
        self.accessed_at = now;
        self.access_count += 1;
    }

    /// Seconds since creation
    #[inline]
    pub fn age(&self, now: f64) -> f64 {
        (now - self.created_at).max(0.0)
    }

    /// Seconds since the last access
    #[inline]
    pub fn idle_time(&self, now: f64) -> f64 {
        (now - self.accessed_at).max(0.0)
    }

    /// Access intensity in [0, 1]: reads per minute of age, clamped
    ///
    /// Feeds the eviction score and the warming-loop hot-entry test.
    pub fn hit_rate(&self, now: f64) -> f64 {
        let minutes = (self.age(now) / 60.0).max(1.0);
        (self.access_count as f64 / minutes).min(1.0)
    }

    /// Estimated in-memory footprint including the key, in bytes
    pub fn approx_size(&self, key: &str) -> usize {
        // key + value + two timestamps + ttl + counter
        key.len() + self.value.approx_size() + 8 * 4
    }

    /// TTL a hot entry should be extended to: doubled, capped at 24 hours
    ///
    /// Advisory only; the warming loop applies it to the in-memory entry
    /// without rewriting the WAL.
    pub fn extended_ttl(&self) -> f64 {
        (self.ttl * 2.0).min(ADAPTIVE_TTL_CAP_SECS)
    }
}
