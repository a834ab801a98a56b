//! The sharded TTL cache
//!
//! Keys are placed deterministically: `xxh3_64(key) % num_shards`, with a
//! position-weighted character sum as the documented fallback should the
//! primary path ever produce an out-of-range index. Deterministic placement
//! is load-bearing: WAL replay depends on keys landing in the same shard
//! across processes.
//!
//! Mutation order when the WAL is enabled: validate, append + fsync,
//! install, then bounds-driven eviction. A failed append is a failed
//! mutation and nothing is installed. A set that still violates bounds
//! after the eviction cap removes the entry it just installed and reports
//! a capacity error. The entry it may have replaced for the same key stays
//! gone; callers needing atomicity bracket with the transaction manager
//! and roll back.

use crate::entry::CacheEntry;
use crate::memory::MemoryManager;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sentra_core::config::CacheConfig;
use sentra_core::{now_epoch, validate_key, Error, Result, Value};
use sentra_durability::snapshot::SnapshotEntry;
use sentra_durability::wal::{WalApplier, WalEntry};
use sentra_durability::{PersistenceManager, WriteAheadLog};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// TTL ceiling: one year
const MAX_TTL_SECS: f64 = 365.0 * 86_400.0;

/// Rollback operation lists larger than this are rejected
const MAX_ROLLBACK_OPS: usize = 10_000;

/// Warming-loop hot-entry thresholds
const WARMING_MIN_HIT_RATE: f64 = 0.5;
const WARMING_MIN_ACCESS_COUNT: u64 = 10;

/// One partition of the keyspace with its own lock and entry counter
///
/// The counter lets `size()` stay approximate without taking any map lock.
#[derive(Debug, Default)]
pub struct Shard {
    map: Mutex<FxHashMap<String, CacheEntry>>,
    len: AtomicUsize,
}

impl Shard {
    /// Lock the shard map
    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, FxHashMap<String, CacheEntry>> {
        self.map.lock()
    }

    /// Approximate entry count (no lock)
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether the shard is (approximately) empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn increment_len(&self) {
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decrement_len(&self) {
        self.len.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn reset_len(&self) {
        self.len.store(0, Ordering::Relaxed);
    }
}

/// Operation counters for the cache, read by `stats()` and health checks
#[derive(Debug, Default)]
pub(crate) struct CacheMetrics {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) sets: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) cleanup_cycles: AtomicU64,
}

/// Snapshot of cache metrics and layout
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Approximate entry count
    pub size: usize,
    /// Shard count
    pub num_shards: usize,
    /// Default TTL in seconds
    pub ttl_seconds: f64,
    /// Total hits
    pub hits: u64,
    /// Total misses
    pub misses: u64,
    /// Total successful sets
    pub sets: u64,
    /// Total evictions from expiry and capacity pressure
    pub evictions: u64,
    /// Completed cleanup-loop cycles
    pub cleanup_cycles: u64,
    /// hits / (hits + misses)
    pub hit_rate: f64,
    /// misses / (hits + misses)
    pub miss_rate: f64,
    /// evictions / sets
    pub eviction_rate: f64,
    /// Per-shard entry counts
    pub shard_distribution: Vec<usize>,
    /// Whether the background loops are running
    pub is_running: bool,
}

/// Inverse-operation kinds accepted by [`ShardedTTLCache::rollback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackKind {
    /// The original operation was a set
    Set,
    /// The original operation was a delete
    Delete,
}

/// One prior operation to undo
#[derive(Debug, Clone)]
pub struct RollbackOp {
    /// What the original operation was
    pub kind: RollbackKind,
    /// Affected key
    pub key: String,
    /// Value before the original operation, if the key existed
    pub previous_value: Option<Value>,
    /// TTL before the original operation, if the key existed
    pub previous_ttl: Option<f64>,
}

/// Concurrent sharded key-value cache with TTL, WAL, and snapshots
pub struct ShardedTTLCache {
    config: CacheConfig,
    pub(crate) shards: Vec<Shard>,
    pub(crate) memory: MemoryManager,
    wal: Option<WriteAheadLog>,
    persistence: PersistenceManager,
    pub(crate) metrics: CacheMetrics,
    /// Cleared exactly once: the first operation after construction drains
    /// the WAL through replay before touching shards
    wal_drained: AtomicBool,
    pub(crate) running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShardedTTLCache {
    /// Build a cache from configuration
    ///
    /// Creates the WAL and snapshot directories as needed. Background loops
    /// are not started until [`start`](Self::start).
    pub async fn new(config: CacheConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let wal = if config.enable_wal {
            Some(WriteAheadLog::new(&config.wal_path, config.wal_max_segment_bytes).await?)
        } else {
            None
        };
        let persistence = PersistenceManager::new(&config.snapshot_dir).await?;

        let shards = (0..config.num_shards).map(|_| Shard::default()).collect();
        let memory = MemoryManager::new(
            config.effective_max_entries(),
            config.effective_max_memory_mb(),
            config.paranoia_mode,
        );
        let wal_drained = AtomicBool::new(wal.is_none());

        info!(
            num_shards = config.num_shards,
            max_entries = memory.max_entries(),
            wal = config.enable_wal,
            "cache initialized"
        );

        Ok(Arc::new(ShardedTTLCache {
            config,
            shards,
            memory,
            wal,
            persistence,
            metrics: CacheMetrics::default(),
            wal_drained,
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// The configuration this cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ========================================================================
    // Shard selection
    // ========================================================================

    /// Deterministic shard placement for a key
    fn shard_index(&self, key: &str) -> usize {
        let index = (xxh3_64(key.as_bytes()) % self.shards.len() as u64) as usize;
        if index < self.shards.len() {
            index
        } else {
            self.fallback_shard_index(key)
        }
    }

    /// Documented fallback: position-weighted character sum over the first
    /// 20 bytes plus the key length
    fn fallback_shard_index(&self, key: &str) -> usize {
        let sum: u64 = key
            .bytes()
            .take(20)
            .enumerate()
            .map(|(i, b)| (i as u64 + 1) * b as u64)
            .sum::<u64>()
            + key.len() as u64;
        let index = (sum % self.shards.len() as u64) as usize;
        warn!(key = %key, index, "hash fallback used for shard selection");
        index
    }

    fn validate_ttl(&self, ttl: Option<f64>) -> Result<f64> {
        let ttl = match ttl {
            None => return Ok(self.config.ttl_seconds),
            Some(t) => t,
        };
        if !ttl.is_finite() {
            return Err(Error::Validation(format!("TTL must be finite: {ttl}")));
        }
        if ttl < 0.0 {
            return Err(Error::Validation(format!("TTL cannot be negative: {ttl}")));
        }
        if ttl > MAX_TTL_SECS {
            return Err(Error::Validation(format!(
                "TTL too large: {ttl} seconds (max 1 year)"
            )));
        }
        Ok(ttl)
    }

    /// Drain the WAL through replay exactly once, on first use
    async fn drain_wal_once(&self) -> Result<()> {
        if self.wal_drained.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(wal) = &self.wal {
            let applied = wal.replay(self).await?;
            info!(applied, "replayed operations from WAL on first use");
        }
        Ok(())
    }

    // ========================================================================
    // Primary operations
    // ========================================================================

    /// Retrieve a live value
    ///
    /// Refreshes the entry's access time and counter on a hit. An expired
    /// entry is removed on sight and reported as a miss.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        validate_key(key)?;
        self.drain_wal_once().await?;

        let shard = &self.shards[self.shard_index(key)];
        let now = now_epoch();
        let result = {
            let mut map = shard.lock();
            match map.get_mut(key) {
                Some(entry) if !entry.is_expired(now) => {
                    entry.record_access(now);
                    Some(entry.value.clone())
                }
                Some(_) => {
                    map.remove(key);
                    shard.decrement_len();
                    self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "cache entry expired on read");
                    None
                }
                None => None,
            }
        };

        match &result {
            Some(_) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache hit");
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache miss");
            }
        }
        Ok(result)
    }

    /// Install a value
    ///
    /// With the WAL enabled the operation is appended and fsynced first; a
    /// failed append fails the set and nothing is installed. After install,
    /// bounds-driven eviction runs with this key excluded; if the bounds
    /// still fail after the eviction cap, the new entry is removed and a
    /// capacity error is returned.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<f64>) -> Result<()> {
        validate_key(key)?;
        let ttl = self.validate_ttl(ttl)?;
        self.drain_wal_once().await?;

        if let Some(wal) = &self.wal {
            wal.log(WalEntry::set(key, value.clone(), Some(ttl))).await?;
        }

        self.install_entry(key, CacheEntry::new(value, ttl))?;
        self.metrics.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl, "cache set");
        Ok(())
    }

    /// Install an entry and enforce bounds, shared by `set` and WAL replay
    fn install_entry(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let index = self.shard_index(key);
        {
            let mut map = self.shards[index].lock();
            if map.insert(key.to_string(), entry).is_none() {
                self.shards[index].increment_len();
            }
        }

        // Recheck bounds after the insert; evict everything but this key
        if !self.memory.check_bounds(&self.shards, self.size()) {
            let (evicted, _) = self.memory.evict_to_fit(&self.shards, Some(key));
            self.metrics
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);

            if !self.memory.check_bounds(&self.shards, self.size()) {
                let mut map = self.shards[index].lock();
                if map.remove(key).is_some() {
                    self.shards[index].decrement_len();
                }
                return Err(Error::Capacity(format!(
                    "cache bounds exceeded: cannot add key {key:?}"
                )));
            }
        }
        Ok(())
    }

    /// Remove a key; returns whether it was present
    pub async fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.drain_wal_once().await?;

        if let Some(wal) = &self.wal {
            wal.log(WalEntry::delete(key)).await?;
        }

        let shard = &self.shards[self.shard_index(key)];
        let removed = {
            let mut map = shard.lock();
            map.remove(key).is_some()
        };
        if removed {
            shard.decrement_len();
            debug!(key = %key, "cache delete");
        }
        Ok(removed)
    }

    /// Empty all shards
    pub async fn clear(&self) {
        for shard in &self.shards {
            let mut map = shard.lock();
            map.clear();
            shard.reset_len();
        }
        debug!("cache cleared");
    }

    /// Approximate entry count, computed without any shard lock
    pub fn size(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    // ========================================================================
    // Rollback
    // ========================================================================

    /// Apply the inverses of a recorded operation list
    ///
    /// Operations are grouped by shard and applied newest-first within each
    /// shard; shards are visited in ascending index order with one lock
    /// held at a time.
    pub async fn rollback(&self, operations: &[RollbackOp]) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }
        if operations.len() > MAX_ROLLBACK_OPS {
            return Err(Error::Validation(format!(
                "too many operations for rollback: {} (max {MAX_ROLLBACK_OPS})",
                operations.len()
            )));
        }
        for op in operations {
            validate_key(&op.key)?;
        }

        let mut by_shard: BTreeMap<usize, Vec<&RollbackOp>> = BTreeMap::new();
        for op in operations {
            by_shard.entry(self.shard_index(&op.key)).or_default().push(op);
        }

        for (index, ops) in by_shard {
            let shard = &self.shards[index];
            let mut map = shard.lock();
            for op in ops.iter().rev() {
                match (op.kind, &op.previous_value) {
                    // Undo a set that overwrote: restore the prior value
                    (RollbackKind::Set, Some(previous)) | (RollbackKind::Delete, Some(previous)) => {
                        let ttl = op.previous_ttl.unwrap_or(self.config.ttl_seconds);
                        if map
                            .insert(op.key.clone(), CacheEntry::new(previous.clone(), ttl))
                            .is_none()
                        {
                            shard.increment_len();
                        }
                    }
                    // Undo a set that created: remove the key
                    (RollbackKind::Set, None) => {
                        if map.remove(&op.key).is_some() {
                            shard.decrement_len();
                        }
                    }
                    // Undo a delete of a key that did not exist: nothing
                    (RollbackKind::Delete, None) => {}
                }
            }
            debug!(shard = index, count = ops.len(), "rolled back operations");
        }
        info!(count = operations.len(), "rollback applied");
        Ok(())
    }

    // ========================================================================
    // WAL replay appliers (never re-log)
    // ========================================================================

    /// Apply a replayed SET: same effect as `set` without logging
    pub async fn apply_wal_set(&self, key: &str, value: Value, ttl: Option<f64>) -> Result<()> {
        validate_key(key)?;
        let ttl = self.validate_ttl(ttl)?;
        self.install_entry(key, CacheEntry::new(value, ttl))
    }

    /// Apply a replayed DELETE: same effect as `delete` without logging
    pub async fn apply_wal_delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let shard = &self.shards[self.shard_index(key)];
        let removed = {
            let mut map = shard.lock();
            map.remove(key).is_some()
        };
        if removed {
            shard.decrement_len();
        }
        Ok(removed)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Write a point-in-time snapshot of all live entries
    pub async fn snapshot(&self) -> Result<PathBuf> {
        let now = now_epoch();
        let mut view: Vec<BTreeMap<String, SnapshotEntry>> =
            Vec::with_capacity(self.shards.len());

        for shard in &self.shards {
            let map = shard.lock();
            let mut shard_view = BTreeMap::new();
            for (key, entry) in map.iter() {
                if entry.is_expired(now) {
                    continue;
                }
                shard_view.insert(
                    key.clone(),
                    SnapshotEntry {
                        data: entry.value.clone(),
                        timestamp: entry.created_at,
                        ttl: entry.ttl,
                    },
                );
            }
            view.push(shard_view);
        }

        self.persistence.snapshot(&view).await
    }

    /// Clear the cache and refill it from a snapshot file
    ///
    /// Shard groups whose index is out of range for this cache are skipped
    /// with a warning; every restored key is re-placed by hash so lookups
    /// find it regardless of the snapshot's shard count. Returns the number
    /// of entries restored.
    pub async fn restore(&self, path: &Path) -> Result<usize> {
        let doc = self.persistence.restore(path).await?;

        if doc.total_entries > self.memory.max_entries() {
            return Err(Error::Capacity(format!(
                "snapshot too large: {} entries (max {})",
                doc.total_entries,
                self.memory.max_entries()
            )));
        }

        self.clear().await;

        let mut restored = 0usize;
        for (shard_index, entries) in doc.shards {
            if shard_index >= self.shards.len() {
                warn!(
                    shard_index,
                    num_shards = self.shards.len(),
                    "snapshot shard index out of range, skipping"
                );
                continue;
            }
            for (key, snapshot_entry) in entries {
                if validate_key(&key).is_err() {
                    warn!(key = %key, "skipping snapshot entry with invalid key");
                    continue;
                }
                let index = self.shard_index(&key);
                let entry = CacheEntry::restored(
                    snapshot_entry.data,
                    snapshot_entry.timestamp,
                    snapshot_entry.ttl,
                );
                let mut map = self.shards[index].lock();
                if map.insert(key, entry).is_none() {
                    self.shards[index].increment_len();
                }
                restored += 1;
            }
        }

        info!(restored, "cache restored from snapshot");
        Ok(restored)
    }

    /// Enumerate snapshot files, newest first
    pub async fn list_snapshots(&self) -> Result<Vec<sentra_durability::SnapshotInfo>> {
        self.persistence.list().await
    }

    /// Delete snapshots older than the configured retention
    pub async fn cleanup_snapshots(&self) -> Result<usize> {
        self.persistence
            .cleanup(self.config.snapshot_max_age_seconds)
            .await
    }

    // ========================================================================
    // Background loops
    // ========================================================================

    /// Start the cleanup and warming loops
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let cleanup = {
            let cache = Arc::clone(self);
            tokio::spawn(async move { cache.cleanup_loop().await })
        };
        let warming = {
            let cache = Arc::clone(self);
            tokio::spawn(async move { cache.warming_loop().await })
        };
        let retention = {
            let cache = Arc::clone(self);
            tokio::spawn(async move { cache.retention_loop().await })
        };
        self.tasks.lock().extend([cleanup, warming, retention]);
        info!("cache background loops started");
    }

    /// Stop background loops, flush and close the WAL
    pub async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
        }
        if let Some(wal) = &self.wal {
            wal.close().await?;
        }
        info!("cache stopped");
        Ok(())
    }

    async fn cleanup_loop(&self) {
        let period = Duration::from_secs_f64(self.config.cleanup_interval_seconds.max(0.01));
        loop {
            tokio::time::sleep(period).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let removed = self.remove_expired_entries();
            self.metrics.cleanup_cycles.fetch_add(1, Ordering::Relaxed);
            if removed > 0 {
                debug!(removed, "cleanup cycle removed expired entries");
            }
        }
    }

    /// Drop every entry whose TTL has elapsed; returns the removed count
    pub fn remove_expired_entries(&self) -> usize {
        let now = now_epoch();
        let mut total = 0usize;
        for shard in &self.shards {
            let mut map = shard.lock();
            let expired: Vec<String> = map
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                map.remove(key);
                shard.decrement_len();
            }
            total += expired.len();
        }
        if total > 0 {
            self.metrics
                .evictions
                .fetch_add(total as u64, Ordering::Relaxed);
        }
        total
    }

    async fn warming_loop(&self) {
        let period = Duration::from_secs_f64(self.config.warming_interval_seconds.max(0.01));
        loop {
            tokio::time::sleep(period).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let extended = self.run_warming_pass();
            if extended > 0 {
                debug!(extended, "warming pass extended hot-entry TTLs");
            }
        }
    }

    /// Extend the TTL of hot entries, in memory only
    ///
    /// An entry qualifies with hit rate above 0.5 and more than 10 reads;
    /// the TTL doubles up to the 24-hour cap. The WAL is not rewritten.
    pub fn run_warming_pass(&self) -> usize {
        let now = now_epoch();
        let mut extended = 0usize;
        for shard in &self.shards {
            let mut map = shard.lock();
            for entry in map.values_mut() {
                if entry.hit_rate(now) > WARMING_MIN_HIT_RATE
                    && entry.access_count > WARMING_MIN_ACCESS_COUNT
                {
                    let new_ttl = entry.extended_ttl();
                    if new_ttl > entry.ttl {
                        entry.ttl = new_ttl;
                        extended += 1;
                    }
                }
            }
        }
        extended
    }

    async fn retention_loop(&self) {
        // WAL segments age out hourly; snapshots by their own retention knob
        let period = Duration::from_secs(3600);
        loop {
            tokio::time::sleep(period).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if let Some(wal) = &self.wal {
                if let Err(e) = wal.cleanup(self.config.wal_retention_hours).await {
                    warn!(error = %e, "wal retention cleanup failed");
                }
            }
            if let Err(e) = self.cleanup_snapshots().await {
                warn!(error = %e, "snapshot retention cleanup failed");
            }
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Metrics and layout snapshot
    pub fn stats(&self) -> CacheStats {
        let hits = self.metrics.hits.load(Ordering::Relaxed);
        let misses = self.metrics.misses.load(Ordering::Relaxed);
        let sets = self.metrics.sets.load(Ordering::Relaxed);
        let evictions = self.metrics.evictions.load(Ordering::Relaxed);
        let requests = hits + misses;

        CacheStats {
            size: self.size(),
            num_shards: self.shards.len(),
            ttl_seconds: self.config.ttl_seconds,
            hits,
            misses,
            sets,
            evictions,
            cleanup_cycles: self.metrics.cleanup_cycles.load(Ordering::Relaxed),
            hit_rate: if requests > 0 {
                hits as f64 / requests as f64
            } else {
                0.0
            },
            miss_rate: if requests > 0 {
                misses as f64 / requests as f64
            } else {
                0.0
            },
            eviction_rate: if sets > 0 {
                evictions as f64 / sets as f64
            } else {
                0.0
            },
            shard_distribution: self.shards.iter().map(Shard::len).collect(),
            is_running: self.running.load(Ordering::SeqCst),
        }
    }
}

#[async_trait::async_trait]
impl WalApplier for ShardedTTLCache {
    async fn apply_set(&self, key: &str, value: Value, ttl: Option<f64>) -> Result<()> {
        self.apply_wal_set(key, value, ttl).await
    }

    async fn apply_delete(&self, key: &str) -> Result<()> {
        self.apply_wal_delete(key).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir) -> CacheConfig {
        let mut config = CacheConfig::default();
        config.num_shards = 4;
        config.wal_path = tmp.path().join("wal");
        config.snapshot_dir = tmp.path().join("snapshots");
        config
    }

    #[tokio::test]
    async fn test_set_get_delete_round_trip() {
        let tmp = TempDir::new().unwrap();
        let cache = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();

        cache.set("a", Value::I64(1), Some(60.0)).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), Some(Value::I64(1)));
        assert_eq!(cache.size(), 1);

        assert!(cache.delete("a").await.unwrap());
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert!(!cache.delete("a").await.unwrap());
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_set_is_observationally_idempotent() {
        let tmp = TempDir::new().unwrap();
        let cache = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();

        cache.set("k", Value::I64(5), Some(60.0)).await.unwrap();
        cache.set("k", Value::I64(5), Some(60.0)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(Value::I64(5)));
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.stats().sets, 2);
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let tmp = TempDir::new().unwrap();
        let cache = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();

        assert!(cache
            .set("", Value::I64(1), None)
            .await
            .unwrap_err()
            .is_validation());
        let long = "k".repeat(1001);
        assert!(cache
            .set(&long, Value::I64(1), None)
            .await
            .unwrap_err()
            .is_validation());
        assert!(cache.get("bad\nkey").await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_ttl_validation() {
        let tmp = TempDir::new().unwrap();
        let cache = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();

        assert!(cache
            .set("k", Value::I64(1), Some(-1.0))
            .await
            .unwrap_err()
            .is_validation());
        assert!(cache
            .set("k", Value::I64(1), Some(400.0 * 86_400.0))
            .await
            .unwrap_err()
            .is_validation());
        // Zero TTL is accepted and live only at the instant of insertion
        cache.set("k", Value::I64(1), Some(0.0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_entry_invisible_to_get() {
        let tmp = TempDir::new().unwrap();
        let cache = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();

        cache.set("gone", Value::I64(1), Some(0.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("gone").await.unwrap(), None);
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired() {
        let tmp = TempDir::new().unwrap();
        let cache = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();

        cache.set("short", Value::I64(1), Some(0.0)).await.unwrap();
        cache.set("long", Value::I64(2), Some(60.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let removed = cache.remove_expired_entries();
        assert_eq!(removed, 1);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.get("long").await.unwrap(), Some(Value::I64(2)));
    }

    #[tokio::test]
    async fn test_bounded_eviction_prefers_lru() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp);
        config.max_entries = 3;
        let cache = ShardedTTLCache::new(config).await.unwrap();

        cache.set("k1", Value::from("v1"), Some(60.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set("k2", Value::from("v2"), Some(60.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Refresh k1 so k2 becomes the oldest-access entry
        cache.get("k1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set("k3", Value::from("v3"), Some(60.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set("k4", Value::from("v4"), Some(60.0)).await.unwrap();

        assert_eq!(cache.size(), 3);
        assert_eq!(cache.get("k2").await.unwrap(), None, "k2 was LRU");
        assert_eq!(cache.get("k1").await.unwrap(), Some(Value::from("v1")));
        assert_eq!(cache.get("k3").await.unwrap(), Some(Value::from("v3")));
        assert_eq!(cache.get("k4").await.unwrap(), Some(Value::from("v4")));
    }

    #[tokio::test]
    async fn test_size_one_cache_replaces_instead_of_growing() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp);
        config.max_entries = 1;
        let cache = ShardedTTLCache::new(config).await.unwrap();

        cache.set("only", Value::I64(1), Some(60.0)).await.unwrap();
        // Second key: "only" is evicted (it is not the excluded key) and
        // the new entry fits
        cache.set("next", Value::I64(2), Some(60.0)).await.unwrap();
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.get("only").await.unwrap(), None);
        assert_eq!(cache.get("next").await.unwrap(), Some(Value::I64(2)));
    }

    #[tokio::test]
    async fn test_shard_placement_is_stable() {
        let tmp = TempDir::new().unwrap();
        let cache_a = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();
        let tmp_b = TempDir::new().unwrap();
        let cache_b = ShardedTTLCache::new(test_config(&tmp_b)).await.unwrap();

        for key in ["alpha", "beta", "gamma", "delta", "a\u{00e9}"] {
            assert_eq!(cache_a.shard_index(key), cache_b.shard_index(key));
        }
    }

    #[tokio::test]
    async fn test_fallback_shard_index_deterministic_and_in_range() {
        let tmp = TempDir::new().unwrap();
        let cache = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();
        for key in ["a", "some-much-longer-key-exceeding-twenty-bytes", "zz9"] {
            let index = cache.fallback_shard_index(key);
            assert!(index < 4);
            assert_eq!(index, cache.fallback_shard_index(key));
        }
    }

    #[tokio::test]
    async fn test_clear_empties_everything() {
        let tmp = TempDir::new().unwrap();
        let cache = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();
        for i in 0..20 {
            cache
                .set(&format!("k{i}"), Value::I64(i), Some(60.0))
                .await
                .unwrap();
        }
        assert_eq!(cache.size(), 20);
        cache.clear().await;
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.get("k3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rollback_restores_previous_values() {
        let tmp = TempDir::new().unwrap();
        let cache = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();

        cache.set("a", Value::I64(1), Some(60.0)).await.unwrap();
        // Overwrite a, create b, delete c (which held 3)
        cache.set("c", Value::I64(3), Some(60.0)).await.unwrap();
        cache.set("a", Value::I64(100), Some(60.0)).await.unwrap();
        cache.set("b", Value::I64(2), Some(60.0)).await.unwrap();
        cache.delete("c").await.unwrap();

        let ops = vec![
            RollbackOp {
                kind: RollbackKind::Set,
                key: "a".to_string(),
                previous_value: Some(Value::I64(1)),
                previous_ttl: Some(60.0),
            },
            RollbackOp {
                kind: RollbackKind::Set,
                key: "b".to_string(),
                previous_value: None,
                previous_ttl: None,
            },
            RollbackOp {
                kind: RollbackKind::Delete,
                key: "c".to_string(),
                previous_value: Some(Value::I64(3)),
                previous_ttl: Some(60.0),
            },
        ];
        cache.rollback(&ops).await.unwrap();

        assert_eq!(cache.get("a").await.unwrap(), Some(Value::I64(1)));
        assert_eq!(cache.get("b").await.unwrap(), None);
        assert_eq!(cache.get("c").await.unwrap(), Some(Value::I64(3)));
    }

    #[tokio::test]
    async fn test_rollback_rejects_oversized_lists() {
        let tmp = TempDir::new().unwrap();
        let cache = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();
        let ops: Vec<RollbackOp> = (0..MAX_ROLLBACK_OPS + 1)
            .map(|i| RollbackOp {
                kind: RollbackKind::Set,
                key: format!("k{i}"),
                previous_value: None,
                previous_ttl: None,
            })
            .collect();
        assert!(cache.rollback(&ops).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_warming_extends_hot_entries_only() {
        let tmp = TempDir::new().unwrap();
        let cache = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();

        cache.set("hot", Value::I64(1), Some(100.0)).await.unwrap();
        cache.set("cold", Value::I64(2), Some(100.0)).await.unwrap();
        for _ in 0..20 {
            cache.get("hot").await.unwrap();
        }

        let extended = cache.run_warming_pass();
        assert_eq!(extended, 1);

        let hot_shard = &cache.shards[cache.shard_index("hot")];
        let map = hot_shard.lock();
        assert!((map.get("hot").unwrap().ttl - 200.0).abs() < f64::EPSILON);
        drop(map);
        let cold_shard = &cache.shards[cache.shard_index("cold")];
        let map = cold_shard.lock();
        assert!((map.get("cold").unwrap().ttl - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_stats_reflect_operations() {
        let tmp = TempDir::new().unwrap();
        let cache = ShardedTTLCache::new(test_config(&tmp)).await.unwrap();

        cache.set("a", Value::I64(1), Some(60.0)).await.unwrap();
        cache.get("a").await.unwrap();
        cache.get("missing").await.unwrap();

        let stats = cache.stats();
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.num_shards, 4);
        assert_eq!(stats.shard_distribution.iter().sum::<usize>(), 1);
    }

    #[tokio::test]
    async fn test_background_loops_start_stop() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp);
        config.cleanup_interval_seconds = 0.02;
        let cache = ShardedTTLCache::new(config).await.unwrap();

        cache.start();
        cache.set("x", Value::I64(1), Some(0.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        // The loop has run at least once and removed the expired entry
        assert!(cache.stats().cleanup_cycles >= 1);
        assert_eq!(cache.size(), 0);

        cache.stop().await.unwrap();
        assert!(!cache.stats().is_running);
    }
}
