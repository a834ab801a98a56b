//! Write-ahead log for cache operations
//!
//! Every mutating cache operation is recorded here before it is applied,
//! so a crash can be recovered by replaying the log. Records are
//! line-delimited JSON with a SHA-256 digest over the record's canonical
//! form; segments rotate by size and are replayed in mtime order.
//!
//! # Durability
//!
//! `log()` does not return until the line has been written, flushed, and
//! fsynced. A failed append is a failed mutation: the caller must not apply
//! the operation to the cache.
//!
//! # Concurrency
//!
//! All public operations serialize on one async mutex. Appends must be
//! ordered and fsync must not race with rotation. Replay is read-only and
//! runs once at startup, before concurrent appends begin.

use sentra_core::{now_epoch, Error, Result, Value};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Operations that can be logged in the WAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOperation {
    /// Install or overwrite an entry
    #[serde(rename = "SET")]
    Set,
    /// Remove an entry
    #[serde(rename = "DELETE")]
    Delete,
    /// Entry dropped by TTL expiry
    #[serde(rename = "EXPIRE")]
    Expire,
}

/// A single record in the write-ahead log
///
/// Serialized as one JSON line. The `checksum` field is a hex SHA-256 over
/// the record's canonical JSON form with `checksum` omitted; a record whose
/// stored digest does not recompute identically is discarded on replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Operation tag
    pub operation: WalOperation,
    /// Cache key
    pub key: String,
    /// Value payload (SET only)
    pub value: Option<Value>,
    /// TTL in seconds (SET only)
    pub ttl: Option<f64>,
    /// Wall-clock seconds since epoch at append time
    pub timestamp: f64,
    /// Integrity digest over all other fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl WalEntry {
    /// Build a SET record stamped with the current time
    pub fn set(key: impl Into<String>, value: Value, ttl: Option<f64>) -> Self {
        WalEntry {
            operation: WalOperation::Set,
            key: key.into(),
            value: Some(value),
            ttl,
            timestamp: now_epoch(),
            checksum: None,
        }
    }

    /// Build a DELETE record stamped with the current time
    pub fn delete(key: impl Into<String>) -> Self {
        WalEntry {
            operation: WalOperation::Delete,
            key: key.into(),
            value: None,
            ttl: None,
            timestamp: now_epoch(),
            checksum: None,
        }
    }

    /// Build an EXPIRE record stamped with the current time
    pub fn expire(key: impl Into<String>) -> Self {
        WalEntry {
            operation: WalOperation::Expire,
            key: key.into(),
            value: None,
            ttl: None,
            timestamp: now_epoch(),
            checksum: None,
        }
    }

    /// Canonical JSON form used for checksumming: all fields except
    /// `checksum`, keys in sorted order
    fn canonical_json(&self) -> String {
        let mut map = serde_json::Map::new();
        map.insert("key".to_string(), serde_json::Value::String(self.key.clone()));
        map.insert(
            "operation".to_string(),
            serde_json::to_value(self.operation).expect("operation tag serializes"),
        );
        map.insert(
            "timestamp".to_string(),
            serde_json::Value::from(self.timestamp),
        );
        map.insert(
            "ttl".to_string(),
            self.ttl
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
        );
        map.insert(
            "value".to_string(),
            self.value
                .clone()
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
        );
        serde_json::Value::Object(map).to_string()
    }

    /// Compute the hex SHA-256 digest over the canonical form
    pub fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify the stored digest against a recomputation
    pub fn verify_checksum(&self) -> bool {
        match &self.checksum {
            Some(stored) => stored == &self.compute_checksum(),
            None => false,
        }
    }
}

/// State guarded by the WAL mutex: the open segment and its size
struct SegmentState {
    file: Option<File>,
    path: PathBuf,
    size: u64,
    /// Timestamp suffix of the current segment; rotation picks a strictly
    /// greater one so segment order matches append order
    segment_ts: u64,
}

/// Write-ahead log over rotated, line-JSON segment files
pub struct WriteAheadLog {
    dir: PathBuf,
    max_segment_bytes: u64,
    state: Mutex<SegmentState>,
}

impl WriteAheadLog {
    /// Open (or create) the WAL directory and point at a fresh segment
    ///
    /// The segment file itself is created lazily on the first append.
    pub async fn new(dir: impl Into<PathBuf>, max_segment_bytes: u64) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let segment_ts = sentra_core::time::now_epoch_secs();
        let path = dir.join(format!("wal_{segment_ts}.log"));
        Ok(WriteAheadLog {
            dir,
            max_segment_bytes,
            state: Mutex::new(SegmentState {
                file: None,
                path,
                size: 0,
                segment_ts,
            }),
        })
    }

    /// Directory holding the WAL segments
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one entry durably
    ///
    /// Computes the integrity digest, rotates the segment if it is at or
    /// over the size limit, writes `<json>\n`, flushes, and fsyncs. Any I/O
    /// failure surfaces as a durability error the caller must treat as a
    /// failed mutation.
    pub async fn log(&self, mut entry: WalEntry) -> Result<()> {
        let mut state = self.state.lock().await;

        // Rotate before writing so a full segment never grows further
        if state.size >= self.max_segment_bytes {
            Self::rotate(&self.dir, &mut state).await?;
        }

        if state.file.is_none() {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&state.path)
                .await
                .map_err(|e| durability_err("open segment", &state.path, &e))?;
            state.size = file
                .metadata()
                .await
                .map(|m| m.len())
                .unwrap_or(state.size);
            state.file = Some(file);
        }

        entry.checksum = Some(entry.compute_checksum());
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let path = state.path.clone();
        let file = state.file.as_mut().expect("segment file opened above");
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| durability_err("append", &path, &e))?;
        file.flush()
            .await
            .map_err(|e| durability_err("flush", &path, &e))?;
        file.sync_all()
            .await
            .map_err(|e| durability_err("fsync", &path, &e))?;

        state.size += line.len() as u64;
        debug!(key = %entry.key, op = ?entry.operation, "wal append");
        Ok(())
    }

    /// Close the current segment and target a new one with a strictly
    /// greater timestamp suffix
    async fn rotate(dir: &Path, state: &mut SegmentState) -> Result<()> {
        if let Some(file) = state.file.take() {
            file.sync_all()
                .await
                .map_err(|e| durability_err("fsync on rotate", &state.path, &e))?;
        }
        let next_ts = sentra_core::time::now_epoch_secs().max(state.segment_ts + 1);
        state.segment_ts = next_ts;
        state.path = dir.join(format!("wal_{next_ts}.log"));
        state.size = 0;
        info!(segment = %state.path.display(), "wal segment rotated");
        Ok(())
    }

    /// List segment files ordered by modification time
    async fn segments(&self) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = reader.next_entry().await? {
            let path = item.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if !name.starts_with("wal_") || !name.ends_with(".log") {
                continue;
            }
            let mtime = item
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            entries.push((mtime, path));
        }
        entries.sort_by_key(|(mtime, _)| *mtime);
        Ok(entries.into_iter().map(|(_, p)| p).collect())
    }

    /// Read and verify one segment, returning its valid entries in order
    ///
    /// Digest mismatches and unparsable lines are skipped with a warning.
    pub async fn read_segment(&self, path: &Path) -> Result<Vec<WalEntry>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(segment = %path.display(), "wal segment not found");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: WalEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        segment = %path.display(),
                        line = line_num + 1,
                        error = %e,
                        "skipping unparsable wal line"
                    );
                    continue;
                }
            };
            if !entry.verify_checksum() {
                warn!(
                    segment = %path.display(),
                    line = line_num + 1,
                    key = %entry.key,
                    "skipping wal line with checksum mismatch"
                );
                continue;
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Replay all segments through the applier, oldest segment first
    ///
    /// The applier must not re-log: it is handed the raw (operation, key,
    /// value, ttl) of each valid record. EXPIRE records are applied as
    /// deletes. Returns the number of successfully applied entries; an
    /// applier failure on one entry is logged and replay continues.
    pub async fn replay(&self, applier: &dyn WalApplier) -> Result<usize> {
        let mut applied = 0usize;
        let mut failed = 0usize;

        for segment in self.segments().await? {
            info!(segment = %segment.display(), "replaying wal segment");
            for entry in self.read_segment(&segment).await? {
                let outcome = match entry.operation {
                    WalOperation::Set => {
                        applier
                            .apply_set(&entry.key, entry.value.unwrap_or(Value::Null), entry.ttl)
                            .await
                    }
                    WalOperation::Delete | WalOperation::Expire => {
                        applier.apply_delete(&entry.key).await
                    }
                };
                match outcome {
                    Ok(()) => applied += 1,
                    Err(e) => {
                        error!(key = %entry.key, error = %e, "wal replay apply failed");
                        failed += 1;
                    }
                }
            }
        }

        info!(applied, failed, "wal replay complete");
        Ok(applied)
    }

    /// Delete segments older than the retention window (by mtime)
    pub async fn cleanup(&self, retention_hours: u64) -> Result<usize> {
        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(retention_hours * 3600);
        let current = self.state.lock().await.path.clone();

        let mut removed = 0usize;
        for segment in self.segments().await? {
            if segment == current {
                continue;
            }
            let mtime = match tokio::fs::metadata(&segment).await.and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if mtime < cutoff {
                match tokio::fs::remove_file(&segment).await {
                    Ok(()) => {
                        info!(segment = %segment.display(), "removed old wal segment");
                        removed += 1;
                    }
                    Err(e) => {
                        error!(segment = %segment.display(), error = %e, "failed to remove wal segment");
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Close the current segment's writer; idempotent
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(file) = state.file.take() {
            file.sync_all()
                .await
                .map_err(|e| durability_err("fsync on close", &state.path, &e))?;
        }
        Ok(())
    }
}

fn durability_err(action: &str, path: &Path, e: &std::io::Error) -> Error {
    Error::Durability(format!("wal {action} on {}: {e}", path.display()))
}

/// Applier handed to [`WriteAheadLog::replay`]
///
/// Implemented by the cache with its `apply_wal_set`/`apply_wal_delete`
/// entry points, which mutate shards without logging again.
#[async_trait::async_trait]
pub trait WalApplier: Send + Sync {
    /// Apply a replayed SET without re-logging
    async fn apply_set(&self, key: &str, value: Value, ttl: Option<f64>) -> Result<()>;
    /// Apply a replayed DELETE or EXPIRE without re-logging
    async fn apply_delete(&self, key: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Applier that records everything into a map, like a miniature cache
    #[derive(Default)]
    struct MapApplier {
        entries: SyncMutex<HashMap<String, (Value, Option<f64>)>>,
        order: SyncMutex<Vec<(WalOperation, String)>>,
    }

    #[async_trait::async_trait]
    impl WalApplier for MapApplier {
        async fn apply_set(&self, key: &str, value: Value, ttl: Option<f64>) -> Result<()> {
            self.entries
                .lock()
                .insert(key.to_string(), (value, ttl));
            self.order
                .lock()
                .push((WalOperation::Set, key.to_string()));
            Ok(())
        }

        async fn apply_delete(&self, key: &str) -> Result<()> {
            self.entries.lock().remove(key);
            self.order
                .lock()
                .push((WalOperation::Delete, key.to_string()));
            Ok(())
        }
    }

    #[test]
    fn test_checksum_round_trip() {
        let mut entry = WalEntry::set("a", Value::I64(1), Some(60.0));
        entry.checksum = Some(entry.compute_checksum());
        assert!(entry.verify_checksum());
    }

    #[test]
    fn test_checksum_detects_tampering() {
        let mut entry = WalEntry::set("a", Value::I64(1), Some(60.0));
        entry.checksum = Some(entry.compute_checksum());
        entry.key = "b".to_string();
        assert!(!entry.verify_checksum());
    }

    #[test]
    fn test_missing_checksum_fails_verification() {
        let entry = WalEntry::delete("a");
        assert!(!entry.verify_checksum());
    }

    #[test]
    fn test_operation_tags_serialize_uppercase() {
        let entry = WalEntry::set("k", Value::Null, None);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"SET\""));
        let json = serde_json::to_string(&WalEntry::delete("k")).unwrap();
        assert!(json.contains("\"DELETE\""));
    }

    #[tokio::test]
    async fn test_log_and_replay_in_order() {
        let tmp = TempDir::new().unwrap();
        let wal = WriteAheadLog::new(tmp.path(), 1024 * 1024).await.unwrap();

        wal.log(WalEntry::set("a", Value::I64(1), Some(60.0)))
            .await
            .unwrap();
        wal.log(WalEntry::set("b", Value::Str("x".into()), Some(60.0)))
            .await
            .unwrap();
        wal.log(WalEntry::delete("a")).await.unwrap();
        wal.close().await.unwrap();

        let applier = MapApplier::default();
        let applied = wal.replay(&applier).await.unwrap();
        assert_eq!(applied, 3);

        let entries = applier.entries.lock();
        assert!(!entries.contains_key("a"));
        assert_eq!(entries.get("b").unwrap().0, Value::Str("x".into()));

        let order = applier.order.lock();
        assert_eq!(
            *order,
            vec![
                (WalOperation::Set, "a".to_string()),
                (WalOperation::Set, "b".to_string()),
                (WalOperation::Delete, "a".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_expire_replays_as_delete() {
        let tmp = TempDir::new().unwrap();
        let wal = WriteAheadLog::new(tmp.path(), 1024 * 1024).await.unwrap();

        wal.log(WalEntry::set("stale", Value::I64(1), Some(0.5)))
            .await
            .unwrap();
        wal.log(WalEntry::expire("stale")).await.unwrap();
        wal.close().await.unwrap();

        let applier = MapApplier::default();
        assert_eq!(wal.replay(&applier).await.unwrap(), 2);
        assert!(!applier.entries.lock().contains_key("stale"));
    }

    #[tokio::test]
    async fn test_corrupt_line_skipped() {
        let tmp = TempDir::new().unwrap();
        let wal = WriteAheadLog::new(tmp.path(), 1024 * 1024).await.unwrap();

        wal.log(WalEntry::set("good", Value::I64(1), None))
            .await
            .unwrap();
        wal.close().await.unwrap();

        // Tamper: append garbage and a record with a bad digest
        let segment = wal.segments().await.unwrap().pop().unwrap();
        let mut content = std::fs::read_to_string(&segment).unwrap();
        content.push_str("{this is not json\n");
        let mut bad = WalEntry::set("evil", Value::I64(2), None);
        bad.checksum = Some("deadbeef".to_string());
        content.push_str(&serde_json::to_string(&bad).unwrap());
        content.push('\n');
        std::fs::write(&segment, content).unwrap();

        let applier = MapApplier::default();
        let applied = wal.replay(&applier).await.unwrap();
        assert_eq!(applied, 1);
        assert!(applier.entries.lock().contains_key("good"));
        assert!(!applier.entries.lock().contains_key("evil"));
    }

    #[tokio::test]
    async fn test_rotation_at_size_limit() {
        let tmp = TempDir::new().unwrap();
        // Tiny limit: every append after the first rotates
        let wal = WriteAheadLog::new(tmp.path(), 64).await.unwrap();

        for i in 0..5 {
            wal.log(WalEntry::set(
                format!("key{i}"),
                Value::Str("padding-padding-padding".into()),
                Some(60.0),
            ))
            .await
            .unwrap();
        }
        wal.close().await.unwrap();

        let segments = wal.segments().await.unwrap();
        assert!(
            segments.len() > 1,
            "expected rotation, got {} segment(s)",
            segments.len()
        );

        // Replay still sees all five sets in order across segments
        let applier = MapApplier::default();
        let applied = wal.replay(&applier).await.unwrap();
        assert_eq!(applied, 5);
        assert_eq!(applier.entries.lock().len(), 5);
    }

    #[tokio::test]
    async fn test_cleanup_retains_recent_segments() {
        let tmp = TempDir::new().unwrap();
        let wal = WriteAheadLog::new(tmp.path(), 1024 * 1024).await.unwrap();
        wal.log(WalEntry::set("a", Value::I64(1), None))
            .await
            .unwrap();
        wal.close().await.unwrap();

        // Everything is fresh, nothing to remove
        let removed = wal.cleanup(24).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(wal.segments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let wal = WriteAheadLog::new(tmp.path(), 1024).await.unwrap();
        wal.log(WalEntry::set("a", Value::I64(1), None))
            .await
            .unwrap();
        wal.close().await.unwrap();
        wal.close().await.unwrap();
    }

    proptest::proptest! {
        #[test]
        fn prop_checksum_round_trips(
            key in "[a-zA-Z0-9_:.-]{1,64}",
            value in proptest::option::of(-1_000_000i64..1_000_000),
            ttl in proptest::option::of(0.0f64..86_400.0),
        ) {
            let mut entry = WalEntry::set(
                key,
                value.map(Value::I64).unwrap_or(Value::Null),
                ttl,
            );
            entry.checksum = Some(entry.compute_checksum());
            proptest::prop_assert!(entry.verify_checksum());

            // Any single-field mutation breaks the digest
            entry.key.push('x');
            proptest::prop_assert!(!entry.verify_checksum());
        }
    }

    #[tokio::test]
    async fn test_missing_directory_created() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("deep/wal");
        let wal = WriteAheadLog::new(&nested, 1024).await.unwrap();
        wal.log(WalEntry::set("a", Value::I64(1), None))
            .await
            .unwrap();
        assert!(nested.exists());
    }
}
