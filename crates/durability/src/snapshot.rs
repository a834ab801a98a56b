//! Point-in-time JSON snapshots of the cache
//!
//! A snapshot is one JSON document: a `_metadata` header (creation time,
//! live-entry count, schema version) plus one `shard_<n>` map per shard.
//! Only live entries are included. Snapshots are written to
//! `cache_snapshot_<timestamp>.json` under a dedicated directory and pruned
//! by age.
//!
//! Restore is defensive: the document shape, metadata types, and timestamp
//! are all validated, a snapshot older than one hour is refused, and
//! unknown top-level keys are skipped with a warning rather than failing
//! the whole restore.

use sentra_core::{now_epoch, Error, Result, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Schema version written into snapshot metadata
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Maximum age a snapshot may have and still be restored (seconds)
pub const MAX_RESTORE_AGE_SECS: f64 = 3600.0;

/// One cache entry as persisted in a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    /// Value payload
    pub data: Value,
    /// Entry creation timestamp (epoch seconds)
    pub timestamp: f64,
    /// Entry TTL in seconds
    pub ttl: f64,
}

/// A parsed snapshot: metadata plus per-shard entry maps
#[derive(Debug, Clone)]
pub struct SnapshotDocument {
    /// Creation timestamp from `_metadata`
    pub created_at: f64,
    /// Live-entry count from `_metadata`
    pub total_entries: usize,
    /// Schema version from `_metadata`
    pub version: String,
    /// Entries keyed by shard index
    pub shards: BTreeMap<usize, BTreeMap<String, SnapshotEntry>>,
}

/// Listing metadata for one snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    /// Full path of the snapshot file
    pub path: PathBuf,
    /// Creation timestamp parsed from the filename
    pub created_at: u64,
    /// Entry count read from the file's metadata (0 if unreadable)
    pub total_entries: usize,
    /// File size in bytes
    pub size_bytes: u64,
}

/// Creates, restores, lists, and prunes cache snapshots
pub struct PersistenceManager {
    dir: PathBuf,
}

impl PersistenceManager {
    /// Open (or create) the snapshot directory
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(PersistenceManager { dir })
    }

    /// Snapshot directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialize a per-shard view to a timestamped file
    ///
    /// The caller passes only live entries; `_metadata.total_entries` is
    /// computed from the view. Returns the path of the written file.
    pub async fn snapshot(
        &self,
        shards: &[BTreeMap<String, SnapshotEntry>],
    ) -> Result<PathBuf> {
        let created_at = now_epoch();
        let total_entries: usize = shards.iter().map(|s| s.len()).sum();

        let mut doc = serde_json::Map::new();
        let mut metadata = serde_json::Map::new();
        metadata.insert("created_at".to_string(), serde_json::Value::from(created_at));
        metadata.insert(
            "total_entries".to_string(),
            serde_json::Value::from(total_entries),
        );
        metadata.insert(
            "version".to_string(),
            serde_json::Value::from(SNAPSHOT_VERSION),
        );
        doc.insert("_metadata".to_string(), serde_json::Value::Object(metadata));

        for (index, shard) in shards.iter().enumerate() {
            let mut shard_map = serde_json::Map::new();
            for (key, entry) in shard {
                let mut obj = serde_json::Map::new();
                obj.insert("data".to_string(), entry.data.clone().into());
                obj.insert(
                    "timestamp".to_string(),
                    serde_json::Value::from(entry.timestamp),
                );
                obj.insert("ttl".to_string(), serde_json::Value::from(entry.ttl));
                shard_map.insert(key.clone(), serde_json::Value::Object(obj));
            }
            doc.insert(
                format!("shard_{index}"),
                serde_json::Value::Object(shard_map),
            );
        }

        let filename = format!("cache_snapshot_{}.json", created_at as u64);
        let path = self.dir.join(filename);
        let text = serde_json::to_string_pretty(&serde_json::Value::Object(doc))?;
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| Error::Durability(format!("snapshot write {}: {e}", path.display())))?;

        info!(path = %path.display(), total_entries, "created cache snapshot");
        Ok(path)
    }

    /// Read and validate a snapshot file
    pub async fn restore(&self, path: &Path) -> Result<SnapshotDocument> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Validation(format!(
                    "snapshot file not found: {}",
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let raw: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| Error::Integrity(format!("invalid snapshot JSON: {e}")))?;

        let obj = raw
            .as_object()
            .ok_or_else(|| Error::Integrity("snapshot must be an object".to_string()))?;

        let metadata = obj
            .get("_metadata")
            .and_then(|m| m.as_object())
            .ok_or_else(|| Error::Integrity("snapshot missing metadata".to_string()))?;

        let created_at = metadata
            .get("created_at")
            .and_then(|v| v.as_f64())
            .filter(|t| *t > 0.0)
            .ok_or_else(|| Error::Integrity("invalid snapshot created_at".to_string()))?;

        let total_entries = metadata
            .get("total_entries")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::Integrity("invalid snapshot total_entries".to_string()))?
            as usize;

        let version = metadata
            .get("version")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Integrity("invalid snapshot version".to_string()))?
            .to_string();

        let age = now_epoch() - created_at;
        if age < 0.0 {
            return Err(Error::Integrity(format!(
                "snapshot timestamp is in the future (age {age:.0}s)"
            )));
        }
        if age > MAX_RESTORE_AGE_SECS {
            return Err(Error::Integrity(format!(
                "snapshot too old for restore: {age:.0}s (max {MAX_RESTORE_AGE_SECS:.0}s)"
            )));
        }

        let mut shards = BTreeMap::new();
        for (key, value) in obj {
            if key == "_metadata" {
                continue;
            }
            let index = match key.strip_prefix("shard_").and_then(|n| n.parse::<usize>().ok()) {
                Some(index) => index,
                None => {
                    warn!(key = %key, "skipping unknown key in snapshot");
                    continue;
                }
            };
            let shard_obj = value.as_object().ok_or_else(|| {
                Error::Integrity(format!("invalid shard data format for {key}"))
            })?;

            let mut entries = BTreeMap::new();
            for (entry_key, entry_value) in shard_obj {
                let entry_obj = entry_value.as_object().ok_or_else(|| {
                    Error::Integrity(format!("invalid entry format for {entry_key}"))
                })?;
                let data = entry_obj
                    .get("data")
                    .cloned()
                    .ok_or_else(|| Error::Integrity(format!("entry {entry_key} missing data")))?;
                let timestamp = entry_obj
                    .get("timestamp")
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| {
                        Error::Integrity(format!("entry {entry_key} missing timestamp"))
                    })?;
                let ttl = entry_obj
                    .get("ttl")
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| Error::Integrity(format!("entry {entry_key} missing ttl")))?;
                entries.insert(
                    entry_key.clone(),
                    SnapshotEntry {
                        data: Value::from(data),
                        timestamp,
                        ttl,
                    },
                );
            }
            shards.insert(index, entries);
        }

        info!(path = %path.display(), total_entries, "loaded snapshot");
        Ok(SnapshotDocument {
            created_at,
            total_entries,
            version,
            shards,
        })
    }

    /// Enumerate snapshot files, newest first
    pub async fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let mut snapshots = Vec::new();
        let mut reader = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = reader.next_entry().await? {
            let path = item.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            let created_at = match name
                .strip_prefix("cache_snapshot_")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|ts| ts.parse::<u64>().ok())
            {
                Some(ts) => ts,
                None => continue,
            };
            let size_bytes = item.metadata().await.map(|m| m.len()).unwrap_or(0);

            // Best effort: pull the entry count out of the header
            let total_entries = tokio::fs::read_to_string(&path)
                .await
                .ok()
                .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
                .and_then(|doc| {
                    doc.get("_metadata")
                        .and_then(|m| m.get("total_entries"))
                        .and_then(|n| n.as_u64())
                })
                .unwrap_or(0) as usize;

            snapshots.push(SnapshotInfo {
                path,
                created_at,
                total_entries,
                size_bytes,
            });
        }
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(snapshots)
    }

    /// Delete snapshots older than `max_age_seconds`
    pub async fn cleanup(&self, max_age_seconds: u64) -> Result<usize> {
        let now = sentra_core::time::now_epoch_secs();
        let mut removed = 0usize;
        for info in self.list().await? {
            if now.saturating_sub(info.created_at) > max_age_seconds {
                match tokio::fs::remove_file(&info.path).await {
                    Ok(()) => {
                        info!(path = %info.path.display(), "removed old snapshot");
                        removed += 1;
                    }
                    Err(e) => {
                        warn!(path = %info.path.display(), error = %e, "failed to remove snapshot");
                    }
                }
            }
        }
        Ok(removed)
    }
}
