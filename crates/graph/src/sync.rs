//! Incremental synchronization with the external scheduler
//!
//! The scheduler is the source of truth for jobs, streams, workstations,
//! and resources. Rather than reloading everything each cycle, the sync
//! manager keeps a watermark and a fingerprint of every entity it has
//! seen, computes a delta per cycle, and hands the resulting
//! Create/Update/Delete changes to registered callbacks (which typically
//! upsert into the knowledge graph).
//!
//! The watermark only advances when a delta computation succeeds; a failed
//! cycle leaves it untouched so the next cycle retries the same window.
//! Callback failures are isolated: one failing callback is logged and the
//! remaining callbacks still receive the same change set.

use parking_lot::Mutex as SyncMutex;
use rustc_hash::FxHashMap;
use sentra_core::{now_epoch, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What happened to an entity since the last sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    /// Entity appeared
    Create,
    /// Entity's properties changed
    Update,
    /// Entity disappeared
    Delete,
}

/// One observed delta against the external scheduler
#[derive(Debug, Clone)]
pub struct SyncChange {
    /// What happened
    pub change_type: ChangeType,
    /// Entity kind (job, job_stream, workstation, resource, ...)
    pub entity_kind: String,
    /// Entity id
    pub entity_id: String,
    /// New property view (None for deletes)
    pub properties: Option<serde_json::Value>,
    /// Previous property view (None for creates)
    pub previous: Option<serde_json::Value>,
}

/// One entity as observed in the external scheduler
#[derive(Debug, Clone)]
pub struct EntityRecord {
    /// Entity kind
    pub kind: String,
    /// Entity id, unique within the snapshot
    pub id: String,
    /// Current property view
    pub properties: serde_json::Value,
    /// Last modification time, epoch seconds
    pub modified_at: f64,
}

/// Seam to the external scheduler
///
/// The core never speaks the scheduler's wire protocol; an adapter
/// implements this trait and returns the currently observable entities.
#[async_trait::async_trait]
pub trait SchedulerSource: Send + Sync {
    /// Snapshot of all currently observable entities
    async fn snapshot(&self) -> Result<Vec<EntityRecord>>;
}

/// Boxed async sync callback
pub type SyncCallback =
    Arc<dyn Fn(Vec<SyncChange>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Sync statistics
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed sync cycles
    pub cycles: u64,
    /// Creates observed
    pub creates: u64,
    /// Updates observed
    pub updates: u64,
    /// Deletes observed
    pub deletes: u64,
    /// Failed cycles
    pub failures: u64,
    /// Last successful cycle, epoch seconds
    pub last_sync: Option<f64>,
    /// Duration of the last successful cycle in milliseconds
    pub last_sync_duration_ms: f64,
}

struct SyncState {
    /// Monotonically advancing watermark; None until the first full sync
    watermark: Option<f64>,
    /// Last observed (kind, id) -> property fingerprint
    seen: FxHashMap<(String, String), String>,
    stats: SyncStats,
}

/// Periodic delta sync between the scheduler and the knowledge graph
pub struct KGSyncManager {
    source: Arc<dyn SchedulerSource>,
    callbacks: SyncMutex<Vec<SyncCallback>>,
    state: tokio::sync::Mutex<SyncState>,
    interval_seconds: u64,
    running: Arc<AtomicBool>,
    task: SyncMutex<Option<JoinHandle<()>>>,
}

impl KGSyncManager {
    /// Create a manager over a scheduler source
    pub fn new(source: Arc<dyn SchedulerSource>, interval_seconds: u64) -> Self {
        KGSyncManager {
            source,
            callbacks: SyncMutex::new(Vec::new()),
            state: tokio::sync::Mutex::new(SyncState {
                watermark: None,
                seen: FxHashMap::default(),
                stats: SyncStats::default(),
            }),
            interval_seconds: interval_seconds.max(1),
            running: Arc::new(AtomicBool::new(false)),
            task: SyncMutex::new(None),
        }
    }

    /// Register a callback invoked with each non-empty change set
    pub fn register_callback(&self, callback: SyncCallback) {
        self.callbacks.lock().push(callback);
    }

    /// Run one sync cycle now; returns the observed changes
    ///
    /// With no watermark (cold start) every observed entity is a Create.
    /// Afterwards: new ids are Creates, ids with a changed fingerprint or a
    /// modification time past the watermark are Updates, and ids that
    /// disappeared are Deletes.
    pub async fn sync_now(&self) -> Result<Vec<SyncChange>> {
        let mut state = self.state.lock().await;
        let started = std::time::Instant::now();

        let records = match self.source.snapshot().await {
            Ok(records) => records,
            Err(e) => {
                state.stats.failures += 1;
                error!(error = %e, "scheduler snapshot failed; watermark unchanged");
                return Err(e);
            }
        };

        let mut changes = Vec::new();
        let mut next_seen: FxHashMap<(String, String), String> = FxHashMap::default();

        for record in &records {
            let key = (record.kind.clone(), record.id.clone());
            let fingerprint = record.properties.to_string();
            match state.seen.get(&key) {
                None => {
                    changes.push(SyncChange {
                        change_type: ChangeType::Create,
                        entity_kind: record.kind.clone(),
                        entity_id: record.id.clone(),
                        properties: Some(record.properties.clone()),
                        previous: None,
                    });
                }
                Some(previous_fingerprint) => {
                    let modified_past_watermark = state
                        .watermark
                        .map_or(false, |watermark| record.modified_at > watermark);
                    if *previous_fingerprint != fingerprint || modified_past_watermark {
                        changes.push(SyncChange {
                            change_type: ChangeType::Update,
                            entity_kind: record.kind.clone(),
                            entity_id: record.id.clone(),
                            properties: Some(record.properties.clone()),
                            previous: serde_json::from_str(previous_fingerprint).ok(),
                        });
                    }
                }
            }
            next_seen.insert(key, fingerprint);
        }

        for ((kind, id), previous_fingerprint) in &state.seen {
            if !next_seen.contains_key(&(kind.clone(), id.clone())) {
                changes.push(SyncChange {
                    change_type: ChangeType::Delete,
                    entity_kind: kind.clone(),
                    entity_id: id.clone(),
                    properties: None,
                    previous: serde_json::from_str(previous_fingerprint).ok(),
                });
            }
        }

        // Delta computed successfully: advance the watermark and the
        // fingerprint map before running callbacks
        state.seen = next_seen;
        state.watermark = Some(now_epoch());

        if !changes.is_empty() {
            let callbacks: Vec<SyncCallback> = self.callbacks.lock().clone();
            for callback in &callbacks {
                if let Err(e) = callback(changes.clone()).await {
                    // One callback failing must not starve the others
                    warn!(error = %e, "sync callback failed");
                }
            }
        }

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        state.stats.cycles += 1;
        state.stats.last_sync = state.watermark;
        state.stats.last_sync_duration_ms = duration_ms;
        for change in &changes {
            match change.change_type {
                ChangeType::Create => state.stats.creates += 1,
                ChangeType::Update => state.stats.updates += 1,
                ChangeType::Delete => state.stats.deletes += 1,
            }
        }

        info!(
            changes = changes.len(),
            duration_ms,
            "sync cycle complete"
        );
        Ok(changes)
    }

    /// Start the background sync loop
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("kg sync already running");
            return;
        }
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(manager.interval_seconds)).await;
                if !manager.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = manager.sync_now().await {
                    error!(error = %e, "background sync cycle failed");
                }
            }
        });
        *self.task.lock() = Some(handle);
        info!(interval_seconds = self.interval_seconds, "kg sync started");
    }

    /// Stop the background sync loop
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            info!("kg sync stopped");
        }
    }

    /// Sync statistics
    pub async fn stats(&self) -> SyncStats {
        self.state.lock().await.stats.clone()
    }
}
