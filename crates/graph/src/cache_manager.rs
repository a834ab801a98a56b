//! TTL-based staleness control for the in-memory graph
//!
//! The in-memory copy of the knowledge graph is a cache of persistent
//! state. This manager decides when it is stale, collapses concurrent
//! refresh requests behind one mutex, runs the registered refresh
//! callbacks in registration order, and optionally refreshes in the
//! background on a TTL cadence.
//!
//! A refresh that fails leaves the previous in-memory state intact and the
//! `last_refresh` marker unset, so subsequent reads stay stale and retry.

use parking_lot::Mutex as SyncMutex;
use sentra_core::{now_epoch, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Floor for the configurable TTL
const MIN_TTL_SECS: u64 = 60;

/// Backoff after a failed background refresh
const REFRESH_ERROR_BACKOFF_SECS: u64 = 60;

/// Rolling window for the load-time average
const LOAD_TIME_WINDOW: usize = 100;

/// Boxed async refresh callback
pub type RefreshCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Cache-manager statistics
#[derive(Debug, Clone)]
pub struct KGCacheStats {
    /// Refreshes skipped because the cache was still fresh
    pub hit_count: u64,
    /// Refreshes that actually ran
    pub miss_count: u64,
    /// Completed loads
    pub load_count: u64,
    /// Invalidations
    pub invalidation_count: u64,
    /// Last successful refresh, epoch seconds
    pub last_refresh: Option<f64>,
    /// Rolling mean load duration in milliseconds
    pub avg_load_time_ms: f64,
    /// Configured TTL in seconds
    pub ttl_seconds: u64,
    /// Whether the cache is currently stale
    pub is_stale: bool,
    /// Seconds until the cache goes stale (0 when already stale)
    pub time_until_stale_seconds: f64,
}

#[derive(Default)]
struct CacheState {
    last_refresh: Option<f64>,
    hit_count: u64,
    miss_count: u64,
    load_count: u64,
    invalidation_count: u64,
    load_times_ms: Vec<f64>,
}

impl CacheState {
    fn record_load(&mut self, duration_ms: f64) {
        self.load_count += 1;
        self.load_times_ms.push(duration_ms);
        if self.load_times_ms.len() > LOAD_TIME_WINDOW {
            let excess = self.load_times_ms.len() - LOAD_TIME_WINDOW;
            self.load_times_ms.drain(..excess);
        }
    }

    fn avg_load_time_ms(&self) -> f64 {
        if self.load_times_ms.is_empty() {
            0.0
        } else {
            self.load_times_ms.iter().sum::<f64>() / self.load_times_ms.len() as f64
        }
    }
}

/// Manages staleness and refresh of the in-memory knowledge graph
pub struct KGCacheManager {
    ttl_seconds: SyncMutex<u64>,
    state: SyncMutex<CacheState>,
    callbacks: SyncMutex<Vec<RefreshCallback>>,
    /// Collapses concurrent refresh requests: the loser of the race blocks
    /// here, then sees the refreshed state and skips its own refresh
    refresh_lock: Mutex<()>,
    running: Arc<AtomicBool>,
    task: SyncMutex<Option<JoinHandle<()>>>,
}

impl KGCacheManager {
    /// Create a manager with the given TTL (floored at 60 seconds)
    pub fn new(ttl_seconds: u64) -> Self {
        KGCacheManager {
            ttl_seconds: SyncMutex::new(ttl_seconds.max(MIN_TTL_SECS)),
            state: SyncMutex::new(CacheState::default()),
            callbacks: SyncMutex::new(Vec::new()),
            refresh_lock: Mutex::new(()),
            running: Arc::new(AtomicBool::new(false)),
            task: SyncMutex::new(None),
        }
    }

    /// Set the TTL in seconds (floored at 60)
    pub fn set_ttl(&self, seconds: u64) {
        let ttl = seconds.max(MIN_TTL_SECS);
        *self.ttl_seconds.lock() = ttl;
        info!(ttl_seconds = ttl, "kg cache ttl updated");
    }

    /// Current TTL in seconds
    pub fn get_ttl(&self) -> u64 {
        *self.ttl_seconds.lock()
    }

    /// Register a callback invoked on every refresh, in registration order
    ///
    /// The knowledge graph's `reload()` belongs here.
    pub fn register_refresh_callback(&self, callback: RefreshCallback) {
        self.callbacks.lock().push(callback);
        debug!("kg refresh callback registered");
    }

    /// True if never refreshed or the TTL has elapsed
    pub fn is_stale(&self) -> bool {
        let state = self.state.lock();
        match state.last_refresh {
            None => true,
            Some(last) => now_epoch() - last > self.get_ttl() as f64,
        }
    }

    /// Seconds until the cache goes stale; 0 when already stale
    pub fn time_until_stale(&self) -> f64 {
        let state = self.state.lock();
        match state.last_refresh {
            None => 0.0,
            Some(last) => (self.get_ttl() as f64 - (now_epoch() - last)).max(0.0),
        }
    }

    /// Refresh the cache if stale or forced; returns whether a refresh ran
    ///
    /// Concurrent callers serialize on the refresh lock; a caller that
    /// blocked behind a refresh re-checks staleness and skips its own.
    pub async fn refresh(&self, force: bool) -> Result<bool> {
        if !force && !self.is_stale() {
            self.state.lock().hit_count += 1;
            return Ok(false);
        }

        let _guard = self.refresh_lock.lock().await;

        // Double-check after acquiring the lock
        if !force && !self.is_stale() {
            self.state.lock().hit_count += 1;
            return Ok(false);
        }
        self.state.lock().miss_count += 1;

        let callbacks: Vec<RefreshCallback> = self.callbacks.lock().clone();
        let started = std::time::Instant::now();
        for callback in &callbacks {
            callback().await?;
        }
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        {
            let mut state = self.state.lock();
            state.record_load(duration_ms);
            state.last_refresh = Some(now_epoch());
        }
        info!(
            duration_ms,
            callbacks = callbacks.len(),
            "kg cache refreshed"
        );
        Ok(true)
    }

    /// Mark the cache stale immediately
    pub async fn invalidate(&self) {
        let _guard = self.refresh_lock.lock().await;
        let mut state = self.state.lock();
        state.last_refresh = None;
        state.invalidation_count += 1;
        info!("kg cache invalidated");
    }

    /// Start the background refresh loop (sleep TTL, refresh forced)
    pub fn start_background_refresh(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("kg background refresh already running");
            return;
        }
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(manager.get_ttl())).await;
                if !manager.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = manager.refresh(true).await {
                    error!(error = %e, "kg background refresh failed");
                    tokio::time::sleep(Duration::from_secs(REFRESH_ERROR_BACKOFF_SECS)).await;
                }
            }
        });
        *self.task.lock() = Some(handle);
        info!(interval_seconds = self.get_ttl(), "kg background refresh started");
    }

    /// Stop the background refresh loop
    pub fn stop_background_refresh(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            info!("kg background refresh stopped");
        }
    }

    /// Cache-manager statistics
    pub fn stats(&self) -> KGCacheStats {
        let state = self.state.lock();
        KGCacheStats {
            hit_count: state.hit_count,
            miss_count: state.miss_count,
            load_count: state.load_count,
            invalidation_count: state.invalidation_count,
            last_refresh: state.last_refresh,
            avg_load_time_ms: state.avg_load_time_ms(),
            ttl_seconds: self.get_ttl(),
            is_stale: match state.last_refresh {
                None => true,
                Some(last) => now_epoch() - last > self.get_ttl() as f64,
            },
            time_until_stale_seconds: match state.last_refresh {
                None => 0.0,
                Some(last) => (self.get_ttl() as f64 - (now_epoch() - last)).max(0.0),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn counting_callback(counter: Arc<AtomicU64>) -> RefreshCallback {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    fn failing_callback() -> RefreshCallback {
        Arc::new(|| {
            Box::pin(async {
                Err(sentra_core::Error::Transient("backend down".to_string()))
            })
        })
    }

    #[tokio::test]
    async fn test_stale_until_first_refresh() {
        let manager = KGCacheManager::new(300);
        assert!(manager.is_stale());
        assert_eq!(manager.time_until_stale(), 0.0);

        manager.refresh(true).await.unwrap();
        assert!(!manager.is_stale());
        assert!(manager.time_until_stale() > 0.0);
    }

    #[tokio::test]
    async fn test_refresh_skips_when_fresh() {
        let counter = Arc::new(AtomicU64::new(0));
        let manager = KGCacheManager::new(300);
        manager.register_refresh_callback(counting_callback(Arc::clone(&counter)));

        assert!(manager.refresh(false).await.unwrap()); // stale at start
        assert!(!manager.refresh(false).await.unwrap()); // fresh now
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let stats = manager.stats();
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.load_count, 1);
    }

    #[tokio::test]
    async fn test_force_refresh_always_runs() {
        let counter = Arc::new(AtomicU64::new(0));
        let manager = KGCacheManager::new(300);
        manager.register_refresh_callback(counting_callback(Arc::clone(&counter)));

        manager.refresh(true).await.unwrap();
        manager.refresh(true).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_then_stale() {
        let manager = KGCacheManager::new(300);
        manager.refresh(true).await.unwrap();
        assert!(!manager.is_stale());

        manager.invalidate().await;
        assert!(manager.is_stale());
        assert_eq!(manager.stats().invalidation_count, 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_stays_stale() {
        let manager = KGCacheManager::new(300);
        manager.register_refresh_callback(failing_callback());

        assert!(manager.refresh(true).await.is_err());
        // last_refresh was never set, so the cache remains stale and the
        // next read retries
        assert!(manager.is_stale());
        assert_eq!(manager.stats().load_count, 0);
    }

    #[tokio::test]
    async fn test_callbacks_run_in_registration_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let manager = KGCacheManager::new(300);
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            manager.register_refresh_callback(Arc::new(move || {
                let order = Arc::clone(&order);
                Box::pin(async move {
                    order.lock().push(tag);
                    Ok(())
                })
            }));
        }
        manager.refresh(true).await.unwrap();
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_ttl_floor() {
        let manager = KGCacheManager::new(1);
        assert_eq!(manager.get_ttl(), 60);
        manager.set_ttl(10);
        assert_eq!(manager.get_ttl(), 60);
        manager.set_ttl(600);
        assert_eq!(manager.get_ttl(), 600);
    }

    #[tokio::test]
    async fn test_background_refresh_start_stop() {
        let manager = Arc::new(KGCacheManager::new(300));
        manager.start_background_refresh();
        // Double start warns but does not spawn twice
        manager.start_background_refresh();
        manager.stop_background_refresh();
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_collapse() {
        let counter = Arc::new(AtomicU64::new(0));
        let manager = Arc::new(KGCacheManager::new(300));
        manager.register_refresh_callback(counting_callback(Arc::clone(&counter)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.refresh(false).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        // Exactly one refresh ran; the rest saw fresh state
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
