//! Configuration for the substrate
//!
//! Every knob in §6 of the specification lives here with its default.
//! Sections deserialize from TOML (`Config::from_toml_str`) and can also be
//! assembled in code with the `with_*` builders. Paranoia mode clamps the
//! cache bounds to conservative defaults at construction time.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Entry-count cap applied when paranoia mode is on
pub const PARANOIA_MAX_ENTRIES: usize = 10_000;
/// Memory cap in MB applied when paranoia mode is on
pub const PARANOIA_MAX_MEMORY_MB: usize = 10;

/// Cache section (`cache.*` knobs)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default entry TTL in seconds
    pub ttl_seconds: f64,
    /// Cleanup-loop period in seconds
    pub cleanup_interval_seconds: f64,
    /// Shard count, selected at startup
    pub num_shards: usize,
    /// Entry-count bound
    pub max_entries: usize,
    /// Estimated-memory bound in MB
    pub max_memory_mb: usize,
    /// Turn WAL durability on or off
    pub enable_wal: bool,
    /// WAL segment directory
    pub wal_path: PathBuf,
    /// Segment rotation threshold in bytes
    pub wal_max_segment_bytes: u64,
    /// WAL segment retention in hours
    pub wal_retention_hours: u64,
    /// Lower bounds to conservative defaults
    pub paranoia_mode: bool,
    /// Snapshot directory
    pub snapshot_dir: PathBuf,
    /// Snapshot retention in seconds
    pub snapshot_max_age_seconds: u64,
    /// Adaptive-TTL warming loop period in seconds
    pub warming_interval_seconds: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl_seconds: 300.0,
            cleanup_interval_seconds: 30.0,
            num_shards: 16,
            max_entries: 100_000,
            max_memory_mb: 100,
            enable_wal: false,
            wal_path: PathBuf::from("./data/wal"),
            wal_max_segment_bytes: 10 * 1024 * 1024,
            wal_retention_hours: 24,
            paranoia_mode: false,
            snapshot_dir: PathBuf::from("./data/snapshots"),
            snapshot_max_age_seconds: 86_400,
            warming_interval_seconds: 300.0,
        }
    }
}

impl CacheConfig {
    /// Effective entry bound after paranoia clamping
    pub fn effective_max_entries(&self) -> usize {
        if self.paranoia_mode {
            self.max_entries.min(PARANOIA_MAX_ENTRIES)
        } else {
            self.max_entries
        }
    }

    /// Effective memory bound after paranoia clamping
    pub fn effective_max_memory_mb(&self) -> usize {
        if self.paranoia_mode {
            self.max_memory_mb.min(PARANOIA_MAX_MEMORY_MB)
        } else {
            self.max_memory_mb
        }
    }

    /// Validate the section
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(Error::Validation("cache.num_shards must be > 0".into()));
        }
        if self.max_entries == 0 {
            return Err(Error::Validation("cache.max_entries must be > 0".into()));
        }
        if self.ttl_seconds < 0.0 {
            return Err(Error::Validation(
                "cache.ttl_seconds cannot be negative".into(),
            ));
        }
        if self.wal_max_segment_bytes < 1024 {
            return Err(Error::Validation(
                "cache.wal_max_segment_bytes must be at least 1KB".into(),
            ));
        }
        Ok(())
    }
}

/// Transaction section (`transactions.*` knobs)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Concurrent active-transaction cap
    pub max_active: usize,
    /// Transaction expiration in seconds
    pub timeout_seconds: f64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        TransactionConfig {
            max_active: 1000,
            timeout_seconds: 300.0,
        }
    }
}

/// Feedback section (`feedback.*` knobs)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Rerank weight in [0, 1]
    pub weight: f64,
    /// Directory for the feedback store
    pub dir: PathBuf,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        FeedbackConfig {
            weight: 0.3,
            dir: PathBuf::from("./data/feedback"),
        }
    }
}

/// Review-queue section (`review.*` knobs)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Review items auto-expire after this many days
    pub max_age_days: u64,
    /// Directory for the review store
    pub dir: PathBuf,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        ReviewConfig {
            max_age_days: 7,
            dir: PathBuf::from("./data/reviews"),
        }
    }
}

/// Knowledge-graph section (`kg.*` knobs)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// In-memory graph refresh period in seconds
    pub cache_ttl_seconds: u64,
    /// Delta-sync period in seconds
    pub sync_interval_seconds: u64,
    /// Directory for graph persistence
    pub dir: PathBuf,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            cache_ttl_seconds: 300,
            sync_interval_seconds: 60,
            dir: PathBuf::from("./data/kg"),
        }
    }
}

/// Top-level configuration tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache and durability knobs
    pub cache: CacheConfig,
    /// Transaction-manager knobs
    pub transactions: TransactionConfig,
    /// Feedback reranking knobs
    pub feedback: FeedbackConfig,
    /// Review-queue knobs
    pub review: ReviewConfig,
    /// Knowledge-graph knobs
    pub kg: GraphConfig,
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| Error::Validation(format!("bad config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        if !(0.0..=1.0).contains(&self.feedback.weight) {
            return Err(Error::Validation(
                "feedback.weight must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Root all data directories under one base path
    ///
    /// Produces the persisted-state layout: `wal/`, `snapshots/`,
    /// `feedback/`, `reviews/`, `kg/` under the base directory.
    pub fn with_data_dir(mut self, base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        self.cache.wal_path = base.join("wal");
        self.cache.snapshot_dir = base.join("snapshots");
        self.feedback.dir = base.join("feedback");
        self.review.dir = base.join("reviews");
        self.kg.dir = base.join("kg");
        self
    }

    /// Enable or disable WAL durability
    pub fn with_wal(mut self, enabled: bool) -> Self {
        self.cache.enable_wal = enabled;
        self
    }

    /// Set the shard count
    pub fn with_num_shards(mut self, shards: usize) -> Self {
        self.cache.num_shards = shards;
        self
    }

    /// Set the entry-count bound
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.cache.max_entries = max;
        self
    }

    /// Configuration tuned for tests: few shards, small segments, fast loops
    pub fn for_testing(base: impl Into<PathBuf>) -> Self {
        let mut config = Config::default().with_data_dir(base);
        config.cache.num_shards = 4;
        config.cache.cleanup_interval_seconds = 0.05;
        config.cache.warming_interval_seconds = 0.05;
        config.cache.wal_max_segment_bytes = 64 * 1024;
        config.kg.cache_ttl_seconds = 60;
        config.kg.sync_interval_seconds = 60;
        config
    }
}
