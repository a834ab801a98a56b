//! Cache health checks
//!
//! Four probes, each mapping to a verdict:
//! - bounds: entry count and estimated memory inside configured limits
//! - balance: no shard holds more than three times the per-shard mean
//! - liveness: the background cleanup loop has been started and is running
//! - functionality: a synthetic set/get/delete round-trips
//!
//! The report's overall status is the worst individual verdict:
//! Healthy < Warning < Error < Critical.

use crate::sharded::{Shard, ShardedTTLCache};
use sentra_core::Value;
use std::sync::atomic::Ordering;
use uuid::Uuid;

/// Health verdict, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// All probes passed
    Healthy,
    /// Degraded but serving (imbalance, loops not yet started)
    Warning,
    /// A correctness-relevant probe failed (bounds exceeded)
    Error,
    /// The cache cannot serve a basic round-trip
    Critical,
}

/// One probe's outcome
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Probe name: bounds, balance, liveness, functionality
    pub name: &'static str,
    /// Probe verdict
    pub status: HealthStatus,
    /// Human-readable detail
    pub detail: String,
}

/// Aggregated health report
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Worst individual verdict
    pub status: HealthStatus,
    /// Individual probe outcomes
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Whether the overall verdict is Healthy
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

impl ShardedTTLCache {
    /// Run all health probes and aggregate the worst verdict
    pub async fn health_check(&self) -> HealthReport {
        let mut checks = Vec::with_capacity(4);
        checks.push(self.check_bounds_probe());
        checks.push(self.check_balance_probe());
        checks.push(self.check_liveness_probe());
        checks.push(self.check_functionality_probe().await);

        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        HealthReport { status, checks }
    }

    fn check_bounds_probe(&self) -> HealthCheck {
        let size = self.size();
        if self.memory.check_bounds(&self.shards, size) {
            HealthCheck {
                name: "bounds",
                status: HealthStatus::Healthy,
                detail: format!("{size} entries within bounds"),
            }
        } else {
            HealthCheck {
                name: "bounds",
                status: HealthStatus::Error,
                detail: format!(
                    "{size} entries exceed bounds (max {})",
                    self.memory.max_entries()
                ),
            }
        }
    }

    fn check_balance_probe(&self) -> HealthCheck {
        let counts: Vec<usize> = self.shards.iter().map(Shard::len).collect();
        let total: usize = counts.iter().sum();
        if total < counts.len() * 4 {
            // Too little data for imbalance to mean anything
            return HealthCheck {
                name: "balance",
                status: HealthStatus::Healthy,
                detail: format!("{total} entries across {} shards", counts.len()),
            };
        }
        let mean = total as f64 / counts.len() as f64;
        let max = *counts.iter().max().unwrap_or(&0);
        if (max as f64) > mean * 3.0 {
            HealthCheck {
                name: "balance",
                status: HealthStatus::Warning,
                detail: format!("largest shard {max} exceeds 3x mean {mean:.1}"),
            }
        } else {
            HealthCheck {
                name: "balance",
                status: HealthStatus::Healthy,
                detail: format!("largest shard {max}, mean {mean:.1}"),
            }
        }
    }

    fn check_liveness_probe(&self) -> HealthCheck {
        if self.running.load(Ordering::SeqCst) {
            HealthCheck {
                name: "liveness",
                status: HealthStatus::Healthy,
                detail: format!(
                    "cleanup loop running, {} cycles",
                    self.metrics.cleanup_cycles.load(Ordering::Relaxed)
                ),
            }
        } else {
            HealthCheck {
                name: "liveness",
                status: HealthStatus::Warning,
                detail: "background loops not running".to_string(),
            }
        }
    }

    async fn check_functionality_probe(&self) -> HealthCheck {
        let key = format!("__health_check_{}", Uuid::new_v4().simple());
        let expected = Value::Str("ok".to_string());

        let outcome = async {
            self.set(&key, expected.clone(), Some(60.0)).await?;
            let read = self.get(&key).await?;
            self.delete(&key).await?;
            Ok::<_, sentra_core::Error>(read)
        }
        .await;

        match outcome {
            Ok(Some(read)) if read == expected => HealthCheck {
                name: "functionality",
                status: HealthStatus::Healthy,
                detail: "synthetic round-trip ok".to_string(),
            },
            Ok(other) => HealthCheck {
                name: "functionality",
                status: HealthStatus::Critical,
                detail: format!("round-trip returned unexpected value: {other:?}"),
            },
            Err(e) => HealthCheck {
                name: "functionality",
                status: HealthStatus::Critical,
                detail: format!("round-trip failed: {e}"),
            },
        }
    }
}
