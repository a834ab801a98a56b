//! Wall-clock timestamp helpers
//!
//! Timestamps at persistence boundaries (WAL lines, snapshot metadata,
//! cache entries) are f64 seconds since the Unix epoch, matching the
//! line-JSON formats in §6 of the specification.

use chrono::Utc;

/// Seconds since the Unix epoch, fractional
pub type EpochSeconds = f64;

/// Current wall-clock time as fractional epoch seconds
pub fn now_epoch() -> EpochSeconds {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Current wall-clock time as whole epoch seconds
///
/// Used for timestamped filenames (`wal_<ts>.log`, `cache_snapshot_<ts>.json`).
pub fn now_epoch_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_recent() {
        let t = now_epoch();
        // Well after 2020, well before 2100
        assert!(t > 1_577_836_800.0);
        assert!(t < 4_102_444_800.0);
    }

    #[test]
    fn test_monotonic_enough() {
        let a = now_epoch();
        let b = now_epoch();
        assert!(b >= a);
    }

    #[test]
    fn test_secs_matches_fractional() {
        let secs = now_epoch_secs() as f64;
        let fractional = now_epoch();
        assert!((fractional - secs).abs() < 2.0);
    }
}
