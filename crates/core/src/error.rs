//! Error types for the Sentra substrate
//!
//! One unified error enum is used across all crates so that callers can
//! route on the *kind* of failure rather than its origin:
//!
//! - **Validation**: malformed input, rejected synchronously, never logged
//!   at error level
//! - **Capacity**: configured bounds would be exceeded even after eviction
//! - **Durability**: a WAL append, fsync, or snapshot write failed; the
//!   attempted mutation was not applied
//! - **Integrity**: a persisted record failed its digest or shape check;
//!   logged as a warning and skipped, never raised to API callers
//! - **Transient**: an upstream dependency hiccuped; secondary work degrades
//!   gracefully while the primary path proceeds
//! - **Fatal**: an unexpected failure in a background loop, surfaced so a
//!   supervisor can restart the loop

use std::io;
use thiserror::Error;

/// Result type alias for Sentra operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the substrate
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed key, forbidden characters, bad TTL, unusable value,
    /// unknown relation type
    #[error("validation failed: {0}")]
    Validation(String),

    /// Cache or transaction bounds would be exceeded
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// WAL append, fsync, or snapshot write failed; mutation not applied
    #[error("durability failure: {0}")]
    Durability(String),

    /// Digest mismatch or malformed persisted record
    #[error("integrity failure: {0}")]
    Integrity(String),

    /// Upstream timeout or transient dependency failure
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unexpected failure in a background loop
    #[error("fatal subsystem error in {subsystem}: {message}")]
    Fatal {
        /// Which background subsystem failed
        subsystem: &'static str,
        /// Failure description
        message: String,
    },

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Embedded store (sqlite) error
    #[error("store error: {0}")]
    Store(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Check whether this error is an input-validation rejection
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Check whether this error is a bounded-capacity rejection
    pub fn is_capacity(&self) -> bool {
        matches!(self, Error::Capacity(_))
    }

    /// Check whether this error is a durability failure
    ///
    /// Durability failures mean the attempted mutation was not applied.
    pub fn is_durability(&self) -> bool {
        matches!(self, Error::Durability(_) | Error::Io(_))
    }

    /// Check whether this error is transient and the caller's primary path
    /// may proceed without it
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Wrap a background-loop failure as a fatal subsystem error
    pub fn fatal(subsystem: &'static str, message: impl Into<String>) -> Self {
        Error::Fatal {
            subsystem,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_validation() {
        let err = Error::Validation("cache key cannot be empty".to_string());
        assert!(err.to_string().contains("validation failed"));
        assert!(err.is_validation());
        assert!(!err.is_capacity());
    }

    #[test]
    fn test_display_capacity() {
        let err = Error::Capacity("max_entries=3 exceeded".to_string());
        assert!(err.to_string().contains("capacity exceeded"));
        assert!(err.is_capacity());
    }

    #[test]
    fn test_io_is_durability() {
        let err = Error::Io(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert!(err.is_durability());
    }

    #[test]
    fn test_fatal_names_subsystem() {
        let err = Error::fatal("cache-cleanup", "panicked");
        assert!(err.to_string().contains("cache-cleanup"));
    }

    #[test]
    fn test_from_serde_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
