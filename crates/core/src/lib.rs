//! Core types for the Sentra substrate
//!
//! This crate defines the vocabulary shared by every other crate:
//! - `Value`: dynamically typed cache/graph payloads with JSON as the
//!   canonical serialization
//! - `Error`/`Result`: the unified error model (validation, capacity,
//!   durability, integrity, transient, fatal)
//! - Key validation for cache keys
//! - `Config`: all tunable knobs with their defaults, TOML-loadable
//! - Wall-clock timestamp helpers (f64 seconds since epoch)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod key;
pub mod time;
pub mod value;

pub use config::{
    CacheConfig, Config, FeedbackConfig, GraphConfig, ReviewConfig, TransactionConfig,
};
pub use error::{Error, Result};
pub use key::validate_key;
pub use time::{now_epoch, EpochSeconds};
pub use value::Value;
