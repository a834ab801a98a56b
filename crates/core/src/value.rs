//! Dynamically typed payloads
//!
//! Cache values, graph properties, and feedback metadata are all dynamic in
//! the surrounding platform. `Value` is the tagged variant that carries
//! them: primitives, arrays, and string-keyed maps, with plain JSON as the
//! canonical serialization. Anything JSON cannot express (functions,
//! futures) is unrepresentable at this boundary by construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unified dynamic value for cache payloads and property maps
///
/// Serializes as plain JSON (`42`, `"x"`, `[1,2]`, `{"k":true}`), so WAL
/// lines and snapshot files stay readable and interoperable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    I64(i64),
    /// 64-bit floating point
    F64(f64),
    /// UTF-8 string
    Str(String),
    /// Array of values
    Array(Vec<Value>),
    /// Map of string keys to values (ordered for stable serialization)
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Estimate the in-memory footprint of this value in bytes
    ///
    /// Used by the memory manager for sampled bounds estimation. The figure
    /// counts payload bytes plus a small per-node overhead; it does not try
    /// to be allocator-exact.
    pub fn approx_size(&self) -> usize {
        const NODE_OVERHEAD: usize = 16;
        NODE_OVERHEAD
            + match self {
                Value::Null | Value::Bool(_) => 0,
                Value::I64(_) | Value::F64(_) => 8,
                Value::Str(s) => s.len(),
                Value::Array(items) => items.iter().map(Value::approx_size).sum(),
                Value::Map(map) => map
                    .iter()
                    .map(|(k, v)| k.len() + v.approx_size())
                    .sum(),
            }
    }

    /// True for `Value::Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the string payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric payload widened to f64, if numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(n) => Some(*n as f64),
            Value::F64(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::I64(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::F64(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::I64(i)
                } else {
                    Value::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::I64(n) => serde_json::Value::from(n),
            Value::F64(n) => serde_json::Value::from(n),
            Value::Str(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}
