//! Cache key validation
//!
//! Keys are plain strings with hard limits: non-empty, at most 1000
//! characters, no NUL bytes and no CR/LF control characters. Every cache
//! entry point validates before touching a shard, so invalid keys surface
//! as `Error::Validation` and never reach the WAL.

use crate::error::{Error, Result};

/// Maximum allowed key length in characters
pub const MAX_KEY_LEN: usize = 1000;

/// Validate a cache key, returning it unchanged on success
pub fn validate_key(key: &str) -> Result<&str> {
    if key.is_empty() {
        return Err(Error::Validation("cache key cannot be empty".to_string()));
    }
    let char_count = key.chars().count();
    if char_count > MAX_KEY_LEN {
        return Err(Error::Validation(format!(
            "cache key too long: {} characters (max {})",
            char_count, MAX_KEY_LEN
        )));
    }
    if key.contains('\0') || key.contains('\r') || key.contains('\n') {
        return Err(Error::Validation(
            "cache key cannot contain control characters".to_string(),
        ));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_key() {
        assert!(validate_key("user:123:session").is_ok());
    }

    #[test]
    fn test_empty_key_rejected() {
        let err = validate_key("").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_max_length_boundary() {
        let key = "k".repeat(MAX_KEY_LEN);
        assert!(validate_key(&key).is_ok());
        let too_long = "k".repeat(MAX_KEY_LEN + 1);
        assert!(validate_key(&too_long).unwrap_err().is_validation());
    }

    #[test]
    fn test_control_characters_rejected() {
        for bad in ["a\0b", "a\rb", "a\nb"] {
            assert!(validate_key(bad).unwrap_err().is_validation());
        }
    }

    #[test]
    fn test_unicode_counts_characters_not_bytes() {
        // 500 two-byte characters is still 500 characters
        let key = "é".repeat(500);
        assert!(validate_key(&key).is_ok());
    }

    proptest::proptest! {
        #[test]
        fn prop_validation_matches_rules(key in "\\PC{0,1100}") {
            let accepted = validate_key(&key).is_ok();
            let expected = !key.is_empty()
                && key.chars().count() <= MAX_KEY_LEN
                && !key.contains('\0')
                && !key.contains('\r')
                && !key.contains('\n');
            proptest::prop_assert_eq!(accepted, expected);
        }
    }
}
