//! Utility functions for ddlock

use std::sync::LazyLock;

/// Regex pattern for validating owner and member identifiers
static VALID_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new("^[a-zA-Z0-9_.:-]+$").expect("Invalid regex pattern"));

/// Validate an identifier contains only allowed characters and is not empty
///
/// Allowed characters: alphanumeric, underscore, dot, colon, hyphen
///
/// # Examples
///
/// ```
/// use ddlock_common::is_valid_identifier;
///
/// assert!(is_valid_identifier("session-42:txn.7"));
/// assert!(!is_valid_identifier(""));
/// assert!(!is_valid_identifier("with spaces"));
/// ```
pub fn is_valid_identifier(s: &str) -> bool {
    VALID_PATTERN.is_match(s)
}

/// Current wall-clock time in Unix milliseconds
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_is_valid_identifier() {
        assert!(is_valid_identifier("7f3c1a2e-0b1d-4c55-9d1e-6f1e2a3b4c5d"));
        assert!(is_valid_identifier("pg_session_1"));
        assert!(!is_valid_identifier("a/b"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_current_timestamp_is_positive() {
        assert!(current_timestamp() > 0);
    }

    proptest! {
        #[test]
        fn prop_alphanumeric_identifiers_are_valid(s in "[a-zA-Z0-9]{1,32}") {
            prop_assert!(is_valid_identifier(&s));
        }

        #[test]
        fn prop_whitespace_is_rejected(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}") {
            let s = format!("{} {}", prefix, suffix);
            prop_assert!(!is_valid_identifier(&s));
        }
    }
}
