//! Environment variable loading helpers
//!
//! Used by [`ExecutorConfig::from_env`](super::ExecutorConfig::from_env).

use crate::{Result, RetrierError};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Load an environment variable as a string
///
/// * `Ok(Some(value))` if the variable exists
/// * `Ok(None)` if it doesn't
/// * `Err` if it exists but is not valid UTF-8
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(RetrierError::Config(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

/// Load and parse an environment variable
///
/// Surrounding whitespace is ignored.
///
/// ```rust,ignore
/// let parallelism: Option<usize> = get_env_parse("RETRIER_PARALLELISM")?;
/// ```
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key)? {
        Some(val) => {
            let parsed = val.trim().parse::<T>().map_err(|e| {
                RetrierError::Config(format!(
                    "Failed to parse environment variable {}: {}",
                    key, e
                ))
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Load a signed millisecond count as a duration
///
/// Values at or below zero become `Some(Duration::ZERO)`, which callers treat
/// as "disabled" for timeouts and "no delay" for delays.
pub fn get_env_millis(key: &str) -> Result<Option<Duration>> {
    Ok(get_env_parse::<i64>(key)?.map(|millis| Duration::from_millis(millis.max(0) as u64)))
}

/// Build a prefixed environment variable name
///
/// ```rust,ignore
/// let key = build_env_key("RETRIER_", "max_attempts"); // "RETRIER_MAX_ATTEMPTS"
/// ```
pub fn build_env_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_missing() {
        let result = get_env("RETRIER_TEST_MISSING_VAR_12345");
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_get_env_parse() {
        env::set_var("RETRIER_TEST_NUMBER", " 42 ");
        let result: Option<u32> = get_env_parse("RETRIER_TEST_NUMBER").unwrap();
        assert_eq!(result, Some(42));
        env::remove_var("RETRIER_TEST_NUMBER");
    }

    #[test]
    fn test_get_env_parse_invalid() {
        env::set_var("RETRIER_TEST_INVALID_NUMBER", "several");
        let result: Result<Option<u32>> = get_env_parse("RETRIER_TEST_INVALID_NUMBER");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("RETRIER_TEST_INVALID_NUMBER"));
        env::remove_var("RETRIER_TEST_INVALID_NUMBER");
    }

    #[test]
    fn test_get_env_millis_clamps_negative() {
        env::set_var("RETRIER_TEST_NEGATIVE_MS", "-300");
        let result = get_env_millis("RETRIER_TEST_NEGATIVE_MS").unwrap();
        assert_eq!(result, Some(Duration::ZERO));
        env::remove_var("RETRIER_TEST_NEGATIVE_MS");

        env::set_var("RETRIER_TEST_POSITIVE_MS", "1500");
        let result = get_env_millis("RETRIER_TEST_POSITIVE_MS").unwrap();
        assert_eq!(result, Some(Duration::from_millis(1500)));
        env::remove_var("RETRIER_TEST_POSITIVE_MS");
    }

    #[test]
    fn test_build_env_key() {
        assert_eq!(build_env_key("RETRIER_", "parallelism"), "RETRIER_PARALLELISM");
        assert_eq!(build_env_key("", "delay_ms"), "DELAY_MS");
    }
}
