//! Environment variable helpers used by the configuration layer.
//!
//! ```ignore
//! use shortener_core::env::{env_get, env_flag};
//!
//! let workers: usize = env_get("SHORTENER_WORKERS", 4);
//! let debug = env_flag("SHORTENER_DEBUG", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`; unset or unparsable values yield `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if set and valid.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag: "1", "true", "yes", "on" (any case) are true, any other
/// value is false, unset is `default`.
#[inline]
pub fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Milliseconds in `key` as a `Duration`.
#[inline]
pub fn env_duration_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

/// String value of `key`, or `default`.
#[inline]
pub fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
