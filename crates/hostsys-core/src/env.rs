//! Environment variable utilities
//!
//! Typed lookups with defaults, used by `SystemConfig::from_env()` and the
//! logging macros.
//!
//! ```ignore
//! use hostsys_core::env::{env_get, env_get_bool, env_get_path};
//!
//! let frames: usize = env_get("HOSTSYS_SNAPSHOT_MAX_FRAMES", 64);
//! let verbose = env_get_bool("HOSTSYS_VERBOSE", false);
//! let dumps = env_get_path("HOSTSYS_CRASH_DUMP_DIR");
//! ```

use std::path::PathBuf;
use std::str::FromStr;

/// Get environment variable parsed as `T`, or `default` when unset or unparsable
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean
///
/// "1", "true", "yes", "on" (any case) are true; any other value is false.
/// Unset returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as `Some(T)` if set and parsable
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as a path; unset or empty yields `None`
#[inline]
pub fn env_get_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Check if environment variable is set (regardless of value)
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var_os(key).is_some()
}
