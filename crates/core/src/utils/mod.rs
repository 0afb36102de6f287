//! Utility functions shared by the governance crates

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current timestamp in milliseconds
pub fn timestamp_ms() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0));
    (since_epoch.as_secs() * 1000) + (since_epoch.subsec_nanos() as u64 / 1_000_000)
}

/// Number of characters in `s` after trimming surrounding whitespace
pub fn trimmed_len(s: &str) -> usize {
    s.trim().chars().count()
}
