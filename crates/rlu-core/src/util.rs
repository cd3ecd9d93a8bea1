use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds. A clock set before the epoch reads as 0.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
