use std::time::{SystemTime, UNIX_EPOCH};

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Return the current unix timestamp in seconds.
pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

/// Whole seconds elapsed between `since` and `now`, zero when `since` is in the future.
pub fn elapsed_secs(since: u64, now: u64) -> u64 {
    now.saturating_sub(since)
}
