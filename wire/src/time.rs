use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in seconds since the epoch. Used for anything
/// that travels on the wire or into a database row; use `Instant` locally
/// for deadline math.
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

pub fn from_now(offset: Duration) -> u64 {
    timestamp_secs() + offset.as_secs()
}
