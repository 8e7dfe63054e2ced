use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) mod retry;
pub(crate) mod runnable;

/// Milliseconds since the unix epoch, the timestamp unit of every lease row.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
