use thiserror::Error;

/// Failures reaching the caller from the lease store.
///
/// Protocol outcomes (a conflicting holder, a lapsed lease, a stale release)
/// are not errors; they are regular variants of the operation results. Only
/// genuine store trouble surfaces here, and only `Unavailable` is worth
/// retrying.
#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease store unavailable: {0}")]
    Unavailable(String),

    #[error("lease store rejected the request: {0}")]
    Fatal(String),
}

impl LeaseError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LeaseError::Unavailable(_))
    }
}
