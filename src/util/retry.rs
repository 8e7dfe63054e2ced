use std::time::Duration;

use futures_retry::{ErrorHandler, RetryPolicy};

use crate::error::LeaseError;

pub(crate) struct FixedCountWithDelayStrategy {
    max_attempts: usize,
    delay: Duration,
}

impl FixedCountWithDelayStrategy {
    pub(crate) fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl ErrorHandler<LeaseError> for FixedCountWithDelayStrategy {
    type OutError = LeaseError;

    fn handle(&mut self, attempt: usize, e: LeaseError) -> RetryPolicy<LeaseError> {
        if attempt >= self.max_attempts {
            return RetryPolicy::ForwardError(e);
        }

        if e.is_retryable() {
            RetryPolicy::WaitRetry(self.delay)
        } else {
            RetryPolicy::ForwardError(e)
        }
    }
}
