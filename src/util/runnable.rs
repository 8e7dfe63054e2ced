use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Notify;

/// Drives a runnable on a fixed delay: wait first, then run. The loop ends
/// when the shutdown notify fires or when the runnable reports itself
/// finished, so a runnable that loses its reason to exist stops
/// deterministically even if nobody calls shutdown.
pub(crate) async fn run_with_fixed_delay<T: PeriodicRunnable>(
    runnable: Arc<T>,
    delay: Duration,
    shutdown: Arc<Notify>,
) {
    loop {
        let mut shutdown_signal = false;
        tokio::select! {
            _ = shutdown.notified() => { shutdown_signal = true }
            _ = tokio::time::sleep(delay) => {}
        }

        if !shutdown_signal && !runnable.finished() {
            tokio::select! {
                _ = shutdown.notified() => { shutdown_signal = true }
                _ = runnable.run_once() => {}
            }
        }

        if shutdown_signal || runnable.finished() {
            break;
        }
    }

    runnable.before_shutdown_complete().await;
    shutdown.notify_waiters();
}

#[async_trait]
pub(crate) trait PeriodicRunnable: Send + Sync {
    async fn run_once(&self);

    /// True once the runnable has nothing left to do; checked between runs.
    fn finished(&self) -> bool {
        false
    }

    async fn before_shutdown_complete(&self) {}
}
