use std::{sync::Arc, time::Duration};

use futures_retry::FutureRetry;
use tracing::debug;

use crate::{
    error::LeaseError,
    lease::{HolderIdentity, ResourceKey},
    store::{CasOutcome, LeaseStore, RenewCas},
    util::retry::FixedCountWithDelayStrategy,
};

/// Bounds on the lease duration a caller may request. Requests outside the
/// window are clamped, not rejected, so a misconfigured client degrades to a
/// bounded lease instead of starving everyone else with an arbitrarily long
/// one.
#[derive(Debug, Clone, Copy)]
pub struct DurationPolicy {
    pub min: Duration,
    pub max: Duration,
}

impl DurationPolicy {
    pub fn clamp(&self, requested: Duration) -> Duration {
        requested.clamp(self.min, self.max)
    }
}

impl Default for DurationPolicy {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(60),
            max: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    Granted {
        expires_at: u64,
    },
    /// Another session holds an active lease. Expected and recoverable; the
    /// caller surfaces it as read-only state, never retries it blindly.
    Conflict {
        holder_id: String,
        holder_name: String,
        expires_at: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenewOutcome {
    Granted { expires_at: u64 },
    /// Someone else holds an active lease; re-acquire once they are done.
    NotHolder,
    /// The lease lapsed before the renewal arrived. The caller no longer
    /// holds the lock, but an immediate re-acquire is worth attempting since
    /// nobody else may have claimed the row yet.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// False means the caller already did not hold the lease. Harmless.
    pub released: bool,
}

/// The protocol layer. Translates store CAS outcomes into the lease
/// vocabulary, clamps durations into policy bounds, and retries transient
/// store failures a bounded number of times. Every protocol outcome is
/// terminal here; whether to re-attempt after `Conflict` or `Expired` belongs
/// to the calling session.
pub struct LeaseManager {
    store: Arc<dyn LeaseStore>,
    policy: DurationPolicy,
    retry_attempts: usize,
    retry_delay: Duration,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self::with_policy(store, DurationPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn LeaseStore>, policy: DurationPolicy) -> Self {
        Self {
            store,
            policy,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(200),
        }
    }

    pub fn retry_settings(mut self, attempts: usize, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    fn retry_strategy(&self) -> FixedCountWithDelayStrategy {
        FixedCountWithDelayStrategy::new(self.retry_attempts, self.retry_delay)
    }

    pub async fn acquire(
        &self,
        key: &ResourceKey,
        holder: &HolderIdentity,
        duration: Duration,
    ) -> Result<AcquireOutcome, LeaseError> {
        let duration = self.policy.clamp(duration);
        let (outcome, _) = FutureRetry::new(
            || self.store.try_acquire_or_renew(key, holder, duration),
            self.retry_strategy(),
        )
        .await
        .map_err(|(err, _)| err)?;

        Ok(match outcome {
            CasOutcome::Granted(lease) => {
                debug!(
                    key = %key,
                    holder = %holder.holder_id,
                    expires_at = lease.expires_at,
                    "lease granted"
                );
                AcquireOutcome::Granted {
                    expires_at: lease.expires_at,
                }
            }
            CasOutcome::Held(lease) => {
                debug!(key = %key, holder = %holder.holder_id, current = %lease.holder_id, "lease conflict");
                AcquireOutcome::Conflict {
                    holder_id: lease.holder_id,
                    holder_name: lease.holder_name,
                    expires_at: lease.expires_at,
                }
            }
        })
    }

    pub async fn renew(
        &self,
        key: &ResourceKey,
        holder_id: &str,
        duration: Duration,
    ) -> Result<RenewOutcome, LeaseError> {
        let duration = self.policy.clamp(duration);
        let (outcome, _) = FutureRetry::new(
            || self.store.try_renew(key, holder_id, duration),
            self.retry_strategy(),
        )
        .await
        .map_err(|(err, _)| err)?;

        Ok(match outcome {
            RenewCas::Renewed(lease) => RenewOutcome::Granted {
                expires_at: lease.expires_at,
            },
            RenewCas::HeldByOther(lease) => {
                debug!(key = %key, holder = %holder_id, current = %lease.holder_id, "renew by non-holder");
                RenewOutcome::NotHolder
            }
            RenewCas::Lapsed => {
                debug!(key = %key, holder = %holder_id, "renew after expiry");
                RenewOutcome::Expired
            }
        })
    }

    pub async fn release(
        &self,
        key: &ResourceKey,
        holder_id: &str,
    ) -> Result<ReleaseOutcome, LeaseError> {
        let (released, _) = FutureRetry::new(
            || self.store.release(key, holder_id),
            self.retry_strategy(),
        )
        .await
        .map_err(|(err, _)| err)?;

        debug!(key = %key, holder = %holder_id, released, "lease release");
        Ok(ReleaseOutcome { released })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::lease::ResourceType;
    use crate::store::testing::{manual_clock, FlakyStore};

    const T0: u64 = 1_000_000;
    const FIVE_MIN: Duration = Duration::from_secs(300);

    fn quote_key() -> ResourceKey {
        ResourceKey::new(ResourceType::Quote, "Q-42")
    }

    fn alice() -> HolderIdentity {
        HolderIdentity::new("session-a", "Alice")
    }

    #[tokio::test]
    async fn durations_above_policy_max_are_clamped() {
        let (_, store) = manual_clock(T0);
        let manager = LeaseManager::new(Arc::new(store));

        let outcome = manager
            .acquire(&quote_key(), &alice(), Duration::from_secs(24 * 3600))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AcquireOutcome::Granted {
                expires_at: T0 + 15 * 60 * 1000
            }
        );
    }

    #[tokio::test]
    async fn durations_below_policy_min_are_clamped() {
        let (_, store) = manual_clock(T0);
        let manager = LeaseManager::new(Arc::new(store));

        let outcome = manager
            .acquire(&quote_key(), &alice(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, AcquireOutcome::Granted { expires_at: T0 + 60_000 });
    }

    #[tokio::test]
    async fn conflict_carries_current_holder() {
        let (_, store) = manual_clock(T0);
        let manager = LeaseManager::new(Arc::new(store));

        manager.acquire(&quote_key(), &alice(), FIVE_MIN).await.unwrap();
        let outcome = manager
            .acquire(
                &quote_key(),
                &HolderIdentity::new("session-b", "Bob"),
                FIVE_MIN,
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AcquireOutcome::Conflict {
                holder_id: "session-a".to_string(),
                holder_name: "Alice".to_string(),
                expires_at: T0 + 300_000,
            }
        );
    }

    #[tokio::test]
    async fn renew_distinguishes_not_holder_from_expired() {
        let (clock, store) = manual_clock(T0);
        let manager = LeaseManager::new(Arc::new(store));

        manager.acquire(&quote_key(), &alice(), FIVE_MIN).await.unwrap();
        assert_eq!(
            manager
                .renew(&quote_key(), "session-b", FIVE_MIN)
                .await
                .unwrap(),
            RenewOutcome::NotHolder
        );

        clock.store(T0 + 600_000, Ordering::SeqCst);
        assert_eq!(
            manager
                .renew(&quote_key(), "session-a", FIVE_MIN)
                .await
                .unwrap(),
            RenewOutcome::Expired
        );
    }

    #[tokio::test]
    async fn release_is_idempotent_at_the_protocol_level() {
        let (_, store) = manual_clock(T0);
        let manager = LeaseManager::new(Arc::new(store));

        manager.acquire(&quote_key(), &alice(), FIVE_MIN).await.unwrap();
        assert!(manager.release(&quote_key(), "session-a").await.unwrap().released);
        assert!(!manager.release(&quote_key(), "session-a").await.unwrap().released);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_up_to_the_bound() {
        let (_, store) = manual_clock(T0);
        let flaky = Arc::new(FlakyStore::new(store));
        let manager = LeaseManager::new(flaky.clone())
            .retry_settings(3, Duration::from_millis(5));

        flaky.fail_next(2);
        let outcome = manager.acquire(&quote_key(), &alice(), FIVE_MIN).await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::Granted { .. }));

        flaky.fail_next(5);
        let err = manager
            .acquire(&quote_key(), &alice(), FIVE_MIN)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
