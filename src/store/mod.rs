use std::time::Duration;

use async_trait::async_trait;

use crate::{
    error::LeaseError,
    lease::{HolderIdentity, Lease, ResourceKey},
};

pub mod dynamo;
pub mod memory;

/// Outcome of the acquire-or-renew conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The caller now holds the lease; carries the row as written.
    Granted(Lease),
    /// Another session holds an active lease; carries the current row.
    Held(Lease),
}

/// Outcome of the renew-only conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum RenewCas {
    Renewed(Lease),
    HeldByOther(Lease),
    /// Absent or expired. A renew never resurrects a lapsed row.
    Lapsed,
}

/// Keyed lease storage. Every mutation is a single atomic conditional write
/// evaluated against the store's own clock; that is the one place mutual
/// exclusion is enforced, so implementations must not split read and write
/// into separately observable steps.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Grants when the row is absent, expired, or already held by `holder`.
    /// A still-active same-holder grant preserves `acquired_at`; any other
    /// grant resets it.
    async fn try_acquire_or_renew(
        &self,
        key: &ResourceKey,
        holder: &HolderIdentity,
        duration: Duration,
    ) -> Result<CasOutcome, LeaseError>;

    /// Extends the row only if it is still active and held by `holder_id`.
    async fn try_renew(
        &self,
        key: &ResourceKey,
        holder_id: &str,
        duration: Duration,
    ) -> Result<RenewCas, LeaseError>;

    /// Clears the row only for a matching, still-active holder. Returns
    /// whether anything was cleared; a stale or foreign release is a no-op.
    async fn release(&self, key: &ResourceKey, holder_id: &str) -> Result<bool, LeaseError>;

    async fn get(&self, key: &ResourceKey) -> Result<Option<Lease>, LeaseError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    };
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{memory::MemoryLeaseStore, CasOutcome, LeaseStore, RenewCas};
    use crate::{
        error::LeaseError,
        lease::{HolderIdentity, Lease, ResourceKey},
    };

    /// A manually advanced clock for driving expiry in tests.
    pub(crate) fn manual_clock(start_ms: u64) -> (Arc<AtomicU64>, MemoryLeaseStore) {
        let clock = Arc::new(AtomicU64::new(start_ms));
        let handle = clock.clone();
        let store = MemoryLeaseStore::with_clock(Arc::new(move || handle.load(Ordering::SeqCst)));
        (clock, store)
    }

    /// Wraps a memory store and injects `Unavailable` failures on demand.
    pub(crate) struct FlakyStore {
        inner: MemoryLeaseStore,
        failures_left: AtomicU32,
        fail_all: AtomicBool,
    }

    impl FlakyStore {
        pub(crate) fn new(inner: MemoryLeaseStore) -> Self {
            Self {
                inner,
                failures_left: AtomicU32::new(0),
                fail_all: AtomicBool::new(false),
            }
        }

        pub(crate) fn fail_next(&self, count: u32) {
            self.failures_left.store(count, Ordering::SeqCst);
        }

        pub(crate) fn fail_all(&self, enabled: bool) {
            self.fail_all.store(enabled, Ordering::SeqCst);
        }

        fn gate(&self) -> Result<(), LeaseError> {
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(LeaseError::Unavailable("injected outage".to_string()));
            }
            loop {
                let left = self.failures_left.load(Ordering::SeqCst);
                if left == 0 {
                    return Ok(());
                }
                if self
                    .failures_left
                    .compare_exchange(left, left - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return Err(LeaseError::Unavailable("injected failure".to_string()));
                }
            }
        }
    }

    #[async_trait]
    impl LeaseStore for FlakyStore {
        async fn try_acquire_or_renew(
            &self,
            key: &ResourceKey,
            holder: &HolderIdentity,
            duration: Duration,
        ) -> Result<CasOutcome, LeaseError> {
            self.gate()?;
            self.inner.try_acquire_or_renew(key, holder, duration).await
        }

        async fn try_renew(
            &self,
            key: &ResourceKey,
            holder_id: &str,
            duration: Duration,
        ) -> Result<RenewCas, LeaseError> {
            self.gate()?;
            self.inner.try_renew(key, holder_id, duration).await
        }

        async fn release(&self, key: &ResourceKey, holder_id: &str) -> Result<bool, LeaseError> {
            self.gate()?;
            self.inner.release(key, holder_id).await
        }

        async fn get(&self, key: &ResourceKey) -> Result<Option<Lease>, LeaseError> {
            self.gate()?;
            self.inner.get(key).await
        }
    }
}
