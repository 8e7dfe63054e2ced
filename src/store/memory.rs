use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CasOutcome, LeaseStore, RenewCas};
use crate::{
    error::LeaseError,
    lease::{HolderIdentity, Lease, ResourceKey},
    util::now_ms,
};

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// In-memory lease store. The map's write guard makes each conditional
/// update atomic, which is the single-process equivalent of the row-level
/// condition a durable backend would use. The store owns its clock so that
/// expiry is never judged by a caller's notion of time.
pub struct MemoryLeaseStore {
    rows: RwLock<HashMap<String, Lease>>,
    clock: Clock,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(now_ms))
    }

    /// Builds a store around an externally supplied millisecond clock.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire_or_renew(
        &self,
        key: &ResourceKey,
        holder: &HolderIdentity,
        duration: Duration,
    ) -> Result<CasOutcome, LeaseError> {
        let mut rows = self.rows.write().await;
        // Sampled under the guard so stamps follow serialization order even
        // when the write waited behind the lock.
        let now = self.now();
        let partition_key = key.partition_key();
        let prior = rows.get(&partition_key).cloned();

        if let Some(row) = &prior {
            if row.is_active(now) && row.holder_id != holder.holder_id {
                return Ok(CasOutcome::Held(row.clone()));
            }
        }

        // Same-holder extension keeps the original acquisition time.
        let acquired_at = prior
            .filter(|row| row.is_active(now))
            .map(|row| row.acquired_at)
            .unwrap_or(now);
        let lease = Lease {
            lease_key: partition_key.clone(),
            holder_id: holder.holder_id.clone(),
            holder_name: holder.holder_name.clone(),
            acquired_at,
            last_renewed_at: now,
            expires_at: now + duration.as_millis() as u64,
        };
        rows.insert(partition_key, lease.clone());
        Ok(CasOutcome::Granted(lease))
    }

    async fn try_renew(
        &self,
        key: &ResourceKey,
        holder_id: &str,
        duration: Duration,
    ) -> Result<RenewCas, LeaseError> {
        let mut rows = self.rows.write().await;
        let now = self.now();
        let partition_key = key.partition_key();
        match rows.get(&partition_key).cloned() {
            None => Ok(RenewCas::Lapsed),
            Some(row) if !row.is_active(now) => Ok(RenewCas::Lapsed),
            Some(row) if row.holder_id != holder_id => Ok(RenewCas::HeldByOther(row)),
            Some(row) => {
                let lease = Lease {
                    last_renewed_at: now,
                    expires_at: now + duration.as_millis() as u64,
                    ..row
                };
                rows.insert(partition_key, lease.clone());
                Ok(RenewCas::Renewed(lease))
            }
        }
    }

    async fn release(&self, key: &ResourceKey, holder_id: &str) -> Result<bool, LeaseError> {
        let mut rows = self.rows.write().await;
        let now = self.now();
        let partition_key = key.partition_key();
        let matches = rows
            .get(&partition_key)
            .map(|row| row.is_active(now) && row.holder_id == holder_id)
            .unwrap_or(false);
        if matches {
            rows.remove(&partition_key);
        }
        Ok(matches)
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<Lease>, LeaseError> {
        Ok(self.rows.read().await.get(&key.partition_key()).cloned())
    }
}
