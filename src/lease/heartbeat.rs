use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{Notify, RwLock};
use tracing::warn;

use crate::{
    error::LeaseError,
    lease::{
        manager::{AcquireOutcome, LeaseManager, RenewOutcome},
        state::{project, LeaseSnapshot, LockState},
        HolderIdentity, ResourceKey,
    },
    util::{
        now_ms,
        runnable::{run_with_fixed_delay, PeriodicRunnable},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Acquiring,
    Held,
    Renewing,
    /// The lease is gone. `expired` means it lapsed rather than being taken;
    /// an immediate re-acquire is worth attempting in that case.
    Lost { expired: bool },
}

/// Keeps one editing session's lease alive. Owns the renewal task for its
/// lifetime: renewals are scheduled at roughly 80% of the lease TTL (plus a
/// little jitter), and the task is cancelled deterministically on `stop` or
/// on any transition to `Lost`. A local timer is never evidence of
/// ownership; only a successful renewal is.
pub struct HeartbeatController {
    manager: Arc<LeaseManager>,
    key: ResourceKey,
    holder: HolderIdentity,
    duration: Duration,
    max_transient_failures: u32,

    session: RwLock<SessionState>,
    snapshot: RwLock<Option<LeaseSnapshot>>,
    consecutive_failures: AtomicU32,
    halted: AtomicBool,
    shutdown: Arc<Notify>,
}

impl HeartbeatController {
    pub fn new(
        manager: Arc<LeaseManager>,
        key: ResourceKey,
        holder: HolderIdentity,
        duration: Duration,
    ) -> Self {
        Self {
            manager,
            key,
            holder,
            duration,
            max_transient_failures: 2,
            session: RwLock::new(SessionState::Idle),
            snapshot: RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
            halted: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Renewals that keep failing transiently beyond this bound force the
    /// session to `Lost`, since it can no longer prove it holds the lease.
    pub fn with_failure_bound(mut self, max_transient_failures: u32) -> Self {
        self.max_transient_failures = max_transient_failures;
        self
    }

    /// Attempts the initial acquire. On a grant the renewal loop starts; on
    /// a conflict the session stays idle with the holder recorded for
    /// projection. Store errors leave the session idle (fail-closed). A
    /// session that is already held reports its current grant instead of
    /// spawning a second renewal loop on the same shutdown notify.
    pub async fn start(self: Arc<Self>) -> Result<AcquireOutcome, LeaseError> {
        {
            let mut session = self.session.write().await;
            match *session {
                SessionState::Held | SessionState::Renewing => {
                    if let Some(lease) = self.snapshot.read().await.as_ref() {
                        return Ok(AcquireOutcome::Granted {
                            expires_at: lease.expires_at,
                        });
                    }
                    return Err(LeaseError::Fatal(
                        "editing session already active".to_string(),
                    ));
                }
                SessionState::Acquiring => {
                    return Err(LeaseError::Fatal(
                        "acquire already in progress".to_string(),
                    ));
                }
                SessionState::Idle | SessionState::Lost { .. } => {
                    *session = SessionState::Acquiring;
                }
            }
        }

        let outcome = match self
            .manager
            .acquire(&self.key, &self.holder, self.duration)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                *self.session.write().await = SessionState::Idle;
                return Err(err);
            }
        };

        match &outcome {
            AcquireOutcome::Granted { expires_at } => {
                *self.snapshot.write().await = Some(self.own_snapshot(*expires_at));
                *self.session.write().await = SessionState::Held;
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.halted.store(false, Ordering::SeqCst);

                let delay = self.renew_delay(*expires_at);
                tokio::spawn(run_with_fixed_delay(
                    self.clone(),
                    delay,
                    self.shutdown.clone(),
                ));
            }
            AcquireOutcome::Conflict {
                holder_id,
                holder_name,
                expires_at,
            } => {
                *self.snapshot.write().await = Some(LeaseSnapshot {
                    holder_id: holder_id.clone(),
                    holder_name: holder_name.clone(),
                    expires_at: *expires_at,
                });
                *self.session.write().await = SessionState::Idle;
            }
        }
        Ok(outcome)
    }

    /// Cancels the renewal task and issues one best-effort release. The
    /// release is not load-bearing: if it never lands, the TTL reclaims the
    /// lease.
    pub async fn stop(&self) {
        self.halted.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        let was_held = {
            let mut session = self.session.write().await;
            let held = matches!(*session, SessionState::Held | SessionState::Renewing);
            *session = SessionState::Idle;
            held
        };
        *self.snapshot.write().await = None;

        if was_held {
            if let Err(err) = self
                .manager
                .release(&self.key, &self.holder.holder_id)
                .await
            {
                warn!(
                    key = %self.key,
                    error = %err,
                    "best-effort release failed; lease will lapse at its TTL"
                );
            }
        }
    }

    pub async fn session_state(&self) -> SessionState {
        *self.session.read().await
    }

    pub async fn lock_state(&self) -> LockState {
        let snapshot = self.snapshot.read().await;
        project(snapshot.as_ref(), &self.holder.holder_id, now_ms())
    }

    fn own_snapshot(&self, expires_at: u64) -> LeaseSnapshot {
        LeaseSnapshot {
            holder_id: self.holder.holder_id.clone(),
            holder_name: self.holder.holder_name.clone(),
            expires_at,
        }
    }

    /// Renew at 80% of the remaining lease, jittered, so the safety margin
    /// absorbs network latency and contending sessions do not synchronize.
    fn renew_delay(&self, expires_at: u64) -> Duration {
        let lease_ms = expires_at.saturating_sub(now_ms()).max(1);
        let jitter = rand::thread_rng().gen_range(0..=lease_ms / 20);
        Duration::from_millis(lease_ms * 4 / 5 + jitter)
    }

    async fn mark_lost(&self, expired: bool) {
        let mut session = self.session.write().await;
        // A stop (or an earlier loss) already settled the session; its
        // cleared state stands.
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(
            key = %self.key,
            holder = %self.holder.holder_id,
            expired,
            "lease lost; demoting session to read-only"
        );
        *session = SessionState::Lost { expired };
        *self.snapshot.write().await = None;
    }
}

#[async_trait]
impl PeriodicRunnable for HeartbeatController {
    async fn run_once(&self) {
        if self.halted.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut session = self.session.write().await;
            if *session != SessionState::Held {
                return;
            }
            *session = SessionState::Renewing;
        }

        match self
            .manager
            .renew(&self.key, &self.holder.holder_id, self.duration)
            .await
        {
            Ok(RenewOutcome::Granted { expires_at }) => {
                let mut session = self.session.write().await;
                // A stop may have raced the in-flight renewal; its cleared
                // state wins, checked under the session lock so the write
                // below cannot overwrite it.
                if self.halted.load(Ordering::SeqCst) {
                    return;
                }
                self.consecutive_failures.store(0, Ordering::SeqCst);
                *self.snapshot.write().await = Some(self.own_snapshot(expires_at));
                *session = SessionState::Held;
            }
            Ok(RenewOutcome::NotHolder) => self.mark_lost(false).await,
            Ok(RenewOutcome::Expired) => self.mark_lost(true).await,
            Err(err) => {
                warn!(key = %self.key, error = %err, "lease renewal failed");
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if !err.is_retryable() || failures >= self.max_transient_failures {
                    // Cannot prove the lease is still ours; fail closed.
                    self.mark_lost(false).await;
                } else {
                    let mut session = self.session.write().await;
                    if !self.halted.load(Ordering::SeqCst) {
                        *session = SessionState::Held;
                    }
                }
            }
        }
    }

    fn finished(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}
