/// The last lease state a session has seen, from either a grant or a
/// conflict. Only enough to drive projection; the store row stays
/// authoritative.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseSnapshot {
    pub holder_id: String,
    pub holder_name: String,
    pub expires_at: u64,
}

impl From<&crate::lease::Lease> for LeaseSnapshot {
    fn from(lease: &crate::lease::Lease) -> Self {
        Self {
            holder_id: lease.holder_id.clone(),
            holder_name: lease.holder_name.clone(),
            expires_at: lease.expires_at,
        }
    }
}

/// Three-way view consumed by the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LockState {
    /// Safe to attempt an acquire.
    Unlocked,
    /// Editing allowed; renewals should be running.
    HeldByMe { expires_at: u64 },
    /// Read-only, with a countdown to automatic availability.
    HeldByOther { holder_name: String, expires_at: u64 },
}

/// Pure projection of the latest known lease state. A foreign lease whose
/// expiry has passed locally projects as `Unlocked` so the UI frees up
/// without a network round-trip, but an actual edit must still re-validate
/// through a real acquire, since only the store's clock is authoritative.
pub fn project(snapshot: Option<&LeaseSnapshot>, session_id: &str, now_ms: u64) -> LockState {
    match snapshot {
        None => LockState::Unlocked,
        Some(lease) if lease.expires_at <= now_ms => LockState::Unlocked,
        Some(lease) if lease.holder_id == session_id => LockState::HeldByMe {
            expires_at: lease.expires_at,
        },
        Some(lease) => LockState::HeldByOther {
            holder_name: lease.holder_name.clone(),
            expires_at: lease.expires_at,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foreign_snapshot(expires_at: u64) -> LeaseSnapshot {
        LeaseSnapshot {
            holder_id: "session-b".to_string(),
            holder_name: "Bob".to_string(),
            expires_at,
        }
    }

    #[test]
    fn no_lease_projects_unlocked() {
        assert_eq!(project(None, "session-a", 1_000), LockState::Unlocked);
    }

    #[test]
    fn own_active_lease_projects_held_by_me() {
        let snapshot = LeaseSnapshot {
            holder_id: "session-a".to_string(),
            holder_name: "Alice".to_string(),
            expires_at: 5_000,
        };
        assert_eq!(
            project(Some(&snapshot), "session-a", 1_000),
            LockState::HeldByMe { expires_at: 5_000 }
        );
    }

    #[test]
    fn foreign_active_lease_projects_held_by_other() {
        assert_eq!(
            project(Some(&foreign_snapshot(5_000)), "session-a", 1_000),
            LockState::HeldByOther {
                holder_name: "Bob".to_string(),
                expires_at: 5_000
            }
        );
    }

    #[test]
    fn foreign_lease_rederives_unlocked_once_expiry_passes_locally() {
        let snapshot = foreign_snapshot(5_000);
        assert_eq!(
            project(Some(&snapshot), "session-a", 4_999),
            LockState::HeldByOther {
                holder_name: "Bob".to_string(),
                expires_at: 5_000
            }
        );
        assert_eq!(project(Some(&snapshot), "session-a", 5_000), LockState::Unlocked);
    }

    #[test]
    fn own_expired_lease_projects_unlocked() {
        let snapshot = LeaseSnapshot {
            holder_id: "session-a".to_string(),
            holder_name: "Alice".to_string(),
            expires_at: 5_000,
        };
        assert_eq!(project(Some(&snapshot), "session-a", 6_000), LockState::Unlocked);
    }
}
