//! Edit lease coordination for shared back-office records.
//!
//! Guarantees at most one active editor at a time for a quote, order,
//! delivery note, or invoice. A session acquires a time-bounded lease
//! through an atomic conditional write on a keyed store, keeps it alive
//! with a heartbeat, and releases it best-effort on teardown; the TTL is
//! the only guaranteed reclamation path for crashed sessions. Who is
//! allowed to *attempt* an acquire is decided upstream; this crate performs
//! no authorization of its own.

pub mod error;
pub mod lease;
pub mod store;
mod util;

pub use error::LeaseError;
pub use lease::heartbeat::{HeartbeatController, SessionState};
pub use lease::manager::{
    AcquireOutcome, DurationPolicy, LeaseManager, ReleaseOutcome, RenewOutcome,
};
pub use lease::state::{project, LeaseSnapshot, LockState};
pub use lease::{HolderIdentity, Lease, ResourceKey, ResourceType};
pub use store::dynamo::DynamoLeaseStore;
pub use store::memory::MemoryLeaseStore;
pub use store::{CasOutcome, LeaseStore, RenewCas};
