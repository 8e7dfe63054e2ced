use std::fmt;

use dynomite::Item;

pub mod heartbeat;
pub mod manager;
pub mod state;

/// One lease row per editable record. `lease_key` is the partition key,
/// rendered as `"{resource_type}#{resource_id}"`; the timestamps are epoch
/// milliseconds stamped by the store, never by a client.
#[derive(Item, Debug, Clone, PartialEq)]
pub struct Lease {
    #[dynomite(partition_key)]
    pub lease_key: String,
    pub holder_id: String,
    pub holder_name: String,
    pub acquired_at: u64,
    pub last_renewed_at: u64,
    pub expires_at: u64,
}

impl Lease {
    pub fn is_active(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at
    }
}

/// The record kinds that support exclusive editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Quote,
    Order,
    DeliveryNote,
    Invoice,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Quote => "quote",
            ResourceType::Order => "order",
            ResourceType::DeliveryNote => "delivery-note",
            ResourceType::Invoice => "invoice",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub resource_type: ResourceType,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    pub(crate) fn partition_key(&self) -> String {
        format!("{}#{}", self.resource_type.as_str(), self.resource_id)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource_type.as_str(), self.resource_id)
    }
}

/// Session identity attached to an acquisition. `holder_id` is authoritative;
/// `holder_name` is a denormalized display label for whoever gets a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderIdentity {
    pub holder_id: String,
    pub holder_name: String,
}

impl HolderIdentity {
    pub fn new(holder_id: impl Into<String>, holder_name: impl Into<String>) -> Self {
        Self {
            holder_id: holder_id.into(),
            holder_name: holder_name.into(),
        }
    }
}
