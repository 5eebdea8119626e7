//! Records exchanged with the persistence gateway

use super::{AddressFamily, AddressState};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Administratively configured pool, as loaded from storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDescriptor {
    /// Durable pool id
    pub id: u64,
    /// Human-readable name (unique)
    pub name: String,
    /// Location tag (e.g. datacenter code)
    pub location: String,
    /// Declared address family; must agree with `network`
    pub family: AddressFamily,
    /// Base CIDR network
    pub network: IpNet,
    /// Prefix length of each carved block
    pub allocation_prefix_len: u8,
    /// Blocks held back from automatic issuance
    #[serde(default)]
    pub reserved_blocks: Vec<IpNet>,
}

impl PoolDescriptor {
    /// Create a descriptor with no held-back blocks
    pub fn new(
        id: u64,
        name: impl Into<String>,
        location: impl Into<String>,
        network: IpNet,
        allocation_prefix_len: u8,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            location: location.into(),
            family: AddressFamily::of_net(&network),
            network,
            allocation_prefix_len,
            reserved_blocks: Vec::new(),
        }
    }

    /// Hold back a block from automatic issuance
    pub fn with_reserved_block(mut self, block: IpNet) -> Self {
        self.reserved_blocks.push(block);
        self
    }
}

/// Registered machine, as loaded from storage
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDescriptor {
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing)]
    pub token: String,
}

impl std::fmt::Debug for ClientDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Durable pool/client/CIDR triple for an issued block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAssignment {
    pub block_id: u64,
    pub pool_id: u64,
    pub client_id: u64,
    pub cidr: IpNet,
}

/// Status row pushed to storage on every address transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressStatusUpdate {
    pub block_id: u64,
    pub client_id: u64,
    pub address: IpAddr,
    pub state: AddressState,
    pub reservation_expiry: Option<DateTime<Utc>>,
}
