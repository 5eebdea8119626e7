//! IP Address Management Core
//!
//! Carves administratively defined network ranges into fixed-size blocks,
//! hands blocks to requesting machines and tracks the state of every address
//! within each block:
//! - Pools: CIDR ranges subdivided into equal-sized blocks (first-fit)
//! - Blocks: single addresses or subnets owned by one client
//! - Addresses: `unused -> reserved -> active -> standby -> unused`
//!
//! All offset maps are sparse, so an IPv6 /48 carved into /64s costs nothing
//! until blocks are actually issued. Durable state lives behind the
//! [`Gateway`] trait; every mutation is recorded there before it becomes
//! visible in memory.

pub mod allocator;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod service;
pub mod validation;

// Re-export core types
pub use allocator::{AddressBlock, AddressPool};
pub use client::ClientRecord;
pub use config::IpamConfig;
pub use error::{Error, ErrorKind, Result};
pub use gateway::{Gateway, GatewayHandle, MemoryGateway};
pub use models::{
    AddressFamily, AddressState, AddressStatus, AddressStatusUpdate, BlockAssignment,
    ClientDescriptor, InterfaceAddress, Marker, PoolDescriptor,
};
pub use service::{IpamManager, PoolUsage};
