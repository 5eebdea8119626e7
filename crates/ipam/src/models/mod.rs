//! Data models for pools, blocks and clients

mod address;
mod descriptor;

pub use address::{AddressFamily, AddressState, AddressStatus, InterfaceAddress, Marker};
pub use descriptor::{AddressStatusUpdate, BlockAssignment, ClientDescriptor, PoolDescriptor};
