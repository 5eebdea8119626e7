//! Service layer consumed by the request handlers

mod manager;

pub use manager::{IpamManager, PoolUsage};
