//! Persistence gateway
//!
//! The durable store for pools, block assignments, clients and per-address
//! status rows lives outside this crate. Allocator types talk to it through
//! the [`Gateway`] trait, wrapped in a [`GatewayHandle`] that bounds every
//! call with a timeout.

mod memory;

pub use memory::MemoryGateway;

use crate::models::{AddressStatusUpdate, ClientDescriptor, PoolDescriptor};
use crate::{Error, Result};
use async_trait::async_trait;
use ipnet::IpNet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Durable storage backend
///
/// Implementations report I/O failures as [`Error::StorageUnavailable`].
/// Callers never retry.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Record a pool/client/CIDR assignment, returning the durable block id
    async fn record_block_assignment(
        &self,
        pool_id: u64,
        client_id: u64,
        cidr: IpNet,
    ) -> Result<u64>;

    /// Record the new state of a single address
    async fn record_address_status(&self, update: &AddressStatusUpdate) -> Result<()>;

    /// Delete a block assignment and its address status rows
    async fn delete_block_assignment(&self, block_id: u64) -> Result<()>;

    /// Load every configured pool
    async fn load_pools(&self) -> Result<Vec<PoolDescriptor>>;

    /// Load a registered machine by name
    async fn load_client(&self, name: &str) -> Result<ClientDescriptor>;
}

/// Shared, timeout-bounded handle to a [`Gateway`]
#[derive(Clone)]
pub struct GatewayHandle {
    inner: Arc<dyn Gateway>,
    timeout: Duration,
}

impl GatewayHandle {
    pub fn new(inner: Arc<dyn Gateway>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(&self, op: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::StorageUnavailable(format!(
                "{} timed out after {:?}",
                op, self.timeout
            ))),
        }
    }

    pub async fn record_block_assignment(
        &self,
        pool_id: u64,
        client_id: u64,
        cidr: IpNet,
    ) -> Result<u64> {
        self.bounded(
            "record_block_assignment",
            self.inner.record_block_assignment(pool_id, client_id, cidr),
        )
        .await
    }

    pub async fn record_address_status(&self, update: &AddressStatusUpdate) -> Result<()> {
        self.bounded(
            "record_address_status",
            self.inner.record_address_status(update),
        )
        .await
    }

    pub async fn delete_block_assignment(&self, block_id: u64) -> Result<()> {
        self.bounded(
            "delete_block_assignment",
            self.inner.delete_block_assignment(block_id),
        )
        .await
    }

    pub async fn load_pools(&self) -> Result<Vec<PoolDescriptor>> {
        self.bounded("load_pools", self.inner.load_pools()).await
    }

    pub async fn load_client(&self, name: &str) -> Result<ClientDescriptor> {
        self.bounded("load_client", self.inner.load_client(name)).await
    }
}

impl std::fmt::Debug for GatewayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHandle")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
