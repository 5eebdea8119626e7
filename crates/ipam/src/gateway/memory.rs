//! In-memory gateway
//!
//! Backs tests and the demo binary. Supports injected write failures and
//! artificial latency so rollback and timeout paths can be exercised.

use super::Gateway;
use crate::models::{AddressStatusUpdate, BlockAssignment, ClientDescriptor, PoolDescriptor};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Gateway keeping every table in memory
#[derive(Debug)]
pub struct MemoryGateway {
    pools: DashMap<u64, PoolDescriptor>,
    clients: DashMap<String, ClientDescriptor>,
    assignments: DashMap<u64, BlockAssignment>,
    statuses: DashMap<(u64, IpAddr), AddressStatusUpdate>,
    next_id: AtomicU64,
    /// Number of upcoming writes that will fail
    pending_failures: AtomicUsize,
    latency: Option<Duration>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
            clients: DashMap::new(),
            assignments: DashMap::new(),
            statuses: DashMap::new(),
            next_id: AtomicU64::new(1),
            pending_failures: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a pool, assigning it a durable id
    pub fn add_pool(&self, mut descriptor: PoolDescriptor) -> u64 {
        let id = self.allocate_id();
        descriptor.id = id;
        self.pools.insert(id, descriptor);
        id
    }

    /// Register a machine, assigning it a durable id
    pub fn add_client(
        &self,
        name: impl Into<String>,
        token: impl Into<String>,
    ) -> ClientDescriptor {
        let descriptor = ClientDescriptor {
            id: self.allocate_id(),
            name: name.into(),
            token: token.into(),
        };
        self.clients
            .insert(descriptor.name.clone(), descriptor.clone());
        descriptor
    }

    /// Make the next `count` writes fail with `StorageUnavailable`
    pub fn fail_next_writes(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn assignment(&self, block_id: u64) -> Option<BlockAssignment> {
        self.assignments.get(&block_id).map(|a| a.clone())
    }

    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }

    /// Last recorded status row for an address; released addresses have none
    pub fn address_status(&self, block_id: u64, address: IpAddr) -> Option<AddressStatusUpdate> {
        self.statuses.get(&(block_id, address)).map(|s| s.clone())
    }

    pub fn status_count(&self) -> usize {
        self.statuses.len()
    }

    async fn io(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn write_permit(&self, op: &str) -> Result<()> {
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::StorageUnavailable(format!(
                "{}: injected write failure",
                op
            )));
        }
        Ok(())
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn record_block_assignment(
        &self,
        pool_id: u64,
        client_id: u64,
        cidr: IpNet,
    ) -> Result<u64> {
        self.io().await;
        self.write_permit("record_block_assignment")?;

        let block_id = self.allocate_id();
        self.assignments.insert(
            block_id,
            BlockAssignment {
                block_id,
                pool_id,
                client_id,
                cidr,
            },
        );
        Ok(block_id)
    }

    async fn record_address_status(&self, update: &AddressStatusUpdate) -> Result<()> {
        self.io().await;
        self.write_permit("record_address_status")?;

        let key = (update.block_id, update.address);
        if update.state == crate::models::AddressState::Unused {
            self.statuses.remove(&key);
        } else {
            self.statuses.insert(key, update.clone());
        }
        Ok(())
    }

    async fn delete_block_assignment(&self, block_id: u64) -> Result<()> {
        self.io().await;
        self.write_permit("delete_block_assignment")?;

        if self.assignments.remove(&block_id).is_none() {
            return Err(Error::NotFound(format!("block assignment {}", block_id)));
        }
        self.statuses.retain(|(id, _), _| *id != block_id);
        Ok(())
    }

    async fn load_pools(&self) -> Result<Vec<PoolDescriptor>> {
        self.io().await;
        let mut pools: Vec<PoolDescriptor> = self.pools.iter().map(|p| p.clone()).collect();
        pools.sort_by_key(|p| p.id);
        Ok(pools)
    }

    async fn load_client(&self, name: &str) -> Result<ClientDescriptor> {
        self.io().await;
        self.clients
            .get(name)
            .map(|c| c.clone())
            .ok_or_else(|| Error::NotFound(format!("client '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AddressState;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_ids_are_unique() {
        let gateway = MemoryGateway::new();
        let client = gateway.add_client("TestMachine", "sometoken");
        let cidr = IpNet::from_str("10.0.2.1/32").unwrap();

        let a = gateway.record_block_assignment(1, client.id, cidr).await.unwrap();
        let b = gateway.record_block_assignment(1, client.id, cidr).await.unwrap();
        assert_ne!(a, b);
        assert_ne!(a, client.id);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let gateway = MemoryGateway::new();
        let cidr = IpNet::from_str("10.0.2.1/32").unwrap();
        gateway.fail_next_writes(1);

        let err = gateway.record_block_assignment(1, 1, cidr).await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
        assert_eq!(gateway.assignment_count(), 0);

        assert!(gateway.record_block_assignment(1, 1, cidr).await.is_ok());
        assert_eq!(gateway.assignment_count(), 1);
    }

    #[tokio::test]
    async fn test_status_rows_follow_state() {
        let gateway = MemoryGateway::new();
        let cidr = IpNet::from_str("10.0.2.0/30").unwrap();
        let block_id = gateway.record_block_assignment(1, 1, cidr).await.unwrap();
        let address = IpAddr::from_str("10.0.2.1").unwrap();

        let mut update = AddressStatusUpdate {
            block_id,
            client_id: 1,
            address,
            state: AddressState::Reserved,
            reservation_expiry: None,
        };
        gateway.record_address_status(&update).await.unwrap();
        assert_eq!(
            gateway.address_status(block_id, address).unwrap().state,
            AddressState::Reserved
        );

        update.state = AddressState::Unused;
        gateway.record_address_status(&update).await.unwrap();
        assert!(gateway.address_status(block_id, address).is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_status_rows() {
        let gateway = MemoryGateway::new();
        let cidr = IpNet::from_str("10.0.2.0/30").unwrap();
        let block_id = gateway.record_block_assignment(1, 1, cidr).await.unwrap();
        let update = AddressStatusUpdate {
            block_id,
            client_id: 1,
            address: IpAddr::from_str("10.0.2.2").unwrap(),
            state: AddressState::Reserved,
            reservation_expiry: None,
        };
        gateway.record_address_status(&update).await.unwrap();

        gateway.delete_block_assignment(block_id).await.unwrap();
        assert_eq!(gateway.status_count(), 0);
        assert!(gateway.delete_block_assignment(block_id).await.is_err());
    }

    #[tokio::test]
    async fn test_load_client() {
        let gateway = MemoryGateway::new();
        gateway.add_client("TestMachine", "sometoken");

        let client = gateway.load_client("TestMachine").await.unwrap();
        assert_eq!(client.token, "sometoken");
        assert!(matches!(
            gateway.load_client("Nobody").await,
            Err(Error::NotFound(_))
        ));
    }
}
