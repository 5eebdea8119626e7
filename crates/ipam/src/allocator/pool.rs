//! Address pool: an administratively configured range carved into blocks
//!
//! Blocks are issued first-fit: `create_block` always hands out the lowest
//! free offset. Offset 0 is the network address and, for IPv4, the top
//! offset is the broadcast address; neither is ever issued.

use super::block::{AddressBlock, BlockOwner};
use super::slots::{Slot, SlotMap};
use crate::client::ClientRecord;
use crate::gateway::GatewayHandle;
use crate::models::{AddressFamily, Marker, PoolDescriptor};
use crate::validation;
use crate::{Error, Result};
use ipnet::IpNet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// A CIDR range subdivided into equal-sized blocks
pub struct AddressPool {
    id: u64,
    name: String,
    location: String,
    family: AddressFamily,
    network: IpNet,
    allocation_prefix_len: u8,
    reserved_blocks: Vec<IpNet>,
    capacity: u128,
    /// Addresses per block
    block_size: u128,
    gateway: GatewayHandle,
    slots: Mutex<SlotMap<Arc<AddressBlock>>>,
}

impl AddressPool {
    /// Build a pool from its descriptor
    ///
    /// With `enforce_unicast` set, networks overlapping loopback, link-local,
    /// multicast or reserved space are rejected.
    pub fn new(
        descriptor: PoolDescriptor,
        gateway: GatewayHandle,
        enforce_unicast: bool,
    ) -> Result<Arc<Self>> {
        let PoolDescriptor {
            id,
            name,
            location,
            family,
            network,
            allocation_prefix_len,
            reserved_blocks,
        } = descriptor;

        validation::ensure_strict(&network)?;
        if AddressFamily::of_net(&network) != family {
            return Err(Error::InvalidArgument(format!(
                "pool '{}' declares {} but {} is {}",
                name,
                family,
                network,
                AddressFamily::of_net(&network)
            )));
        }
        if enforce_unicast {
            validation::validate_unicast(&network)?;
        }
        validation::validate_allocation_prefix(&network, allocation_prefix_len)?;

        let capacity = validation::span(allocation_prefix_len - network.prefix_len())?;
        let block_size = validation::span(family.width() - allocation_prefix_len)?;

        let mut pool = Self {
            id,
            name,
            location,
            family,
            network,
            allocation_prefix_len,
            reserved_blocks: Vec::new(),
            capacity,
            block_size,
            gateway,
            slots: Mutex::new(SlotMap::for_pool(capacity, family)),
        };

        for held in reserved_blocks {
            let offset = pool.offset_of(&held)?;
            if !pool.slots.get_mut().seat_marker(offset, Marker::HeldBack) {
                warn!(
                    pool = %pool.name,
                    block = %held,
                    "Held-back block overlaps a permanent marker"
                );
            }
            pool.reserved_blocks.push(held);
        }

        info!(
            pool_id = pool.id,
            name = %pool.name,
            network = %pool.network,
            allocation_prefix_len = pool.allocation_prefix_len,
            capacity = %pool.capacity,
            "Registered pool"
        );

        Ok(Arc::new(pool))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn network(&self) -> IpNet {
        self.network
    }

    pub fn allocation_prefix_len(&self) -> u8 {
        self.allocation_prefix_len
    }

    pub fn reserved_blocks(&self) -> &[IpNet] {
        &self.reserved_blocks
    }

    /// Total number of blocks the pool can be carved into
    pub fn capacity(&self) -> u128 {
        self.capacity
    }

    /// CIDR of the block at `offset`
    fn block_cidr(&self, offset: u128) -> Result<IpNet> {
        let base = AddressFamily::to_bits(self.network.network()) + self.block_size * offset;
        Ok(IpNet::new(
            self.family.from_bits(base),
            self.allocation_prefix_len,
        )?)
    }

    /// Offset of a block-sized CIDR within this pool
    fn offset_of(&self, cidr: &IpNet) -> Result<u128> {
        validation::ensure_strict(cidr)?;
        if AddressFamily::of_net(cidr) != self.family {
            return Err(Error::InvalidArgument(format!(
                "{} is not an {} network",
                cidr, self.family
            )));
        }
        if cidr.prefix_len() != self.allocation_prefix_len {
            return Err(Error::InvalidArgument(format!(
                "{} is not a /{} block",
                cidr, self.allocation_prefix_len
            )));
        }
        if !self.network.contains(cidr) {
            return Err(Error::InvalidArgument(format!(
                "{} is not within pool {}",
                cidr, self.network
            )));
        }

        let distance =
            AddressFamily::to_bits(cidr.network()) - AddressFamily::to_bits(self.network.network());
        Ok(distance / self.block_size)
    }

    /// Issue the lowest free block to `client`
    ///
    /// The assignment is recorded durably before the block becomes visible in
    /// the pool or on the client. Two calls yield two distinct blocks.
    #[instrument(skip(self, client), fields(pool = %self.name, client = %client.name()))]
    pub async fn create_block(
        self: &Arc<Self>,
        client: &Arc<ClientRecord>,
    ) -> Result<Arc<AddressBlock>> {
        let mut slots = self.slots.lock().await;

        let offset = slots.first_free().ok_or_else(|| {
            Error::PoolExhausted(format!(
                "no free /{} block in pool '{}' ({})",
                self.allocation_prefix_len, self.name, self.network
            ))
        })?;
        let cidr = self.block_cidr(offset)?;

        let block_id = match self
            .gateway
            .record_block_assignment(self.id, client.id(), cidr)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(block = %cidr, error = %e, "Assignment not recorded, block not issued");
                return Err(e);
            }
        };

        let block = Arc::new(AddressBlock::owned(
            cidr,
            BlockOwner {
                block_id,
                pool: Arc::downgrade(self),
                pool_prefix_len: self.network.prefix_len(),
                client: Arc::downgrade(client),
                client_id: client.id(),
                gateway: self.gateway.clone(),
            },
        )?);

        if let Err(e) = client.attach(block.clone()) {
            if let Err(undo) = self.gateway.delete_block_assignment(block_id).await {
                warn!(block_id, error = %undo, "Orphaned block assignment left in storage");
            }
            return Err(e);
        }
        slots.insert_entry(offset, block.clone());

        info!(block_id, block = %cidr, offset = %offset, "Created block");
        Ok(block)
    }

    /// Offset of the live block with the given CIDR
    pub async fn lookup_block_offset(&self, cidr: &IpNet) -> Result<u128> {
        let offset = self.offset_of(cidr)?;
        let slots = self.slots.lock().await;
        match slots.get(offset) {
            Some(Slot::Entry(_)) => Ok(offset),
            _ => Err(Error::NotFound(format!(
                "no block {} in pool '{}'",
                cidr, self.name
            ))),
        }
    }

    /// Live block with the given CIDR
    pub async fn block(&self, cidr: &IpNet) -> Result<Arc<AddressBlock>> {
        let offset = self.offset_of(cidr)?;
        let slots = self.slots.lock().await;
        match slots.get(offset) {
            Some(Slot::Entry(block)) => Ok(block.clone()),
            _ => Err(Error::NotFound(format!(
                "no block {} in pool '{}'",
                cidr, self.name
            ))),
        }
    }

    /// Snapshot of every live block, lowest offset first
    pub async fn blocks(&self) -> Vec<Arc<AddressBlock>> {
        let slots = self.slots.lock().await;
        slots.entries().map(|(_, block)| block.clone()).collect()
    }

    /// Drop a block's offset entry
    ///
    /// Emptiness is the caller's concern. Markers are never removed. Returns
    /// false if the block was not live in this pool.
    pub async fn detach_block(&self, block: &AddressBlock) -> bool {
        let Ok(offset) = self.offset_of(&block.cidr()) else {
            return false;
        };
        let mut slots = self.slots.lock().await;
        match slots.get(offset) {
            Some(Slot::Entry(live)) if **live == *block => slots.remove_entry(offset).is_some(),
            _ => false,
        }
    }

    /// Number of free block slots
    pub async fn report_usage(&self) -> u128 {
        self.slots.lock().await.free()
    }

    /// Number of issued blocks, markers excluded
    pub async fn blocks_in_use(&self) -> usize {
        self.slots.lock().await.entries().count()
    }
}

impl std::fmt::Debug for AddressPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressPool")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("location", &self.location)
            .field("network", &self.network)
            .field("allocation_prefix_len", &self.allocation_prefix_len)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
