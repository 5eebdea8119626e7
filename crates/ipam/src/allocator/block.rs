//! Address block: one allocation unit owned by one client
//!
//! A block is either a single address (/32, /128) or a subnet carved out of
//! an [`AddressPool`]. It tracks the lifecycle state of every address it
//! contains in a sparse offset map guarded by a per-block lock; the lock is
//! held across the gateway write so storage and memory never diverge.

use super::slots::{Slot, SlotMap};
use super::AddressPool;
use crate::client::ClientRecord;
use crate::gateway::GatewayHandle;
use crate::models::{
    AddressFamily, AddressState, AddressStatus, AddressStatusUpdate, InterfaceAddress,
};
use crate::validation;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Link from a server-issued block back to its pool, client and storage
pub(crate) struct BlockOwner {
    pub block_id: u64,
    pub pool: Weak<AddressPool>,
    /// Prefix length of the owning pool's base network
    pub pool_prefix_len: u8,
    pub client: Weak<ClientRecord>,
    pub client_id: u64,
    pub gateway: GatewayHandle,
}

struct BlockState {
    slots: SlotMap<AddressStatus>,
    /// Set once `remove` succeeds; every later operation fails
    removed: bool,
}

/// A block of one or more addresses
pub struct AddressBlock {
    cidr: IpNet,
    family: AddressFamily,
    capacity: u128,
    owner: Option<BlockOwner>,
    state: Mutex<BlockState>,
}

impl AddressBlock {
    /// Create a free-standing block with no pool, client or storage
    pub fn new(cidr: IpNet) -> Result<Self> {
        Self::build(cidr, None)
    }

    pub(crate) fn owned(cidr: IpNet, owner: BlockOwner) -> Result<Self> {
        Self::build(cidr, Some(owner))
    }

    fn build(cidr: IpNet, owner: Option<BlockOwner>) -> Result<Self> {
        validation::ensure_strict(&cidr)?;
        let family = AddressFamily::of_net(&cidr);
        let capacity = validation::span(family.width() - cidr.prefix_len())?;

        Ok(Self {
            cidr,
            family,
            capacity,
            owner,
            state: Mutex::new(BlockState {
                slots: SlotMap::for_block(capacity, family),
                removed: false,
            }),
        })
    }

    /// Durable id; `None` for free-standing blocks
    pub fn id(&self) -> Option<u64> {
        self.owner.as_ref().map(|o| o.block_id)
    }

    pub fn cidr(&self) -> IpNet {
        self.cidr
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Number of addresses the block spans, markers included
    pub fn capacity(&self) -> u128 {
        self.capacity
    }

    /// Id of the owning client, if any
    pub fn client_id(&self) -> Option<u64> {
        self.owner.as_ref().map(|o| o.client_id)
    }

    /// Owning client, if it is still alive
    pub fn client(&self) -> Option<Arc<ClientRecord>> {
        self.owner.as_ref().and_then(|o| o.client.upgrade())
    }

    /// Owning pool, if it is still alive
    pub fn pool(&self) -> Option<Arc<AddressPool>> {
        self.owner.as_ref().and_then(|o| o.pool.upgrade())
    }

    /// Offset of `address` from the block's base address
    fn offset_of(&self, address: IpAddr) -> Result<u128> {
        validation::ensure_family(&address, self.family)?;
        if !self.cidr.contains(&address) {
            return Err(Error::InvalidArgument(format!(
                "{} is not within {}",
                address, self.cidr
            )));
        }
        Ok(AddressFamily::to_bits(address) - AddressFamily::to_bits(self.cidr.network()))
    }

    fn address_at(&self, offset: u128) -> IpAddr {
        self.family
            .from_bits(AddressFamily::to_bits(self.cidr.network()) + offset)
    }

    fn ensure_live(&self, state: &BlockState) -> Result<()> {
        if state.removed {
            return Err(Error::NotFound(format!("block {} has been removed", self.cidr)));
        }
        Ok(())
    }

    fn current_state(
        slots: &SlotMap<AddressStatus>,
        offset: u128,
        address: IpAddr,
    ) -> Result<AddressState> {
        match slots.get(offset) {
            None => Ok(AddressState::Unused),
            Some(Slot::Entry(status)) => Ok(status.state),
            Some(Slot::Marker(marker)) => Err(Error::InvalidState(format!(
                "{} is permanently reserved as {:?}",
                address, marker
            ))),
        }
    }

    /// Push the new state to storage, then apply it to the offset map
    ///
    /// A failed write leaves the map untouched.
    async fn commit(
        &self,
        state: &mut BlockState,
        offset: u128,
        address: IpAddr,
        from: AddressState,
        to: AddressState,
        reservation_expiry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(owner) = &self.owner {
            let update = AddressStatusUpdate {
                block_id: owner.block_id,
                client_id: owner.client_id,
                address,
                state: to,
                reservation_expiry,
            };
            if let Err(e) = owner.gateway.record_address_status(&update).await {
                warn!(
                    block = %self.cidr,
                    address = %address,
                    error = %e,
                    "Status not recorded, discarding transition"
                );
                return Err(e);
            }
        }

        if to == AddressState::Unused {
            state.slots.remove_entry(offset);
        } else {
            state.slots.insert_entry(
                offset,
                AddressStatus {
                    state: to,
                    reservation_expiry,
                },
            );
        }

        debug!(
            block = %self.cidr,
            address = %address,
            from = %from,
            to = %to,
            "Address transition"
        );
        Ok(())
    }

    async fn transition(
        &self,
        address: IpAddr,
        allowed_from: &[AddressState],
        to: AddressState,
        reservation_expiry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let offset = self.offset_of(address)?;
        let mut state = self.state.lock().await;
        self.ensure_live(&state)?;

        let current = Self::current_state(&state.slots, offset, address)?;
        if !allowed_from.contains(&current) {
            return Err(Error::InvalidState(format!(
                "{} is {}, cannot move to {}",
                address, current, to
            )));
        }

        self.commit(&mut state, offset, address, current, to, reservation_expiry)
            .await
    }

    /// First unused address in the block
    ///
    /// Does not reserve it; see [`AddressBlock::reserve_next`].
    pub async fn get_free_address(&self) -> Result<IpAddr> {
        let state = self.state.lock().await;
        self.ensure_live(&state)?;
        state
            .slots
            .first_free()
            .map(|offset| self.address_at(offset))
            .ok_or_else(|| Error::BlockFull(format!("no unused address in {}", self.cidr)))
    }

    /// `Unused -> Reserved`
    #[instrument(skip(self), fields(block = %self.cidr))]
    pub async fn reserve(&self, address: IpAddr) -> Result<()> {
        self.transition(address, &[AddressState::Unused], AddressState::Reserved, None)
            .await
    }

    /// `Unused -> Reserved`, recording when the reservation lapses
    ///
    /// The expiry is stored only; nothing releases the address when it passes.
    pub async fn reserve_until(&self, address: IpAddr, expiry: DateTime<Utc>) -> Result<()> {
        self.transition(
            address,
            &[AddressState::Unused],
            AddressState::Reserved,
            Some(expiry),
        )
        .await
    }

    /// Find and reserve the first unused address under a single lock hold
    #[instrument(skip(self), fields(block = %self.cidr))]
    pub async fn reserve_next(&self) -> Result<IpAddr> {
        let mut state = self.state.lock().await;
        self.ensure_live(&state)?;

        let offset = state
            .slots
            .first_free()
            .ok_or_else(|| Error::BlockFull(format!("no unused address in {}", self.cidr)))?;
        let address = self.address_at(offset);

        self.commit(
            &mut state,
            offset,
            address,
            AddressState::Unused,
            AddressState::Reserved,
            None,
        )
        .await?;
        Ok(address)
    }

    /// `Reserved -> ActiveUtilized`
    pub async fn mark_utilized(&self, address: IpAddr) -> Result<()> {
        self.transition(
            address,
            &[AddressState::Reserved],
            AddressState::ActiveUtilized,
            None,
        )
        .await
    }

    /// `ActiveUtilized -> Standby`
    pub async fn move_to_standby(&self, address: IpAddr) -> Result<()> {
        self.transition(
            address,
            &[AddressState::ActiveUtilized],
            AddressState::Standby,
            None,
        )
        .await
    }

    /// `Standby | Reserved -> Unused`
    pub async fn release_to_unused(&self, address: IpAddr) -> Result<()> {
        self.transition(
            address,
            &[AddressState::Standby, AddressState::Reserved],
            AddressState::Unused,
            None,
        )
        .await
    }

    /// Current state of one address
    pub async fn state_of(&self, address: IpAddr) -> Result<AddressState> {
        let offset = self.offset_of(address)?;
        let state = self.state.lock().await;
        self.ensure_live(&state)?;
        Self::current_state(&state.slots, offset, address)
    }

    /// Every address in use, with its state; permanent markers are excluded
    pub async fn report_usage(&self) -> BTreeMap<IpAddr, AddressState> {
        let state = self.state.lock().await;
        state
            .slots
            .entries()
            .map(|(offset, status)| (self.address_at(offset), status.state))
            .collect()
    }

    /// Stored status of one address, if it is in use
    pub async fn status_of(&self, address: IpAddr) -> Result<Option<AddressStatus>> {
        let offset = self.offset_of(address)?;
        let state = self.state.lock().await;
        self.ensure_live(&state)?;
        match state.slots.get(offset) {
            Some(Slot::Entry(status)) => Ok(Some(*status)),
            _ => Ok(None),
        }
    }

    /// Number of addresses still available for reservation
    pub async fn available_count(&self) -> u128 {
        self.state.lock().await.slots.free()
    }

    /// True when no address other than the permanent markers is in use
    pub async fn is_empty(&self) -> bool {
        !self.state.lock().await.slots.has_entries()
    }

    pub async fn is_removed(&self) -> bool {
        self.state.lock().await.removed
    }

    /// Address tuple for the interface configurator
    ///
    /// Only reserved or active addresses are handed out. The prefix length is
    /// the pool's on-link prefix, or the block's own for free-standing blocks.
    pub async fn interface_address(&self, address: IpAddr) -> Result<InterfaceAddress> {
        let current = self.state_of(address).await?;
        if !current.is_configurable() {
            return Err(Error::InvalidState(format!(
                "{} is {}, not ready for configuration",
                address, current
            )));
        }

        let prefix_len = self
            .owner
            .as_ref()
            .map(|o| o.pool_prefix_len)
            .unwrap_or_else(|| self.cidr.prefix_len());

        Ok(InterfaceAddress {
            address,
            prefix_len,
            family: self.family,
        })
    }

    /// Destroy an empty block
    ///
    /// Deletes the durable assignment first; only when that succeeds is the
    /// block detached from its pool and client.
    #[instrument(skip(self), fields(block = %self.cidr))]
    pub async fn remove(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_live(&state)?;

        let in_use = state.slots.entries().count();
        if in_use > 0 {
            return Err(Error::BlockNotEmpty(format!(
                "{} still has {} address(es) in use",
                self.cidr, in_use
            )));
        }

        if let Some(owner) = &self.owner {
            if let Err(e) = owner.gateway.delete_block_assignment(owner.block_id).await {
                warn!(error = %e, "Block assignment not deleted, keeping block");
                return Err(e);
            }

            // Client first: once the pool slot is free the same CIDR can be reissued
            if let Some(client) = owner.client.upgrade() {
                if !client.try_detach(self) {
                    warn!(client_id = owner.client_id, "Block was not attached to its client");
                }
            }
            if let Some(pool) = owner.pool.upgrade() {
                pool.detach_block(self).await;
            }
        }

        state.removed = true;
        info!(block_id = ?self.id(), "Removed block");
        Ok(())
    }
}

impl FromStr for AddressBlock {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(validation::parse_network(s)?)
    }
}

impl PartialEq for AddressBlock {
    fn eq(&self, other: &Self) -> bool {
        self.cidr == other.cidr
    }
}

impl Eq for AddressBlock {}

impl Hash for AddressBlock {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cidr.hash(state);
    }
}

impl std::fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cidr)
    }
}

impl std::fmt::Debug for AddressBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressBlock")
            .field("cidr", &self.cidr)
            .field("id", &self.id())
            .field("client_id", &self.client_id())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_equality_by_cidr() {
        let a: AddressBlock = "192.0.2.1/32".parse().unwrap();
        let b: AddressBlock = "192.0.2.1/32".parse().unwrap();
        let c: AddressBlock = "192.0.2.2/32".parse().unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_rejects_host_bits() {
        assert!(matches!(
            "192.0.2.1/24".parse::<AddressBlock>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_capacity() {
        let block: AddressBlock = "192.0.2.0/24".parse().unwrap();
        assert_eq!(block.capacity(), 256);

        let block: AddressBlock = "fd00:a3b1:78a2:1::/64".parse().unwrap();
        assert_eq!(block.capacity(), 1u128 << 64);
        assert_eq!(block.id(), None);
    }

    #[tokio::test]
    async fn test_single_address_round_trip() {
        for cidr in ["192.0.2.1/32", "fd00:a3b1:78a2::1/128"] {
            let block: AddressBlock = cidr.parse().unwrap();
            assert!(block.is_empty().await);

            let address = block.get_free_address().await.unwrap();
            assert_eq!(address, block.cidr().network());

            block.reserve(address).await.unwrap();
            assert!(!block.is_empty().await);

            block.release_to_unused(address).await.unwrap();
            assert!(block.is_empty().await);
        }
    }

    #[tokio::test]
    async fn test_v4_subnet_excludes_network_and_broadcast() {
        let block: AddressBlock = "192.0.2.0/30".parse().unwrap();
        assert_eq!(block.available_count().await, 2);

        assert_eq!(block.reserve_next().await.unwrap(), ip("192.0.2.1"));
        assert_eq!(block.reserve_next().await.unwrap(), ip("192.0.2.2"));
        assert!(matches!(block.reserve_next().await, Err(Error::BlockFull(_))));
        assert!(matches!(block.get_free_address().await, Err(Error::BlockFull(_))));

        assert!(matches!(
            block.reserve(ip("192.0.2.3")).await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            block.reserve(ip("192.0.2.0")).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_v6_subnet_excludes_only_network() {
        let block: AddressBlock = "fd00:a3b1:78a2:1::/126".parse().unwrap();
        assert_eq!(block.available_count().await, 3);
        assert_eq!(block.get_free_address().await.unwrap(), ip("fd00:a3b1:78a2:1::1"));

        block.reserve(ip("fd00:a3b1:78a2:1::3")).await.unwrap();
        assert_eq!(
            block.state_of(ip("fd00:a3b1:78a2:1::3")).await.unwrap(),
            AddressState::Reserved
        );
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let block: AddressBlock = "192.0.2.0/29".parse().unwrap();
        let address = ip("192.0.2.4");

        block.reserve(address).await.unwrap();
        block.mark_utilized(address).await.unwrap();
        assert_eq!(block.state_of(address).await.unwrap(), AddressState::ActiveUtilized);

        block.move_to_standby(address).await.unwrap();
        assert_eq!(block.state_of(address).await.unwrap(), AddressState::Standby);

        block.release_to_unused(address).await.unwrap();
        assert_eq!(block.state_of(address).await.unwrap(), AddressState::Unused);
        assert!(block.is_empty().await);
    }

    #[tokio::test]
    async fn test_illegal_transitions() {
        let block: AddressBlock = "192.0.2.0/29".parse().unwrap();
        let address = ip("192.0.2.2");

        assert!(matches!(block.mark_utilized(address).await, Err(Error::InvalidState(_))));
        assert!(matches!(block.move_to_standby(address).await, Err(Error::InvalidState(_))));
        assert!(matches!(block.release_to_unused(address).await, Err(Error::InvalidState(_))));

        block.reserve(address).await.unwrap();
        assert!(matches!(block.reserve(address).await, Err(Error::InvalidState(_))));
        assert!(matches!(block.move_to_standby(address).await, Err(Error::InvalidState(_))));

        block.mark_utilized(address).await.unwrap();
        assert!(matches!(block.release_to_unused(address).await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_abandoned_reservation() {
        let block: AddressBlock = "192.0.2.0/29".parse().unwrap();
        let address = block.reserve_next().await.unwrap();
        block.release_to_unused(address).await.unwrap();
        assert_eq!(block.reserve_next().await.unwrap(), address);
    }

    #[tokio::test]
    async fn test_reserve_outside_block() {
        let block: AddressBlock = "192.0.2.0/29".parse().unwrap();
        assert!(matches!(
            block.reserve(ip("192.0.2.8")).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            block.reserve(ip("fd00::1")).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_report_usage_excludes_markers() {
        let block: AddressBlock = "192.0.2.0/29".parse().unwrap();
        assert!(block.report_usage().await.is_empty());

        block.reserve(ip("192.0.2.3")).await.unwrap();
        block.reserve(ip("192.0.2.1")).await.unwrap();
        block.mark_utilized(ip("192.0.2.1")).await.unwrap();

        let usage = block.report_usage().await;
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[&ip("192.0.2.1")], AddressState::ActiveUtilized);
        assert_eq!(usage[&ip("192.0.2.3")], AddressState::Reserved);
    }

    #[tokio::test]
    async fn test_reserve_until_stores_expiry() {
        let block: AddressBlock = "192.0.2.0/29".parse().unwrap();
        let expiry = Utc::now() + chrono::Duration::hours(1);
        block.reserve_until(ip("192.0.2.5"), expiry).await.unwrap();

        let status = block.status_of(ip("192.0.2.5")).await.unwrap().unwrap();
        assert_eq!(status.state, AddressState::Reserved);
        assert_eq!(status.reservation_expiry, Some(expiry));
    }

    #[tokio::test]
    async fn test_interface_address_free_standing() {
        let block: AddressBlock = "192.0.2.0/29".parse().unwrap();
        let address = ip("192.0.2.2");
        assert!(matches!(
            block.interface_address(address).await,
            Err(Error::InvalidState(_))
        ));

        block.reserve(address).await.unwrap();
        let iface = block.interface_address(address).await.unwrap();
        assert_eq!(iface.address, address);
        assert_eq!(iface.prefix_len, 29);
        assert_eq!(iface.family, AddressFamily::V4);
    }

    #[tokio::test]
    async fn test_remove_requires_empty() {
        let block: AddressBlock = "192.0.2.1/32".parse().unwrap();
        block.reserve(ip("192.0.2.1")).await.unwrap();
        assert!(matches!(block.remove().await, Err(Error::BlockNotEmpty(_))));

        block.release_to_unused(ip("192.0.2.1")).await.unwrap();
        block.remove().await.unwrap();
        assert!(block.is_removed().await);
        assert!(matches!(block.reserve_next().await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_removed_block_rejects_queries() {
        let block: AddressBlock = "192.0.2.0/30".parse().unwrap();
        block.remove().await.unwrap();

        let address = ip("192.0.2.1");
        assert!(matches!(block.status_of(address).await, Err(Error::NotFound(_))));
        assert!(matches!(block.state_of(address).await, Err(Error::NotFound(_))));
        assert!(matches!(block.get_free_address().await, Err(Error::NotFound(_))));
    }
}
