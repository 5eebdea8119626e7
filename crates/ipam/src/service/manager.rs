//! IPAM Manager Service
//!
//! Entry point for the request layer:
//! - Pool registration and lookup by name
//! - Client resolution by name
//! - Block issuance and lookup by CIDR

use crate::allocator::{AddressBlock, AddressPool};
use crate::client::ClientRecord;
use crate::config::IpamConfig;
use crate::gateway::{Gateway, GatewayHandle};
use crate::models::PoolDescriptor;
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ipnet::IpNet;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Per-pool usage summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolUsage {
    pub name: String,
    pub network: IpNet,
    pub allocation_prefix_len: u8,
    pub blocks_in_use: usize,
    /// Serialized as a string: IPv6 pools can exceed u64
    #[serde(serialize_with = "serialize_u128")]
    pub free_blocks: u128,
}

fn serialize_u128<S: serde::Serializer>(
    value: &u128,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// IPAM Manager - resolves pools and clients for the request layer
pub struct IpamManager {
    /// Configuration
    config: IpamConfig,
    /// Persistence gateway shared by every pool and block
    gateway: GatewayHandle,
    /// Pools indexed by name
    pools: DashMap<String, Arc<AddressPool>>,
    /// Clients indexed by machine name
    clients: DashMap<String, Arc<ClientRecord>>,
}

impl IpamManager {
    /// Create a manager with the default configuration
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self::with_config(gateway, IpamConfig::default())
    }

    /// Create a manager with custom configuration
    pub fn with_config(gateway: Arc<dyn Gateway>, config: IpamConfig) -> Self {
        let gateway = GatewayHandle::new(gateway, config.gateway_timeout);
        Self {
            config,
            gateway,
            pools: DashMap::new(),
            clients: DashMap::new(),
        }
    }

    pub fn config(&self) -> &IpamConfig {
        &self.config
    }

    // ==================== Pool Operations ====================

    /// Register every stored pool for this node's location
    ///
    /// Returns the number of pools registered. Pools already registered
    /// under the same name are left alone. A descriptor that fails
    /// validation is skipped so the rest still load; the rejections are
    /// reported together as one `InvalidArgument` once the pass completes.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<usize> {
        let descriptors = self.gateway.load_pools().await?;
        let mut registered = 0;
        let mut rejected = Vec::new();

        for descriptor in descriptors {
            if !self.config.accepts_location(&descriptor.location) {
                debug!(
                    pool = %descriptor.name,
                    location = %descriptor.location,
                    "Skipping pool for other location"
                );
                continue;
            }
            if self.pools.contains_key(&descriptor.name) {
                continue;
            }

            let name = descriptor.name.clone();
            match self.register_pool(descriptor) {
                Ok(_) => registered += 1,
                Err(e) => {
                    warn!(pool = %name, error = %e, "Rejected stored pool");
                    rejected.push(format!("'{}': {}", name, e));
                }
            }
        }

        info!(registered, rejected = rejected.len(), total = self.pools.len(), "Loaded pools");
        if !rejected.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "{} stored pool(s) rejected: {}",
                rejected.len(),
                rejected.join("; ")
            )));
        }
        Ok(registered)
    }

    /// Register a single pool
    pub fn register_pool(&self, descriptor: PoolDescriptor) -> Result<Arc<AddressPool>> {
        match self.pools.entry(descriptor.name.clone()) {
            Entry::Occupied(_) => Err(Error::InvalidArgument(format!(
                "pool '{}' is already registered",
                descriptor.name
            ))),
            Entry::Vacant(slot) => {
                let pool = AddressPool::new(
                    descriptor,
                    self.gateway.clone(),
                    self.config.enforce_unicast,
                )?;
                slot.insert(pool.clone());
                Ok(pool)
            }
        }
    }

    /// Get a pool by name
    pub fn pool(&self, name: &str) -> Result<Arc<AddressPool>> {
        self.pools
            .get(name)
            .map(|p| p.clone())
            .ok_or_else(|| Error::NotFound(format!("pool '{}'", name)))
    }

    /// List all pools
    pub fn pools(&self) -> Vec<Arc<AddressPool>> {
        let mut pools: Vec<_> = self.pools.iter().map(|p| p.clone()).collect();
        pools.sort_by_key(|p| p.id());
        pools
    }

    /// Usage summary for every pool
    pub async fn usage(&self) -> Vec<PoolUsage> {
        let mut usage = Vec::new();
        for pool in self.pools() {
            usage.push(PoolUsage {
                name: pool.name().to_string(),
                network: pool.network(),
                allocation_prefix_len: pool.allocation_prefix_len(),
                blocks_in_use: pool.blocks_in_use().await,
                free_blocks: pool.report_usage().await,
            });
        }
        usage
    }

    // ==================== Client Operations ====================

    /// Get a client by machine name, loading it from storage on first use
    pub async fn client(&self, name: &str) -> Result<Arc<ClientRecord>> {
        if let Some(client) = self.clients.get(name) {
            return Ok(client.clone());
        }

        let loaded = Arc::new(ClientRecord::load(name, &self.gateway).await?);
        // A concurrent load may have won the race; keep whichever landed first.
        let client = self
            .clients
            .entry(name.to_string())
            .or_insert(loaded)
            .clone();
        Ok(client)
    }

    // ==================== Block Operations ====================

    /// Issue a new block from the named pool to the named client
    pub async fn create_block(
        &self,
        pool_name: &str,
        client_name: &str,
    ) -> Result<Arc<AddressBlock>> {
        let pool = self.pool(pool_name)?;
        let client = self.client(client_name).await?;
        pool.create_block(&client).await
    }

    /// Find a live block by CIDR across all pools
    pub async fn find_block(&self, cidr: &IpNet) -> Result<Arc<AddressBlock>> {
        let pool = self
            .pools()
            .into_iter()
            .find(|p| p.network().contains(cidr))
            .ok_or_else(|| Error::NotFound(format!("no pool contains {}", cidr)))?;
        pool.block(cidr).await
    }
}

impl std::fmt::Debug for IpamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpamManager")
            .field("config", &self.config)
            .field("pools", &self.pools.len())
            .field("clients", &self.clients.len())
            .finish()
    }
}
