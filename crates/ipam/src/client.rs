//! Registered machines and the blocks they own

use crate::allocator::AddressBlock;
use crate::gateway::GatewayHandle;
use crate::models::ClientDescriptor;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// A machine that requests address blocks
///
/// Every block in the collection records this client as its owner.
pub struct ClientRecord {
    id: u64,
    name: String,
    token: String,
    blocks: Mutex<Vec<Arc<AddressBlock>>>,
}

impl ClientRecord {
    pub fn new(id: u64, name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            token: token.into(),
            blocks: Mutex::new(Vec::new()),
        }
    }

    pub fn from_descriptor(descriptor: ClientDescriptor) -> Self {
        Self::new(descriptor.id, descriptor.name, descriptor.token)
    }

    /// Load a registered machine by name
    pub async fn load(name: &str, gateway: &GatewayHandle) -> Result<Self> {
        let descriptor = gateway.load_client(name).await?;
        Ok(Self::from_descriptor(descriptor))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Record ownership of a block whose assignment is already durable
    pub fn attach(&self, block: Arc<AddressBlock>) -> Result<()> {
        if block.client_id() != Some(self.id) {
            return Err(Error::InvalidArgument(format!(
                "block {} is not owned by client '{}'",
                block, self.name
            )));
        }

        let mut blocks = self.blocks.lock();
        if blocks.iter().any(|b| **b == *block) {
            return Err(Error::InvalidState(format!(
                "block {} is already attached to client '{}'",
                block, self.name
            )));
        }
        blocks.push(block);
        Ok(())
    }

    /// Remove a block, failing if it is not owned by this client
    pub fn detach(&self, block: &AddressBlock) -> Result<()> {
        if self.try_detach(block) {
            Ok(())
        } else {
            Err(Error::NotAssociated(format!(
                "block {} is not attached to client '{}'",
                block, self.name
            )))
        }
    }

    /// Remove a block if present; returns whether anything was removed
    pub fn try_detach(&self, block: &AddressBlock) -> bool {
        let mut blocks = self.blocks.lock();
        match blocks.iter().position(|b| **b == *block) {
            Some(index) => {
                blocks.remove(index);
                true
            }
            None => false,
        }
    }

    /// Snapshot of owned blocks in attach order
    pub fn list_blocks(&self) -> Vec<Arc<AddressBlock>> {
        self.blocks.lock().clone()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl std::fmt::Debug for ClientRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("blocks", &self.block_count())
            .finish_non_exhaustive()
    }
}
