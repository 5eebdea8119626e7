//! Two-level address allocation
//!
//! - [`AddressPool`]: carves a configured range into equal-sized blocks
//! - [`AddressBlock`]: tracks the lifecycle of each address within a block

mod block;
mod pool;
mod slots;

pub use block::AddressBlock;
pub use pool::AddressPool;
