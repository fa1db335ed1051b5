//! Sub-allocation of GPU geometry buffers.
//!
//! A [Vbo] carves one native buffer into blocks that are allocated and freed independently, and
//! grows the buffer (recreating the native resource) when it runs out of room. The native API is
//! abstracted by [BufferResource]; [HostDevice] implements it on top of host memory.

pub mod block;
pub mod config;
pub mod error;
pub mod free_list;
pub mod host;
pub mod manager;
pub mod resource;
pub mod vbo;

pub use block::{Block, BlockChain, BlockId};
pub use config::VboConfig;
pub use error::{ConsistencyError, VboError};
pub use free_list::FreeList;
pub use host::HostDevice;
pub use manager::{ManagerStats, VboManager};
pub use resource::{
    BufferResource, BufferTarget, MapAccess, ResourceError, ResourceHandle, UsageHint,
};
pub use vbo::{BlockHandle, Vbo, VboId, VboState};

pub type Result<T> = std::result::Result<T, VboError>;

#[cfg(test)]
mod test;
