use thiserror::Error;

use crate::{block::BlockId, resource::ResourceError, vbo::VboState};

#[derive(Error, Debug)]
pub enum VboError {
    #[error("allocator inactive")]
    AllocatorInactive,
    #[error("cannot {operation} while the allocator is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: VboState,
    },
    #[error("block belongs to another allocator")]
    ForeignBlock,
    #[error("block has been freed or merged into a neighbour")]
    StaleBlock,
    #[error("block is already queued for freeing")]
    AlreadyPending,
    #[error("write of {len} bytes at offset {offset} overruns a block of {capacity} bytes")]
    OutOfBounds { offset: u64, len: u64, capacity: u64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The native resource could not be (re)created. The allocator cannot be used anymore.
    #[error("could not create a buffer of {requested} bytes")]
    ResourceExhausted {
        requested: u64,
        #[source]
        source: ResourceError,
    },
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl VboError {
    /// Whether the error is a caller bug rather than a runtime failure of the native resource.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, VboError::ResourceExhausted { .. } | VboError::Resource(_))
    }
}

/// A broken block chain or free list invariant, found by
/// [Vbo::check_consistency](crate::Vbo::check_consistency).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("{block:?} is not linked back to its predecessor")]
    BrokenLink { block: BlockId },
    #[error("{block:?} starts at {offset} instead of {expected}")]
    Discontiguous {
        block: BlockId,
        offset: u64,
        expected: u64,
    },
    #[error("{block:?} is empty")]
    EmptyBlock { block: BlockId },
    #[error("{block:?} is free and so is its predecessor")]
    AdjacentFree { block: BlockId },
    #[error("chain ends at {chain_end} but the buffer holds {total} bytes")]
    CapacityMismatch { chain_end: u64, total: u64 },
    #[error("the chain does not end at the recorded last block")]
    EndpointMismatch,
    #[error("{block:?} is free but unlisted, or listed but not free")]
    FreeListMismatch { block: BlockId },
    #[error("free blocks add up to {actual} bytes but {tracked} are tracked")]
    FreeCapacityMismatch { tracked: u64, actual: u64 },
    #[error("free list is out of order")]
    UnsortedFreeList,
}
