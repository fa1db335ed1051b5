//! The native graphics-resource primitive a [Vbo](crate::Vbo) is built on.
//!
//! A native buffer can only be created, destroyed, bound, mapped and written as a whole; it can
//! never be resized. Everything else is bookkeeping done by the allocator.

use std::{num::NonZeroU32, ptr::NonNull};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque name of a native buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceHandle(NonZeroU32);

impl ResourceHandle {
    pub fn new(raw: NonZeroU32) -> Self {
        ResourceHandle(raw)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// What kind of data a buffer stores, and thus which binding point it is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferTarget {
    /// Vertex attribute storage.
    Vertex,
    /// Element index storage.
    Index,
}

/// How often the contents of a buffer are expected to change.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum UsageHint {
    StaticDraw,
    #[default]
    DynamicDraw,
    StreamDraw,
}

bitflags! {
    pub struct MapAccess: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("out of buffer memory ({requested} bytes requested)")]
    OutOfMemory { requested: u64 },
    #[error("unknown buffer {0:?}")]
    UnknownHandle(ResourceHandle),
    #[error("buffer {0:?} is already mapped")]
    AlreadyMapped(ResourceHandle),
    #[error("buffer {0:?} is not mapped")]
    NotMapped(ResourceHandle),
    #[error("range {offset}..{end} is outside of a buffer of {capacity} bytes")]
    OutOfRange { offset: u64, end: u64, capacity: u64 },
}

/// The operations a native graphics API offers on a fixed-size buffer.
///
/// ## Safety
/// The pointer returned by [BufferResource::map] must stay valid for reads and writes of the full
/// capacity the buffer was created with, until the matching [BufferResource::unmap] or
/// [BufferResource::destroy]. [Vbo](crate::Vbo) relies on this to copy live bytes across a resize
/// and to hand out mapped slices.
pub unsafe trait BufferResource {
    /// Allocates a buffer of `capacity` bytes. Its contents are undefined.
    fn create(
        &mut self,
        target: BufferTarget,
        capacity: u64,
        usage: UsageHint,
    ) -> Result<ResourceHandle, ResourceError>;

    fn destroy(&mut self, handle: ResourceHandle) -> Result<(), ResourceError>;

    /// Makes `handle` the current buffer of `target`.
    fn bind(&mut self, target: BufferTarget, handle: ResourceHandle) -> Result<(), ResourceError>;

    fn unbind(&mut self, target: BufferTarget);

    /// Exposes the whole buffer to the host.
    fn map(
        &mut self,
        handle: ResourceHandle,
        access: MapAccess,
    ) -> Result<NonNull<u8>, ResourceError>;

    fn unmap(&mut self, handle: ResourceHandle) -> Result<(), ResourceError>;

    /// Copies `bytes` into the buffer at `offset` without mapping it.
    fn write_range(
        &mut self,
        handle: ResourceHandle,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), ResourceError>;
}
