use std::{num::NonZeroU32, ptr::NonNull};

use ahash::AHashMap;

use crate::resource::{
    BufferResource, BufferTarget, MapAccess, ResourceError, ResourceHandle, UsageHint,
};

#[derive(Debug)]
struct HostBuffer {
    data: Box<[u8]>,
    target: BufferTarget,
    usage: UsageHint,
    mapped: Option<MapAccess>,
}

/// A [BufferResource] backed by host memory.
///
/// Stands in for a graphics context wherever one isn't available: tests, tools and the
/// visualizer. New buffers are filled with [HostDevice::UNINITIALIZED] so reads of bytes nobody
/// wrote are easy to spot.
#[derive(Debug)]
pub struct HostDevice {
    buffers: AHashMap<ResourceHandle, HostBuffer>,
    bound: AHashMap<BufferTarget, ResourceHandle>,
    next_handle: u32,
    /// Maximum number of bytes all live buffers may add up to.
    budget: Option<u64>,
    created: usize,
    destroyed: usize,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice {
    /// Fill byte of freshly created buffers.
    pub const UNINITIALIZED: u8 = 0xCD;

    pub fn new() -> Self {
        HostDevice {
            buffers: Default::default(),
            bound: Default::default(),
            next_handle: 1,
            budget: None,
            created: 0,
            destroyed: 0,
        }
    }

    /// Creates a device that fails to create buffers once the live ones would exceed `bytes`.
    pub fn with_budget(bytes: u64) -> Self {
        HostDevice {
            budget: Some(bytes),
            ..Self::new()
        }
    }

    pub fn set_budget(&mut self, budget: Option<u64>) {
        self.budget = budget;
    }

    /// Total size of every live buffer.
    pub fn live_bytes(&self) -> u64 {
        self.buffers.values().map(|b| b.data.len() as u64).sum()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn created_count(&self) -> usize {
        self.created
    }

    pub fn destroyed_count(&self) -> usize {
        self.destroyed
    }

    pub fn bound(&self, target: BufferTarget) -> Option<ResourceHandle> {
        self.bound.get(&target).copied()
    }

    pub fn is_mapped(&self, handle: ResourceHandle) -> bool {
        self.buffers
            .get(&handle)
            .map_or(false, |buffer| buffer.mapped.is_some())
    }

    pub fn usage(&self, handle: ResourceHandle) -> Option<UsageHint> {
        self.buffers.get(&handle).map(|buffer| buffer.usage)
    }

    /// Contents of a buffer, for inspection while it is not mapped.
    pub fn contents(&self, handle: ResourceHandle) -> Option<&[u8]> {
        self.buffers
            .get(&handle)
            .filter(|buffer| buffer.mapped.is_none())
            .map(|buffer| &buffer.data[..])
    }

    fn buffer_mut(&mut self, handle: ResourceHandle) -> Result<&mut HostBuffer, ResourceError> {
        self.buffers
            .get_mut(&handle)
            .ok_or(ResourceError::UnknownHandle(handle))
    }
}

// SAFETY: mapped pointers point into a boxed slice that is neither moved nor reallocated until the
// buffer is removed in `destroy`.
unsafe impl BufferResource for HostDevice {
    fn create(
        &mut self,
        target: BufferTarget,
        capacity: u64,
        usage: UsageHint,
    ) -> Result<ResourceHandle, ResourceError> {
        if let Some(budget) = self.budget {
            if self.live_bytes().saturating_add(capacity) > budget {
                return Err(ResourceError::OutOfMemory {
                    requested: capacity,
                });
            }
        }

        let out_of_memory = ResourceError::OutOfMemory {
            requested: capacity,
        };
        let mut data = Vec::new();
        usize::try_from(capacity)
            .ok()
            .and_then(|len| data.try_reserve_exact(len).ok())
            .ok_or(out_of_memory)?;
        data.resize(capacity as usize, Self::UNINITIALIZED);

        let raw = NonZeroU32::new(self.next_handle).ok_or(ResourceError::OutOfMemory {
            requested: capacity,
        })?;
        self.next_handle = self.next_handle.wrapping_add(1);
        let handle = ResourceHandle::new(raw);

        self.buffers.insert(
            handle,
            HostBuffer {
                data: data.into_boxed_slice(),
                target,
                usage,
                mapped: None,
            },
        );
        self.created += 1;
        Ok(handle)
    }

    fn destroy(&mut self, handle: ResourceHandle) -> Result<(), ResourceError> {
        let buffer = self
            .buffers
            .remove(&handle)
            .ok_or(ResourceError::UnknownHandle(handle))?;
        if self.bound.get(&buffer.target) == Some(&handle) {
            self.bound.remove(&buffer.target);
        }
        self.destroyed += 1;
        Ok(())
    }

    fn bind(&mut self, target: BufferTarget, handle: ResourceHandle) -> Result<(), ResourceError> {
        self.buffer_mut(handle)?;
        self.bound.insert(target, handle);
        Ok(())
    }

    fn unbind(&mut self, target: BufferTarget) {
        self.bound.remove(&target);
    }

    fn map(
        &mut self,
        handle: ResourceHandle,
        access: MapAccess,
    ) -> Result<NonNull<u8>, ResourceError> {
        let buffer = self.buffer_mut(handle)?;
        if buffer.mapped.is_some() {
            return Err(ResourceError::AlreadyMapped(handle));
        }
        buffer.mapped = Some(access);
        Ok(NonNull::from(&mut buffer.data[..]).cast())
    }

    fn unmap(&mut self, handle: ResourceHandle) -> Result<(), ResourceError> {
        let buffer = self.buffer_mut(handle)?;
        buffer
            .mapped
            .take()
            .map(|_| ())
            .ok_or(ResourceError::NotMapped(handle))
    }

    fn write_range(
        &mut self,
        handle: ResourceHandle,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), ResourceError> {
        let buffer = self.buffer_mut(handle)?;
        let capacity = buffer.data.len() as u64;
        let end = offset + bytes.len() as u64;
        if end > capacity {
            return Err(ResourceError::OutOfRange {
                offset,
                end,
                capacity,
            });
        }
        buffer.data[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }
}
