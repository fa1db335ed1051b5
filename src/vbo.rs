use std::{
    num::NonZeroU64,
    ops::Range,
    ptr::NonNull,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::{
    block::{Block, BlockChain, BlockId},
    config::VboConfig,
    error::{ConsistencyError, VboError},
    free_list::FreeList,
    manager::UsageTracker,
    resource::{
        BufferResource, BufferTarget, MapAccess, ResourceError, ResourceHandle, UsageHint,
    },
};

static NEXT_VBO_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a [Vbo] for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VboId(u32);

impl VboId {
    fn next() -> Self {
        VboId(NEXT_VBO_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VboState {
    /// No resource is bound. Allocation and mapping are illegal.
    Inactive,
    /// The resource exists and is bound.
    Active,
    /// Writes go through [BufferResource::write_range], one block at a time.
    PartiallyMapped,
    /// The whole resource is mapped into host memory.
    FullyMapped,
}

/// A block handed out by [Vbo::allocate_block].
///
/// This is a loan: only [Vbo::free_block] and the deferred free queue can retire it. Handles of
/// retired blocks are rejected by every [Vbo] operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    vbo: VboId,
    id: BlockId,
    lease: u64,
    capacity: u64,
}

impl BlockHandle {
    /// Size of the block in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Always 0. The position of a block is only known to its [Vbo].
    #[deprecated(note = "use `Vbo::block_offset` instead")]
    pub fn offset(&self) -> u64 {
        0
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn vbo(&self) -> VboId {
        self.vbo
    }
}

/// Sub-allocates one native buffer into independently allocated and freed blocks.
///
/// Free space is found best-fit through a [FreeList]; freed blocks are merged with free neighbours
/// right away. When no free block is big enough the buffer grows by [VboConfig::growth_factor],
/// which recreates the native resource and copies the live bytes over.
///
/// The native API is passed in on every call that needs it, so a `Vbo` only ever owns the
/// [ResourceHandle] of its buffer.
pub struct Vbo {
    id: VboId,
    target: BufferTarget,
    usage: UsageHint,
    config: VboConfig,
    total_capacity: u64,
    chain: BlockChain,
    free_blocks: FreeList,
    state: VboState,
    handle: Option<ResourceHandle>,
    mapped: Option<NonNull<u8>>,
    pending: Vec<BlockHandle>,
    next_lease: u64,
    tracker: Option<UsageTracker>,
}

impl Vbo {
    /// Creates an inactive allocator managing `capacity` bytes. No native resource is created
    /// until [Vbo::activate].
    pub fn new(target: BufferTarget, capacity: NonZeroU64) -> Self {
        let config = VboConfig::default();
        Self::from_parts(target, capacity, config.usage, config, None)
    }

    pub fn with_config(
        target: BufferTarget,
        capacity: NonZeroU64,
        config: VboConfig,
    ) -> Result<Self, VboError> {
        config.validate()?;
        Ok(Self::from_parts(
            target,
            capacity,
            config.usage,
            config,
            None,
        ))
    }

    pub(crate) fn from_parts(
        target: BufferTarget,
        capacity: NonZeroU64,
        usage: UsageHint,
        config: VboConfig,
        tracker: Option<UsageTracker>,
    ) -> Self {
        let capacity = capacity.get();
        let mut chain = BlockChain::new(capacity);
        let mut free_blocks = FreeList::new();
        let first = chain.first();
        free_blocks.insert(&mut chain, first);

        let vbo = Vbo {
            id: VboId::next(),
            target,
            usage,
            config,
            total_capacity: capacity,
            chain,
            free_blocks,
            state: VboState::Inactive,
            handle: None,
            mapped: None,
            pending: vec![],
            next_lease: 1,
            tracker,
        };
        vbo.debug_check();
        vbo
    }

    pub fn id(&self) -> VboId {
        self.id
    }

    pub fn target(&self) -> BufferTarget {
        self.target
    }

    pub fn usage(&self) -> UsageHint {
        self.usage
    }

    pub fn config(&self) -> &VboConfig {
        &self.config
    }

    pub fn state(&self) -> VboState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != VboState::Inactive
    }

    /// Total size of the buffer in bytes.
    pub fn capacity(&self) -> u64 {
        self.total_capacity
    }

    pub fn free_capacity(&self) -> u64 {
        self.free_blocks.free_capacity()
    }

    pub fn used_capacity(&self) -> u64 {
        self.total_capacity - self.free_capacity()
    }

    /// The native resource, if one has been created.
    pub fn resource_handle(&self) -> Option<ResourceHandle> {
        self.handle
    }

    /// Every block in physical order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.chain.iter().map(|(_, block)| block)
    }

    pub fn block_count(&self) -> usize {
        self.chain.len()
    }

    pub fn free_list(&self) -> &FreeList {
        &self.free_blocks
    }

    /// Number of blocks queued by [Vbo::enqueue_block_for_freeing].
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `handle` refers to a block that currently lives in this allocator.
    pub fn owns_block(&self, handle: &BlockHandle) -> bool {
        handle.vbo == self.id && self.chain.contains(handle.id)
    }

    /// Byte position of an allocated block inside the buffer.
    pub fn block_offset(&self, handle: &BlockHandle) -> Result<u64, VboError> {
        let id = self.validate(handle)?;
        Ok(self.chain.block(id).offset())
    }

    fn validate(&self, handle: &BlockHandle) -> Result<BlockId, VboError> {
        if handle.vbo != self.id {
            return Err(VboError::ForeignBlock);
        }
        match self.chain.get(handle.id) {
            Some(block) if !block.is_free() && block.lease == handle.lease => Ok(handle.id),
            _ => Err(VboError::StaleBlock),
        }
    }

    /// Binds the native resource, creating it first if needed.
    ///
    /// Returns whether a new resource was created. A new resource has undefined contents.
    pub fn activate(&mut self, device: &mut impl BufferResource) -> Result<bool, VboError> {
        if self.state != VboState::Inactive {
            return Err(VboError::InvalidState {
                operation: "activate",
                state: self.state,
            });
        }

        let created = match self.handle {
            Some(handle) => {
                device.bind(self.target, handle)?;
                false
            }
            None => {
                let handle = device
                    .create(self.target, self.total_capacity, self.usage)
                    .map_err(|source| VboError::ResourceExhausted {
                        requested: self.total_capacity,
                        source,
                    })?;
                log::debug!(
                    "[Vbo]: created {:?} buffer {} of {} bytes",
                    self.target,
                    handle.get(),
                    self.total_capacity
                );
                self.handle = Some(handle);
                device.bind(self.target, handle)?;
                true
            }
        };

        self.state = VboState::Active;
        Ok(created)
    }

    /// Unbinds the native resource. The resource itself is kept; see [Vbo::destroy_resource].
    pub fn deactivate(&mut self, device: &mut impl BufferResource) -> Result<(), VboError> {
        if self.state != VboState::Active {
            return Err(VboError::InvalidState {
                operation: "deactivate",
                state: self.state,
            });
        }
        device.unbind(self.target);
        self.state = VboState::Inactive;
        Ok(())
    }

    fn active_handle(&self, operation: &'static str) -> Result<ResourceHandle, VboError> {
        match (self.state, self.handle) {
            (VboState::Inactive, _) | (_, None) => Err(VboError::AllocatorInactive),
            (VboState::Active, Some(handle)) => Ok(handle),
            (state, Some(_)) => Err(VboError::InvalidState { operation, state }),
        }
    }

    /// Maps the whole buffer and returns a pointer to its first byte.
    ///
    /// The pointer is valid for [Vbo::capacity] bytes until [Vbo::unmap] or until the buffer
    /// grows. Blocks are written at [Vbo::block_offset].
    pub fn map(&mut self, device: &mut impl BufferResource) -> Result<NonNull<u8>, VboError> {
        let handle = self.active_handle("map")?;
        let ptr = device.map(handle, MapAccess::READ | MapAccess::WRITE)?;
        self.mapped = Some(ptr);
        self.state = VboState::FullyMapped;
        Ok(ptr)
    }

    pub fn unmap(&mut self, device: &mut impl BufferResource) -> Result<(), VboError> {
        match (self.state, self.handle) {
            (VboState::FullyMapped, Some(handle)) => {
                device.unmap(handle)?;
                self.mapped = None;
                self.state = VboState::Active;
                Ok(())
            }
            (state, _) => Err(VboError::InvalidState {
                operation: "unmap",
                state,
            }),
        }
    }

    /// Enters the per-block write mode used by [Vbo::write_array] without mapping the buffer.
    pub fn map_partially(&mut self) -> Result<(), VboError> {
        self.active_handle("map partially")?;
        self.state = VboState::PartiallyMapped;
        Ok(())
    }

    pub fn unmap_partially(&mut self) -> Result<(), VboError> {
        if self.state != VboState::PartiallyMapped {
            return Err(VboError::InvalidState {
                operation: "unmap partially",
                state: self.state,
            });
        }
        self.state = VboState::Active;
        Ok(())
    }

    /// The mapped buffer, while [VboState::FullyMapped].
    pub fn mapped_bytes(&mut self) -> Option<&mut [u8]> {
        let ptr = self.mapped?;
        // SAFETY: `BufferResource::map` guarantees the pointer covers the whole buffer until it is
        // unmapped, which needs `&mut self`.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.total_capacity as usize) })
    }

    /// Destroys the native resource. Only legal while inactive.
    ///
    /// The next [Vbo::activate] creates a new resource with undefined contents.
    pub fn destroy_resource(&mut self, device: &mut impl BufferResource) -> Result<(), VboError> {
        if self.state != VboState::Inactive {
            return Err(VboError::InvalidState {
                operation: "destroy the resource",
                state: self.state,
            });
        }
        if let Some(handle) = self.handle.take() {
            device.destroy(handle)?;
            log::debug!(
                "[Vbo]: destroyed {:?} buffer {}",
                self.target,
                handle.get()
            );
        }
        Ok(())
    }

    /// Closes any mapping, deactivates and destroys the native resource, then drops the allocator.
    pub fn destroy(mut self, device: &mut impl BufferResource) -> Result<(), VboError> {
        self.transition(device, VboState::Inactive)?;
        self.destroy_resource(device)
    }

    /// Moves through the state machine until `target` is reached.
    fn transition(
        &mut self,
        device: &mut impl BufferResource,
        target: VboState,
    ) -> Result<(), VboError> {
        if self.state == target {
            return Ok(());
        }

        match self.state {
            VboState::FullyMapped => self.unmap(device)?,
            VboState::PartiallyMapped => self.unmap_partially()?,
            VboState::Inactive | VboState::Active => {}
        }

        match target {
            VboState::Inactive => {
                if self.state == VboState::Active {
                    self.deactivate(device)?;
                }
            }
            VboState::Active => {
                if self.state == VboState::Inactive {
                    self.activate(device)?;
                }
            }
            VboState::FullyMapped | VboState::PartiallyMapped => {
                if self.state == VboState::Inactive {
                    self.activate(device)?;
                }
                if target == VboState::FullyMapped {
                    self.map(device)?;
                } else {
                    self.map_partially()?;
                }
            }
        }
        Ok(())
    }

    /// Runs `f` with the allocator in `state`, then puts it back in the state it was in before.
    ///
    /// The previous state is restored even if `f` fails; the first error is returned.
    pub fn scoped<D: BufferResource, R>(
        &mut self,
        device: &mut D,
        state: VboState,
        f: impl FnOnce(&mut Self, &mut D) -> Result<R, VboError>,
    ) -> Result<R, VboError> {
        let previous = self.state;
        self.transition(device, state)?;
        let result = f(self, device);
        let restored = self.transition(device, previous);
        let value = result?;
        restored?;
        Ok(value)
    }

    /// Hands out a block of exactly `capacity` bytes, growing the buffer if no free block is big
    /// enough.
    ///
    /// Allowed in any active state. If the buffer has to grow while mapped, the mapping is closed
    /// and then re-opened on the new resource; pointers from an earlier [Vbo::map] are invalid
    /// afterwards.
    pub fn allocate_block(
        &mut self,
        device: &mut impl BufferResource,
        capacity: NonZeroU64,
    ) -> Result<BlockHandle, VboError> {
        if self.state == VboState::Inactive {
            return Err(VboError::AllocatorInactive);
        }
        let id = match self.free_blocks.find_at_least(capacity.get()) {
            Some(id) => id,
            None => {
                self.grow_to_accommodate(device, capacity)?;
                self.free_blocks
                    .find_at_least(capacity.get())
                    .unwrap_or_else(|| panic!("[Vbo]: no room for {capacity} bytes after growing"))
            }
        };

        let capacity = capacity.get();
        self.free_blocks.remove(&mut self.chain, id);
        if self.chain.block(id).capacity() > capacity {
            let remainder = self.chain.split(id, capacity);
            self.free_blocks.insert(&mut self.chain, remainder);
        }

        let lease = self.next_lease;
        self.next_lease += 1;
        self.chain.block_mut(id).lease = lease;
        self.debug_check();

        log::trace!(
            "[Vbo]: allocated {} bytes at {}",
            capacity,
            self.chain.block(id).offset()
        );
        Ok(BlockHandle {
            vbo: self.id,
            id,
            lease,
            capacity,
        })
    }

    fn grow_to_accommodate(
        &mut self,
        device: &mut impl BufferResource,
        capacity: NonZeroU64,
    ) -> Result<(), VboError> {
        let previous = self.state;
        match previous {
            VboState::FullyMapped => self.unmap(device)?,
            VboState::PartiallyMapped => self.unmap_partially()?,
            VboState::Inactive | VboState::Active => {}
        }

        self.increase_capacity_to_accommodate(device, capacity)?;

        match previous {
            VboState::FullyMapped => {
                self.map(device)?;
            }
            VboState::PartiallyMapped => self.map_partially()?,
            VboState::Inactive | VboState::Active => {}
        }
        Ok(())
    }

    /// Returns a block to the free list, merging it with free neighbours.
    pub fn free_block(&mut self, handle: BlockHandle) -> Result<(), VboError> {
        let id = self.validate(&handle)?;
        if self.pending.contains(&handle) {
            return Err(VboError::AlreadyPending);
        }
        self.release(id);
        log::trace!("[Vbo]: freed {} bytes", handle.capacity);
        Ok(())
    }

    fn release(&mut self, id: BlockId) {
        let block = *self.chain.block(id);
        let previous = block
            .previous()
            .filter(|&previous| self.chain.block(previous).is_free());
        let next = block
            .next()
            .filter(|&next| self.chain.block(next).is_free());

        self.chain.set_free(id, true);
        let merged = match (previous, next) {
            (Some(previous), Some(next)) => {
                self.unlist(previous);
                self.unlist(next);
                self.chain.merge_with_successor(previous);
                self.chain.merge_with_successor(previous);
                previous
            }
            (Some(previous), None) => {
                self.unlist(previous);
                self.chain.merge_with_successor(previous);
                previous
            }
            (None, Some(next)) => {
                self.unlist(next);
                self.chain.merge_with_successor(id);
                id
            }
            (None, None) => id,
        };
        self.free_blocks.insert(&mut self.chain, merged);
        self.debug_check();
    }

    /// Pulls a free block out of the free list without handing it out.
    fn unlist(&mut self, id: BlockId) {
        self.free_blocks.remove(&mut self.chain, id);
        self.chain.set_free(id, true);
    }

    /// Queues a block to be freed by the next [Vbo::free_pending_blocks].
    ///
    /// The block stays allocated until then, so its bytes are not reused by an allocation made in
    /// the meantime.
    pub fn enqueue_block_for_freeing(&mut self, handle: BlockHandle) -> Result<(), VboError> {
        self.validate(&handle)?;
        if self.pending.contains(&handle) {
            return Err(VboError::AlreadyPending);
        }
        self.pending.push(handle);
        Ok(())
    }

    /// Frees every queued block.
    pub fn free_pending_blocks(&mut self) -> Result<(), VboError> {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            log::trace!("[Vbo]: freeing {} pending blocks", pending.len());
        }
        for handle in pending {
            let id = self.validate(&handle)?;
            self.release(id);
        }
        Ok(())
    }

    /// Forgets every block, leaving a single free block spanning the buffer. Queued frees are
    /// dropped and every outstanding handle becomes stale.
    pub fn free_all_blocks(&mut self) {
        self.pending.clear();
        self.chain.reset(self.total_capacity);
        self.free_blocks.clear();
        let first = self.chain.first();
        self.free_blocks.insert(&mut self.chain, first);
        self.debug_check();
    }

    /// Grows the buffer if fewer than `capacity` bytes are free in total.
    pub fn ensure_free_capacity(
        &mut self,
        device: &mut impl BufferResource,
        capacity: u64,
    ) -> Result<(), VboError> {
        match NonZeroU64::new(capacity.saturating_sub(self.free_capacity())) {
            Some(missing) => self.increase_capacity(device, missing),
            None => Ok(()),
        }
    }

    /// Grows the buffer by [VboConfig::growth_factor] steps until a block of `capacity` bytes fits
    /// at its end.
    pub fn increase_capacity_to_accommodate(
        &mut self,
        device: &mut impl BufferResource,
        capacity: NonZeroU64,
    ) -> Result<(), VboError> {
        let last = self.chain.block(self.chain.last());
        let trailing_free = if last.is_free() { last.capacity() } else { 0 };
        let required = (self.total_capacity - trailing_free)
            .checked_add(capacity.get())
            .ok_or(VboError::ResourceExhausted {
                requested: capacity.get(),
                source: ResourceError::OutOfMemory {
                    requested: capacity.get(),
                },
            })?;

        let mut new_capacity = self.total_capacity;
        while new_capacity < required {
            new_capacity = self.config.grow(new_capacity);
        }

        match NonZeroU64::new(new_capacity - self.total_capacity) {
            Some(delta) => self.increase_capacity(device, delta),
            None => Ok(()),
        }
    }

    /// The bytes that must survive a resize: everything but free space at either end.
    fn live_range(&self) -> Range<u64> {
        let first = self.chain.block(self.chain.first());
        let last = self.chain.block(self.chain.last());
        let start = if first.is_free() { first.end() } else { 0 };
        let end = if last.is_free() {
            last.offset()
        } else {
            self.total_capacity
        };
        start..end.max(start)
    }

    /// Adds `delta` free bytes at the end of the buffer.
    ///
    /// The native resource is recreated at the new size and the live bytes are copied over. Must
    /// be called while [VboState::Active]. If the new resource cannot be created the allocator is
    /// left inactive with its new layout and must be discarded.
    pub fn increase_capacity(
        &mut self,
        device: &mut impl BufferResource,
        delta: NonZeroU64,
    ) -> Result<(), VboError> {
        if self.state != VboState::Active {
            return Err(VboError::InvalidState {
                operation: "increase capacity",
                state: self.state,
            });
        }
        let delta = delta.get();
        let live = self.live_range();

        let preserved = if live.is_empty() {
            None
        } else {
            let ptr = self.map(device)?;
            // SAFETY: the old resource holds `total_capacity` bytes and `live` lies within them.
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    ptr.as_ptr().add(live.start as usize),
                    (live.end - live.start) as usize,
                )
            }
            .to_vec();
            self.unmap(device)?;
            Some(bytes)
        };

        self.deactivate(device)?;
        self.destroy_resource(device)?;

        let last = self.chain.last();
        if self.chain.block(last).is_free() {
            self.free_blocks.remove(&mut self.chain, last);
            self.chain.extend_last(delta);
            self.free_blocks.insert(&mut self.chain, last);
        } else {
            let appended = self.chain.append(delta);
            self.free_blocks.insert(&mut self.chain, appended);
        }

        let old_capacity = self.total_capacity;
        self.total_capacity += delta;
        if let Some(tracker) = &self.tracker {
            tracker.grow(delta);
        }
        self.debug_check();

        self.activate(device)?;
        if let Some(bytes) = preserved {
            let ptr = self.map(device)?;
            // SAFETY: the new resource is bigger than the old one, so `live` still fits.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr(),
                    ptr.as_ptr().add(live.start as usize),
                    bytes.len(),
                )
            };
            self.unmap(device)?;
        }

        log::debug!(
            "[Vbo]: grew {:?} buffer from {} to {} bytes ({} live bytes preserved)",
            self.target,
            old_capacity,
            self.total_capacity,
            live.end - live.start
        );
        Ok(())
    }

    /// Copies `elements` into an allocated block, `offset` bytes from its start.
    ///
    /// Goes through the mapped pointer while [VboState::FullyMapped] and through
    /// [BufferResource::write_range] while [VboState::PartiallyMapped]. Returns the offset right
    /// after the written bytes.
    pub fn write_array<T: bytemuck::Pod>(
        &mut self,
        device: &mut impl BufferResource,
        handle: &BlockHandle,
        offset: u64,
        elements: &[T],
    ) -> Result<u64, VboError> {
        let id = self.validate(handle)?;
        let bytes: &[u8] = bytemuck::cast_slice(elements);
        let len = bytes.len() as u64;
        let block = self.chain.block(id);
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= block.capacity())
            .ok_or(VboError::OutOfBounds {
                offset,
                len,
                capacity: block.capacity(),
            })?;
        let at = block.offset() + offset;

        match (self.state, self.mapped, self.handle) {
            (VboState::FullyMapped, Some(ptr), _) => {
                // SAFETY: `at + len` lies within the block, which lies within the mapped buffer.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        bytes.as_ptr(),
                        ptr.as_ptr().add(at as usize),
                        bytes.len(),
                    )
                };
            }
            (VboState::PartiallyMapped, _, Some(resource)) => {
                device.write_range(resource, at, bytes)?;
            }
            (VboState::Inactive, _, _) => return Err(VboError::AllocatorInactive),
            (state, _, _) => {
                return Err(VboError::InvalidState {
                    operation: "write to a block",
                    state,
                })
            }
        }
        Ok(end)
    }

    /// Checks the block chain and free list against each other.
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        let first = self.chain.block(self.chain.first());
        if first.previous().is_some() {
            return Err(ConsistencyError::BrokenLink {
                block: self.chain.first(),
            });
        }

        let mut expected = 0;
        let mut previous: Option<(BlockId, bool)> = None;
        let mut free_capacity = 0;
        let mut count = 0;

        for (id, block) in self.chain.iter() {
            count += 1;
            if count > self.chain.len() || block.previous() != previous.map(|(id, _)| id) {
                return Err(ConsistencyError::BrokenLink { block: id });
            }
            if block.offset() != expected {
                return Err(ConsistencyError::Discontiguous {
                    block: id,
                    offset: block.offset(),
                    expected,
                });
            }
            if block.capacity() == 0 {
                return Err(ConsistencyError::EmptyBlock { block: id });
            }
            if block.is_free() {
                if previous.map_or(false, |(_, free)| free) {
                    return Err(ConsistencyError::AdjacentFree { block: id });
                }
                if !self.free_blocks.contains(id) {
                    return Err(ConsistencyError::FreeListMismatch { block: id });
                }
                free_capacity += block.capacity();
            }
            expected = block.end();
            previous = Some((id, block.is_free()));
        }

        if previous.map(|(id, _)| id) != Some(self.chain.last()) || count != self.chain.len() {
            return Err(ConsistencyError::EndpointMismatch);
        }
        if expected != self.total_capacity {
            return Err(ConsistencyError::CapacityMismatch {
                chain_end: expected,
                total: self.total_capacity,
            });
        }
        for (capacity, id) in self.free_blocks.iter() {
            let listed_correctly = self
                .chain
                .get(id)
                .map_or(false, |block| block.is_free() && block.capacity() == capacity);
            if !listed_correctly {
                return Err(ConsistencyError::FreeListMismatch { block: id });
            }
        }
        if free_capacity != self.free_blocks.free_capacity() {
            return Err(ConsistencyError::FreeCapacityMismatch {
                tracked: self.free_blocks.free_capacity(),
                actual: free_capacity,
            });
        }
        if !self.free_blocks.is_sorted() {
            return Err(ConsistencyError::UnsortedFreeList);
        }
        Ok(())
    }

    fn debug_check(&self) {
        if self.config.consistency_checks {
            if let Err(e) = self.check_consistency() {
                panic!("[Vbo]: inconsistent block chain: {e}\n{self:?}");
            }
        }
    }
}

impl std::fmt::Debug for Vbo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Vbo#{} {:?} {:?} {}/{} free ",
            self.id.0,
            self.target,
            self.state,
            self.free_capacity(),
            self.total_capacity
        )?;
        for block in self.blocks() {
            let kind = if block.is_free() { "free" } else { "used" };
            write!(f, "[{} {}]", kind, block.capacity())?;
        }
        Ok(())
    }
}

impl Drop for Vbo {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            log::warn!(
                "[Vbo]: dropped while still owning {:?} buffer {}; it is leaked",
                self.target,
                handle.get()
            );
        }
        if !self.pending.is_empty() {
            log::warn!(
                "[Vbo]: dropped with {} blocks still queued for freeing",
                self.pending.len()
            );
        }
        if let Some(tracker) = self.tracker.take() {
            tracker.release(self.total_capacity);
        }
    }
}
