use crate::block::{BlockChain, BlockId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeEntry {
    capacity: u64,
    offset: u64,
    id: BlockId,
}

/// Index over the free blocks of a [BlockChain], sorted by capacity.
///
/// Entries of equal capacity are kept in address order, so best-fit lookups prefer the lowest
/// address among equally sized candidates.
#[derive(Debug, Clone, Default)]
pub struct FreeList {
    entries: Vec<FreeEntry>,
    free_capacity: u64,
}

impl FreeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the capacities of every listed block.
    pub fn free_capacity(&self) -> u64 {
        self.free_capacity
    }

    /// Listed blocks and the capacity they were listed with, smallest first.
    pub fn iter(&self) -> impl Iterator<Item = (u64, BlockId)> + '_ {
        self.entries.iter().map(|entry| (entry.capacity, entry.id))
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Index of the first entry whose capacity is not below `capacity`.
    fn lower_bound(&self, capacity: u64) -> usize {
        self.entries.partition_point(|entry| entry.capacity < capacity)
    }

    /// Returns the smallest free block that can hold `min_capacity` bytes.
    pub fn find_at_least(&self, min_capacity: u64) -> Option<BlockId> {
        self.entries
            .get(self.lower_bound(min_capacity))
            .map(|entry| entry.id)
    }

    /// Lists `id` and marks it free.
    pub fn insert(&mut self, chain: &mut BlockChain, id: BlockId) {
        chain.set_free(id, true);
        let block = chain.block(id);
        let entry = FreeEntry {
            capacity: block.capacity(),
            offset: block.offset(),
            id,
        };

        let index = self
            .entries
            .partition_point(|e| (e.capacity, e.offset) < (entry.capacity, entry.offset));
        self.entries.insert(index, entry);
        self.free_capacity += entry.capacity;
    }

    /// Unlists `id` and marks it used.
    ///
    /// Several blocks may share a capacity, so the run of equal capacities is scanned for the exact
    /// id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not listed.
    pub fn remove(&mut self, chain: &mut BlockChain, id: BlockId) {
        let capacity = chain.block(id).capacity();
        let start = self.lower_bound(capacity);
        let index = self.entries[start..]
            .iter()
            .take_while(|entry| entry.capacity == capacity)
            .position(|entry| entry.id == id)
            .map(|position| start + position)
            .unwrap_or_else(|| panic!("[FreeList]: {id:?} ({capacity} bytes) is not listed"));

        self.entries.remove(index);
        self.free_capacity -= capacity;
        chain.set_free(id, false);
    }

    /// Whether entries are in (capacity, offset) order.
    pub(crate) fn is_sorted(&self) -> bool {
        self.entries
            .windows(2)
            .all(|pair| (pair[0].capacity, pair[0].offset) < (pair[1].capacity, pair[1].offset))
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.free_capacity = 0;
    }
}
