//! The physical block chain of a [Vbo](crate::Vbo).
//!
//! Blocks are stored in an arena and linked to their physical neighbours through [BlockId]s
//! instead of pointers. The chain always starts at offset 0 and ends at the total capacity of the
//! buffer, with every block starting exactly where its predecessor ends.

/// Index of a block in a [BlockChain].
///
/// Ids carry a generation, so an id that outlives its block (because it was merged into a
/// neighbour) never resolves to whatever block reuses the slot later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId {
    index: u32,
    generation: u32,
}

/// One contiguous byte range of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    offset: u64,
    capacity: u64,
    free: bool,
    /// Incremented by the owning [Vbo](crate::Vbo) every time the block is handed out.
    pub(crate) lease: u64,
    previous: Option<BlockId>,
    next: Option<BlockId>,
}

impl Block {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Offset one past the last byte of the block.
    pub fn end(&self) -> u64 {
        self.offset + self.capacity
    }

    pub fn is_free(&self) -> bool {
        self.free
    }

    pub fn previous(&self) -> Option<BlockId> {
        self.previous
    }

    pub fn next(&self) -> Option<BlockId> {
        self.next
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    block: Option<Block>,
}

/// Arena owning every [Block] of a buffer, linked in physical order.
#[derive(Debug, Clone)]
pub struct BlockChain {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    first: BlockId,
    last: BlockId,
    len: usize,
}

impl BlockChain {
    /// Creates a chain made of a single free block spanning `capacity` bytes.
    pub fn new(capacity: u64) -> Self {
        let mut chain = BlockChain {
            slots: vec![],
            vacant: vec![],
            first: BlockId {
                index: 0,
                generation: 0,
            },
            last: BlockId {
                index: 0,
                generation: 0,
            },
            len: 0,
        };
        let id = chain.insert(Block {
            offset: 0,
            capacity,
            free: true,
            lease: 0,
            previous: None,
            next: None,
        });
        chain.first = id;
        chain.last = id;
        chain
    }

    fn insert(&mut self, block: Block) -> BlockId {
        self.len += 1;
        match self.vacant.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.block = Some(block);
                BlockId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    block: Some(block),
                });
                BlockId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    fn remove(&mut self, id: BlockId) -> Block {
        let block = *self.block(id);
        let slot = &mut self.slots[id.index as usize];
        slot.block = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(id.index);
        self.len -= 1;
        block
    }

    /// Returns the block `id` refers to, or `None` if it has been merged away.
    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.block.as_ref())
    }

    fn get_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.block.as_mut())
    }

    /// Like [BlockChain::get], but treats a dead id as a broken invariant.
    pub(crate) fn block(&self, id: BlockId) -> &Block {
        self.get(id)
            .unwrap_or_else(|| panic!("[BlockChain]: {id:?} does not refer to a live block"))
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        self.get_mut(id)
            .unwrap_or_else(|| panic!("[BlockChain]: {id:?} does not refer to a live block"))
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.get(id).is_some()
    }

    /// The block at offset 0.
    pub fn first(&self) -> BlockId {
        self.first
    }

    /// The block ending at the total capacity.
    pub fn last(&self) -> BlockId {
        self.last
    }

    /// Number of live blocks in the chain.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sum of the capacities of every block.
    pub fn total_capacity(&self) -> u64 {
        self.block(self.last).end()
    }

    /// Walks the chain in physical order, starting at the first block.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            chain: self,
            next: Some(self.first),
        }
    }

    pub(crate) fn set_free(&mut self, id: BlockId, free: bool) {
        self.block_mut(id).free = free;
    }

    /// Splits `id` at `at` bytes from its start.
    ///
    /// The new block is placed right after `id`, covers the remaining `capacity - at` bytes and
    /// inherits the free flag of `id`. Returns the id of the new block.
    pub fn split(&mut self, id: BlockId, at: u64) -> BlockId {
        let block = *self.block(id);
        assert!(
            at > 0 && at < block.capacity,
            "[BlockChain]: cannot split a block of {} bytes at {}",
            block.capacity,
            at
        );

        let remainder = self.insert(Block {
            offset: block.offset + at,
            capacity: block.capacity - at,
            free: block.free,
            lease: 0,
            previous: Some(id),
            next: block.next,
        });

        match block.next {
            Some(next) => self.block_mut(next).previous = Some(remainder),
            None => self.last = remainder,
        }

        let block = self.block_mut(id);
        block.capacity = at;
        block.next = Some(remainder);
        remainder
    }

    /// Absorbs the successor of `id` into `id`. Both blocks must be free.
    ///
    /// The successor is dropped from the arena; its id becomes stale.
    pub fn merge_with_successor(&mut self, id: BlockId) {
        let block = *self.block(id);
        let next_id = block
            .next
            .unwrap_or_else(|| panic!("[BlockChain]: {id:?} has no successor to merge with"));
        assert!(
            block.free && self.block(next_id).free,
            "[BlockChain]: only free blocks can be merged"
        );

        let next = self.remove(next_id);
        match next.next {
            Some(after) => self.block_mut(after).previous = Some(id),
            None => self.last = id,
        }

        let block = self.block_mut(id);
        block.capacity += next.capacity;
        block.next = next.next;
    }

    /// Grows the last block by `delta` bytes in place.
    pub fn extend_last(&mut self, delta: u64) {
        let last = self.last;
        self.block_mut(last).capacity += delta;
    }

    /// Appends a new free block of `capacity` bytes after the last block.
    pub fn append(&mut self, capacity: u64) -> BlockId {
        let last = self.last;
        let offset = self.block(last).end();
        let id = self.insert(Block {
            offset,
            capacity,
            free: true,
            lease: 0,
            previous: Some(last),
            next: None,
        });
        self.block_mut(last).next = Some(id);
        self.last = id;
        id
    }

    /// Drops every block and starts over with a single free block of `capacity` bytes.
    ///
    /// Ids handed out before the reset stay stale forever.
    pub fn reset(&mut self, capacity: u64) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.block.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.vacant.push(index as u32);
            }
        }
        self.len = 0;

        let id = self.insert(Block {
            offset: 0,
            capacity,
            free: true,
            lease: 0,
            previous: None,
            next: None,
        });
        self.first = id;
        self.last = id;
    }
}

/// Iterator over a [BlockChain] in physical order.
pub struct Iter<'a> {
    chain: &'a BlockChain,
    next: Option<BlockId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (BlockId, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let block = self.chain.get(id)?;
        self.next = block.next;
        Some((id, block))
    }
}

#[cfg(test)]
mod test {
    use super::BlockChain;

    fn layout(chain: &BlockChain) -> Vec<(u64, u64, bool)> {
        chain
            .iter()
            .map(|(_, block)| (block.offset(), block.capacity(), block.is_free()))
            .collect()
    }

    #[test]
    fn new_spans_capacity() {
        let chain = BlockChain::new(1024);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.first(), chain.last());
        assert_eq!(layout(&chain), vec![(0, 1024, true)]);
        assert_eq!(chain.total_capacity(), 1024);
    }

    #[test]
    fn split_relinks_neighbours() {
        let mut chain = BlockChain::new(1024);
        let first = chain.first();
        let tail = chain.split(first, 100);
        let middle = chain.split(first, 40);

        assert_eq!(
            layout(&chain),
            vec![(0, 40, true), (40, 60, true), (100, 924, true)]
        );
        assert_eq!(chain.block(first).next(), Some(middle));
        assert_eq!(chain.block(middle).previous(), Some(first));
        assert_eq!(chain.block(middle).next(), Some(tail));
        assert_eq!(chain.block(tail).previous(), Some(middle));
        assert_eq!(chain.last(), tail);
    }

    #[test]
    #[should_panic]
    fn split_at_capacity_panics() {
        let mut chain = BlockChain::new(64);
        let first = chain.first();
        chain.split(first, 64);
    }

    #[test]
    fn merge_discards_successor() {
        let mut chain = BlockChain::new(300);
        let first = chain.first();
        let second = chain.split(first, 100);
        let third = chain.split(second, 100);

        chain.merge_with_successor(first);
        assert!(!chain.contains(second));
        assert_eq!(chain.block(first).next(), Some(third));
        assert_eq!(chain.block(third).previous(), Some(first));
        assert_eq!(layout(&chain), vec![(0, 200, true), (200, 100, true)]);

        chain.merge_with_successor(first);
        assert_eq!(chain.last(), first);
        assert_eq!(layout(&chain), vec![(0, 300, true)]);
    }

    #[test]
    fn stale_id_does_not_alias_reused_slot() {
        let mut chain = BlockChain::new(300);
        let first = chain.first();
        let second = chain.split(first, 100);
        chain.merge_with_successor(first);

        let reused = chain.split(first, 150);
        assert_ne!(second, reused);
        assert!(chain.get(second).is_none());
        assert_eq!(chain.block(reused).offset(), 150);
    }

    #[test]
    fn grow_at_the_end() {
        let mut chain = BlockChain::new(100);
        let first = chain.first();
        chain.set_free(first, false);

        let appended = chain.append(50);
        assert_eq!(chain.last(), appended);
        assert_eq!(layout(&chain), vec![(0, 100, false), (100, 50, true)]);

        chain.extend_last(25);
        assert_eq!(chain.total_capacity(), 175);
    }

    #[test]
    fn reset_invalidates_ids() {
        let mut chain = BlockChain::new(100);
        let first = chain.first();
        let second = chain.split(first, 10);
        chain.reset(200);

        assert!(!chain.contains(first));
        assert!(!chain.contains(second));
        assert_eq!(layout(&chain), vec![(0, 200, true)]);
    }
}
