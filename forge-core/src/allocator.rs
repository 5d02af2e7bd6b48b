/*! Slot allocators.
 *
 *  [`BitmaskAllocator`] tracks up to 64 slots of a single block with one
 *  64-bit availability mask: a set bit is a free slot. [`PoolAllocator`]
 *  chains such blocks together, creating a new block whenever every existing
 *  one is exhausted.
 */

use parking_lot::Mutex;

/// Number of slots a single [`BitmaskAllocator`] can track.
pub const BLOCK_SLOTS: u32 = u64::BITS;

fn run_mask(count: u32) -> u64 {
    if count >= BLOCK_SLOTS {
        !0
    } else {
        (1u64 << count) - 1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitmaskAllocator {
    availability: u64,
    capacity: u32,
}

impl BitmaskAllocator {
    pub fn new(capacity: u32) -> Self {
        assert!(
            capacity > 0 && capacity <= BLOCK_SLOTS,
            "block capacity {} is outside of 1..={}",
            capacity,
            BLOCK_SLOTS
        );
        BitmaskAllocator {
            availability: run_mask(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn free_count(&self) -> u32 {
        self.availability.count_ones()
    }

    pub fn is_full(&self) -> bool {
        self.availability == 0
    }

    pub fn is_empty(&self) -> bool {
        self.availability == run_mask(self.capacity)
    }

    /// Whether the slot at `index` is currently handed out.
    pub fn is_allocated(&self, index: u32) -> bool {
        index < self.capacity && self.availability & (1 << index) == 0
    }

    /// Reserve `count` contiguous slots, returning the lowest free run.
    pub fn allocate(&mut self, count: u32) -> Option<u32> {
        if count == 0 || count > self.capacity {
            return None;
        }
        let run = run_mask(count);
        let mut candidates = self.availability;
        while candidates != 0 {
            let index = candidates.trailing_zeros();
            if index + count > self.capacity {
                break;
            }
            let window = run << index;
            if self.availability & window == window {
                self.availability &= !window;
                return Some(index);
            }
            candidates &= candidates - 1;
        }
        None
    }

    /// Return `count` slots starting at `index`.
    ///
    /// # Panics
    ///
    /// Panics if any of the slots is not currently allocated.
    pub fn free(&mut self, index: u32, count: u32) {
        assert!(
            count > 0 && index + count <= self.capacity,
            "slot range {}..{} is outside of the block",
            index,
            index + count
        );
        let window = run_mask(count) << index;
        assert_eq!(
            self.availability & window,
            0,
            "slot range {}..{} freed twice",
            index,
            index + count
        );
        self.availability |= window;
    }
}

/// Location of an allocation inside a [`PoolAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolSlot {
    pub block: usize,
    pub index: u32,
    pub count: u32,
}

#[derive(Debug)]
struct PoolBlock<B> {
    raw: B,
    slots: BitmaskAllocator,
}

#[derive(Debug)]
struct PoolInner<B> {
    blocks: Vec<PoolBlock<B>>,
    /// Index of the first block that may have free slots.
    first_free: usize,
}

/// A growing set of fixed-size blocks, each with its own slot mask.
///
/// The pool is internally synchronized: one mutex guards its blocks.
#[derive(Debug)]
pub struct PoolAllocator<B> {
    slots_per_block: u32,
    inner: Mutex<PoolInner<B>>,
}

impl<B> PoolAllocator<B> {
    pub fn new(slots_per_block: u32) -> Self {
        assert!(slots_per_block > 0 && slots_per_block <= BLOCK_SLOTS);
        PoolAllocator {
            slots_per_block,
            inner: Mutex::new(PoolInner {
                blocks: Vec::new(),
                first_free: 0,
            }),
        }
    }

    pub fn slots_per_block(&self) -> u32 {
        self.slots_per_block
    }

    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// Number of slots currently handed out.
    pub fn allocated(&self) -> u32 {
        self.inner
            .lock()
            .blocks
            .iter()
            .map(|block| block.slots.capacity() - block.slots.free_count())
            .sum()
    }

    /// Reserve `count` contiguous slots within one block.
    ///
    /// Existing blocks are searched in creation order. When none has room,
    /// `create_block` is called, with the lock held, to make a new one. The
    /// `describe` callback sees the chosen block while the lock is still held.
    pub fn allocate<T, E>(
        &self,
        count: u32,
        create_block: impl FnOnce(u32) -> Result<B, E>,
        describe: impl FnOnce(&B, PoolSlot) -> T,
    ) -> Result<T, E> {
        assert!(
            count > 0 && count <= self.slots_per_block,
            "{} slots don't fit a block of {}",
            count,
            self.slots_per_block
        );
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let start = inner.first_free;
        for (block_index, block) in inner.blocks.iter_mut().enumerate().skip(start) {
            if let Some(index) = block.slots.allocate(count) {
                let slot = PoolSlot {
                    block: block_index,
                    index,
                    count,
                };
                let result = describe(&block.raw, slot);
                if block.slots.is_full() && block_index == start {
                    inner.first_free = block_index + 1;
                }
                return Ok(result);
            }
        }

        let raw = create_block(self.slots_per_block)?;
        let mut slots = BitmaskAllocator::new(self.slots_per_block);
        let index = slots.allocate(count).unwrap_or(0);
        let slot = PoolSlot {
            block: inner.blocks.len(),
            index,
            count,
        };
        let result = describe(&raw, slot);
        inner.blocks.push(PoolBlock { raw, slots });
        Ok(result)
    }

    /// Return the slots of `slot` to their block.
    ///
    /// # Panics
    ///
    /// Panics if the slots are not currently allocated.
    pub fn free(&self, slot: PoolSlot) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let block = inner
            .blocks
            .get_mut(slot.block)
            .unwrap_or_else(|| panic!("slot {:?} belongs to no block of this pool", slot));
        block.slots.free(slot.index, slot.count);
        if slot.block < inner.first_free {
            inner.first_free = slot.block;
        }
    }

    /// Take every block out of the pool, regardless of outstanding slots.
    pub fn drain_blocks(&self) -> Vec<B> {
        let mut inner = self.inner.lock();
        inner.first_free = 0;
        inner.blocks.drain(..).map(|block| block.raw).collect()
    }
}
