use std::ptr::NonNull;

use crate::{
    block::{self, BLOCK_ALIGN, BLOCK_HEADER_SIZE, Block, BlockInfo},
    error::{AllocError, HeapError},
    fit::Policy,
    list::{List, Node},
    source::MemorySource,
};

/// A heap made of one growable arena split into blocks.
///
/// Every block, free or used, is a node of a single list kept in ascending
/// address order. New memory is appended at the tail, freed blocks stay in
/// place and are merged with the blocks right next to them.
///
/// ```text
///   head                                                      tail
///    |                                                          |
/// +--v------------+    +---------------+    +-----------------+ |
/// | hdr | used    | -> | hdr | free    | -> | hdr | used      |<+
/// +---------------+    +---------------+    +-----------------+
///  ^ addr + BLOCK_HEADER_SIZE + size == next addr
/// ```
///
/// Both [`Policy`] variants work on the same list, so a block released
/// after a best fit allocation can be reused by a first fit one.
///
/// Nothing here is synchronized. Sharing a heap between threads needs a lock
/// around it, the way [`crate::global`] does for the process-wide one.
pub struct Heap<S: MemorySource> {
    /// All blocks, lowest address first.
    blocks: List<Block>,
    /// Where new blocks come from.
    source: S,
}

// Blocks are only reachable through the heap that owns them.
unsafe impl<S: MemorySource + Send> Send for Heap<S> {}

impl<S: MemorySource> Heap<S> {
    /// Creates an empty heap. Nothing is requested from `source` until the
    /// first allocation.
    pub const fn new(source: S) -> Self {
        Self {
            blocks: List::new(),
            source,
        }
    }

    /// Returns a pointer to at least `size` usable bytes, or `None` when
    /// `size` is zero or the arena can not grow.
    ///
    /// The pointer is aligned to the machine word. Stronger alignment is
    /// not guaranteed.
    pub fn allocate(&mut self, size: usize, policy: Policy) -> Option<NonNull<u8>> {
        self.try_allocate(size, policy).ok()
    }

    /// Same as [`Heap::allocate`] but tells why the request failed.
    pub fn try_allocate(&mut self, size: usize, policy: Policy) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let exhausted = AllocError::Exhausted { requested: size };
        let size = block::payload_size(size).ok_or(exhausted)?;

        let node = match policy.find(&self.blocks, size) {
            Some(node) => {
                self.take(node, size);
                node
            }
            None => self.grow(size).ok_or(exhausted)?,
        };

        log::trace!("{policy:?} allocated {size} bytes at {:p}", block::payload(node));

        Ok(block::payload(node))
    }

    /// Gives the block behind `ptr` back to the heap. Null pointers are ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by this heap that has not
    /// been released yet. Anything else corrupts the heap.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        debug_assert!(self.contains(ptr), "{ptr:p} was not allocated by this heap");

        let mut node = unsafe { block::header(ptr) };

        unsafe {
            debug_assert!(!node.as_ref().data.is_free, "double release of {ptr:p}");
            node.as_mut().data.is_free = true;

            self.coalesce(node);
        }

        log::trace!("released {ptr:p}");
    }

    /// Bytes held by free blocks, headers included.
    pub fn total_free_size(&self) -> usize {
        self.blocks
            .iter()
            .filter(|block| block.is_free)
            .map(|block| block.size + BLOCK_HEADER_SIZE)
            .sum()
    }

    /// Largest payload size among *all* blocks, used ones included.
    ///
    /// See [`Heap::largest_free_block`] for the free-only figure.
    pub fn largest_free_segment(&self) -> usize {
        self.blocks.iter().map(|block| block.size).max().unwrap_or(0)
    }

    /// Largest payload size among free blocks, 0 if there is none.
    pub fn largest_free_block(&self) -> usize {
        self.blocks
            .iter()
            .filter(|block| block.is_free)
            .map(|block| block.size)
            .max()
            .unwrap_or(0)
    }

    /// Number of blocks, free and used.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the arena has not been created yet.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.blocks.nodes().map(|node| {
            let block = unsafe { &node.as_ref().data };

            BlockInfo {
                addr: block::payload(node).as_ptr() as usize,
                size: block.size,
                is_free: block.is_free,
            }
        })
    }

    /// The memory source backing the arena.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Walks the whole list and reports the first broken invariant.
    pub fn check(&self) -> Result<(), HeapError> {
        let mut prev: Option<NonNull<Node<Block>>> = None;

        for node in self.blocks.nodes() {
            let addr = node.as_ptr() as usize;
            let block = unsafe { node.as_ref() };

            if addr % BLOCK_ALIGN != 0 || block.data.size % BLOCK_ALIGN != 0 {
                return Err(HeapError::Misaligned { block: addr });
            }

            if block.prev != prev {
                return Err(HeapError::BrokenLink { block: addr });
            }

            if let Some(prev) = prev {
                let prev_addr = prev.as_ptr() as usize;

                if unsafe { block::end(prev) } > addr {
                    return Err(HeapError::Unordered { prev: prev_addr, block: addr });
                }

                let both_free = unsafe { prev.as_ref().data.is_free } && block.data.is_free;
                if both_free && unsafe { block::adjacent(prev, node) } {
                    return Err(HeapError::AdjacentFree { first: prev_addr, second: addr });
                }
            }

            prev = Some(node);
        }

        if prev != self.blocks.last() {
            let addr = |link: Option<NonNull<Node<Block>>>| link.map_or(0, |n| n.as_ptr() as usize);
            return Err(HeapError::TailMismatch {
                walked: addr(prev),
                tail: addr(self.blocks.last()),
            });
        }

        Ok(())
    }

    /// Requests `size` payload bytes plus a header from the source and
    /// appends the new used block at the tail.
    fn grow(&mut self, size: usize) -> Option<NonNull<Node<Block>>> {
        let len = size + BLOCK_HEADER_SIZE;

        let Some(addr) = self.source.grow(len) else {
            log::debug!("arena exhausted, could not grow by {len} bytes");
            return None;
        };

        log::debug!("arena grew by {len} bytes at {addr:p}");

        unsafe { Some(self.blocks.append(Block::used(size), addr)) }
    }

    /// Hands the free block `node` out for `size` bytes, splitting the rest
    /// off as a new free block when it can hold a header of its own.
    fn take(&mut self, mut node: NonNull<Node<Block>>, size: usize) {
        let block = unsafe { &mut node.as_mut().data };
        debug_assert!(block.is_free && block.size >= size);

        if block.size >= size + BLOCK_HEADER_SIZE {
            unsafe { self.split(node, size) };
        } else {
            block.is_free = false;
        }
    }

    /// Truncates `node` to `size` used bytes and turns the bytes after it
    /// into a free block linked right after it.
    ///
    /// ```text
    /// before: | hdr | ............ S ............ |
    /// after:  | hdr | size | hdr | S - size - hdr |
    ///                       ^ new free block
    /// ```
    ///
    /// **SAFETY**: `node` must belong to this heap and hold at least
    /// `size + BLOCK_HEADER_SIZE` payload bytes.
    unsafe fn split(&mut self, mut node: NonNull<Node<Block>>, size: usize) {
        unsafe {
            let block = &mut node.as_mut().data;
            let rest = block.size - size - BLOCK_HEADER_SIZE;

            block.size = size;
            block.is_free = false;

            let addr = block::payload(node).add(size);
            self.blocks.insert_after(node, Block::free(rest), addr);
        }
    }

    /// Merges the just freed `node` with its neighbours when they are free
    /// and touch it. First the next block is absorbed into `node`, then
    /// `node` is absorbed into the previous one.
    ///
    /// Two merges are enough: no two adjacent blocks were free before.
    ///
    /// **SAFETY**: `node` must belong to this heap and be marked free.
    unsafe fn coalesce(&mut self, mut node: NonNull<Node<Block>>) {
        unsafe {
            if let Some(next) = node.as_ref().next {
                if next.as_ref().data.is_free && block::adjacent(node, next) {
                    node.as_mut().data.size += BLOCK_HEADER_SIZE + next.as_ref().data.size;
                    self.blocks.remove(next);
                }
            }

            if let Some(mut prev) = node.as_ref().prev {
                if prev.as_ref().data.is_free && block::adjacent(prev, node) {
                    prev.as_mut().data.size += BLOCK_HEADER_SIZE + node.as_ref().data.size;
                    self.blocks.remove(node);
                }
            }
        }
    }

    /// Whether `ptr` falls inside the span between the first and the last block.
    fn contains(&self, ptr: NonNull<u8>) -> bool {
        let (Some(first), Some(last)) = (self.blocks.first(), self.blocks.last()) else {
            return false;
        };

        let addr = ptr.as_ptr() as usize;
        addr > first.as_ptr() as usize && addr < unsafe { block::end(last) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Reserved;

    const H: usize = BLOCK_HEADER_SIZE;
    const W: usize = BLOCK_ALIGN;

    fn heap() -> Heap<Reserved> {
        Heap::new(Reserved::with_capacity(1 << 20))
    }

    fn sizes(heap: &Heap<Reserved>) -> Vec<(usize, bool)> {
        heap.blocks().map(|block| (block.size, block.is_free)).collect()
    }

    fn addr(ptr: NonNull<u8>) -> usize {
        ptr.as_ptr() as usize
    }

    /// Free blocks of the given sizes separated by used blocks of one word.
    fn free_runs(heap: &mut Heap<Reserved>, runs: &[usize]) -> Vec<NonNull<u8>> {
        let ptrs: Vec<_> = runs
            .iter()
            .map(|&size| {
                let ptr = heap.allocate(size, Policy::FirstFit).unwrap();
                heap.allocate(W, Policy::FirstFit).unwrap();
                ptr
            })
            .collect();

        for ptr in &ptrs {
            unsafe { heap.release(ptr.as_ptr()) };
        }

        ptrs
    }

    #[test]
    fn zero_size_is_refused() {
        let mut heap = heap();

        assert_eq!(heap.try_allocate(0, Policy::FirstFit), Err(AllocError::ZeroSize));
        assert!(heap.allocate(0, Policy::BestFit).is_none());
        assert!(heap.is_empty());

        heap.allocate(W, Policy::FirstFit).unwrap();
        let before = heap.total_free_size();
        assert!(heap.allocate(0, Policy::FirstFit).is_none());
        assert_eq!(heap.total_free_size(), before);
    }

    #[test]
    fn first_allocation_creates_the_arena() {
        let mut heap = heap();

        let ptr = heap.allocate(3 * W, Policy::FirstFit).unwrap();

        assert_eq!(sizes(&heap), vec![(3 * W, false)]);
        assert_eq!(heap.source().used(), 3 * W + H);
        assert_eq!(heap.blocks().next().unwrap().addr, addr(ptr));
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn sizes_are_rounded_up_to_the_word() {
        let mut heap = heap();

        heap.allocate(1, Policy::FirstFit).unwrap();
        heap.allocate(W + 1, Policy::BestFit).unwrap();

        assert_eq!(sizes(&heap), vec![(W, false), (2 * W, false)]);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn unaligned_sizes_are_searched_and_split_after_rounding() {
        let mut heap = heap();
        let runs = free_runs(&mut heap, &[10, 50, 20]);

        assert_eq!(
            heap.blocks().filter(|block| block.is_free).map(|block| block.size).collect::<Vec<_>>(),
            vec![16, 56, 24]
        );

        // 15 rounds to 16, an exact fit for the first run under both policies.
        let first = heap.allocate(15, Policy::FirstFit).unwrap();
        assert_eq!(first, runs[0]);
        unsafe { heap.release(first.as_ptr()) };

        let best = heap.allocate(15, Policy::BestFit).unwrap();
        assert_eq!(best, runs[0]);

        let mut heap = self::heap();
        free_runs(&mut heap, &[100]);
        heap.allocate(10, Policy::FirstFit).unwrap();

        assert_eq!(sizes(&heap), vec![(16, false), (104 - 16 - H, true), (W, false)]);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn payload_is_usable_and_does_not_overlap() {
        let mut heap = heap();

        let a = heap.allocate(10, Policy::FirstFit).unwrap();
        let b = heap.allocate(100, Policy::BestFit).unwrap();

        unsafe {
            a.as_ptr().write_bytes(0xAA, 10);
            b.as_ptr().write_bytes(0xBB, 100);

            let a = std::slice::from_raw_parts(a.as_ptr(), 10);
            let b = std::slice::from_raw_parts(b.as_ptr(), 100);
            assert!(a.iter().all(|byte| *byte == 0xAA));
            assert!(b.iter().all(|byte| *byte == 0xBB));
        }

        assert_eq!(addr(a) % W, 0);
        assert_eq!(addr(b) % W, 0);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn miss_appends_at_the_tail() {
        let mut heap = heap();

        let a = heap.allocate(2 * W, Policy::FirstFit).unwrap();
        let b = heap.allocate(4 * W, Policy::FirstFit).unwrap();

        assert_eq!(addr(b), addr(a) + 2 * W + H);
        assert_eq!(sizes(&heap), vec![(2 * W, false), (4 * W, false)]);
    }

    #[test]
    fn freed_block_is_reused() {
        let mut heap = heap();

        let a = heap.allocate(4 * W, Policy::FirstFit).unwrap();
        heap.allocate(W, Policy::FirstFit).unwrap();

        unsafe { heap.release(a.as_ptr()) };
        let b = heap.allocate(4 * W, Policy::FirstFit).unwrap();

        assert_eq!(a, b);
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn first_fit_picks_first_qualifying_block() {
        let mut heap = heap();
        let runs = free_runs(&mut heap, &[W, 6 * W, 3 * W]);

        let ptr = heap.allocate(2 * W, Policy::FirstFit).unwrap();
        assert_eq!(ptr, runs[1]);
    }

    #[test]
    fn best_fit_picks_least_waste() {
        let mut heap = heap();
        let runs = free_runs(&mut heap, &[W, 6 * W, 3 * W]);

        let ptr = heap.allocate(2 * W, Policy::BestFit).unwrap();
        assert_eq!(ptr, runs[2]);
    }

    #[test]
    fn split_leaves_exact_remainder() {
        let mut heap = heap();
        let runs = free_runs(&mut heap, &[96 + H]);

        let ptr = heap.allocate(16, Policy::FirstFit).unwrap();

        assert_eq!(ptr, runs[0]);
        assert_eq!(sizes(&heap), vec![(16, false), (96 + H - 16 - H, true), (W, false)]);
        assert_eq!(16 + H + (96 + H - 16 - H), 96 + H);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn split_of_the_tail_moves_the_tail() {
        let mut heap = heap();

        let a = heap.allocate(8 * W, Policy::FirstFit).unwrap();
        unsafe { heap.release(a.as_ptr()) };

        heap.allocate(2 * W, Policy::FirstFit).unwrap();

        assert_eq!(sizes(&heap), vec![(2 * W, false), (6 * W - H, true)]);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn small_slack_is_not_split() {
        let mut heap = heap();
        let runs = free_runs(&mut heap, &[2 * W + H - W]);

        let ptr = heap.allocate(2 * W, Policy::FirstFit).unwrap();

        assert_eq!(ptr, runs[0]);
        assert_eq!(sizes(&heap), vec![(2 * W + H - W, false), (W, false)]);
    }

    #[test]
    fn release_merges_with_free_next() {
        let mut heap = heap();

        let a = heap.allocate(2 * W, Policy::FirstFit).unwrap();
        let b = heap.allocate(3 * W, Policy::FirstFit).unwrap();
        heap.allocate(W, Policy::FirstFit).unwrap();

        unsafe {
            heap.release(b.as_ptr());
            heap.release(a.as_ptr());
        }

        assert_eq!(sizes(&heap), vec![(5 * W + H, true), (W, false)]);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn release_merges_with_free_prev() {
        let mut heap = heap();

        let a = heap.allocate(2 * W, Policy::FirstFit).unwrap();
        let b = heap.allocate(3 * W, Policy::FirstFit).unwrap();
        heap.allocate(W, Policy::FirstFit).unwrap();

        unsafe {
            heap.release(a.as_ptr());
            heap.release(b.as_ptr());
        }

        assert_eq!(sizes(&heap), vec![(5 * W + H, true), (W, false)]);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn release_between_two_free_blocks_merges_all_three() {
        let mut heap = heap();

        let a = heap.allocate(2 * W, Policy::FirstFit).unwrap();
        let b = heap.allocate(3 * W, Policy::FirstFit).unwrap();
        let c = heap.allocate(4 * W, Policy::FirstFit).unwrap();
        heap.allocate(W, Policy::FirstFit).unwrap();

        unsafe {
            heap.release(a.as_ptr());
            heap.release(c.as_ptr());
            heap.release(b.as_ptr());
        }

        assert_eq!(sizes(&heap), vec![(9 * W + 2 * H, true), (W, false)]);
        assert_eq!(heap.total_free_size(), 9 * W + 3 * H);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn merging_into_the_tail_moves_the_tail() {
        let mut heap = heap();

        let a = heap.allocate(2 * W, Policy::FirstFit).unwrap();
        let b = heap.allocate(3 * W, Policy::FirstFit).unwrap();

        unsafe {
            heap.release(b.as_ptr());
            heap.release(a.as_ptr());
        }

        assert_eq!(sizes(&heap), vec![(5 * W + H, true)]);
        assert_eq!(heap.check(), Ok(()));

        let c = heap.allocate(W, Policy::FirstFit).unwrap();
        assert_eq!(c, a);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn blocks_apart_in_memory_are_not_merged() {
        let mut heap = heap();

        let a = heap.allocate(2 * W, Policy::FirstFit).unwrap();
        heap.allocate(W, Policy::FirstFit).unwrap();
        unsafe { heap.release(a.as_ptr()) };

        // Fake a gap between the tail and the next growth.
        heap.source.grow(4 * W).unwrap();
        let far = heap.allocate(3 * W, Policy::FirstFit).unwrap();
        let used = heap.blocks().nth(1).unwrap().addr;

        // Free the separator: it touches `a` but not `far`.
        unsafe { heap.release(used as *mut u8) };
        unsafe { heap.release(far.as_ptr()) };

        assert_eq!(sizes(&heap), vec![(3 * W + H, true), (3 * W, true)]);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn null_release_is_a_no_op() {
        let mut heap = heap();

        unsafe { heap.release(std::ptr::null_mut()) };
        assert!(heap.is_empty());

        let a = heap.allocate(2 * W, Policy::FirstFit).unwrap();
        heap.allocate(6 * W, Policy::FirstFit).unwrap();
        unsafe { heap.release(a.as_ptr()) };

        let (free, largest) = (heap.total_free_size(), heap.largest_free_segment());
        unsafe { heap.release(std::ptr::null_mut()) };

        assert_eq!(heap.total_free_size(), free);
        assert_eq!(heap.largest_free_segment(), largest);
    }

    #[test]
    fn total_free_size_counts_headers() {
        let mut heap = heap();

        assert_eq!(heap.total_free_size(), 0);

        free_runs(&mut heap, &[W, 6 * W, 3 * W]);

        assert_eq!(heap.total_free_size(), (W + H) + (6 * W + H) + (3 * W + H));
    }

    #[test]
    fn largest_free_segment_counts_used_blocks_too() {
        let mut heap = heap();

        let a = heap.allocate(2 * W, Policy::FirstFit).unwrap();
        heap.allocate(10 * W, Policy::FirstFit).unwrap();
        unsafe { heap.release(a.as_ptr()) };

        assert_eq!(heap.largest_free_segment(), 10 * W);
        assert_eq!(heap.largest_free_block(), 2 * W);
    }

    #[test]
    fn empty_heap_statistics_are_zero() {
        let heap = heap();

        assert_eq!(heap.total_free_size(), 0);
        assert_eq!(heap.largest_free_segment(), 0);
        assert_eq!(heap.largest_free_block(), 0);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn exhaustion_leaves_the_heap_untouched() {
        let mut heap = Heap::new(Reserved::with_capacity(crate::kernel::page_size()));

        let a = heap.allocate(4 * W, Policy::FirstFit).unwrap();
        unsafe { heap.release(a.as_ptr()) };
        let before: Vec<_> = heap.blocks().collect();

        let requested = 1 << 20;
        assert_eq!(
            heap.try_allocate(requested, Policy::BestFit),
            Err(AllocError::Exhausted { requested })
        );
        assert_eq!(heap.try_allocate(usize::MAX, Policy::FirstFit), Err(AllocError::Exhausted { requested: usize::MAX }));
        assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
    }

    #[test]
    fn policies_share_one_list() {
        let mut heap = heap();

        let a = heap.allocate(4 * W, Policy::BestFit).unwrap();
        heap.allocate(W, Policy::BestFit).unwrap();
        unsafe { heap.release(a.as_ptr()) };

        let b = heap.allocate(4 * W, Policy::FirstFit).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn check_reports_adjacent_free_blocks() {
        let mut heap = heap();

        let a = heap.allocate(2 * W, Policy::FirstFit).unwrap();
        let b = heap.allocate(2 * W, Policy::FirstFit).unwrap();

        unsafe {
            block::header(a).as_mut().data.is_free = true;
            block::header(b).as_mut().data.is_free = true;
        }

        assert_eq!(
            heap.check(),
            Err(HeapError::AdjacentFree {
                first: addr(a) - H,
                second: addr(b) - H,
            })
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "double release")]
    fn double_release_is_caught_in_debug_builds() {
        let mut heap = heap();

        let a = heap.allocate(2 * W, Policy::FirstFit).unwrap();
        heap.allocate(2 * W, Policy::FirstFit).unwrap();

        unsafe {
            heap.release(a.as_ptr());
            heap.release(a.as_ptr());
        }
    }
}
