//! The process-wide arena.
//!
//! There is exactly one of it per process. It is created empty, grows on
//! the first allocation and lives until the process exits; its memory is
//! never given back to the operating system. The first fit and best fit
//! entry points are two views over this same arena.
//!
//! The arena sits behind a mutex, so calling in from several threads is
//! sound, just serialized.

use std::{
    alloc::{GlobalAlloc, Layout},
    ptr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{block::BLOCK_ALIGN, fit::Policy, heap::Heap};

#[cfg(unix)]
type SystemSource = crate::source::ProgramBreak;
#[cfg(not(unix))]
type SystemSource = crate::source::Reserved;

#[cfg(unix)]
const SYSTEM_SOURCE: SystemSource = crate::source::ProgramBreak::new();
#[cfg(not(unix))]
const SYSTEM_SOURCE: SystemSource = crate::source::Reserved::with_capacity(crate::source::Reserved::DEFAULT_CAPACITY);

static HEAP: Mutex<Heap<SystemSource>> = Mutex::new(Heap::new(SYSTEM_SOURCE));

/// Locks the arena. A panic while holding the lock can't leave the list
/// half linked (nothing in the heap panics mid update), so poisoning is ignored.
fn heap() -> MutexGuard<'static, Heap<SystemSource>> {
    HEAP.lock().unwrap_or_else(PoisonError::into_inner)
}

fn allocate(size: usize, policy: Policy) -> *mut u8 {
    heap()
        .allocate(size, policy)
        .map_or(ptr::null_mut(), |ptr| ptr.as_ptr())
}

/// Allocates `size` bytes from the first free block large enough for them.
/// Returns null if `size` is zero or the arena can't grow.
pub fn allocate_first_fit(size: usize) -> *mut u8 {
    allocate(size, Policy::FirstFit)
}

/// Releases memory obtained from [`allocate_first_fit`] or [`allocate_best_fit`].
/// Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or come from this arena and not have been released yet.
pub unsafe fn release_first_fit(ptr: *mut u8) {
    unsafe { heap().release(ptr) }
}

/// Allocates `size` bytes from the free block that wastes the fewest bytes.
/// Returns null if `size` is zero or the arena can't grow.
pub fn allocate_best_fit(size: usize) -> *mut u8 {
    allocate(size, Policy::BestFit)
}

/// Releases memory obtained from [`allocate_best_fit`] or [`allocate_first_fit`].
/// Null is ignored.
///
/// # Safety
///
/// Same as [`release_first_fit`].
pub unsafe fn release_best_fit(ptr: *mut u8) {
    unsafe { heap().release(ptr) }
}

/// Bytes held by free blocks of the arena, headers included.
pub fn total_free_size() -> usize {
    heap().total_free_size()
}

/// Largest payload size among all blocks of the arena, used ones included.
pub fn largest_free_segment() -> usize {
    heap().largest_free_segment()
}

/// Largest payload size among free blocks of the arena.
pub fn largest_free_block() -> usize {
    heap().largest_free_block()
}

/// [`GlobalAlloc`] over the process-wide arena.
///
/// ```rust,ignore
/// use fitalloc::FitAlloc;
///
/// #[global_allocator]
/// static ALLOCATOR: FitAlloc = FitAlloc::best_fit();
/// ```
///
/// Layouts aligned to more than a machine word are refused. When installed
/// as the global allocator, a logger that allocates must not have `trace`
/// enabled for this crate.
#[derive(Clone, Copy, Debug)]
pub struct FitAlloc {
    policy: Policy,
}

impl FitAlloc {
    pub const fn new(policy: Policy) -> Self {
        Self { policy }
    }

    pub const fn first_fit() -> Self {
        Self::new(Policy::FirstFit)
    }

    pub const fn best_fit() -> Self {
        Self::new(Policy::BestFit)
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }
}

unsafe impl GlobalAlloc for FitAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > BLOCK_ALIGN {
            return ptr::null_mut();
        }

        allocate(layout.size().max(1), self.policy)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { heap().release(ptr) }
    }
}
