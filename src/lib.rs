//! # fitalloc - first fit and best fit heap allocation
//!
//! A user-space heap that manages one growable arena and hands out memory
//! from it with either of two policies, first fit or best fit, over a single
//! list of blocks.
//!
//! ```text
//!   arena (grows to the right, never shrinks)
//!
//!   +-----+--------+-----+------+-----+-------------+-----+-----+
//!   | hdr |  used  | hdr | free | hdr |    used     | hdr | ... |
//!   +-----+--------+-----+------+-----+-------------+-----+-----+
//!   ^ head                                                ^ tail
//! ```
//!
//! - An allocation searches the list for a free block. If the block found
//!   has room for another header to spare, it is split and the rest stays
//!   free. If nothing fits, the arena grows and a new block is appended.
//! - A release marks the block free and merges it with the blocks right
//!   before and after it when those are free too, so two free blocks never
//!   touch.
//!
//! ## Crate Structure
//!
//! ```text
//!   fitalloc
//!   ├── heap    - Heap: allocate, release, split, coalesce, statistics
//!   ├── fit     - Policy: first fit and best fit searches
//!   ├── source  - MemorySource: ProgramBreak (sbrk) and Reserved arenas
//!   ├── global  - the process-wide arena and FitAlloc (GlobalAlloc)
//!   ├── block   - block header layout (internal)
//!   ├── list    - intrusive doubly linked list (internal)
//!   ├── kernel  - page reservation syscalls (internal)
//!   └── error   - AllocError, HeapError
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! let ptr = fitalloc::allocate_best_fit(64);
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     ptr.write_bytes(0, 64);
//!     fitalloc::release_best_fit(ptr);
//! }
//!
//! println!("free bytes: {}", fitalloc::total_free_size());
//! ```
//!
//! Isolated heaps, handy for tests or for more than one arena:
//!
//! ```rust
//! use fitalloc::{Heap, Policy, Reserved};
//!
//! let mut heap = Heap::new(Reserved::with_capacity(1 << 16));
//! let ptr = heap.allocate(100, Policy::FirstFit).unwrap();
//!
//! unsafe { heap.release(ptr.as_ptr()) };
//! assert_eq!(heap.check(), Ok(()));
//! ```
//!
//! ## Limitations
//!
//! - Memory is never returned to the operating system.
//! - Alignment is the machine word, nothing stronger.
//! - Releasing a foreign pointer or the same pointer twice is undefined
//!   behavior. Debug builds catch the common cases with assertions.

mod block;
pub mod error;
pub mod fit;
pub mod global;
pub mod heap;
mod kernel;
mod list;
pub mod source;
mod utils;

pub use block::{BLOCK_ALIGN, BLOCK_HEADER_SIZE, BlockInfo};
pub use error::{AllocError, HeapError};
pub use fit::Policy;
pub use global::{
    FitAlloc, allocate_best_fit, allocate_first_fit, largest_free_block, largest_free_segment,
    release_best_fit, release_first_fit, total_free_size,
};
pub use heap::Heap;
#[cfg(unix)]
pub use source::ProgramBreak;
pub use source::{MemorySource, Reserved};
