//! Error types of the heap.

use std::error::Error;
use std::fmt;

/// Why an allocation request was refused. The heap is left untouched in
/// every case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// Zero bytes were requested.
    ZeroSize,
    /// The memory source could not grow the arena.
    Exhausted {
        /// Payload bytes requested by the caller.
        requested: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSize => write!(f, "zero-sized allocation request"),
            Self::Exhausted { requested } => {
                write!(f, "arena exhausted: could not grow for {requested} bytes")
            }
        }
    }
}

impl Error for AllocError {}

/// A broken block list invariant, as reported by [`crate::Heap::check`].
///
/// Addresses are header addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapError {
    /// A block does not sit above the end of its predecessor.
    Unordered {
        /// The predecessor.
        prev: usize,
        /// The offending block.
        block: usize,
    },
    /// Two address-adjacent blocks are both free.
    AdjacentFree {
        /// The lower of the two blocks.
        first: usize,
        /// The upper of the two blocks.
        second: usize,
    },
    /// `prev` of a block does not point back at its predecessor.
    BrokenLink {
        /// The block with the wrong back link.
        block: usize,
    },
    /// The last block reached walking from the head is not the tail.
    TailMismatch {
        /// Last block reached by the walk.
        walked: usize,
        /// Block recorded as the tail.
        tail: usize,
    },
    /// A header or a payload size is not aligned to the header alignment.
    Misaligned {
        /// The offending block.
        block: usize,
    },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unordered { prev, block } => {
                write!(f, "block {block:#x} overlaps or precedes block {prev:#x}")
            }
            Self::AdjacentFree { first, second } => {
                write!(f, "adjacent blocks {first:#x} and {second:#x} are both free")
            }
            Self::BrokenLink { block } => {
                write!(f, "block {block:#x} does not link back to its predecessor")
            }
            Self::TailMismatch { walked, tail } => {
                write!(f, "list ends at {walked:#x} but the tail is {tail:#x}")
            }
            Self::Misaligned { block } => write!(f, "block {block:#x} is misaligned"),
        }
    }
}

impl Error for HeapError {}
