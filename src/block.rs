use std::{mem, ptr::NonNull};

use crate::{list::Node, utils::align};

/// Header size of a block. The header is the whole [`Node`] since every
/// `Block` is always used as a node of the block list.
pub const BLOCK_HEADER_SIZE: usize = mem::size_of::<Node<Block>>();

/// Natural alignment of the block header. Payload sizes are rounded up to
/// this so that the header following a payload is aligned as well.
pub const BLOCK_ALIGN: usize = mem::align_of::<Node<Block>>();

/// Metadata of a block. The content is placed right after this header.
///
/// The following diagram represents this structure including the [`Node`]
/// links that wrap it:
///
/// ```text
/// +---------------------+ <------+
/// |        next         |        |
/// +---------------------+        |
/// |        prev         |        |
/// +---------------------+        | -> Header (BLOCK_HEADER_SIZE)
/// |        size         |        |
/// +---------------------+        |
/// |    is_free (1b)     |        |
/// +---------------------+ <------+ <- pointer handed to the caller
/// |       Content       |        |
/// |         ...         |        | -> `size` addressable bytes
/// |                     |        |
/// +---------------------+ <------+ <- next block header, if adjacent
/// ```
pub(crate) struct Block {
    /// Payload bytes the caller may use, header excluded.
    pub size: usize,
    /// Flag to tell whether the block is free or not.
    pub is_free: bool,
}

impl Block {
    pub const fn used(size: usize) -> Self {
        Self { size, is_free: false }
    }

    pub const fn free(size: usize) -> Self {
        Self { size, is_free: true }
    }
}

/// Public snapshot of a block as seen by [`crate::Heap::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the payload, the value `allocate` hands out for this block.
    pub addr: usize,
    /// Usable payload bytes.
    pub size: usize,
    /// Whether the block is on the free side of the list.
    pub is_free: bool,
}

/// Rounds a requested payload size up to [`BLOCK_ALIGN`]. `None` when the
/// block would not fit in the address space.
pub(crate) fn payload_size(requested: usize) -> Option<usize> {
    if requested > usize::MAX - BLOCK_HEADER_SIZE - BLOCK_ALIGN {
        return None;
    }

    Some(align(requested, BLOCK_ALIGN))
}

/// Address of the first payload byte of `node`.
#[inline]
pub(crate) fn payload(node: NonNull<Node<Block>>) -> NonNull<u8> {
    unsafe { node.cast::<u8>().add(BLOCK_HEADER_SIZE) }
}

/// Recovers the header that precedes a payload returned by [`payload`].
///
/// **SAFETY**: `ptr` must have been produced by [`payload`].
#[inline]
pub(crate) unsafe fn header(ptr: NonNull<u8>) -> NonNull<Node<Block>> {
    unsafe { ptr.sub(BLOCK_HEADER_SIZE).cast() }
}

/// First address past the payload of `node`.
///
/// **SAFETY**: `node` must point to an initialized header.
#[inline]
pub(crate) unsafe fn end(node: NonNull<Node<Block>>) -> usize {
    unsafe { node.as_ptr() as usize + BLOCK_HEADER_SIZE + node.as_ref().data.size }
}

/// Whether `second` starts exactly where `first` ends. Only adjacent blocks
/// can be merged or describe one contiguous span.
///
/// **SAFETY**: `first` must point to an initialized header.
#[inline]
pub(crate) unsafe fn adjacent(first: NonNull<Node<Block>>, second: NonNull<Node<Block>>) -> bool {
    unsafe { end(first) == second.as_ptr() as usize }
}
