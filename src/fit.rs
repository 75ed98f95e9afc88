//! Free block search strategies.
//!
//! Both strategies scan the whole block list in address order and only look
//! at free blocks big enough for the request. They differ in which of those
//! they pick:
//!
//! ```text
//!   request: 16       free: [ 8 ]  used  [ 48 ]  used  [ 24 ]
//!
//!   first fit:                         ^^^^^^           (lowest address)
//!   best fit:                                         ^^^^^^ (least waste)
//! ```

use std::ptr::NonNull;

use crate::{
    block::Block,
    list::{Link, List, Node},
};

/// Which free block an allocation takes when several would do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Policy {
    /// The free block with the lowest address.
    #[default]
    FirstFit,
    /// The free block that leaves the fewest unused bytes. Ties go to the
    /// lowest address.
    BestFit,
}

impl Policy {
    /// Returns the free block of `blocks` this policy picks for `size`
    /// payload bytes, if there is any.
    pub(crate) fn find(self, blocks: &List<Block>, size: usize) -> Link<Node<Block>> {
        match self {
            Policy::FirstFit => first_fit(blocks, size),
            Policy::BestFit => best_fit(blocks, size),
        }
    }
}

#[inline]
fn fits(node: NonNull<Node<Block>>, size: usize) -> Option<usize> {
    let block = unsafe { &node.as_ref().data };

    if block.is_free && block.size >= size {
        Some(block.size - size)
    } else {
        None
    }
}

/// First free block in address order with at least `size` bytes.
fn first_fit(blocks: &List<Block>, size: usize) -> Link<Node<Block>> {
    blocks.nodes().find(|node| fits(*node, size).is_some())
}

/// Free block whose size least exceeds `size`. An exact fit ends the scan.
fn best_fit(blocks: &List<Block>, size: usize) -> Link<Node<Block>> {
    let mut best: Option<(NonNull<Node<Block>>, usize)> = None;

    for node in blocks.nodes() {
        let Some(waste) = fits(node, size) else {
            continue;
        };

        if waste == 0 {
            return Some(node);
        }

        // Strictly smaller only, so the lowest address wins a tie.
        if best.is_none_or(|(_, least)| waste < least) {
            best = Some((node, waste));
        }
    }

    best.map(|(node, _)| node)
}
