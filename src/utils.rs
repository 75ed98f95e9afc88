//! Helpers that don't belong to any concrete part of the allocator.

/// Rounds `to_be_aligned` up to the next multiple of `alignment`.
///
/// Used to round payload sizes up to the header alignment, so every block
/// header lands on an aligned address, and to round reservations up to a
/// whole number of pages. `alignment` must be a power of two.
pub fn align(to_be_aligned: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when
/// `to_be_aligned` is close to `usize::MAX`.
pub fn checked_align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());
    Some(to_be_aligned.checked_add(alignment - 1)? & !(alignment - 1))
}
