//! Where the arena gets its memory from.
//!
//! A [`MemorySource`] only ever grows: it hands out fresh bytes on request
//! and never takes them back while the heap is alive. Two sources exist:
//!
//! - [`ProgramBreak`] moves the program break with `sbrk(2)`. This is the
//!   classic data segment heap and what the process-wide arena uses on unix.
//! - [`Reserved`] reserves a fixed range of address space up front and hands
//!   out contiguous increments of it. It works on every platform and gives
//!   isolated heaps that don't interfere with anyone else's memory.

use std::ptr::NonNull;

use crate::{
    block::BLOCK_ALIGN,
    kernel,
    utils::{align, checked_align},
};

/// A growable region of memory.
///
/// **SAFETY**: implementors must return regions that are valid for reads and
/// writes of `len` bytes, aligned to the block header, not handed out
/// before and alive for as long as the source itself.
pub unsafe trait MemorySource {
    /// Grows the arena by `len` bytes and returns the start of the new
    /// bytes, or `None` if the request can not be satisfied.
    ///
    /// `len` is always a multiple of the block header alignment.
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>>;
}

/// Grows the arena by moving the program break.
///
/// ```text
///   High Address ┌─────────────────────┐
///                │       Stack         │ ↓ grows down
///                │                     │
///                │       Heap          │ ↑ grows up (sbrk)
///                ├─────────────────────┤ ← Program Break
///                │        Data         │
///   Low Address  └─────────────────────┘
/// ```
///
/// Other code in the process (the system `malloc`, for instance) may move
/// the break as well, so two successive growths are not guaranteed to be
/// contiguous. The heap only merges blocks that really touch.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct ProgramBreak {
    _private: (),
}

#[cfg(unix)]
impl ProgramBreak {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(unix)]
unsafe impl MemorySource for ProgramBreak {
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        use libc::sbrk;

        // sbrk signals failure with (void *) -1.
        const FAILED: usize = usize::MAX;

        unsafe {
            let current = sbrk(0);
            if current as usize == FAILED {
                return None;
            }

            // Someone may have left the break misaligned, pad it back.
            let padding = align(current as usize, BLOCK_ALIGN) - current as usize;
            let total = len.checked_add(padding)?;

            let addr = sbrk(total.try_into().ok()?);
            if addr as usize == FAILED {
                log::debug!("sbrk refused to grow the break by {total} bytes");
                return None;
            }

            let (start, shortfall) = place(addr as usize, total, len)?;

            // The break moved between the two calls, top the range up so the
            // aligned start still has `len` bytes behind it.
            if shortfall > 0 {
                let end = addr as usize + total;
                let more = sbrk(shortfall.try_into().ok()?);

                if more as usize != end {
                    log::debug!("break moved while topping up {shortfall} bytes");
                    return None;
                }
            }

            NonNull::new(start as *mut u8)
        }
    }
}

/// Aligned start of `len` bytes inside the `total` bytes that the break
/// handed out at `addr`, and how many bytes are missing after the range
/// for them to fit.
#[cfg(unix)]
fn place(addr: usize, total: usize, len: usize) -> Option<(usize, usize)> {
    let start = align(addr, BLOCK_ALIGN);
    let end = addr.checked_add(total)?;
    let needed = start.checked_add(len)?;

    Some((start, needed.saturating_sub(end)))
}

/// A fixed-capacity range of address space handed out front to back.
///
/// Nothing is reserved until the first growth. Once `capacity` bytes have
/// been handed out, further growth fails, which is how the arena reports
/// resource exhaustion. The reservation goes back to the kernel when the
/// source is dropped.
#[derive(Debug)]
pub struct Reserved {
    capacity: usize,
    base: Option<NonNull<u8>>,
    /// Bytes handed out so far.
    used: usize,
    /// Bytes made readable and writable so far (page granular).
    committed: usize,
}

impl Reserved {
    /// Default capacity of the process-wide arena when there is no program break.
    #[cfg(target_pointer_width = "64")]
    pub const DEFAULT_CAPACITY: usize = 1 << 36;
    #[cfg(not(target_pointer_width = "64"))]
    pub const DEFAULT_CAPACITY: usize = 1 << 30;

    /// Creates a source able to hand out up to `capacity` bytes, rounded up
    /// to whole pages when the reservation happens.
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            base: None,
            used: 0,
            committed: 0,
        }
    }

    /// Total bytes this source may hand out.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes still available.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.used)
    }

    fn base(&mut self) -> Option<NonNull<u8>> {
        if let Some(base) = self.base {
            return Some(base);
        }

        let capacity = checked_align(self.capacity, kernel::page_size())?;
        if capacity == 0 {
            return None;
        }

        let base = unsafe { kernel::reserve_memory(capacity) };

        match base {
            Some(base) => {
                log::debug!("reserved {capacity} bytes of address space at {base:p}");
                self.capacity = capacity;
                self.base = Some(base);
            }
            None => log::debug!("kernel refused to reserve {capacity} bytes"),
        }

        base
    }
}

unsafe impl MemorySource for Reserved {
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        let base = self.base()?;
        if len > self.available() {
            return None;
        }

        let end = self.used + len;

        if end > self.committed {
            let committed = align(end, kernel::page_size()).min(self.capacity);
            let start = unsafe { base.add(self.committed) };

            if !unsafe { kernel::commit_memory(start, committed - self.committed) } {
                return None;
            }
            self.committed = committed;
        }

        let addr = unsafe { base.add(self.used) };
        self.used = end;

        Some(addr)
    }
}

// The range is owned by the source alone.
unsafe impl Send for Reserved {}

impl Drop for Reserved {
    fn drop(&mut self) {
        if let Some(base) = self.base.take() {
            unsafe { kernel::return_memory(base, self.capacity) };
        }
    }
}
