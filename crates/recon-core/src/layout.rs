//! Size-function contract and layout helpers.
//!
//! A resource describes its storage with a [`LayoutFn`]: given a start
//! address in a plane it returns the address immediately past the
//! structures it would place there. The registry calls it once at
//! [`PROBE_ADDRESS`] to learn the size before any memory exists, and
//! again at the real address once the arena has placed the resource.

use std::sync::Arc;

/// Sentinel address used for dry-run size probes.
pub const PROBE_ADDRESS: usize = 1;

/// Size-function: start address in, end address out.
pub type LayoutFn = Arc<dyn Fn(usize) -> usize + Send + Sync>;

/// Round `value` up to the next multiple of `align`.
///
/// `align` must be a power of two.
pub fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two(), "alignment {align} is not a power of two");
    value.next_multiple_of(align)
}

/// Bytes needed to move `value` up to the next multiple of `align`.
pub fn padding_for(value: usize, align: usize) -> usize {
    align_up(value, align) - value
}

/// Walks a start address forward over a sequence of aligned sub-buffers.
///
/// This is the building block for size-functions: each `reserve` aligns
/// the cursor, records the start of the sub-buffer, and advances past it.
///
/// ```
/// use recon_core::LayoutCursor;
///
/// let mut c = LayoutCursor::new(64);
/// let hits = c.reserve(100, 16);
/// let ids = c.reserve_array::<u32>(10);
/// assert_eq!(hits, 64);
/// assert_eq!(ids, 164);
/// assert_eq!(c.end(), 204);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutCursor {
    addr: usize,
}

impl LayoutCursor {
    /// Start a layout at `base`.
    pub fn new(base: usize) -> Self {
        Self { addr: base }
    }

    /// Reserve `bytes` bytes aligned to `align`, returning their start.
    pub fn reserve(&mut self, bytes: usize, align: usize) -> usize {
        let start = align_up(self.addr, align);
        self.addr = start + bytes;
        start
    }

    /// Reserve `count` values of `T` at `T`'s natural alignment.
    pub fn reserve_array<T>(&mut self, count: usize) -> usize {
        self.reserve(count * std::mem::size_of::<T>(), std::mem::align_of::<T>())
    }

    /// Address immediately past everything reserved so far.
    pub fn end(&self) -> usize {
        self.addr
    }
}
