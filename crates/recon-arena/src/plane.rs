//! Two-cursor arena over one plane's address range.
//!
//! A [`PlaneArena`] carves `[base, end)` from both sides: forward
//! allocations bump a cursor upward from the base, stack allocations move
//! a second cursor downward from the end. The permanent boundary sits at
//! or below the forward cursor and is never reclaimed by a transient
//! reset:
//!
//! ```text
//! base <= permanent <= forward <= stack <= ceiling <= end
//! ```
//!
//! The arena stores offsets only. The bytes themselves live in
//! [`PoolStorage`](crate::PoolStorage) (host) or on the device.

use recon_core::{align_up, Plane};

/// Failed cursor move. The manager turns this into
/// [`MemoryError::OutOfMemory`](crate::MemoryError::OutOfMemory).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Shortfall {
    pub(crate) requested: usize,
    pub(crate) available: usize,
}

/// A value per plane, with the device entry absent on host-only instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneCursors {
    /// Host-plane value.
    pub host: usize,
    /// Device-plane value, if the instance has a device plane.
    pub device: Option<usize>,
}

fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// Forward/stack cursors over one plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneArena {
    plane: Plane,
    base: usize,
    end: usize,
    forward: usize,
    stack: usize,
    permanent: usize,
    /// Where a transient reset puts the stack cursor. Equals `end` unless
    /// stacked memory is blocked.
    ceiling: usize,
    alignment: usize,
    sealed: bool,
    high_water: usize,
}

impl PlaneArena {
    /// Arena over `[base, end)`. `base` is rounded up to `alignment`.
    pub fn new(plane: Plane, base: usize, end: usize, alignment: usize) -> Self {
        let base = align_up(base, alignment).min(end);
        Self {
            plane,
            base,
            end,
            forward: base,
            stack: end,
            permanent: base,
            ceiling: end,
            alignment,
            sealed: false,
            high_water: 0,
        }
    }

    /// Zero-capacity arena used before a pool is installed.
    pub(crate) fn unbacked(plane: Plane, alignment: usize) -> Self {
        Self::new(plane, 0, 0, alignment)
    }

    /// Plane this arena manages.
    pub fn plane(&self) -> Plane {
        self.plane
    }

    /// Lowest address of the range.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Address one past the range.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Forward cursor.
    pub fn forward(&self) -> usize {
        self.forward
    }

    /// Stack cursor.
    pub fn stack(&self) -> usize {
        self.stack
    }

    /// Sealed permanent boundary (equal to `base` before sealing).
    pub fn permanent_boundary(&self) -> usize {
        self.permanent
    }

    /// Whether the permanent phase has completed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether stacked memory is blocked below `end`.
    pub fn is_blocked(&self) -> bool {
        self.ceiling != self.end
    }

    /// Total bytes in the range.
    pub fn capacity(&self) -> usize {
        self.end - self.base
    }

    /// Bytes between the cursors.
    pub fn free_bytes(&self) -> usize {
        self.stack - self.forward
    }

    /// Forward usage plus stack usage.
    pub fn used(&self) -> usize {
        (self.forward - self.base) + (self.end - self.stack)
    }

    /// Bytes below the permanent boundary.
    pub fn permanent_bytes(&self) -> usize {
        self.permanent - self.base
    }

    /// Largest [`used`](Self::used) value observed.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Address the next forward allocation would start at.
    pub(crate) fn forward_start(&self) -> usize {
        align_up(self.forward, self.alignment)
    }

    /// Bump the forward cursor past `len` bytes starting at
    /// [`forward_start`](Self::forward_start). Nothing moves on failure.
    pub(crate) fn alloc_forward(&mut self, len: usize) -> Result<usize, Shortfall> {
        let start = self.forward_start();
        let next = start.checked_add(len).filter(|&next| next <= self.stack);
        match next {
            Some(next) => {
                self.forward = next;
                self.note_usage();
                Ok(start)
            }
            None => Err(Shortfall {
                requested: start.saturating_add(len) - self.forward,
                available: self.free_bytes(),
            }),
        }
    }

    /// Move the stack cursor down by `len` bytes, rounded down to the
    /// alignment. Nothing moves on failure.
    pub(crate) fn alloc_stack(&mut self, len: usize) -> Result<usize, Shortfall> {
        let next = self
            .stack
            .checked_sub(len)
            .map(|s| align_down(s, self.alignment))
            .filter(|&s| s >= self.forward);
        match next {
            Some(next) => {
                self.stack = next;
                self.note_usage();
                Ok(next)
            }
            None => Err(Shortfall {
                requested: align_up(len, self.alignment),
                available: self.free_bytes(),
            }),
        }
    }

    /// Fix the permanent boundary at the forward cursor.
    pub(crate) fn seal(&mut self) {
        self.permanent = self.forward;
        self.sealed = true;
    }

    /// Raise the permanent boundary to `to`, dragging the forward cursor
    /// along. Used when secondaries layer permanent data above ours.
    pub(crate) fn extend_permanent(&mut self, to: usize) -> Result<(), Shortfall> {
        if to <= self.permanent {
            self.sealed = true;
            return Ok(());
        }
        if to > self.stack {
            return Err(Shortfall {
                requested: to - self.forward.min(to),
                available: self.free_bytes(),
            });
        }
        self.permanent = to;
        self.forward = self.forward.max(to);
        self.sealed = true;
        self.note_usage();
        Ok(())
    }

    /// Reclaim everything above the permanent boundary (or above `floor`,
    /// whichever is higher) and below the ceiling.
    pub(crate) fn reset_transient(&mut self, floor: usize) {
        self.forward = self.permanent.max(floor).min(self.ceiling);
        self.stack = self.ceiling;
    }

    /// Restore the stack cursor to a frame snapshot.
    pub(crate) fn restore_stack(&mut self, to: usize) {
        debug_assert!(to >= self.stack && to <= self.end);
        self.stack = to;
    }

    /// Move the forward cursor back to `to`, never below the permanent
    /// boundary.
    pub(crate) fn rewind_forward(&mut self, to: usize) {
        self.forward = to.clamp(self.permanent, self.forward);
    }

    /// Treat `[limit, end)` as owned by someone else until
    /// [`unblock`](Self::unblock).
    pub(crate) fn block(&mut self, limit: usize) -> Result<(), Shortfall> {
        if limit < self.forward || limit > self.end {
            return Err(Shortfall {
                requested: self.end.saturating_sub(limit),
                available: self.end - self.forward,
            });
        }
        self.ceiling = limit;
        self.stack = self.stack.min(limit);
        Ok(())
    }

    /// Give the range above the ceiling back to the stack.
    pub(crate) fn unblock(&mut self) {
        self.ceiling = self.end;
        self.stack = self.end;
    }

    fn note_usage(&mut self) {
        self.high_water = self.high_water.max(self.used());
    }
}
