//! Single outstanding volatile device region.

/// Start of the volatile region, recorded on first use.
///
/// Further requests extend the same region; it is returned in one lump
/// by rewinding the device forward cursor to the recorded start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VolatileRegion {
    start: Option<usize>,
}

impl VolatileRegion {
    /// Record `forward` as the start unless a region is already open.
    pub(crate) fn open(&mut self, forward: usize) -> usize {
        *self.start.get_or_insert(forward)
    }

    /// Close the region, yielding its start.
    pub(crate) fn close(&mut self) -> Option<usize> {
        self.start.take()
    }

    /// Start of the open region.
    pub fn start(&self) -> Option<usize> {
        self.start
    }

    /// Whether a region is open.
    pub fn is_open(&self) -> bool {
        self.start.is_some()
    }
}
