//! Arena configuration parameters.

use crate::error::MemoryError;

/// How resources obtain their backing storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// One global pool per plane, carved by the bump/stack cursors.
    Global,
    /// A separate heap buffer per resource (host only). Bypasses the
    /// cursors; frames still release individually-owned stack buffers.
    Individual,
}

/// Configuration for a [`MemoryManager`](crate::MemoryManager).
///
/// Validated at construction; all values are immutable after creation.
#[derive(Clone, Debug)]
pub struct ArenaConfig {
    /// Every allocation starts on a multiple of this many bytes.
    ///
    /// Default: 64. Must be a power of two.
    pub alignment: usize,

    /// Backing storage strategy. Default: [`AllocationStrategy::Global`].
    pub strategy: AllocationStrategy,

    /// Allocation diagnostics. `>= 2` logs every allocation and free
    /// at `debug` level.
    pub alloc_debug_level: u8,

    /// General diagnostics. `>= 3` logs plane usage on every frame pop.
    pub debug_level: u8,
}

impl ArenaConfig {
    /// Default allocation alignment in bytes.
    pub const DEFAULT_ALIGNMENT: usize = 64;

    /// Create a config with the given alignment and default values
    /// for everything else.
    pub fn new(alignment: usize) -> Self {
        Self {
            alignment,
            strategy: AllocationStrategy::Global,
            alloc_debug_level: 0,
            debug_level: 0,
        }
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if !self.alignment.is_power_of_two() {
            return Err(MemoryError::InvalidConfig {
                reason: format!("alignment {} is not a power of two", self.alignment),
            });
        }
        Ok(())
    }

    /// Whether per-allocation logging is enabled.
    pub(crate) fn logs_allocations(&self) -> bool {
        self.alloc_debug_level >= 2
    }

    /// Whether frame pops log plane usage.
    pub(crate) fn logs_frame_usage(&self) -> bool {
        self.debug_level >= 3
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ALIGNMENT)
    }
}
