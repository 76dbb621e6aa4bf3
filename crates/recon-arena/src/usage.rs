//! Memory usage snapshots for diagnostics.

use std::fmt;

use recon_core::{MemoryType, ProcessorId, ResourceId};

use crate::plane::PlaneArena;

/// Usage of one plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaneUsage {
    /// Forward plus stack bytes in use.
    pub used: usize,
    /// Bytes below the permanent boundary.
    pub permanent: usize,
    /// Total bytes in the plane's range.
    pub capacity: usize,
    /// Largest `used` value observed.
    pub high_water: usize,
}

/// Pool bytes the registered resources of one instance need.
///
/// Permanent bytes are reported separately so a master can stack the
/// permanent data of its secondaries below the shared transient range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolRequirement {
    /// All pooled resources in the host plane.
    pub host: usize,
    /// All pooled resources in the device plane.
    pub device: usize,
    /// Permanent resources in the host plane.
    pub permanent_host: usize,
    /// Permanent resources in the device plane.
    pub permanent_device: usize,
}

impl PoolRequirement {
    /// Host bytes above the permanent boundary.
    pub fn transient_host(&self) -> usize {
        self.host - self.permanent_host
    }

    /// Device bytes above the permanent boundary.
    pub fn transient_device(&self) -> usize {
        self.device - self.permanent_device
    }
}

impl From<&PlaneArena> for PlaneUsage {
    fn from(arena: &PlaneArena) -> Self {
        Self {
            used: arena.used(),
            permanent: arena.permanent_bytes(),
            capacity: arena.capacity(),
            high_water: arena.high_water(),
        }
    }
}

impl fmt::Display for PlaneUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} bytes ({} permanent, max {})",
            self.used, self.capacity, self.permanent, self.high_water
        )
    }
}

/// Usage of both planes of a manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Host plane.
    pub host: PlaneUsage,
    /// Device plane, absent on host-only instances.
    pub device: Option<PlaneUsage>,
    /// Bytes held in individually-owned buffers.
    pub individual: usize,
    /// Bytes held in unmanaged chunks outside the pool.
    pub unmanaged: usize,
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host {}", self.host)?;
        if let Some(device) = &self.device {
            write!(f, ", device {device}")?;
        }
        if self.individual > 0 || self.unmanaged > 0 {
            write!(
                f,
                ", individual {} bytes, unmanaged {} bytes",
                self.individual, self.unmanaged
            )?;
        }
        Ok(())
    }
}

/// Per-resource size record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceStatistics {
    /// Resource id.
    pub id: ResourceId,
    /// Resource name.
    pub name: String,
    /// Owning processor.
    pub owner: ProcessorId,
    /// Flags.
    pub memory_type: MemoryType,
    /// Current (or last) computed size.
    pub size: usize,
    /// Whether the resource currently has storage.
    pub allocated: bool,
}
