//! Placements: where a resource's bytes live.
//!
//! A [`Placement`] is an address range in one plane plus the storage
//! region it indexes into. Reuse dependents additionally remember the
//! epoch of the target they alias, so a read after the target has been
//! released is detected instead of exposing a stale range.

use std::fmt;

use recon_core::ResourceId;

/// Which storage a [`Placement`] indexes into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    /// The plane's global pool (possibly borrowed from a master).
    Pool,
    /// The heap buffer individually owned by the given resource.
    Individual(ResourceId),
    /// The n-th unmanaged chunk (individual strategy only).
    Unmanaged(usize),
}

/// Link from a reuse dependent to the target it aliases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AliasOf {
    /// The target resource.
    pub target: ResourceId,
    /// The target's epoch when the alias was made.
    pub epoch: u32,
}

/// Address range assigned to a resource in one plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct Placement {
    pub(crate) address: usize,
    pub(crate) len: usize,
    pub(crate) region: Region,
    pub(crate) alias: Option<AliasOf>,
}

impl Placement {
    pub(crate) fn new(address: usize, len: usize, region: Region) -> Self {
        Self {
            address,
            len,
            region,
            alias: None,
        }
    }

    pub(crate) fn aliasing(mut self, target: ResourceId, epoch: u32) -> Self {
        self.alias = Some(AliasOf { target, epoch });
        self
    }

    /// Start address within the region.
    pub fn address(&self) -> usize {
        self.address
    }

    /// Length in bytes laid out by the resource's size-function.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the placement covers zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address immediately past the placement.
    pub fn end(&self) -> usize {
        self.address + self.len
    }

    /// Storage region.
    pub fn region(&self) -> Region {
        self.region
    }

    /// The aliased target, for reuse dependents.
    pub fn alias(&self) -> Option<AliasOf> {
        self.alias
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Placement({:#x}..{:#x}, {:?})",
            self.address,
            self.end(),
            self.region
        )?;
        if let Some(alias) = self.alias {
            write!(f, " alias of {}@{}", alias.target, alias.epoch)?;
        }
        Ok(())
    }
}
