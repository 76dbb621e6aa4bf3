//! Arena-specific error types.
//!
//! Every allocation or configuration failure aborts the current
//! initialization or processing unit; none of these errors is retried.

use std::error::Error;
use std::fmt;

use recon_core::{FrameTag, Plane, ResourceId};

/// Allocation discipline involved in a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discipline {
    /// Forward allocation before the permanent boundary is sealed.
    Permanent,
    /// Forward allocation above the permanent boundary.
    Transient,
    /// Downward allocation from the stack cursor.
    Stack,
    /// Aliasing onto another resource's storage.
    Reuse,
    /// The single device-only volatile region.
    Volatile,
    /// Anonymous bytes outside the resource registry.
    Unmanaged,
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Permanent => "permanent",
            Self::Transient => "transient",
            Self::Stack => "stack",
            Self::Reuse => "reuse",
            Self::Volatile => "volatile",
            Self::Unmanaged => "unmanaged",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`MemoryError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A cursor would cross the other cursor.
    OutOfMemory,
    /// A sizing or usage defect (reuse too small, tag mismatch, ...).
    Configuration,
    /// A size-function violated the configured alignment.
    Alignment,
}

/// Errors that can occur during arena operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryError {
    /// The forward and stack cursors would cross.
    OutOfMemory {
        /// Name of the resource being placed.
        resource: String,
        /// Plane the allocation targeted.
        plane: Plane,
        /// Discipline that ran out of space.
        discipline: Discipline,
        /// Bytes requested, including alignment padding.
        requested: usize,
        /// Bytes free between the cursors.
        available: usize,
    },
    /// A reuse dependent needs more bytes than its target holds.
    InsufficientReuse {
        /// The dependent resource.
        resource: String,
        /// The target whose storage is shared.
        target: String,
        /// Bytes the dependent's size-function laid out.
        required: usize,
        /// The target's allocated size.
        available: usize,
    },
    /// A reuse link names a resource that cannot serve as a target.
    InvalidReuseTarget {
        /// The dependent resource.
        resource: String,
        /// The rejected target.
        target: ResourceId,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// A reuse dependent was placed while its target had no storage.
    ReuseTargetUnallocated {
        /// The dependent resource.
        resource: String,
        /// The unallocated target.
        target: String,
    },
    /// Storage of a resource was accessed while it had none.
    Unallocated {
        /// The resource.
        resource: String,
    },
    /// A resource that already has storage was allocated again.
    DoubleAllocation {
        /// The resource.
        resource: String,
    },
    /// A permanent resource was allocated after the boundary was sealed.
    ArenaSealed {
        /// The resource.
        resource: String,
    },
    /// Popped a frame with a tag different from the one on top.
    FrameTagMismatch {
        /// Tag on top of the frame stack.
        expected: FrameTag,
        /// Tag passed to pop.
        found: FrameTag,
    },
    /// Popped a frame while the frame stack was empty.
    EmptyFrameStack {
        /// Tag passed to pop.
        tag: FrameTag,
    },
    /// An operation requires the frame stack to be empty.
    FramesOutstanding {
        /// Number of frames still pushed.
        depth: usize,
    },
    /// A placement does not start on the configured alignment, or a
    /// size-function laid out more at its real address than its probe
    /// promised.
    AlignmentViolation {
        /// The resource.
        resource: String,
        /// Plane of the placement.
        plane: Plane,
        /// Offending address.
        address: usize,
        /// Configured alignment.
        alignment: usize,
    },
    /// A size-function returned an end address before its start address.
    InvalidLayout {
        /// The resource.
        resource: String,
        /// Start address passed in.
        start: usize,
        /// End address returned.
        end: usize,
    },
    /// A resource laid out different sizes in the host and device planes.
    InconsistentPlanes {
        /// The resource.
        resource: String,
        /// Host-plane size.
        host: usize,
        /// Device-plane size.
        device: usize,
    },
    /// Replaying a size-function at an existing address overran the
    /// storage it was originally given.
    LayoutExceedsAllocation {
        /// The resource.
        resource: String,
        /// Plane of the placement.
        plane: Plane,
        /// Bytes the replay laid out.
        required: usize,
        /// Bytes previously allocated.
        available: usize,
    },
    /// A `ResourceId` that is not registered.
    UnknownResource {
        /// The unrecognised resource.
        id: ResourceId,
    },
    /// A reuse dependent points at storage its target has since released
    /// or replaced.
    StaleHandle {
        /// The dependent resource.
        resource: String,
        /// The target that moved on.
        target: String,
    },
    /// An allocation was attempted before any pool was installed, or
    /// after the pool a view borrowed from was dropped.
    PoolUninitialized,
    /// The stacked memory is already blocked.
    StackBlocked,
    /// A device-plane operation on an instance without a device plane.
    NoDevicePlane {
        /// The operation that needed one.
        operation: &'static str,
    },
    /// Arena configuration is invalid.
    InvalidConfig {
        /// Description of the problem.
        reason: String,
    },
}

impl MemoryError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::AlignmentViolation { .. } => ErrorKind::Alignment,
            _ => ErrorKind::Configuration,
        }
    }

    /// Missing bytes for an [`OutOfMemory`](Self::OutOfMemory) or
    /// [`InsufficientReuse`](Self::InsufficientReuse) error.
    pub fn shortfall(&self) -> Option<usize> {
        match self {
            Self::OutOfMemory {
                requested,
                available,
                ..
            }
            | Self::InsufficientReuse {
                required: requested,
                available,
                ..
            }
            | Self::LayoutExceedsAllocation {
                required: requested,
                available,
                ..
            } => Some(requested.saturating_sub(*available)),
            _ => None,
        }
    }

    /// Discipline of the failed placement, if the error comes from one.
    pub fn discipline(&self) -> Option<Discipline> {
        match self {
            Self::OutOfMemory { discipline, .. } => Some(*discipline),
            Self::InsufficientReuse { .. }
            | Self::InvalidReuseTarget { .. }
            | Self::ReuseTargetUnallocated { .. } => Some(Discipline::Reuse),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                resource,
                plane,
                discipline,
                requested,
                available,
            } => write!(
                f,
                "out of {plane} memory ({discipline}) for '{resource}': requested {requested} bytes, \
                 available {available} bytes, missing {}",
                requested.saturating_sub(*available)
            ),
            Self::InsufficientReuse {
                resource,
                target,
                required,
                available,
            } => write!(
                f,
                "insufficient reuse memory: '{resource}' needs {required} bytes, \
                 '{target}' holds {available}"
            ),
            Self::InvalidReuseTarget {
                resource,
                target,
                reason,
            } => write!(f, "invalid reuse target {target} for '{resource}': {reason}"),
            Self::ReuseTargetUnallocated { resource, target } => {
                write!(f, "reuse target '{target}' of '{resource}' has no storage")
            }
            Self::Unallocated { resource } => write!(f, "'{resource}' has no storage"),
            Self::DoubleAllocation { resource } => write!(f, "double allocation of '{resource}'"),
            Self::ArenaSealed { resource } => write!(
                f,
                "permanent resource '{resource}' allocated after the permanent boundary was sealed"
            ),
            Self::FrameTagMismatch { expected, found } => write!(
                f,
                "tag mismatch when popping non-persistent memory: pop {found} vs on stack {expected}"
            ),
            Self::EmptyFrameStack { tag } => {
                write!(f, "cannot pop frame {tag}: frame stack is empty")
            }
            Self::FramesOutstanding { depth } => {
                write!(f, "{depth} non-persistent frame(s) still pushed")
            }
            Self::AlignmentViolation {
                resource,
                plane,
                address,
                alignment,
            } => write!(
                f,
                "'{resource}' placed at {plane} address {address:#x}, not aligned to {alignment}"
            ),
            Self::InvalidLayout {
                resource,
                start,
                end,
            } => write!(
                f,
                "size-function of '{resource}' returned end {end:#x} before start {start:#x}"
            ),
            Self::InconsistentPlanes {
                resource,
                host,
                device,
            } => write!(
                f,
                "inconsistent allocation of '{resource}': host {host} bytes vs device {device} bytes"
            ),
            Self::LayoutExceedsAllocation {
                resource,
                plane,
                required,
                available,
            } => write!(
                f,
                "updated pointers of '{resource}' exceed {plane} allocation: {required} > {available}"
            ),
            Self::UnknownResource { id } => write!(f, "unknown resource: {id}"),
            Self::StaleHandle { resource, target } => write!(
                f,
                "stale reuse: '{resource}' refers to storage '{target}' has since released"
            ),
            Self::PoolUninitialized => write!(f, "memory pool uninitialized"),
            Self::StackBlocked => write!(f, "temporary memory stack already blocked"),
            Self::NoDevicePlane { operation } => {
                write!(f, "{operation} requires a device memory plane")
            }
            Self::InvalidConfig { reason } => write!(f, "invalid arena config: {reason}"),
        }
    }
}

impl Error for MemoryError {}
