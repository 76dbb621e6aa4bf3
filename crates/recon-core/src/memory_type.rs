//! Memory type flags and the host/device [`Plane`] selector.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Set of flags describing where and how a resource is allocated.
    ///
    /// Flags combine with `|`. A resource without `HOST` or `DEVICE` never
    /// receives storage of its own.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MemoryType: u16 {
        /// Storage in the host plane.
        const HOST = 1 << 0;
        /// Storage in the device plane.
        const DEVICE = 1 << 1;
        /// Allocated once in the permanent phase and never reclaimed.
        const PERMANENT = 1 << 2;
        /// Allocated downward from the stack cursor, released by frame pops.
        const STACK = 1 << 3;
        /// Storage is provided by the caller; the arena never allocates it.
        const EXTERNAL = 1 << 4;
        /// Skipped by bulk allocation; allocated only on explicit request.
        const CUSTOM = 1 << 5;
        /// Survives a transient clear unless outputs are cleared too.
        const OUTPUT = 1 << 6;
        /// Storage in both planes.
        const INOUT = Self::HOST.bits() | Self::DEVICE.bits();
        /// Device-side stacked scratch memory.
        const SCRATCH = Self::DEVICE.bits() | Self::STACK.bits();
    }
}

impl MemoryType {
    /// No flags.
    pub const NONE: Self = Self::empty();

    const NAMES: [(Self, &'static str); 7] = [
        (Self::HOST, "host"),
        (Self::DEVICE, "device"),
        (Self::PERMANENT, "permanent"),
        (Self::STACK, "stack"),
        (Self::EXTERNAL, "external"),
        (Self::CUSTOM, "custom"),
        (Self::OUTPUT, "output"),
    ];

    /// Whether this resource wants storage in `plane`.
    pub const fn in_plane(self, plane: Plane) -> bool {
        match plane {
            Plane::Host => self.contains(Self::HOST),
            Plane::Device => self.contains(Self::DEVICE),
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// One of the two independent address spaces managed by an arena pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Plane {
    /// Host (CPU) memory.
    Host,
    /// Accelerator device memory.
    Device,
}

impl Plane {
    /// Both planes, host first.
    pub const ALL: [Plane; 2] = [Plane::Host, Plane::Device];
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Device => write!(f, "device"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_flags_contain_parts() {
        let t = MemoryType::HOST | MemoryType::PERMANENT;
        assert!(t.contains(MemoryType::HOST));
        assert!(t.contains(MemoryType::PERMANENT));
        assert!(!t.contains(MemoryType::DEVICE));
        assert!(!t.contains(MemoryType::INOUT));
        assert!(t.intersects(MemoryType::INOUT));
    }

    #[test]
    fn difference_clears_flags() {
        let t = MemoryType::SCRATCH.difference(MemoryType::STACK);
        assert_eq!(t, MemoryType::DEVICE);
    }

    #[test]
    fn in_plane_follows_flags() {
        assert!(MemoryType::INOUT.in_plane(Plane::Host));
        assert!(MemoryType::INOUT.in_plane(Plane::Device));
        assert!(!MemoryType::HOST.in_plane(Plane::Device));
    }

    #[test]
    fn display_lists_flags() {
        assert_eq!(MemoryType::SCRATCH.to_string(), "device|stack");
        assert_eq!(MemoryType::NONE.to_string(), "none");
    }

    #[test]
    fn composites_are_unions() {
        assert_eq!(MemoryType::INOUT, MemoryType::HOST | MemoryType::DEVICE);
        assert_eq!(MemoryType::SCRATCH.bits(), 0b1010);
        let mut t = MemoryType::DEVICE;
        t |= MemoryType::OUTPUT;
        assert_eq!(t.to_string(), "device|output");
    }
}
