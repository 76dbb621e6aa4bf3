//! Strongly-typed identifiers and the [`FrameTag`] type.

use std::fmt;

/// Identifies a registered memory resource.
///
/// Resources are registered before any memory exists and assigned
/// sequential IDs. `ResourceId(n)` is the n-th registered resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u16);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ResourceId {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

/// Identifies the processor that owns a set of resources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(pub u32);

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ProcessorId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Tag identifying one bracket of non-persistent memory.
///
/// Tags are up to eight ASCII characters packed big-endian into a `u64`,
/// so `FrameTag::from_name("TPCC")` prints back as `TPCC`. Pushing and
/// popping a frame must use the same tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameTag(pub u64);

impl FrameTag {
    /// Pack up to the first eight bytes of `name` into a tag.
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut value = 0u64;
        let mut i = 0;
        while i < bytes.len() && i < 8 {
            value = (value << 8) | bytes[i] as u64;
            i += 1;
        }
        Self(value)
    }
}

impl From<&str> for FrameTag {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

impl fmt::Display for FrameTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        let packed = &bytes[start..];
        if !packed.is_empty() && packed.iter().all(|b| b.is_ascii_graphic()) {
            for &b in packed {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_prints_its_name() {
        assert_eq!(FrameTag::from_name("TPCC").to_string(), "TPCC");
        assert_eq!(FrameTag::from("trk").to_string(), "trk");
    }

    #[test]
    fn tag_truncates_to_eight_bytes() {
        assert_eq!(
            FrameTag::from_name("ABCDEFGHIJ"),
            FrameTag::from_name("ABCDEFGH")
        );
    }

    #[test]
    fn non_ascii_tag_prints_hex() {
        assert_eq!(FrameTag(0x01).to_string(), "0x1");
        assert_eq!(FrameTag(0).to_string(), "0x0");
    }

    #[test]
    fn distinct_names_give_distinct_tags() {
        assert_ne!(FrameTag::from_name("clus"), FrameTag::from_name("trk"));
    }
}
