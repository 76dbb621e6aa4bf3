//! Core types and traits for the Recon memory and pipeline runtime.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the identifiers, memory type flags, device types, size-function helpers
//! and the task trait shared by the arena and engine crates.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod device;
pub mod id;
pub mod layout;
pub mod memory_type;
pub mod traits;

pub use device::{DeviceType, ParseDeviceTypeError};
pub use id::{FrameTag, ProcessorId, ResourceId};
pub use layout::{align_up, padding_for, LayoutCursor, LayoutFn, PROBE_ADDRESS};
pub use memory_type::{MemoryType, Plane};
pub use traits::Task;
