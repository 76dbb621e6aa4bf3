//! Dual-plane arena allocation for the Recon runtime.
//!
//! Each reconstruction instance owns a [`MemoryManager`]: a registry of
//! named resources plus one two-cursor arena per address space (host
//! and device). Processors register resources with size-functions; the
//! manager places them in two phases and releases them in bulk.
//!
//! # Architecture
//!
//! ```text
//! MemoryManager
//! ├── ResourceRegistry (ResourceId → MemoryResource, reuse groups)
//! ├── PlaneArena × 2 (host, optional device)
//! │   forward cursor ─▶          ◀─ stack cursor
//! │   [ permanent | transient ... free ... stack ]
//! ├── Backing (owned SharedPool, or a PoolView borrowed from a master)
//! ├── FrameStack (tagged stack-cursor snapshots)
//! └── VolatileRegion (single device scratch region)
//! ```
//!
//! # Disciplines
//!
//! - **Permanent:** forward-allocated once, then the boundary is sealed.
//! - **Transient:** forward-allocated above the boundary each unit, reset
//!   by [`MemoryManager::clear_allocated`].
//! - **Stack:** allocated downward and released by
//!   [`MemoryManager::pop_frame`].
//! - **Reuse:** aliases another resource's storage after checking the
//!   replayed layout fits.
//!
//! Addresses are offsets into the pool, never raw pointers.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod frame;
pub mod handle;
pub mod manager;
pub mod plane;
pub mod pool;
pub mod processor;
pub mod registry;
pub mod reuse;
pub mod usage;
pub mod volatile;

pub use config::{AllocationStrategy, ArenaConfig};
pub use error::{Discipline, ErrorKind, MemoryError};
pub use frame::{FrameStack, NonPersistentFrame};
pub use handle::{AliasOf, Placement, Region};
pub use manager::MemoryManager;
pub use plane::{PlaneArena, PlaneCursors};
pub use pool::{PoolStorage, PoolView, SharedPool};
pub use processor::Processor;
pub use registry::{MemoryRegistrar, MemoryResource, ResourceDef, ResourceRegistry, ReuseRequest};
pub use reuse::ReuseGroups;
pub use usage::{MemoryUsage, PlaneUsage, PoolRequirement, ResourceStatistics};
pub use volatile::VolatileRegion;
