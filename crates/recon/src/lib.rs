//! Recon: dual-plane arena memory and pipelined execution for
//! multi-device reconstruction.
//!
//! This is the facade crate that re-exports the public API of the Recon
//! sub-crates. Adding `recon` as a single dependency is enough for most
//! users.
//!
//! # Quick start
//!
//! ```rust
//! use recon::prelude::*;
//!
//! struct Clusterer;
//! impl Processor for Clusterer {
//!     fn name(&self) -> &str { "clusterer" }
//!     fn register_memory(
//!         &mut self,
//!         owner: ProcessorId,
//!         registrar: &mut dyn MemoryRegistrar,
//!     ) -> Result<(), MemoryError> {
//!         registrar.register(owner, ResourceDef::fixed("geometry", MemoryType::HOST | MemoryType::PERMANENT, 100))?;
//!         registrar.register(owner, ResourceDef::fixed("clusters", MemoryType::HOST, 400))?;
//!         Ok(())
//!     }
//! }
//!
//! let backends = BackendRegistry::with_defaults();
//! let config = ProcessingConfig {
//!     strategy: StrategyPreference::Global,
//!     ..ProcessingConfig::default()
//! };
//! let mut rec = Reconstruction::new(&backends, DeviceSettings::default(), config).unwrap();
//! rec.register_processor(Box::new(Clusterer)).unwrap();
//! rec.init().unwrap();
//!
//! rec.allocate_registered(None).unwrap();
//! let usage = rec.memory().usage_report();
//! assert!(usage.host.used >= 500);
//! rec.clear_allocated(true);
//! rec.exit().unwrap();
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `recon-core` | Ids, memory type flags, device types, `Task` |
//! | [`arena`] | `recon-arena` | `MemoryManager`, registry, planes, frames |
//! | [`engine`] | `recon-engine` | Instances, backends, pipeline worker |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core ids, flags and collaborator traits (`recon-core`).
pub use recon_core as types;

/// Arena allocation (`recon-arena`).
///
/// [`arena::MemoryManager`] is the entry point; it is also reachable
/// through [`engine::Reconstruction::memory`].
pub use recon_arena as arena;

/// Instances, backend selection and pipelining (`recon-engine`).
pub use recon_engine as engine;

/// Common imports for typical Recon usage.
///
/// ```rust
/// use recon::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use recon_core::{DeviceType, FrameTag, LayoutCursor, MemoryType, Plane, ProcessorId, ResourceId, Task};

    // Arena
    pub use recon_arena::{
        MemoryError, MemoryManager, MemoryRegistrar, MemoryUsage, Processor, ResourceDef,
    };

    // Engine
    pub use recon_engine::{
        Backend, BackendRegistry, DeviceSettings, InitError, PipelineError, PipelineHandle,
        ProcessingConfig, Reconstruction, SharedTask, StrategyPreference,
    };
}
