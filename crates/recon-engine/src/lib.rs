//! Reconstruction instances for the Recon runtime.
//!
//! A [`Reconstruction`] pairs a compute [`Backend`] with a
//! [`MemoryManager`](recon_arena::MemoryManager). Masters own
//! secondaries that share their permanent memory, and may drive a
//! [`PipelineWorker`] that overlaps task execution with preparation of
//! the next unit.
//!
//! # Architecture
//!
//! ```text
//! BackendRegistry ──create──▶ Box<dyn Backend>
//!                                   │
//! ProcessingConfig ──resolve──▶ ResolvedConfig
//!                                   │
//!                     Reconstruction (master)
//!                     ├── MemoryManager ── owned pool
//!                     ├── Vec<Reconstruction> (secondaries, pool views)
//!                     └── PipelineWorker ◀── PipelineHandle (shared)
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
pub mod instance;
pub mod pipeline;

pub use backend::{Backend, BackendCtor, BackendError, BackendRegistry, CpuBackend};
pub use config::{
    ConfigError, DeviceSettings, ProcessingConfig, ResolvedConfig, StrategyPreference,
};
pub use instance::{InitError, InitPhase, Reconstruction};
pub use pipeline::{
    PipelineError, PipelineHandle, PipelineOp, PipelineWorker, SharedTask, WorkerReport,
    WorkerState,
};
