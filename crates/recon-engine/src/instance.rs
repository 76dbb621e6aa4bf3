//! Reconstruction instances and master/secondary replication.
//!
//! A master owns its secondaries. During [`init`](Reconstruction::init)
//! the master sizes one pool for everybody, places its permanent data,
//! and then lets each secondary stack its own permanent data on top
//! through a borrowed [`PoolView`](recon_arena::PoolView). Transient data
//! of every instance starts above the combined permanent boundary.
//!
//! ```text
//! 0                                                          end
//! [ master perm | sec 0 perm | sec 1 perm | transient ... stack ]
//!               ^ view 0     ^ view 1     ^ shared boundary
//! ```

use std::error::Error;
use std::fmt;
use std::sync::{Arc, PoisonError};

use recon_arena::{AllocationStrategy, MemoryError, MemoryManager, PoolRequirement, Processor};
use recon_core::{DeviceType, ProcessorId};
use smallvec::SmallVec;
use tracing::{debug, error, info};

use crate::backend::{Backend, BackendError, BackendRegistry};
use crate::config::{ConfigError, DeviceSettings, ProcessingConfig, ResolvedConfig};
use crate::pipeline::{
    PipelineError, PipelineHandle, PipelineOp, PipelineWorker, SharedTask, WorkerReport,
};

// ── Error types ────────────────────────────────────────────────────

/// Initialization stage, reported with secondary failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitPhase {
    /// Device context bring-up.
    Device,
    /// Permanent allocation.
    PermanentMemory,
    /// Boundary propagation and processor notification.
    AfterDevice,
}

impl fmt::Display for InitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Device => "device init",
            Self::PermanentMemory => "permanent memory",
            Self::AfterDevice => "after device init",
        };
        f.write_str(name)
    }
}

/// Errors from instance construction, initialization and teardown.
#[derive(Debug, PartialEq)]
pub enum InitError {
    /// Configuration could not be resolved.
    Config(ConfigError),
    /// Backend selection or device bring-up failed.
    Backend(BackendError),
    /// An allocation failed.
    Memory(MemoryError),
    /// A secondary was declared with a different device type.
    DeviceTypeMismatch {
        /// The master's device type.
        master: DeviceType,
        /// The secondary's declared device type.
        secondary: DeviceType,
    },
    /// A secondary was asked to create a secondary of its own.
    NestedSecondary,
    /// `init` was called on a secondary; only the master initializes.
    SecondaryNotAllowed,
    /// A secondary failed during initialization.
    Secondary {
        /// Index of the secondary.
        index: usize,
        /// Phase that failed.
        phase: InitPhase,
        /// The underlying failure.
        source: Box<InitError>,
    },
    /// The instance is already initialized.
    AlreadyInitialized,
    /// The instance is not initialized.
    NotInitialized,
    /// A processor's registration failed.
    Processor {
        /// The processor's name.
        name: String,
        /// The underlying failure.
        source: MemoryError,
    },
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Backend(e) => write!(f, "backend: {e}"),
            Self::Memory(e) => write!(f, "memory: {e}"),
            Self::DeviceTypeMismatch { master, secondary } => write!(
                f,
                "secondary device type {secondary} differs from master device type {master}"
            ),
            Self::NestedSecondary => write!(f, "a secondary cannot have secondaries"),
            Self::SecondaryNotAllowed => write!(f, "only the master may be initialized"),
            Self::Secondary {
                index,
                phase,
                source,
            } => write!(f, "secondary {index} failed ({phase}): {source}"),
            Self::AlreadyInitialized => write!(f, "instance already initialized"),
            Self::NotInitialized => write!(f, "instance not initialized"),
            Self::Processor { name, source } => {
                write!(f, "processor '{name}' registration failed: {source}")
            }
        }
    }
}

impl Error for InitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Backend(e) => Some(e),
            Self::Memory(e) => Some(e),
            Self::Secondary { source, .. } => Some(source.as_ref()),
            Self::Processor { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for InitError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<BackendError> for InitError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

impl From<MemoryError> for InitError {
    fn from(e: MemoryError) -> Self {
        Self::Memory(e)
    }
}

// ── Reconstruction ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Master,
    Secondary,
}

/// One processing instance driving one physical device.
pub struct Reconstruction {
    settings: ProcessingConfig,
    config: ResolvedConfig,
    backend: Box<dyn Backend>,
    memory: MemoryManager,
    processors: SmallVec<[Box<dyn Processor>; 8]>,
    secondaries: Vec<Reconstruction>,
    role: Role,
    task: Option<SharedTask>,
    worker: Option<PipelineWorker>,
    pipeline: Option<PipelineHandle>,
    streams: usize,
    pool_sizes: (usize, usize),
    device_ready: bool,
    initialized: bool,
}

impl fmt::Debug for Reconstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconstruction")
            .field("device", &self.device_type())
            .field("role", &self.role)
            .field("secondaries", &self.secondaries.len())
            .field("processors", &self.processors.len())
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl Reconstruction {
    /// Create a master instance on the backend `device` selects.
    pub fn new(
        registry: &BackendRegistry,
        device: DeviceSettings,
        settings: ProcessingConfig,
    ) -> Result<Self, InitError> {
        let backend = registry.create(&device)?;
        Self::with_backend(backend, settings, Role::Master)
    }

    fn with_backend(
        backend: Box<dyn Backend>,
        settings: ProcessingConfig,
        role: Role,
    ) -> Result<Self, InitError> {
        let device = backend.device_type();
        let config = settings.resolve(device)?;
        let memory = MemoryManager::new(config.arena.clone(), backend.is_accelerator())?;
        info!(
            %device,
            secondary = role == Role::Secondary,
            strategy = ?config.arena.strategy,
            "created reconstruction instance"
        );
        Ok(Self {
            settings,
            streams: config.streams,
            config,
            backend,
            memory,
            processors: SmallVec::new(),
            secondaries: Vec::new(),
            role,
            task: None,
            worker: None,
            pipeline: None,
            pool_sizes: (0, 0),
            device_ready: false,
            initialized: false,
        })
    }

    /// Create a secondary sharing this instance's permanent memory.
    ///
    /// The secondary inherits this instance's processing settings and
    /// must use the same device type. Returns its index.
    pub fn create_secondary(
        &mut self,
        registry: &BackendRegistry,
        device: DeviceSettings,
    ) -> Result<usize, InitError> {
        if self.role == Role::Secondary {
            return Err(InitError::NestedSecondary);
        }
        if self.initialized {
            return Err(InitError::AlreadyInitialized);
        }
        let master = self.device_type();
        if device.device_type != master {
            return Err(InitError::DeviceTypeMismatch {
                master,
                secondary: device.device_type,
            });
        }
        let backend = registry.create(&DeviceSettings::forced(master))?;
        let secondary = Self::with_backend(backend, self.settings.clone(), Role::Secondary)?;
        self.secondaries.push(secondary);
        Ok(self.secondaries.len() - 1)
    }

    // ── Accessors ──────────────────────────────────────────────

    /// Device type of the backend in use.
    pub fn device_type(&self) -> DeviceType {
        self.backend.device_type()
    }

    /// Resolved configuration.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Whether this instance is a master.
    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    /// Whether [`init`](Self::init) has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Stream count after aggregation over master and secondaries.
    pub fn streams(&self) -> usize {
        self.streams
    }

    /// `(host, device)` pool sizes in bytes chosen at init.
    pub fn pool_sizes(&self) -> (usize, usize) {
        self.pool_sizes
    }

    /// The instance's memory manager.
    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Mutable access to the memory manager.
    pub fn memory_mut(&mut self) -> &mut MemoryManager {
        &mut self.memory
    }

    /// Secondaries, in creation order.
    pub fn secondaries(&self) -> &[Reconstruction] {
        &self.secondaries
    }

    /// Secondary `index`.
    pub fn secondary_mut(&mut self, index: usize) -> Option<&mut Reconstruction> {
        self.secondaries.get_mut(index)
    }

    /// Processor `id`.
    pub fn processor(&self, id: ProcessorId) -> Option<&dyn Processor> {
        let index = usize::try_from(id.0).ok()?;
        self.processors.get(index).map(|p| p.as_ref())
    }

    // ── Registration ───────────────────────────────────────────

    /// Add a processor and let it register its resources.
    pub fn register_processor(
        &mut self,
        mut processor: Box<dyn Processor>,
    ) -> Result<ProcessorId, InitError> {
        if self.initialized {
            return Err(InitError::AlreadyInitialized);
        }
        let raw = u32::try_from(self.processors.len()).map_err(|_| InitError::Processor {
            name: processor.name().to_string(),
            source: MemoryError::InvalidConfig {
                reason: "too many processors".into(),
            },
        })?;
        let id = ProcessorId(raw);
        self.memory
            .register_processor(id, processor.as_mut())
            .map_err(|source| InitError::Processor {
                name: processor.name().to_string(),
                source,
            })?;
        self.processors.push(processor);
        Ok(id)
    }

    /// Set the task run by [`enqueue_pipeline`](Self::enqueue_pipeline).
    pub fn set_task(&mut self, task: SharedTask) {
        self.task = Some(task);
    }

    // ── Initialization ─────────────────────────────────────────

    /// Initialize this master and all its secondaries.
    ///
    /// On failure every instance's memory is released, every device
    /// context that came up is shut down again, and the instance stays
    /// uninitialized.
    pub fn init(&mut self) -> Result<(), InitError> {
        if self.role == Role::Secondary {
            return Err(InitError::SecondaryNotAllowed);
        }
        if self.initialized {
            return Err(InitError::AlreadyInitialized);
        }
        let result = self.init_all();
        if result.is_err() {
            for s in &mut self.secondaries {
                s.memory.release_all();
                s.shut_down_device();
                s.initialized = false;
            }
            self.memory.release_all();
            self.shut_down_device();
        }
        result
    }

    fn init_all(&mut self) -> Result<(), InitError> {
        let global = self.config.arena.strategy == AllocationStrategy::Global;
        let alignment = self.config.arena.alignment;

        // Sizing: permanent data of every instance stacks up, transient
        // ranges overlap.
        let mut requirements: SmallVec<[PoolRequirement; 4]> = SmallVec::new();
        requirements.push(self.memory.required_pool_sizes());
        for s in &mut self.secondaries {
            requirements.push(s.memory.required_pool_sizes());
            self.streams = self.streams.max(s.streams);
        }
        let (host, device) = self.pool_sizes_for(&requirements, alignment);
        self.pool_sizes = (host, device);

        self.backend.init_device(self.streams)?;
        self.device_ready = true;
        if global {
            self.memory.install_pool(host, device)?;
        }
        self.memory.allocate_permanent()?;

        let streams = self.streams;
        for (index, s) in self.secondaries.iter_mut().enumerate() {
            let fail = |phase, e: InitError| {
                error!(index, %phase, error = %e, "secondary initialization failed");
                InitError::Secondary {
                    index,
                    phase,
                    source: Box::new(e),
                }
            };
            s.streams = streams;
            s.pool_sizes = (host, device);
            s.backend
                .init_device(streams)
                .map_err(|e| fail(InitPhase::Device, e.into()))?;
            s.device_ready = true;
            if global {
                let view = self.memory.share_view()?;
                s.memory
                    .install_view(view)
                    .map_err(|e| fail(InitPhase::PermanentMemory, e.into()))?;
            }
            s.memory
                .allocate_permanent()
                .map_err(|e| fail(InitPhase::PermanentMemory, e.into()))?;
            if global {
                self.memory.extend_permanent(s.memory.permanent_boundaries())?;
            }
        }

        self.memory.clear_allocated(true);
        self.notify_processors();
        self.initialized = true;

        let boundary = self.memory.permanent_boundaries();
        for (index, s) in self.secondaries.iter_mut().enumerate() {
            let after = |e: MemoryError| {
                error!(index, error = %e, "secondary initialization failed");
                InitError::Secondary {
                    index,
                    phase: InitPhase::AfterDevice,
                    source: Box::new(e.into()),
                }
            };
            if global {
                s.memory.extend_permanent(boundary).map_err(after)?;
            }
            s.memory.clear_allocated(true);
            s.notify_processors();
            s.initialized = true;
        }
        debug!(
            host,
            device,
            streams = self.streams,
            secondaries = self.secondaries.len(),
            "initialized"
        );
        Ok(())
    }

    fn pool_sizes_for(&self, requirements: &[PoolRequirement], alignment: usize) -> (usize, usize) {
        let derive = |permanent: fn(&PoolRequirement) -> usize,
                      transient: fn(&PoolRequirement) -> usize| {
            let stacked: usize = requirements.iter().map(permanent).sum();
            let shared = requirements.iter().map(transient).max().unwrap_or(0);
            (stacked + shared).max(alignment)
        };
        let host = match self.config.host_pool_size {
            0 => derive(|r| r.permanent_host, PoolRequirement::transient_host),
            n => n,
        };
        let device = match (self.backend.is_accelerator(), self.config.device_pool_size) {
            (false, _) => 0,
            (true, 0) => derive(|r| r.permanent_device, PoolRequirement::transient_device),
            (true, n) => n,
        };
        (host, device)
    }

    fn shut_down_device(&mut self) {
        if self.device_ready {
            self.backend.exit_device();
            self.device_ready = false;
        }
    }

    fn notify_processors(&mut self) {
        for (index, p) in self.processors.iter_mut().enumerate() {
            if let Ok(raw) = u32::try_from(index) {
                self.memory.notify_processor(ProcessorId(raw), p.as_mut());
            }
        }
    }

    // ── Processing units ───────────────────────────────────────

    /// Place the transient resources of `owner` (or of every processor)
    /// and tell the processors their addresses.
    pub fn allocate_registered(&mut self, owner: Option<ProcessorId>) -> Result<(), MemoryError> {
        self.memory.allocate_transient(owner)?;
        self.notify_processors();
        Ok(())
    }

    /// Release transient memory of the last unit.
    pub fn clear_allocated(&mut self, clear_outputs: bool) {
        self.memory.clear_allocated(clear_outputs);
    }

    /// Log plane usage at `info` and per-resource sizes at `debug`.
    pub fn log_memory_statistics(&self) {
        info!(device = %self.device_type(), usage = %self.memory.usage_report(), "memory usage");
        for stat in self.memory.resource_statistics() {
            debug!(
                resource = %stat.name,
                owner = %stat.owner,
                memory_type = %stat.memory_type,
                size = stat.size,
                allocated = stat.allocated,
                "resource"
            );
        }
    }

    // ── Pipeline ───────────────────────────────────────────────

    /// Spawn the pipeline worker and hand its handle to every secondary.
    pub fn start_pipeline(&mut self) -> Result<PipelineHandle, PipelineError> {
        let reason = if !self.initialized {
            Some("instance not initialized")
        } else if !self.config.double_pipeline {
            Some("double pipeline disabled")
        } else if self.role == Role::Secondary {
            Some("worker runs on the master")
        } else if self.secondaries.is_empty() {
            Some("master has no secondaries")
        } else if self.worker.is_some() {
            Some("worker already started")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(PipelineError::NotEnabled { reason });
        }
        let name = format!("recon-pipeline-{}", self.device_type().name().to_lowercase());
        let worker = PipelineWorker::spawn(&name, self.config.logs_worker())?;
        let handle = worker.handle();
        for s in &mut self.secondaries {
            s.pipeline = Some(handle.clone());
        }
        self.pipeline = Some(handle.clone());
        self.worker = Some(worker);
        Ok(handle)
    }

    /// Run this instance's task on the pipeline worker.
    ///
    /// Clears all transient memory first, blocks until the task has run,
    /// then returns its status, or the status of
    /// [`finalize_pipelined`](recon_core::Task::finalize_pipelined) if
    /// the run succeeded.
    pub fn enqueue_pipeline(&mut self) -> Result<i32, PipelineError> {
        let handle = self.pipeline.clone().ok_or(PipelineError::NotEnabled {
            reason: "no pipeline worker",
        })?;
        let task = self.task.clone().ok_or(PipelineError::NotEnabled {
            reason: "no task set",
        })?;
        if !self.memory.frames().is_empty() {
            return Err(MemoryError::FramesOutstanding {
                depth: self.memory.frames().depth(),
            }
            .into());
        }
        self.memory.clear_allocated(true);
        let status = handle.run(Arc::clone(&task))?;
        if status != 0 {
            return Ok(status);
        }
        let finalized = task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finalize_pipelined();
        Ok(finalized)
    }

    /// Send the terminate item and, on the master, join the worker.
    ///
    /// Later enqueues from any instance sharing the worker fail with
    /// [`PipelineError::TerminationRequested`]. Returns the worker report
    /// when this call joined the thread.
    pub fn terminate_pipeline(&mut self) -> Result<Option<WorkerReport>, PipelineError> {
        let handle = self.pipeline.clone().ok_or(PipelineError::NotEnabled {
            reason: "no pipeline worker",
        })?;
        self.memory.clear_allocated(true);
        handle.enqueue(PipelineOp::Terminate)?;
        Ok(self.join_worker())
    }

    fn join_worker(&mut self) -> Option<WorkerReport> {
        let mut worker = self.worker.take()?;
        let report = worker.terminate();
        debug!(executed = report.executed, joined = report.joined, "pipeline worker joined");
        Some(report)
    }

    /// Whether a task is queued on the shared worker but not started.
    pub fn pipeline_pending(&self) -> bool {
        self.pipeline.as_ref().is_some_and(PipelineHandle::pending)
    }

    // ── Teardown ───────────────────────────────────────────────

    /// Exit secondaries, join the worker, release all memory and shut
    /// the device down.
    pub fn exit(&mut self) -> Result<(), InitError> {
        if !self.initialized {
            return Err(InitError::NotInitialized);
        }
        for (index, s) in self.secondaries.iter_mut().enumerate() {
            if let Err(e) = s.exit() {
                error!(index, error = %e, "secondary exit failed");
            }
        }
        self.join_worker();
        self.pipeline = None;
        self.memory.release_all();
        self.shut_down_device();
        self.initialized = false;
        Ok(())
    }
}

impl Drop for Reconstruction {
    fn drop(&mut self) {
        if self.initialized {
            error!(device = %self.device_type(), "reconstruction dropped without exit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyPreference;
    use recon_arena::{MemoryRegistrar, ResourceDef};
    use recon_core::{MemoryType, Plane};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tables {
        bytes: usize,
        scratch: usize,
    }

    impl Processor for Tables {
        fn name(&self) -> &str {
            "tables"
        }

        fn register_memory(
            &mut self,
            owner: ProcessorId,
            registrar: &mut dyn MemoryRegistrar,
        ) -> Result<(), MemoryError> {
            registrar.register(
                owner,
                ResourceDef::fixed("tables", MemoryType::HOST | MemoryType::PERMANENT, self.bytes),
            )?;
            registrar.register(owner, ResourceDef::fixed("scratch", MemoryType::HOST, self.scratch))?;
            Ok(())
        }
    }

    fn global() -> ProcessingConfig {
        ProcessingConfig {
            strategy: StrategyPreference::Global,
            alignment: 16,
            ..ProcessingConfig::default()
        }
    }

    fn cpu_master(settings: ProcessingConfig) -> Reconstruction {
        Reconstruction::new(&BackendRegistry::with_defaults(), DeviceSettings::default(), settings)
            .unwrap()
    }

    #[test]
    fn single_instance_lifecycle() {
        let mut rec = cpu_master(global());
        let id = rec
            .register_processor(Box::new(Tables { bytes: 100, scratch: 40 }))
            .unwrap();
        assert_eq!(rec.processor(id).unwrap().name(), "tables");
        rec.init().unwrap();
        assert!(rec.is_initialized());
        assert_eq!(rec.pool_sizes(), (160, 0));
        assert_eq!(rec.memory().host_arena().permanent_boundary(), 100);
        rec.allocate_registered(None).unwrap();
        rec.log_memory_statistics();
        rec.exit().unwrap();
        assert!(!rec.is_initialized());
        assert!(!rec.memory().is_pool_installed());
        assert_eq!(rec.exit(), Err(InitError::NotInitialized));
    }

    #[test]
    fn init_twice_rejected() {
        let mut rec = cpu_master(global());
        rec.init().unwrap();
        assert_eq!(rec.init(), Err(InitError::AlreadyInitialized));
        assert!(matches!(
            rec.register_processor(Box::new(Tables { bytes: 1, scratch: 1 })),
            Err(InitError::AlreadyInitialized)
        ));
        rec.exit().unwrap();
    }

    #[test]
    fn secondaries_stack_permanent_data() {
        let registry = BackendRegistry::with_defaults();
        let mut master = cpu_master(global());
        master
            .register_processor(Box::new(Tables { bytes: 256, scratch: 64 }))
            .unwrap();
        let index = master.create_secondary(&registry, DeviceSettings::default()).unwrap();
        let secondary = master.secondary_mut(index).unwrap();
        assert!(!secondary.is_master());
        secondary
            .register_processor(Box::new(Tables { bytes: 128, scratch: 64 }))
            .unwrap();

        master.init().unwrap();
        assert_eq!(master.pool_sizes(), (256 + 128 + 64, 0));
        assert_eq!(master.memory().host_arena().permanent_boundary(), 384);
        let s = &master.secondaries()[0];
        assert!(s.is_initialized());
        assert_eq!(s.memory().host_arena().permanent_boundary(), 384);
        assert_eq!(s.memory().host_arena().base(), 256);

        let secondary = master.secondary_mut(0).unwrap();
        secondary.allocate_registered(None).unwrap();
        let scratch = secondary.memory().registry().ids()[1];
        let p = secondary.memory().placement(scratch, Plane::Host).unwrap().unwrap();
        assert_eq!(p.address(), 384);
        master.exit().unwrap();
        assert!(!master.secondaries()[0].is_initialized());
    }

    #[test]
    fn secondary_contract() {
        let registry = BackendRegistry::with_defaults();
        let mut master = cpu_master(global());
        assert_eq!(
            master.create_secondary(&registry, DeviceSettings::new(DeviceType::Cuda)),
            Err(InitError::DeviceTypeMismatch {
                master: DeviceType::Cpu,
                secondary: DeviceType::Cuda,
            })
        );
        assert!(master.secondaries().is_empty());
        let index = master.create_secondary(&registry, DeviceSettings::default()).unwrap();
        let secondary = master.secondary_mut(index).unwrap();
        assert_eq!(
            secondary.create_secondary(&registry, DeviceSettings::default()),
            Err(InitError::NestedSecondary)
        );
        assert_eq!(secondary.init(), Err(InitError::SecondaryNotAllowed));
    }

    #[test]
    fn secondary_permanent_failure_aborts_init() {
        let registry = BackendRegistry::with_defaults();
        let mut master = cpu_master(ProcessingConfig {
            host_pool_size: 1024,
            ..global()
        });
        master
            .register_processor(Box::new(Tables { bytes: 800, scratch: 16 }))
            .unwrap();
        master.create_secondary(&registry, DeviceSettings::default()).unwrap();
        master
            .secondary_mut(0)
            .unwrap()
            .register_processor(Box::new(Tables { bytes: 400, scratch: 16 }))
            .unwrap();

        let err = master.init().unwrap_err();
        match &err {
            InitError::Secondary { index, phase, source } => {
                assert_eq!((*index, *phase), (0, InitPhase::PermanentMemory));
                assert!(matches!(**source, InitError::Memory(MemoryError::OutOfMemory { .. })));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.source().is_some());
        assert!(!master.is_initialized());
        assert!(!master.memory().is_pool_installed());
    }

    #[derive(Default)]
    struct DeviceCounters {
        inits: AtomicUsize,
        exits: AtomicUsize,
    }

    struct CountingDevice {
        counters: Arc<DeviceCounters>,
        fail_init: bool,
    }

    impl Backend for CountingDevice {
        fn device_type(&self) -> DeviceType {
            DeviceType::Cuda
        }

        fn init_device(&mut self, _streams: usize) -> Result<(), BackendError> {
            if self.fail_init {
                return Err(BackendError::Unavailable {
                    device: DeviceType::Cuda,
                    reason: "no context".into(),
                });
            }
            self.counters.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn exit_device(&mut self) {
            self.counters.exits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_instance(counters: &Arc<DeviceCounters>, fail_init: bool, role: Role) -> Reconstruction {
        let backend = Box::new(CountingDevice {
            counters: Arc::clone(counters),
            fail_init,
        });
        Reconstruction::with_backend(backend, ProcessingConfig::default(), role).unwrap()
    }

    #[test]
    fn failed_init_shuts_down_started_devices() {
        let counters = Arc::new(DeviceCounters::default());
        let mut master = counting_instance(&counters, false, Role::Master);
        master
            .secondaries
            .push(counting_instance(&counters, false, Role::Secondary));
        master
            .secondaries
            .push(counting_instance(&counters, true, Role::Secondary));

        let err = master.init().unwrap_err();
        assert!(matches!(
            err,
            InitError::Secondary { index: 1, phase: InitPhase::Device, .. }
        ));
        assert_eq!(counters.inits.load(Ordering::SeqCst), 2);
        assert_eq!(counters.exits.load(Ordering::SeqCst), 2);
        assert_eq!(master.exit(), Err(InitError::NotInitialized));

        // A later successful init is torn down exactly once per device.
        master.secondaries.pop();
        master.init().unwrap();
        master.exit().unwrap();
        assert_eq!(counters.inits.load(Ordering::SeqCst), 4);
        assert_eq!(counters.exits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn individual_strategy_has_no_pool() {
        let mut rec = cpu_master(ProcessingConfig::default());
        assert_eq!(rec.config().arena.strategy, AllocationStrategy::Individual);
        rec.register_processor(Box::new(Tables { bytes: 64, scratch: 32 }))
            .unwrap();
        rec.init().unwrap();
        rec.allocate_registered(None).unwrap();
        assert!(!rec.memory().is_pool_installed());
        assert_eq!(rec.memory().usage_report().individual, 96);
        rec.exit().unwrap();
    }

    #[test]
    fn pipeline_needs_accelerator_setup() {
        let mut rec = cpu_master(global());
        rec.init().unwrap();
        assert!(matches!(
            rec.start_pipeline(),
            Err(PipelineError::NotEnabled { .. })
        ));
        assert!(matches!(
            rec.enqueue_pipeline(),
            Err(PipelineError::NotEnabled { reason: "no pipeline worker" })
        ));
        assert!(!rec.pipeline_pending());
        rec.exit().unwrap();
    }
}
