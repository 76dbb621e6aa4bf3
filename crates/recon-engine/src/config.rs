//! Processing configuration, resolution against a backend, and error types.
//!
//! [`ProcessingConfig`] is what the caller fills in. [`resolve()`](ProcessingConfig::resolve)
//! turns it into a [`ResolvedConfig`] once the backend is known, because
//! several defaults depend on whether the backend has a device plane.

use std::error::Error;
use std::fmt;

use recon_arena::{AllocationStrategy, ArenaConfig, MemoryError};
use recon_core::DeviceType;

/// Pool overrides at or above this size force the global strategy.
pub const FORCE_GLOBAL_THRESHOLD: usize = 1024;

/// Minimum stream count on an accelerator backend.
pub const MIN_ACCELERATOR_STREAMS: usize = 3;

// ── StrategyPreference ─────────────────────────────────────────────

/// Requested allocation strategy, before resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StrategyPreference {
    /// Global on an accelerator, individual on the host backend.
    #[default]
    Auto,
    /// One pool per plane.
    Global,
    /// One heap buffer per resource.
    Individual,
}

// ── DeviceSettings ─────────────────────────────────────────────────

/// Backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Requested backend.
    pub device_type: DeviceType,
    /// Fail instead of falling back to the host backend when
    /// `device_type` is unavailable.
    pub force_device_type: bool,
}

impl DeviceSettings {
    /// Request `device_type`, allowing fallback.
    pub fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            force_device_type: false,
        }
    }

    /// Request `device_type` and refuse fallback.
    pub fn forced(device_type: DeviceType) -> Self {
        Self {
            device_type,
            force_device_type: true,
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self::new(DeviceType::Cpu)
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected while resolving a [`ProcessingConfig`].
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// Arena-level configuration is invalid.
    Arena(MemoryError),
    /// An explicit pool size is smaller than one aligned allocation.
    PoolTooSmall {
        /// Which pool: `"host"` or `"device"`.
        pool: &'static str,
        /// Configured size.
        size: usize,
        /// Configured alignment.
        alignment: usize,
    },
    /// The individual strategy was requested for an accelerator backend.
    IndividualOnAccelerator {
        /// The accelerator.
        device: DeviceType,
    },
    /// Double pipelining needs an accelerator and the global strategy.
    DoublePipelineUnsupported {
        /// Description of the unmet requirement.
        reason: &'static str,
    },
    /// Stream count of zero.
    NoStreams,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arena(e) => write!(f, "arena: {e}"),
            Self::PoolTooSmall {
                pool,
                size,
                alignment,
            } => write!(
                f,
                "{pool} pool size {size} is smaller than the alignment {alignment}"
            ),
            Self::IndividualOnAccelerator { device } => {
                write!(f, "individual allocation is host-only, backend is {device}")
            }
            Self::DoublePipelineUnsupported { reason } => {
                write!(f, "double pipeline unsupported: {reason}")
            }
            Self::NoStreams => write!(f, "streams must be at least 1"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Arena(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MemoryError> for ConfigError {
    fn from(e: MemoryError) -> Self {
        Self::Arena(e)
    }
}

// ── ProcessingConfig ───────────────────────────────────────────────

/// Caller-facing processing settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessingConfig {
    /// Explicit host pool size in bytes. `0` derives it from the
    /// registered resources.
    pub host_pool_size: usize,
    /// Explicit device pool size in bytes. `0` derives it from the
    /// registered resources. On the host backend this also sizes the
    /// host pool unless `host_pool_size` is set.
    pub device_pool_size: usize,
    /// Allocation strategy. Default: [`StrategyPreference::Auto`].
    pub strategy: StrategyPreference,
    /// Allocation alignment in bytes. Default: 64.
    pub alignment: usize,
    /// General diagnostics level. `>= 3` logs worker lifecycle and frame
    /// usage; `>= 5` implies `alloc_debug_level >= 2`.
    pub debug_level: u8,
    /// Allocation diagnostics level. `>= 2` logs every allocation.
    pub alloc_debug_level: u8,
    /// Run accelerator tasks on a background pipeline worker.
    pub double_pipeline: bool,
    /// Requested stream count. Default: 8.
    pub streams: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            host_pool_size: 0,
            device_pool_size: 0,
            strategy: StrategyPreference::Auto,
            alignment: ArenaConfig::DEFAULT_ALIGNMENT,
            debug_level: 0,
            alloc_debug_level: 0,
            double_pipeline: false,
            streams: 8,
        }
    }
}

impl ProcessingConfig {
    /// Resolve every derived setting for a backend of type `device`.
    pub fn resolve(&self, device: DeviceType) -> Result<ResolvedConfig, ConfigError> {
        let accelerator = device.is_accelerator();
        if self.streams == 0 {
            return Err(ConfigError::NoStreams);
        }

        let forced_global = self.host_pool_size >= FORCE_GLOBAL_THRESHOLD
            || self.device_pool_size >= FORCE_GLOBAL_THRESHOLD;
        let strategy = match self.strategy {
            _ if forced_global => AllocationStrategy::Global,
            StrategyPreference::Global => AllocationStrategy::Global,
            StrategyPreference::Individual => AllocationStrategy::Individual,
            StrategyPreference::Auto if accelerator => AllocationStrategy::Global,
            StrategyPreference::Auto => AllocationStrategy::Individual,
        };
        if accelerator && strategy == AllocationStrategy::Individual {
            return Err(ConfigError::IndividualOnAccelerator { device });
        }

        let (mut host_pool, mut device_pool) = match strategy {
            AllocationStrategy::Global => (self.host_pool_size, self.device_pool_size),
            AllocationStrategy::Individual => (0, 0),
        };
        if !accelerator && host_pool == 0 {
            host_pool = device_pool;
        }
        if !accelerator {
            device_pool = 0;
        }
        for (pool, size) in [("host", host_pool), ("device", device_pool)] {
            if size != 0 && size < self.alignment {
                return Err(ConfigError::PoolTooSmall {
                    pool,
                    size,
                    alignment: self.alignment,
                });
            }
        }

        if self.double_pipeline {
            if !accelerator {
                return Err(ConfigError::DoublePipelineUnsupported {
                    reason: "requires an accelerator backend",
                });
            }
            if strategy != AllocationStrategy::Global {
                return Err(ConfigError::DoublePipelineUnsupported {
                    reason: "requires the global allocation strategy",
                });
            }
        }

        let alloc_debug_level = if self.debug_level >= 5 {
            self.alloc_debug_level.max(2)
        } else {
            self.alloc_debug_level
        };
        let arena = ArenaConfig {
            alignment: self.alignment,
            strategy,
            alloc_debug_level,
            debug_level: self.debug_level,
        };
        arena.validate()?;

        let streams = if accelerator {
            self.streams.max(MIN_ACCELERATOR_STREAMS)
        } else {
            self.streams
        };

        Ok(ResolvedConfig {
            arena,
            host_pool_size: host_pool,
            device_pool_size: device_pool,
            streams,
            double_pipeline: self.double_pipeline,
            debug_level: self.debug_level,
        })
    }
}

// ── ResolvedConfig ─────────────────────────────────────────────────

/// Settings after resolution against a concrete backend.
#[derive(Clone, Debug)]
pub struct ResolvedConfig {
    /// Arena settings, with the strategy decided.
    pub arena: ArenaConfig,
    /// Host pool override (`0` = derive).
    pub host_pool_size: usize,
    /// Device pool override (`0` = derive, always `0` without a device).
    pub device_pool_size: usize,
    /// Stream count.
    pub streams: usize,
    /// Whether the pipeline worker is enabled.
    pub double_pipeline: bool,
    /// General diagnostics level.
    pub debug_level: u8,
}

impl ResolvedConfig {
    /// Whether worker lifecycle events are logged.
    pub(crate) fn logs_worker(&self) -> bool {
        self.debug_level >= 3
    }
}
