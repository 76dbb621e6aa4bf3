//! Backend selection.
//!
//! Backends are compiled in, not loaded. A [`BackendRegistry`] maps each
//! [`DeviceType`] to a constructor; the caller builds one registry at
//! start-up and passes it to whatever constructs instances.

use std::error::Error;
use std::fmt;

use indexmap::IndexMap;
use recon_core::DeviceType;
use tracing::{info, warn};

use crate::config::DeviceSettings;

/// Constructor for one backend type.
pub type BackendCtor = fn(&DeviceSettings) -> Result<Box<dyn Backend>, BackendError>;

/// A compute backend driving one physical device.
pub trait Backend: Send {
    /// The device type this backend drives.
    fn device_type(&self) -> DeviceType;

    /// Bring up the device context with `streams` queues.
    fn init_device(&mut self, streams: usize) -> Result<(), BackendError> {
        let _ = streams;
        Ok(())
    }

    /// Tear down the device context.
    fn exit_device(&mut self) {}

    /// Whether the backend has its own memory plane.
    fn is_accelerator(&self) -> bool {
        self.device_type().is_accelerator()
    }
}

// ── BackendError ───────────────────────────────────────────────────

/// Errors raised while selecting or initializing a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendError {
    /// No constructor for this device type is registered.
    NotCompiledIn {
        /// The requested device type.
        device: DeviceType,
    },
    /// The backend exists but could not be brought up.
    Unavailable {
        /// The requested device type.
        device: DeviceType,
        /// What failed.
        reason: String,
    },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCompiledIn { device } => write!(f, "no {device} backend compiled in"),
            Self::Unavailable { device, reason } => {
                write!(f, "{device} backend unavailable: {reason}")
            }
        }
    }
}

impl Error for BackendError {}

// ── CpuBackend ─────────────────────────────────────────────────────

/// Host-only backend. Always available.
#[derive(Debug, Default)]
pub struct CpuBackend {
    streams: usize,
}

impl CpuBackend {
    /// Constructor registered for [`DeviceType::Cpu`].
    pub fn create(_settings: &DeviceSettings) -> Result<Box<dyn Backend>, BackendError> {
        Ok(Box::new(Self::default()))
    }

    /// Streams requested at device init.
    pub fn streams(&self) -> usize {
        self.streams
    }
}

impl Backend for CpuBackend {
    fn device_type(&self) -> DeviceType {
        DeviceType::Cpu
    }

    fn init_device(&mut self, streams: usize) -> Result<(), BackendError> {
        self.streams = streams;
        Ok(())
    }
}

// ── BackendRegistry ────────────────────────────────────────────────

/// Device type → backend constructor.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    ctors: IndexMap<DeviceType, BackendCtor>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ctors.keys()).finish()
    }
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the host backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DeviceType::Cpu, CpuBackend::create);
        registry
    }

    /// Register `ctor` for `device`, returning the constructor it replaced.
    pub fn register(&mut self, device: DeviceType, ctor: BackendCtor) -> Option<BackendCtor> {
        self.ctors.insert(device, ctor)
    }

    /// Whether a constructor for `device` is registered.
    pub fn is_available(&self, device: DeviceType) -> bool {
        self.ctors.contains_key(&device)
    }

    /// Registered device types, in registration order.
    pub fn devices(&self) -> impl Iterator<Item = DeviceType> + '_ {
        self.ctors.keys().copied()
    }

    /// Construct the backend `settings` asks for.
    ///
    /// If it is missing or fails to construct, falls back to the host
    /// backend unless `force_device_type` is set.
    pub fn create(&self, settings: &DeviceSettings) -> Result<Box<dyn Backend>, BackendError> {
        let device = settings.device_type;
        let result = match self.ctors.get(&device) {
            Some(ctor) => ctor(settings),
            None => Err(BackendError::NotCompiledIn { device }),
        };
        match result {
            Ok(backend) => {
                info!(%device, "created backend");
                Ok(backend)
            }
            Err(e) if settings.force_device_type || device == DeviceType::Cpu => Err(e),
            Err(e) => {
                warn!(%device, error = %e, "backend unavailable, falling back to CPU");
                self.create(&DeviceSettings::forced(DeviceType::Cpu))
            }
        }
    }
}
