//! Test utilities and mock types for Recon development.
//!
//! Provides a [`MockProcessor`] that registers a fixed list of resources
//! and records the addresses it is given, a [`MockAccelerator`] backend
//! with a device plane, and task fixtures in [`fixtures`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::{Arc, Mutex, PoisonError};

use recon_arena::{MemoryError, MemoryRegistrar, Processor, ResourceDef};
use recon_core::{DeviceType, ProcessorId, ResourceId};
use recon_engine::{Backend, BackendError, BackendRegistry, DeviceSettings};

pub use fixtures::{CountingTask, FailingTask, RecordingTask};

/// One `pointers_assigned` call seen by a [`MockProcessor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub resource: ResourceId,
    pub host: Option<usize>,
    pub device: Option<usize>,
}

/// Registers a fixed list of resources.
///
/// Ids handed out by the registrar are kept in registration order and
/// every address notification is appended to a shared log, so tests can
/// inspect them after the processor has been boxed into an instance.
pub struct MockProcessor {
    pub name: String,
    defs: Vec<ResourceDef>,
    ids: Arc<Mutex<Vec<ResourceId>>>,
    assigned: Arc<Mutex<Vec<Assignment>>>,
}

impl MockProcessor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defs: Vec::new(),
            ids: Arc::default(),
            assigned: Arc::default(),
        }
    }

    /// Add a resource to register.
    pub fn with(mut self, def: ResourceDef) -> Self {
        self.defs.push(def);
        self
    }

    /// Shared list of registered ids, filled by `register_memory`.
    pub fn ids(&self) -> Arc<Mutex<Vec<ResourceId>>> {
        Arc::clone(&self.ids)
    }

    /// Shared log of address notifications.
    pub fn assignments(&self) -> Arc<Mutex<Vec<Assignment>>> {
        Arc::clone(&self.assigned)
    }
}

impl Processor for MockProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_memory(
        &mut self,
        owner: ProcessorId,
        registrar: &mut dyn MemoryRegistrar,
    ) -> Result<(), MemoryError> {
        for def in &self.defs {
            let id = registrar.register(owner, def.clone())?;
            self.ids.lock().unwrap_or_else(PoisonError::into_inner).push(id);
        }
        Ok(())
    }

    fn pointers_assigned(&mut self, resource: ResourceId, host: Option<usize>, device: Option<usize>) {
        self.assigned.lock().unwrap_or_else(PoisonError::into_inner).push(Assignment {
            resource,
            host,
            device,
        });
    }
}

/// Accelerator backend with no real device behind it.
#[derive(Debug)]
pub struct MockAccelerator {
    device: DeviceType,
    pub streams: usize,
    pub fail_init: bool,
}

impl MockAccelerator {
    pub fn new(device: DeviceType) -> Self {
        Self {
            device,
            streams: 0,
            fail_init: false,
        }
    }

    /// Constructor usable with [`BackendRegistry::register`].
    pub fn create(settings: &DeviceSettings) -> Result<Box<dyn Backend>, BackendError> {
        Ok(Box::new(Self::new(settings.device_type)))
    }

    /// Constructor whose backends fail `init_device`.
    pub fn create_failing(settings: &DeviceSettings) -> Result<Box<dyn Backend>, BackendError> {
        Ok(Box::new(Self {
            fail_init: true,
            ..Self::new(settings.device_type)
        }))
    }
}

impl Backend for MockAccelerator {
    fn device_type(&self) -> DeviceType {
        self.device
    }

    fn init_device(&mut self, streams: usize) -> Result<(), BackendError> {
        if self.fail_init {
            return Err(BackendError::Unavailable {
                device: self.device,
                reason: "mock device init failure".into(),
            });
        }
        self.streams = streams;
        Ok(())
    }
}

/// Registry with the host backend and a [`MockAccelerator`] for `device`.
pub fn accelerator_registry(device: DeviceType) -> BackendRegistry {
    let mut registry = BackendRegistry::with_defaults();
    registry.register(device, MockAccelerator::create);
    registry
}

/// Like [`accelerator_registry`], but device init always fails.
pub fn failing_accelerator_registry(device: DeviceType) -> BackendRegistry {
    let mut registry = BackendRegistry::with_defaults();
    registry.register(device, MockAccelerator::create_failing);
    registry
}
