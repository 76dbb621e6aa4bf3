//! Benchmark profiles for the Recon runtime.
//!
//! - [`reference_manager`]: one pool with permanent tables, per-unit
//!   transient buffers and bracketed scratch, sized like a small
//!   reconstruction step.
//! - [`register_reference_resources`]: the resource set alone, for
//!   callers that bring their own manager.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use recon_arena::{ArenaConfig, MemoryError, MemoryManager, MemoryRegistrar, ResourceDef};
use recon_core::{LayoutCursor, MemoryType, ProcessorId, ResourceId};

/// Resources registered by [`register_reference_resources`].
#[derive(Clone, Debug, Default)]
pub struct ReferenceResources {
    /// Permanent lookup tables.
    pub permanent: Vec<ResourceId>,
    /// Per-unit transient buffers.
    pub transient: Vec<ResourceId>,
    /// Bracketed scratch buffers.
    pub scratch: Vec<ResourceId>,
}

/// Register `units` groups of resources: one permanent table, one
/// transient hit buffer with a structured layout and one stack scratch
/// buffer per group.
pub fn register_reference_resources(
    manager: &mut MemoryManager,
    units: usize,
) -> Result<ReferenceResources, MemoryError> {
    let mut out = ReferenceResources::default();
    for unit in 0..units {
        let owner = ProcessorId(u32::try_from(unit).unwrap_or(u32::MAX));
        out.permanent.push(manager.register(
            owner,
            ResourceDef::fixed(format!("table{unit}"), MemoryType::HOST | MemoryType::PERMANENT, 4096),
        )?);
        out.transient.push(manager.register(
            owner,
            ResourceDef::new(format!("hits{unit}"), MemoryType::HOST, |base| {
                let mut c = LayoutCursor::new(base);
                c.reserve_array::<f32>(1024);
                c.reserve_array::<u32>(1024);
                c.reserve_array::<u16>(512);
                c.end()
            }),
        )?);
        out.scratch.push(manager.register(
            owner,
            ResourceDef::fixed(format!("scratch{unit}"), MemoryType::HOST | MemoryType::STACK, 2048),
        )?);
    }
    Ok(out)
}

/// A manager with [`register_reference_resources`] registered, a pool
/// sized to fit, and the permanent phase complete.
pub fn reference_manager(units: usize) -> Result<(MemoryManager, ReferenceResources), MemoryError> {
    let mut manager = MemoryManager::new(ArenaConfig::default(), false)?;
    let resources = register_reference_resources(&mut manager, units)?;
    let required = manager.required_pool_sizes();
    manager.install_pool(required.host, 0)?;
    manager.allocate_permanent()?;
    Ok((manager, resources))
}
