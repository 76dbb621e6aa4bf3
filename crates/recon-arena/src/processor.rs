//! Processor collaborator trait.

use recon_core::{ProcessorId, ResourceId};

use crate::error::MemoryError;
use crate::registry::MemoryRegistrar;

/// A unit of domain logic that consumes arena memory.
///
/// Processors describe their buffers once through
/// [`register_memory`](Self::register_memory) and are told the final
/// addresses through [`pointers_assigned`](Self::pointers_assigned)
/// after every allocation pass.
pub trait Processor: Send {
    /// Human-readable name, used in diagnostics.
    fn name(&self) -> &str;

    /// Register every resource this processor needs.
    fn register_memory(
        &mut self,
        owner: ProcessorId,
        registrar: &mut dyn MemoryRegistrar,
    ) -> Result<(), MemoryError>;

    /// Final addresses of `resource` in the host and device planes.
    ///
    /// `None` means the resource has no storage in that plane.
    fn pointers_assigned(&mut self, resource: ResourceId, host: Option<usize>, device: Option<usize>) {
        let _ = (resource, host, device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ResourceDef, ResourceRegistry};
    use recon_core::MemoryType;

    struct Clusterer {
        assigned: Vec<(ResourceId, Option<usize>)>,
    }

    impl Processor for Clusterer {
        fn name(&self) -> &str {
            "clusterer"
        }

        fn register_memory(
            &mut self,
            owner: ProcessorId,
            registrar: &mut dyn MemoryRegistrar,
        ) -> Result<(), MemoryError> {
            registrar.register(owner, ResourceDef::fixed("clusters", MemoryType::INOUT, 256))?;
            registrar.register(owner, ResourceDef::fixed("scratch", MemoryType::SCRATCH, 64))?;
            Ok(())
        }

        fn pointers_assigned(&mut self, resource: ResourceId, host: Option<usize>, _device: Option<usize>) {
            self.assigned.push((resource, host));
        }
    }

    #[test]
    fn registration_goes_through_registrar() {
        let mut reg = ResourceRegistry::new();
        let mut p = Clusterer { assigned: Vec::new() };
        p.register_memory(ProcessorId(3), &mut reg).unwrap();
        assert_eq!(reg.len(), 2);
        assert!(reg.iter().all(|(_, r)| r.owner() == ProcessorId(3)));
        p.pointers_assigned(ResourceId(0), Some(64), None);
        assert_eq!(p.assigned, vec![(ResourceId(0), Some(64))]);
        assert_eq!(p.name(), "clusterer");
    }
}
