//! Memory resource registry: named, not-yet-allocated descriptors.
//!
//! Processors describe their buffers once at setup by registering a
//! [`ResourceDef`] per buffer. Registration never allocates; it records
//! the size-function, flags and reuse link, probes the size once at
//! [`PROBE_ADDRESS`], and remembers permanent resources for the
//! permanent phase. Iteration order is registration order.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use recon_core::{align_up, LayoutFn, MemoryType, Plane, ProcessorId, ResourceId, PROBE_ADDRESS};

use crate::error::MemoryError;
use crate::handle::Placement;
use crate::reuse::ReuseGroups;

/// How a resource shares storage with another.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReuseRequest {
    /// The resource gets storage of its own.
    #[default]
    None,
    /// 1:1 alias onto an already-registered resource.
    Target(ResourceId),
    /// Join the reuse group with this key. The first member becomes the
    /// primary; later members alias it, and the primary is sized to the
    /// largest member before each allocation pass.
    Group(u32),
}

/// Declaration of one resource, passed to [`MemoryRegistrar::register`].
#[derive(Clone)]
pub struct ResourceDef {
    /// Human-readable name, used in diagnostics.
    pub name: String,
    /// Placement and lifetime flags.
    pub memory_type: MemoryType,
    /// Size-function.
    pub layout: LayoutFn,
    /// Reuse relationship.
    pub reuse: ReuseRequest,
    /// Minimum size of every allocation of this resource.
    pub override_size: usize,
}

impl ResourceDef {
    /// Declare a resource with its own storage.
    pub fn new(
        name: impl Into<String>,
        memory_type: MemoryType,
        layout: impl Fn(usize) -> usize + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            memory_type,
            layout: Arc::new(layout),
            reuse: ReuseRequest::None,
            override_size: 0,
        }
    }

    /// Declare a resource that needs exactly `bytes` bytes.
    pub fn fixed(name: impl Into<String>, memory_type: MemoryType, bytes: usize) -> Self {
        Self::new(name, memory_type, move |base| base + bytes)
    }

    /// Alias onto `target` instead of receiving storage.
    pub fn reusing(mut self, target: ResourceId) -> Self {
        self.reuse = ReuseRequest::Target(target);
        self
    }

    /// Join reuse group `key`.
    pub fn in_reuse_group(mut self, key: u32) -> Self {
        self.reuse = ReuseRequest::Group(key);
        self
    }

    /// Set a minimum allocation size.
    pub fn with_override_size(mut self, bytes: usize) -> Self {
        self.override_size = bytes;
        self
    }
}

impl fmt::Debug for ResourceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDef")
            .field("name", &self.name)
            .field("memory_type", &self.memory_type)
            .field("reuse", &self.reuse)
            .field("override_size", &self.override_size)
            .finish_non_exhaustive()
    }
}

/// Sink for resource registrations, handed to
/// [`Processor::register_memory`](crate::Processor::register_memory).
pub trait MemoryRegistrar {
    /// Register a resource owned by `owner`. Does not allocate.
    fn register(&mut self, owner: ProcessorId, def: ResourceDef) -> Result<ResourceId, MemoryError>;
}

/// A registered resource and its current placements.
pub struct MemoryResource {
    pub(crate) name: String,
    pub(crate) owner: ProcessorId,
    pub(crate) memory_type: MemoryType,
    pub(crate) layout: LayoutFn,
    pub(crate) reuse: Option<ResourceId>,
    pub(crate) override_size: usize,
    /// Bytes laid out by the most recent allocation (or the probe).
    pub(crate) size: usize,
    pub(crate) host: Option<Placement>,
    pub(crate) device: Option<Placement>,
    /// Bumped whenever this resource's own storage is released or moved.
    pub(crate) epoch: u32,
}

impl MemoryResource {
    /// Name given at registration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning processor.
    pub fn owner(&self) -> ProcessorId {
        self.owner
    }

    /// Flags given at registration.
    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    /// The resource this one aliases, if any.
    pub fn reuse_target(&self) -> Option<ResourceId> {
        self.reuse
    }

    /// Minimum allocation size.
    pub fn override_size(&self) -> usize {
        self.override_size
    }

    /// Computed size of the current (or last) allocation.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current placement in `plane`, without alias freshness checks.
    ///
    /// Use [`MemoryManager::placement`](crate::MemoryManager::placement)
    /// to resolve a placement safely.
    pub fn placement(&self, plane: Plane) -> Option<Placement> {
        match plane {
            Plane::Host => self.host,
            Plane::Device => self.device,
        }
    }

    /// Whether the resource currently has storage in any plane.
    pub fn is_allocated(&self) -> bool {
        self.host.is_some() || self.device.is_some()
    }

    /// Storage generation of this resource.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Whether the resource is flagged `PERMANENT`.
    pub fn is_permanent(&self) -> bool {
        self.memory_type.contains(MemoryType::PERMANENT)
    }

    /// Whether the resource is flagged `STACK`.
    pub fn is_stack(&self) -> bool {
        self.memory_type.contains(MemoryType::STACK)
    }

    /// Bytes the size-function lays out starting at `start`.
    pub(crate) fn laid_out_at(&self, start: usize) -> Result<usize, MemoryError> {
        let end = (self.layout)(start);
        end.checked_sub(start).ok_or_else(|| MemoryError::InvalidLayout {
            resource: self.name.clone(),
            start,
            end,
        })
    }

    /// Dry-run size at the probe address, floored by the override size.
    pub fn probe_size(&self) -> usize {
        let end = (self.layout)(PROBE_ADDRESS);
        end.saturating_sub(PROBE_ADDRESS).max(self.override_size)
    }

    /// Drop both placements and advance the epoch.
    pub(crate) fn release(&mut self) {
        self.host = None;
        self.device = None;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

impl fmt::Debug for MemoryResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryResource")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("memory_type", &self.memory_type)
            .field("reuse", &self.reuse)
            .field("size", &self.size)
            .field("host", &self.host)
            .field("device", &self.device)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// Catalog of all registered resources.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: IndexMap<ResourceId, MemoryResource>,
    permanent: Vec<ResourceId>,
    groups: ReuseGroups,
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a resource.
    pub fn get(&self, id: ResourceId) -> Option<&MemoryResource> {
        self.resources.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ResourceId) -> Option<&mut MemoryResource> {
        self.resources.get_mut(&id)
    }

    /// Look up a resource or fail with [`MemoryError::UnknownResource`].
    pub fn require(&self, id: ResourceId) -> Result<&MemoryResource, MemoryError> {
        self.resources
            .get(&id)
            .ok_or(MemoryError::UnknownResource { id })
    }

    pub(crate) fn require_mut(&mut self, id: ResourceId) -> Result<&mut MemoryResource, MemoryError> {
        self.resources
            .get_mut(&id)
            .ok_or(MemoryError::UnknownResource { id })
    }

    /// Iterate over all resources in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &MemoryResource)> {
        self.resources.iter().map(|(id, r)| (*id, r))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (ResourceId, &mut MemoryResource)> {
        self.resources.iter_mut().map(|(id, r)| (*id, r))
    }

    /// IDs in registration order.
    pub fn ids(&self) -> Vec<ResourceId> {
        self.resources.keys().copied().collect()
    }

    /// Resources flagged permanent, in registration order.
    pub fn permanent_resources(&self) -> &[ResourceId] {
        &self.permanent
    }

    /// Reuse groups declared through [`ReuseRequest::Group`].
    pub fn reuse_groups(&self) -> &ReuseGroups {
        &self.groups
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether no resource is registered.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Sum of padded probe sizes of every resource that needs its own
    /// storage in `plane`.
    ///
    /// With `host_only` set, device resources are counted against the
    /// host plane, matching how a host-only instance places them.
    pub fn required_bytes(&self, plane: Plane, alignment: usize, host_only: bool) -> usize {
        self.pooled_bytes(plane, alignment, host_only, |_| true)
    }

    /// Like [`required_bytes`](Self::required_bytes), counting permanent
    /// resources only.
    pub fn permanent_bytes(&self, plane: Plane, alignment: usize, host_only: bool) -> usize {
        self.pooled_bytes(plane, alignment, host_only, MemoryResource::is_permanent)
    }

    fn pooled_bytes(
        &self,
        plane: Plane,
        alignment: usize,
        host_only: bool,
        keep: impl Fn(&MemoryResource) -> bool,
    ) -> usize {
        self.resources
            .values()
            .filter(|r| r.reuse.is_none() && !r.memory_type.contains(MemoryType::EXTERNAL))
            .filter(|r| keep(r))
            .filter(|r| match (plane, host_only) {
                (Plane::Host, true) => r.memory_type.intersects(MemoryType::INOUT),
                (Plane::Device, true) => false,
                (p, false) => r.memory_type.in_plane(p),
            })
            .map(|r| align_up(r.probe_size(), alignment))
            .sum()
    }

    fn validate_target(
        &self,
        name: &str,
        memory_type: MemoryType,
        target: ResourceId,
    ) -> Result<(), MemoryError> {
        let reject = |reason| MemoryError::InvalidReuseTarget {
            resource: name.to_string(),
            target,
            reason,
        };
        let t = self.resources.get(&target).ok_or_else(|| reject("not registered"))?;
        if t.reuse.is_some() {
            return Err(reject("target is itself a reuse dependent"));
        }
        if t.memory_type.contains(MemoryType::EXTERNAL) {
            return Err(reject("target is external"));
        }
        if memory_type.contains(MemoryType::OUTPUT)
            && !t.memory_type.intersects(MemoryType::OUTPUT | MemoryType::PERMANENT)
        {
            return Err(reject("output dependent needs an output or permanent target"));
        }
        if Plane::ALL
            .iter()
            .any(|&p| memory_type.in_plane(p) && !t.memory_type.in_plane(p))
        {
            return Err(reject("target lacks a plane the dependent uses"));
        }
        Ok(())
    }
}

impl MemoryRegistrar for ResourceRegistry {
    fn register(&mut self, owner: ProcessorId, def: ResourceDef) -> Result<ResourceId, MemoryError> {
        let raw = u16::try_from(self.resources.len()).map_err(|_| MemoryError::InvalidConfig {
            reason: format!("more than {} resources registered", u16::MAX),
        })?;
        let id = ResourceId(raw);

        let end = (def.layout)(PROBE_ADDRESS);
        if end < PROBE_ADDRESS {
            return Err(MemoryError::InvalidLayout {
                resource: def.name,
                start: PROBE_ADDRESS,
                end,
            });
        }

        let reuse = match def.reuse {
            ReuseRequest::None => None,
            ReuseRequest::Target(target) => {
                self.validate_target(&def.name, def.memory_type, target)?;
                Some(target)
            }
            ReuseRequest::Group(key) => match self.groups.primary(key) {
                Some(primary) => {
                    self.validate_target(&def.name, def.memory_type, primary)?;
                    Some(primary)
                }
                None => None,
            },
        };
        if let ReuseRequest::Group(key) = def.reuse {
            self.groups.join(key, id);
        }

        let resource = MemoryResource {
            size: (end - PROBE_ADDRESS).max(def.override_size),
            name: def.name,
            owner,
            memory_type: def.memory_type,
            layout: def.layout,
            reuse,
            override_size: def.override_size,
            host: None,
            device: None,
            epoch: 0,
        };
        if resource.is_permanent() {
            self.permanent.push(id);
        }
        self.resources.insert(id, resource);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: ProcessorId = ProcessorId(0);

    #[test]
    fn register_assigns_sequential_ids() {
        let mut reg = ResourceRegistry::new();
        let a = reg.register(P, ResourceDef::fixed("a", MemoryType::HOST, 10)).unwrap();
        let b = reg.register(P, ResourceDef::fixed("b", MemoryType::HOST, 20)).unwrap();
        assert_eq!(a, ResourceId(0));
        assert_eq!(b, ResourceId(1));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn register_does_not_allocate() {
        let mut reg = ResourceRegistry::new();
        let a = reg.register(P, ResourceDef::fixed("a", MemoryType::INOUT, 10)).unwrap();
        let r = reg.get(a).unwrap();
        assert!(!r.is_allocated());
        assert_eq!(r.size(), 10);
    }

    #[test]
    fn permanent_resources_recorded() {
        let mut reg = ResourceRegistry::new();
        reg.register(P, ResourceDef::fixed("t", MemoryType::HOST, 1)).unwrap();
        let p = reg
            .register(P, ResourceDef::fixed("p", MemoryType::HOST | MemoryType::PERMANENT, 1))
            .unwrap();
        assert_eq!(reg.permanent_resources(), &[p]);
    }

    #[test]
    fn override_size_floors_probe() {
        let mut reg = ResourceRegistry::new();
        let a = reg
            .register(P, ResourceDef::fixed("a", MemoryType::HOST, 10).with_override_size(64))
            .unwrap();
        assert_eq!(reg.get(a).unwrap().probe_size(), 64);
    }

    #[test]
    fn negative_layout_rejected() {
        let mut reg = ResourceRegistry::new();
        let err = reg
            .register(P, ResourceDef::new("bad", MemoryType::HOST, |base| base - 1))
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidLayout { .. }));
        assert!(reg.is_empty());
    }

    #[test]
    fn reuse_of_unknown_target_rejected() {
        let mut reg = ResourceRegistry::new();
        let err = reg
            .register(P, ResourceDef::fixed("d", MemoryType::HOST, 1).reusing(ResourceId(9)))
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidReuseTarget { .. }));
    }

    #[test]
    fn reuse_chain_rejected() {
        let mut reg = ResourceRegistry::new();
        let a = reg.register(P, ResourceDef::fixed("a", MemoryType::HOST, 8)).unwrap();
        let b = reg
            .register(P, ResourceDef::fixed("b", MemoryType::HOST, 8).reusing(a))
            .unwrap();
        let err = reg
            .register(P, ResourceDef::fixed("c", MemoryType::HOST, 8).reusing(b))
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidReuseTarget { .. }));
    }

    #[test]
    fn output_dependent_needs_surviving_target() {
        let mut reg = ResourceRegistry::new();
        let scratch = reg.register(P, ResourceDef::fixed("scratch", MemoryType::HOST, 64)).unwrap();
        let err = reg
            .register(
                P,
                ResourceDef::fixed("out", MemoryType::HOST | MemoryType::OUTPUT, 32).reusing(scratch),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::InvalidReuseTarget { reason, .. } if reason.contains("output")
        ));

        let kept = reg
            .register(P, ResourceDef::fixed("kept", MemoryType::HOST | MemoryType::OUTPUT, 64))
            .unwrap();
        reg.register(
            P,
            ResourceDef::fixed("out", MemoryType::HOST | MemoryType::OUTPUT, 32).reusing(kept),
        )
        .unwrap();
    }

    #[test]
    fn reuse_needs_target_planes() {
        let mut reg = ResourceRegistry::new();
        let a = reg.register(P, ResourceDef::fixed("a", MemoryType::HOST, 8)).unwrap();
        let err = reg
            .register(P, ResourceDef::fixed("b", MemoryType::DEVICE, 8).reusing(a))
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidReuseTarget { .. }));
    }

    #[test]
    fn group_members_alias_first_member() {
        let mut reg = ResourceRegistry::new();
        let a = reg
            .register(P, ResourceDef::fixed("a", MemoryType::HOST, 8).in_reuse_group(3))
            .unwrap();
        let b = reg
            .register(P, ResourceDef::fixed("b", MemoryType::HOST, 32).in_reuse_group(3))
            .unwrap();
        assert_eq!(reg.get(a).unwrap().reuse_target(), None);
        assert_eq!(reg.get(b).unwrap().reuse_target(), Some(a));
        assert_eq!(reg.reuse_groups().members(3), &[a, b]);
    }

    #[test]
    fn required_bytes_skips_reuse_and_external() {
        let mut reg = ResourceRegistry::new();
        let a = reg.register(P, ResourceDef::fixed("a", MemoryType::HOST, 100)).unwrap();
        reg.register(P, ResourceDef::fixed("b", MemoryType::HOST, 50).reusing(a))
            .unwrap();
        reg.register(P, ResourceDef::fixed("x", MemoryType::HOST | MemoryType::EXTERNAL, 1000))
            .unwrap();
        reg.register(P, ResourceDef::fixed("d", MemoryType::DEVICE, 10)).unwrap();
        assert_eq!(reg.required_bytes(Plane::Host, 16, false), 112);
        assert_eq!(reg.required_bytes(Plane::Device, 16, false), 16);
        assert_eq!(reg.required_bytes(Plane::Host, 16, true), 128);
        assert_eq!(reg.required_bytes(Plane::Device, 16, true), 0);
        assert_eq!(reg.permanent_bytes(Plane::Host, 16, false), 0);
    }

    #[test]
    fn permanent_bytes_counts_permanent_only() {
        let mut reg = ResourceRegistry::new();
        reg.register(P, ResourceDef::fixed("geom", MemoryType::HOST | MemoryType::PERMANENT, 100))
            .unwrap();
        reg.register(P, ResourceDef::fixed("hits", MemoryType::HOST, 40)).unwrap();
        assert_eq!(reg.permanent_bytes(Plane::Host, 16, false), 112);
        assert_eq!(reg.required_bytes(Plane::Host, 16, false), 160);
    }
}
