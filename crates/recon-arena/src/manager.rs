//! The memory manager: registry, dual-plane arena and release protocols.
//!
//! [`MemoryManager`] ties the pieces together:
//!
//! - resources are registered through [`MemoryRegistrar`] and placed by
//!   [`allocate_permanent`](MemoryManager::allocate_permanent),
//!   [`allocate_transient`](MemoryManager::allocate_transient) or
//!   [`allocate`](MemoryManager::allocate);
//! - [`clear_allocated`](MemoryManager::clear_allocated) resets both planes
//!   to the permanent boundary between processing units;
//! - [`push_frame`](MemoryManager::push_frame) /
//!   [`pop_frame`](MemoryManager::pop_frame) release stack allocations in
//!   tagged brackets;
//! - the volatile device region, unmanaged chunks and stack blocking are
//!   side channels that do not go through the registry.
//!
//! Every failed allocation leaves the cursors where they were.

use indexmap::IndexMap;
use recon_core::{FrameTag, LayoutFn, MemoryType, Plane, ProcessorId, ResourceId};
use tracing::debug;

use crate::config::{AllocationStrategy, ArenaConfig};
use crate::error::{Discipline, MemoryError};
use crate::frame::{FrameStack, NonPersistentFrame};
use crate::handle::{Placement, Region};
use crate::plane::{PlaneArena, PlaneCursors, Shortfall};
use crate::pool::{Backing, PoolStorage, PoolView};
use crate::processor::Processor;
use crate::registry::{MemoryRegistrar, MemoryResource, ResourceDef, ResourceRegistry};
use crate::reuse::compute_reuse_max;
use crate::usage::{MemoryUsage, PlaneUsage, PoolRequirement, ResourceStatistics};
use crate::volatile::VolatileRegion;

/// What a placement routine needs from a resource, detached from the
/// registry borrow.
struct Request {
    name: String,
    memory_type: MemoryType,
    layout: LayoutFn,
    override_size: usize,
    probe: usize,
}

impl Request {
    fn of(r: &MemoryResource) -> Self {
        Self {
            name: r.name.clone(),
            memory_type: r.memory_type,
            layout: r.layout.clone(),
            override_size: r.override_size,
            probe: r.probe_size(),
        }
    }

    fn laid_out_at(&self, start: usize) -> Result<usize, MemoryError> {
        let end = (self.layout)(start);
        end.checked_sub(start).ok_or_else(|| MemoryError::InvalidLayout {
            resource: self.name.clone(),
            start,
            end,
        })
    }
}

type Placed = (Option<Placement>, Option<Placement>, usize);

fn out_of_memory(resource: &str, plane: Plane, discipline: Discipline, s: Shortfall) -> MemoryError {
    MemoryError::OutOfMemory {
        resource: resource.to_string(),
        plane,
        discipline,
        requested: s.requested,
        available: s.available,
    }
}

/// Arena pair plus resource registry for one reconstruction instance.
pub struct MemoryManager {
    config: ArenaConfig,
    registry: ResourceRegistry,
    host: PlaneArena,
    device: Option<PlaneArena>,
    backing: Backing,
    individual: IndexMap<ResourceId, Vec<u8>>,
    unmanaged: Vec<Vec<u8>>,
    frames: FrameStack,
    /// Stack allocations in order, for release on pop.
    stack_log: Vec<ResourceId>,
    volatile: VolatileRegion,
    stack_blocked: bool,
}

impl MemoryManager {
    /// Create a manager. `with_device` adds a device plane; without it,
    /// device resources are placed in the host plane and their device
    /// placement mirrors the host one.
    pub fn new(config: ArenaConfig, with_device: bool) -> Result<Self, MemoryError> {
        config.validate()?;
        if with_device && config.strategy == AllocationStrategy::Individual {
            return Err(MemoryError::InvalidConfig {
                reason: "individual allocation strategy is host-only".into(),
            });
        }
        let alignment = config.alignment;
        Ok(Self {
            config,
            registry: ResourceRegistry::new(),
            host: PlaneArena::unbacked(Plane::Host, alignment),
            device: with_device.then(|| PlaneArena::unbacked(Plane::Device, alignment)),
            backing: Backing::None,
            individual: IndexMap::new(),
            unmanaged: Vec::new(),
            frames: FrameStack::default(),
            stack_log: Vec::new(),
            volatile: VolatileRegion::default(),
            stack_blocked: false,
        })
    }

    /// Configuration.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Registered resources.
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Host plane cursors.
    pub fn host_arena(&self) -> &PlaneArena {
        &self.host
    }

    /// Device plane cursors, if the instance has a device plane.
    pub fn device_arena(&self) -> Option<&PlaneArena> {
        self.device.as_ref()
    }

    /// Whether the instance has a separate device plane.
    pub fn has_device_plane(&self) -> bool {
        self.device.is_some()
    }

    /// Pushed frames.
    pub fn frames(&self) -> &FrameStack {
        &self.frames
    }

    /// The volatile device region.
    pub fn volatile(&self) -> &VolatileRegion {
        &self.volatile
    }

    /// Whether a pool (owned or borrowed) is installed and alive.
    pub fn is_pool_installed(&self) -> bool {
        self.backing.is_installed()
    }

    fn arena_mut(&mut self, plane: Plane) -> Result<&mut PlaneArena, MemoryError> {
        match plane {
            Plane::Host => Ok(&mut self.host),
            Plane::Device => self.device.as_mut().ok_or(MemoryError::NoDevicePlane {
                operation: "device allocation",
            }),
        }
    }

    /// Device plane, or the host plane standing in for it.
    fn device_or_host_mut(&mut self) -> &mut PlaneArena {
        match self.device.as_mut() {
            Some(device) => device,
            None => &mut self.host,
        }
    }

    fn wants(&self, memory_type: MemoryType, plane: Plane) -> bool {
        match self.device {
            Some(_) => memory_type.in_plane(plane),
            None => plane == Plane::Host && memory_type.intersects(MemoryType::INOUT),
        }
    }

    fn ensure_ready(&self) -> Result<(), MemoryError> {
        match self.config.strategy {
            AllocationStrategy::Individual => Ok(()),
            AllocationStrategy::Global if self.backing.is_installed() => Ok(()),
            AllocationStrategy::Global => Err(MemoryError::PoolUninitialized),
        }
    }

    fn ensure_pool(&self) -> Result<(), MemoryError> {
        if self.backing.is_installed() {
            Ok(())
        } else {
            Err(MemoryError::PoolUninitialized)
        }
    }

    // ── Registration ───────────────────────────────────────────

    /// Let `processor` register its resources under `owner`.
    pub fn register_processor(
        &mut self,
        owner: ProcessorId,
        processor: &mut dyn Processor,
    ) -> Result<(), MemoryError> {
        processor.register_memory(owner, self)
    }

    /// Report the current addresses of every resource owned by `owner`.
    pub fn notify_processor(&self, owner: ProcessorId, processor: &mut dyn Processor) {
        for (id, r) in self.registry.iter().filter(|(_, r)| r.owner == owner) {
            processor.pointers_assigned(id, r.host.map(|p| p.address), r.device.map(|p| p.address));
        }
    }

    /// Pool bytes the registered resources need. Reuse-group primaries
    /// are sized to their largest member first.
    pub fn required_pool_sizes(&mut self) -> PoolRequirement {
        compute_reuse_max(&mut self.registry);
        let host_only = self.device.is_none();
        let alignment = self.config.alignment;
        let reg = &self.registry;
        PoolRequirement {
            host: reg.required_bytes(Plane::Host, alignment, host_only),
            device: reg.required_bytes(Plane::Device, alignment, host_only),
            permanent_host: reg.permanent_bytes(Plane::Host, alignment, host_only),
            permanent_device: reg.permanent_bytes(Plane::Device, alignment, host_only),
        }
    }

    // ── Pool installation ──────────────────────────────────────

    /// Allocate and own a pool of the given sizes. `device_size` is
    /// ignored without a device plane.
    pub fn install_pool(&mut self, host_size: usize, device_size: usize) -> Result<(), MemoryError> {
        if self.config.strategy == AllocationStrategy::Individual {
            return Err(MemoryError::InvalidConfig {
                reason: "individual allocation strategy has no pool".into(),
            });
        }
        if self.backing.is_installed() {
            return Err(MemoryError::InvalidConfig {
                reason: "pool already installed".into(),
            });
        }
        let alignment = self.config.alignment;
        let device_size = if self.device.is_some() { device_size } else { 0 };
        self.backing = Backing::Owned(PoolStorage::new(host_size, device_size));
        self.host = PlaneArena::new(Plane::Host, 0, host_size, alignment);
        if let Some(device) = self.device.as_mut() {
            *device = PlaneArena::new(Plane::Device, 0, device_size, alignment);
        }
        debug!(host_size, device_size, "installed memory pool");
        Ok(())
    }

    /// View of the space above this manager's permanent boundary, for a
    /// secondary to carve from.
    pub fn share_view(&self) -> Result<PoolView, MemoryError> {
        let storage = self.backing.storage()?;
        let host = self.host.permanent_boundary()..self.host.end();
        let device = self
            .device
            .as_ref()
            .map(|d| d.permanent_boundary()..d.end());
        Ok(PoolView::new(&storage, host, device))
    }

    /// Carve from a master's pool instead of owning one.
    pub fn install_view(&mut self, view: PoolView) -> Result<(), MemoryError> {
        if self.config.strategy == AllocationStrategy::Individual {
            return Err(MemoryError::InvalidConfig {
                reason: "individual allocation strategy has no pool".into(),
            });
        }
        if !view.is_live() {
            return Err(MemoryError::PoolUninitialized);
        }
        let alignment = self.config.alignment;
        let host = view.host_range();
        match (self.device.as_mut(), view.device_range()) {
            (Some(device), Some(range)) => {
                *device = PlaneArena::new(Plane::Device, range.start, range.end, alignment);
            }
            (None, None) => {}
            _ => {
                return Err(MemoryError::InvalidConfig {
                    reason: "pool view planes do not match the instance".into(),
                })
            }
        }
        self.host = PlaneArena::new(Plane::Host, host.start, host.end, alignment);
        self.backing = Backing::Borrowed(view);
        Ok(())
    }

    /// Current permanent boundaries.
    pub fn permanent_boundaries(&self) -> PlaneCursors {
        PlaneCursors {
            host: self.host.permanent_boundary(),
            device: self.device.as_ref().map(PlaneArena::permanent_boundary),
        }
    }

    /// Raise the permanent boundaries, e.g. past permanent data that
    /// secondaries placed in this pool.
    pub fn extend_permanent(&mut self, to: PlaneCursors) -> Result<(), MemoryError> {
        let snapshot = (self.host, self.device);
        let result = self.extend_permanent_inner(to);
        if result.is_err() {
            (self.host, self.device) = snapshot;
        }
        result
    }

    fn extend_permanent_inner(&mut self, to: PlaneCursors) -> Result<(), MemoryError> {
        self.host
            .extend_permanent(to.host)
            .map_err(|s| out_of_memory("permanent boundary", Plane::Host, Discipline::Permanent, s))?;
        if let (Some(device), Some(to)) = (self.device.as_mut(), to.device) {
            device
                .extend_permanent(to)
                .map_err(|s| out_of_memory("permanent boundary", Plane::Device, Discipline::Permanent, s))?;
        }
        Ok(())
    }

    // ── Allocation ─────────────────────────────────────────────

    /// Permanent phase: place every permanent resource, then seal the
    /// boundary. Already-placed permanent resources have their layout
    /// replayed in place instead.
    pub fn allocate_permanent(&mut self) -> Result<(), MemoryError> {
        self.ensure_ready()?;
        compute_reuse_max(&mut self.registry);
        let ids = self.registry.permanent_resources().to_vec();
        for id in ids {
            let r = self.registry.require(id)?;
            if r.memory_type.intersects(MemoryType::EXTERNAL | MemoryType::CUSTOM) {
                continue;
            }
            if r.is_allocated() {
                self.reset_pointers(id)?;
                continue;
            }
            if self.host.is_sealed() {
                return Err(MemoryError::ArenaSealed {
                    resource: r.name.clone(),
                });
            }
            self.place(id, Discipline::Permanent)?;
        }
        if !self.host.is_sealed() {
            self.host.seal();
            if let Some(device) = self.device.as_mut() {
                device.seal();
            }
        }
        debug!(
            host = self.host.permanent_boundary(),
            device = ?self.device.as_ref().map(PlaneArena::permanent_boundary),
            "sealed permanent boundary"
        );
        Ok(())
    }

    /// Transient phase: place every non-permanent, non-custom resource
    /// (of `owner`, or of everyone). Outputs that survived the last clear
    /// have their layout replayed in place.
    pub fn allocate_transient(&mut self, owner: Option<ProcessorId>) -> Result<(), MemoryError> {
        self.ensure_ready()?;
        compute_reuse_max(&mut self.registry);
        let skip = MemoryType::PERMANENT | MemoryType::CUSTOM | MemoryType::EXTERNAL;
        let ids: Vec<ResourceId> = self
            .registry
            .iter()
            .filter(|(_, r)| !r.memory_type.intersects(skip))
            .filter(|(_, r)| owner.is_none_or(|o| r.owner == o))
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            let r = self.registry.require(id)?;
            if r.is_allocated() && r.memory_type.contains(MemoryType::OUTPUT) {
                self.reset_pointers(id)?;
                continue;
            }
            self.place(id, Discipline::Transient)?;
        }
        Ok(())
    }

    /// Place one resource. Fails with [`MemoryError::DoubleAllocation`]
    /// if it already has storage.
    pub fn allocate(&mut self, id: ResourceId) -> Result<(), MemoryError> {
        self.ensure_ready()?;
        let r = self.registry.require(id)?;
        let discipline = if r.is_permanent() {
            if self.host.is_sealed() && !r.is_allocated() {
                return Err(MemoryError::ArenaSealed {
                    resource: r.name.clone(),
                });
            }
            Discipline::Permanent
        } else {
            Discipline::Transient
        };
        self.place(id, discipline)
    }

    fn place(&mut self, id: ResourceId, discipline: Discipline) -> Result<(), MemoryError> {
        let r = self.registry.require(id)?;
        if r.is_allocated() {
            return Err(MemoryError::DoubleAllocation {
                resource: r.name.clone(),
            });
        }
        if r.memory_type.contains(MemoryType::EXTERNAL) || !r.memory_type.intersects(MemoryType::INOUT) {
            return Ok(());
        }
        let stack = r.is_stack();
        let discipline = if stack { Discipline::Stack } else { discipline };
        let req = Request::of(r);
        let (host, device, size) = match (r.reuse, self.config.strategy) {
            (Some(target), _) => self.place_alias(&req, target)?,
            (None, AllocationStrategy::Individual) => self.place_individual(id, &req)?,
            (None, AllocationStrategy::Global) => self.place_pooled(&req, discipline)?,
        };
        let r = self.registry.require_mut(id)?;
        r.host = host;
        r.device = device;
        r.size = size;
        if stack {
            self.stack_log.push(id);
        }
        Ok(())
    }

    fn place_pooled(&mut self, req: &Request, discipline: Discipline) -> Result<Placed, MemoryError> {
        let snapshot = (self.host, self.device);
        let result = self.place_pooled_inner(req, discipline);
        if result.is_err() {
            (self.host, self.device) = snapshot;
        }
        result
    }

    fn place_pooled_inner(&mut self, req: &Request, discipline: Discipline) -> Result<Placed, MemoryError> {
        let mut host: Option<Placement> = None;
        let mut device = None;
        let mut size = 0;
        for plane in Plane::ALL {
            if !self.wants(req.memory_type, plane) {
                continue;
            }
            let (placement, reserved) = self.carve(plane, req, discipline)?;
            match plane {
                Plane::Host => host = Some(placement),
                Plane::Device => {
                    if let Some(h) = host.filter(|h| h.len != placement.len) {
                        return Err(MemoryError::InconsistentPlanes {
                            resource: req.name.clone(),
                            host: h.len,
                            device: placement.len,
                        });
                    }
                    device = Some(placement);
                }
            }
            size = size.max(reserved);
        }
        if self.device.is_none() {
            device = host;
        }
        Ok((host, device, size))
    }

    /// Reserve storage for `req` in one plane. Returns the placement and
    /// the bytes reserved for it.
    fn carve(
        &mut self,
        plane: Plane,
        req: &Request,
        discipline: Discipline,
    ) -> Result<(Placement, usize), MemoryError> {
        let alignment = self.config.alignment;
        let logs = self.config.logs_allocations();
        let arena = self.arena_mut(plane)?;
        let (address, len, reserved) = if discipline == Discipline::Stack {
            let reserved = req.probe;
            let address = arena
                .alloc_stack(reserved)
                .map_err(|s| out_of_memory(&req.name, plane, discipline, s))?;
            let len = req.laid_out_at(address)?;
            if len > reserved {
                return Err(MemoryError::AlignmentViolation {
                    resource: req.name.clone(),
                    plane,
                    address,
                    alignment,
                });
            }
            (address, len, reserved)
        } else {
            let start = arena.forward_start();
            let len = req.laid_out_at(start)?;
            let reserved = len.max(req.override_size);
            let address = arena
                .alloc_forward(reserved)
                .map_err(|s| out_of_memory(&req.name, plane, discipline, s))?;
            (address, len, reserved)
        };
        if address % alignment != 0 {
            return Err(MemoryError::AlignmentViolation {
                resource: req.name.clone(),
                plane,
                address,
                alignment,
            });
        }
        if logs {
            debug!(
                resource = %req.name,
                %plane,
                %discipline,
                address,
                size = reserved,
                available = arena.free_bytes(),
                "allocated"
            );
        }
        Ok((Placement::new(address, len, Region::Pool), reserved))
    }

    fn place_alias(&self, req: &Request, target: ResourceId) -> Result<Placed, MemoryError> {
        let t = self.registry.require(target)?;
        if !t.is_allocated() {
            return Err(MemoryError::ReuseTargetUnallocated {
                resource: req.name.clone(),
                target: t.name.clone(),
            });
        }
        let host_only = self.device.is_none();
        let mut placed = [None, None];
        let mut size = 0;
        for (slot, plane) in Plane::ALL.into_iter().enumerate() {
            if !host_only && !req.memory_type.in_plane(plane) {
                continue;
            }
            let tp = t
                .placement(plane)
                .ok_or_else(|| MemoryError::ReuseTargetUnallocated {
                    resource: req.name.clone(),
                    target: t.name.clone(),
                })?;
            let len = req.laid_out_at(tp.address)?;
            if len > t.size {
                return Err(MemoryError::InsufficientReuse {
                    resource: req.name.clone(),
                    target: t.name.clone(),
                    required: len,
                    available: t.size,
                });
            }
            placed[slot] = Some(Placement::new(tp.address, len, tp.region).aliasing(target, t.epoch));
            size = size.max(len);
        }
        if self.config.logs_allocations() {
            debug!(resource = %req.name, target = %t.name, size, available = t.size, "reused");
        }
        Ok((placed[0], placed[1], size))
    }

    fn place_individual(&mut self, id: ResourceId, req: &Request) -> Result<Placed, MemoryError> {
        let len = req.laid_out_at(0)?;
        let reserved = req.probe.max(len);
        self.individual.insert(id, vec![0; reserved]);
        if self.config.logs_allocations() {
            debug!(resource = %req.name, size = reserved, "allocated individually");
        }
        let placement = Placement::new(0, len, Region::Individual(id));
        Ok((Some(placement), Some(placement), reserved))
    }

    /// Replay the size-function of a placed resource at its existing
    /// addresses, checking the result still fits.
    pub fn reset_pointers(&mut self, id: ResourceId) -> Result<(), MemoryError> {
        let r = self.registry.require(id)?;
        if !r.is_allocated() {
            return Err(MemoryError::Unallocated {
                resource: r.name.clone(),
            });
        }
        let mut updated = [None, None];
        for (slot, plane) in Plane::ALL.into_iter().enumerate() {
            let Some(p) = r.placement(plane) else { continue };
            let len = r.laid_out_at(p.address)?;
            if len > r.size {
                return Err(MemoryError::LayoutExceedsAllocation {
                    resource: r.name.clone(),
                    plane,
                    required: len,
                    available: r.size,
                });
            }
            updated[slot] = Some(Placement { len, ..p });
        }
        let r = self.registry.require_mut(id)?;
        r.host = updated[0];
        r.device = updated[1];
        Ok(())
    }

    // ── Release ────────────────────────────────────────────────

    fn release(&mut self, id: ResourceId) {
        let logs = self.config.logs_allocations();
        let Some(r) = self.registry.get_mut(id) else { return };
        if !r.is_allocated() {
            return;
        }
        if logs {
            debug!(resource = %r.name, size = r.size, "freed");
        }
        r.release();
        self.individual.shift_remove(&id);
    }

    /// Drop the storage of one resource. Pool bytes are reclaimed by the
    /// next cursor reset; individually-owned buffers are freed now.
    pub fn free(&mut self, id: ResourceId) -> Result<(), MemoryError> {
        self.registry.require(id)?;
        self.release(id);
        Ok(())
    }

    /// Free every non-permanent resource owned by `owner`.
    pub fn free_processor(&mut self, owner: ProcessorId) {
        let ids: Vec<ResourceId> = self
            .registry
            .iter()
            .filter(|(_, r)| r.owner == owner && !r.is_permanent())
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            self.release(id);
        }
    }

    /// Release all transient memory and reset both planes to the
    /// permanent boundary. Outputs survive unless `clear_outputs` is set;
    /// the forward cursor then restarts above the surviving outputs.
    pub fn clear_allocated(&mut self, clear_outputs: bool) {
        let mut floor = [0usize; 2];
        for id in self.registry.ids() {
            let Some(r) = self.registry.get(id) else { continue };
            if r.is_permanent() {
                continue;
            }
            let survives = !clear_outputs
                && r.is_allocated()
                && r.memory_type.contains(MemoryType::OUTPUT)
                && !r.is_stack();
            if survives {
                for (slot, plane) in Plane::ALL.into_iter().enumerate() {
                    if let Some(p) = r.placement(plane).filter(|p| p.region == Region::Pool) {
                        floor[slot] = floor[slot].max(p.address + r.size);
                    }
                }
                continue;
            }
            self.release(id);
        }
        if self.device.is_none() {
            floor[0] = floor[0].max(floor[1]);
        }
        self.host.reset_transient(floor[0]);
        if let Some(device) = self.device.as_mut() {
            device.reset_transient(floor[1]);
        }
        self.unmanaged.clear();
        self.volatile.close();
        self.frames.clear();
        self.stack_log.clear();
        if self.config.logs_allocations() {
            debug!(clear_outputs, "cleared transient memory");
        }
    }

    /// Drop every placement and the pool. The registry is kept.
    pub fn release_all(&mut self) {
        for (_, r) in self.registry.iter_mut() {
            if r.is_allocated() {
                r.release();
            }
        }
        let alignment = self.config.alignment;
        self.individual.clear();
        self.unmanaged.clear();
        self.frames.clear();
        self.stack_log.clear();
        self.volatile.close();
        self.stack_blocked = false;
        self.backing = Backing::None;
        self.host = PlaneArena::unbacked(Plane::Host, alignment);
        if let Some(device) = self.device.as_mut() {
            *device = PlaneArena::unbacked(Plane::Device, alignment);
        }
    }

    // ── Frames ─────────────────────────────────────────────────

    /// Snapshot the stack cursors under `tag`.
    pub fn push_frame(&mut self, tag: FrameTag) {
        self.frames.push(NonPersistentFrame {
            host_stack: self.host.stack(),
            device_stack: self.device.as_ref().map(PlaneArena::stack),
            stack_mark: self.stack_log.len(),
            tag,
        });
    }

    /// Pop the frame pushed under `tag`, restoring the stack cursors and
    /// releasing every stack allocation made since. Nothing changes if the
    /// frame stack is empty or `tag` is not on top.
    pub fn pop_frame(&mut self, tag: FrameTag) -> Result<(), MemoryError> {
        let frame = self.frames.pop(tag)?;
        self.host.restore_stack(frame.host_stack);
        if let (Some(device), Some(stack)) = (self.device.as_mut(), frame.device_stack) {
            device.restore_stack(stack);
        }
        let released: Vec<ResourceId> = self.stack_log.drain(frame.stack_mark..).collect();
        for id in released {
            self.release(id);
        }
        if self.config.logs_frame_usage() {
            debug!(%tag, usage = %self.usage_report(), "popped frame");
        }
        Ok(())
    }

    // ── Volatile, unmanaged and blocked memory ─────────────────

    /// Reserve `size` bytes of volatile device memory. The first call
    /// opens the region (a zero `size` only opens it); the whole region
    /// is given back by [`return_volatile_device`](Self::return_volatile_device).
    ///
    /// Host-only instances carve the region from the host plane.
    pub fn allocate_volatile_device(&mut self, size: usize) -> Result<Option<Placement>, MemoryError> {
        self.ensure_pool()?;
        let logs = self.config.logs_allocations();
        let forward = self.device_or_host_mut().forward();
        self.volatile.open(forward);
        if size == 0 {
            return Ok(None);
        }
        let arena = self.device_or_host_mut();
        let plane = arena.plane();
        let address = arena
            .alloc_forward(size)
            .map_err(|s| out_of_memory("volatile", plane, Discipline::Volatile, s))?;
        if logs {
            debug!(%plane, address, size, available = arena.free_bytes(), "allocated volatile");
        }
        Ok(Some(Placement::new(address, size, Region::Pool)))
    }

    /// Give the volatile region back. Returns whether one was open.
    pub fn return_volatile_device(&mut self) -> bool {
        let Some(start) = self.volatile.close() else {
            return false;
        };
        self.device_or_host_mut().rewind_forward(start);
        true
    }

    /// Reserve `size` anonymous bytes from `plane`. Reclaimed by the next
    /// [`clear_allocated`](Self::clear_allocated).
    pub fn allocate_unmanaged(&mut self, plane: Plane, size: usize) -> Result<Placement, MemoryError> {
        if plane == Plane::Device && self.device.is_none() {
            return Err(MemoryError::NoDevicePlane {
                operation: "unmanaged device allocation",
            });
        }
        if self.config.strategy == AllocationStrategy::Individual {
            let index = self.unmanaged.len();
            self.unmanaged.push(vec![0; size]);
            return Ok(Placement::new(0, size, Region::Unmanaged(index)));
        }
        self.ensure_pool()?;
        let logs = self.config.logs_allocations();
        let arena = self.arena_mut(plane)?;
        let address = arena
            .alloc_forward(size)
            .map_err(|s| out_of_memory("unmanaged", plane, Discipline::Unmanaged, s))?;
        if logs {
            debug!(%plane, address, size, available = arena.free_bytes(), "allocated unmanaged");
        }
        Ok(Placement::new(address, size, Region::Pool))
    }

    /// Current stack cursors.
    pub fn stack_limits(&self) -> PlaneCursors {
        PlaneCursors {
            host: self.host.stack(),
            device: self.device.as_ref().map(PlaneArena::stack),
        }
    }

    /// Keep the stack below `limits` (another instance's live stack
    /// cursors) until [`unblock_stacked_memory`](Self::unblock_stacked_memory).
    /// Requires an empty frame stack, like unblocking.
    pub fn block_stacked_memory(&mut self, limits: PlaneCursors) -> Result<(), MemoryError> {
        if self.stack_blocked {
            return Err(MemoryError::StackBlocked);
        }
        if !self.frames.is_empty() {
            return Err(MemoryError::FramesOutstanding {
                depth: self.frames.depth(),
            });
        }
        let snapshot = (self.host, self.device);
        let result = self.block_inner(limits);
        match result {
            Ok(()) => self.stack_blocked = true,
            Err(_) => (self.host, self.device) = snapshot,
        }
        result
    }

    fn block_inner(&mut self, limits: PlaneCursors) -> Result<(), MemoryError> {
        self.host
            .block(limits.host)
            .map_err(|s| out_of_memory("blocked stack", Plane::Host, Discipline::Stack, s))?;
        if let (Some(device), Some(limit)) = (self.device.as_mut(), limits.device) {
            device
                .block(limit)
                .map_err(|s| out_of_memory("blocked stack", Plane::Device, Discipline::Stack, s))?;
        }
        Ok(())
    }

    /// Restore the full stack range. Requires an empty frame stack.
    pub fn unblock_stacked_memory(&mut self) -> Result<(), MemoryError> {
        if !self.frames.is_empty() {
            return Err(MemoryError::FramesOutstanding {
                depth: self.frames.depth(),
            });
        }
        self.host.unblock();
        if let Some(device) = self.device.as_mut() {
            device.unblock();
        }
        self.stack_blocked = false;
        Ok(())
    }

    /// Whether stacked memory is blocked.
    pub fn is_stack_blocked(&self) -> bool {
        self.stack_blocked
    }

    // ── Access and statistics ──────────────────────────────────

    /// Placement of `id` in `plane`. Reuse dependents whose target has
    /// released or replaced its storage since the alias was made yield
    /// [`MemoryError::StaleHandle`].
    pub fn placement(&self, id: ResourceId, plane: Plane) -> Result<Option<Placement>, MemoryError> {
        let r = self.registry.require(id)?;
        let Some(p) = r.placement(plane) else {
            return Ok(None);
        };
        if let Some(alias) = p.alias {
            let t = self.registry.require(alias.target)?;
            if t.epoch != alias.epoch || !t.is_allocated() {
                return Err(MemoryError::StaleHandle {
                    resource: r.name.clone(),
                    target: t.name.clone(),
                });
            }
        }
        Ok(Some(p))
    }

    /// Run `f` on the host bytes of `id`.
    pub fn with_host_bytes<R>(
        &mut self,
        id: ResourceId,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, MemoryError> {
        let unallocated = || MemoryError::Unallocated {
            resource: self.registry.get(id).map(|r| r.name.clone()).unwrap_or_default(),
        };
        let p = self.placement(id, Plane::Host)?.ok_or_else(unallocated)?;
        let err = unallocated();
        let range = p.address..p.end();
        let buf = match p.region {
            Region::Pool => return self.backing.storage()?.with_host(range, f),
            Region::Individual(owner) => self.individual.get_mut(&owner),
            Region::Unmanaged(index) => self.unmanaged.get_mut(index),
        };
        let slice = buf.and_then(|b| b.get_mut(range)).ok_or(err)?;
        Ok(f(slice))
    }

    /// Usage of both planes.
    pub fn usage_report(&self) -> MemoryUsage {
        MemoryUsage {
            host: PlaneUsage::from(&self.host),
            device: self.device.as_ref().map(PlaneUsage::from),
            individual: self.individual.values().map(Vec::len).sum(),
            unmanaged: self.unmanaged.iter().map(Vec::len).sum(),
        }
    }

    /// Size record of every registered resource.
    pub fn resource_statistics(&self) -> Vec<ResourceStatistics> {
        self.registry
            .iter()
            .map(|(id, r)| ResourceStatistics {
                id,
                name: r.name.clone(),
                owner: r.owner,
                memory_type: r.memory_type,
                size: r.size,
                allocated: r.is_allocated(),
            })
            .collect()
    }
}

impl MemoryRegistrar for MemoryManager {
    fn register(&mut self, owner: ProcessorId, def: ResourceDef) -> Result<ResourceId, MemoryError> {
        let logs = self.config.logs_allocations();
        let id = self.registry.register(owner, def)?;
        if logs {
            if let Some(r) = self.registry.get(id) {
                debug!(resource = %r.name, %owner, memory_type = %r.memory_type, size = r.size, "registered");
            }
        }
        Ok(id)
    }
}
