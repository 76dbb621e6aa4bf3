//! Reuse groups: several resources sharing the storage of a primary.

use indexmap::IndexMap;
use recon_core::ResourceId;
use smallvec::SmallVec;

use crate::registry::ResourceRegistry;

/// Group key to members, first member is the primary.
#[derive(Clone, Debug, Default)]
pub struct ReuseGroups {
    groups: IndexMap<u32, SmallVec<[ResourceId; 4]>>,
}

impl ReuseGroups {
    pub(crate) fn join(&mut self, key: u32, id: ResourceId) {
        self.groups.entry(key).or_default().push(id);
    }

    /// Primary of group `key`, if the group exists.
    pub fn primary(&self, key: u32) -> Option<ResourceId> {
        self.groups.get(&key).and_then(|m| m.first().copied())
    }

    /// Members of group `key` in join order; empty for unknown keys.
    pub fn members(&self, key: u32) -> &[ResourceId] {
        self.groups.get(&key).map_or(&[], |m| m.as_slice())
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no group exists.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Iterate over `(key, members)` in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[ResourceId])> {
        self.groups.iter().map(|(k, m)| (*k, m.as_slice()))
    }
}

/// Raise each group primary's override size to the largest probe size
/// among the group's members, so a single allocation of the primary
/// fits every dependent.
pub(crate) fn compute_reuse_max(registry: &mut ResourceRegistry) {
    let updates: SmallVec<[(ResourceId, usize); 8]> = registry
        .reuse_groups()
        .iter()
        .filter_map(|(_, members)| {
            let primary = *members.first()?;
            let max = members
                .iter()
                .filter_map(|id| registry.get(*id))
                .map(|r| r.probe_size())
                .max()?;
            Some((primary, max))
        })
        .collect();
    for (primary, max) in updates {
        if let Some(r) = registry.get_mut(primary) {
            r.override_size = r.override_size.max(max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistrar, ResourceDef};
    use recon_core::{MemoryType, ProcessorId};

    #[test]
    fn members_in_join_order() {
        let mut groups = ReuseGroups::default();
        groups.join(1, ResourceId(4));
        groups.join(1, ResourceId(2));
        groups.join(7, ResourceId(3));
        assert_eq!(groups.primary(1), Some(ResourceId(4)));
        assert_eq!(groups.members(1), &[ResourceId(4), ResourceId(2)]);
        assert_eq!(groups.members(9), &[] as &[ResourceId]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn primary_sized_to_largest_member() {
        let mut reg = ResourceRegistry::new();
        let p = ProcessorId(0);
        let a = reg
            .register(p, ResourceDef::fixed("a", MemoryType::HOST, 16).in_reuse_group(0))
            .unwrap();
        reg.register(p, ResourceDef::fixed("b", MemoryType::HOST, 96).in_reuse_group(0))
            .unwrap();
        reg.register(p, ResourceDef::fixed("c", MemoryType::HOST, 40).in_reuse_group(0))
            .unwrap();
        compute_reuse_max(&mut reg);
        assert_eq!(reg.get(a).unwrap().override_size(), 96);
        assert_eq!(reg.get(a).unwrap().probe_size(), 96);
        // Idempotent.
        compute_reuse_max(&mut reg);
        assert_eq!(reg.get(a).unwrap().override_size(), 96);
    }
}
