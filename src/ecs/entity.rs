use hashbrown::HashSet;
use rustc_hash::FxHashMap;

use crate::ecs::component::{Component, ComponentKind};
use crate::ecs::ConnectionId;

/// One entity record inside the store: a type-keyed component bag plus the
/// set of connections it is currently shared with.
#[derive(Debug, Default)]
pub struct Entity {
    components: FxHashMap<ComponentKind, Component>,
    sharers: HashSet<ConnectionId>,
    /// Deleted automatically once the last sharer unshares
    pub auto_remove: bool,
}

impl Entity {
    pub fn new(components: impl IntoIterator<Item = Component>) -> Self {
        let mut bag = FxHashMap::default();
        for component in components {
            bag.insert(component.kind(), component);
        }
        Self {
            components: bag,
            sharers: HashSet::new(),
            auto_remove: false,
        }
    }

    pub fn component(&self, kind: ComponentKind) -> Option<&Component> {
        self.components.get(&kind)
    }

    pub fn has_component(&self, kind: ComponentKind) -> bool {
        self.components.contains_key(&kind)
    }

    /// Insert a component that must not already exist. Returns false when the
    /// kind is already present (the caller treats that as a duplicate fault).
    pub fn insert_new(&mut self, component: Component) -> bool {
        let kind = component.kind();
        if self.components.contains_key(&kind) {
            return false;
        }
        self.components.insert(kind, component);
        true
    }

    /// Replace (or insert) a component, returning the previous value
    pub fn replace(&mut self, component: Component) -> Option<Component> {
        self.components.insert(component.kind(), component)
    }

    pub fn remove(&mut self, kind: ComponentKind) -> Option<Component> {
        self.components.remove(&kind)
    }

    /// Snapshot of the full component set, for share-time transfer
    pub fn snapshot(&self) -> Vec<Component> {
        self.components.values().cloned().collect()
    }

    pub fn sharers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.sharers.iter().copied()
    }

    pub fn is_shared_with(&self, conn: ConnectionId) -> bool {
        self.sharers.contains(&conn)
    }

    /// Returns true if the connection was not a sharer before
    pub fn add_sharer(&mut self, conn: ConnectionId) -> bool {
        self.sharers.insert(conn)
    }

    /// Returns true if the connection was a sharer before
    pub fn remove_sharer(&mut self, conn: ConnectionId) -> bool {
        self.sharers.remove(&conn)
    }

    pub fn sharer_count(&self) -> usize {
        self.sharers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::properties::TeamColor;

    #[test]
    fn test_insert_new_rejects_duplicate_kind() {
        let mut entity = Entity::new([Component::Health { current: 50.0, max: 100.0 }]);
        assert!(!entity.insert_new(Component::Health { current: 10.0, max: 10.0 }));
        // Original value untouched
        assert_eq!(
            entity.component(ComponentKind::Health),
            Some(&Component::Health { current: 50.0, max: 100.0 })
        );
    }

    #[test]
    fn test_replace_returns_previous() {
        let mut entity = Entity::new([Component::Team { color: TeamColor::Red }]);
        let previous = entity.replace(Component::Team { color: TeamColor::Blue });
        assert_eq!(previous, Some(Component::Team { color: TeamColor::Red }));
    }

    #[test]
    fn test_sharer_set_is_idempotent() {
        let mut entity = Entity::default();
        assert!(entity.add_sharer(7));
        assert!(!entity.add_sharer(7));
        assert_eq!(entity.sharer_count(), 1);
        assert!(entity.remove_sharer(7));
        assert!(!entity.remove_sharer(7));
    }
}
