//! Entity store: the single owner of all entities
//!
//! Every mutation of a shared entity is pushed to exactly the connections
//! currently sharing it, in the order the mutations were performed. Races
//! between unshare and mutate are expected across connections, so dead-id
//! operations surface as [`StoreError::NotFound`] and callers in the core
//! log and continue.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

use crate::ecs::component::{Component, ComponentKind};
use crate::ecs::entity::Entity;
use crate::ecs::{ConnectionId, EntityId};
use crate::net::protocol::{GameEvent, ServerPacket};

/// Errors that can occur on store operations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Entity {0} does not exist")]
    NotFound(EntityId),
    #[error("Entity {entity} already has a {kind:?} component")]
    DuplicateComponent { entity: EntityId, kind: ComponentKind },
    #[error("Entity {entity} has no {kind:?} component")]
    MissingComponent { entity: EntityId, kind: ComponentKind },
}

/// Log a consistency fault and swallow it.
///
/// Unshare-then-mutate races make [`StoreError::NotFound`] a normal
/// occurrence; the operation becomes a no-op.
pub fn ok_or_log<T>(result: Result<T, StoreError>, context: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignored store fault during {}: {}", context, e);
            None
        }
    }
}

/// Process-wide owner of all entities and per-connection outbound sinks
pub struct EntityStore {
    next_id: AtomicU64,
    entities: RwLock<HashMap<EntityId, Entity>>,
    sinks: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerPacket>>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entities: RwLock::new(HashMap::new()),
            sinks: RwLock::new(HashMap::new()),
        }
    }

    /// Next free entity id
    pub fn allocate_id(&self) -> EntityId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create an entity from a fixed component set
    pub fn create(&self, components: impl IntoIterator<Item = Component>) -> EntityId {
        let id = self.allocate_id();
        self.entities.write().insert(id, Entity::new(components));
        id
    }

    /// Create an entity that is deleted once its last sharer unshares
    pub fn create_auto_remove(
        &self,
        components: impl IntoIterator<Item = Component>,
    ) -> EntityId {
        let id = self.allocate_id();
        let mut entity = Entity::new(components);
        entity.auto_remove = true;
        self.entities.write().insert(id, entity);
        id
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.read().contains_key(&id)
    }

    /// Explicitly remove an entity, notifying every sharer of its removal
    pub fn remove(&self, id: EntityId) -> Result<(), StoreError> {
        let mut entities = self.entities.write();
        let entity = entities.remove(&id).ok_or(StoreError::NotFound(id))?;
        let sinks = self.sinks.read();
        for conn in entity.sharers() {
            if let Some(sink) = sinks.get(&conn) {
                let _ = sink.send(ServerPacket::EntityUnshared { entity: id });
            }
        }
        Ok(())
    }

    pub fn component(
        &self,
        id: EntityId,
        kind: ComponentKind,
    ) -> Result<Option<Component>, StoreError> {
        let entities = self.entities.read();
        let entity = entities.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(entity.component(kind).cloned())
    }

    pub fn has_component(&self, id: EntityId, kind: ComponentKind) -> bool {
        self.entities
            .read()
            .get(&id)
            .is_some_and(|entity| entity.has_component(kind))
    }

    /// Add a component; fails if the kind is already present. Overwrite must
    /// go through [`EntityStore::replace_component`].
    pub fn add_component(&self, id: EntityId, component: Component) -> Result<(), StoreError> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let kind = component.kind();
        if !entity.insert_new(component.clone()) {
            return Err(StoreError::DuplicateComponent { entity: id, kind });
        }
        self.push_to_sharers(entity, ServerPacket::ComponentAdded { entity: id, component });
        Ok(())
    }

    pub fn add_component_if_absent(
        &self,
        id: EntityId,
        component: Component,
    ) -> Result<(), StoreError> {
        match self.add_component(id, component) {
            Err(StoreError::DuplicateComponent { .. }) => Ok(()),
            other => other,
        }
    }

    /// Replace an existing component; observers see exactly one change event
    pub fn replace_component(
        &self,
        id: EntityId,
        component: Component,
    ) -> Result<(), StoreError> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let kind = component.kind();
        if entity.replace(component.clone()).is_none() {
            entity.remove(kind);
            return Err(StoreError::MissingComponent { entity: id, kind });
        }
        self.push_to_sharers(entity, ServerPacket::ComponentChanged { entity: id, component });
        Ok(())
    }

    /// Read-modify-replace convenience over [`EntityStore::replace_component`]
    pub fn change_component(
        &self,
        id: EntityId,
        kind: ComponentKind,
        f: impl FnOnce(&mut Component),
    ) -> Result<(), StoreError> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let mut component = entity
            .component(kind)
            .cloned()
            .ok_or(StoreError::MissingComponent { entity: id, kind })?;
        f(&mut component);
        entity.replace(component.clone());
        self.push_to_sharers(entity, ServerPacket::ComponentChanged { entity: id, component });
        Ok(())
    }

    pub fn remove_component(&self, id: EntityId, kind: ComponentKind) -> Result<(), StoreError> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entity.remove(kind).is_none() {
            return Err(StoreError::MissingComponent { entity: id, kind });
        }
        self.push_to_sharers(entity, ServerPacket::ComponentRemoved { entity: id, kind });
        Ok(())
    }

    pub fn remove_component_if_present(
        &self,
        id: EntityId,
        kind: ComponentKind,
    ) -> Result<(), StoreError> {
        match self.remove_component(id, kind) {
            Err(StoreError::MissingComponent { .. }) => Ok(()),
            other => other,
        }
    }

    /// Make an entity visible to a connection. Idempotent; the connection
    /// receives the full current component snapshot.
    pub fn share(&self, id: EntityId, conn: ConnectionId) -> Result<(), StoreError> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !entity.add_sharer(conn) {
            return Ok(());
        }
        let components = entity.snapshot();
        if let Some(sink) = self.sinks.read().get(&conn) {
            let _ = sink.send(ServerPacket::EntityShared { entity: id, components });
        }
        Ok(())
    }

    /// Revoke visibility. Idempotent; the connection is told the whole entity
    /// is gone, not its components one by one.
    pub fn unshare(&self, id: EntityId, conn: ConnectionId) -> Result<(), StoreError> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !entity.remove_sharer(conn) {
            return Ok(());
        }
        if let Some(sink) = self.sinks.read().get(&conn) {
            let _ = sink.send(ServerPacket::EntityUnshared { entity: id });
        }
        if entity.auto_remove && entity.sharer_count() == 0 {
            entities.remove(&id);
        }
        Ok(())
    }

    pub fn is_shared(&self, id: EntityId, conn: ConnectionId) -> bool {
        self.entities
            .read()
            .get(&id)
            .is_some_and(|entity| entity.is_shared_with(conn))
    }

    /// Ids of every entity currently shared with a connection
    pub fn shared_with(&self, conn: ConnectionId) -> Vec<EntityId> {
        self.entities
            .read()
            .iter()
            .filter(|(_, entity)| entity.is_shared_with(conn))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Register the outbound sink of a freshly accepted connection
    pub fn register_sink(&self, conn: ConnectionId, sink: mpsc::UnboundedSender<ServerPacket>) {
        self.sinks.write().insert(conn, sink);
    }

    /// Send an event to one connection, addressed at the given entities
    pub fn send(&self, conn: ConnectionId, event: GameEvent, targets: Vec<EntityId>) {
        if let Some(sink) = self.sinks.read().get(&conn) {
            let _ = sink.send(ServerPacket::Event { event, targets });
        }
    }

    pub fn send_packet(&self, conn: ConnectionId, packet: ServerPacket) {
        if let Some(sink) = self.sinks.read().get(&conn) {
            let _ = sink.send(packet);
        }
    }

    /// Fan an event out to every connection sharing any of the target entities
    pub fn broadcast(&self, event: GameEvent, targets: Vec<EntityId>) {
        let entities = self.entities.read();
        let mut receivers: HashSet<ConnectionId> = HashSet::new();
        for id in &targets {
            if let Some(entity) = entities.get(id) {
                receivers.extend(entity.sharers());
            }
        }
        let sinks = self.sinks.read();
        for conn in receivers {
            if let Some(sink) = sinks.get(&conn) {
                let _ = sink.send(ServerPacket::Event { event: event.clone(), targets: targets.clone() });
            }
        }
    }

    /// Final sweep when a connection goes away: drop its sink, remove it from
    /// every sharer set and delete auto-remove entities left with no sharers.
    pub fn release_connection(&self, conn: ConnectionId) {
        self.sinks.write().remove(&conn);
        let mut entities = self.entities.write();
        let orphaned: Vec<EntityId> = entities
            .iter_mut()
            .filter_map(|(id, entity)| {
                if entity.remove_sharer(conn) && entity.auto_remove && entity.sharer_count() == 0 {
                    Some(*id)
                } else {
                    None
                }
            })
            .collect();
        for id in orphaned {
            entities.remove(&id);
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }

    fn push_to_sharers(&self, entity: &Entity, packet: ServerPacket) {
        let sinks = self.sinks.read();
        for conn in entity.sharers() {
            if let Some(sink) = sinks.get(&conn) {
                let _ = sink.send(packet.clone());
            }
        }
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::properties::TeamColor;

    fn store_with_sink(conn: ConnectionId) -> (EntityStore, mpsc::UnboundedReceiver<ServerPacket>) {
        let store = EntityStore::new();
        let (tx, rx) = mpsc::unbounded_channel();
        store.register_sink(conn, tx);
        (store, rx)
    }

    #[test]
    fn test_add_duplicate_component_fails() {
        let store = EntityStore::new();
        let id = store.create([Component::Health { current: 100.0, max: 100.0 }]);
        let result = store.add_component(id, Component::Health { current: 1.0, max: 1.0 });
        assert_eq!(
            result,
            Err(StoreError::DuplicateComponent { entity: id, kind: ComponentKind::Health })
        );
    }

    #[test]
    fn test_replace_is_single_change_event() {
        let (store, mut rx) = store_with_sink(1);
        let id = store.create([Component::Team { color: TeamColor::Red }]);
        store.share(id, 1).unwrap();
        rx.try_recv().unwrap(); // EntityShared

        store
            .replace_component(id, Component::Team { color: TeamColor::Blue })
            .unwrap();

        match rx.try_recv().unwrap() {
            ServerPacket::ComponentChanged { entity, component } => {
                assert_eq!(entity, id);
                assert_eq!(component, Component::Team { color: TeamColor::Blue });
            }
            other => panic!("unexpected packet {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_share_is_idempotent_and_sends_snapshot() {
        let (store, mut rx) = store_with_sink(1);
        let id = store.create([
            Component::Team { color: TeamColor::Red },
            Component::Health { current: 80.0, max: 100.0 },
        ]);

        store.share(id, 1).unwrap();
        store.share(id, 1).unwrap();

        match rx.try_recv().unwrap() {
            ServerPacket::EntityShared { entity, components } => {
                assert_eq!(entity, id);
                assert_eq!(components.len(), 2);
            }
            other => panic!("unexpected packet {other:?}"),
        }
        // Second share was a no-op
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unshare_notifies_whole_entity_removal() {
        let (store, mut rx) = store_with_sink(1);
        let id = store.create([Component::Team { color: TeamColor::Red }]);
        store.share(id, 1).unwrap();
        rx.try_recv().unwrap();

        store.unshare(id, 1).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerPacket::EntityUnshared { entity } if entity == id
        ));
        // Idempotent
        store.unshare(id, 1).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_mutations_reach_only_current_sharers_in_order() {
        let store = EntityStore::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        store.register_sink(1, tx1);
        store.register_sink(2, tx2);

        let id = store.create([Component::Score { score: 0 }]);
        store.share(id, 1).unwrap();
        rx1.try_recv().unwrap();

        store
            .change_component(id, ComponentKind::Score, |c| {
                if let Component::Score { score } = c {
                    *score += 5;
                }
            })
            .unwrap();
        store
            .change_component(id, ComponentKind::Score, |c| {
                if let Component::Score { score } = c {
                    *score += 5;
                }
            })
            .unwrap();

        let scores: Vec<u32> = std::iter::from_fn(|| rx1.try_recv().ok())
            .map(|p| match p {
                ServerPacket::ComponentChanged {
                    component: Component::Score { score }, ..
                } => score,
                other => panic!("unexpected packet {other:?}"),
            })
            .collect();
        assert_eq!(scores, vec![5, 10]);
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_auto_remove_on_last_unshare() {
        let store = EntityStore::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        store.register_sink(1, tx);
        let id = store.create_auto_remove([Component::TextNotification {
            message: "hello".into(),
        }]);
        store.share(id, 1).unwrap();
        store.unshare(id, 1).unwrap();
        assert!(!store.contains(id));
    }

    #[test]
    fn test_release_connection_sweeps_orphans() {
        let store = EntityStore::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        store.register_sink(1, tx);
        let temp = store.create_auto_remove([Component::RoundRestarting]);
        let durable = store.create([Component::RoundRestarting]);
        store.share(temp, 1).unwrap();
        store.share(durable, 1).unwrap();

        store.release_connection(1);
        assert!(!store.contains(temp));
        assert!(store.contains(durable));
    }

    #[test]
    fn test_dead_id_is_not_found() {
        let store = EntityStore::new();
        assert_eq!(store.share(999, 1), Err(StoreError::NotFound(999)));
        assert!(ok_or_log(store.share(999, 1), "test").is_none());
    }
}
