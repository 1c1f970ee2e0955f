//! Process-wide well-known entities
//!
//! Populated once at startup (the `"maps"` group) and read-only afterwards
//! from the simulation core's point of view. Passed around as an explicit
//! handle; there is no ambient static access.

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::ecs::component::Component;
use crate::ecs::store::EntityStore;
use crate::ecs::EntityId;
use crate::game::map::MapRegistry;

pub const MAPS_GROUP: &str = "maps";

pub struct GlobalEntities {
    groups: RwLock<HashMap<String, Vec<EntityId>>>,
    map_entities: RwLock<HashMap<u32, EntityId>>,
}

impl GlobalEntities {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            map_entities: RwLock::new(HashMap::new()),
        }
    }

    /// Create one entity per known map and publish them under the `"maps"`
    /// group. Called once at startup.
    pub fn seed_maps(&self, store: &EntityStore, maps: &MapRegistry) {
        let mut group = Vec::new();
        let mut by_map_id = self.map_entities.write();
        for map in maps.all() {
            let entity = store.create([
                Component::Uid { username: map.name.clone() },
                Component::UserLimit { max_players: map.max_players },
            ]);
            group.push(entity);
            by_map_id.insert(map.id, entity);
        }
        self.groups.write().insert(MAPS_GROUP.to_string(), group);
    }

    pub fn group(&self, name: &str) -> Vec<EntityId> {
        self.groups.read().get(name).cloned().unwrap_or_default()
    }

    /// Entity representing a map, by map id
    pub fn map_entity(&self, map_id: u32) -> Option<EntityId> {
        self.map_entities.read().get(&map_id).copied()
    }
}

impl Default for GlobalEntities {
    fn default() -> Self {
        Self::new()
    }
}
