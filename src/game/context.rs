//! Server-wide shared state
//!
//! One [`GameContext`] exists per process. Battles tick on independent tasks
//! and share nothing mutable except what hangs off this context (the entity
//! store above all).

use std::sync::Arc;

use crate::battle::registry::BattleRegistry;
use crate::config::ServerConfig;
use crate::ecs::registry::GlobalEntities;
use crate::ecs::store::EntityStore;
use crate::game::map::MapRegistry;
use crate::game::persistence::{MemoryStore, PlayerStore};
use crate::net::connection::ConnectionManager;

pub struct GameContext {
    pub config: ServerConfig,
    pub store: Arc<EntityStore>,
    pub globals: Arc<GlobalEntities>,
    pub maps: Arc<MapRegistry>,
    pub battles: BattleRegistry,
    pub connections: ConnectionManager,
    pub persistence: Arc<dyn PlayerStore>,
}

impl GameContext {
    pub fn new(config: ServerConfig, persistence: Arc<dyn PlayerStore>) -> Arc<Self> {
        let store = Arc::new(EntityStore::new());
        let globals = Arc::new(GlobalEntities::new());
        let maps = Arc::new(MapRegistry::load_or_builtin(config.maps_path.as_deref()));

        globals.seed_maps(&store, &maps);

        Arc::new(Self {
            config,
            store,
            globals,
            maps,
            battles: BattleRegistry::new(),
            connections: ConnectionManager::new(),
            persistence,
        })
    }

    /// Context with defaults and an in-memory player store
    pub fn for_tests() -> Arc<Self> {
        Self::new(ServerConfig::default(), Arc::new(MemoryStore::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::registry::MAPS_GROUP;

    #[test]
    fn test_context_seeds_map_entities() {
        let ctx = GameContext::for_tests();
        assert!(!ctx.globals.group(MAPS_GROUP).is_empty());
        assert_eq!(ctx.store.entity_count(), ctx.maps.all().len());
    }
}
