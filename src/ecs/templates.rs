//! Entity factories
//!
//! Each function assembles the fixed component set for one concept and hands
//! the entity to the store. Callers only ever keep the returned id.

use crate::battle::properties::{BattleProperties, TeamColor};
use crate::ecs::component::{BonusKind, Component};
use crate::ecs::store::EntityStore;
use crate::ecs::EntityId;
use crate::util::vec3::Vec3;

/// Session entity created for every accepted socket, before login
pub fn client_session(store: &EntityStore) -> EntityId {
    store.create([])
}

/// User entity backing a logged-in connection
pub fn user(store: &EntityStore, username: &str) -> EntityId {
    store.create([Component::Uid { username: username.to_string() }])
}

/// Lobby entity for a matchmaking or arcade battle
pub fn lobby(
    store: &EntityStore,
    properties: &BattleProperties,
    map_entity: EntityId,
) -> EntityId {
    store.create([
        Component::BattleMode { mode: properties.mode },
        Component::MapGroup { map: map_entity },
        Component::UserLimit { max_players: properties.max_players },
        Component::Gravity {
            gravity: properties.gravity,
            force: properties.gravity.force(),
        },
    ])
}

/// Lobby entity for a player-hosted battle; additionally mirrors the full
/// rule set so the host client can edit it.
pub fn custom_lobby(
    store: &EntityStore,
    properties: &BattleProperties,
    map_entity: EntityId,
) -> EntityId {
    let id = lobby(store, properties, map_entity);
    crate::ecs::store::ok_or_log(
        store.add_component(id, Component::ClientBattleParams { properties: properties.clone() }),
        "custom lobby params",
    );
    id
}

/// Battle entity, one per running match
pub fn battle(store: &EntityStore, properties: &BattleProperties) -> EntityId {
    store.create([
        Component::BattleMode { mode: properties.mode },
        Component::UserLimit { max_players: properties.max_players },
    ])
}

/// Round entity carrying per-round timing state
pub fn round(store: &EntityStore) -> EntityId {
    store.create([])
}

/// Per-battle user entity (scoreboard row, team slot)
pub fn battle_user(store: &EntityStore, user: EntityId, team: TeamColor) -> EntityId {
    store.create([
        Component::UserGroup { user },
        Component::Team { color: team },
        Component::Score { score: 0 },
    ])
}

/// Tank hull entity
pub fn tank(
    store: &EntityStore,
    user: EntityId,
    team: TeamColor,
    position: Vec3,
    max_health: f32,
) -> EntityId {
    store.create([
        Component::UserGroup { user },
        Component::Team { color: team },
        Component::Position { position },
        Component::Health { current: max_health, max: max_health },
    ])
}

/// Weapon entity attached to a tank
pub fn weapon(store: &EntityStore, tank: EntityId) -> EntityId {
    store.create([Component::TankGroup { tank }])
}

/// Spawned bonus pickup
pub fn bonus(
    store: &EntityStore,
    kind: BonusKind,
    position: Vec3,
    cooldown_secs: u64,
) -> EntityId {
    store.create([
        Component::BonusConfig { kind, cooldown_secs },
        Component::Position { position },
    ])
}

/// Flag entity for one CTF team
pub fn flag(store: &EntityStore, team: TeamColor, pedestal: Vec3) -> EntityId {
    store.create([
        Component::FlagPedestal { team, position: pedestal },
        Component::Team { color: team },
        Component::Position { position: pedestal },
    ])
}

/// Transient on-screen message; disappears when unshared by its last viewer
pub fn notification(store: &EntityStore, message: &str) -> EntityId {
    store.create_auto_remove([Component::TextNotification { message: message.to_string() }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::ComponentKind;

    #[test]
    fn test_tank_component_set() {
        let store = EntityStore::new();
        let user_id = user(&store, "driver");
        let id = tank(&store, user_id, TeamColor::Red, Vec3::ZERO, 200.0);

        for kind in [
            ComponentKind::UserGroup,
            ComponentKind::Team,
            ComponentKind::Position,
            ComponentKind::Health,
        ] {
            assert!(store.has_component(id, kind), "missing {kind:?}");
        }
    }

    #[test]
    fn test_custom_lobby_carries_params() {
        let store = EntityStore::new();
        let map_entity = store.create([]);
        let properties = crate::game::map::MapRegistry::builtin()
            .default_properties(crate::battle::properties::BattleMode::Dm)
            .expect("builtin maps support DM");
        let id = custom_lobby(&store, &properties, map_entity);
        assert!(store.has_component(id, ComponentKind::ClientBattleParams));
    }
}
