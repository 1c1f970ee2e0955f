//! Battle aggregate
//!
//! One [`Battle`] owns everything belonging to one match: properties, map,
//! lifecycle state machine, type and mode handlers, damage processor, bonus
//! processor and the player set. Battles tick concurrently on independent
//! tasks; command handlers on connection execute stages mutate the same
//! state, so the player set and all sub-state sit behind their own locks.

pub mod arcade;
pub mod bonus;
pub mod constants;
pub mod damage;
pub mod flag;
pub mod mode;
pub mod player;
pub mod properties;
pub mod registry;
pub mod state;
pub mod typ;

#[cfg(test)]
pub mod test_support;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use tracing::{error, info, warn};

use crate::battle::arcade::ArcadeKind;
use crate::battle::bonus::BonusProcessor;
use crate::battle::constants::tank as tank_consts;
use crate::battle::damage::DamageProcessor;
use crate::battle::mode::{CtfHandler, ModeHandler, ModeTick, TeamScores};
use crate::battle::player::BattlePlayer;
use crate::battle::properties::{BattleProperties, TeamColor};
use crate::battle::state::{BattleState, StateKind};
use crate::battle::typ::{ArcadeHandler, CustomHandler, MatchmakingHandler, TypeHandler};
use crate::ecs::component::{Component, ComponentKind};
use crate::ecs::store::{ok_or_log, EntityStore};
use crate::ecs::templates;
use crate::ecs::{ConnectionId, EntityId};
use crate::game::context::GameContext;
use crate::game::map::MapInfo;
use crate::game::physics::MapCollision;
use crate::net::connection::Connection;
use crate::net::protocol::GameEvent;
use crate::util::vec3::Vec3;

/// One match instance
pub struct Battle {
    /// Lobby entity; doubles as the battle's public identity
    pub lobby: EntityId,
    pub ctx: Arc<GameContext>,
    pub properties: RwLock<BattleProperties>,
    pub map: RwLock<MapInfo>,
    /// Seconds remaining on the round countdown
    pub(crate) timer: Mutex<f64>,
    pub(crate) state: Mutex<BattleState>,
    pub(crate) domination_started: AtomicBool,
    pub(crate) scores: Mutex<TeamScores>,
    entity_id: AtomicU64,
    round_id: AtomicU64,
    typ: Mutex<TypeHandler>,
    mode: Mutex<ModeHandler>,
    bonus: Mutex<Option<BonusProcessor>>,
    pub damage: DamageProcessor,
    players: RwLock<HashMap<ConnectionId, Arc<BattlePlayer>>>,
    was_players: AtomicBool,
    collision: Mutex<Option<MapCollision>>,
}

impl Battle {
    /// Matchmaking battle: random eligible mode and map
    pub fn matchmaking(ctx: &Arc<GameContext>) -> anyhow::Result<Arc<Self>> {
        let mut rng = rand::thread_rng();
        let mode = arcade::random_mode(&mut rng);
        let map = ctx
            .maps
            .matchmaking_maps(mode)
            .choose(&mut rng)
            .copied()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no matchmaking map supports {mode:?}"))?;
        let mut properties = ctx
            .maps
            .default_properties(mode)
            .ok_or_else(|| anyhow::anyhow!("no matchmaking map supports {mode:?}"))?;
        properties.map_id = map.id;
        properties.max_players = map.max_players;
        Self::create(ctx, properties, map, TypeHandler::Matchmaking(MatchmakingHandler::new()))
    }

    /// Arcade battle of a given flavor
    pub fn arcade(ctx: &Arc<GameContext>, kind: ArcadeKind) -> anyhow::Result<Arc<Self>> {
        let mut rng = rand::thread_rng();
        let (properties, map) = arcade::generate(kind, &ctx.maps, &mut rng)
            .ok_or_else(|| anyhow::anyhow!("no matchmaking map eligible for arcade"))?;
        Self::create(ctx, properties, map, TypeHandler::Arcade(ArcadeHandler::new(kind)))
    }

    /// Player-hosted battle; damage is always on
    pub fn custom(
        ctx: &Arc<GameContext>,
        mut properties: BattleProperties,
        owner: ConnectionId,
    ) -> anyhow::Result<Arc<Self>> {
        properties.damage_enabled = true;
        let map = ctx
            .maps
            .get(properties.map_id)
            .ok_or_else(|| anyhow::anyhow!("unknown map {}", properties.map_id))?
            .clone();
        anyhow::ensure!(map.supports(properties.mode), "map does not support {:?}", properties.mode);
        Self::create(ctx, properties, map, TypeHandler::Custom(CustomHandler::new(owner)))
    }

    pub(crate) fn create(
        ctx: &Arc<GameContext>,
        properties: BattleProperties,
        map: MapInfo,
        typ: TypeHandler,
    ) -> anyhow::Result<Arc<Self>> {
        let store = &ctx.store;
        let map_entity = ctx
            .globals
            .map_entity(map.id)
            .ok_or_else(|| anyhow::anyhow!("map {} has no entity", map.id))?;
        let lobby = if typ.is_custom() {
            templates::custom_lobby(store, &properties, map_entity)
        } else {
            templates::lobby(store, &properties, map_entity)
        };

        // Placeholder only; setup() builds the real handler from properties
        let placeholder_mode = ModeHandler::Dm(mode::DmHandler);
        let battle = Arc::new(Self {
            lobby,
            ctx: ctx.clone(),
            properties: RwLock::new(properties),
            map: RwLock::new(map),
            timer: Mutex::new(0.0),
            state: Mutex::new(BattleState::Waiting),
            domination_started: AtomicBool::new(false),
            scores: Mutex::new(TeamScores::default()),
            entity_id: AtomicU64::new(0),
            round_id: AtomicU64::new(0),
            typ: Mutex::new(typ),
            mode: Mutex::new(placeholder_mode),
            bonus: Mutex::new(None),
            damage: DamageProcessor,
            players: RwLock::new(HashMap::new()),
            was_players: AtomicBool::new(false),
            collision: Mutex::new(None),
        });
        battle.setup();
        info!(battle = battle.lobby, "Battle created");
        Ok(battle)
    }

    /// Build the per-round sub-objects from the current properties: battle
    /// and round entities, mode handler and bonus processor. Also runs on
    /// reconfiguration of a custom battle.
    pub fn setup(&self) {
        let properties = self.properties.read().clone();
        let map = self.map.read().clone();
        let store = self.store();

        let old_entity = self
            .entity_id
            .swap(templates::battle(store, &properties), Ordering::SeqCst);
        let old_round = self.round_id.swap(templates::round(store), Ordering::SeqCst);
        for stale in [old_entity, old_round] {
            if stale != 0 {
                ok_or_log(store.remove(stale), "stale round entity removal");
            }
        }

        let fresh = ModeHandler::new(store, &properties, &map);
        let previous = std::mem::replace(&mut *self.mode.lock(), fresh);
        self.mode.lock().transfer_parameters(self, &previous);
        for stale in previous.shared_entities() {
            ok_or_log(store.remove(stale), "stale flag removal");
        }

        *self.bonus.lock() = if properties.disabled_modules {
            None
        } else {
            Some(BonusProcessor::new(map.bonus_regions(properties.mode)))
        };
    }

    /// Reconfigure a custom battle mid-lobby. Battle and round entities are
    /// rebuilt; compatible score accounting is preserved.
    pub fn update_properties(&self, properties: BattleProperties) {
        if !self.is_custom() {
            error!(battle = self.lobby, "Property update on a non-custom battle");
            return;
        }
        let Some(map) = self.ctx.maps.get(properties.map_id).cloned() else {
            warn!(battle = self.lobby, map = properties.map_id, "Property update with unknown map");
            return;
        };
        if !map.supports(properties.mode) {
            warn!(battle = self.lobby, "Map does not support requested mode");
            return;
        }
        let Some(map_entity) = self.ctx.globals.map_entity(map.id) else {
            warn!(battle = self.lobby, "Map has no global entity");
            return;
        };

        *self.properties.write() = properties.clone();
        *self.map.write() = map;

        let store = self.store();
        for component in [
            Component::MapGroup { map: map_entity },
            Component::BattleMode { mode: properties.mode },
            Component::UserLimit { max_players: properties.max_players },
            Component::Gravity {
                gravity: properties.gravity,
                force: properties.gravity.force(),
            },
            Component::ClientBattleParams { properties: properties.clone() },
        ] {
            ok_or_log(store.replace_component(self.lobby, component), "lobby reconfigure");
        }

        self.setup();
        info!(battle = self.lobby, "Battle reconfigured");
    }

    pub fn store(&self) -> &EntityStore {
        &self.ctx.store
    }

    /// Battle entity id (rebuilt on reconfiguration)
    pub fn entity(&self) -> EntityId {
        self.entity_id.load(Ordering::SeqCst)
    }

    pub fn round(&self) -> EntityId {
        self.round_id.load(Ordering::SeqCst)
    }

    pub fn state_kind(&self) -> StateKind {
        self.state.lock().kind()
    }

    pub fn is_ended(&self) -> bool {
        self.state_kind() == StateKind::Ended
    }

    /// Running, counting the domination sub-state
    pub fn is_active(&self) -> bool {
        matches!(self.state_kind(), StateKind::Running | StateKind::Domination)
    }

    pub fn is_custom(&self) -> bool {
        self.typ.lock().is_custom()
    }

    pub fn is_matchmaking(&self) -> bool {
        self.typ.lock().is_matchmaking()
    }

    pub fn arcade_kind(&self) -> Option<ArcadeKind> {
        self.typ.lock().arcade_kind()
    }

    pub fn owner(&self) -> Option<ConnectionId> {
        self.typ.lock().owner()
    }

    pub fn timer(&self) -> f64 {
        *self.timer.lock()
    }

    pub fn was_players(&self) -> bool {
        self.was_players.load(Ordering::SeqCst)
    }

    pub fn players(&self) -> Vec<Arc<BattlePlayer>> {
        self.players.read().values().cloned().collect()
    }

    pub fn player(&self, conn: ConnectionId) -> Option<Arc<BattlePlayer>> {
        self.players.read().get(&conn).cloned()
    }

    pub fn player_by_tank(&self, tank_entity: EntityId) -> Option<Arc<BattlePlayer>> {
        self.players
            .read()
            .values()
            .find(|p| p.tank_entity() == Some(tank_entity))
            .cloned()
    }

    /// Non-spectator member count
    pub fn tank_slot_count(&self) -> usize {
        self.players.read().values().filter(|p| !p.is_spectator).count()
    }

    /// A battle accepts tank occupants while not ended and under the cap
    pub fn can_add_players(&self) -> bool {
        !self.is_ended() && self.tank_slot_count() < self.properties.read().max_players
    }

    pub fn domination_can_begin(&self) -> bool {
        let timer = self.timer();
        let limit = self.properties.read().time_limit_secs();
        !self.domination_started.load(Ordering::SeqCst) && timer > 120.0 && timer < limit - 60.0
    }

    pub fn add_team_score(&self, team: TeamColor, points: u32) {
        self.scores.lock().add(team, points);
    }

    /// Random spawn point for the current mode, settled onto the ground
    pub fn pick_spawn_point(&self, _team: TeamColor) -> Vec3 {
        let mode = self.properties.read().mode;
        let point = player::pick_spawn(self.map.read().spawn_points(mode));
        self.settle(point)
    }

    /// Snap a point to the ground when the map has a collision mesh
    pub fn settle(&self, position: Vec3) -> Vec3 {
        match *self.collision.lock() {
            Some(collision) => collision.settle(position),
            None => position.with_y(0.0),
        }
    }

    pub fn flag_entities(&self) -> Vec<EntityId> {
        self.mode.lock().shared_entities()
    }

    pub fn with_ctf<T>(&self, f: impl FnOnce(&CtfHandler) -> T) -> Option<T> {
        match &*self.mode.lock() {
            ModeHandler::Ctf(handler) => Some(f(handler)),
            _ => None,
        }
    }

    pub fn handle_flag_touch(&self, player: &Arc<BattlePlayer>, flag_entity: EntityId) {
        self.mode.lock().handle_flag_touch(self, player, flag_entity);
    }

    pub fn drop_flag_of(&self, carrier: ConnectionId, position: Vec3) {
        self.mode.lock().drop_flag_of(self, carrier, position);
    }

    pub fn take_bonus(&self, entity: EntityId, taker: &Arc<BattlePlayer>) {
        let mut bonus = self.bonus.lock();
        match &mut *bonus {
            Some(processor) => processor.take(self, entity, taker),
            None => warn!(battle = self.lobby, "Bonus take in a battle without bonuses"),
        }
    }

    pub fn share_spawned_bonuses(&self, conn: ConnectionId) {
        if let Some(processor) = &*self.bonus.lock() {
            processor.share_spawned_to(self, conn);
        }
    }

    /// Simulation begins: collision context, embodiment, bonus spawning
    pub(crate) fn start(&self) {
        *self.collision.lock() = MapCollision::for_map(&self.map.read());

        for player in self.players() {
            if !player.is_spectator {
                player.init(self);
            }
        }

        if let Some(processor) = &mut *self.bonus.lock() {
            processor.start();
        }
    }

    /// The master tick. Fixed order: mode, type, state, bonuses, players.
    pub fn tick(&self, delta: f64) {
        *self.timer.lock() -= delta;

        let decision = self.mode.lock().tick(self);
        if decision == ModeTick::Finish {
            self.finish();
        }

        self.typ.lock().tick(self);
        state::tick(self);

        if let Some(processor) = &mut *self.bonus.lock() {
            processor.tick(self);
        }

        for player in self.players() {
            player.tick(self);
        }
    }

    /// The only path into `Ended`. Idempotent.
    pub fn finish(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, BattleState::Ended) {
                return;
            }
            *state = BattleState::Ended;
        }
        info!(battle = self.lobby, "Battle finished");

        let winner = self.mode.lock().on_finished(self);
        let players = self.players();

        for player in players.iter().filter(|p| p.in_battle_as_tank()) {
            player.disable_tank(self);
        }

        // Embodied players get the end screen; spectators and players who
        // never embodied are evicted right away.
        for player in players.iter().filter(|p| !p.is_spectator && p.in_battle()) {
            player.on_battle_ended(self, winner);
        }
        for player in players.iter().filter(|p| p.is_spectator || !p.in_battle()) {
            if player.is_spectator {
                self.remove_player(player);
            } else {
                self.remove_player_from_lobby(player);
            }
        }

        ok_or_log(
            self.store()
                .add_component_if_absent(self.round(), Component::RoundRestarting),
            "round restart marker",
        );
    }

    /// Admit a connection, as spectator or prospective tank occupant
    pub fn add_player(self: &Arc<Self>, conn: &Arc<Connection>, spectator: bool) {
        if conn.in_lobby() || (!spectator && !self.can_add_players()) {
            return;
        }
        let Some(user) = conn.user_entity() else {
            warn!(connection = conn.id, "Join attempt before login");
            return;
        };
        let Some(profile) = conn.profile() else {
            return;
        };
        info!(connection = conn.id, battle = self.lobby, spectator, "Joining battle");

        let store = self.store();

        // The joiner sees everyone already fighting
        for other in self.players() {
            if !other.is_spectator {
                ok_or_log(store.share(other.user, conn.id), "share member user");
            }
        }

        let player = if spectator {
            BattlePlayer::spectator(conn.id, user, profile)
        } else {
            ok_or_log(store.share(self.lobby, conn.id), "share lobby");
            ok_or_log(
                store.add_component_if_absent(user, Component::BattleLobbyGroup { lobby: self.lobby }),
                "lobby group",
            );
            ok_or_log(
                store.add_component_if_absent(
                    user,
                    Component::UserEquipment {
                        weapon_id: tank_consts::DEFAULT_WEAPON_ID,
                        hull_id: tank_consts::DEFAULT_HULL_ID,
                    },
                ),
                "equipment",
            );

            // And everyone sees the joiner
            for other in self.players() {
                ok_or_log(store.share(user, other.connection), "share joiner user");
            }

            let player = self
                .mode
                .lock()
                .setup_battle_player(self, conn.id, user, profile);
            self.typ.lock().player_entered(self, &player);
            player
        };

        conn.set_battle(self.clone(), player.clone());
        self.players.write().insert(conn.id, player.clone());
        self.was_players.store(true, Ordering::SeqCst);

        if spectator {
            player.init(self);
        }
    }

    /// Remove a member from the battle proper. Non-spectators may stay in a
    /// custom battle's lobby while still online; everyone else also leaves
    /// the lobby. When only spectators remain afterwards, they are all
    /// kicked and the membership empties.
    pub fn remove_player(&self, player: &Arc<BattlePlayer>) {
        let store = self.store();
        let conn = player.connection;

        ok_or_log(store.unshare(self.entity(), conn), "unshare battle entity");
        ok_or_log(store.unshare(self.round(), conn), "unshare round entity");

        for other in self.players() {
            if other.connection != conn && other.in_battle_as_tank() {
                for entity in other.tank_entities() {
                    ok_or_log(store.unshare(entity, conn), "unshare other tank");
                }
            }
        }

        if let Some(processor) = &*self.bonus.lock() {
            processor.unshare_entities(self, conn);
        }

        if ok_or_log(
            store.remove_component(player.user, ComponentKind::BattleGroup),
            "battle group removal",
        )
        .is_none()
        {
            error!(connection = conn, "User had no battle group on removal");
        }

        self.mode.lock().player_exited(self, player);

        if player.is_spectator {
            if let Some(battle_user) = player.take_battle_user() {
                ok_or_log(store.unshare(battle_user, conn), "unshare battle user");
                ok_or_log(store.remove(battle_user), "battle user removal");
            }
            self.remove_player_from_lobby(player);
        } else {
            for other in self.players() {
                if other.in_battle() {
                    for entity in player.tank_entities() {
                        ok_or_log(store.unshare(entity, other.connection), "unshare leaver tank");
                    }
                }
            }

            player.set_in_battle(false);
            if let Some(tank) = player.take_tank() {
                for entity in tank.entities() {
                    ok_or_log(store.remove(entity), "tank entity removal");
                }
            }
            if let Some(battle_user) = player.take_battle_user() {
                ok_or_log(store.remove(battle_user), "battle user removal");
            }

            let online = self
                .ctx
                .connections
                .get(conn)
                .is_some_and(|c| !c.is_torn_down());
            if !self.is_custom() || !online {
                self.remove_player_from_lobby(player);
            }

            self.mode.lock().sort_players(self);
            self.kick_spectators_if_alone();
        }
    }

    /// Remove a member from the lobby entirely
    pub fn remove_player_from_lobby(&self, player: &Arc<BattlePlayer>) {
        let store = self.store();
        let conn = player.connection;
        info!(connection = conn, battle = self.lobby, "Leaving battle");

        self.players.write().remove(&conn);

        if player.is_spectator {
            for other in self.players() {
                if !other.is_spectator {
                    ok_or_log(store.unshare(other.user, conn), "unshare member from spectator");
                }
            }
        } else {
            self.typ.lock().player_exited(self, player);
            self.mode.lock().remove_battle_player(self, player);

            for kind in [
                ComponentKind::UserEquipment,
                ComponentKind::BattleLobbyGroup,
                ComponentKind::MatchmakingUserReady,
            ] {
                ok_or_log(
                    store.remove_component_if_present(player.user, kind),
                    "lobby component removal",
                );
            }
            ok_or_log(store.unshare(self.lobby, conn), "unshare lobby");

            for other in self.players() {
                ok_or_log(store.unshare(player.user, other.connection), "unshare leaver user");
                ok_or_log(store.unshare(other.user, conn), "unshare member user");
            }

            self.kick_spectators_if_alone();
        }

        if let Some(connection) = self.ctx.connections.get(conn) {
            connection.clear_battle();
        }
    }

    /// Drop this battle's entities from the store once it retires
    pub(crate) fn destroy_entities(&self) {
        let store = self.store();
        for stale in self.flag_entities() {
            ok_or_log(store.remove(stale), "retired flag removal");
        }
        for stale in [self.entity(), self.round(), self.lobby] {
            if stale != 0 {
                ok_or_log(store.remove(stale), "retired battle entity removal");
            }
        }
    }

    /// Last tank gone: every remaining spectator is kicked
    fn kick_spectators_if_alone(&self) {
        let players = self.players();
        if players.is_empty() || !players.iter().all(|p| p.is_spectator) {
            return;
        }
        for spectator in players {
            if let Some(battle_user) = spectator.battle_user() {
                self.store()
                    .send(spectator.connection, GameEvent::KickFromBattle, vec![battle_user]);
            }
            self.remove_player(&spectator);
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::properties::BattleMode;
    use crate::battle::test_support::{
        embodied_battle, join_spectator, running_matchmaking_battle, TestBattle,
    };
    use crate::net::protocol::ServerPacket;

    #[test]
    fn test_ended_battle_accepts_no_players() {
        let TestBattle { battle, .. } = embodied_battle(BattleMode::Dm, 2);
        assert!(battle.can_add_players());
        battle.finish();
        assert!(!battle.can_add_players());
    }

    #[test]
    fn test_finish_is_idempotent() {
        let TestBattle { battle, players, .. } = embodied_battle(BattleMode::Dm, 2);
        battle.finish();
        let deaths_after_first = players[0].0.result().deaths;
        battle.finish();
        assert_eq!(players[0].0.result().deaths, deaths_after_first);
        assert!(battle.is_ended());
    }

    #[test]
    fn test_max_players_bounds_membership() {
        let TestBattle { battle, .. } = embodied_battle(BattleMode::Dm, 2);
        battle.properties.write().max_players = 2;
        assert!(!battle.can_add_players());
    }

    #[test]
    fn test_last_tank_leaving_kicks_spectators() {
        let TestBattle { battle, mut players, .. } = running_matchmaking_battle(BattleMode::Dm, 1);
        let (tank_player, _rx) = players.remove(0);
        let (spectator, mut spec_rx) = join_spectator(&battle, 500, "watcher");

        assert_eq!(battle.players().len(), 2);

        battle.remove_player(&tank_player);

        assert!(battle.players().is_empty(), "membership must empty");
        assert!(!spectator.in_battle());

        let mut kicked = false;
        while let Ok(packet) = spec_rx.try_recv() {
            if matches!(packet, ServerPacket::Event { event: GameEvent::KickFromBattle, .. }) {
                kicked = true;
            }
        }
        assert!(kicked, "spectator must receive a kick notification");
    }

    #[test]
    fn test_update_properties_preserves_team_scores_between_team_modes() {
        let TestBattle { battle, .. } = embodied_battle(BattleMode::Tdm, 2);
        battle.add_team_score(TeamColor::Red, 5);

        let mut properties = battle.properties.read().clone();
        properties.mode = BattleMode::Ctf;
        battle.update_properties(properties);
        assert_eq!(battle.scores.lock().red, 5);

        // Switching to a solo mode drops team accounting
        let mut properties = battle.properties.read().clone();
        properties.mode = BattleMode::Dm;
        battle.update_properties(properties);
        assert_eq!(*battle.scores.lock(), TeamScores::default());
    }

    #[test]
    fn test_update_properties_rebuilds_round_entities() {
        let TestBattle { battle, .. } = embodied_battle(BattleMode::Dm, 1);
        let entity_before = battle.entity();
        let round_before = battle.round();

        let properties = battle.properties.read().clone();
        battle.update_properties(properties);

        assert_ne!(battle.entity(), entity_before);
        assert_ne!(battle.round(), round_before);
    }

    #[test]
    fn test_tick_decrements_timer() {
        let TestBattle { battle, .. } = embodied_battle(BattleMode::Dm, 1);
        let before = battle.timer();
        battle.tick(0.05);
        assert!(battle.timer() < before);
    }

    #[test]
    fn test_score_limit_finishes_battle() {
        let TestBattle { battle, players, .. } = embodied_battle(BattleMode::Dm, 2);
        battle.properties.write().score_limit = 10;
        players[0].0.add_score(&battle, 10);
        battle.tick(0.05);
        assert!(battle.is_ended());
    }
}
