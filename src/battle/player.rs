//! Battle membership and tanks
//!
//! A [`BattlePlayer`] binds one connection to one battle, as a spectator or
//! a tank occupant. All cross-references are by id; the battle's player map
//! is the only owner of these records besides the connection handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{info, warn};

use crate::battle::constants::{score, tank as tank_consts};
use crate::battle::properties::TeamColor;
use crate::battle::Battle;
use crate::ecs::component::{Component, ComponentKind};
use crate::ecs::store::ok_or_log;
use crate::ecs::templates;
use crate::ecs::{ConnectionId, EntityId};
use crate::net::connection::UserProfile;
use crate::net::protocol::GameEvent;
use crate::util::vec3::Vec3;

/// Per-battle outcome counters of one player
#[derive(Debug, Clone, Copy, Default)]
pub struct UserResult {
    pub kills: u32,
    pub deaths: u32,
    pub score: u32,
    pub bonuses_taken: u32,
}

/// One embodied tank: hull + weapon entities and their live combat state
#[derive(Debug)]
pub struct BattleTank {
    pub entity: EntityId,
    pub weapon: EntityId,
    pub team: TeamColor,
    pub health: f32,
    pub max_health: f32,
    pub position: Vec3,
    pub orientation: f32,
    pub alive: bool,
    pub respawn_at: Option<Instant>,
    pub dealt_damage: f32,
    pub taken_damage: f32,
    /// Summed non-fatal damage per source, spent as assist credit on death
    pub kill_assistants: FxHashMap<ConnectionId, f32>,
}

impl BattleTank {
    pub fn entities(&self) -> SmallVec<[EntityId; 2]> {
        SmallVec::from_slice(&[self.entity, self.weapon])
    }

    pub fn is_enemy(&self, other: &BattleTank) -> bool {
        self.team == TeamColor::None || other.team == TeamColor::None || self.team != other.team
    }
}

/// One connection's membership in one battle
pub struct BattlePlayer {
    pub connection: ConnectionId,
    pub user: EntityId,
    pub profile: UserProfile,
    pub is_spectator: bool,
    team: Mutex<TeamColor>,
    battle_user: Mutex<Option<EntityId>>,
    tank: Mutex<Option<BattleTank>>,
    in_battle: AtomicBool,
    /// Scheduled embodiment time for mid-match joiners
    join_time: Mutex<Option<Instant>>,
    result: Mutex<UserResult>,
}

impl BattlePlayer {
    pub fn new(
        connection: ConnectionId,
        user: EntityId,
        profile: UserProfile,
        team: TeamColor,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection,
            user,
            profile,
            is_spectator: false,
            team: Mutex::new(team),
            battle_user: Mutex::new(None),
            tank: Mutex::new(None),
            in_battle: AtomicBool::new(false),
            join_time: Mutex::new(None),
            result: Mutex::new(UserResult::default()),
        })
    }

    pub fn spectator(connection: ConnectionId, user: EntityId, profile: UserProfile) -> Arc<Self> {
        Arc::new(Self {
            connection,
            user,
            profile,
            is_spectator: true,
            team: Mutex::new(TeamColor::None),
            battle_user: Mutex::new(None),
            tank: Mutex::new(None),
            in_battle: AtomicBool::new(false),
            join_time: Mutex::new(None),
            result: Mutex::new(UserResult::default()),
        })
    }

    pub fn team(&self) -> TeamColor {
        *self.team.lock()
    }

    pub fn set_team(&self, team: TeamColor) {
        *self.team.lock() = team;
    }

    pub fn battle_user(&self) -> Option<EntityId> {
        *self.battle_user.lock()
    }

    /// Actively inside the battle (embodied tank or watching spectator)
    pub fn in_battle(&self) -> bool {
        self.in_battle.load(Ordering::SeqCst)
    }

    pub fn set_in_battle(&self, value: bool) {
        self.in_battle.store(value, Ordering::SeqCst);
    }

    pub fn in_battle_as_tank(&self) -> bool {
        self.in_battle() && self.tank.lock().is_some()
    }

    pub fn join_time(&self) -> Option<Instant> {
        *self.join_time.lock()
    }

    pub fn set_join_time(&self, at: Option<Instant>) {
        *self.join_time.lock() = at;
    }

    pub fn result(&self) -> UserResult {
        *self.result.lock()
    }

    /// Run a closure against the tank, if embodied
    pub fn with_tank<T>(&self, f: impl FnOnce(&mut BattleTank) -> T) -> Option<T> {
        self.tank.lock().as_mut().map(f)
    }

    pub fn tank_entities(&self) -> SmallVec<[EntityId; 2]> {
        self.tank
            .lock()
            .as_ref()
            .map(|tank| tank.entities())
            .unwrap_or_default()
    }

    pub fn tank_entity(&self) -> Option<EntityId> {
        self.tank.lock().as_ref().map(|tank| tank.entity)
    }

    pub fn has_tank(&self) -> bool {
        self.tank.lock().is_some()
    }

    pub fn take_tank(&self) -> Option<BattleTank> {
        self.tank.lock().take()
    }

    pub fn take_battle_user(&self) -> Option<EntityId> {
        self.battle_user.lock().take()
    }

    /// Embody this player in the battle.
    ///
    /// Spectators only get the battle-level view; tank occupants get a tank
    /// entity pair, a scoreboard row, and full cross-sharing with everyone
    /// already in battle. Idempotent: a second init is a no-op.
    pub fn init(self: &Arc<Self>, battle: &Battle) {
        if self.in_battle() {
            return;
        }
        let store = battle.store();
        let conn = self.connection;

        ok_or_log(store.share(battle.entity(), conn), "share battle entity");
        ok_or_log(store.share(battle.round(), conn), "share round entity");

        let team = self.team();
        let battle_user = templates::battle_user(store, self.user, team);
        *self.battle_user.lock() = Some(battle_user);
        ok_or_log(store.share(battle_user, conn), "share battle user");
        ok_or_log(
            store.add_component_if_absent(self.user, Component::BattleGroup { battle: battle.entity() }),
            "battle group on user",
        );

        for flag in battle.flag_entities() {
            ok_or_log(store.share(flag, conn), "share flag");
        }

        if self.is_spectator {
            self.set_in_battle(true);
            return;
        }

        let spawn = battle.pick_spawn_point(team);
        let tank_entity = templates::tank(store, self.user, team, spawn, tank_consts::MAX_HEALTH);
        let weapon_entity = templates::weapon(store, tank_entity);
        *self.tank.lock() = Some(BattleTank {
            entity: tank_entity,
            weapon: weapon_entity,
            team,
            health: tank_consts::MAX_HEALTH,
            max_health: tank_consts::MAX_HEALTH,
            position: spawn,
            orientation: 0.0,
            alive: true,
            respawn_at: None,
            dealt_damage: 0.0,
            taken_damage: 0.0,
            kill_assistants: FxHashMap::default(),
        });

        // Cross-share tanks with everyone already embodied
        for other in battle.players() {
            if other.connection == conn || !other.in_battle() {
                continue;
            }
            for entity in self.tank_entities() {
                ok_or_log(store.share(entity, other.connection), "share new tank");
            }
            ok_or_log(store.share(battle_user, other.connection), "share new battle user");
            for entity in other.tank_entities() {
                ok_or_log(store.share(entity, conn), "share existing tank");
            }
            if let Some(other_battle_user) = other.battle_user() {
                ok_or_log(store.share(other_battle_user, conn), "share existing battle user");
            }
        }
        for entity in self.tank_entities() {
            ok_or_log(store.share(entity, conn), "share own tank");
        }

        battle.share_spawned_bonuses(conn);

        self.set_in_battle(true);
        self.set_join_time(None);
        info!(connection = conn, battle = battle.lobby, "Player embodied as tank");
    }

    /// Per-tick upkeep: respawn once the delay elapses
    pub fn tick(self: &Arc<Self>, battle: &Battle) {
        let respawn_due = self
            .tank
            .lock()
            .as_ref()
            .and_then(|tank| tank.respawn_at)
            .is_some_and(|at| Instant::now() >= at);
        if respawn_due {
            self.respawn(battle);
        }
    }

    fn respawn(&self, battle: &Battle) {
        let store = battle.store();
        let team = self.team();
        let spawn = battle.pick_spawn_point(team);
        let Some((entity, health)) = self.with_tank(|tank| {
            tank.alive = true;
            tank.respawn_at = None;
            tank.health = tank.max_health;
            tank.position = spawn;
            (tank.entity, tank.max_health)
        }) else {
            return;
        };
        ok_or_log(
            store.replace_component(entity, Component::Health { current: health, max: health }),
            "respawn health",
        );
        ok_or_log(
            store.replace_component(entity, Component::Position { position: spawn }),
            "respawn position",
        );
    }

    /// Death accounting. `killer` is `None` for self-destructs and
    /// unattributed (environmental) kills.
    pub fn on_killed(self: &Arc<Self>, battle: &Battle, killer: Option<&Arc<BattlePlayer>>) {
        let Some((position, assistants)) = self.with_tank(|tank| {
            tank.alive = false;
            tank.respawn_at = Some(Instant::now() + tank_consts::RESPAWN_DELAY);
            (tank.position, std::mem::take(&mut tank.kill_assistants))
        }) else {
            warn!(connection = self.connection, "Kill on player without tank");
            return;
        };

        self.result.lock().deaths += 1;

        if let Some(killer) = killer {
            killer.add_score(battle, score::KILL);
            killer.result.lock().kills += 1;
            if battle.properties.read().mode == crate::battle::properties::BattleMode::Tdm {
                battle.add_team_score(killer.team(), 1);
            }
            for (assistant, _damage) in assistants {
                if assistant == killer.connection {
                    continue;
                }
                if let Some(player) = battle.player(assistant) {
                    player.add_score(battle, score::ASSIST);
                }
            }
        }

        // Tank lock is released; the mode handler may take tank locks itself
        battle.drop_flag_of(self.connection, position);
    }

    /// Score credit, mirrored onto the scoreboard entity
    pub fn add_score(&self, battle: &Battle, points: u32) {
        self.result.lock().score += points;
        if let Some(battle_user) = self.battle_user() {
            ok_or_log(
                battle.store().change_component(battle_user, ComponentKind::Score, |c| {
                    if let Component::Score { score } = c {
                        *score += points;
                    }
                }),
                "score update",
            );
        }
    }

    /// Forcibly stop the tank at battle end
    pub fn disable_tank(&self, battle: &Battle) {
        let entity = self.with_tank(|tank| {
            tank.alive = false;
            tank.respawn_at = None;
            tank.entity
        });
        if let Some(entity) = entity {
            ok_or_log(
                battle.store().replace_component(
                    entity,
                    Component::Health { current: 0.0, max: tank_consts::MAX_HEALTH },
                ),
                "disable tank",
            );
        }
    }

    /// End-of-match notification and reward side effects
    pub fn on_battle_ended(self: &Arc<Self>, battle: &Battle, winner: TeamColor) {
        let store = battle.store();
        store.send(
            self.connection,
            GameEvent::BattleEnded { winner },
            vec![battle.entity()],
        );

        if self.is_spectator {
            return;
        }

        if let Some(conn) = battle.ctx.connections.get(self.connection) {
            conn.battle_series.fetch_add(1, Ordering::SeqCst);
        }

        let result = self.result();
        let row = crate::game::persistence::StatisticsRow {
            kills: result.kills,
            deaths: result.deaths,
            score: result.score,
            bonuses_taken: result.bonuses_taken,
        };
        if let Err(e) = battle.ctx.persistence.upsert_statistics(self.profile.id, &row) {
            warn!(player = %self.profile.username, "Failed to persist battle statistics: {e}");
        }
        let record = battle
            .ctx
            .persistence
            .load_or_create(&self.profile.username)
            .map(|mut record| {
                record.battles_played += 1;
                record.experience += u64::from(result.score);
                record
            });
        match record {
            Ok(record) => {
                if let Err(e) = battle.ctx.persistence.save(&record) {
                    warn!(player = %self.profile.username, "Failed to save player record: {e}");
                }
            }
            Err(e) => warn!(player = %self.profile.username, "Failed to load player record: {e}"),
        }
    }

    pub fn note_bonus_taken(&self) {
        self.result.lock().bonuses_taken += 1;
    }

    /// Record a non-fatal hit for later assist credit
    pub fn note_assist_damage(&self, source: ConnectionId, value: f32) {
        self.with_tank(|tank| {
            *tank.kill_assistants.entry(source).or_insert(0.0) += value;
        });
    }
}

/// Random spawn point choice, shared by init and respawn
pub fn pick_spawn(points: &[Vec3]) -> Vec3 {
    points
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(Vec3::ZERO)
}
