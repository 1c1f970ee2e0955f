//! Battle type handlers
//!
//! Strategy over a battle's origin: matchmaking rotation, arcade flavors or
//! a player-hosted custom battle. Each defines join behavior, the waiting
//! room for mid-match joiners, and exit side effects.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::battle::arcade::ArcadeKind;
use crate::battle::player::BattlePlayer;
use crate::battle::state::StateKind;
use crate::battle::Battle;
use crate::ecs::component::{Component, ComponentKind};
use crate::ecs::store::ok_or_log;
use crate::ecs::ConnectionId;
use crate::net::protocol::{unix_now_ms, GameEvent};

/// Strategy over battle origin
pub enum TypeHandler {
    Matchmaking(MatchmakingHandler),
    Arcade(ArcadeHandler),
    Custom(CustomHandler),
}

impl TypeHandler {
    pub fn is_custom(&self) -> bool {
        matches!(self, TypeHandler::Custom(_))
    }

    pub fn is_matchmaking(&self) -> bool {
        matches!(self, TypeHandler::Matchmaking(_))
    }

    pub fn arcade_kind(&self) -> Option<ArcadeKind> {
        match self {
            TypeHandler::Arcade(handler) => Some(handler.kind),
            _ => None,
        }
    }

    pub fn owner(&self) -> Option<ConnectionId> {
        match self {
            TypeHandler::Custom(handler) => Some(handler.owner),
            _ => None,
        }
    }

    pub fn tick(&mut self, battle: &Battle) {
        match self {
            TypeHandler::Matchmaking(handler) => promote_waiting(battle, &mut handler.waiting),
            TypeHandler::Arcade(handler) => promote_waiting(battle, &mut handler.waiting),
            TypeHandler::Custom(_) => {}
        }
    }

    pub fn player_entered(&mut self, battle: &Battle, player: &Arc<BattlePlayer>) {
        match self {
            TypeHandler::Matchmaking(handler) => handler.player_entered(battle, player),
            TypeHandler::Arcade(handler) => handler.player_entered(battle, player),
            TypeHandler::Custom(_) => {}
        }
    }

    pub fn player_exited(&mut self, battle: &Battle, player: &Arc<BattlePlayer>) {
        match self {
            TypeHandler::Matchmaking(handler) => handler.player_exited(battle, player),
            TypeHandler::Arcade(handler) => handler.player_exited(battle, player),
            TypeHandler::Custom(_) => {}
        }
    }
}

/// Embody waiting players whose scheduled join time has elapsed
fn promote_waiting(battle: &Battle, waiting: &mut Vec<ConnectionId>) {
    let now = Instant::now();
    waiting.retain(|&conn| {
        let Some(player) = battle.player(conn) else {
            return false;
        };
        match player.join_time() {
            Some(at) if now >= at => {
                player.init(battle);
                false
            }
            Some(_) => true,
            None => false,
        }
    });
}

/// Schedule a mid-match joiner and tell them when they embody
fn schedule_join(battle: &Battle, player: &Arc<BattlePlayer>, waiting: &mut Vec<ConnectionId>) {
    let delay = crate::battle::constants::timing::JOIN_DELAY;
    player.set_join_time(Some(Instant::now() + delay));
    battle.store().send(
        player.connection,
        GameEvent::MatchmakingJoinTime { at_unix_ms: unix_now_ms() + delay.as_millis() as u64 },
        vec![player.user],
    );
    waiting.push(player.connection);
}

/// Matchmaking rotation battle
#[derive(Default)]
pub struct MatchmakingHandler {
    waiting: Vec<ConnectionId>,
}

impl MatchmakingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn player_entered(&mut self, battle: &Battle, player: &Arc<BattlePlayer>) {
        ok_or_log(
            battle
                .store()
                .add_component_if_absent(player.user, Component::MatchmakingUser),
            "matchmaking marker",
        );

        if matches!(battle.state_kind(), StateKind::WarmUp | StateKind::Running) {
            schedule_join(battle, player, &mut self.waiting);
        }
    }

    /// Exit accounting: the desertion streak increments only when the leaver
    /// still had live enemies and the battle had not ended; it decays when a
    /// long enough series of battles is finished cleanly, and probation
    /// (`need_good_battles`) counts down one per completed battle.
    fn player_exited(&mut self, battle: &Battle, player: &Arc<BattlePlayer>) {
        self.waiting.retain(|&conn| conn != player.connection);
        ok_or_log(
            battle
                .store()
                .remove_component_if_present(player.user, ComponentKind::MatchmakingUser),
            "matchmaking marker removal",
        );

        let connection = battle.ctx.connections.get(player.connection);
        let series = connection
            .as_ref()
            .map(|c| c.battle_series.load(Ordering::SeqCst))
            .unwrap_or(0);

        let battle_ended = battle.state_kind() == StateKind::Ended;
        let team = player.team();
        let has_enemies = battle.players().iter().any(|other| {
            other.connection != player.connection
                && other.in_battle_as_tank()
                && (team == crate::battle::properties::TeamColor::None || other.team() != team)
        });

        let mut record = match battle.ctx.persistence.load_or_create(&player.profile.username) {
            Ok(record) => record,
            Err(e) => {
                warn!(player = %player.profile.username, "Failed to load desertion record: {e}");
                return;
            }
        };

        let mut lefts = record.deserted_battles;
        let mut need_good = record.need_good_battles;

        if battle_ended {
            if need_good > 0 {
                need_good -= 1;
                if need_good == 0 {
                    lefts = 0;
                }
            } else if lefts > 0 && series >= 3 {
                lefts -= 1;
            }
        } else if has_enemies {
            if let Some(connection) = &connection {
                connection.battle_series.store(0, Ordering::SeqCst);
            }
            lefts += 1;
            if lefts >= 3 {
                if need_good > 0 {
                    need_good += lefts / 2;
                } else {
                    need_good = 3;
                }
            }
        }

        record.deserted_battles = lefts;
        record.need_good_battles = need_good;
        if let Err(e) = battle.ctx.persistence.save(&record) {
            warn!(player = %player.profile.username, "Failed to save desertion record: {e}");
        }
    }
}

/// Arcade battle; wraps one of the arcade flavors
pub struct ArcadeHandler {
    pub kind: ArcadeKind,
    waiting: Vec<ConnectionId>,
}

impl ArcadeHandler {
    pub fn new(kind: ArcadeKind) -> Self {
        Self { kind, waiting: Vec::new() }
    }

    fn player_entered(&mut self, battle: &Battle, player: &Arc<BattlePlayer>) {
        ok_or_log(
            battle
                .store()
                .add_component_if_absent(player.user, Component::MatchmakingUser),
            "matchmaking marker",
        );

        // Arcade only uses the waiting room mid-match
        if battle.state_kind() == StateKind::Running {
            schedule_join(battle, player, &mut self.waiting);
        }
    }

    fn player_exited(&mut self, battle: &Battle, player: &Arc<BattlePlayer>) {
        self.waiting.retain(|&conn| conn != player.connection);
        ok_or_log(
            battle
                .store()
                .remove_component_if_present(player.user, ComponentKind::MatchmakingUser),
            "matchmaking marker removal",
        );
    }
}

/// Player-hosted battle
pub struct CustomHandler {
    pub owner: ConnectionId,
}

impl CustomHandler {
    pub fn new(owner: ConnectionId) -> Self {
        Self { owner }
    }
}
