//! Battle mode handlers
//!
//! Strategy over the scoring ruleset: deathmatch, team deathmatch and
//! capture the flag. Team modes own balancing and may open the domination
//! window; CTF additionally owns the two flags and their collision protocol.

use std::sync::Arc;

use tracing::warn;

use crate::battle::constants::timing::DOMINATION_MARGIN;
use crate::battle::flag::{Flag, FlagState};
use crate::battle::player::BattlePlayer;
use crate::battle::properties::{BattleMode, BattleProperties, TeamColor};
use crate::battle::{state, Battle};
use crate::ecs::component::Component;
use crate::ecs::store::{ok_or_log, EntityStore};
use crate::ecs::templates;
use crate::ecs::{ConnectionId, EntityId};
use crate::game::map::MapInfo;
use crate::net::connection::UserProfile;
use crate::net::protocol::GameEvent;
use crate::util::vec3::Vec3;

/// Red/blue scoreboard of a team battle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeamScores {
    pub red: u32,
    pub blue: u32,
}

impl TeamScores {
    pub fn add(&mut self, team: TeamColor, points: u32) {
        match team {
            TeamColor::Red => self.red += points,
            TeamColor::Blue => self.blue += points,
            TeamColor::None => {}
        }
    }

    pub fn get(&self, team: TeamColor) -> u32 {
        match team {
            TeamColor::Red => self.red,
            TeamColor::Blue => self.blue,
            TeamColor::None => 0,
        }
    }

    /// Leading team; `None` on a tie
    pub fn leader(&self) -> TeamColor {
        match self.red.cmp(&self.blue) {
            std::cmp::Ordering::Greater => TeamColor::Red,
            std::cmp::Ordering::Less => TeamColor::Blue,
            std::cmp::Ordering::Equal => TeamColor::None,
        }
    }

    pub fn margin(&self) -> u32 {
        self.red.abs_diff(self.blue)
    }
}

/// What the battle loop should do after a mode tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTick {
    Continue,
    /// A score limit was reached
    Finish,
}

/// Strategy over the scoring ruleset
pub enum ModeHandler {
    Dm(DmHandler),
    Tdm(TdmHandler),
    Ctf(CtfHandler),
}

impl ModeHandler {
    pub fn new(store: &EntityStore, properties: &BattleProperties, map: &MapInfo) -> Self {
        match properties.mode {
            BattleMode::Dm => ModeHandler::Dm(DmHandler),
            BattleMode::Tdm => ModeHandler::Tdm(TdmHandler),
            BattleMode::Ctf => ModeHandler::Ctf(CtfHandler::new(store, map)),
        }
    }

    pub fn mode(&self) -> BattleMode {
        match self {
            ModeHandler::Dm(_) => BattleMode::Dm,
            ModeHandler::Tdm(_) => BattleMode::Tdm,
            ModeHandler::Ctf(_) => BattleMode::Ctf,
        }
    }

    /// Per-tick scoring decisions. Returning [`ModeTick::Finish`] lets the
    /// battle finish itself after this lock is released.
    pub fn tick(&mut self, battle: &Battle) -> ModeTick {
        let score_limit = battle.properties.read().score_limit;
        match self {
            ModeHandler::Dm(_) => {
                let top = battle
                    .players()
                    .iter()
                    .filter(|p| !p.is_spectator)
                    .map(|p| p.result().score)
                    .max()
                    .unwrap_or(0);
                if score_limit > 0 && top >= score_limit {
                    return ModeTick::Finish;
                }
            }
            ModeHandler::Tdm(_) | ModeHandler::Ctf(_) => {
                let scores = *battle.scores.lock();
                if score_limit > 0 && scores.red.max(scores.blue) >= score_limit {
                    return ModeTick::Finish;
                }
                if scores.margin() >= DOMINATION_MARGIN {
                    state::try_begin_domination(battle);
                }
            }
        }
        ModeTick::Continue
    }

    /// Build the membership record for a joining tank occupant, balancing
    /// teams in team modes.
    pub fn setup_battle_player(
        &mut self,
        battle: &Battle,
        connection: ConnectionId,
        user: EntityId,
        profile: UserProfile,
    ) -> Arc<BattlePlayer> {
        let team = match self {
            ModeHandler::Dm(_) => TeamColor::None,
            ModeHandler::Tdm(_) | ModeHandler::Ctf(_) => smaller_team(battle),
        };
        BattlePlayer::new(connection, user, profile, team)
    }

    /// A member left the battle proper (still possibly in the lobby).
    /// A carried flag falls where their tank last stood.
    pub fn player_exited(&mut self, battle: &Battle, player: &Arc<BattlePlayer>) {
        if let ModeHandler::Ctf(handler) = self {
            let position = player.with_tank(|tank| tank.position);
            handler.drop_carried_by(battle, player.connection, position);
        }
    }

    /// A member left the lobby entirely
    pub fn remove_battle_player(&mut self, battle: &Battle, player: &Arc<BattlePlayer>) {
        if let ModeHandler::Ctf(handler) = self {
            handler.drop_carried_by(battle, player.connection, None);
        }
    }

    /// Scoreboard order: non-spectators by score, best first
    pub fn sort_players(&self, battle: &Battle) -> Vec<Arc<BattlePlayer>> {
        let mut players: Vec<Arc<BattlePlayer>> = battle
            .players()
            .into_iter()
            .filter(|p| !p.is_spectator)
            .collect();
        players.sort_by_key(|p| std::cmp::Reverse(p.result().score));
        players
    }

    /// Match completion: mode-specific wrap-up, returns the winner
    pub fn on_finished(&mut self, battle: &Battle) -> TeamColor {
        match self {
            ModeHandler::Dm(_) => TeamColor::None,
            ModeHandler::Tdm(_) => battle.scores.lock().leader(),
            ModeHandler::Ctf(handler) => {
                // Flags go home when the match ends
                for flag in &mut handler.flags {
                    if flag.state != FlagState::OnPedestal {
                        flag.return_to_pedestal();
                        reset_flag_position(battle.store(), flag);
                    }
                }
                battle.scores.lock().leader()
            }
        }
    }

    /// Preserve score accounting across a custom battle reconfiguration
    /// where the rulesets are compatible.
    pub fn transfer_parameters(&mut self, battle: &Battle, previous: &ModeHandler) {
        let compatible = self.mode().is_team() == previous.mode().is_team();
        if !compatible {
            *battle.scores.lock() = TeamScores::default();
        }
    }

    /// Entities that must be visible to every battle member (CTF flags)
    pub fn shared_entities(&self) -> Vec<EntityId> {
        match self {
            ModeHandler::Ctf(handler) => handler.flags.iter().map(|flag| flag.entity).collect(),
            _ => Vec::new(),
        }
    }

    /// CTF collision-resolution protocol; a consistency fault elsewhere
    pub fn handle_flag_touch(
        &mut self,
        battle: &Battle,
        player: &Arc<BattlePlayer>,
        flag_entity: EntityId,
    ) {
        match self {
            ModeHandler::Ctf(handler) => handler.handle_touch(battle, player, flag_entity),
            _ => warn!(
                connection = player.connection,
                "Flag touch outside a CTF battle"
            ),
        }
    }

    /// A carrier died or left; their flag falls where they stood
    pub fn drop_flag_of(&mut self, battle: &Battle, carrier: ConnectionId, position: Vec3) {
        if let ModeHandler::Ctf(handler) = self {
            handler.drop_carried_by(battle, carrier, Some(position));
        }
    }
}

/// Team with fewer tank slots filled; ties go red
fn smaller_team(battle: &Battle) -> TeamColor {
    let mut red = 0usize;
    let mut blue = 0usize;
    for player in battle.players() {
        if player.is_spectator {
            continue;
        }
        match player.team() {
            TeamColor::Red => red += 1,
            TeamColor::Blue => blue += 1,
            TeamColor::None => {}
        }
    }
    if blue < red {
        TeamColor::Blue
    } else {
        TeamColor::Red
    }
}

/// Deathmatch: individual scoreboard only
pub struct DmHandler;

/// Team deathmatch: kills feed the team score
pub struct TdmHandler;

/// Capture the flag: team machinery plus two flags
pub struct CtfHandler {
    pub flags: [Flag; 2],
}

impl CtfHandler {
    pub fn new(store: &EntityStore, map: &MapInfo) -> Self {
        let pedestals = map.flags.unwrap_or(crate::game::map::FlagPedestals {
            red: Vec3::new(-50.0, 0.0, 0.0),
            blue: Vec3::new(50.0, 0.0, 0.0),
        });
        let red_entity = templates::flag(store, TeamColor::Red, pedestals.red);
        let blue_entity = templates::flag(store, TeamColor::Blue, pedestals.blue);
        Self {
            flags: [
                Flag::new(TeamColor::Red, pedestals.red, red_entity),
                Flag::new(TeamColor::Blue, pedestals.blue, blue_entity),
            ],
        }
    }

    fn flag_index(&self, entity: EntityId) -> Option<usize> {
        self.flags.iter().position(|flag| flag.entity == entity)
    }

    /// Resolve one tank-flag contact. Ignored unless the battle is running
    /// and the tank is alive; all transitions are distance-gated.
    fn handle_touch(&mut self, battle: &Battle, player: &Arc<BattlePlayer>, flag_entity: EntityId) {
        if !battle.is_active() {
            return;
        }
        let Some((position, alive)) = player.with_tank(|tank| (tank.position, tank.alive)) else {
            return;
        };
        if !alive {
            return;
        }

        let Some(index) = self.flag_index(flag_entity) else {
            warn!(flag_entity, "Touch on an unknown flag entity");
            return;
        };

        let team = player.team();
        let own = self.flags[index].team == team;
        let conn = player.connection;
        let store = battle.store();

        // Every transition is gated on distance to the flag; carried flags
        // are out of range by definition.
        if !self.flags[index].in_touch_range(position) {
            return;
        }

        if own {
            match self.flags[index].state {
                FlagState::OnPedestal => {
                    // Only meaningful when this same tank carries the enemy flag
                    let opposite = 1 - index;
                    if self.flags[opposite].carrier() == Some(conn) {
                        self.flags[opposite].return_to_pedestal();
                        reset_flag_position(store, &self.flags[opposite]);
                        battle.add_team_score(team, 1);
                        store.broadcast(
                            GameEvent::FlagDelivered { team },
                            vec![self.flags[opposite].entity],
                        );
                    }
                }
                FlagState::OnGround { .. } => {
                    self.flags[index].return_to_pedestal();
                    reset_flag_position(store, &self.flags[index]);
                    store.broadcast(GameEvent::FlagReturned { team }, vec![flag_entity]);
                }
                FlagState::Captured { .. } => {}
            }
        } else {
            match self.flags[index].state {
                FlagState::OnPedestal | FlagState::OnGround { .. } => {
                    self.flags[index].capture(conn);
                    ok_or_log(
                        store.replace_component(flag_entity, Component::Position { position }),
                        "captured flag position",
                    );
                    store.broadcast(
                        GameEvent::FlagCaptured { team: self.flags[index].team },
                        vec![flag_entity],
                    );
                }
                FlagState::Captured { .. } => {}
            }
        }
    }

    /// Drop any flag carried by `carrier`. Without a known drop position
    /// (the carrier is already gone) the flag returns home instead.
    fn drop_carried_by(&mut self, battle: &Battle, carrier: ConnectionId, position: Option<Vec3>) {
        for flag in &mut self.flags {
            if flag.carrier() != Some(carrier) {
                continue;
            }
            match position {
                Some(position) => {
                    let ground = battle.settle(position);
                    flag.drop_at(ground);
                    store_flag_drop(battle.store(), flag, ground);
                }
                None => {
                    flag.return_to_pedestal();
                    reset_flag_position(battle.store(), flag);
                    battle
                        .store()
                        .broadcast(GameEvent::FlagReturned { team: flag.team }, vec![flag.entity]);
                }
            }
        }
    }
}

fn store_flag_drop(store: &EntityStore, flag: &Flag, position: Vec3) {
    ok_or_log(
        store.replace_component(flag.entity, Component::Position { position }),
        "dropped flag position",
    );
    store.broadcast(GameEvent::FlagDropped { team: flag.team }, vec![flag.entity]);
}

fn reset_flag_position(store: &EntityStore, flag: &Flag) {
    ok_or_log(
        store.replace_component(flag.entity, Component::Position { position: flag.pedestal }),
        "flag position reset",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::test_support::{embodied_battle, TestBattle};

    fn flag_entities(battle: &Battle) -> Vec<EntityId> {
        battle.flag_entities()
    }

    fn move_tank_to(player: &Arc<BattlePlayer>, position: Vec3) {
        player.with_tank(|tank| tank.position = position);
    }

    #[test]
    fn test_team_balancing_alternates() {
        let TestBattle { battle, players, .. } = embodied_battle(BattleMode::Tdm, 4);
        assert_eq!(battle.players().len(), 4);
        let reds = players.iter().filter(|(p, _)| p.team() == TeamColor::Red).count();
        let blues = players.iter().filter(|(p, _)| p.team() == TeamColor::Blue).count();
        assert_eq!(reds, 2);
        assert_eq!(blues, 2);
    }

    #[test]
    fn test_enemy_capture_from_pedestal() {
        let TestBattle { battle, players, .. } = embodied_battle(BattleMode::Ctf, 2);
        let (red_player, _) = &players[0];
        let (blue_player, _) = &players[1];
        assert_ne!(red_player.team(), blue_player.team());

        let flags = flag_entities(&battle);
        // Red player walks onto the blue pedestal
        let blue_pedestal = battle.map.read().flags.unwrap().blue;
        let red = if red_player.team() == TeamColor::Red { red_player } else { blue_player };
        move_tank_to(red, blue_pedestal);
        battle.handle_flag_touch(red, flags[1]);

        let carrier = battle.with_ctf(|ctf| ctf.flags[1].carrier()).flatten();
        assert_eq!(carrier, Some(red.connection));
    }

    #[test]
    fn test_out_of_range_touch_is_ignored() {
        let TestBattle { battle, players, .. } = embodied_battle(BattleMode::Ctf, 2);
        let (a, _) = &players[0];
        let enemy_flag_index = if a.team() == TeamColor::Red { 1 } else { 0 };
        let flags = flag_entities(&battle);

        move_tank_to(a, Vec3::new(0.0, 0.0, 0.0)); // pedestals are 45+ away
        battle.handle_flag_touch(a, flags[enemy_flag_index]);

        let carrier = battle
            .with_ctf(|ctf| ctf.flags[enemy_flag_index].carrier())
            .flatten();
        assert_eq!(carrier, None);
    }

    #[test]
    fn test_deliver_scores_and_returns_flag() {
        let TestBattle { battle, players, .. } = embodied_battle(BattleMode::Ctf, 2);
        let red = players.iter().map(|(p, _)| p).find(|p| p.team() == TeamColor::Red).unwrap();

        let pedestals = battle.map.read().flags.unwrap();
        let flags = flag_entities(&battle);

        // Red captures blue's flag...
        move_tank_to(red, pedestals.blue);
        battle.handle_flag_touch(red, flags[1]);
        assert_eq!(battle.with_ctf(|c| c.flags[1].carrier()).flatten(), Some(red.connection));

        // ...then touches their own pedestal flag: a scoring delivery
        move_tank_to(red, pedestals.red);
        battle.handle_flag_touch(red, flags[0]);

        assert_eq!(battle.scores.lock().red, 1);
        assert_eq!(
            battle.with_ctf(|c| c.flags[1].state).unwrap(),
            FlagState::OnPedestal
        );
    }

    #[test]
    fn test_ally_touch_without_carry_is_noop() {
        let TestBattle { battle, players, .. } = embodied_battle(BattleMode::Ctf, 2);
        let red = players.iter().map(|(p, _)| p).find(|p| p.team() == TeamColor::Red).unwrap();

        let pedestals = battle.map.read().flags.unwrap();
        let flags = flag_entities(&battle);

        move_tank_to(red, pedestals.red);
        battle.handle_flag_touch(red, flags[0]);

        assert_eq!(battle.scores.lock().red, 0);
        assert_eq!(battle.with_ctf(|c| c.flags[0].state).unwrap(), FlagState::OnPedestal);
    }

    #[test]
    fn test_carrier_death_drops_flag_then_ally_returns_it() {
        let TestBattle { battle, players, .. } = embodied_battle(BattleMode::Ctf, 2);
        let red = players.iter().map(|(p, _)| p).find(|p| p.team() == TeamColor::Red).unwrap();
        let blue = players.iter().map(|(p, _)| p).find(|p| p.team() == TeamColor::Blue).unwrap();

        let pedestals = battle.map.read().flags.unwrap();
        let flags = flag_entities(&battle);

        // Red carries blue's flag
        move_tank_to(red, pedestals.blue);
        battle.handle_flag_touch(red, flags[1]);

        // Carrier dies mid-map
        let death_spot = Vec3::new(10.0, 5.0, 10.0);
        move_tank_to(red, death_spot);
        red.on_killed(&battle, None);

        let state = battle.with_ctf(|c| c.flags[1].state).unwrap();
        match state {
            FlagState::OnGround { position } => assert_eq!(position.y, 0.0),
            other => panic!("flag should be on the ground, was {other:?}"),
        }

        // Blue walks over and returns it
        move_tank_to(blue, Vec3::new(10.0, 0.0, 10.0));
        battle.handle_flag_touch(blue, flags[1]);
        assert_eq!(battle.with_ctf(|c| c.flags[1].state).unwrap(), FlagState::OnPedestal);
    }

    #[test]
    fn test_dead_tank_cannot_touch() {
        let TestBattle { battle, players, .. } = embodied_battle(BattleMode::Ctf, 2);
        let red = players.iter().map(|(p, _)| p).find(|p| p.team() == TeamColor::Red).unwrap();
        let pedestals = battle.map.read().flags.unwrap();
        let flags = flag_entities(&battle);

        move_tank_to(red, pedestals.blue);
        red.with_tank(|tank| tank.alive = false);
        battle.handle_flag_touch(red, flags[1]);

        assert_eq!(battle.with_ctf(|c| c.flags[1].carrier()).flatten(), None);
    }
}
