//! Execute-stage command handlers
//!
//! Commands run synchronously against mutable game state. A failing command
//! is a command fault: the pipeline logs the error and keeps going; neither
//! the connection nor the battle is affected.

use std::sync::Arc;

use anyhow::{bail, Context};

use crate::battle::damage::{CalculatedDamage, DamageKind};
use crate::battle::properties::TeamColor;
use crate::battle::state::StateKind;
use crate::battle::{registry, state, Battle};
use crate::ecs::component::Component;
use crate::ecs::store::ok_or_log;
use crate::ecs::templates;
use crate::game::context::GameContext;
use crate::net::connection::{Connection, UserProfile};
use crate::net::protocol::{unix_now_ms, ClientCommand, ServerPacket};

pub fn execute(
    command: ClientCommand,
    ctx: &Arc<GameContext>,
    conn: &Arc<Connection>,
) -> anyhow::Result<()> {
    match command {
        ClientCommand::Login { username } => login(ctx, conn, &username),

        ClientCommand::Ping { client_ms } => {
            conn.touch();
            conn.push(ServerPacket::Pong { client_ms, server_unix_ms: unix_now_ms() });
            Ok(())
        }

        ClientCommand::CreateCustomBattle { properties } => {
            anyhow::ensure!(conn.is_logged_in(), "not logged in");
            anyhow::ensure!(!conn.in_lobby(), "already in a battle");
            let battle = Battle::custom(ctx, properties, conn.id)?;
            ctx.battles.insert(battle.clone());
            registry::spawn_tick_loop(ctx.clone(), battle.clone());
            battle.add_player(conn, false);
            Ok(())
        }

        ClientCommand::EnterMatchmaking => {
            anyhow::ensure!(conn.is_logged_in(), "not logged in");
            let battle = match ctx.battles.find_matchmaking() {
                Some(battle) => battle,
                None => {
                    let battle = Battle::matchmaking(ctx)?;
                    ctx.battles.insert(battle.clone());
                    registry::spawn_tick_loop(ctx.clone(), battle.clone());
                    battle
                }
            };
            battle.add_player(conn, false);
            Ok(())
        }

        ClientCommand::EnterArcade { kind } => {
            anyhow::ensure!(conn.is_logged_in(), "not logged in");
            let battle = match ctx.battles.find_arcade(kind) {
                Some(battle) => battle,
                None => {
                    let battle = Battle::arcade(ctx, kind)?;
                    ctx.battles.insert(battle.clone());
                    registry::spawn_tick_loop(ctx.clone(), battle.clone());
                    battle
                }
            };
            battle.add_player(conn, false);
            Ok(())
        }

        ClientCommand::EnterBattle { lobby, spectator } => {
            let battle = ctx.battles.get(lobby).context("no such battle")?;
            battle.add_player(conn, spectator);
            Ok(())
        }

        ClientCommand::StartBattle => {
            let (battle, _) = conn.battle().context("not in a battle")?;
            anyhow::ensure!(battle.owner() == Some(conn.id), "only the host can start");
            anyhow::ensure!(
                battle.state_kind() == StateKind::Waiting,
                "battle already started"
            );
            state::begin_warmup(&battle);
            Ok(())
        }

        ClientCommand::Ready => {
            let user = conn.user_entity().context("not logged in")?;
            ok_or_log(
                ctx.store
                    .add_component_if_absent(user, Component::MatchmakingUserReady),
                "ready marker",
            );
            Ok(())
        }

        ClientCommand::ExitBattle => {
            let (battle, player) = conn.battle().context("not in a battle")?;
            if player.in_battle_as_tank() || player.is_spectator {
                battle.remove_player(&player);
            } else {
                battle.remove_player_from_lobby(&player);
            }
            Ok(())
        }

        ClientCommand::Move { position, orientation } => {
            let (battle, player) = conn.battle().context("not in a battle")?;
            let entity = player
                .with_tank(|tank| {
                    tank.position = position;
                    tank.orientation = orientation;
                    tank.entity
                })
                .context("no tank to move")?;
            ok_or_log(
                battle
                    .store()
                    .replace_component(entity, Component::Position { position }),
                "move",
            );
            Ok(())
        }

        ClientCommand::Fire { target, hit_point, value, critical, back_hit, turret_hit } => {
            let (battle, player) = conn.battle().context("not in a battle")?;
            anyhow::ensure!(battle.is_active(), "battle is not running");
            anyhow::ensure!(battle.properties.read().damage_enabled, "damage is disabled");
            anyhow::ensure!(
                player.with_tank(|tank| tank.alive).unwrap_or(false),
                "shooter has no live tank"
            );

            let target_player = battle.player_by_tank(target).context("unknown target tank")?;
            if !target_player.with_tank(|tank| tank.alive).unwrap_or(false) {
                return Ok(()); // already dead; stale shot
            }

            let friendly = player.team() != TeamColor::None
                && player.team() == target_player.team();
            if friendly && !battle.properties.read().friendly_fire {
                return Ok(());
            }

            let weapon = player.tank_entities().get(1).copied().context("no weapon")?;
            battle.damage.damage_attributed(
                &battle,
                &player,
                &target_player,
                weapon,
                CalculatedDamage {
                    hit_point,
                    value,
                    is_critical: critical,
                    is_back_hit: back_hit,
                    is_turret_hit: turret_hit,
                },
            );
            Ok(())
        }

        ClientCommand::SelfDestruct => {
            let (battle, player) = conn.battle().context("not in a battle")?;
            anyhow::ensure!(battle.is_active(), "battle is not running");
            let Some((health, position, alive)) =
                player.with_tank(|tank| (tank.health, tank.position, tank.alive))
            else {
                bail!("no tank to destruct");
            };
            if !alive || health <= 0.0 {
                return Ok(());
            }
            let kind = battle.damage.damage(
                &battle,
                &player,
                &CalculatedDamage::plain(position, health),
            );
            if kind == DamageKind::Kill {
                player.on_killed(&battle, None);
            }
            Ok(())
        }

        ClientCommand::TakeBonus { bonus } => {
            let (battle, player) = conn.battle().context("not in a battle")?;
            anyhow::ensure!(player.in_battle_as_tank(), "no tank to take a bonus");
            battle.take_bonus(bonus, &player);
            Ok(())
        }

        ClientCommand::FlagTouch { flag } => {
            let (battle, player) = conn.battle().context("not in a battle")?;
            battle.handle_flag_touch(&player, flag);
            Ok(())
        }

        ClientCommand::UpdateBattleProperties { properties } => {
            let (battle, _) = conn.battle().context("not in a battle")?;
            anyhow::ensure!(battle.owner() == Some(conn.id), "only the host can reconfigure");
            anyhow::ensure!(
                battle.state_kind() == StateKind::Waiting,
                "battle already started"
            );
            battle.update_properties(properties);
            Ok(())
        }
    }
}

/// Introduce the user behind this connection, loading or creating the
/// durable player record.
fn login(ctx: &Arc<GameContext>, conn: &Arc<Connection>, username: &str) -> anyhow::Result<()> {
    anyhow::ensure!(!conn.is_logged_in(), "already logged in");
    anyhow::ensure!(!username.trim().is_empty(), "empty username");

    let record = ctx.persistence.load_or_create(username)?;
    let user = templates::user(&ctx.store, username);
    ok_or_log(ctx.store.share(user, conn.id), "share user");
    conn.login(user, UserProfile { id: record.id, username: record.username });
    tracing::info!(connection = conn.id, username, "Logged in");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::properties::BattleMode;
    use crate::battle::test_support::make_connection;

    #[tokio::test]
    async fn test_login_then_create_and_start_custom_battle() {
        let ctx = GameContext::for_tests();
        let (conn, _rx) = make_connection(&ctx, 1, "host");
        // make_connection already logs in; build the battle over the command path
        let properties = ctx
            .maps
            .default_properties(BattleMode::Dm)
            .unwrap();

        execute(ClientCommand::CreateCustomBattle { properties }, &ctx, &conn).unwrap();
        assert_eq!(ctx.battles.count(), 1);
        assert!(conn.in_lobby());

        execute(ClientCommand::StartBattle, &ctx, &conn).unwrap();
        let (battle, _) = conn.battle().unwrap();
        assert_eq!(battle.state_kind(), StateKind::WarmUp);
    }

    #[tokio::test]
    async fn test_non_host_cannot_start() {
        let ctx = GameContext::for_tests();
        let (host, _rx) = make_connection(&ctx, 1, "host");
        let (guest, _rx2) = make_connection(&ctx, 2, "guest");
        let properties = ctx.maps.default_properties(BattleMode::Dm).unwrap();

        execute(ClientCommand::CreateCustomBattle { properties }, &ctx, &host).unwrap();
        let (battle, _) = host.battle().unwrap();
        execute(
            ClientCommand::EnterBattle { lobby: battle.lobby, spectator: false },
            &ctx,
            &guest,
        )
        .unwrap();

        assert!(execute(ClientCommand::StartBattle, &ctx, &guest).is_err());
    }

    #[tokio::test]
    async fn test_enter_matchmaking_reuses_open_battle() {
        let ctx = GameContext::for_tests();
        let (a, _rx) = make_connection(&ctx, 1, "a");
        let (b, _rx2) = make_connection(&ctx, 2, "b");

        execute(ClientCommand::EnterMatchmaking, &ctx, &a).unwrap();
        execute(ClientCommand::EnterMatchmaking, &ctx, &b).unwrap();

        assert_eq!(ctx.battles.count(), 1);
        let (battle_a, _) = a.battle().unwrap();
        let (battle_b, _) = b.battle().unwrap();
        assert_eq!(battle_a.lobby, battle_b.lobby);
    }

    #[test]
    fn test_ping_answers_pong() {
        let ctx = GameContext::for_tests();
        let (conn, mut rx) = make_connection(&ctx, 1, "a");

        execute(ClientCommand::Ping { client_ms: 99 }, &ctx, &conn).unwrap();

        let mut saw_pong = false;
        while let Ok(packet) = rx.try_recv() {
            if let ServerPacket::Pong { client_ms, .. } = packet {
                assert_eq!(client_ms, 99);
                saw_pong = true;
            }
        }
        assert!(saw_pong);
    }

    #[test]
    fn test_commands_outside_battle_fail_cleanly() {
        let ctx = GameContext::for_tests();
        let (conn, _rx) = make_connection(&ctx, 1, "a");

        assert!(execute(ClientCommand::ExitBattle, &ctx, &conn).is_err());
        assert!(execute(ClientCommand::SelfDestruct, &ctx, &conn).is_err());
        assert!(execute(
            ClientCommand::Move { position: crate::util::vec3::Vec3::ZERO, orientation: 0.0 },
            &ctx,
            &conn
        )
        .is_err());
    }
}
