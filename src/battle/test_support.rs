//! Shared fixtures for battle tests

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::battle::player::BattlePlayer;
use crate::battle::properties::{BattleMode, BattleProperties, GravityType};
use crate::battle::state;
use crate::battle::typ::{MatchmakingHandler, TypeHandler};
use crate::battle::Battle;
use crate::ecs::templates;
use crate::ecs::ConnectionId;
use crate::game::context::GameContext;
use crate::net::connection::{Connection, UserProfile};
use crate::net::protocol::ServerPacket;

pub struct TestBattle {
    pub ctx: Arc<GameContext>,
    pub battle: Arc<Battle>,
    pub players: Vec<(Arc<BattlePlayer>, mpsc::UnboundedReceiver<ServerPacket>)>,
}

fn test_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000)
}

/// Logged-in connection wired into the store and the manager
pub fn make_connection(
    ctx: &Arc<GameContext>,
    id: ConnectionId,
    name: &str,
) -> (Arc<Connection>, mpsc::UnboundedReceiver<ServerPacket>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = templates::client_session(&ctx.store);
    let conn = Arc::new(Connection::new(id, test_addr(), session, tx.clone()));
    ctx.store.register_sink(id, tx);

    let user = templates::user(&ctx.store, name);
    conn.login(user, UserProfile { id: Uuid::new_v4(), username: name.to_string() });
    ctx.connections.insert(conn.clone());
    (conn, rx)
}

pub fn join_player(
    battle: &Arc<Battle>,
    id: ConnectionId,
    name: &str,
) -> (Arc<BattlePlayer>, mpsc::UnboundedReceiver<ServerPacket>) {
    let (conn, rx) = make_connection(&battle.ctx, id, name);
    battle.add_player(&conn, false);
    (battle.player(id).expect("player joined"), rx)
}

pub fn join_spectator(
    battle: &Arc<Battle>,
    id: ConnectionId,
    name: &str,
) -> (Arc<BattlePlayer>, mpsc::UnboundedReceiver<ServerPacket>) {
    let (conn, rx) = make_connection(&battle.ctx, id, name);
    battle.add_player(&conn, true);
    (battle.player(id).expect("spectator joined"), rx)
}

fn base_properties(ctx: &Arc<GameContext>, mode: BattleMode) -> BattleProperties {
    let map = ctx.maps.matchmaking_maps(mode)[0];
    BattleProperties {
        mode,
        gravity: GravityType::Earth,
        map_id: map.id,
        friendly_fire: false,
        kill_zone_enabled: true,
        damage_enabled: true,
        disabled_modules: false,
        max_players: 16,
        time_limit: 10,
        score_limit: 100,
    }
}

/// Custom battle with `n` joined (not yet embodied) players, still Waiting
pub fn custom_battle(mode: BattleMode, n: usize) -> TestBattle {
    let ctx = GameContext::for_tests();
    let properties = base_properties(&ctx, mode);
    let battle = Battle::custom(&ctx, properties, 1).expect("custom battle");
    let players = (0..n)
        .map(|i| join_player(&battle, (i + 1) as ConnectionId, &format!("player{i}")))
        .collect();
    TestBattle { ctx, battle, players }
}

/// Custom battle with `n` players, already Running with everyone embodied
pub fn embodied_battle(mode: BattleMode, n: usize) -> TestBattle {
    let support = custom_battle(mode, n);
    state::begin_running(&support.battle);
    support
}

/// Matchmaking battle, Running with `n` embodied players; later joiners go
/// through the waiting room
pub fn running_matchmaking_battle(mode: BattleMode, n: usize) -> TestBattle {
    let ctx = GameContext::for_tests();
    let properties = base_properties(&ctx, mode);
    let map = ctx.maps.matchmaking_maps(mode)[0].clone();
    let battle = Battle::create(
        &ctx,
        properties,
        map,
        TypeHandler::Matchmaking(MatchmakingHandler::new()),
    )
    .expect("matchmaking battle");
    let players = (0..n)
        .map(|i| join_player(&battle, (i + 1) as ConnectionId, &format!("player{i}")))
        .collect();
    state::begin_running(&battle);
    TestBattle { ctx, battle, players }
}
