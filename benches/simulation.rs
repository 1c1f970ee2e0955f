//! Simulation benchmarks for Steel Arena server
//!
//! Measures the battle tick and the damage pipeline at various player
//! counts.
//!
//! Run with: cargo bench --bench simulation

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::sync::mpsc;
use uuid::Uuid;

use steel_arena_server::battle::damage::CalculatedDamage;
use steel_arena_server::battle::player::BattlePlayer;
use steel_arena_server::battle::properties::{BattleMode, BattleProperties, GravityType};
use steel_arena_server::battle::{state, Battle};
use steel_arena_server::ecs::templates;
use steel_arena_server::game::context::GameContext;
use steel_arena_server::net::connection::{Connection, UserProfile};
use steel_arena_server::util::vec3::Vec3;

fn battle_with_players(count: usize) -> (Arc<GameContext>, Arc<Battle>, Vec<Arc<BattlePlayer>>) {
    let ctx = GameContext::for_tests();
    let map = ctx.maps.matchmaking_maps(BattleMode::Dm)[0];
    let properties = BattleProperties {
        mode: BattleMode::Dm,
        gravity: GravityType::Earth,
        map_id: map.id,
        friendly_fire: false,
        kill_zone_enabled: true,
        damage_enabled: true,
        disabled_modules: false,
        max_players: count.max(2),
        time_limit: 10,
        score_limit: u32::MAX,
    };
    let battle = Battle::custom(&ctx, properties, 1).expect("battle");

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000);
    let mut players = Vec::with_capacity(count);
    for i in 0..count {
        let id = (i + 1) as u64;
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx); // pushed packets are dropped; the bench measures simulation only
        let session = templates::client_session(&ctx.store);
        let conn = Arc::new(Connection::new(id, addr, session, tx.clone()));
        ctx.store.register_sink(id, tx);
        let user = templates::user(&ctx.store, &format!("bench{i}"));
        conn.login(user, UserProfile { id: Uuid::new_v4(), username: format!("bench{i}") });
        ctx.connections.insert(conn.clone());
        battle.add_player(&conn, false);
    }
    state::begin_running(&battle);
    for player in battle.players() {
        players.push(player);
    }
    (ctx, battle, players)
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("battle_tick");
    for count in [2usize, 8, 20] {
        let (_ctx, battle, _players) = battle_with_players(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| battle.tick(black_box(0.05)));
        });
    }
    group.finish();
}

fn bench_damage(c: &mut Criterion) {
    let (_ctx, battle, players) = battle_with_players(2);
    let attacker = players[0].clone();
    let victim = players[1].clone();
    let weapon = attacker.tank_entities()[1];

    c.bench_function("damage_attributed", |b| {
        b.iter(|| {
            // Keep the victim alive so every iteration takes the same path
            victim.with_tank(|tank| tank.health = tank.max_health);
            battle.damage.damage_attributed(
                &battle,
                &attacker,
                &victim,
                weapon,
                CalculatedDamage::plain(Vec3::ZERO, black_box(25.0)),
            );
        });
    });
}

criterion_group!(benches, bench_tick, bench_damage);
criterion_main!(benches);
