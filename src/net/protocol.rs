//! Wire protocol
//!
//! Inbound frames decode into [`ClientCommand`]s (a frame may batch several);
//! outbound [`ServerPacket`]s encode one per frame. The encoding itself is an
//! opaque serde/bincode boundary; decode and encode failures are distinct
//! fault types handled independently by the pipeline.

use serde::{Deserialize, Serialize};

use crate::battle::arcade::ArcadeKind;
use crate::battle::properties::{BattleProperties, TeamColor};
use crate::ecs::component::{Component, ComponentKind};
use crate::ecs::EntityId;
use crate::util::vec3::Vec3;

/// Errors crossing the codec boundary
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Malformed frame; fatal to the connection
    #[error("Decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    /// Failed to encode an outbound packet; the packet is dropped
    #[error("Encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
}

/// Commands from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientCommand {
    /// Introduce the user behind this connection
    Login { username: String },
    /// Latency probe
    Ping { client_ms: u64 },
    /// Host a custom battle with explicit properties
    CreateCustomBattle { properties: BattleProperties },
    /// Join the matchmaking rotation
    EnterMatchmaking,
    /// Join an arcade battle of the given flavor
    EnterArcade { kind: ArcadeKind },
    /// Join a specific battle lobby
    EnterBattle { lobby: EntityId, spectator: bool },
    /// Host starts their custom battle
    StartBattle,
    /// Ready check in a matchmaking lobby
    Ready,
    /// Leave the current battle or lobby
    ExitBattle,
    /// Tank movement update
    Move { position: Vec3, orientation: f32 },
    /// Weapon hit with client-calculated damage
    Fire {
        target: EntityId,
        hit_point: Vec3,
        value: f32,
        critical: bool,
        back_hit: bool,
        turret_hit: bool,
    },
    /// Self-destruct the own tank
    SelfDestruct,
    /// Attempt to pick up a spawned bonus
    TakeBonus { bonus: EntityId },
    /// Report proximity contact with a flag (CTF)
    FlagTouch { flag: EntityId },
    /// Host edits a custom battle's properties mid-lobby
    UpdateBattleProperties { properties: BattleProperties },
}

/// Gameplay notifications addressed at entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    /// Result of one damage or heal application
    DamageInfo {
        hit_point: Vec3,
        value: f32,
        special: bool,
        heal: bool,
    },
    /// Critical hit marker for the shooter
    CriticalDamage { hit_point: Vec3 },
    BonusTaken,
    KickFromBattle,
    /// Scheduled embodiment time for a mid-match joiner
    MatchmakingJoinTime { at_unix_ms: u64 },
    BattleEnded { winner: TeamColor },
    FlagCaptured { team: TeamColor },
    FlagDropped { team: TeamColor },
    FlagReturned { team: TeamColor },
    FlagDelivered { team: TeamColor },
}

/// Packets from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerPacket {
    /// Server wall clock, sent once on connect
    InitTime { server_unix_ms: u64 },
    Pong { client_ms: u64, server_unix_ms: u64 },
    /// Entity became visible; carries its full component snapshot
    EntityShared { entity: EntityId, components: Vec<Component> },
    /// Entity is gone from this connection's view
    EntityUnshared { entity: EntityId },
    ComponentAdded { entity: EntityId, component: Component },
    ComponentChanged { entity: EntityId, component: Component },
    ComponentRemoved { entity: EntityId, kind: ComponentKind },
    /// Event fanned out to sharers of the target entities
    Event { event: GameEvent, targets: Vec<EntityId> },
}

fn config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Decode every command batched into one inbound frame, in order
pub fn decode_frame(bytes: &[u8]) -> Result<Vec<ClientCommand>, ProtocolError> {
    let mut commands = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (command, read) = bincode::serde::decode_from_slice(&bytes[offset..], config())?;
        offset += read;
        commands.push(command);
    }
    Ok(commands)
}

/// Encode one outbound packet into a frame payload
pub fn encode_packet(packet: &ServerPacket) -> Result<Vec<u8>, ProtocolError> {
    Ok(bincode::serde::encode_to_vec(packet, config())?)
}

/// Encode a command batch into one frame payload (client side, tests)
pub fn encode_commands(commands: &[ClientCommand]) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = Vec::new();
    for command in commands {
        bytes.extend(bincode::serde::encode_to_vec(command, config())?);
    }
    Ok(bytes)
}

/// Decode one outbound frame back into a packet (client side, tests)
pub fn decode_packet(bytes: &[u8]) -> Result<ServerPacket, ProtocolError> {
    let (packet, _) = bincode::serde::decode_from_slice(bytes, config())?;
    Ok(packet)
}

/// Milliseconds since the unix epoch, for init-time and pong stamps
pub fn unix_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
