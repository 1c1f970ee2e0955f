use serde::{Deserialize, Serialize};

use crate::battle::properties::{BattleMode, BattleProperties, GravityType, TeamColor};
use crate::ecs::EntityId;
use crate::util::vec3::Vec3;

/// One typed attribute attached to exactly one entity.
///
/// The variant set is closed; [`Component::kind`] gives the stable type key
/// under which at most one value may exist per entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Component {
    /// Display name of a user
    Uid { username: String },
    /// Battle mode advertised on a lobby or battle entity
    BattleMode { mode: BattleMode },
    /// Reference to the map entity a lobby plays on
    MapGroup { map: EntityId },
    /// Non-spectator member limit of a lobby
    UserLimit { max_players: usize },
    /// Gravity preset of a lobby
    Gravity { gravity: GravityType, force: f32 },
    /// Full rule set mirrored onto a custom-battle lobby
    ClientBattleParams { properties: BattleProperties },
    /// Marks a user as a member of a battle lobby
    BattleLobbyGroup { lobby: EntityId },
    /// Marks a user as embodied inside a battle
    BattleGroup { battle: EntityId },
    /// Mounted equipment shown while in a lobby
    UserEquipment { weapon_id: u64, hull_id: u64 },
    /// Marks a user as matchmaking-placed
    MatchmakingUser,
    /// Ready check passed in the matchmaking lobby
    MatchmakingUserReady,
    /// Wall-clock instant the round timer freezes at
    RoundStopTime { stop_at_unix_ms: u64 },
    /// Round entity is restarting (terminal)
    RoundRestarting,
    /// Current and maximum hit points of a tank
    Health { current: f32, max: f32 },
    /// Back-reference from an attached entity (weapon) to its tank
    TankGroup { tank: EntityId },
    /// Back-reference from a battle-scoped entity to its user
    UserGroup { user: EntityId },
    /// Team membership of a tank or battle user
    Team { color: TeamColor },
    /// World position of a tank, bonus or flag
    Position { position: Vec3 },
    /// Personal score within the current round
    Score { score: u32 },
    /// Spawn parameters of a bonus region entity
    BonusConfig { kind: BonusKind, cooldown_secs: u64 },
    /// Pedestal a flag belongs to
    FlagPedestal { team: TeamColor, position: Vec3 },
    /// Transient on-screen message
    TextNotification { message: String },
}

/// Stable type key of a [`Component`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    Uid,
    BattleMode,
    MapGroup,
    UserLimit,
    Gravity,
    ClientBattleParams,
    BattleLobbyGroup,
    BattleGroup,
    UserEquipment,
    MatchmakingUser,
    MatchmakingUserReady,
    RoundStopTime,
    RoundRestarting,
    Health,
    TankGroup,
    UserGroup,
    Team,
    Position,
    Score,
    BonusConfig,
    FlagPedestal,
    TextNotification,
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Uid { .. } => ComponentKind::Uid,
            Component::BattleMode { .. } => ComponentKind::BattleMode,
            Component::MapGroup { .. } => ComponentKind::MapGroup,
            Component::UserLimit { .. } => ComponentKind::UserLimit,
            Component::Gravity { .. } => ComponentKind::Gravity,
            Component::ClientBattleParams { .. } => ComponentKind::ClientBattleParams,
            Component::BattleLobbyGroup { .. } => ComponentKind::BattleLobbyGroup,
            Component::BattleGroup { .. } => ComponentKind::BattleGroup,
            Component::UserEquipment { .. } => ComponentKind::UserEquipment,
            Component::MatchmakingUser => ComponentKind::MatchmakingUser,
            Component::MatchmakingUserReady => ComponentKind::MatchmakingUserReady,
            Component::RoundStopTime { .. } => ComponentKind::RoundStopTime,
            Component::RoundRestarting => ComponentKind::RoundRestarting,
            Component::Health { .. } => ComponentKind::Health,
            Component::TankGroup { .. } => ComponentKind::TankGroup,
            Component::UserGroup { .. } => ComponentKind::UserGroup,
            Component::Team { .. } => ComponentKind::Team,
            Component::Position { .. } => ComponentKind::Position,
            Component::Score { .. } => ComponentKind::Score,
            Component::BonusConfig { .. } => ComponentKind::BonusConfig,
            Component::FlagPedestal { .. } => ComponentKind::FlagPedestal,
            Component::TextNotification { .. } => ComponentKind::TextNotification,
        }
    }
}

/// Pickup item category spawned by bonus regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BonusKind {
    Repair,
    DoubleDamage,
    DoubleArmor,
    SpeedBoost,
    Gold,
}
