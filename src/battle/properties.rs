use serde::{Deserialize, Serialize};

/// Scoring ruleset of a battle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BattleMode {
    /// Deathmatch - individual scoreboard
    Dm,
    /// Team deathmatch
    Tdm,
    /// Capture the flag
    Ctf,
}

impl BattleMode {
    pub fn is_team(&self) -> bool {
        matches!(self, BattleMode::Tdm | BattleMode::Ctf)
    }

    pub const ALL: [BattleMode; 3] = [BattleMode::Dm, BattleMode::Tdm, BattleMode::Ctf];
}

/// Gravity preset applied to the whole battle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GravityType {
    Moon,
    Mars,
    Earth,
    SuperEarth,
}

impl GravityType {
    /// Downward acceleration in m/s^2
    pub fn force(&self) -> f32 {
        match self {
            GravityType::Moon => 1.62,
            GravityType::Mars => 3.71,
            GravityType::Earth => 9.81,
            GravityType::SuperEarth => 30.0,
        }
    }
}

/// Team assignment; `None` in solo modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamColor {
    None,
    Red,
    Blue,
}

impl TeamColor {
    pub fn opposite(&self) -> TeamColor {
        match self {
            TeamColor::Red => TeamColor::Blue,
            TeamColor::Blue => TeamColor::Red,
            TeamColor::None => TeamColor::None,
        }
    }
}

/// Mutable rule set of one battle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleProperties {
    pub mode: BattleMode,
    pub gravity: GravityType,
    pub map_id: u32,
    pub friendly_fire: bool,
    pub kill_zone_enabled: bool,
    pub damage_enabled: bool,
    pub disabled_modules: bool,
    pub max_players: usize,
    /// Match duration in minutes
    pub time_limit: u32,
    pub score_limit: u32,
}

impl BattleProperties {
    /// Seconds on the countdown timer at round start
    pub fn time_limit_secs(&self) -> f64 {
        f64::from(self.time_limit) * 60.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_opposite() {
        assert_eq!(TeamColor::Red.opposite(), TeamColor::Blue);
        assert_eq!(TeamColor::Blue.opposite(), TeamColor::Red);
        assert_eq!(TeamColor::None.opposite(), TeamColor::None);
    }

    #[test]
    fn test_mode_is_team() {
        assert!(!BattleMode::Dm.is_team());
        assert!(BattleMode::Tdm.is_team());
        assert!(BattleMode::Ctf.is_team());
    }
}
