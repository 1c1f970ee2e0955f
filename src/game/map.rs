//! Static map configuration
//!
//! Loaded once at startup from JSON (or the built-in set) and read-only
//! afterwards. The simulation only needs spawn points, bonus regions, flag
//! pedestals and whether a collision mesh exists.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::battle::properties::{BattleMode, BattleProperties, GravityType};
use crate::ecs::component::BonusKind;
use crate::util::vec3::Vec3;

/// One bonus spawn region on a map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonusRegion {
    pub kind: BonusKind,
    pub position: Vec3,
    #[serde(default)]
    pub has_parachute: bool,
    /// Overrides the default 2-minute respawn cooldown
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
}

/// Flag pedestal positions for CTF
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlagPedestals {
    pub red: Vec3,
    pub blue: Vec3,
}

/// Static metadata of one map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapInfo {
    pub id: u32,
    pub name: String,
    /// Eligible for matchmaking/arcade rotation
    pub matchmaking: bool,
    pub max_players: usize,
    #[serde(default)]
    pub has_mesh: bool,
    pub spawn_points: HashMap<BattleMode, Vec<Vec3>>,
    #[serde(default)]
    pub bonus_regions: HashMap<BattleMode, Vec<BonusRegion>>,
    #[serde(default)]
    pub flags: Option<FlagPedestals>,
}

impl MapInfo {
    pub fn has_spawn_points(&self, mode: BattleMode) -> bool {
        self.spawn_points.get(&mode).is_some_and(|points| !points.is_empty())
    }

    /// A map supports a mode when it has spawn points for it, and pedestals
    /// when the mode needs flags.
    pub fn supports(&self, mode: BattleMode) -> bool {
        self.has_spawn_points(mode) && (mode != BattleMode::Ctf || self.flags.is_some())
    }

    pub fn spawn_points(&self, mode: BattleMode) -> &[Vec3] {
        self.spawn_points.get(&mode).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bonus_regions(&self, mode: BattleMode) -> &[BonusRegion] {
        self.bonus_regions.get(&mode).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// All known maps
pub struct MapRegistry {
    maps: Vec<MapInfo>,
}

impl MapRegistry {
    /// Load from a JSON file
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let maps: Vec<MapInfo> = serde_json::from_str(&data)?;
        anyhow::ensure!(!maps.is_empty(), "map file {} contains no maps", path);
        Ok(Self { maps })
    }

    /// Load from the configured path, falling back to the built-in set
    pub fn load_or_builtin(path: Option<&str>) -> Self {
        match path {
            Some(path) => match Self::load(path) {
                Ok(registry) => {
                    tracing::info!("Loaded {} maps from {}", registry.maps.len(), path);
                    registry
                }
                Err(e) => {
                    tracing::warn!("Failed to load maps from {}: {}, using built-ins", path, e);
                    Self::builtin()
                }
            },
            None => Self::builtin(),
        }
    }

    /// Built-in map set used when no map file is configured
    pub fn builtin() -> Self {
        fn ring(count: usize, radius: f32) -> Vec<Vec3> {
            (0..count)
                .map(|i| {
                    let angle = i as f32 / count as f32 * std::f32::consts::TAU;
                    Vec3::new(radius * angle.cos(), 0.0, radius * angle.sin())
                })
                .collect()
        }

        let all_modes = |points: Vec<Vec3>| {
            let mut map = HashMap::new();
            for mode in BattleMode::ALL {
                map.insert(mode, points.clone());
            }
            map
        };

        let standard_bonuses = |positions: &[Vec3]| {
            let regions: Vec<BonusRegion> = positions
                .iter()
                .zip([
                    BonusKind::Repair,
                    BonusKind::DoubleDamage,
                    BonusKind::DoubleArmor,
                    BonusKind::SpeedBoost,
                ])
                .map(|(position, kind)| BonusRegion {
                    kind,
                    position: *position,
                    has_parachute: true,
                    cooldown_secs: None,
                })
                .collect();
            let mut map = HashMap::new();
            for mode in BattleMode::ALL {
                map.insert(mode, regions.clone());
            }
            map
        };

        let maps = vec![
            MapInfo {
                id: 1,
                name: "Sandbox".to_string(),
                matchmaking: true,
                max_players: 16,
                has_mesh: true,
                spawn_points: all_modes(ring(8, 40.0)),
                bonus_regions: standard_bonuses(&ring(4, 20.0)),
                flags: Some(FlagPedestals {
                    red: Vec3::new(-45.0, 0.0, 0.0),
                    blue: Vec3::new(45.0, 0.0, 0.0),
                }),
            },
            MapInfo {
                id: 2,
                name: "Iron Yard".to_string(),
                matchmaking: true,
                max_players: 20,
                has_mesh: true,
                spawn_points: all_modes(ring(10, 60.0)),
                bonus_regions: standard_bonuses(&ring(4, 30.0)),
                flags: Some(FlagPedestals {
                    red: Vec3::new(-70.0, 0.0, 0.0),
                    blue: Vec3::new(70.0, 0.0, 0.0),
                }),
            },
            MapInfo {
                id: 3,
                name: "Quarry".to_string(),
                matchmaking: false,
                max_players: 8,
                has_mesh: false,
                spawn_points: all_modes(ring(8, 30.0)),
                bonus_regions: HashMap::new(),
                flags: None,
            },
        ];

        Self { maps }
    }

    pub fn all(&self) -> &[MapInfo] {
        &self.maps
    }

    pub fn get(&self, id: u32) -> Option<&MapInfo> {
        self.maps.iter().find(|map| map.id == id)
    }

    /// Maps eligible for matchmaking rotation in a given mode
    pub fn matchmaking_maps(&self, mode: BattleMode) -> Vec<&MapInfo> {
        self.maps
            .iter()
            .filter(|map| map.matchmaking && map.supports(mode))
            .collect()
    }

    /// Matchmaking-default rule set on the first eligible map for a mode
    pub fn default_properties(&self, mode: BattleMode) -> Option<BattleProperties> {
        let map = self.matchmaking_maps(mode).into_iter().next()?;
        Some(BattleProperties {
            mode,
            gravity: GravityType::Earth,
            map_id: map.id,
            friendly_fire: false,
            kill_zone_enabled: true,
            damage_enabled: true,
            disabled_modules: false,
            max_players: map.max_players,
            time_limit: 10,
            score_limit: 100,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_maps_support_all_modes() {
        let registry = MapRegistry::builtin();
        for mode in BattleMode::ALL {
            assert!(
                !registry.matchmaking_maps(mode).is_empty(),
                "no matchmaking map for {mode:?}"
            );
        }
    }

    #[test]
    fn test_ctf_requires_flags() {
        let registry = MapRegistry::builtin();
        let quarry = registry.get(3).unwrap();
        assert!(quarry.has_spawn_points(BattleMode::Ctf));
        assert!(!quarry.supports(BattleMode::Ctf));
    }

    #[test]
    fn test_json_round_trip() {
        let registry = MapRegistry::builtin();
        let json = serde_json::to_string(registry.all()).unwrap();
        let parsed: Vec<MapInfo> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), registry.all().len());
    }
}
