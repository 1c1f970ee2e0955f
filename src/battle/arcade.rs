//! Arcade sub-mode property generators
//!
//! Each arcade flavor customizes the random rule-set rolled at setup. All
//! uniform switches over a continuous random value use half-open bins on
//! [0,1) with the last bin as an explicit catch-all; falling through with no
//! match is impossible by construction.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::battle::properties::{BattleMode, BattleProperties, GravityType};
use crate::game::map::{MapInfo, MapRegistry};

/// Arcade battle flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArcadeKind {
    FullRandom,
    QuickPlay,
    Cosmic,
    WithoutDamage,
}

/// Roll the mode, map and properties for an arcade battle
pub fn generate(
    kind: ArcadeKind,
    maps: &MapRegistry,
    rng: &mut impl Rng,
) -> Option<(BattleProperties, MapInfo)> {
    let mode = random_mode(rng);
    let eligible = maps.matchmaking_maps(mode);
    let map = eligible.get(rng.gen_range(0..eligible.len().max(1)))?;

    let properties = match kind {
        ArcadeKind::FullRandom => BattleProperties {
            mode,
            gravity: random_gravity(rng),
            map_id: map.id,
            friendly_fire: random_bool(rng),
            kill_zone_enabled: random_bool(rng),
            damage_enabled: true,
            disabled_modules: false,
            max_players: random_max_players(rng),
            time_limit: random_timer(rng),
            score_limit: random_timer(rng) * 10,
        },
        ArcadeKind::QuickPlay => BattleProperties {
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
        },
        ArcadeKind::Cosmic => BattleProperties {
            mode,
            gravity: GravityType::Moon,
            map_id: map.id,
            friendly_fire: false,
            kill_zone_enabled: random_bool(rng),
            damage_enabled: true,
            disabled_modules: false,
            max_players: random_max_players(rng),
            time_limit: random_timer(rng),
            score_limit: random_timer(rng) * 10,
        },
        ArcadeKind::WithoutDamage => BattleProperties {
            mode,
            gravity: random_gravity(rng),
            map_id: map.id,
            friendly_fire: false,
            kill_zone_enabled: true,
            damage_enabled: false,
            disabled_modules: false,
            max_players: random_max_players(rng),
            time_limit: random_timer(rng),
            score_limit: random_timer(rng) * 10,
        },
    };

    Some((properties, (*map).clone()))
}

/// Uniform battle mode; 3-way split of [0,1)
pub fn random_mode(rng: &mut impl Rng) -> BattleMode {
    let roll: f64 = rng.gen();
    match roll {
        r if r < 1.0 / 3.0 => BattleMode::Dm,
        r if r < 2.0 / 3.0 => BattleMode::Tdm,
        // Catch-all bin: everything >= 2/3, including a pathological 1.0
        _ => BattleMode::Ctf,
    }
}

/// Uniform gravity; 4-way split of [0,1)
pub fn random_gravity(rng: &mut impl Rng) -> GravityType {
    let roll: f64 = rng.gen();
    match roll {
        r if r < 0.25 => GravityType::Moon,
        r if r < 0.5 => GravityType::Mars,
        r if r < 0.75 => GravityType::Earth,
        _ => GravityType::SuperEarth,
    }
}

pub fn random_bool(rng: &mut impl Rng) -> bool {
    let roll: f64 = rng.gen();
    roll >= 0.5
}

/// Uniform in [8,20], rounded up to the nearest even number
pub fn random_max_players(rng: &mut impl Rng) -> usize {
    let max = rng.gen_range(8..21usize);
    if max % 2 != 0 {
        max + 1
    } else {
        max
    }
}

/// Uniform in [7,20]; doubles as minutes and (x10) score limit
pub fn random_timer(rng: &mut impl Rng) -> u32 {
    rng.gen_range(7..21)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLES: usize = 20_000;

    #[test]
    fn test_gravity_distribution_is_roughly_uniform() {
        let mut rng = rand::thread_rng();
        let mut counts: HashMap<GravityType, usize> = HashMap::new();
        for _ in 0..SAMPLES {
            *counts.entry(random_gravity(&mut rng)).or_default() += 1;
        }
        assert_eq!(counts.len(), 4);
        let expected = SAMPLES as f64 / 4.0;
        for (&gravity, &count) in &counts {
            let deviation = (count as f64 - expected).abs() / expected;
            assert!(deviation < 0.15, "{gravity:?} deviates {deviation:.2} from uniform");
        }
    }

    #[test]
    fn test_bool_distribution_is_roughly_uniform() {
        let mut rng = rand::thread_rng();
        let trues = (0..SAMPLES).filter(|_| random_bool(&mut rng)).count();
        let ratio = trues as f64 / SAMPLES as f64;
        assert!((ratio - 0.5).abs() < 0.05, "bool ratio {ratio}");
    }

    #[test]
    fn test_max_players_always_even_in_range() {
        let mut rng = rand::thread_rng();
        for _ in 0..SAMPLES {
            let players = random_max_players(&mut rng);
            assert!((8..=20).contains(&players), "out of range: {players}");
            assert_eq!(players % 2, 0, "odd player cap: {players}");
        }
    }

    #[test]
    fn test_timer_range() {
        let mut rng = rand::thread_rng();
        for _ in 0..SAMPLES {
            let timer = random_timer(&mut rng);
            assert!((7..=20).contains(&timer), "out of range: {timer}");
        }
    }

    #[test]
    fn test_full_random_properties_are_consistent() {
        let maps = MapRegistry::builtin();
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let (properties, map) =
                generate(ArcadeKind::FullRandom, &maps, &mut rng).expect("eligible map");
            assert_eq!(properties.map_id, map.id);
            assert!(properties.damage_enabled);
            assert_eq!(properties.score_limit % 10, 0);
            assert!(map.supports(properties.mode));
        }
    }

    #[test]
    fn test_without_damage_disables_damage() {
        let maps = MapRegistry::builtin();
        let mut rng = rand::thread_rng();
        let (properties, _) =
            generate(ArcadeKind::WithoutDamage, &maps, &mut rng).expect("eligible map");
        assert!(!properties.damage_enabled);
    }

    #[test]
    fn test_cosmic_forces_moon_gravity() {
        let maps = MapRegistry::builtin();
        let mut rng = rand::thread_rng();
        let (properties, _) = generate(ArcadeKind::Cosmic, &maps, &mut rng).expect("eligible map");
        assert_eq!(properties.gravity, GravityType::Moon);
    }
}
