//! Damage processor
//!
//! Pure computation over tanks: health mutation, kill/critical/normal
//! classification and event emission. The processor holds no state of its
//! own between calls; everything observable goes through entity components
//! and addressed events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::battle::player::BattlePlayer;
use crate::battle::Battle;
use crate::ecs::component::Component;
use crate::ecs::store::ok_or_log;
use crate::ecs::EntityId;
use crate::net::protocol::GameEvent;
use crate::util::vec3::Vec3;

/// Ephemeral damage value passed from weapon logic into the processor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalculatedDamage {
    pub hit_point: Vec3,
    pub value: f32,
    pub is_critical: bool,
    pub is_back_hit: bool,
    pub is_turret_hit: bool,
}

impl CalculatedDamage {
    pub fn plain(hit_point: Vec3, value: f32) -> Self {
        Self {
            hit_point,
            value,
            is_critical: false,
            is_back_hit: false,
            is_turret_hit: false,
        }
    }

    /// Any special-hit flag set
    pub fn special(&self) -> bool {
        self.is_critical || self.is_back_hit || self.is_turret_hit
    }
}

/// Outcome classification of one damage application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageKind {
    Kill,
    Critical,
    Normal,
}

#[derive(Debug, Default)]
pub struct DamageProcessor;

impl DamageProcessor {
    /// Attributed damage from a source tank, with kill/assist bookkeeping
    pub fn damage_attributed(
        &self,
        battle: &Battle,
        source: &Arc<BattlePlayer>,
        target: &Arc<BattlePlayer>,
        _weapon: EntityId,
        damage: CalculatedDamage,
    ) {
        if damage.value <= 0.0 {
            return;
        }

        let kind = self.damage(battle, target, &damage);
        source.with_tank(|tank| tank.dealt_damage += damage.value);
        let store = battle.store();

        match kind {
            DamageKind::Kill => {
                if source.connection == target.connection {
                    target.on_killed(battle, None);
                } else {
                    target.on_killed(battle, Some(source));
                }
            }
            DamageKind::Normal => {
                target.note_assist_damage(source.connection, damage.value);
            }
            DamageKind::Critical => {
                if let Some(target_tank) = target.tank_entity() {
                    store.send(
                        source.connection,
                        GameEvent::CriticalDamage { hit_point: damage.hit_point },
                        vec![target_tank],
                    );
                }
                target.note_assist_damage(source.connection, damage.value);
            }
        }

        if let Some(target_tank) = target.tank_entity() {
            store.send(
                source.connection,
                GameEvent::DamageInfo {
                    hit_point: damage.hit_point,
                    value: damage.value,
                    special: damage.special(),
                    heal: false,
                },
                vec![target_tank],
            );
        }
    }

    /// Unattributed damage (environmental); classifies without attribution
    pub fn damage(
        &self,
        battle: &Battle,
        target: &Arc<BattlePlayer>,
        damage: &CalculatedDamage,
    ) -> DamageKind {
        if damage.value <= 0.0 {
            return DamageKind::Normal;
        }

        let outcome = target.with_tank(|tank| {
            tank.health = (tank.health - damage.value).max(0.0);
            tank.taken_damage += damage.value;
            (tank.entity, tank.health, tank.max_health)
        });
        let Some((entity, health, max)) = outcome else {
            return DamageKind::Normal;
        };

        ok_or_log(
            battle
                .store()
                .replace_component(entity, Component::Health { current: health, max }),
            "damage health update",
        );

        if health <= 0.0 {
            DamageKind::Kill
        } else if damage.is_critical {
            DamageKind::Critical
        } else {
            DamageKind::Normal
        }
    }

    /// Attributed heal; the healer is told about it like a hit, marked heal
    pub fn heal_attributed(
        &self,
        battle: &Battle,
        source: &Arc<BattlePlayer>,
        target: &Arc<BattlePlayer>,
        heal: CalculatedDamage,
    ) {
        if heal.value <= 0.0 {
            return;
        }
        self.apply_heal(battle, target, &heal);
        if let Some(target_tank) = target.tank_entity() {
            battle.store().send(
                source.connection,
                GameEvent::DamageInfo {
                    hit_point: heal.hit_point,
                    value: heal.value,
                    special: heal.special(),
                    heal: true,
                },
                vec![target_tank],
            );
        }
    }

    /// Unattributed heal; the healed player gets the notification
    pub fn heal(&self, battle: &Battle, target: &Arc<BattlePlayer>, heal: CalculatedDamage) {
        if heal.value <= 0.0 {
            return;
        }
        self.apply_heal(battle, target, &heal);
        if let Some(target_tank) = target.tank_entity() {
            battle.store().send(
                target.connection,
                GameEvent::DamageInfo {
                    hit_point: heal.hit_point,
                    value: heal.value,
                    special: heal.special(),
                    heal: true,
                },
                vec![target_tank],
            );
        }
    }

    fn apply_heal(&self, battle: &Battle, target: &Arc<BattlePlayer>, heal: &CalculatedDamage) {
        let outcome = target.with_tank(|tank| {
            tank.health = (tank.health + heal.value).min(tank.max_health);
            (tank.entity, tank.health, tank.max_health)
        });
        if let Some((entity, health, max)) = outcome {
            ok_or_log(
                battle
                    .store()
                    .replace_component(entity, Component::Health { current: health, max }),
                "heal health update",
            );
        }
    }
}
