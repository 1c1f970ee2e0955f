//! Bonus processor and bonus box state machines
//!
//! One [`BonusBox`] per spawn region. A box idles until the battle starts,
//! cools down, spawns a pickup entity shared with every in-battle occupant,
//! and returns to cooldown when taken. The processor lives inside the
//! battle's bonus lock, which serializes takes: exactly one of two racing
//! takers wins, the other is absorbed as a logged no-op.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::battle::constants::bonus::{DEFAULT_COOLDOWN_SECS, PARACHUTE_HEIGHT};
use crate::battle::player::BattlePlayer;
use crate::battle::Battle;
use crate::ecs::component::BonusKind;
use crate::ecs::store::ok_or_log;
use crate::ecs::templates;
use crate::ecs::{ConnectionId, EntityId};
use crate::game::map::BonusRegion;
use crate::net::protocol::GameEvent;
use crate::util::vec3::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BonusState {
    /// Not yet scheduled; the battle has not started
    Idle,
    Cooldown { spawn_at: Instant },
    Spawned,
}

/// One spawn region's pickup lifecycle
#[derive(Debug)]
pub struct BonusBox {
    pub kind: BonusKind,
    pub region_position: Vec3,
    pub spawn_height: f32,
    pub cooldown: Duration,
    pub entity: Option<EntityId>,
    pub state: BonusState,
}

impl BonusBox {
    pub fn from_region(region: &BonusRegion) -> Self {
        Self {
            kind: region.kind,
            region_position: region.position,
            spawn_height: if region.has_parachute { PARACHUTE_HEIGHT } else { 0.0 },
            cooldown: Duration::from_secs(region.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS)),
            entity: None,
            state: BonusState::Idle,
        }
    }

    pub fn spawn_position(&self) -> Vec3 {
        self.region_position
            .with_y(self.region_position.y + self.spawn_height)
    }

    /// Enter the first cooldown when the battle starts
    pub fn start(&mut self) {
        if self.state == BonusState::Idle {
            self.state = BonusState::Cooldown { spawn_at: Instant::now() + self.cooldown };
        }
    }

    /// Advance the state machine; the cooldown state spawns by itself
    pub fn tick(&mut self, battle: &Battle) {
        if let BonusState::Cooldown { spawn_at } = self.state {
            if Instant::now() >= spawn_at {
                self.spawn(battle);
            }
        }
    }

    fn spawn(&mut self, battle: &Battle) {
        let store = battle.store();
        let entity = templates::bonus(
            store,
            self.kind,
            self.spawn_position(),
            self.cooldown.as_secs(),
        );
        for player in battle.players() {
            if player.in_battle() {
                ok_or_log(store.share(entity, player.connection), "share spawned bonus");
            }
        }
        self.entity = Some(entity);
        self.state = BonusState::Spawned;
    }

    /// At-most-once take. A take on an already-taken box logs and returns;
    /// the caller never sees an error.
    pub fn take(&mut self, battle: &Battle, taker: &Arc<BattlePlayer>) {
        let Some(entity) = self.entity else {
            warn!(
                connection = taker.connection,
                "Player tried to take a bonus that no longer exists"
            );
            return;
        };

        let store = battle.store();
        for player in battle.players() {
            if player.in_battle() {
                store.send(player.connection, GameEvent::BonusTaken, vec![entity]);
                ok_or_log(store.unshare(entity, player.connection), "unshare taken bonus");
            }
        }
        ok_or_log(store.remove(entity), "remove taken bonus");

        taker.note_bonus_taken();
        self.entity = None;
        self.state = BonusState::Cooldown { spawn_at: Instant::now() + self.cooldown };
    }
}

/// All bonus boxes of one battle
#[derive(Debug, Default)]
pub struct BonusProcessor {
    boxes: Vec<BonusBox>,
}

impl BonusProcessor {
    pub fn new(regions: &[BonusRegion]) -> Self {
        Self {
            boxes: regions.iter().map(BonusBox::from_region).collect(),
        }
    }

    pub fn start(&mut self) {
        for bonus in &mut self.boxes {
            bonus.start();
        }
    }

    pub fn tick(&mut self, battle: &Battle) {
        for bonus in &mut self.boxes {
            bonus.tick(battle);
        }
    }

    /// Take by spawned entity id; unknown ids are consistency faults
    pub fn take(&mut self, battle: &Battle, entity: EntityId, taker: &Arc<BattlePlayer>) {
        match self.boxes.iter_mut().find(|b| b.entity == Some(entity)) {
            Some(bonus) => bonus.take(battle, taker),
            None => warn!(
                connection = taker.connection,
                entity, "Take request for an unknown or already taken bonus"
            ),
        }
    }

    /// Share everything currently spawned with a late joiner
    pub fn share_spawned_to(&self, battle: &Battle, conn: ConnectionId) {
        for bonus in &self.boxes {
            if let Some(entity) = bonus.entity {
                ok_or_log(battle.store().share(entity, conn), "share bonus to joiner");
            }
        }
    }

    /// Drop a leaver's visibility of spawned bonuses
    pub fn unshare_entities(&self, battle: &Battle, conn: ConnectionId) {
        for bonus in &self.boxes {
            if let Some(entity) = bonus.entity {
                ok_or_log(battle.store().unshare(entity, conn), "unshare bonus from leaver");
            }
        }
    }

    pub fn boxes(&self) -> &[BonusBox] {
        &self.boxes
    }

    #[cfg(test)]
    pub fn boxes_mut(&mut self) -> &mut [BonusBox] {
        &mut self.boxes
    }
}
