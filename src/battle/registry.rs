//! Battle registry and tick loops
//!
//! Every live battle is registered under its lobby id and ticked by its own
//! task at the configured cadence. Battles share no mutable state with each
//! other beyond the entity store.

use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::info;

use crate::battle::arcade::ArcadeKind;
use crate::battle::Battle;
use crate::ecs::EntityId;
use crate::game::context::GameContext;

pub struct BattleRegistry {
    battles: RwLock<HashMap<EntityId, Arc<Battle>>>,
}

impl BattleRegistry {
    pub fn new() -> Self {
        Self {
            battles: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, battle: Arc<Battle>) {
        self.battles.write().insert(battle.lobby, battle);
    }

    pub fn get(&self, lobby: EntityId) -> Option<Arc<Battle>> {
        self.battles.read().get(&lobby).cloned()
    }

    pub fn remove(&self, lobby: EntityId) -> Option<Arc<Battle>> {
        self.battles.write().remove(&lobby)
    }

    pub fn count(&self) -> usize {
        self.battles.read().len()
    }

    pub fn all(&self) -> Vec<Arc<Battle>> {
        self.battles.read().values().cloned().collect()
    }

    /// A matchmaking battle that still accepts tank occupants
    pub fn find_matchmaking(&self) -> Option<Arc<Battle>> {
        self.battles
            .read()
            .values()
            .find(|battle| battle.is_matchmaking() && battle.can_add_players())
            .cloned()
    }

    /// An arcade battle of the given flavor that still accepts occupants
    pub fn find_arcade(&self, kind: ArcadeKind) -> Option<Arc<Battle>> {
        self.battles
            .read()
            .values()
            .find(|battle| battle.arcade_kind() == Some(kind) && battle.can_add_players())
            .cloned()
    }
}

impl Default for BattleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one battle at the configured tick rate until it ends and empties
pub fn spawn_tick_loop(ctx: Arc<GameContext>, battle: Arc<Battle>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ctx.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last = Instant::now();

        loop {
            interval.tick().await;
            let now = Instant::now();
            let delta = (now - last).as_secs_f64();
            last = now;

            battle.tick(delta);

            if battle.is_ended() && battle.players().is_empty() {
                break;
            }
        }

        ctx.battles.remove(battle.lobby);
        battle.destroy_entities();
        info!(battle = battle.lobby, "Battle retired");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::properties::BattleMode;
    use crate::battle::test_support::custom_battle;
    use crate::game::context::GameContext;

    #[test]
    fn test_registry_insert_find_remove() {
        let ctx = GameContext::for_tests();
        let battle = Battle::matchmaking(&ctx).unwrap();
        ctx.battles.insert(battle.clone());

        assert_eq!(ctx.battles.count(), 1);
        assert!(ctx.battles.find_matchmaking().is_some());
        assert!(ctx.battles.get(battle.lobby).is_some());

        ctx.battles.remove(battle.lobby);
        assert_eq!(ctx.battles.count(), 0);
    }

    #[test]
    fn test_custom_battles_are_not_matchmaking_joinable() {
        let support = custom_battle(BattleMode::Dm, 0);
        support.ctx.battles.insert(support.battle.clone());
        assert!(support.ctx.battles.find_matchmaking().is_none());
    }

    #[tokio::test]
    async fn test_tick_loop_retires_finished_battle() {
        let support = custom_battle(BattleMode::Dm, 0);
        let ctx = support.ctx.clone();
        ctx.battles.insert(support.battle.clone());

        support.battle.finish();
        let handle = spawn_tick_loop(ctx.clone(), support.battle.clone());
        handle.await.unwrap();

        assert_eq!(ctx.battles.count(), 0);
    }
}
