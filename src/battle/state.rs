//! Battle lifecycle state machine
//!
//! Waiting -> WarmUp -> Running -> Ended, with Domination as a timed
//! sub-state of Running that occurs at most once per match. `finish()` on
//! the battle is the only path into Ended.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::info;

use crate::battle::constants::timing::DOMINATION_DURATION;
use crate::battle::Battle;
use crate::ecs::component::{Component, ComponentKind};
use crate::ecs::store::ok_or_log;
use crate::net::protocol::unix_now_ms;

#[derive(Debug)]
pub enum BattleState {
    /// Accumulating players, pre-countdown
    Waiting,
    WarmUp { ends_at: Instant },
    Running,
    /// Timed scoring window; reverts to Running
    Domination {
        ends_at: Instant,
        /// Round stop-time snapshot restored when the window closes
        prev_stop_time: Option<Component>,
    },
    /// Terminal
    Ended,
}

/// Discriminant of [`BattleState`], for cheap checks under brief locks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Waiting,
    WarmUp,
    Running,
    Domination,
    Ended,
}

impl BattleState {
    pub fn kind(&self) -> StateKind {
        match self {
            BattleState::Waiting => StateKind::Waiting,
            BattleState::WarmUp { .. } => StateKind::WarmUp,
            BattleState::Running => StateKind::Running,
            BattleState::Domination { .. } => StateKind::Domination,
            BattleState::Ended => StateKind::Ended,
        }
    }
}

/// Advance the lifecycle by one tick
pub fn tick(battle: &Battle) {
    match battle.state_kind() {
        StateKind::Waiting => {
            // Custom battles leave Waiting on the host's explicit start
            if !battle.is_custom() && battle.tank_slot_count() >= battle.ctx.config.min_players {
                begin_warmup(battle);
            }
        }
        StateKind::WarmUp => {
            let due = matches!(
                &*battle.state.lock(),
                BattleState::WarmUp { ends_at } if Instant::now() >= *ends_at
            );
            if due {
                begin_running(battle);
            }
        }
        StateKind::Running => {
            if battle.timer() <= 0.0 {
                battle.finish();
            }
        }
        StateKind::Domination => {
            let due = matches!(
                &*battle.state.lock(),
                BattleState::Domination { ends_at, .. } if Instant::now() >= *ends_at
            );
            if due {
                end_domination(battle);
            }
        }
        StateKind::Ended => {}
    }
}

pub fn begin_warmup(battle: &Battle) {
    let warmup = std::time::Duration::from_secs(battle.ctx.config.warmup_secs);
    *battle.state.lock() = BattleState::WarmUp { ends_at: Instant::now() + warmup };
    info!(battle = battle.lobby, "Battle entered warm-up");
}

/// Warm-up elapsed (or a custom host skipped it): simulation begins
pub fn begin_running(battle: &Battle) {
    let time_limit = battle.properties.read().time_limit_secs();
    *battle.timer.lock() = time_limit;

    ok_or_log(
        set_stop_time(battle, unix_now_ms() + (time_limit * 1000.0) as u64),
        "round stop time",
    );

    *battle.state.lock() = BattleState::Running;
    battle.start();
    info!(battle = battle.lobby, "Battle running");
}

/// Open the domination window if it is still available.
///
/// Eligibility: no window has occurred yet, more than 120 s remain and the
/// match is young enough (`time_limit*60 - 60` not yet passed). Entering
/// snapshots the round stop-time for restoration afterwards.
pub fn try_begin_domination(battle: &Battle) -> bool {
    if !battle.domination_can_begin() || battle.state_kind() != StateKind::Running {
        return false;
    }
    if battle.domination_started.swap(true, Ordering::SeqCst) {
        return false;
    }

    let prev_stop_time = battle
        .store()
        .component(battle.round(), ComponentKind::RoundStopTime)
        .ok()
        .flatten();
    ok_or_log(
        set_stop_time(battle, unix_now_ms() + DOMINATION_DURATION.as_millis() as u64),
        "domination stop time",
    );

    *battle.state.lock() = BattleState::Domination {
        ends_at: Instant::now() + DOMINATION_DURATION,
        prev_stop_time,
    };
    info!(battle = battle.lobby, "Domination window opened");
    true
}

/// Window elapsed: restore the stop-time snapshot and resume Running
pub fn end_domination(battle: &Battle) {
    let mut state = battle.state.lock();
    let BattleState::Domination { prev_stop_time, .. } = &mut *state else {
        return;
    };
    let prev = prev_stop_time.take();
    *state = BattleState::Running;
    drop(state);

    match prev {
        Some(component) => ok_or_log(
            battle.store().replace_component(battle.round(), component),
            "restore stop time",
        ),
        None => ok_or_log(
            battle
                .store()
                .remove_component_if_present(battle.round(), ComponentKind::RoundStopTime),
            "clear stop time",
        ),
    };
    info!(battle = battle.lobby, "Domination window closed");
}

fn set_stop_time(battle: &Battle, stop_at_unix_ms: u64) -> Result<(), crate::ecs::store::StoreError> {
    let round = battle.round();
    let component = Component::RoundStopTime { stop_at_unix_ms };
    if battle.store().has_component(round, ComponentKind::RoundStopTime) {
        battle.store().replace_component(round, component)
    } else {
        battle.store().add_component(round, component)
    }
}
