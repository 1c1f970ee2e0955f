//! CTF flag state machine
//!
//! Two flags per battle. A flag rests on its pedestal, gets captured by an
//! enemy, may be dropped to the ground when the carrier dies, and comes back
//! via an ally return or scores via a delivery. There is no path from
//! pedestal straight to ground.

use crate::battle::constants::flag::TOUCH_RADIUS;
use crate::battle::properties::TeamColor;
use crate::ecs::{ConnectionId, EntityId};
use crate::util::vec3::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlagState {
    OnPedestal,
    OnGround { position: Vec3 },
    Captured { carrier: ConnectionId },
}

#[derive(Debug)]
pub struct Flag {
    pub team: TeamColor,
    pub pedestal: Vec3,
    pub entity: EntityId,
    pub state: FlagState,
}

impl Flag {
    pub fn new(team: TeamColor, pedestal: Vec3, entity: EntityId) -> Self {
        Self {
            team,
            pedestal,
            entity,
            state: FlagState::OnPedestal,
        }
    }

    /// Where the flag can be touched; carried flags cannot be
    pub fn touchable_position(&self) -> Option<Vec3> {
        match self.state {
            FlagState::OnPedestal => Some(self.pedestal),
            FlagState::OnGround { position } => Some(position),
            FlagState::Captured { .. } => None,
        }
    }

    pub fn in_touch_range(&self, from: Vec3) -> bool {
        self.touchable_position()
            .is_some_and(|position| position.distance(from) <= TOUCH_RADIUS)
    }

    pub fn carrier(&self) -> Option<ConnectionId> {
        match self.state {
            FlagState::Captured { carrier } => Some(carrier),
            _ => None,
        }
    }

    /// Enemy picks the flag up, from the pedestal or the ground
    pub fn capture(&mut self, carrier: ConnectionId) {
        debug_assert!(
            !matches!(self.state, FlagState::Captured { .. }),
            "capture of an already carried flag"
        );
        self.state = FlagState::Captured { carrier };
    }

    /// Carrier died; the flag falls where they stood
    pub fn drop_at(&mut self, position: Vec3) {
        debug_assert!(
            matches!(self.state, FlagState::Captured { .. }),
            "drop of a flag that is not carried"
        );
        self.state = FlagState::OnGround { position };
    }

    /// Ally return from the ground, or a scoring delivery
    pub fn return_to_pedestal(&mut self) {
        self.state = FlagState::OnPedestal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag() -> Flag {
        Flag::new(TeamColor::Red, Vec3::new(-45.0, 0.0, 0.0), 1)
    }

    #[test]
    fn test_cycle_closure_from_pedestal() {
        // From the pedestal the only transition is a capture
        let mut f = flag();
        assert_eq!(f.state, FlagState::OnPedestal);
        f.capture(7);
        assert_eq!(f.carrier(), Some(7));
    }

    #[test]
    fn test_captured_reaches_ground_or_pedestal_only() {
        let mut f = flag();
        f.capture(7);
        f.drop_at(Vec3::new(1.0, 0.0, 1.0));
        assert!(matches!(f.state, FlagState::OnGround { .. }));

        let mut f = flag();
        f.capture(7);
        f.return_to_pedestal();
        assert_eq!(f.state, FlagState::OnPedestal);
    }

    #[test]
    #[should_panic(expected = "drop of a flag that is not carried")]
    fn test_pedestal_to_ground_is_unreachable() {
        let mut f = flag();
        f.drop_at(Vec3::ZERO);
    }

    #[test]
    fn test_touch_range_gating() {
        let mut f = flag();
        assert!(f.in_touch_range(Vec3::new(-40.0, 0.0, 0.0)));
        assert!(!f.in_touch_range(Vec3::new(-20.0, 0.0, 0.0)));

        // Carried flags cannot be touched at all
        f.capture(7);
        assert!(!f.in_touch_range(Vec3::new(-45.0, 0.0, 0.0)));
    }
}
