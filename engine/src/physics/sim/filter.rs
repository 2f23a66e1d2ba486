//! Collision groups and surface materials

use rapier3d::prelude::{Group, InteractionGroups};

/// Collision filter groups.
pub mod group {
    pub const DEFAULT: u32 = 1;
    pub const STATIC: u32 = 2;
    pub const KINEMATIC: u32 = 4;
    pub const CHARACTER: u32 = 32;
    pub const ALL: u32 = u32::MAX;
}

/// Which objects an object collides with. Two objects interact when each one's
/// group is in the other's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionFilter {
    pub group: u32,
    pub mask: u32,
}

impl CollisionFilter {
    pub const DYNAMIC: CollisionFilter = CollisionFilter {
        group: group::DEFAULT,
        mask: group::ALL,
    };
    pub const STATIC: CollisionFilter = CollisionFilter {
        group: group::STATIC,
        mask: group::ALL ^ group::STATIC,
    };

    pub fn new(group: u32, mask: u32) -> Self {
        Self { group, mask }
    }

    pub fn interacts(&self, other: &CollisionFilter) -> bool {
        (self.group & other.mask) != 0 && (other.group & self.mask) != 0
    }

    pub fn groups(&self) -> InteractionGroups {
        InteractionGroups::new(Group::from_bits_truncate(self.group), Group::from_bits_truncate(self.mask))
    }

    /// Groups of a query that sees every object whose group is in `mask`.
    pub fn query_groups(mask: u32) -> InteractionGroups {
        InteractionGroups::new(Group::ALL, Group::from_bits_truncate(mask))
    }
}

/// Surface response coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub friction: f32,
    pub restitution: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_filter_skips_characters() {
        let character = CollisionFilter::new(group::CHARACTER, group::STATIC | group::DEFAULT);
        assert!(character.interacts(&CollisionFilter::STATIC));
        assert!(character.interacts(&CollisionFilter::DYNAMIC));
        assert!(!character.interacts(&character));
        assert!(!CollisionFilter::STATIC.interacts(&CollisionFilter::STATIC));
    }

    #[test]
    fn test_groups_match_interacts() {
        let filter = CollisionFilter::new(group::KINEMATIC, group::DEFAULT | group::STATIC);
        assert!(CollisionFilter::query_groups(group::KINEMATIC).test(filter.groups()));
        assert!(!CollisionFilter::query_groups(group::CHARACTER).test(filter.groups()));
        assert!(filter.groups().test(CollisionFilter::STATIC.groups()));
        assert!(!filter.groups().test(filter.groups()));
    }
}
