//! Physics value types
//!
//! Vector and quaternion types are re-exported from glam. The remaining types are
//! small immutable values passed into the physics API by reference: bounding boxes,
//! rays, transforms, indexed triangles and the opaque entity tag.
//!
//! # Quaternion convention
//!
//! [`SimpleTransform::orientation`] follows the engine convention, which is the
//! conjugate of the rotation it applies to column vectors. Backends convert at
//! their boundary with [`SimpleTransform::native_rotation`] and
//! [`SimpleTransform::from_native`].

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

pub use glam::{Mat3, Quat, Vec2, Vec3};

/// Opaque tag identifying the entity that owns a body or character controller.
///
/// The physics layer stores it and hands it back unchanged; it never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

// =============================================================================
// Aabb
// =============================================================================

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that any `merge` replaces.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Smallest box containing every point, `EMPTY` for no points.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points
            .into_iter()
            .fold(Self::EMPTY, |aabb, p| aabb.merged_point(p))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    pub fn merged_point(&self, p: Vec3) -> Aabb {
        Aabb {
            min: self.min.min(p),
            max: self.max.max(p),
        }
    }

    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn expanded(&self, amount: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }

    /// The eight corners, ordered by the bit pattern (x, y, z) of their index.
    pub fn corners(&self) -> [Vec3; 8] {
        let mut corners = [Vec3::ZERO; 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            *corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
        }
        corners
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::ZERO)
    }
}

// =============================================================================
// Ray
// =============================================================================

/// A ray with an origin and a direction. The direction need not be normalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    pub fn point(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

// =============================================================================
// SimpleTransform
// =============================================================================

/// Position and orientation of a body, in engine conventions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimpleTransform {
    pub position: Vec3,
    pub orientation: Quat,
}

impl SimpleTransform {
    pub const IDENTITY: SimpleTransform = SimpleTransform {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
        }
    }

    /// Builds an engine transform from a position and a column-vector rotation.
    pub fn from_native(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            orientation: rotation.conjugate(),
        }
    }

    /// The column-vector rotation this transform applies.
    pub fn native_rotation(&self) -> Quat {
        self.orientation.conjugate().normalize()
    }

    /// Maps a point in the transform's local space into world space.
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.position + self.native_rotation() * p
    }
}

impl Default for SimpleTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// =============================================================================
// RawIndexedTriangle
// =============================================================================

/// Three vertex indices describing one triangle of a collision mesh.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct RawIndexedTriangle {
    pub index: [u32; 3],
}

static_assertions::assert_eq_size!(RawIndexedTriangle, [u8; 12]);

impl RawIndexedTriangle {
    pub fn new(a: u32, b: u32, c: u32) -> Self {
        Self { index: [a, b, c] }
    }

    /// Largest index referenced by this triangle.
    pub fn max_index(&self) -> u32 {
        self.index[0].max(self.index[1]).max(self.index[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_from_points() {
        let aabb = Aabb::from_points([Vec3::new(1.0, -2.0, 0.0), Vec3::new(-1.0, 3.0, 0.5)]);
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 3.0, 0.5));
        assert!(Aabb::from_points(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_aabb_corners_span_box() {
        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::splat(2.0));
        let corners = aabb.corners();
        assert_eq!(corners[0], aabb.min);
        assert_eq!(corners[7], aabb.max);
        assert_eq!(Aabb::from_points(corners), aabb);
    }

    #[test]
    fn test_simple_transform_native_round_trip() {
        let rotation = Quat::from_rotation_y(0.7);
        let transform = SimpleTransform::from_native(Vec3::X, rotation);
        assert!(transform.native_rotation().abs_diff_eq(rotation, 1e-6));
        assert!(transform.orientation.abs_diff_eq(rotation.conjugate(), 1e-6));
    }

    #[test]
    fn test_simple_transform_point() {
        let transform = SimpleTransform::from_native(
            Vec3::new(0.0, 1.0, 0.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        );
        let p = transform.transform_point(Vec3::X);
        assert!((p - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
    }
}
