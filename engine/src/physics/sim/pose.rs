//! Rigid transforms in the native convention (column vectors, right-handed), and
//! conversions to the nalgebra types rapier works in.

use glam::{Quat, Vec3};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::{Isometry, Point, Real, Vector};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.position + self.rotation * p
    }

    pub fn inverse_transform_point(&self, p: Vec3) -> Vec3 {
        self.rotation.inverse() * (p - self.position)
    }

    pub fn inverse_transform_vector(&self, v: Vec3) -> Vec3 {
        self.rotation.inverse() * v
    }

    pub fn inverse(&self) -> Pose {
        let rotation = self.rotation.inverse();
        Pose {
            position: rotation * -self.position,
            rotation,
        }
    }

    pub fn to_isometry(&self) -> Isometry<Real> {
        let q = self.rotation;
        Isometry::from_parts(
            Translation3::new(self.position.x, self.position.y, self.position.z),
            UnitQuaternion::new_normalize(Quaternion::new(q.w, q.x, q.y, q.z)),
        )
    }

    pub fn from_isometry(isometry: &Isometry<Real>) -> Self {
        let q = isometry.rotation;
        Self {
            position: from_vector(&isometry.translation.vector),
            rotation: Quat::from_xyzw(q.i, q.j, q.k, q.w),
        }
    }
}

pub fn to_vector(v: Vec3) -> Vector<Real> {
    Vector::new(v.x, v.y, v.z)
}

pub fn to_point(v: Vec3) -> Point<Real> {
    Point::new(v.x, v.y, v.z)
}

pub fn from_vector(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

pub fn from_point(p: &Point<Real>) -> Vec3 {
    Vec3::new(p.x, p.y, p.z)
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_inverse_round_trip() {
        let pose = Pose::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_x(0.4));
        let p = Vec3::new(-2.0, 0.5, 7.0);
        let back = pose.inverse().transform_point(pose.transform_point(p));
        assert!((back - p).length() < 1e-5);
        assert!((pose.inverse_transform_point(pose.transform_point(p)) - p).length() < 1e-5);
    }

    #[test]
    fn test_isometry_conversion_keeps_pose() {
        let pose = Pose::new(Vec3::new(4.0, -1.0, 2.5), Quat::from_rotation_z(0.7));
        let back = Pose::from_isometry(&pose.to_isometry());
        assert!((back.position - pose.position).length() < 1e-6);
        assert!(back.rotation.abs_diff_eq(pose.rotation, 1e-6));

        let p = Vec3::new(0.3, 1.0, -2.0);
        let moved = pose.to_isometry() * to_point(p);
        assert!((from_point(&moved) - pose.transform_point(p)).length() < 1e-5);
    }
}
