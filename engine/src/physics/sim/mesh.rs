//! Validated triangle soup, kept alongside the collision shape built from it

use glam::Vec3;
use rapier3d::prelude::SharedShape;

use super::pose::to_point;

/// Collision margin given to triangle meshes when none is requested.
pub const DEFAULT_MESH_MARGIN: f32 = 0.04;

#[derive(Debug, Clone)]
pub struct TriangleMesh {
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
    pub margin: f32,
}

impl TriangleMesh {
    /// Builds a mesh, rejecting empty input, out-of-range indices and non-finite vertices.
    pub fn new(vertices: Vec<Vec3>, triangles: Vec<[u32; 3]>, margin: f32) -> Result<Self, String> {
        if vertices.is_empty() || triangles.is_empty() {
            return Err("mesh has no vertices or no triangles".to_string());
        }

        let count = vertices.len();
        if let Some(bad) = triangles
            .iter()
            .flatten()
            .find(|&&index| index as usize >= count)
        {
            return Err(format!("triangle index {bad} is out of range for {count} vertices"));
        }
        if vertices.iter().any(|v| !v.is_finite()) {
            return Err("non-finite vertex".to_string());
        }

        Ok(Self {
            vertices,
            triangles,
            margin: margin.max(0.0),
        })
    }

    pub fn shape(&self) -> SharedShape {
        let points = self.vertices.iter().map(|v| to_point(*v)).collect();
        SharedShape::trimesh(points, self.triangles.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_meshes() {
        assert!(TriangleMesh::new(Vec::new(), vec![[0, 1, 2]], 0.0).is_err());
        assert!(TriangleMesh::new(vec![Vec3::ZERO; 3], vec![[0, 1, 3]], 0.0).is_err());
        assert!(TriangleMesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::NAN], vec![[0, 1, 2]], 0.0).is_err());

        let mesh = TriangleMesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Z], vec![[0, 1, 2]], -1.0).unwrap();
        assert_eq!(mesh.margin, 0.0);
        assert!(mesh.shape().as_trimesh().is_some());
    }
}
