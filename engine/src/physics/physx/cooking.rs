//! Triangle mesh cooking
//!
//! Meshes are validated once, written to a compact byte buffer, and loaded back
//! without further checks beyond what is needed to trust the buffer.
//!
//! # Format
//!
//! ```text
//! CookedMeshHeader (32 bytes)
//! vertex_count   x [f32; 3]
//! triangle_count x [u32; 3]
//! ```
//!
//! Values are stored in native byte order.

use std::io::Read;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::physics::error::PhysicsError;
use crate::physics::sim::TriangleMesh;
use crate::physics::types::RawIndexedTriangle;

pub const COOKED_MESH_MAGIC: [u8; 4] = *b"CPXM";
pub const COOKED_MESH_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CookedMeshHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub vertex_count: u32,
    pub triangle_count: u32,
    pub margin: f32,
    pub reserved: [u32; 3],
}

static_assertions::assert_eq_size!(CookedMeshHeader, [u8; 32]);

/// Output stream writing into a growable byte buffer.
struct VecOutputStream<'a> {
    data: &'a mut Vec<u8>,
}

impl<'a> VecOutputStream<'a> {
    fn new(data: &'a mut Vec<u8>) -> Self {
        data.clear();
        Self { data }
    }

    fn write_pod<T: Pod>(&mut self, value: &T) {
        self.write_bytes(bytemuck::bytes_of(value));
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}

/// Input stream reading from a borrowed byte slice.
struct SliceInputStream<'a> {
    data: &'a [u8],
}

impl<'a> SliceInputStream<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn remaining(&self) -> usize {
        self.data.len()
    }

    fn read_pod<T: Pod>(&mut self) -> Result<T, PhysicsError> {
        let mut value = T::zeroed();
        self.data
            .read_exact(bytemuck::bytes_of_mut(&mut value))
            .map_err(|_| PhysicsError::InvalidCookedData("truncated data".to_string()))?;
        Ok(value)
    }
}

/// Validates a triangle mesh and serializes it.
pub fn cook_triangle_mesh(
    vertices: &[Vec3],
    triangles: &[RawIndexedTriangle],
    margin: f32,
) -> Result<Vec<u8>, PhysicsError> {
    if vertices.is_empty() || triangles.is_empty() {
        return Err(PhysicsError::InvalidGeometry("mesh has no vertices or no triangles".to_string()));
    }
    if let Some(triangle) = triangles.iter().find(|t| t.max_index() as usize >= vertices.len()) {
        return Err(PhysicsError::InvalidGeometry(format!(
            "triangle index {} out of range for {} vertices",
            triangle.max_index(),
            vertices.len()
        )));
    }
    if vertices.iter().any(|v| !v.is_finite()) {
        return Err(PhysicsError::InvalidGeometry("non-finite vertex".to_string()));
    }

    let header = CookedMeshHeader {
        magic: COOKED_MESH_MAGIC,
        version: COOKED_MESH_VERSION,
        vertex_count: vertices.len() as u32,
        triangle_count: triangles.len() as u32,
        margin,
        reserved: [0; 3],
    };

    let mut data = Vec::with_capacity(size_of::<CookedMeshHeader>() + vertices.len() * 12 + triangles.len() * 12);
    let mut stream = VecOutputStream::new(&mut data);
    stream.write_pod(&header);
    for vertex in vertices {
        stream.write_pod(&vertex.to_array());
    }
    stream.write_bytes(bytemuck::cast_slice(triangles));

    Ok(data)
}

/// Loads a buffer written by [`cook_triangle_mesh`].
pub fn load_triangle_mesh(data: &[u8]) -> Result<TriangleMesh, PhysicsError> {
    let mut stream = SliceInputStream::new(data);

    let header: CookedMeshHeader = stream.read_pod()?;
    if header.magic != COOKED_MESH_MAGIC {
        return Err(PhysicsError::InvalidCookedData("not a cooked triangle mesh".to_string()));
    }
    if header.version != COOKED_MESH_VERSION {
        return Err(PhysicsError::InvalidCookedData(format!(
            "unsupported version {}",
            header.version
        )));
    }

    let expected = (header.vertex_count as usize + header.triangle_count as usize) * 12;
    if stream.remaining() < expected {
        return Err(PhysicsError::InvalidCookedData("truncated data".to_string()));
    }

    let vertices = (0..header.vertex_count)
        .map(|_| stream.read_pod::<[f32; 3]>().map(Vec3::from_array))
        .collect::<Result<Vec<_>, _>>()?;
    let triangles = (0..header.triangle_count)
        .map(|_| stream.read_pod::<[u32; 3]>())
        .collect::<Result<Vec<_>, _>>()?;

    TriangleMesh::new(vertices, triangles, header.margin).map_err(PhysicsError::InvalidCookedData)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> (Vec<Vec3>, Vec<RawIndexedTriangle>) {
        (
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            vec![RawIndexedTriangle::new(0, 1, 2), RawIndexedTriangle::new(0, 2, 3)],
        )
    }

    #[test]
    fn test_cooked_layout() {
        let (vertices, triangles) = quad();
        let data = cook_triangle_mesh(&vertices, &triangles, 0.04).unwrap();
        assert_eq!(data.len(), 32 + 4 * 12 + 2 * 12);
        assert_eq!(&data[0..4], b"CPXM");

        let mesh = load_triangle_mesh(&data).unwrap();
        assert_eq!(mesh.vertices, vertices);
        assert_eq!(mesh.triangles, vec![[0, 1, 2], [0, 2, 3]]);
        assert_eq!(mesh.margin, 0.04);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let (vertices, _) = quad();
        assert!(matches!(
            cook_triangle_mesh(&vertices, &[RawIndexedTriangle::new(0, 1, 9)], 0.0),
            Err(PhysicsError::InvalidGeometry(_))
        ));
        assert!(cook_triangle_mesh(&[], &[], 0.0).is_err());
    }

    #[test]
    fn test_rejects_bad_buffers() {
        let (vertices, triangles) = quad();
        let data = cook_triangle_mesh(&vertices, &triangles, 0.0).unwrap();

        assert!(load_triangle_mesh(&data[..data.len() - 1]).is_err());
        assert!(load_triangle_mesh(&data[..10]).is_err());

        let mut wrong_magic = data.clone();
        wrong_magic[0] = b'X';
        assert!(load_triangle_mesh(&wrong_magic).is_err());

        let mut wrong_version = data.clone();
        wrong_version[4] = 7;
        assert!(load_triangle_mesh(&wrong_version).is_err());

        let mut bad_index = data;
        let last = bad_index.len() - 4;
        bad_index[last..].copy_from_slice(&100u32.to_ne_bytes());
        assert!(matches!(
            load_triangle_mesh(&bad_index),
            Err(PhysicsError::InvalidCookedData(_))
        ));
    }
}
