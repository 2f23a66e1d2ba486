//! Quantized heightfield templates
//!
//! PhysX stores heights as 16-bit signed samples. The scale factor mapping the
//! float samples onto the `i16` range is picked per template from the sample data
//! and travels with the field, so instantiation can divide it back out.
//!
//! The collision shape is a parry heightfield fed with the dequantized samples.
//! Parry centres its grid on the origin; the returned shape offset moves the
//! first sample back onto the body origin, where PhysX puts it.
//!
//! # Example
//!
//! ```ignore
//! let template = HeightfieldTemplate::from_samples(3, 3, &samples)?;
//! let (shape, offset) = template.shape(height_scale, terrain_scale);
//! ```

use std::sync::Arc;

use glam::Vec3;
use rapier3d::na::DMatrix;
use rapier3d::prelude::{SharedShape, Vector};

use crate::physics::error::PhysicsError;
use crate::physics::sim::Pose;

/// Row-major grid of 16-bit height samples. Rows run along local x, columns along local z.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightField {
    rows: usize,
    columns: usize,
    samples: Vec<i16>,
}

/// Maps grid indices and raw samples to local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightFieldScale {
    pub height: f32,
    pub row: f32,
    pub column: f32,
}

impl HeightField {
    pub fn new(rows: usize, columns: usize, samples: Vec<i16>) -> Result<Self, String> {
        if rows < 2 || columns < 2 {
            return Err(format!("{rows}x{columns} grid is smaller than 2x2"));
        }
        if samples.len() != rows * columns {
            return Err(format!("{rows}x{columns} grid with {} samples", samples.len()));
        }
        Ok(Self { rows, columns, samples })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn sample(&self, row: usize, column: usize) -> i16 {
        self.samples[row * self.columns + column]
    }

    pub fn local_point(&self, scale: &HeightFieldScale, row: usize, column: usize) -> Vec3 {
        Vec3::new(
            row as f32 * scale.row,
            f32::from(self.sample(row, column)) * scale.height,
            column as f32 * scale.column,
        )
    }
}

/// A cooked heightfield together with the factor its samples were scaled by.
#[derive(Debug, Clone)]
pub struct HeightfieldTemplate {
    pub field: Arc<HeightField>,
    pub scale_factor: f32,
}

/// Factor that stretches the largest sample magnitude to `i16::MAX`.
pub fn quantization_factor(samples: &[f32]) -> f32 {
    let extent = samples.iter().fold(0.0f32, |extent, h| extent.max(h.abs()));
    if extent > 0.0 {
        f32::from(i16::MAX) / extent
    } else {
        1.0
    }
}

impl HeightfieldTemplate {
    /// Quantizes `width * height` samples indexed `x * height + y`.
    pub fn from_samples(width: u32, height: u32, samples: &[f32]) -> Result<Self, PhysicsError> {
        let (rows, columns) = (width as usize, height as usize);
        if rows < 2 || columns < 2 || samples.len() != rows * columns {
            return Err(PhysicsError::InvalidHeightmap(format!(
                "{width}x{height} heightmap with {} samples",
                samples.len()
            )));
        }
        if samples.iter().any(|h| !h.is_finite()) {
            return Err(PhysicsError::InvalidHeightmap("non-finite sample".to_string()));
        }

        let scale_factor = quantization_factor(samples);
        let quantized = samples
            .iter()
            .map(|h| (h * scale_factor).round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16)
            .collect();

        // x runs along rows, y along columns
        let field = HeightField::new(rows, columns, quantized).map_err(PhysicsError::InvalidHeightmap)?;
        Ok(Self {
            field: Arc::new(field),
            scale_factor,
        })
    }

    /// Grid scaling for a body built with the given height and terrain scales.
    pub fn scale(&self, height_scale: f32, terrain_scale: f32) -> HeightFieldScale {
        HeightFieldScale {
            height: height_scale / self.scale_factor,
            row: terrain_scale,
            column: terrain_scale,
        }
    }

    /// Collision shape and its offset from the body origin.
    pub fn shape(&self, height_scale: f32, terrain_scale: f32) -> (SharedShape, Pose) {
        let field = &self.field;
        let scale = self.scale(height_scale, terrain_scale);

        // Parry's matrix rows run along z and its columns along x
        let heights = DMatrix::from_fn(field.columns(), field.rows(), |z, x| {
            f32::from(field.sample(x, z)) * scale.height
        });
        let extent_x = scale.row * (field.rows() - 1) as f32;
        let extent_z = scale.column * (field.columns() - 1) as f32;

        let shape = SharedShape::heightfield(heights, Vector::new(extent_x, 1.0, extent_z));
        let offset = Pose::from_position(Vec3::new(extent_x * 0.5, 0.0, extent_z * 0.5));
        (shape, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapier3d::parry::query::{Ray, RayCast};
    use rapier3d::prelude::Point;

    #[test]
    fn test_quantization_factor() {
        assert_eq!(quantization_factor(&[0.0, 0.0]), 1.0);
        assert!((quantization_factor(&[-2.0, 1.0]) - 32767.0 / 2.0).abs() < 1e-3);
        assert!((quantization_factor(&[0.5, 4.0]) - 32767.0 / 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_heights_survive_quantization() {
        let samples = [0.0, 1.25, -3.5, 7.0, 2.0, 0.1];
        let template = HeightfieldTemplate::from_samples(2, 3, &samples).unwrap();
        let scale = template.scale(2.0, 10.0);

        for x in 0..2 {
            for y in 0..3 {
                let point = template.field.local_point(&scale, x, y);
                let expected = samples[x * 3 + y] * 2.0;
                assert!((point.y - expected).abs() < 1e-3, "({x}, {y}): {} vs {expected}", point.y);
                assert_eq!(point.x, x as f32 * 10.0);
                assert_eq!(point.z, y as f32 * 10.0);
            }
        }
        assert_eq!(template.field.sample(1, 0), i16::MAX);
    }

    #[test]
    fn test_shape_places_samples_at_grid_points() {
        // 3x2 grid, tallest sample at x = 2, y = 1
        let samples = [0.0, 0.0, 0.0, 0.0, 0.0, 5.0];
        let template = HeightfieldTemplate::from_samples(3, 2, &samples).unwrap();
        let (shape, offset) = template.shape(1.0, 2.0);
        assert_eq!(offset.position, Vec3::new(2.0, 0.0, 1.0));

        let cast = |x: f32, z: f32| {
            let local = Vec3::new(x, 10.0, z) - offset.position;
            let ray = Ray::new(Point::new(local.x, local.y, local.z), Vector::new(0.0, -1.0, 0.0));
            shape.cast_local_ray(&ray, 100.0, true).map(|t| 10.0 - t)
        };
        assert!((cast(3.99, 1.99).unwrap() - 5.0).abs() < 0.05);
        assert!(cast(0.01, 0.01).unwrap().abs() < 1e-3);
        assert!(cast(-1.0, 0.5).is_none());
    }

    #[test]
    fn test_flat_field() {
        let template = HeightfieldTemplate::from_samples(2, 2, &[0.0; 4]).unwrap();
        assert_eq!(template.scale_factor, 1.0);
        assert_eq!(template.scale(3.0, 1.0).height, 3.0);
    }

    #[test]
    fn test_rejects_bad_dimensions() {
        assert!(matches!(
            HeightfieldTemplate::from_samples(2, 2, &[0.0; 3]),
            Err(PhysicsError::InvalidHeightmap(_))
        ));
        assert!(HeightfieldTemplate::from_samples(1, 4, &[0.0; 4]).is_err());
        assert!(HeightfieldTemplate::from_samples(2, 2, &[0.0, f32::NAN, 0.0, 0.0]).is_err());
        assert!(HeightField::new(2, 2, vec![0; 3]).is_err());
    }
}
