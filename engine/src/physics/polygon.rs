//! 2D collision geometry helpers
//!
//! Turns sprite alpha masks into simplified outline polygons and extrudes 2D
//! outlines into thin triangle prisms usable as body templates.
//!
//! # Outline Extraction
//!
//! 1. Pixels with alpha above one half are solid
//! 2. Solid pixels with an empty 8-neighbour are edge pixels
//! 3. Edge pixels are walked into closed loops through 4-adjacent neighbours,
//!    backing up once on a dead end
//! 4. Each loop is simplified: collinear runs collapse, long axis-aligned edges on
//!    the image border and long right-angle corners are pinned, the ends of long
//!    straight runs are pulled back so only the run's body is pinned, and the rest
//!    is thinned with a growing distance threshold as long as the shortcut stays on
//!    the bitmap edge
//! 5. Vertices are normalized to 0-1, optionally flipped, and wound clockwise
//!
//! # Example
//!
//! ```ignore
//! let mask = image::open("level_collision.png")?.to_rgba8();
//! if let Some(polygons) = convert_image_alpha_to_2d_polygons(&mask, false, true) {
//!     let (vertices, triangles) = convert_2d_polygons_to_collision_geometry(&polygons, 50.0);
//!     physics.create_body_template_from_geometry(&vertices, &triangles, false, 0.0);
//! }
//! ```

use image::RgbaImage;
use tracing::{debug, error};

use super::types::{RawIndexedTriangle, Vec2, Vec3};

/// Axis-aligned edges longer than this (in pixels) are favoured by simplification.
const STRAIGHT_EDGE_LENGTH: i32 = 30;

/// Distance the ends of a long straight edge are pulled back.
const STRAIGHT_EDGE_PULL_BACK: i32 = STRAIGHT_EDGE_LENGTH / 3;

/// Half-extent of the neighbourhood checked by the edge continuity test.
const EDGE_NEIGHBOURHOOD: i32 = 2;

/// Z extent of geometry produced from a line strip.
const LINE_STRIP_DEPTH: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutlineVertex {
    x: i32,
    y: i32,
    /// Pinned vertices survive simplification
    keep: bool,
}

impl OutlineVertex {
    fn new(x: i32, y: i32) -> Self {
        Self { x, y, keep: false }
    }

    fn distance(&self, other: &OutlineVertex) -> f32 {
        self.offset_to(other).length()
    }

    fn offset_to(&self, other: &OutlineVertex) -> Vec2 {
        Vec2::new((other.x - self.x) as f32, (other.y - self.y) as f32)
    }

    fn is_axial_edge(&self, other: &OutlineVertex) -> bool {
        (self.x == other.x && (self.y - other.y).abs() > STRAIGHT_EDGE_LENGTH)
            || (self.y == other.y && (self.x - other.x).abs() > STRAIGHT_EDGE_LENGTH)
    }

    fn position(&self) -> Vec2 {
        Vec2::new(self.x as f32, self.y as f32)
    }
}

fn is_right_angle(a: Vec2, b: Vec2) -> bool {
    a.normalize_or_zero().dot(b.normalize_or_zero()).abs() < 0.05
}

/// Solid/empty mask built from an image's alpha channel.
struct Bitmap {
    width: i32,
    height: i32,
    solid: Vec<bool>,
}

impl Bitmap {
    fn from_alpha(image: &RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let solid = image.pixels().map(|pixel| pixel.0[3] > 127).collect();
        Self {
            width: width as i32,
            height: height as i32,
            solid,
        }
    }

    /// Out-of-range pixels are empty.
    fn get(&self, x: i32, y: i32) -> bool {
        if x >= 0 && x < self.width && y >= 0 && y < self.height {
            self.solid[(y * self.width + x) as usize]
        } else {
            false
        }
    }

    fn is_edge_pixel(&self, x: i32, y: i32) -> bool {
        if !self.get(x, y) {
            return false;
        }
        (-1..=1).any(|i| (-1..=1).any(|j| (i != 0 || j != 0) && !self.get(x + i, y + j)))
    }

    fn is_adjacent(a: &OutlineVertex, b: &OutlineVertex) -> bool {
        (a.x == b.x || a.y == b.y) && (a.x - b.x).abs() <= 1 && (a.y - b.y).abs() <= 1
    }

    /// Whether the neighbourhood of a pixel holds both solid and empty pixels.
    fn is_near_edge(&self, x: i32, y: i32) -> bool {
        let mut solids = 0;
        let mut empties = 0;
        for i in -EDGE_NEIGHBOURHOOD..=EDGE_NEIGHBOURHOOD {
            for j in -EDGE_NEIGHBOURHOOD..=EDGE_NEIGHBOURHOOD {
                if self.get(x + i, y + j) {
                    solids += 1;
                } else {
                    empties += 1;
                }
                if solids > 0 && empties > 0 {
                    return true;
                }
            }
        }
        false
    }

    /// Walks the straight line from `a` to `b` and checks it stays near the bitmap edge.
    fn connected_by_edge(&self, a: &OutlineVertex, b: &OutlineVertex) -> bool {
        let dx = b.x - a.x;
        let dy = b.y - a.y;

        let (steps, step) = if dx.abs() > dy.abs() {
            let steps = dx.abs();
            (steps, Vec2::new(dx.signum() as f32, dy as f32 / steps as f32))
        } else {
            let steps = dy.abs();
            if steps == 0 {
                return true;
            }
            (steps, Vec2::new(dx as f32 / steps as f32, dy.signum() as f32))
        };

        let mut p = a.position();
        for _ in 0..steps {
            p += step;
            if !self.is_near_edge(p.x as i32, p.y as i32) {
                return false;
            }
        }
        true
    }
}

/// Extracts the outlines of the solid regions of `image`'s alpha channel.
///
/// # Arguments
///
/// * `image` - Source image; alpha above one half counts as solid
/// * `flip_horizontally` - Mirror the output across x = 0.5
/// * `flip_vertically` - Mirror the output across y = 0.5
///
/// # Returns
///
/// Clockwise polygons with coordinates in 0-1, or `None` when nothing was extracted.
pub fn convert_image_alpha_to_2d_polygons(
    image: &RgbaImage,
    flip_horizontally: bool,
    flip_vertically: bool,
) -> Option<Vec<Vec<Vec2>>> {
    let (width, height) = image.dimensions();
    if width < 2 || height < 2 {
        error!(width, height, "The passed image is not a valid 2D image");
        return None;
    }

    let bitmap = Bitmap::from_alpha(image);

    let mut edge_pixels = Vec::new();
    for y in 0..bitmap.height {
        for x in 0..bitmap.width {
            if bitmap.is_edge_pixel(x, y) {
                edge_pixels.push(OutlineVertex::new(x, y));
            }
        }
    }

    let mut polygons = Vec::new();
    while let Some(start) = edge_pixels.pop() {
        if let Some(outline) = trace_outline(start, &mut edge_pixels) {
            if let Some(polygon) = simplify_outline(outline, &bitmap) {
                polygons.push(normalize_polygon(&polygon, width, height, flip_horizontally, flip_vertically));
            }
        }
    }

    debug!(count = polygons.len(), "extracted collision polygons");
    (!polygons.is_empty()).then_some(polygons)
}

/// Walks adjacent edge pixels from `start` until the loop closes.
fn trace_outline(start: OutlineVertex, edge_pixels: &mut Vec<OutlineVertex>) -> Option<Vec<OutlineVertex>> {
    let mut outline = vec![start];

    // One step back is allowed after a dead end, which unsticks the walk at sharp points
    let mut has_backtracked = false;

    loop {
        let last = *outline.last()?;
        let Some(next) = edge_pixels.iter().position(|p| Bitmap::is_adjacent(&last, p)) else {
            if has_backtracked {
                return None;
            }
            outline.pop();
            has_backtracked = true;
            if outline.is_empty() {
                return None;
            }
            continue;
        };

        outline.push(edge_pixels.remove(next));
        has_backtracked = false;

        if outline.len() >= 4 && Bitmap::is_adjacent(&outline[0], &outline[outline.len() - 1]) {
            return Some(outline);
        }
    }
}

fn simplify_outline(mut polygon: Vec<OutlineVertex>, bitmap: &Bitmap) -> Option<Vec<OutlineVertex>> {
    // Collapse perfectly horizontal and vertical runs
    let mut i = 0;
    while i < polygon.len() && polygon.len() > 2 {
        let n = polygon.len();
        let (a, b, c) = (polygon[i], polygon[(i + 1) % n], polygon[(i + 2) % n]);
        if (a.x == b.x && a.x == c.x) || (a.y == b.y && a.y == c.y) {
            polygon.remove((i + 1) % n);
        } else {
            i += 1;
        }
    }

    // Pin long axis-aligned edges lying on the image border
    let n = polygon.len();
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        let on_border = a.x == 0 || a.x == bitmap.width - 1 || a.y == 0 || a.y == bitmap.height - 1;
        if on_border && a.is_axial_edge(&b) {
            polygon[i].keep = true;
            polygon[(i + 1) % n].keep = true;
        }
    }

    // Pin right-angle corners between long axis-aligned edges
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        let c = polygon[(i + 2) % n];
        if a.is_axial_edge(&b) && b.is_axial_edge(&c) && is_right_angle(b.offset_to(&a), b.offset_to(&c)) {
            polygon[(i + 1) % n].keep = true;
        }
    }

    pull_back_straight_edges(&mut polygon);

    // Thin the outline with progressively larger shortcuts
    let limit = bitmap.width.max(bitmap.height) as f32;
    let mut threshold = 1.5;
    while polygon.len() > 3 {
        let mut i = 0;
        while i < polygon.len() {
            let n = polygon.len();
            let a = polygon[i];
            let b = polygon[(i + 1) % n];
            let c = polygon[(i + 2) % n];
            if !b.keep && a.distance(&c) < threshold && bitmap.connected_by_edge(&a, &c) {
                polygon.remove((i + 1) % n);
            }
            i += 1;
        }

        threshold += 1.0;
        if threshold >= limit {
            break;
        }
    }

    (polygon.len() >= 3).then_some(polygon)
}

/// Inserts vertices one pixel apart at both ends of every long straight edge and
/// pins the innermost one, so the ends stay simplifiable while the run is kept.
fn pull_back_straight_edges(polygon: &mut Vec<OutlineVertex>) {
    let mut i = 0;
    while i < polygon.len() {
        let next = (i + 1) % polygon.len();
        let a = polygon[i];
        let b = polygon[next];
        if !a.is_axial_edge(&b) {
            i += 1;
            continue;
        }

        let sx = (b.x - a.x).signum();
        let sy = (b.y - a.y).signum();
        let mut inserted = Vec::new();

        if !a.keep {
            for j in 1..=STRAIGHT_EDGE_PULL_BACK {
                inserted.push(OutlineVertex {
                    keep: j == STRAIGHT_EDGE_PULL_BACK,
                    ..OutlineVertex::new(a.x + sx * j, a.y + sy * j)
                });
            }
        }
        if !b.keep {
            for j in (1..=STRAIGHT_EDGE_PULL_BACK).rev() {
                inserted.push(OutlineVertex {
                    keep: j == STRAIGHT_EDGE_PULL_BACK,
                    ..OutlineVertex::new(b.x - sx * j, b.y - sy * j)
                });
            }
        }

        let count = inserted.len();
        polygon.splice(i + 1..i + 1, inserted);
        i += count + 1;
    }
}

fn normalize_polygon(
    polygon: &[OutlineVertex],
    width: u32,
    height: u32,
    flip_horizontally: bool,
    flip_vertically: bool,
) -> Vec<Vec2> {
    let scale = Vec2::new((width - 1) as f32, (height - 1) as f32);
    let mut output: Vec<Vec2> = polygon
        .iter()
        .map(|vertex| {
            let mut v = vertex.position() / scale;
            if flip_horizontally {
                v.x = 1.0 - v.x;
            }
            if flip_vertically {
                v.y = 1.0 - v.y;
            }
            v
        })
        .collect();

    let center = output.iter().copied().sum::<Vec2>() / output.len() as f32;
    if (output[0] - center).perp_dot(output[1] - center) > 0.0 {
        output.reverse();
    }
    output
}

/// Extrudes closed 2D polygons into prisms spanning `-z_scale..z_scale`.
///
/// Every polygon vertex becomes a back/front pair and every edge two triangles.
pub fn convert_2d_polygons_to_collision_geometry(
    polygons: &[Vec<Vec2>],
    z_scale: f32,
) -> (Vec<Vec3>, Vec<RawIndexedTriangle>) {
    let mut vertices = Vec::new();
    let mut triangles = Vec::new();
    for polygon in polygons {
        extrude_loop(polygon, z_scale, &mut vertices, &mut triangles);
    }
    (vertices, triangles)
}

/// Geometry for a single closed line strip extruded ±10 units in Z.
pub fn line_strip_to_collision_geometry(points: &[Vec2]) -> (Vec<Vec3>, Vec<RawIndexedTriangle>) {
    let mut vertices = Vec::new();
    let mut triangles = Vec::new();
    extrude_loop(points, LINE_STRIP_DEPTH, &mut vertices, &mut triangles);
    (vertices, triangles)
}

fn extrude_loop(points: &[Vec2], z: f32, vertices: &mut Vec<Vec3>, triangles: &mut Vec<RawIndexedTriangle>) {
    let offset = vertices.len() as u32;
    let count = points.len() as u32;
    for (j, point) in (0u32..).zip(points) {
        let next = (j + 1) % count;
        vertices.push(Vec3::new(point.x, point.y, -z));
        vertices.push(Vec3::new(point.x, point.y, z));

        triangles.push(RawIndexedTriangle::new(offset + j * 2, offset + j * 2 + 1, offset + next * 2));
        triangles.push(RawIndexedTriangle::new(
            offset + j * 2 + 1,
            offset + next * 2 + 1,
            offset + next * 2,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn square_image() -> RgbaImage {
        RgbaImage::from_fn(32, 32, |x, y| {
            if (11..=20).contains(&x) && (11..=20).contains(&y) {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    #[test]
    fn test_square_outline() {
        let polygons = convert_image_alpha_to_2d_polygons(&square_image(), false, false).unwrap();
        assert_eq!(polygons.len(), 1);

        let pixels: Vec<Vec2> = polygons[0].iter().map(|v| (*v * 31.0).round()).collect();
        assert_eq!(
            pixels,
            vec![
                Vec2::new(20.0, 20.0),
                Vec2::new(20.0, 11.0),
                Vec2::new(11.0, 11.0),
                Vec2::new(11.0, 20.0),
            ]
        );
    }

    #[test]
    fn test_empty_image_has_no_polygons() {
        let image = RgbaImage::new(16, 16);
        assert!(convert_image_alpha_to_2d_polygons(&image, false, false).is_none());
    }

    #[test]
    fn test_horizontal_flip() {
        let polygons = convert_image_alpha_to_2d_polygons(&square_image(), true, false).unwrap();
        for v in &polygons[0] {
            let x = (v.x * 31.0).round();
            assert!(x == 11.0 || x == 20.0);
        }
    }

    #[test]
    fn test_pull_back_inserts_between_ends() {
        let mut polygon = vec![OutlineVertex::new(0, 5), OutlineVertex::new(40, 5), OutlineVertex::new(20, 30)];
        pull_back_straight_edges(&mut polygon);

        let xs: Vec<i32> = polygon.iter().take(22).map(|v| v.x).collect();
        let expected: Vec<i32> = std::iter::once(0).chain(1..=10).chain(30..=39).chain([40]).collect();
        assert_eq!(xs, expected);
        assert!(polygon[10].keep);
        assert!(polygon[11].keep);
        assert!(!polygon[1].keep);
    }

    #[test]
    fn test_extrusion_layout() {
        let square = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ];
        let (vertices, triangles) = convert_2d_polygons_to_collision_geometry(&[square], 2.0);
        assert_eq!(vertices.len(), 8);
        assert_eq!(triangles.len(), 8);
        assert_eq!(vertices[0], Vec3::new(0.0, 0.0, -2.0));
        assert_eq!(vertices[1], Vec3::new(0.0, 0.0, 2.0));
        assert_eq!(triangles[6], RawIndexedTriangle::new(6, 7, 0));
        assert_eq!(triangles[7], RawIndexedTriangle::new(7, 1, 0));
    }
}
