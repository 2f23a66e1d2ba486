//! PhysX Backend Tests
//!
//! Behavior specific to the PhysX backend: cooked geometry that survives a trip
//! through a file, quantized heightfields, runtime library loading, clock-driven
//! character controllers and native error reporting.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use carbon_physics::physics::physx::cooking::{cook_triangle_mesh, load_triangle_mesh, COOKED_MESH_MAGIC};
use carbon_physics::physics::physx::{ErrorCallback, ErrorCode, HeightfieldTemplate, ManualClock};
use carbon_physics::physics::{
    Aabb, NullPhysics, PhysX, PhysXLinkage, PhysicsConfig, PhysicsError, PhysicsInterface, PhysicsRegistry,
    RawIndexedTriangle, Ray, SimpleTransform, Vec3,
};

// ============================================================================
// Helpers
// ============================================================================

fn physx() -> PhysX {
    let mut physx = PhysX::new(&PhysicsConfig::default());
    physx.setup().unwrap();
    physx
}

fn cube_mesh() -> (Vec<Vec3>, Vec<RawIndexedTriangle>) {
    let vertices = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)).corners().to_vec();
    let faces = [
        [0, 2, 3, 1],
        [4, 5, 7, 6],
        [0, 1, 5, 4],
        [2, 6, 7, 3],
        [0, 4, 6, 2],
        [1, 3, 7, 5],
    ];
    let triangles = faces
        .iter()
        .flat_map(|[a, b, c, d]| [RawIndexedTriangle::new(*a, *b, *c), RawIndexedTriangle::new(*a, *c, *d)])
        .collect();
    (vertices, triangles)
}

fn missing_libraries_config() -> PhysicsConfig {
    let mut config = PhysicsConfig::default();
    config.physx.linkage = PhysXLinkage::Dynamic;
    config.physx.library_dir = Some(PathBuf::from("/nonexistent/carbon/physx"));
    config
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(ErrorCode, String)>>>);

impl ErrorCallback for Recorder {
    fn report_error(&self, code: ErrorCode, message: &str, _file: &str, _line: u32) {
        if let Ok(mut reports) = self.0.lock() {
            reports.push((code, message.to_string()));
        }
    }
}

// ============================================================================
// Cooking
// ============================================================================

#[test]
fn test_cooked_geometry_cached_on_disk() {
    let (vertices, triangles) = cube_mesh();
    let mut physx = physx();
    let cooked = physx.pre_process_geometry(&vertices, &triangles).unwrap();
    assert_eq!(cooked[..4], COOKED_MESH_MAGIC);

    let path = std::env::temp_dir().join(format!("carbon-physics-cube-{}.mesh", std::process::id()));
    fs::write(&path, &cooked).unwrap();
    let cached = fs::read(&path).unwrap();
    fs::remove_file(&path).unwrap();

    // A fresh backend loads the cached buffer
    let mut physx = self::physx();
    let template = physx
        .create_body_template_from_pre_processed_geometry(&cached, true)
        .unwrap();
    let body = physx
        .create_geometry_body_from_template(
            template,
            0.0,
            true,
            None,
            &SimpleTransform::from_position(Vec3::new(10.0, 0.0, 0.0)),
        )
        .unwrap();
    assert_eq!(physx.body_template_users(template), Some(1));

    let hit = physx.raycast(&Ray::new(Vec3::new(0.0, 0.3, 0.2), Vec3::X)).unwrap();
    assert_eq!(hit.body, body);
    assert!((hit.distance - 9.0).abs() < 1e-4);
}

#[test]
fn test_cooked_data_validated() {
    let (vertices, triangles) = cube_mesh();
    let cooked = cook_triangle_mesh(&vertices, &triangles, 0.0).unwrap();

    let mesh = load_triangle_mesh(&cooked).unwrap();
    assert_eq!(mesh.vertices, vertices);
    assert_eq!(mesh.triangles.len(), triangles.len());

    let mut wrong_magic = cooked.clone();
    wrong_magic[0] = b'X';
    assert!(matches!(load_triangle_mesh(&wrong_magic), Err(PhysicsError::InvalidCookedData(_))));
    assert!(matches!(
        load_triangle_mesh(&cooked[..cooked.len() - 1]),
        Err(PhysicsError::InvalidCookedData(_))
    ));

    let mut physx = physx();
    assert!(physx
        .create_body_template_from_pre_processed_geometry(&wrong_magic, false)
        .is_none());
    assert!(physx.create_body_template_from_pre_processed_geometry(&[], false).is_none());
}

// ============================================================================
// Heightfields
// ============================================================================

#[test]
fn test_heightfield_quantization_keeps_heights() {
    let samples = [0.0, 12.5, -40.0, 3.25, 7.0, -0.5];
    let template = HeightfieldTemplate::from_samples(3, 2, &samples).unwrap();
    assert_eq!(template.field.rows(), 3);
    assert_eq!(template.field.columns(), 2);

    // The largest magnitude maps onto the full 16-bit range
    assert_eq!(template.field.sample(1, 0), -i16::MAX);

    let scale = template.scale(2.0, 4.0);
    for x in 0..3 {
        for y in 0..2 {
            let point = template.field.local_point(&scale, x, y);
            let expected = samples[x * 2 + y] * 2.0;
            assert!((point.y - expected).abs() < 5e-3, "sample ({x}, {y}) is {} not {expected}", point.y);
            assert_eq!(point.x, x as f32 * 4.0);
            assert_eq!(point.z, y as f32 * 4.0);
        }
    }
}

#[test]
fn test_heightfield_rejects_bad_samples() {
    assert!(matches!(
        HeightfieldTemplate::from_samples(2, 2, &[0.0, 1.0, f32::NAN, 2.0]),
        Err(PhysicsError::InvalidHeightmap(_))
    ));
    assert!(matches!(
        HeightfieldTemplate::from_samples(1, 4, &[0.0; 4]),
        Err(PhysicsError::InvalidHeightmap(_))
    ));

    let reports = Recorder::default();
    let mut physx = PhysX::new(&PhysicsConfig::default()).with_error_callback(Box::new(reports.clone()));
    physx.setup().unwrap();
    assert!(physx.create_body_template_from_heightmap(2, 2, &[0.0; 3], false).is_none());
    assert_eq!(physx.body_template_count(), 0);
    assert!(!reports.0.lock().unwrap().is_empty());
}

// ============================================================================
// Runtime
// ============================================================================

#[test]
fn test_missing_libraries_fall_back() {
    let config = missing_libraries_config();

    let mut physx = PhysX::new(&config);
    assert!(!physx.is_available());
    assert!(matches!(physx.setup(), Err(PhysicsError::LibraryLoad { .. })));

    let mut registry = PhysicsRegistry::new();
    registry.register("PhysX", 50, |config| Box::new(PhysX::new(config)));
    registry.register("None", 0, |config| Box::new(NullPhysics::new(config)));
    let selected = registry.select(&config).unwrap();
    assert_eq!(selected.engine_name(), "None");
}

#[test]
fn test_static_linkage_always_available() {
    let mut config = missing_libraries_config();
    config.physx.linkage = PhysXLinkage::Static;

    let mut physx = PhysX::new(&config);
    assert!(physx.is_available());
    assert!(physx.setup().is_ok());
    assert!(physx.scene().is_some());

    physx.shutdown();
    assert!(physx.scene().is_none());
}

// ============================================================================
// Character controllers
// ============================================================================

#[test]
fn test_controller_reports_floor_and_ceiling() {
    let clock = Arc::new(ManualClock::new(0.0));
    let mut physx = PhysX::new(&PhysicsConfig::default()).with_clock(clock.clone());
    physx.setup().unwrap();

    for aabb in [
        Aabb::new(Vec3::new(-10.0, -1.0, -10.0), Vec3::new(10.0, 0.0, 10.0)),
        Aabb::new(Vec3::new(-10.0, 3.0, -10.0), Vec3::new(10.0, 4.0, 10.0)),
    ] {
        physx
            .create_bounding_box_body(&aabb, 0.0, true, None, &SimpleTransform::IDENTITY)
            .unwrap();
    }
    let controller = physx.create_character_controller(1.0, 0.5, None).unwrap();
    physx.set_character_controller_position(controller, Vec3::new(0.0, 1.5, 0.0));

    clock.advance(0.1);
    physx.move_character_controller(controller, Vec3::new(0.0, -1.0, 0.0), 0.1);
    assert!(physx
        .character_controller_down_axis_collision(controller)
        .is_some_and(|normal| normal.y > 0.99));
    assert!(physx.character_controller_up_axis_collision(controller).is_none());
    assert!((physx.character_controller_position(controller).y - 1.04).abs() < 0.01);

    clock.advance(0.1);
    physx.move_character_controller(controller, Vec3::new(0.0, 2.0, 0.0), 0.1);
    assert!(physx
        .character_controller_up_axis_collision(controller)
        .is_some_and(|normal| normal.y < -0.99));
    assert!(physx.character_controller_down_axis_collision(controller).is_none());
    assert!((physx.character_controller_position(controller).y - 1.96).abs() < 0.01);
}

#[test]
fn test_tiny_moves_ignored() {
    let mut physx = physx();
    let controller = physx.create_character_controller(1.0, 0.5, None).unwrap();
    physx.set_character_controller_position(controller, Vec3::new(1.0, 2.0, 3.0));

    physx.move_character_controller(controller, Vec3::splat(1e-5), 0.016);
    assert_eq!(physx.character_controller_position(controller), Vec3::new(1.0, 2.0, 3.0));
}

// ============================================================================
// Error reporting
// ============================================================================

#[test]
fn test_invalid_calls_reported() {
    let reports = Recorder::default();
    let mut physx = PhysX::new(&PhysicsConfig::default()).with_error_callback(Box::new(reports.clone()));
    physx.setup().unwrap();

    let body = physx
        .create_bounding_box_body(
            &Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)),
            1.0,
            false,
            None,
            &SimpleTransform::IDENTITY,
        )
        .unwrap();
    assert!(physx.create_hinge_joint(body, body, Vec3::ZERO, Vec3::Y).is_none());
    assert!(physx.create_character_controller(1.0, 0.0, None).is_none());

    let reports = reports.0.lock().unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|(code, _)| *code == ErrorCode::InvalidParameter));
    assert!(reports[0].1.contains("itself"));
}
