//! Physics Probe
//!
//! Run with: `cargo run --bin physics-probe [config.json]`
//!
//! Selects a physics backend the way the engine does at startup, then drops a
//! crate onto a floor and walks a character across it, logging what happened.
//! Useful for checking that a machine's PhysX libraries load.
//!
//! Set `RUST_LOG=debug` for per-library loading details.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use carbon_physics::physics::{
    Aabb, PhysicsConfig, PhysicsError, PhysicsInterface, PhysicsRegistry, Ray, SimpleTransform, Vec3,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

const DEFAULT_FILTER: &str = "info";

/// Simulated seconds.
const DURATION: f32 = 3.0;

/// Frame time fed to `update`, deliberately not a whole substep.
const FRAME_TIME: f32 = 1.0 / 45.0;

fn init_logging() {
    let mut filter = DEFAULT_FILTER.to_owned();
    if let Ok(env_filter) = env::var(EnvFilter::DEFAULT_ENV) {
        filter.push(',');
        filter.push_str(&env_filter);
    }

    let format = fmt::format().compact().with_line_number(true);
    let subscriber = Registry::default()
        .with(EnvFilter::new(filter))
        .with(fmt::layer().event_format(format));
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("unable to install log subscriber");
    }
}

fn load_config() -> Result<PhysicsConfig, PhysicsError> {
    match env::args_os().nth(1) {
        Some(path) => {
            let path = PathBuf::from(path);
            info!(path = %path.display(), "Loading physics config");
            PhysicsConfig::load(&path)
        }
        None => Ok(PhysicsConfig::default()),
    }
}

fn run_scenario(physics: &mut dyn PhysicsInterface) {
    let floor = physics.create_bounding_box_body(
        &Aabb::new(Vec3::new(-50.0, -1.0, -50.0), Vec3::new(50.0, 0.0, 50.0)),
        0.0,
        true,
        None,
        &SimpleTransform::IDENTITY,
    );
    let falling = physics.create_bounding_box_body(
        &Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)),
        10.0,
        false,
        None,
        &SimpleTransform::from_position(Vec3::new(0.0, 5.0, 0.0)),
    );
    let (Some(_floor), Some(falling)) = (floor, falling) else {
        warn!(backend = physics.engine_name(), "Backend created no bodies, nothing to simulate");
        return;
    };

    let character = physics.create_character_controller(1.0, 0.4, None);
    if let Some(character) = character {
        physics.set_character_controller_position(character, Vec3::new(-5.0, 1.0, 3.0));
    }

    let mut steps = 0;
    let mut elapsed = 0.0;
    while elapsed < DURATION {
        if let Some(character) = character {
            physics.move_character_controller(character, Vec3::new(1.5, -0.5, 0.0) * FRAME_TIME, FRAME_TIME);
        }
        steps += physics.update(FRAME_TIME);
        elapsed += FRAME_TIME;
    }

    let rest = physics.body_transform(falling).map(|transform| transform.position);
    info!(steps, resting_position = ?rest, "Crate dropped");

    if let Some(hit) = physics.raycast(&Ray::new(Vec3::new(0.0, 20.0, 0.0), Vec3::NEG_Y)) {
        info!(distance = hit.distance, position = ?hit.position, "Ray from above hit");
    }

    if let Some(character) = character {
        info!(
            position = ?physics.character_controller_position(character),
            grounded = physics.character_controller_down_axis_collision(character).is_some(),
            "Character walked"
        );
    }
}

fn main() -> ExitCode {
    init_logging();

    let config = match load_config() {
        Ok(config) => config,
        Err(config_error) => {
            error!("{config_error}");
            return ExitCode::FAILURE;
        }
    };

    let registry = PhysicsRegistry::with_defaults();
    info!(backends = ?registry.names(), "Probing physics backends");

    let mut physics = match registry.select(&config) {
        Ok(physics) => physics,
        Err(select_error) => {
            error!("{select_error}");
            return ExitCode::FAILURE;
        }
    };
    info!(backend = physics.engine_name(), "Physics ready");

    run_scenario(physics.as_mut());
    physics.shutdown();
    ExitCode::SUCCESS
}
