//! Physics configuration
//!
//! Every tunable the backends read at setup time. Defaults reproduce the engine's
//! stock behaviour; a JSON file can override any subset of fields.
//!
//! # Example
//!
//! ```ignore
//! use carbon_physics::physics::PhysicsConfig;
//!
//! let config = PhysicsConfig::from_json_str(r#"{ "bullet": { "enable_vertical_step": true } }"#)?;
//! assert_eq!(config.substep_size, 1.0 / 60.0);
//! ```

use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::error::PhysicsError;
use super::types::Aabb;

/// Gravity applied to new worlds.
pub const DEFAULT_GRAVITY: Vec3 = Vec3::new(0.0, -9.8, 0.0);

/// Half size of the default world limits on every axis.
pub const DEFAULT_WORLD_EXTENT: f32 = 5000.0;

/// Root configuration shared by every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Length of one fixed simulation tick in seconds.
    pub substep_size: f32,
    /// Maximum ticks run by a single `update()`; excess time is dropped.
    pub max_substeps: u32,
    pub gravity: Vec3,
    pub world_limits: Aabb,
    pub bullet: BulletConfig,
    pub physx: PhysXConfig,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            substep_size: 1.0 / 60.0,
            max_substeps: 8,
            gravity: DEFAULT_GRAVITY,
            world_limits: Aabb::new(
                Vec3::splat(-DEFAULT_WORLD_EXTENT),
                Vec3::splat(DEFAULT_WORLD_EXTENT),
            ),
            bullet: BulletConfig::default(),
            physx: PhysXConfig::default(),
        }
    }
}

impl PhysicsConfig {
    pub fn from_json_str(json: &str) -> Result<Self, PhysicsError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON config file.
    pub fn load(path: &Path) -> Result<Self, PhysicsError> {
        let text = std::fs::read_to_string(path).map_err(|source| PhysicsError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

/// Settings for the Bullet backend and its kinematic character controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulletConfig {
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub linear_sleeping_threshold: f32,
    pub angular_sleeping_threshold: f32,
    pub solver_iterations: u32,
    /// Height the character controller may climb when vertical stepping is enabled.
    pub character_step_height: f32,
    /// Steepest walkable slope for the character controller, in degrees.
    pub character_max_slope_degrees: f32,
    /// Runs the controller's step-up/step-down passes around each horizontal move.
    pub enable_vertical_step: bool,
}

impl Default for BulletConfig {
    fn default() -> Self {
        Self {
            linear_damping: 0.15,
            angular_damping: 0.15,
            linear_sleeping_threshold: 0.4,
            angular_sleeping_threshold: 0.5,
            solver_iterations: 10,
            character_step_height: 5.0,
            character_max_slope_degrees: 45.0,
            enable_vertical_step: false,
        }
    }
}

/// How the PhysX runtime is linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysXLinkage {
    /// Built into the process; always available.
    Static,
    /// Loaded from shared libraries at setup time.
    Dynamic,
}

/// Settings for the PhysX backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysXConfig {
    pub linkage: PhysXLinkage,
    /// Directory searched for the PhysX shared libraries, the loader's default search path when unset.
    pub library_dir: Option<PathBuf>,
    /// Load the `DEBUG` builds of the shared libraries.
    pub debug_libraries: bool,
    pub static_friction: f32,
    pub dynamic_friction: f32,
    pub restitution: f32,
    pub contact_offset: f32,
    pub controller_contact_offset: f32,
    /// Steepest walkable slope for character controllers, in degrees.
    pub controller_slope_limit_degrees: f32,
    pub solver_iterations: u32,
}

impl Default for PhysXConfig {
    fn default() -> Self {
        Self {
            linkage: PhysXLinkage::Static,
            library_dir: None,
            debug_libraries: cfg!(debug_assertions),
            static_friction: 0.5,
            dynamic_friction: 0.5,
            restitution: 0.1,
            contact_offset: 0.02,
            controller_contact_offset: 0.04,
            controller_slope_limit_degrees: 45.0,
            solver_iterations: 8,
        }
    }
}
