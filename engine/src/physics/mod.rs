//! Physics module for Carbon
//!
//! One contract, [`PhysicsInterface`], with interchangeable backends behind it.
//! The engine picks a backend at startup through the [`PhysicsRegistry`] and never
//! talks to a physics library directly.
//!
//! # Unit System
//!
//! **1 unit = 1 meter** (SI units throughout)
//!
//! - Distances in meters
//! - Velocities in m/s
//! - Forces in N, impulses in N·s
//! - Mass in kg
//! - Angles in radians unless a name says degrees
//!
//! # Submodules
//!
//! - [`types`] - Engine value types (Vec3, Quat, Aabb, SimpleTransform)
//! - [`interface`] - The backend contract and handle types
//! - [`registry`] - Priority-ordered backend selection and the null backend
//! - [`stepper`] - Fixed-timestep accumulator shared by every backend
//! - [`polygon`] - 2D collision outlines from image alpha and their extrusion
//! - [`sim`] - Rapier-backed world with the sweeps and contact queries controllers need
//! - [`scene`] - Body, joint, template and controller bookkeeping shared by the backends
//! - [`bullet`] - Bullet-style backend with a kinematic character controller
//! - [`physx`] - PhysX-style backend with cooking, heightfields and runtime loading

pub mod bullet;
pub mod config;
pub mod error;
pub mod interface;
pub mod physx;
pub mod polygon;
pub mod registry;
pub mod scene;
pub mod sim;
pub mod stepper;
pub mod types;

// Re-export commonly used types at the physics module level
pub use bullet::Bullet;
pub use config::{BulletConfig, PhysXConfig, PhysXLinkage, PhysicsConfig};
pub use error::PhysicsError;
pub use interface::{
    BodyHandle, BodyTemplateHandle, CharacterControllerHandle, ForceMode, InterfaceState, JointHandle,
    PhysicsIntersectResult, PhysicsInterface,
};
pub use physx::PhysX;
pub use polygon::{
    convert_2d_polygons_to_collision_geometry, convert_image_alpha_to_2d_polygons, line_strip_to_collision_geometry,
};
pub use registry::{NullPhysics, PhysicsRegistry};
pub use stepper::FixedStepper;
pub use types::{Aabb, EntityId, Quat, RawIndexedTriangle, Ray, SimpleTransform, Vec2, Vec3};
