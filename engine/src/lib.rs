//! Carbon Physics Library
//!
//! The physics layer of the Carbon engine: a backend-neutral rigid-body API with
//! Bullet-style and PhysX-style implementations, selected at startup by priority
//! and availability.
//!
//! # Modules
//!
//! - [`physics`] - Backend contract, registry, configuration, both backends and the
//!   simulation kernel they share
//!
//! # Example
//!
//! ```ignore
//! use carbon_physics::physics::{Aabb, PhysicsConfig, PhysicsRegistry, SimpleTransform, Vec3};
//!
//! let config = PhysicsConfig::default();
//! let mut physics = PhysicsRegistry::with_defaults().select(&config)?;
//!
//! // Static ground and a falling crate
//! physics.create_bounding_box_body(
//!     &Aabb::new(Vec3::new(-50.0, -1.0, -50.0), Vec3::new(50.0, 0.0, 50.0)),
//!     0.0,
//!     true,
//!     None,
//!     &SimpleTransform::IDENTITY,
//! );
//! let crate_body = physics.create_bounding_box_body(
//!     &Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)),
//!     10.0,
//!     false,
//!     None,
//!     &SimpleTransform::from_position(Vec3::new(0.0, 5.0, 0.0)),
//! );
//!
//! // Once per frame
//! physics.update(frame_time);
//! ```

pub mod physics;

// Re-export the types most callers need
pub use physics::{
    Aabb, EntityId, PhysicsConfig, PhysicsError, PhysicsInterface, PhysicsRegistry, Ray, SimpleTransform,
};
