//! Simulation world shared by the engine adapters
//!
//! Both [`crate::physics::bullet`] and [`crate::physics::physx`] drive their scenes
//! through a rapier world wrapped in [`World`], each with its own parameters and
//! conventions. Boxes, capsules, triangle meshes and heightfields; static,
//! dynamic, kinematic and ghost objects; hinge and ball-and-socket joints; ray and
//! capsule-sweep queries.
//!
//! Rotations here use the column-vector convention of the native libraries. The
//! engine-facing [`crate::physics::types::SimpleTransform`] stores the conjugate.

pub mod filter;
pub mod mesh;
pub mod pose;
pub mod world;

pub use filter::{group, CollisionFilter, Material};
pub use mesh::{TriangleMesh, DEFAULT_MESH_MARGIN};
pub use pose::Pose;
pub use world::{
    Action, CapsuleCast, CollisionObject, ContactPoint, DynamicBody, Joint, JointKey, JointKind, ObjectKey, ObjectKind,
    SweepHit, World, WorldRayHit, WorldSettings, WorldSweepHit,
};
