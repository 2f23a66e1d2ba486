//! The physics backend contract
//!
//! [`PhysicsInterface`] lists every operation a backend supports. Each method has a
//! default that reports failure (`None`, `false` or a zero vector), so a backend only
//! overrides what it implements and [`NullPhysics`](super::registry::NullPhysics)
//! overrides nothing.
//!
//! Handles are generational slotmap keys owned by the backend that issued them. A
//! handle that has been deleted simply fails every later lookup, which keeps all
//! `delete_*` calls idempotent.
//!
//! # Stepping
//!
//! Stepping is shared by every backend: [`PhysicsInterface::update`] feeds the frame
//! time into the [`FixedStepper`] held in [`InterfaceState`] and calls
//! [`PhysicsInterface::step_substep`] once per whole substep.
//!
//! # Example
//!
//! ```ignore
//! let mut physics = Bullet::new(&config);
//! physics.setup()?;
//!
//! let ground = physics.create_bounding_box_body(
//!     &Aabb::new(Vec3::new(-50.0, -1.0, -50.0), Vec3::new(50.0, 0.0, 50.0)),
//!     0.0,
//!     true,
//!     None,
//!     &SimpleTransform::IDENTITY,
//! );
//!
//! physics.update(frame_time);
//! ```

use slotmap::new_key_type;
use tracing::trace;

use super::config::PhysicsConfig;
use super::error::PhysicsError;
use super::polygon::line_strip_to_collision_geometry;
use super::stepper::FixedStepper;
use super::types::{Aabb, EntityId, RawIndexedTriangle, Ray, SimpleTransform, Vec2, Vec3};

new_key_type! {
    /// A rigid body owned by a backend.
    pub struct BodyHandle;
    /// Reusable collision geometry (triangle mesh or heightfield).
    pub struct BodyTemplateHandle;
    /// A two-body constraint.
    pub struct JointHandle;
    /// A capsule character controller.
    pub struct CharacterControllerHandle;
}

/// How a force or torque is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForceMode {
    /// Continuous force (mass * distance / time²) applied over the next substep.
    Standard,
    /// Instantaneous change of momentum (mass * distance / time).
    Impulse,
}

/// Nearest hit returned by [`PhysicsInterface::raycast`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsIntersectResult {
    pub distance: f32,
    pub position: Vec3,
    pub normal: Vec3,
    pub body: BodyHandle,
    pub entity: Option<EntityId>,
}

/// Backend-independent state every implementation carries.
#[derive(Debug, Clone)]
pub struct InterfaceState {
    pub updating: bool,
    pub gravity: Vec3,
    pub world_limits: Aabb,
    pub stepper: FixedStepper,
}

impl InterfaceState {
    pub fn new(config: &PhysicsConfig) -> Self {
        Self {
            updating: true,
            gravity: config.gravity,
            world_limits: config.world_limits,
            stepper: FixedStepper::new(config.substep_size, config.max_substeps),
        }
    }
}

impl Default for InterfaceState {
    fn default() -> Self {
        Self::new(&PhysicsConfig::default())
    }
}

/// Rigid-body physics simulation.
///
/// All positions, normals and transforms use the engine's conventions; backends
/// convert to their native ones.
#[allow(unused_variables)]
pub trait PhysicsInterface {
    fn state(&self) -> &InterfaceState;

    fn state_mut(&mut self) -> &mut InterfaceState;

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn engine_name(&self) -> &'static str {
        "None"
    }

    /// Whether the backend can run on this machine. Has no side effects.
    fn is_available(&self) -> bool {
        true
    }

    /// Prepares the backend for use. A failed setup leaves it fully shut down.
    fn setup(&mut self) -> Result<(), PhysicsError> {
        Ok(())
    }

    /// Releases everything created since `setup`.
    fn shutdown(&mut self) {}

    /// Sets the region outside which bodies stop being simulated.
    fn set_world_limits(&mut self, limits: &Aabb) {
        self.state_mut().world_limits = *limits;
    }

    fn world_limits(&self) -> Aabb {
        self.state().world_limits
    }

    fn is_updating(&self) -> bool {
        self.state().updating
    }

    /// Pauses or resumes the simulation.
    fn set_updating(&mut self, updating: bool) {
        self.state_mut().updating = updating;
    }

    // =========================================================================
    // Bodies
    // =========================================================================

    /// Creates a box body filling `aabb`. `mass` is ignored for fixed bodies.
    fn create_bounding_box_body(
        &mut self,
        aabb: &Aabb,
        mass: f32,
        fixed: bool,
        entity: Option<EntityId>,
        initial_transform: &SimpleTransform,
    ) -> Option<BodyHandle> {
        None
    }

    /// Creates an upright capsule body. `height` is the cylinder length between the caps.
    fn create_capsule_body(
        &mut self,
        height: f32,
        radius: f32,
        mass: f32,
        fixed: bool,
        entity: Option<EntityId>,
        initial_transform: &SimpleTransform,
    ) -> Option<BodyHandle> {
        None
    }

    fn create_body_template_from_geometry(
        &mut self,
        vertices: &[Vec3],
        triangles: &[RawIndexedTriangle],
        delete_once_unused: bool,
        custom_collision_margin: f32,
    ) -> Option<BodyTemplateHandle> {
        None
    }

    /// Cooks geometry into a byte buffer loadable by
    /// [`PhysicsInterface::create_body_template_from_pre_processed_geometry`].
    fn pre_process_geometry(&mut self, vertices: &[Vec3], triangles: &[RawIndexedTriangle]) -> Option<Vec<u8>> {
        None
    }

    fn create_body_template_from_pre_processed_geometry(
        &mut self,
        data: &[u8],
        delete_once_unused: bool,
    ) -> Option<BodyTemplateHandle> {
        None
    }

    /// Builds a template from `width * height` samples indexed as `x * height + y`.
    fn create_body_template_from_heightmap(
        &mut self,
        width: u32,
        height: u32,
        heightmap: &[f32],
        delete_once_unused: bool,
    ) -> Option<BodyTemplateHandle> {
        None
    }

    /// Deletes a template. Refused while any body still uses it.
    fn delete_body_template(&mut self, template: BodyTemplateHandle) -> bool {
        false
    }

    fn create_geometry_body_from_template(
        &mut self,
        template: BodyTemplateHandle,
        mass: f32,
        fixed: bool,
        entity: Option<EntityId>,
        initial_transform: &SimpleTransform,
    ) -> Option<BodyHandle> {
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn create_heightmap_body_from_template(
        &mut self,
        template: BodyTemplateHandle,
        height_scale: f32,
        terrain_scale: f32,
        mass: f32,
        fixed: bool,
        entity: Option<EntityId>,
        initial_transform: &SimpleTransform,
    ) -> Option<BodyHandle> {
        None
    }

    /// Deletes a body, severing its joints and releasing its template if that was
    /// the last user of a delete-once-unused template.
    fn delete_body(&mut self, body: BodyHandle) -> bool {
        false
    }

    fn body_entity(&self, body: BodyHandle) -> Option<EntityId> {
        None
    }

    /// Current transform of a body, `None` while the simulation is paused.
    fn body_transform(&mut self, body: BodyHandle) -> Option<SimpleTransform> {
        None
    }

    /// Repositions a non-fixed body.
    fn set_body_transform(&mut self, body: BodyHandle, transform: &SimpleTransform) -> bool {
        false
    }

    fn body_linear_velocity(&self, body: BodyHandle) -> Vec3 {
        Vec3::ZERO
    }

    fn set_body_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> bool {
        false
    }

    fn body_angular_velocity(&self, body: BodyHandle) -> Vec3 {
        Vec3::ZERO
    }

    fn set_body_angular_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> bool {
        false
    }

    fn apply_force_to_body(&mut self, body: BodyHandle, force: Vec3, mode: ForceMode) -> bool {
        false
    }

    fn apply_torque_to_body(&mut self, body: BodyHandle, torque: Vec3, mode: ForceMode) -> bool {
        false
    }

    /// Restricts a body to translation in X/Y and rotation about Z.
    fn constrain_body_to_xy_plane(&mut self, body: BodyHandle) -> bool {
        false
    }

    // =========================================================================
    // Joints
    // =========================================================================

    /// Hinge through `global_anchor` about `global_axis`, both in world space.
    fn create_hinge_joint(
        &mut self,
        first: BodyHandle,
        second: BodyHandle,
        global_anchor: Vec3,
        global_axis: Vec3,
    ) -> Option<JointHandle> {
        None
    }

    /// Ball-and-socket at `global_anchor`. A non-zero `angular_limits` bounds the
    /// relative rotation about each axis in radians.
    fn create_ball_and_socket_joint(
        &mut self,
        first: BodyHandle,
        second: BodyHandle,
        global_anchor: Vec3,
        angular_limits: Vec3,
    ) -> Option<JointHandle> {
        None
    }

    fn delete_joint(&mut self, joint: JointHandle) -> bool {
        false
    }

    /// The bodies a joint connects; a side is `None` once its body was deleted.
    fn joint_bodies(&self, joint: JointHandle) -> Option<(Option<BodyHandle>, Option<BodyHandle>)> {
        None
    }

    /// Joints still referencing `body`.
    fn body_joints(&self, body: BodyHandle) -> Option<Vec<JointHandle>> {
        None
    }

    // =========================================================================
    // Character controllers
    // =========================================================================

    fn create_character_controller(
        &mut self,
        height: f32,
        radius: f32,
        entity: Option<EntityId>,
    ) -> Option<CharacterControllerHandle> {
        None
    }

    fn delete_character_controller(&mut self, controller: CharacterControllerHandle) -> bool {
        false
    }

    fn character_controller_position(&self, controller: CharacterControllerHandle) -> Vec3 {
        Vec3::ZERO
    }

    fn set_character_controller_position(&mut self, controller: CharacterControllerHandle, position: Vec3) -> bool {
        false
    }

    /// Requests `movement` (a world-space offset, not a velocity) covered over `time` seconds.
    fn move_character_controller(&mut self, controller: CharacterControllerHandle, movement: Vec3, time: f32) {}

    /// Normal of the ceiling touched during the last step, if any.
    fn character_controller_up_axis_collision(&self, controller: CharacterControllerHandle) -> Option<Vec3> {
        None
    }

    /// Normal of the ground touched during the last step, if any.
    fn character_controller_down_axis_collision(&self, controller: CharacterControllerHandle) -> Option<Vec3> {
        None
    }

    // =========================================================================
    // Simulation
    // =========================================================================

    fn substep_size(&self) -> f32 {
        self.state().stepper.substep()
    }

    /// Advances the world by exactly `dt` seconds.
    fn step_substep(&mut self, dt: f32) {}

    /// Advances the simulation by a frame of `time` seconds, in whole substeps.
    ///
    /// # Returns
    ///
    /// Number of substeps taken.
    fn update(&mut self, time: f32) -> u32 {
        if !self.state().updating {
            return 0;
        }

        let steps = self.state_mut().stepper.advance(time);
        let substep = self.substep_size();
        for _ in 0..steps {
            self.step_substep(substep);
        }

        if steps > 0 {
            trace!(steps, "physics update");
        }
        steps
    }

    fn gravity(&self) -> Vec3 {
        self.state().gravity
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.state_mut().gravity = gravity;
    }

    /// Nearest body hit by `ray`. Character controllers are not hit.
    fn raycast(&self, ray: &Ray) -> Option<PhysicsIntersectResult> {
        None
    }

    /// Extrudes a closed 2D line strip ±10 units in Z and wraps it in a one-shot
    /// delete-once-unused template.
    fn create_geometry_body_from_2d_line_strip(
        &mut self,
        points: &[Vec2],
        mass: f32,
        fixed: bool,
        entity: Option<EntityId>,
        initial_transform: &SimpleTransform,
    ) -> Option<BodyHandle> {
        let (vertices, triangles) = line_strip_to_collision_geometry(points);
        let template = self.create_body_template_from_geometry(&vertices, &triangles, true, 0.5)?;
        let body = self.create_geometry_body_from_template(template, mass, fixed, entity, initial_transform);
        if body.is_none() {
            self.delete_body_template(template);
        }
        body
    }
}
