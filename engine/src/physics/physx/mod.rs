//! PhysX backend
//!
//! Bodies are rigid actors in a scene configured the way the PhysX SDK sets one up:
//! a single shared material, per-scene contact offset and solver iteration count.
//! What sets this backend apart from [`Bullet`](crate::physics::bullet::Bullet):
//!
//! - The runtime is either linked in or loaded from shared libraries at setup time
//!   (see [`runtime`]). Missing libraries make [`PhysicsInterface::is_available`]
//!   return false so the registry can fall back to another backend.
//! - Triangle meshes are cooked into a byte buffer that callers may cache between
//!   runs ([`PhysicsInterface::pre_process_geometry`]).
//! - Heightfields are quantized to 16 bits; each template carries its scale factor.
//! - Character controllers are kinematic capsules moved immediately by
//!   [`PhysicsInterface::move_character_controller`], timed by a [`Clock`].
//! - Native problems are reported through an [`ErrorCallback`].
//!
//! # Example
//!
//! ```ignore
//! let mut physx = PhysX::new(&config).with_clock(Arc::new(ManualClock::new(0.0)));
//! if physx.is_available() {
//!     physx.setup()?;
//! }
//! ```

pub mod controller;
pub mod cooking;
pub mod error_callback;
pub mod heightfield;
pub mod runtime;

use std::panic::Location;
use std::sync::Arc;

use glam::Vec3;
use rapier3d::prelude::SharedShape;
use tracing::{debug, error, info};

pub use controller::{CapsuleController, Clock, ControllerCollisions, ManualClock, SystemClock};
pub use error_callback::{ErrorCallback, ErrorCode, TracingErrorCallback};
pub use heightfield::HeightfieldTemplate;
pub use runtime::{runtime_for, DynamicRuntime, PhysXRuntime, StaticRuntime};

use crate::physics::config::{PhysXConfig, PhysicsConfig};
use crate::physics::error::PhysicsError;
use crate::physics::interface::{
    BodyHandle, BodyTemplateHandle, CharacterControllerHandle, ForceMode, InterfaceState, JointHandle,
    PhysicsIntersectResult, PhysicsInterface,
};
use crate::physics::scene::{Scene, SceneError};
use crate::physics::sim::{
    CollisionFilter, CollisionObject, DynamicBody, JointKind, Material, ObjectKind, Pose, TriangleMesh, World,
    WorldSettings,
};
use crate::physics::types::{Aabb, EntityId, RawIndexedTriangle, Ray, SimpleTransform};

enum TemplateGeometry {
    Mesh(SharedShape),
    Heightfield(HeightfieldTemplate),
}

/// Physics backend modelled on the PhysX SDK.
pub struct PhysX {
    state: InterfaceState,
    config: PhysXConfig,
    runtime: Box<dyn PhysXRuntime>,
    clock: Arc<dyn Clock>,
    error_callback: Box<dyn ErrorCallback>,
    scene: Scene<TemplateGeometry, CapsuleController>,
}

impl PhysX {
    pub fn new(config: &PhysicsConfig) -> Self {
        Self {
            state: InterfaceState::new(config),
            config: config.physx.clone(),
            runtime: runtime_for(&config.physx),
            clock: Arc::new(SystemClock::new()),
            error_callback: Box::new(TracingErrorCallback),
            scene: Scene::new(),
        }
    }

    pub fn with_runtime(mut self, runtime: Box<dyn PhysXRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Replaces the clock that times character controller moves.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_error_callback(mut self, callback: Box<dyn ErrorCallback>) -> Self {
        self.error_callback = callback;
        self
    }

    pub fn body_count(&self) -> usize {
        self.scene.body_count()
    }

    pub fn body_template_count(&self) -> usize {
        self.scene.template_count()
    }

    /// Bodies currently built from `template`.
    pub fn body_template_users(&self, template: BodyTemplateHandle) -> Option<u32> {
        self.scene.template_users(template)
    }

    /// The scene, once set up.
    pub fn scene(&self) -> Option<&World> {
        self.scene.world()
    }

    #[track_caller]
    fn report(&self, code: ErrorCode, message: &str) {
        let location = Location::caller();
        self.error_callback
            .report_error(code, message, location.file(), location.line());
    }

    fn material(&self) -> Material {
        Material {
            friction: (self.config.static_friction + self.config.dynamic_friction) * 0.5,
            restitution: self.config.restitution,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_actor(
        &mut self,
        shape: SharedShape,
        shape_offset: Pose,
        mass: f32,
        fixed: bool,
        entity: Option<EntityId>,
        initial_transform: &SimpleTransform,
        template: Option<BodyTemplateHandle>,
    ) -> Option<BodyHandle> {
        let pose = Pose::new(initial_transform.position, initial_transform.native_rotation());
        let (kind, filter) = if fixed || mass <= 0.0 {
            (ObjectKind::Static, CollisionFilter::STATIC)
        } else {
            (ObjectKind::Dynamic(DynamicBody::new(mass)), CollisionFilter::DYNAMIC)
        };
        let object = CollisionObject::new(pose, shape, shape_offset, kind, filter).with_material(self.material());

        match self.scene.insert_body(object, fixed, entity, template) {
            Ok(handle) => Some(handle),
            Err(scene_error) => {
                error!("PhysX: {scene_error}");
                None
            }
        }
    }

    fn create_joint(
        &mut self,
        first: BodyHandle,
        second: BodyHandle,
        build: impl FnOnce(&Pose, &Pose) -> (Vec3, Vec3, JointKind),
    ) -> Option<JointHandle> {
        match self.scene.insert_joint(first, second, build) {
            Ok(handle) => Some(handle),
            Err(SceneError::NotSetUp) => None,
            Err(joint_error @ SceneError::JointRejected) => {
                self.report(ErrorCode::InvalidOperation, &joint_error.to_string());
                None
            }
            Err(joint_error) => {
                self.report(ErrorCode::InvalidParameter, &joint_error.to_string());
                None
            }
        }
    }

    fn insert_mesh_template(&mut self, mesh: TriangleMesh, delete_once_unused: bool) -> BodyTemplateHandle {
        self.scene
            .insert_template(TemplateGeometry::Mesh(mesh.shape()), delete_once_unused)
    }
}

impl PhysicsInterface for PhysX {
    fn state(&self) -> &InterfaceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut InterfaceState {
        &mut self.state
    }

    fn engine_name(&self) -> &'static str {
        "PhysX"
    }

    fn is_available(&self) -> bool {
        self.runtime.is_available()
    }

    fn setup(&mut self) -> Result<(), PhysicsError> {
        self.shutdown();

        if let Err(setup_error) = self.runtime.load() {
            error!("Failed setting up PhysX: {setup_error}");
            self.shutdown();
            return Err(setup_error);
        }

        let mut world = World::new(WorldSettings {
            solver_iterations: self.config.solver_iterations as usize,
            contact_threshold: Some(self.config.contact_offset),
        });
        world.set_gravity(self.state.gravity);
        world.set_limits(Some(self.state.world_limits));
        self.scene.set_world(Some(world));

        info!(
            runtime = %self.runtime.description(),
            substep = self.state.stepper.substep(),
            "PhysX physics set up"
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        let had_scene = self.scene.set_world(None);
        self.runtime.unload();
        self.state.stepper.reset();
        if had_scene {
            info!("PhysX physics shut down");
        }
    }

    fn set_world_limits(&mut self, limits: &Aabb) {
        self.state.world_limits = *limits;
        if let Some(world) = self.scene.world_mut() {
            world.set_limits(Some(*limits));
        }
    }

    // =========================================================================
    // Bodies
    // =========================================================================

    fn create_bounding_box_body(
        &mut self,
        aabb: &Aabb,
        mass: f32,
        fixed: bool,
        entity: Option<EntityId>,
        initial_transform: &SimpleTransform,
    ) -> Option<BodyHandle> {
        if aabb.is_empty() {
            self.report(ErrorCode::InvalidParameter, "empty bounding box");
            return None;
        }
        let half_extents = aabb.half_extents();
        self.create_actor(
            SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z),
            Pose::from_position(aabb.center()),
            mass,
            fixed,
            entity,
            initial_transform,
            None,
        )
    }

    fn create_capsule_body(
        &mut self,
        height: f32,
        radius: f32,
        mass: f32,
        fixed: bool,
        entity: Option<EntityId>,
        initial_transform: &SimpleTransform,
    ) -> Option<BodyHandle> {
        if radius <= 0.0 || height < 0.0 {
            self.report(ErrorCode::InvalidParameter, "capsule needs a positive radius");
            return None;
        }
        // The body origin sits at the bottom of the capsule
        let shape = SharedShape::capsule_y(height * 0.5, radius);
        let offset = Pose::from_position(Vec3::new(0.0, radius + height * 0.5, 0.0));
        self.create_actor(shape, offset, mass, fixed, entity, initial_transform, None)
    }

    fn create_body_template_from_geometry(
        &mut self,
        vertices: &[Vec3],
        triangles: &[RawIndexedTriangle],
        delete_once_unused: bool,
        custom_collision_margin: f32,
    ) -> Option<BodyTemplateHandle> {
        let mesh = cooking::cook_triangle_mesh(vertices, triangles, custom_collision_margin.max(0.0))
            .and_then(|data| cooking::load_triangle_mesh(&data));
        match mesh {
            Ok(mesh) => Some(self.insert_mesh_template(mesh, delete_once_unused)),
            Err(cook_error) => {
                self.report(ErrorCode::InvalidParameter, &cook_error.to_string());
                None
            }
        }
    }

    fn pre_process_geometry(&mut self, vertices: &[Vec3], triangles: &[RawIndexedTriangle]) -> Option<Vec<u8>> {
        match cooking::cook_triangle_mesh(vertices, triangles, 0.0) {
            Ok(data) => {
                debug!(bytes = data.len(), "Cooked triangle mesh");
                Some(data)
            }
            Err(cook_error) => {
                self.report(ErrorCode::InvalidParameter, &cook_error.to_string());
                None
            }
        }
    }

    fn create_body_template_from_pre_processed_geometry(
        &mut self,
        data: &[u8],
        delete_once_unused: bool,
    ) -> Option<BodyTemplateHandle> {
        match cooking::load_triangle_mesh(data) {
            Ok(mesh) => Some(self.insert_mesh_template(mesh, delete_once_unused)),
            Err(load_error) => {
                self.report(ErrorCode::InvalidParameter, &load_error.to_string());
                None
            }
        }
    }

    fn create_body_template_from_heightmap(
        &mut self,
        width: u32,
        height: u32,
        heightmap: &[f32],
        delete_once_unused: bool,
    ) -> Option<BodyTemplateHandle> {
        match HeightfieldTemplate::from_samples(width, height, heightmap) {
            Ok(template) => Some(
                self.scene
                    .insert_template(TemplateGeometry::Heightfield(template), delete_once_unused),
            ),
            Err(heightmap_error) => {
                self.report(ErrorCode::InvalidParameter, &heightmap_error.to_string());
                None
            }
        }
    }

    fn delete_body_template(&mut self, template: BodyTemplateHandle) -> bool {
        match self.scene.remove_template(template) {
            Ok(()) => true,
            Err(SceneError::TemplateInUse(users)) => {
                error!(users, "Can't delete a body template that is still in use");
                false
            }
            Err(_) => false,
        }
    }

    fn create_geometry_body_from_template(
        &mut self,
        template: BodyTemplateHandle,
        mass: f32,
        fixed: bool,
        entity: Option<EntityId>,
        initial_transform: &SimpleTransform,
    ) -> Option<BodyHandle> {
        let Some(TemplateGeometry::Mesh(shape)) = self.scene.template(template) else {
            self.report(ErrorCode::InvalidParameter, "invalid body template");
            return None;
        };
        let shape = shape.clone();
        self.create_actor(shape, Pose::IDENTITY, mass, fixed, entity, initial_transform, Some(template))
    }

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
        let Some(TemplateGeometry::Heightfield(heightfield)) = self.scene.template(template) else {
            self.report(ErrorCode::InvalidParameter, "invalid heightmap body template");
            return None;
        };
        let (shape, offset) = heightfield.shape(height_scale, terrain_scale);
        self.create_actor(shape, offset, mass, fixed, entity, initial_transform, Some(template))
    }

    fn delete_body(&mut self, body: BodyHandle) -> bool {
        self.scene.remove_body(body)
    }

    fn body_entity(&self, body: BodyHandle) -> Option<EntityId> {
        self.scene.body_entity(body)
    }

    fn body_transform(&mut self, body: BodyHandle) -> Option<SimpleTransform> {
        if !self.state.updating {
            return None;
        }
        let pose = self.scene.body_pose(body)?;
        Some(SimpleTransform::from_native(pose.position, pose.rotation))
    }

    fn set_body_transform(&mut self, body: BodyHandle, transform: &SimpleTransform) -> bool {
        let pose = Pose::new(transform.position, transform.native_rotation());
        self.scene.set_body_pose(body, pose)
    }

    fn body_linear_velocity(&self, body: BodyHandle) -> Vec3 {
        self.scene.linear_velocity(body)
    }

    fn set_body_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> bool {
        self.scene.set_linear_velocity(body, velocity)
    }

    fn body_angular_velocity(&self, body: BodyHandle) -> Vec3 {
        self.scene.angular_velocity(body)
    }

    fn set_body_angular_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> bool {
        self.scene.set_angular_velocity(body, velocity)
    }

    fn apply_force_to_body(&mut self, body: BodyHandle, force: Vec3, mode: ForceMode) -> bool {
        self.scene.apply_force(body, force, mode)
    }

    fn apply_torque_to_body(&mut self, body: BodyHandle, torque: Vec3, mode: ForceMode) -> bool {
        self.scene.apply_torque(body, torque, mode)
    }

    fn constrain_body_to_xy_plane(&mut self, body: BodyHandle) -> bool {
        self.scene.constrain_to_xy_plane(body)
    }

    // =========================================================================
    // Joints
    // =========================================================================

    fn create_hinge_joint(
        &mut self,
        first: BodyHandle,
        second: BodyHandle,
        global_anchor: Vec3,
        global_axis: Vec3,
    ) -> Option<JointHandle> {
        let Some(axis) = global_axis.try_normalize() else {
            self.report(ErrorCode::InvalidParameter, "hinge axis must not be zero");
            return None;
        };
        self.create_joint(first, second, |a, b| {
            (
                a.inverse_transform_point(global_anchor),
                b.inverse_transform_point(global_anchor),
                JointKind::Hinge {
                    local_axis_a: a.inverse_transform_vector(axis),
                    local_axis_b: b.inverse_transform_vector(axis),
                },
            )
        })
    }

    fn create_ball_and_socket_joint(
        &mut self,
        first: BodyHandle,
        second: BodyHandle,
        global_anchor: Vec3,
        angular_limits: Vec3,
    ) -> Option<JointHandle> {
        self.create_joint(first, second, |a, b| {
            (
                a.inverse_transform_point(global_anchor),
                b.inverse_transform_point(global_anchor),
                JointKind::BallAndSocket {
                    angular_limits: angular_limits.abs(),
                    rest_rotation: (a.rotation.inverse() * b.rotation).normalize(),
                },
            )
        })
    }

    fn delete_joint(&mut self, joint: JointHandle) -> bool {
        self.scene.remove_joint(joint)
    }

    fn joint_bodies(&self, joint: JointHandle) -> Option<(Option<BodyHandle>, Option<BodyHandle>)> {
        self.scene.joint_bodies(joint)
    }

    fn body_joints(&self, body: BodyHandle) -> Option<Vec<JointHandle>> {
        self.scene.body_joints(body)
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
        if radius <= 0.0 || height < 0.0 {
            self.report(ErrorCode::InvalidParameter, "character controller needs a positive radius");
            return None;
        }
        let now = self.clock.now();
        let config = &self.config;
        match self
            .scene
            .insert_controller(entity, |world| CapsuleController::new(world, height, radius, config, now))
        {
            Ok(handle) => Some(handle),
            Err(_) => {
                error!("PhysX is not set up");
                None
            }
        }
    }

    fn delete_character_controller(&mut self, controller: CharacterControllerHandle) -> bool {
        self.scene.remove_controller(controller)
    }

    fn character_controller_position(&self, controller: CharacterControllerHandle) -> Vec3 {
        self.scene
            .controller(controller)
            .map_or(Vec3::ZERO, CapsuleController::position)
    }

    fn set_character_controller_position(&mut self, controller: CharacterControllerHandle, position: Vec3) -> bool {
        self.scene
            .controller_in_world_mut(controller)
            .is_some_and(|(controller, world)| controller.set_position(world, position))
    }

    fn move_character_controller(&mut self, controller: CharacterControllerHandle, movement: Vec3, _time: f32) {
        if movement.length_squared() <= f32::EPSILON {
            return;
        }
        let now = self.clock.now();
        if let Some((controller, world)) = self.scene.controller_in_world_mut(controller) {
            controller.move_by(world, movement, now);
        }
    }

    fn character_controller_up_axis_collision(&self, controller: CharacterControllerHandle) -> Option<Vec3> {
        self.scene.controller(controller)?.collisions().up
    }

    fn character_controller_down_axis_collision(&self, controller: CharacterControllerHandle) -> Option<Vec3> {
        self.scene.controller(controller)?.collisions().down
    }

    // =========================================================================
    // Simulation
    // =========================================================================

    fn step_substep(&mut self, dt: f32) {
        self.scene.step(dt, |controller, world| controller.settle(world));
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.state.gravity = gravity;
        if let Some(world) = self.scene.world_mut() {
            world.set_gravity(gravity);
        }
    }

    fn raycast(&self, ray: &Ray) -> Option<PhysicsIntersectResult> {
        self.scene.raycast(ray)
    }
}
