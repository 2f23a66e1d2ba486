//! Bullet backend
//!
//! Rigid bodies, templates and joints map one-to-one onto objects of a
//! [`World`] configured the way Bullet's discrete dynamics world is: per-body
//! damping and sleeping thresholds, zero restitution, box bodies offset by their
//! bounds' centre. Character controllers are [`KinematicCharacterController`]
//! actions ticked after every substep.
//!
//! Handle lifetimes follow [`Scene`]. Heightmap templates keep the raw float
//! samples; each heightmap body triangulates them with its own scales and counts
//! as a user of the template.

pub mod character;

use glam::Vec3;
use rapier3d::prelude::SharedShape;
use tracing::{error, info};

pub use character::KinematicCharacterController;

use crate::physics::config::{BulletConfig, PhysicsConfig};
use crate::physics::error::PhysicsError;
use crate::physics::interface::{
    BodyHandle, BodyTemplateHandle, CharacterControllerHandle, ForceMode, InterfaceState, JointHandle,
    PhysicsIntersectResult, PhysicsInterface,
};
use crate::physics::scene::{Scene, SceneError};
use crate::physics::sim::{
    Action, CollisionFilter, CollisionObject, DynamicBody, JointKind, Material, ObjectKind, Pose, TriangleMesh, World,
    WorldSettings, DEFAULT_MESH_MARGIN,
};
use crate::physics::types::{Aabb, EntityId, RawIndexedTriangle, Ray, SimpleTransform};

enum TemplateGeometry {
    Mesh(SharedShape),
    Heightmap { width: u32, height: u32, samples: Vec<f32> },
}

/// Physics backend modelled on the Bullet library.
pub struct Bullet {
    state: InterfaceState,
    config: BulletConfig,
    scene: Scene<TemplateGeometry, KinematicCharacterController>,
}

impl Bullet {
    pub fn new(config: &PhysicsConfig) -> Self {
        Self {
            state: InterfaceState::new(config),
            config: config.bullet.clone(),
            scene: Scene::new(),
        }
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

    /// The simulation world, once set up.
    pub fn world(&self) -> Option<&World> {
        self.scene.world()
    }

    #[allow(clippy::too_many_arguments)]
    fn create_body(
        &mut self,
        shape: SharedShape,
        shape_offset: Pose,
        mass: f32,
        fixed: bool,
        entity: Option<EntityId>,
        initial_transform: &SimpleTransform,
        template: Option<BodyTemplateHandle>,
    ) -> Option<BodyHandle> {
        let config = &self.config;
        let pose = Pose::new(initial_transform.position, initial_transform.native_rotation());

        let (kind, filter) = if fixed || mass <= 0.0 {
            (ObjectKind::Static, CollisionFilter::STATIC)
        } else {
            let body = DynamicBody {
                mass,
                linear_damping: config.linear_damping,
                angular_damping: config.angular_damping,
                linear_sleep_threshold: config.linear_sleeping_threshold,
                angular_sleep_threshold: config.angular_sleeping_threshold,
            };
            (ObjectKind::Dynamic(body), CollisionFilter::DYNAMIC)
        };
        let object = CollisionObject::new(pose, shape, shape_offset, kind, filter).with_material(Material {
            friction: 0.5,
            restitution: 0.0,
        });

        match self.scene.insert_body(object, fixed, entity, template) {
            Ok(handle) => Some(handle),
            Err(scene_error) => {
                error!("Bullet: {scene_error}");
                None
            }
        }
    }

    /// Adds a joint whose local anchors and kind `build` derives from the two body poses.
    fn create_joint(
        &mut self,
        first: BodyHandle,
        second: BodyHandle,
        build: impl FnOnce(&Pose, &Pose) -> (Vec3, Vec3, JointKind),
    ) -> Option<JointHandle> {
        match self.scene.insert_joint(first, second, build) {
            Ok(handle) => Some(handle),
            Err(joint_error) => {
                error!("Can't create joint: {joint_error}");
                None
            }
        }
    }
}

/// Triangulates heightmap samples indexed `x * height + y`.
fn heightmap_mesh(
    width: u32,
    height: u32,
    samples: &[f32],
    height_scale: f32,
    terrain_scale: f32,
) -> Result<TriangleMesh, String> {
    let (w, h) = (width as usize, height as usize);
    let vertices = (0..w)
        .flat_map(|x| (0..h).map(move |y| (x, y)))
        .map(|(x, y)| {
            Vec3::new(
                x as f32 * terrain_scale,
                samples[x * h + y] * height_scale,
                y as f32 * terrain_scale,
            )
        })
        .collect();

    let index = |x: usize, y: usize| (x * h + y) as u32;
    let mut triangles = Vec::with_capacity((w - 1) * (h - 1) * 2);
    for x in 0..w - 1 {
        for y in 0..h - 1 {
            triangles.push([index(x, y), index(x, y + 1), index(x + 1, y)]);
            triangles.push([index(x, y + 1), index(x + 1, y + 1), index(x + 1, y)]);
        }
    }

    TriangleMesh::new(vertices, triangles, DEFAULT_MESH_MARGIN)
}

impl PhysicsInterface for Bullet {
    fn state(&self) -> &InterfaceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut InterfaceState {
        &mut self.state
    }

    fn engine_name(&self) -> &'static str {
        "Bullet"
    }

    fn setup(&mut self) -> Result<(), PhysicsError> {
        let mut world = World::new(WorldSettings {
            solver_iterations: self.config.solver_iterations as usize,
            ..WorldSettings::default()
        });
        world.set_gravity(self.state.gravity);
        world.set_limits(Some(self.state.world_limits));
        self.scene.set_world(Some(world));

        info!(substep = self.state.stepper.substep(), "Bullet physics set up");
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.scene.set_world(None) {
            info!("Bullet physics shut down");
        }
        self.state.stepper.reset();
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
            error!("Can't create a body from an empty bounding box");
            return None;
        }
        let half_extents = aabb.half_extents();
        self.create_body(
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
            error!(height, radius, "Invalid capsule dimensions");
            return None;
        }
        let shape = SharedShape::capsule_y(height * 0.5, radius);
        self.create_body(shape, Pose::IDENTITY, mass, fixed, entity, initial_transform, None)
    }

    fn create_body_template_from_geometry(
        &mut self,
        vertices: &[Vec3],
        triangles: &[RawIndexedTriangle],
        delete_once_unused: bool,
        custom_collision_margin: f32,
    ) -> Option<BodyTemplateHandle> {
        if vertices.is_empty() || triangles.is_empty() {
            error!("Can't create a body template from empty geometry");
            return None;
        }

        let margin = if custom_collision_margin > 0.0 {
            custom_collision_margin
        } else {
            DEFAULT_MESH_MARGIN
        };
        let mesh = match TriangleMesh::new(vertices.to_vec(), triangles.iter().map(|t| t.index).collect(), margin) {
            Ok(mesh) => mesh,
            Err(message) => {
                error!("{}", PhysicsError::InvalidGeometry(message));
                return None;
            }
        };

        Some(
            self.scene
                .insert_template(TemplateGeometry::Mesh(mesh.shape()), delete_once_unused),
        )
    }

    fn create_body_template_from_heightmap(
        &mut self,
        width: u32,
        height: u32,
        heightmap: &[f32],
        delete_once_unused: bool,
    ) -> Option<BodyTemplateHandle> {
        if width < 2 || height < 2 || heightmap.len() != width as usize * height as usize {
            let message = format!("{width}x{height} heightmap with {} samples", heightmap.len());
            error!("{}", PhysicsError::InvalidHeightmap(message));
            return None;
        }

        let geometry = TemplateGeometry::Heightmap {
            width,
            height,
            samples: heightmap.to_vec(),
        };
        Some(self.scene.insert_template(geometry, delete_once_unused))
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
            error!("Invalid body template");
            return None;
        };
        let shape = shape.clone();
        self.create_body(shape, Pose::IDENTITY, mass, fixed, entity, initial_transform, Some(template))
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
        let Some(TemplateGeometry::Heightmap {
            width,
            height,
            samples,
        }) = self.scene.template(template)
        else {
            error!("Invalid heightmap body template");
            return None;
        };

        let mesh = match heightmap_mesh(*width, *height, samples, height_scale, terrain_scale) {
            Ok(mesh) => mesh,
            Err(message) => {
                error!("{}", PhysicsError::InvalidHeightmap(message));
                return None;
            }
        };
        self.create_body(
            mesh.shape(),
            Pose::IDENTITY,
            mass,
            fixed,
            entity,
            initial_transform,
            Some(template),
        )
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
            error!("Hinge axis must not be zero");
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
        if self.scene.world().is_none() {
            error!("Bullet is not set up");
            return None;
        }
        if radius <= 0.0 || height < 0.0 {
            error!(height, radius, "Invalid character controller dimensions");
            return None;
        }
        let config = &self.config;
        self.scene
            .insert_controller(entity, |world| KinematicCharacterController::new(world, height, radius, config))
            .ok()
    }

    fn delete_character_controller(&mut self, controller: CharacterControllerHandle) -> bool {
        self.scene.remove_controller(controller)
    }

    fn character_controller_position(&self, controller: CharacterControllerHandle) -> Vec3 {
        self.scene
            .controller_in_world(controller)
            .map_or(Vec3::ZERO, |(controller, world)| controller.position(world))
    }

    fn set_character_controller_position(&mut self, controller: CharacterControllerHandle, position: Vec3) -> bool {
        match self.scene.controller_in_world_mut(controller) {
            Some((controller, world)) => {
                controller.set_world_position(world, position);
                true
            }
            None => false,
        }
    }

    fn move_character_controller(&mut self, controller: CharacterControllerHandle, movement: Vec3, time: f32) {
        if time <= 0.0 {
            error!(time, "Character movement needs a positive time");
            return;
        }
        if let Some((controller, _)) = self.scene.controller_in_world_mut(controller) {
            controller.set_velocity_for_time_interval(movement / time, time);
        }
    }

    fn character_controller_up_axis_collision(&self, controller: CharacterControllerHandle) -> Option<Vec3> {
        self.scene.controller(controller)?.up_axis_collision()
    }

    fn character_controller_down_axis_collision(&self, controller: CharacterControllerHandle) -> Option<Vec3> {
        self.scene.controller(controller)?.down_axis_collision()
    }

    // =========================================================================
    // Simulation
    // =========================================================================

    fn step_substep(&mut self, dt: f32) {
        self.scene
            .step(dt, |controller, world| controller.update_action(world, dt));
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

#[cfg(test)]
mod tests {
    use super::*;

    fn bullet() -> Bullet {
        let mut bullet = Bullet::new(&PhysicsConfig::default());
        bullet.setup().unwrap();
        bullet
    }

    fn unit_box() -> Aabb {
        Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5))
    }

    #[test]
    fn test_heightmap_mesh_layout() {
        let samples = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let mesh = heightmap_mesh(2, 3, &samples, 2.0, 10.0).unwrap();
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.triangles.len(), 4);
        // x = 1, y = 2 is sample 1 * 3 + 2
        assert_eq!(mesh.vertices[5], Vec3::new(10.0, 10.0, 20.0));
        assert_eq!(mesh.vertices[1], Vec3::new(0.0, 2.0, 10.0));
    }

    #[test]
    fn test_box_body_offset_by_aabb_center() {
        let mut bullet = bullet();
        let body = bullet
            .create_bounding_box_body(
                &Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 2.0, 2.0)),
                1.0,
                false,
                None,
                &SimpleTransform::from_position(Vec3::new(5.0, 0.0, 0.0)),
            )
            .unwrap();

        let object = bullet.scene.body_object(body).unwrap();
        let center = bullet.world().unwrap().center_of_mass(object).unwrap();
        assert!((center - Vec3::new(6.0, 1.0, 1.0)).length() < 1e-5);
        assert_eq!(bullet.body_transform(body).unwrap().position, Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_impulse_changes_velocity_immediately() {
        let mut bullet = bullet();
        let body = bullet
            .create_bounding_box_body(&unit_box(), 2.0, false, None, &SimpleTransform::IDENTITY)
            .unwrap();

        assert!(bullet.apply_force_to_body(body, Vec3::new(4.0, 0.0, 0.0), ForceMode::Impulse));
        assert_eq!(bullet.body_linear_velocity(body), Vec3::new(2.0, 0.0, 0.0));

        assert!(bullet.apply_force_to_body(body, Vec3::new(4.0, 0.0, 0.0), ForceMode::Standard));
        assert_eq!(bullet.body_linear_velocity(body), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_xy_plane_constraint() {
        let mut bullet = bullet();
        bullet.set_gravity(Vec3::ZERO);
        let body = bullet
            .create_bounding_box_body(&unit_box(), 1.0, false, None, &SimpleTransform::IDENTITY)
            .unwrap();

        assert!(bullet.constrain_body_to_xy_plane(body));
        bullet.apply_force_to_body(body, Vec3::new(1.0, 1.0, 1.0), ForceMode::Impulse);
        assert_eq!(bullet.body_linear_velocity(body), Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_calls_before_setup_fail() {
        let mut bullet = Bullet::new(&PhysicsConfig::default());
        assert!(bullet
            .create_bounding_box_body(&unit_box(), 1.0, false, None, &SimpleTransform::IDENTITY)
            .is_none());
        assert!(bullet.create_character_controller(1.0, 0.5, None).is_none());
        assert!(bullet.raycast(&Ray::new(Vec3::ZERO, Vec3::X)).is_none());
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut bullet = bullet();
        let a = bullet
            .create_bounding_box_body(&unit_box(), 1.0, false, None, &SimpleTransform::IDENTITY)
            .unwrap();
        let b = bullet
            .create_bounding_box_body(
                &unit_box(),
                1.0,
                false,
                None,
                &SimpleTransform::from_position(Vec3::new(2.0, 0.0, 0.0)),
            )
            .unwrap();
        bullet.create_ball_and_socket_joint(a, b, Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO);
        bullet.create_body_template_from_heightmap(2, 2, &[0.0; 4], false);
        bullet.create_character_controller(1.0, 0.5, None);

        bullet.shutdown();
        assert_eq!(bullet.body_count(), 0);
        assert_eq!(bullet.body_template_count(), 0);
        assert_eq!(bullet.scene.joint_count(), 0);
        assert_eq!(bullet.scene.controller_count(), 0);
        assert!(bullet.world().is_none());
    }
}
