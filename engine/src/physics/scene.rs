//! Handle bookkeeping shared by the backends
//!
//! [`Scene`] owns the simulation [`World`] together with the slotmaps behind every
//! handle a backend gives out. The backends differ in how they build shapes and
//! controllers and in how they report failures; the lifetime rules below are the
//! same for both.
//!
//! # Ownership
//!
//! - Each body record lists the joints referencing it. Deleting the body removes those
//!   constraints from the world and nulls the joint's side, but the joint record stays
//!   until [`Scene::remove_joint`].
//! - Each template counts the bodies built from it. A template in use cannot be
//!   deleted; a delete-once-unused template goes away with its last body.
//! - Fixed bodies refuse every call that would move them.

use glam::Vec3;
use slotmap::{Key, KeyData, SlotMap};
use thiserror::Error;
use tracing::{debug, error};

use super::interface::{
    BodyHandle, BodyTemplateHandle, CharacterControllerHandle, ForceMode, JointHandle, PhysicsIntersectResult,
};
use super::sim::{group, CollisionObject, Joint, JointKey, JointKind, ObjectKey, Pose, World};
use super::types::{EntityId, Ray};

/// Rays are cast at most this far.
const MAX_RAY_DISTANCE: f32 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SceneError {
    #[error("physics backend is not set up")]
    NotSetUp,

    #[error("joint needs two valid bodies")]
    InvalidBodies,

    #[error("can't join a body to itself")]
    SameBody,

    #[error("failed creating joint")]
    JointRejected,

    #[error("invalid body template")]
    InvalidTemplate,

    #[error("body template is still used by {0} bodies")]
    TemplateInUse(u32),
}

/// A character controller with objects of its own in the world.
pub trait SceneController {
    fn remove_from(&self, world: &mut World);
}

struct BodyRecord {
    object: ObjectKey,
    fixed: bool,
    entity: Option<EntityId>,
    template: Option<BodyTemplateHandle>,
    joints: Vec<JointHandle>,
}

struct TemplateRecord<G> {
    geometry: G,
    users: u32,
    delete_once_unused: bool,
}

struct JointRecord {
    first: Option<BodyHandle>,
    second: Option<BodyHandle>,
    /// Live constraint in the world, cleared when either body is deleted.
    constraint: Option<JointKey>,
}

struct ControllerRecord<C> {
    controller: C,
    entity: Option<EntityId>,
}

/// The world and every record a backend hands out handles to. `G` is the
/// backend's template geometry and `C` its character controller.
pub struct Scene<G, C> {
    world: Option<World>,
    bodies: SlotMap<BodyHandle, BodyRecord>,
    templates: SlotMap<BodyTemplateHandle, TemplateRecord<G>>,
    joints: SlotMap<JointHandle, JointRecord>,
    controllers: SlotMap<CharacterControllerHandle, ControllerRecord<C>>,
}

impl<G, C: SceneController> Default for Scene<G, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G, C: SceneController> Scene<G, C> {
    pub fn new() -> Self {
        Self {
            world: None,
            bodies: SlotMap::with_key(),
            templates: SlotMap::with_key(),
            joints: SlotMap::with_key(),
            controllers: SlotMap::with_key(),
        }
    }

    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn world_mut(&mut self) -> Option<&mut World> {
        self.world.as_mut()
    }

    /// Releases every record, then the world. Returns whether a world was set up.
    pub fn set_world(&mut self, world: Option<World>) -> bool {
        let joints: Vec<_> = self.joints.keys().collect();
        for joint in joints {
            self.remove_joint(joint);
        }
        let bodies: Vec<_> = self.bodies.keys().collect();
        for body in bodies {
            self.remove_body(body);
        }
        let controllers: Vec<_> = self.controllers.keys().collect();
        for controller in controllers {
            self.remove_controller(controller);
        }
        self.templates.clear();

        std::mem::replace(&mut self.world, world).is_some()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    // =========================================================================
    // Bodies
    // =========================================================================

    /// Adds `object` to the world under a new body handle, stored as the object's user data.
    pub fn insert_body(
        &mut self,
        object: CollisionObject,
        fixed: bool,
        entity: Option<EntityId>,
        template: Option<BodyTemplateHandle>,
    ) -> Result<BodyHandle, SceneError> {
        let world = self.world.as_mut().ok_or(SceneError::NotSetUp)?;
        let handle = self.bodies.insert_with_key(|handle| BodyRecord {
            object: world.add_object(object.with_user_data(handle.data().as_ffi())),
            fixed,
            entity,
            template,
            joints: Vec::new(),
        });

        if let Some(record) = template.and_then(|template| self.templates.get_mut(template)) {
            record.users += 1;
        }
        Ok(handle)
    }

    pub fn remove_body(&mut self, body: BodyHandle) -> bool {
        let Some(record) = self.bodies.remove(body) else {
            return false;
        };

        for joint in &record.joints {
            let Some(joint_record) = self.joints.get_mut(*joint) else {
                continue;
            };
            if let (Some(constraint), Some(world)) = (joint_record.constraint.take(), self.world.as_mut()) {
                world.remove_joint(constraint);
            }
            if joint_record.first == Some(body) {
                joint_record.first = None;
            }
            if joint_record.second == Some(body) {
                joint_record.second = None;
            }
        }

        if let Some(world) = self.world.as_mut() {
            world.remove_object(record.object);
        }

        if let Some(template) = record.template {
            if let Some(template_record) = self.templates.get_mut(template) {
                template_record.users = template_record.users.saturating_sub(1);
                if template_record.users == 0 && template_record.delete_once_unused {
                    self.templates.remove(template);
                    debug!("Deleted unused body template");
                }
            }
        }

        true
    }

    pub fn body_object(&self, body: BodyHandle) -> Option<ObjectKey> {
        self.bodies.get(body).map(|record| record.object)
    }

    pub fn body_entity(&self, body: BodyHandle) -> Option<EntityId> {
        self.bodies.get(body)?.entity
    }

    pub fn body_pose(&self, body: BodyHandle) -> Option<Pose> {
        self.world.as_ref()?.object_pose(self.bodies.get(body)?.object)
    }

    /// Looks up a body that may be changed, refusing fixed ones.
    fn movable(&mut self, body: BodyHandle, action: &str) -> Option<(ObjectKey, &mut World)> {
        let record = self.bodies.get(body)?;
        if record.fixed {
            error!("Can't {action} a fixed body");
            return None;
        }
        Some((record.object, self.world.as_mut()?))
    }

    pub fn set_body_pose(&mut self, body: BodyHandle, pose: Pose) -> bool {
        self.movable(body, "move")
            .is_some_and(|(object, world)| world.set_object_pose(object, pose))
    }

    pub fn linear_velocity(&self, body: BodyHandle) -> Vec3 {
        match (self.bodies.get(body), self.world.as_ref()) {
            (Some(record), Some(world)) => world.linear_velocity(record.object),
            _ => Vec3::ZERO,
        }
    }

    pub fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> bool {
        self.movable(body, "set the velocity of")
            .is_some_and(|(object, world)| world.set_linear_velocity(object, velocity))
    }

    pub fn angular_velocity(&self, body: BodyHandle) -> Vec3 {
        match (self.bodies.get(body), self.world.as_ref()) {
            (Some(record), Some(world)) => world.angular_velocity(record.object),
            _ => Vec3::ZERO,
        }
    }

    pub fn set_angular_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> bool {
        self.movable(body, "set the velocity of")
            .is_some_and(|(object, world)| world.set_angular_velocity(object, velocity))
    }

    pub fn apply_force(&mut self, body: BodyHandle, force: Vec3, mode: ForceMode) -> bool {
        self.movable(body, "apply a force to")
            .is_some_and(|(object, world)| match mode {
                ForceMode::Standard => world.add_force(object, force),
                ForceMode::Impulse => world.apply_impulse(object, force),
            })
    }

    pub fn apply_torque(&mut self, body: BodyHandle, torque: Vec3, mode: ForceMode) -> bool {
        self.movable(body, "apply a torque to")
            .is_some_and(|(object, world)| match mode {
                ForceMode::Standard => world.add_torque(object, torque),
                ForceMode::Impulse => world.apply_torque_impulse(object, torque),
            })
    }

    pub fn constrain_to_xy_plane(&mut self, body: BodyHandle) -> bool {
        self.movable(body, "constrain")
            .is_some_and(|(object, world)| world.constrain_to_xy_plane(object))
    }

    /// Nearest body hit by `ray`, skipping character and controller objects.
    pub fn raycast(&self, ray: &Ray) -> Option<PhysicsIntersectResult> {
        let world = self.world.as_ref()?;
        let direction = ray.direction.try_normalize()?;

        let hit = world.ray_cast_closest(ray.origin, direction, MAX_RAY_DISTANCE, group::DEFAULT | group::STATIC)?;
        let body = BodyHandle::from(KeyData::from_ffi(world.user_data(hit.object)?));
        let record = self.bodies.get(body).filter(|record| record.object == hit.object)?;

        Some(PhysicsIntersectResult {
            distance: hit.t,
            position: hit.point,
            normal: hit.normal,
            body,
            entity: record.entity,
        })
    }

    // =========================================================================
    // Joints
    // =========================================================================

    /// Adds a joint whose local anchors and kind `build` derives from the two body poses.
    pub fn insert_joint(
        &mut self,
        first: BodyHandle,
        second: BodyHandle,
        build: impl FnOnce(&Pose, &Pose) -> (Vec3, Vec3, JointKind),
    ) -> Result<JointHandle, SceneError> {
        let (Some(record_a), Some(record_b)) = (self.bodies.get(first), self.bodies.get(second)) else {
            return Err(SceneError::InvalidBodies);
        };
        if first == second {
            return Err(SceneError::SameBody);
        }
        let (object_a, object_b) = (record_a.object, record_b.object);
        let world = self.world.as_mut().ok_or(SceneError::NotSetUp)?;

        let (Some(a), Some(b)) = (world.object_pose(object_a), world.object_pose(object_b)) else {
            return Err(SceneError::InvalidBodies);
        };
        let (local_anchor_a, local_anchor_b, kind) = build(&a, &b);

        let constraint = world
            .add_joint(Joint {
                body_a: object_a,
                body_b: object_b,
                local_anchor_a,
                local_anchor_b,
                kind,
            })
            .ok_or(SceneError::JointRejected)?;

        let handle = self.joints.insert(JointRecord {
            first: Some(first),
            second: Some(second),
            constraint: Some(constraint),
        });
        for body in [first, second] {
            if let Some(record) = self.bodies.get_mut(body) {
                record.joints.push(handle);
            }
        }
        Ok(handle)
    }

    pub fn remove_joint(&mut self, joint: JointHandle) -> bool {
        let Some(record) = self.joints.remove(joint) else {
            return false;
        };
        if let (Some(constraint), Some(world)) = (record.constraint, self.world.as_mut()) {
            world.remove_joint(constraint);
        }
        for body in [record.first, record.second].into_iter().flatten() {
            if let Some(body_record) = self.bodies.get_mut(body) {
                body_record.joints.retain(|j| *j != joint);
            }
        }
        true
    }

    pub fn joint_bodies(&self, joint: JointHandle) -> Option<(Option<BodyHandle>, Option<BodyHandle>)> {
        self.joints.get(joint).map(|record| (record.first, record.second))
    }

    pub fn body_joints(&self, body: BodyHandle) -> Option<Vec<JointHandle>> {
        self.bodies.get(body).map(|record| record.joints.clone())
    }

    // =========================================================================
    // Templates
    // =========================================================================

    pub fn insert_template(&mut self, geometry: G, delete_once_unused: bool) -> BodyTemplateHandle {
        self.templates.insert(TemplateRecord {
            geometry,
            users: 0,
            delete_once_unused,
        })
    }

    pub fn template(&self, template: BodyTemplateHandle) -> Option<&G> {
        self.templates.get(template).map(|record| &record.geometry)
    }

    /// Bodies currently built from `template`.
    pub fn template_users(&self, template: BodyTemplateHandle) -> Option<u32> {
        self.templates.get(template).map(|record| record.users)
    }

    pub fn remove_template(&mut self, template: BodyTemplateHandle) -> Result<(), SceneError> {
        let record = self.templates.get(template).ok_or(SceneError::InvalidTemplate)?;
        if record.users > 0 {
            return Err(SceneError::TemplateInUse(record.users));
        }
        self.templates.remove(template);
        Ok(())
    }

    // =========================================================================
    // Character controllers
    // =========================================================================

    /// Builds a controller in the world and files it under a new handle.
    pub fn insert_controller(
        &mut self,
        entity: Option<EntityId>,
        build: impl FnOnce(&mut World) -> C,
    ) -> Result<CharacterControllerHandle, SceneError> {
        let world = self.world.as_mut().ok_or(SceneError::NotSetUp)?;
        let controller = build(world);
        Ok(self.controllers.insert(ControllerRecord { controller, entity }))
    }

    pub fn remove_controller(&mut self, controller: CharacterControllerHandle) -> bool {
        let Some(record) = self.controllers.remove(controller) else {
            return false;
        };
        if let Some(world) = self.world.as_mut() {
            record.controller.remove_from(world);
        }
        debug!(entity = ?record.entity, "Deleted character controller");
        true
    }

    pub fn controller(&self, controller: CharacterControllerHandle) -> Option<&C> {
        self.controllers.get(controller).map(|record| &record.controller)
    }

    pub fn controller_in_world(&self, controller: CharacterControllerHandle) -> Option<(&C, &World)> {
        Some((&self.controllers.get(controller)?.controller, self.world.as_ref()?))
    }

    pub fn controller_in_world_mut(&mut self, controller: CharacterControllerHandle) -> Option<(&mut C, &mut World)> {
        Some((&mut self.controllers.get_mut(controller)?.controller, self.world.as_mut()?))
    }

    /// Steps the world, then hands every controller to `after_step`.
    pub fn step(&mut self, dt: f32, mut after_step: impl FnMut(&mut C, &mut World)) {
        let Some(world) = self.world.as_mut() else {
            return;
        };
        world.step(dt);
        for record in self.controllers.values_mut() {
            after_step(&mut record.controller, world);
        }
    }
}

#[cfg(test)]
mod tests {
    use rapier3d::prelude::SharedShape;

    use super::*;
    use crate::physics::sim::{CollisionFilter, DynamicBody, ObjectKind, WorldSettings};

    struct Marker(ObjectKey);

    impl SceneController for Marker {
        fn remove_from(&self, world: &mut World) {
            world.remove_object(self.0);
        }
    }

    fn scene() -> Scene<&'static str, Marker> {
        let mut scene = Scene::new();
        scene.set_world(Some(World::new(WorldSettings::default())));
        scene
    }

    fn cube(x: f32, mass: f32) -> CollisionObject {
        let kind = if mass > 0.0 {
            ObjectKind::Dynamic(DynamicBody::new(mass))
        } else {
            ObjectKind::Static
        };
        CollisionObject::new(
            Pose::from_position(Vec3::new(x, 0.0, 0.0)),
            SharedShape::cuboid(0.5, 0.5, 0.5),
            Pose::IDENTITY,
            kind,
            CollisionFilter::DYNAMIC,
        )
    }

    fn ball_joint(a: &Pose, b: &Pose) -> (Vec3, Vec3, JointKind) {
        let anchor = (a.position + b.position) * 0.5;
        (
            a.inverse_transform_point(anchor),
            b.inverse_transform_point(anchor),
            JointKind::BallAndSocket {
                angular_limits: Vec3::ZERO,
                rest_rotation: a.rotation.inverse() * b.rotation,
            },
        )
    }

    #[test]
    fn test_bodies_need_a_world() {
        let mut scene: Scene<(), Marker> = Scene::new();
        assert_eq!(scene.insert_body(cube(0.0, 1.0), false, None, None), Err(SceneError::NotSetUp));
        assert!(scene.insert_controller(None, |_| unreachable!()).is_err());
    }

    #[test]
    fn test_deleting_body_severs_joints() {
        let mut scene = scene();
        let a = scene.insert_body(cube(0.0, 1.0), false, None, None).unwrap();
        let b = scene.insert_body(cube(1.0, 1.0), false, None, None).unwrap();

        assert_eq!(scene.insert_joint(a, a, ball_joint), Err(SceneError::SameBody));
        let joint = scene.insert_joint(a, b, ball_joint).unwrap();
        assert_eq!(scene.world().unwrap().joint_count(), 1);

        assert!(scene.remove_body(a));
        assert_eq!(scene.joint_bodies(joint), Some((None, Some(b))));
        assert_eq!(scene.world().unwrap().joint_count(), 0);
        assert_eq!(scene.insert_joint(a, b, ball_joint), Err(SceneError::InvalidBodies));

        assert!(scene.remove_joint(joint));
        assert_eq!(scene.body_joints(b), Some(Vec::new()));
        assert!(!scene.remove_joint(joint));
    }

    #[test]
    fn test_template_lifetime() {
        let mut scene = scene();
        let kept = scene.insert_template("kept", false);
        let once = scene.insert_template("once", true);
        let body = scene.insert_body(cube(0.0, 0.0), true, None, Some(kept)).unwrap();
        let other = scene.insert_body(cube(2.0, 0.0), true, None, Some(once)).unwrap();

        assert_eq!(scene.remove_template(kept), Err(SceneError::TemplateInUse(1)));
        assert!(scene.remove_body(body));
        assert_eq!(scene.template_users(kept), Some(0));
        assert_eq!(scene.remove_template(kept), Ok(()));

        assert!(scene.remove_body(other));
        assert!(scene.template(once).is_none());
        assert_eq!(scene.template_count(), 0);
    }

    #[test]
    fn test_fixed_bodies_refuse_changes() {
        let mut scene = scene();
        let fixed = scene.insert_body(cube(0.0, 1.0), true, None, None).unwrap();
        assert!(!scene.set_linear_velocity(fixed, Vec3::X));
        assert!(!scene.apply_force(fixed, Vec3::X, ForceMode::Impulse));
        assert!(!scene.set_body_pose(fixed, Pose::IDENTITY));
    }

    #[test]
    fn test_raycast_reports_body_and_entity() {
        let mut scene = scene();
        let body = scene
            .insert_body(cube(5.0, 0.0), true, Some(EntityId(7)), None)
            .unwrap();

        let hit = scene.raycast(&Ray::new(Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0))).unwrap();
        assert_eq!(hit.body, body);
        assert_eq!(hit.entity, Some(EntityId(7)));
        assert!((hit.distance - 4.5).abs() < 1e-4);
    }

    #[test]
    fn test_resetting_world_releases_records() {
        let mut scene = scene();
        let object = scene
            .world_mut()
            .unwrap()
            .add_object(cube(9.0, 0.0));
        scene.insert_controller(None, |_| Marker(object)).unwrap();
        scene.insert_body(cube(0.0, 1.0), false, None, None).unwrap();
        scene.insert_template("mesh", false);

        assert!(scene.set_world(None));
        assert_eq!(
            (scene.body_count(), scene.template_count(), scene.controller_count()),
            (0, 0, 0)
        );
        assert!(!scene.set_world(None));
    }
}
