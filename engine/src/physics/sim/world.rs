//! Simulation world
//!
//! A thin layer over a rapier pipeline that both backends drive. One collision
//! object is one collider; every object except a ghost hangs off its own rigid body,
//! placed at the object pose with the shape offset as the collider's local frame.
//!
//! What the layer adds on top of rapier:
//!
//! - Explicit mass and box inertia taken from the offset shape's bounds, the way
//!   the native libraries are fed, rather than density-derived mass
//! - Forces that last one step, like Bullet's `clearForces`
//! - World limits: dynamic bodies whose bounds leave them are frozen (all axes
//!   locked, velocities zeroed) until moved back inside
//! - Capsule sweeps with per-object accept callbacks, visiting mesh triangles one
//!   at a time so a callback can reject a floor triangle and still stop at a wall
//! - Penetration contacts for a single object, for character recovery
//!
//! The query pipeline is refreshed after every change to an object that queries
//! can see, so rays and sweeps are valid between steps.
//!
//! # Example
//!
//! ```ignore
//! let mut world = World::new(WorldSettings::default());
//! let ground = world.add_object(CollisionObject::new(
//!     Pose::IDENTITY,
//!     SharedShape::cuboid(50.0, 1.0, 50.0),
//!     Pose::IDENTITY,
//!     ObjectKind::Static,
//!     CollisionFilter::STATIC,
//! ));
//! world.step(1.0 / 60.0);
//! ```

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;

use glam::{Quat, Vec3};
use rapier3d::parry::bounding_volume::Aabb as BoundingBox;
use rapier3d::parry::query::{
    self as parry_query, ContactManifold, DefaultQueryDispatcher, PersistentQueryDispatcher, ShapeCastOptions,
};
use rapier3d::parry::shape::{Capsule, Shape};
use rapier3d::prelude::*;

use super::filter::{CollisionFilter, Material};
use super::pose::{from_point, from_vector, to_point, to_vector, Pose};
use crate::physics::types::Aabb;

/// An object is addressed by its collider.
pub type ObjectKey = ColliderHandle;

pub type JointKey = ImpulseJointHandle;

/// Capsule sweeps closer than this to their start count as starting in contact.
const SWEEP_TOLERANCE: f32 = 1e-3;

/// Parameters of a simulated body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicBody {
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub linear_sleep_threshold: f32,
    pub angular_sleep_threshold: f32,
}

impl DynamicBody {
    pub fn new(mass: f32) -> Self {
        Self {
            mass,
            linear_damping: 0.0,
            angular_damping: 0.0,
            linear_sleep_threshold: 0.4,
            angular_sleep_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjectKind {
    /// Never moves; infinite mass.
    Static,
    /// Simulated under forces and contacts.
    Dynamic(DynamicBody),
    /// Moved explicitly; pushes dynamic bodies with its velocity but is never pushed.
    Kinematic,
    /// A sensor without a body. Takes part in queries only and ignores the shape offset.
    Ghost,
}

/// Description of an object to add to a [`World`].
#[derive(Clone)]
pub struct CollisionObject {
    pub pose: Pose,
    pub shape: SharedShape,
    /// Pose of the shape relative to the body.
    pub shape_offset: Pose,
    pub kind: ObjectKind,
    pub filter: CollisionFilter,
    pub material: Material,
    pub user_data: u64,
}

impl CollisionObject {
    pub fn new(pose: Pose, shape: SharedShape, shape_offset: Pose, kind: ObjectKind, filter: CollisionFilter) -> Self {
        Self {
            pose,
            shape,
            shape_offset,
            kind,
            filter,
            material: Material::default(),
            user_data: 0,
        }
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JointKind {
    /// Rotation about one axis only.
    Hinge { local_axis_a: Vec3, local_axis_b: Vec3 },
    /// Free rotation about the anchor; non-zero components of `angular_limits`
    /// bound the twist about that axis, measured from `rest_rotation` (B relative to A).
    BallAndSocket { angular_limits: Vec3, rest_rotation: Quat },
}

/// Two bodies tied together at an anchor point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    pub body_a: ObjectKey,
    pub body_b: ObjectKey,
    /// Anchor in the body frame of A.
    pub local_anchor_a: Vec3,
    /// Anchor in the body frame of B.
    pub local_anchor_b: Vec3,
    pub kind: JointKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldSettings {
    pub solver_iterations: usize,
    /// Separation below which contacts are generated. `None` keeps rapier's default.
    pub contact_threshold: Option<f32>,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            solver_iterations: 10,
            contact_threshold: None,
        }
    }
}

/// Per-substep behaviour run after the world steps.
pub trait Action {
    fn update_action(&mut self, world: &mut World, dt: f32);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldRayHit {
    pub object: ObjectKey,
    pub t: f32,
    pub point: Vec3,
    /// Faces against the ray.
    pub normal: Vec3,
}

/// A Y-aligned capsule moved in a straight line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapsuleCast {
    pub from: Vec3,
    pub to: Vec3,
    pub radius: f32,
    pub half_height: f32,
    pub filter: CollisionFilter,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepHit {
    /// Share of the motion covered before contact.
    pub fraction: f32,
    pub point: Vec3,
    /// Points from the surface toward the swept shape.
    pub normal: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldSweepHit {
    pub object: ObjectKey,
    pub hit: SweepHit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    pub point: Vec3,
    /// Points from the queried object toward the other one.
    pub normal: Vec3,
    /// Negative while penetrating.
    pub distance: f32,
}

pub struct World {
    gravity: Vector<Real>,
    limits: Option<Aabb>,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    queries: QueryPipeline,
    /// Locked axes of frozen bodies, restored when they thaw.
    frozen: HashMap<RigidBodyHandle, LockedAxes>,
    /// Bodies holding a force or torque for the next step.
    forced: HashSet<RigidBodyHandle>,
}

impl World {
    pub fn new(settings: WorldSettings) -> Self {
        let mut params = IntegrationParameters::default();
        if let Some(iterations) = NonZeroUsize::new(settings.solver_iterations) {
            params.num_solver_iterations = iterations;
        }
        if let Some(threshold) = settings.contact_threshold {
            params.normalized_prediction_distance = threshold;
        }

        Self {
            gravity: Vector::new(0.0, -9.81, 0.0),
            limits: None,
            params,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            queries: QueryPipeline::new(),
            frozen: HashMap::new(),
            forced: HashSet::new(),
        }
    }

    pub fn gravity(&self) -> Vec3 {
        from_vector(&self.gravity)
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = to_vector(gravity);
        for (_, body) in self.bodies.iter_mut() {
            if body.is_dynamic() {
                body.wake_up(true);
            }
        }
    }

    pub fn limits(&self) -> Option<Aabb> {
        self.limits
    }

    pub fn set_limits(&mut self, limits: Option<Aabb>) {
        self.limits = limits;
    }

    // =========================================================================
    // Objects
    // =========================================================================

    pub fn add_object(&mut self, object: CollisionObject) -> ObjectKey {
        let queryable = object.filter.group & QUERYABLE_GROUPS != 0;
        let collider = ColliderBuilder::new(object.shape.clone())
            .collision_groups(object.filter.groups())
            .friction(object.material.friction)
            .restitution(object.material.restitution)
            .density(0.0)
            .user_data(u128::from(object.user_data));

        let key = match object.kind {
            ObjectKind::Ghost => self
                .colliders
                .insert(collider.position(object.pose.to_isometry()).sensor(true).build()),
            kind => {
                let builder = match kind {
                    ObjectKind::Dynamic(dynamic) => RigidBodyBuilder::dynamic()
                        .linear_damping(dynamic.linear_damping)
                        .angular_damping(dynamic.angular_damping)
                        .additional_mass_properties(box_mass_properties(
                            &object.shape,
                            &object.shape_offset,
                            dynamic.mass,
                        )),
                    ObjectKind::Kinematic => RigidBodyBuilder::kinematic_velocity_based(),
                    _ => RigidBodyBuilder::fixed(),
                };
                let body = self.bodies.insert(builder.position(object.pose.to_isometry()).build());
                let key = self.colliders.insert_with_parent(
                    collider.position(object.shape_offset.to_isometry()).build(),
                    body,
                    &mut self.bodies,
                );

                if let Some(rigid) = self.bodies.get_mut(body) {
                    rigid.recompute_mass_properties_from_colliders(&self.colliders);
                    if let ObjectKind::Dynamic(dynamic) = kind {
                        let activation = rigid.activation_mut();
                        activation.normalized_linear_threshold = dynamic.linear_sleep_threshold;
                        activation.angular_threshold = dynamic.angular_sleep_threshold;
                    }
                }
                key
            }
        };

        if queryable {
            self.refresh_queries();
        }
        key
    }

    /// Removes an object and every joint attached to its body.
    pub fn remove_object(&mut self, key: ObjectKey) -> bool {
        let Some((parent, queryable)) = self.parent_and_visibility(key) else {
            return false;
        };

        match parent {
            Some(body) => {
                self.frozen.remove(&body);
                self.forced.remove(&body);
                self.bodies.remove(
                    body,
                    &mut self.islands,
                    &mut self.colliders,
                    &mut self.impulse_joints,
                    &mut self.multibody_joints,
                    true,
                );
            }
            None => {
                self.colliders.remove(key, &mut self.islands, &mut self.bodies, true);
            }
        }

        if queryable {
            self.refresh_queries();
        }
        true
    }

    pub fn object_count(&self) -> usize {
        self.colliders.len()
    }

    /// Pose of the object's body, or of the collider itself for ghosts.
    pub fn object_pose(&self, key: ObjectKey) -> Option<Pose> {
        let collider = self.colliders.get(key)?;
        match collider.parent() {
            Some(body) => self.bodies.get(body).map(|rigid| Pose::from_isometry(rigid.position())),
            None => Some(Pose::from_isometry(collider.position())),
        }
    }

    pub fn set_object_pose(&mut self, key: ObjectKey, pose: Pose) -> bool {
        let Some((parent, queryable)) = self.parent_and_visibility(key) else {
            return false;
        };

        match parent {
            Some(body) => {
                let Some(rigid) = self.bodies.get_mut(body) else {
                    return false;
                };
                rigid.set_position(pose.to_isometry(), true);
                self.bodies.propagate_modified_body_positions_to_colliders(&mut self.colliders);
            }
            None => {
                if let Some(collider) = self.colliders.get_mut(key) {
                    collider.set_position(pose.to_isometry());
                }
            }
        }

        if queryable {
            self.refresh_queries();
        }
        true
    }

    /// World-space bounds of the object's shape.
    pub fn object_aabb(&self, key: ObjectKey) -> Option<Aabb> {
        self.colliders.get(key).map(|collider| from_bounding_box(&collider.compute_aabb()))
    }

    pub fn user_data(&self, key: ObjectKey) -> Option<u64> {
        self.colliders.get(key).map(|collider| collider.user_data as u64)
    }

    pub fn mass(&self, key: ObjectKey) -> Option<f32> {
        self.body(key).map(|rigid| rigid.mass())
    }

    /// World-space centre of mass.
    pub fn center_of_mass(&self, key: ObjectKey) -> Option<Vec3> {
        self.body(key).map(|rigid| from_point(rigid.center_of_mass()))
    }

    pub fn is_frozen(&self, key: ObjectKey) -> bool {
        self.colliders
            .get(key)
            .and_then(|collider| collider.parent())
            .is_some_and(|body| self.frozen.contains_key(&body))
    }

    /// The object's body, if any, and whether queries can see it.
    fn parent_and_visibility(&self, key: ObjectKey) -> Option<(Option<RigidBodyHandle>, bool)> {
        let collider = self.colliders.get(key)?;
        let queryable = collider.collision_groups().memberships.bits() & QUERYABLE_GROUPS != 0;
        Some((collider.parent(), queryable))
    }

    fn body(&self, key: ObjectKey) -> Option<&RigidBody> {
        self.bodies.get(self.colliders.get(key)?.parent()?)
    }

    /// The body of a dynamic or kinematic object.
    fn moving_body_mut(&mut self, key: ObjectKey) -> Option<(RigidBodyHandle, &mut RigidBody)> {
        let handle = self.colliders.get(key)?.parent()?;
        self.bodies
            .get_mut(handle)
            .filter(|rigid| !rigid.is_fixed())
            .map(|rigid| (handle, rigid))
    }

    fn dynamic_body_mut(&mut self, key: ObjectKey) -> Option<(RigidBodyHandle, &mut RigidBody)> {
        self.moving_body_mut(key).filter(|(_, rigid)| rigid.is_dynamic())
    }

    fn refresh_queries(&mut self) {
        self.queries.update(&self.colliders);
    }

    // =========================================================================
    // Motion
    // =========================================================================

    pub fn linear_velocity(&self, key: ObjectKey) -> Vec3 {
        self.body(key).map_or(Vec3::ZERO, |rigid| from_vector(rigid.linvel()))
    }

    pub fn set_linear_velocity(&mut self, key: ObjectKey, velocity: Vec3) -> bool {
        let Some((_, rigid)) = self.moving_body_mut(key) else {
            return false;
        };
        rigid.set_linvel(to_vector(velocity), true);
        true
    }

    pub fn angular_velocity(&self, key: ObjectKey) -> Vec3 {
        self.body(key).map_or(Vec3::ZERO, |rigid| from_vector(rigid.angvel()))
    }

    pub fn set_angular_velocity(&mut self, key: ObjectKey, velocity: Vec3) -> bool {
        let Some((_, rigid)) = self.moving_body_mut(key) else {
            return false;
        };
        rigid.set_angvel(to_vector(velocity), true);
        true
    }

    /// Adds a force applied over the next step only.
    pub fn add_force(&mut self, key: ObjectKey, force: Vec3) -> bool {
        let Some((handle, rigid)) = self.dynamic_body_mut(key) else {
            return false;
        };
        rigid.add_force(to_vector(force), true);
        self.forced.insert(handle);
        true
    }

    /// Adds a torque applied over the next step only.
    pub fn add_torque(&mut self, key: ObjectKey, torque: Vec3) -> bool {
        let Some((handle, rigid)) = self.dynamic_body_mut(key) else {
            return false;
        };
        rigid.add_torque(to_vector(torque), true);
        self.forced.insert(handle);
        true
    }

    pub fn apply_impulse(&mut self, key: ObjectKey, impulse: Vec3) -> bool {
        let Some((_, rigid)) = self.dynamic_body_mut(key) else {
            return false;
        };
        rigid.apply_impulse(to_vector(impulse), true);
        true
    }

    pub fn apply_torque_impulse(&mut self, key: ObjectKey, impulse: Vec3) -> bool {
        let Some((_, rigid)) = self.dynamic_body_mut(key) else {
            return false;
        };
        rigid.apply_torque_impulse(to_vector(impulse), true);
        true
    }

    /// Locks linear Z and angular X/Y, clearing any velocity along them.
    pub fn constrain_to_xy_plane(&mut self, key: ObjectKey) -> bool {
        let axes = LockedAxes::TRANSLATION_LOCKED_Z | LockedAxes::ROTATION_LOCKED_X | LockedAxes::ROTATION_LOCKED_Y;
        let Some(handle) = self.colliders.get(key).and_then(|collider| collider.parent()) else {
            return false;
        };
        let Some(rigid) = self.bodies.get_mut(handle).filter(|rigid| rigid.is_dynamic()) else {
            return false;
        };

        let linear = *rigid.linvel();
        let angular = *rigid.angvel();
        rigid.set_linvel(Vector::new(linear.x, linear.y, 0.0), true);
        rigid.set_angvel(Vector::new(0.0, 0.0, angular.z), true);

        match self.frozen.get_mut(&handle) {
            Some(saved) => *saved |= axes,
            None => {
                let locked = rigid.locked_axes() | axes;
                rigid.set_locked_axes(locked, true);
            }
        }
        true
    }

    // =========================================================================
    // Joints
    // =========================================================================

    pub fn add_joint(&mut self, joint: Joint) -> Option<JointKey> {
        let body_a = self.colliders.get(joint.body_a)?.parent()?;
        let body_b = self.colliders.get(joint.body_b)?.parent()?;
        if body_a == body_b {
            return None;
        }

        let anchor_a = to_point(joint.local_anchor_a);
        let anchor_b = to_point(joint.local_anchor_b);
        let generic = match joint.kind {
            JointKind::Hinge {
                local_axis_a,
                local_axis_b,
            } => GenericJointBuilder::new(JointAxesMask::LOCKED_REVOLUTE_AXES)
                .local_anchor1(anchor_a)
                .local_anchor2(anchor_b)
                .local_axis1(UnitVector::new_normalize(to_vector(local_axis_a)))
                .local_axis2(UnitVector::new_normalize(to_vector(local_axis_b)))
                .build(),
            JointKind::BallAndSocket {
                angular_limits,
                rest_rotation,
            } => {
                let mut builder = GenericJointBuilder::new(JointAxesMask::LOCKED_SPHERICAL_AXES)
                    .local_frame1(Pose::new(joint.local_anchor_a, rest_rotation).to_isometry())
                    .local_frame2(Pose::from_position(joint.local_anchor_b).to_isometry());
                for (axis, limit) in [
                    (JointAxis::AngX, angular_limits.x),
                    (JointAxis::AngY, angular_limits.y),
                    (JointAxis::AngZ, angular_limits.z),
                ] {
                    if limit > 0.0 {
                        builder = builder.limits(axis, [-limit, limit]);
                    }
                }
                builder.build()
            }
        };

        Some(self.impulse_joints.insert(body_a, body_b, generic, true))
    }

    pub fn remove_joint(&mut self, key: JointKey) -> bool {
        self.impulse_joints.remove(key, true).is_some()
    }

    pub fn joint_count(&self) -> usize {
        self.impulse_joints.len()
    }

    // =========================================================================
    // Stepping
    // =========================================================================

    pub fn step(&mut self, dt: f32) {
        self.freeze_outside_limits();

        self.params.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.queries),
            &(),
            &(),
        );

        for handle in self.forced.drain() {
            if let Some(rigid) = self.bodies.get_mut(handle) {
                rigid.reset_forces(false);
                rigid.reset_torques(false);
            }
        }
    }

    /// Freezes dynamic bodies whose bounds lie outside the limits and thaws the
    /// ones that came back.
    fn freeze_outside_limits(&mut self) {
        let mut freeze = Vec::new();
        let mut thaw = Vec::new();
        for (_, collider) in self.colliders.iter() {
            let Some(body) = collider.parent() else {
                continue;
            };
            if !self.bodies.get(body).is_some_and(RigidBody::is_dynamic) {
                continue;
            }
            let outside = self
                .limits
                .is_some_and(|limits| !limits.intersects(&from_bounding_box(&collider.compute_aabb())));
            match (outside, self.frozen.contains_key(&body)) {
                (true, false) => freeze.push(body),
                (false, true) => thaw.push(body),
                _ => {}
            }
        }

        for body in freeze {
            if let Some(rigid) = self.bodies.get_mut(body) {
                self.frozen.insert(body, rigid.locked_axes());
                rigid.set_locked_axes(LockedAxes::all(), false);
                rigid.set_linvel(Vector::zeros(), false);
                rigid.set_angvel(Vector::zeros(), false);
                rigid.sleep();
            }
        }
        for body in thaw {
            if let (Some(axes), Some(rigid)) = (self.frozen.remove(&body), self.bodies.get_mut(body)) {
                rigid.set_locked_axes(axes, true);
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Every object hit by the ray whose group is in `mask`, nearest first. Objects
    /// containing the origin are not reported.
    pub fn ray_cast_all(&self, origin: Vec3, direction: Vec3, max_t: f32, mask: u32) -> Vec<WorldRayHit> {
        let ray = Ray::new(to_point(origin), to_vector(direction));
        let filter = QueryFilter::default().groups(CollisionFilter::query_groups(mask));

        let mut hits = Vec::new();
        self.queries
            .intersections_with_ray(&self.bodies, &self.colliders, &ray, max_t, true, filter, |object, hit| {
                let t = hit.time_of_impact;
                if t > 0.0 {
                    let normal = from_vector(&hit.normal);
                    hits.push(WorldRayHit {
                        object,
                        t,
                        point: origin + direction * t,
                        normal: if normal.dot(direction) > 0.0 { -normal } else { normal },
                    });
                }
                true
            });

        hits.sort_by(|a, b| a.t.total_cmp(&b.t));
        hits
    }

    pub fn ray_cast_closest(&self, origin: Vec3, direction: Vec3, max_t: f32, mask: u32) -> Option<WorldRayHit> {
        self.ray_cast_all(origin, direction, max_t, mask).into_iter().next()
    }

    /// Sweeps a capsule from `cast.from` to `cast.to` and returns the nearest hit
    /// that `accept` lets through.
    ///
    /// A capsule already touching something only stops there when the motion
    /// points into it; grazing and separating motion passes.
    pub fn sweep_capsule(
        &self,
        cast: &CapsuleCast,
        mut accept: impl FnMut(ObjectKey, &SweepHit) -> bool,
    ) -> Option<WorldSweepHit> {
        let motion = cast.to - cast.from;
        if motion.length() <= f32::EPSILON {
            return None;
        }

        let capsule = Capsule::new_y(cast.half_height, cast.radius);
        let start = Pose::from_position(cast.from).to_isometry();
        let extent = Vec3::new(cast.radius, cast.half_height + cast.radius, cast.radius);
        let swept = BoundingBox::new(
            to_point(cast.from.min(cast.to) - extent),
            to_point(cast.from.max(cast.to) + extent),
        );
        let groups = cast.filter.groups();

        let mut candidates = Vec::new();
        self.queries.colliders_with_aabb_intersecting_aabb(&swept, |key| {
            candidates.push(*key);
            true
        });

        let mut best: Option<WorldSweepHit> = None;
        for key in candidates {
            let Some(collider) = self.colliders.get(key) else {
                continue;
            };
            if !groups.test(collider.collision_groups()) {
                continue;
            }
            let position = collider.position();

            let mut consider = |target: &dyn Shape| {
                let Some(hit) = cast_capsule(&capsule, &start, motion, position, target) else {
                    return;
                };
                if best.is_none_or(|found| hit.fraction < found.hit.fraction) && accept(key, &hit) {
                    best = Some(WorldSweepHit { object: key, hit });
                }
            };

            match collider.shape().as_trimesh() {
                Some(mesh) => {
                    let local = swept.transform_by(&position.inverse());
                    let mut triangles = Vec::new();
                    mesh.qbvh().intersect_aabb(&local, &mut triangles);
                    for index in triangles {
                        consider(&mesh.triangle(index));
                    }
                }
                None => consider(collider.shape()),
            }
        }
        best
    }

    /// Contact points between `key` and every object it interacts with, at zero
    /// prediction distance.
    pub fn contacts_with(&self, key: ObjectKey) -> Vec<(ObjectKey, ContactPoint)> {
        let Some(collider) = self.colliders.get(key) else {
            return Vec::new();
        };
        let position = collider.position();
        let groups = collider.collision_groups();

        let mut candidates = Vec::new();
        self.queries
            .colliders_with_aabb_intersecting_aabb(&collider.compute_aabb(), |other| {
                candidates.push(*other);
                true
            });

        let mut contacts = Vec::new();
        for other_key in candidates {
            let Some(other) = self.colliders.get(other_key) else {
                continue;
            };
            if other_key == key || !groups.test(other.collision_groups()) {
                continue;
            }

            let position12 = position.inv_mul(other.position());
            let mut manifolds: Vec<ContactManifold<(), ()>> = Vec::new();
            if DefaultQueryDispatcher
                .contact_manifolds(&position12, collider.shape(), other.shape(), 0.0, &mut manifolds, &mut None)
                .is_err()
            {
                continue;
            }

            for manifold in &manifolds {
                let subshape = manifold.subshape_pos1.unwrap_or_default();
                let normal = position.rotation * (subshape.rotation * manifold.local_n1);
                for contact in manifold.contacts() {
                    contacts.push((
                        other_key,
                        ContactPoint {
                            point: from_point(&(position * (subshape * contact.local_p1))),
                            normal: from_vector(&normal),
                            distance: contact.dist,
                        },
                    ));
                }
            }
        }
        contacts
    }
}

/// Groups seen by rays and sweeps.
const QUERYABLE_GROUPS: u32 = super::filter::group::DEFAULT | super::filter::group::STATIC;

/// Linear sweep of `capsule` against `target` placed at `position`.
fn cast_capsule(
    capsule: &Capsule,
    start: &Isometry<Real>,
    motion: Vec3,
    position: &Isometry<Real>,
    target: &dyn Shape,
) -> Option<SweepHit> {
    let options = ShapeCastOptions {
        max_time_of_impact: 1.0,
        target_distance: 0.0,
        stop_at_penetration: false,
        compute_impact_geometry_on_penetration: true,
    };
    let hit = parry_query::cast_shapes(
        start,
        &to_vector(motion),
        capsule,
        position,
        &Vector::zeros(),
        target,
        options,
    )
    .ok()
    .flatten()?;

    let normal = from_vector(&(position.rotation * *hit.normal2));
    let length = motion.length();
    let touching = hit.time_of_impact * length <= SWEEP_TOLERANCE;
    if touching && normal.dot(motion) >= -SWEEP_TOLERANCE * length {
        return None;
    }

    Some(SweepHit {
        fraction: hit.time_of_impact,
        point: from_point(&(position * hit.witness2)),
        normal,
    })
}

/// Mass properties of a solid box filling the bounds of the offset shape.
fn box_mass_properties(shape: &SharedShape, offset: &Pose, mass: f32) -> MassProperties {
    let mass = mass.max(1e-4);
    let bounds = shape.compute_aabb(&offset.to_isometry());
    let h = bounds.half_extents();
    let inertia = Vector::new(h.y * h.y + h.z * h.z, h.x * h.x + h.z * h.z, h.x * h.x + h.y * h.y) * (mass / 3.0);
    MassProperties::new(bounds.center(), mass, inertia)
}

fn from_bounding_box(bounds: &BoundingBox) -> Aabb {
    Aabb::new(from_point(&bounds.mins), from_point(&bounds.maxs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::sim::filter::group;

    const DT: f32 = 1.0 / 60.0;

    fn add_box(world: &mut World, center: Vec3, half_extents: Vec3, kind: ObjectKind) -> ObjectKey {
        let filter = match kind {
            ObjectKind::Static => CollisionFilter::STATIC,
            _ => CollisionFilter::DYNAMIC,
        };
        world.add_object(CollisionObject::new(
            Pose::from_position(center),
            SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z),
            Pose::IDENTITY,
            kind,
            filter,
        ))
    }

    fn floor(world: &mut World) -> ObjectKey {
        add_box(world, Vec3::new(0.0, -1.0, 0.0), Vec3::new(20.0, 1.0, 20.0), ObjectKind::Static)
    }

    fn capsule_cast(from: Vec3, to: Vec3) -> CapsuleCast {
        CapsuleCast {
            from,
            to,
            radius: 0.5,
            half_height: 0.5,
            filter: CollisionFilter::new(group::CHARACTER, group::STATIC | group::DEFAULT),
        }
    }

    #[test]
    fn test_box_comes_to_rest_on_floor() {
        let mut world = World::new(WorldSettings::default());
        floor(&mut world);
        let falling = add_box(
            &mut world,
            Vec3::new(0.0, 3.0, 0.0),
            Vec3::splat(0.5),
            ObjectKind::Dynamic(DynamicBody::new(1.0)),
        );

        for _ in 0..180 {
            world.step(DT);
        }
        let y = world.object_pose(falling).unwrap().position.y;
        assert!((y - 0.5).abs() < 0.05, "y = {y}");
    }

    #[test]
    fn test_mass_and_center_from_offset_shape() {
        let mut world = World::new(WorldSettings::default());
        let key = world.add_object(CollisionObject::new(
            Pose::from_position(Vec3::new(5.0, 0.0, 0.0)),
            SharedShape::cuboid(1.0, 1.0, 1.0),
            Pose::from_position(Vec3::ONE),
            ObjectKind::Dynamic(DynamicBody::new(3.0)),
            CollisionFilter::DYNAMIC,
        ));

        assert!((world.mass(key).unwrap() - 3.0).abs() < 1e-5);
        let center = world.center_of_mass(key).unwrap();
        assert!((center - Vec3::new(6.0, 1.0, 1.0)).length() < 1e-5);
        assert_eq!(world.object_pose(key).unwrap().position, Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_forces_last_one_step() {
        let mut world = World::new(WorldSettings::default());
        world.set_gravity(Vec3::ZERO);
        let body = add_box(&mut world, Vec3::ZERO, Vec3::splat(0.5), ObjectKind::Dynamic(DynamicBody::new(1.0)));

        assert!(world.add_force(body, Vec3::new(60.0, 0.0, 0.0)));
        world.step(DT);
        let after_push = world.linear_velocity(body);
        assert!((after_push.x - 1.0).abs() < 1e-3, "v = {after_push}");

        world.step(DT);
        assert!((world.linear_velocity(body) - after_push).length() < 1e-5);
    }

    #[test]
    fn test_limits_freeze_and_thaw() {
        let mut world = World::new(WorldSettings::default());
        world.set_limits(Some(Aabb::new(Vec3::splat(-10.0), Vec3::splat(10.0))));
        let body = add_box(
            &mut world,
            Vec3::new(0.0, 30.0, 0.0),
            Vec3::splat(0.5),
            ObjectKind::Dynamic(DynamicBody::new(1.0)),
        );

        for _ in 0..10 {
            world.step(DT);
        }
        assert!(world.is_frozen(body));
        assert_eq!(world.object_pose(body).unwrap().position, Vec3::new(0.0, 30.0, 0.0));

        world.set_object_pose(body, Pose::from_position(Vec3::new(0.0, 5.0, 0.0)));
        for _ in 0..10 {
            world.step(DT);
        }
        assert!(!world.is_frozen(body));
        assert!(world.object_pose(body).unwrap().position.y < 5.0);
    }

    #[test]
    fn test_rays_sorted_and_masked() {
        let mut world = World::new(WorldSettings::default());
        let far = add_box(&mut world, Vec3::new(10.0, 0.0, 0.0), Vec3::splat(1.0), ObjectKind::Static);
        let near = add_box(&mut world, Vec3::new(5.0, 0.0, 0.0), Vec3::splat(1.0), ObjectKind::Static);

        let hits = world.ray_cast_all(Vec3::ZERO, Vec3::X, 100.0, group::ALL);
        assert_eq!(hits.iter().map(|hit| hit.object).collect::<Vec<_>>(), vec![near, far]);
        assert!((hits[0].t - 4.0).abs() < 1e-4);
        assert!(hits[0].normal.x < -0.99);

        assert!(world.ray_cast_closest(Vec3::ZERO, Vec3::X, 100.0, group::DEFAULT).is_none());
        // Starting inside the near box only reports the far one
        let inside = world.ray_cast_closest(Vec3::new(5.0, 0.0, 0.0), Vec3::X, 100.0, group::ALL);
        assert_eq!(inside.map(|hit| hit.object), Some(far));
    }

    #[test]
    fn test_moved_object_visible_to_rays_before_stepping() {
        let mut world = World::new(WorldSettings::default());
        let body = add_box(&mut world, Vec3::ZERO, Vec3::splat(0.5), ObjectKind::Dynamic(DynamicBody::new(1.0)));
        world.set_object_pose(body, Pose::from_position(Vec3::new(0.0, 0.0, 8.0)));

        let hit = world.ray_cast_closest(Vec3::ZERO, Vec3::Z, 100.0, group::ALL).unwrap();
        assert_eq!(hit.object, body);
        assert!((hit.t - 7.5).abs() < 1e-4);
    }

    #[test]
    fn test_sweep_stops_at_wall() {
        let mut world = World::new(WorldSettings::default());
        let wall = add_box(&mut world, Vec3::new(3.0, 0.0, 0.0), Vec3::new(0.5, 5.0, 5.0), ObjectKind::Static);

        let found = world
            .sweep_capsule(&capsule_cast(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)), |_, _| true)
            .unwrap();
        assert_eq!(found.object, wall);
        // Capsule surface reaches the wall face at x = 2.5 after 2.0 of 4.0
        assert!((found.hit.fraction - 0.5).abs() < 1e-3);
        assert!(found.hit.normal.x < -0.99);

        assert!(world
            .sweep_capsule(&capsule_cast(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)), |_, _| false)
            .is_none());
    }

    #[test]
    fn test_sweep_along_touching_floor_passes() {
        let mut world = World::new(WorldSettings::default());
        floor(&mut world);

        let resting = Vec3::new(0.0, 1.0, 0.0);
        assert!(world
            .sweep_capsule(&capsule_cast(resting, resting + Vec3::X), |_, _| true)
            .is_none());

        let down = world
            .sweep_capsule(&capsule_cast(resting, resting - Vec3::Y), |_, _| true)
            .unwrap();
        assert!(down.hit.fraction < 1e-3);
        assert!(down.hit.normal.y > 0.99);
    }

    #[test]
    fn test_sweep_visits_mesh_triangles() {
        let mut world = World::new(WorldSettings::default());
        // A floor quad and a wall quad in one mesh
        let vertices = vec![
            Point::new(-5.0, 0.0, -5.0),
            Point::new(5.0, 0.0, -5.0),
            Point::new(5.0, 0.0, 5.0),
            Point::new(-5.0, 0.0, 5.0),
            Point::new(2.0, 0.0, -5.0),
            Point::new(2.0, 5.0, -5.0),
            Point::new(2.0, 5.0, 5.0),
            Point::new(2.0, 0.0, 5.0),
        ];
        let triangles = vec![[0, 2, 1], [0, 3, 2], [4, 5, 6], [4, 6, 7]];
        let mesh = world.add_object(CollisionObject::new(
            Pose::IDENTITY,
            SharedShape::trimesh(vertices, triangles),
            Pose::IDENTITY,
            ObjectKind::Static,
            CollisionFilter::STATIC,
        ));

        // Sinks slightly into the floor while moving toward the wall
        let cast = capsule_cast(Vec3::new(0.0, 0.99, 0.0), Vec3::new(3.0, 0.99, 0.0));
        let wall_only = world
            .sweep_capsule(&cast, |_, hit| hit.normal.y.abs() < 0.5)
            .unwrap();
        assert_eq!(wall_only.object, mesh);
        assert!(wall_only.hit.normal.x < -0.99);
        assert!((wall_only.hit.fraction - 0.5).abs() < 1e-2);
    }

    #[test]
    fn test_contacts_report_penetration() {
        let mut world = World::new(WorldSettings::default());
        let ground = floor(&mut world);
        let ghost = world.add_object(CollisionObject::new(
            Pose::from_position(Vec3::new(0.0, 0.9, 0.0)),
            SharedShape::capsule_y(0.5, 0.5),
            Pose::IDENTITY,
            ObjectKind::Ghost,
            CollisionFilter::new(group::CHARACTER, group::STATIC | group::DEFAULT),
        ));

        let contacts = world.contacts_with(ghost);
        let (other, deepest) = contacts
            .iter()
            .min_by(|a, b| a.1.distance.total_cmp(&b.1.distance))
            .copied()
            .unwrap();
        assert_eq!(other, ground);
        assert!((deepest.distance + 0.1).abs() < 1e-3);
        assert!(deepest.normal.y < -0.99);

        world.set_object_pose(ghost, Pose::from_position(Vec3::new(0.0, 3.0, 0.0)));
        assert!(world.contacts_with(ghost).is_empty());
    }

    #[test]
    fn test_removing_body_drops_its_joints() {
        let mut world = World::new(WorldSettings::default());
        let a = add_box(&mut world, Vec3::ZERO, Vec3::splat(0.5), ObjectKind::Dynamic(DynamicBody::new(1.0)));
        let b = add_box(&mut world, Vec3::X, Vec3::splat(0.5), ObjectKind::Dynamic(DynamicBody::new(1.0)));
        let joint = Joint {
            body_a: a,
            body_b: b,
            local_anchor_a: Vec3::new(0.5, 0.0, 0.0),
            local_anchor_b: Vec3::new(-0.5, 0.0, 0.0),
            kind: JointKind::BallAndSocket {
                angular_limits: Vec3::ZERO,
                rest_rotation: Quat::IDENTITY,
            },
        };

        assert!(world.add_joint(Joint { body_b: a, ..joint }).is_none());
        assert!(world.add_joint(joint).is_some());
        assert_eq!(world.joint_count(), 1);

        assert!(world.remove_object(b));
        assert_eq!(world.joint_count(), 0);
        assert!(!world.remove_object(b));
        assert_eq!(world.object_count(), 1);
    }
}
