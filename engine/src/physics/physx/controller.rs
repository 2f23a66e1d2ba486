//! Capsule character controller
//!
//! Works like the controller manager built into PhysX: the capsule is a kinematic
//! actor that never reacts to forces. Each move runs three swept passes:
//!
//! 1. **Up** lifts the capsule by the step offset (when moving sideways) plus any
//!    requested upward motion, stopping under ceilings
//! 2. **Side** slides the horizontal motion along walls, at most four times
//! 3. **Down** drops back by the applied lift plus any requested downward motion,
//!    stopping on the ground
//!
//! Surfaces steeper than the slope limit act as walls; gentler ones are climbed
//! ("easy" climbing mode). Sweeps use the capsule inflated by the contact offset.
//!
//! The actor is placed at the end of each move and given the displacement divided
//! by the time elapsed since the previous move, measured by a [`Clock`], as its
//! velocity so bodies in its way get pushed. After the world steps, the actor is
//! put back where the controller stands, at rest.

use std::sync::Mutex;
use std::time::Instant;

use glam::Vec3;
use rapier3d::prelude::SharedShape;

use crate::physics::config::PhysXConfig;
use crate::physics::scene::SceneController;
use crate::physics::sim::{
    group, CapsuleCast, CollisionFilter, CollisionObject, ObjectKey, ObjectKind, Pose, SweepHit, World,
};

const UP: Vec3 = Vec3::Y;

const MAX_SIDE_PASSES: usize = 4;

/// Displacements shorter than this are not swept.
const MIN_MOVE: f32 = 1e-5;

/// The controller actor only pushes dynamic bodies.
const ACTOR_FILTER: CollisionFilter = CollisionFilter {
    group: group::KINEMATIC,
    mask: group::DEFAULT,
};

/// Sweeps stop at dynamic and static bodies; other controllers are ignored.
const SWEEP_FILTER: CollisionFilter = CollisionFilter {
    group: group::KINEMATIC,
    mask: group::DEFAULT | group::STATIC,
};

/// Source of timestamps, in seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Wall-clock time since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, seconds: f64) {
        if let Ok(mut now) = self.now.lock() {
            *now += seconds;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.lock().map_or(0.0, |now| *now)
    }
}

/// Surfaces touched during the last move, as normals pointing toward the controller.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ControllerCollisions {
    pub sides: Option<Vec3>,
    pub up: Option<Vec3>,
    pub down: Option<Vec3>,
}

pub struct CapsuleController {
    object: ObjectKey,
    position: Vec3,
    radius: f32,
    half_height: f32,
    step_offset: f32,
    /// Cosine of the steepest walkable slope.
    slope_limit: f32,
    contact_offset: f32,
    last_update: f64,
    collisions: ControllerCollisions,
}

impl CapsuleController {
    /// Adds the controller's kinematic capsule to `world`, centred on the origin.
    pub fn new(world: &mut World, height: f32, radius: f32, config: &PhysXConfig, now: f64) -> Self {
        let object = world.add_object(CollisionObject::new(
            Pose::IDENTITY,
            SharedShape::capsule_y(height * 0.5, radius),
            Pose::IDENTITY,
            ObjectKind::Kinematic,
            ACTOR_FILTER,
        ));

        Self {
            object,
            position: Vec3::ZERO,
            radius,
            half_height: height * 0.5,
            step_offset: radius,
            slope_limit: config.controller_slope_limit_degrees.to_radians().cos(),
            contact_offset: config.controller_contact_offset,
            last_update: now,
            collisions: ControllerCollisions::default(),
        }
    }

    pub fn actor(&self) -> ObjectKey {
        self.object
    }

    pub fn collisions(&self) -> ControllerCollisions {
        self.collisions
    }

    /// Centre of the capsule.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, world: &mut World, position: Vec3) -> bool {
        self.position = position;
        world.set_object_pose(self.object, Pose::from_position(position))
    }

    /// Moves the controller by `displacement` at time `now`.
    ///
    /// # Returns
    ///
    /// The surfaces touched along the way.
    pub fn move_by(&mut self, world: &mut World, displacement: Vec3, now: f64) -> ControllerCollisions {
        let elapsed = (now - self.last_update) as f32;
        self.last_update = now;

        let start = self.position;
        let mut collisions = ControllerCollisions::default();
        let horizontal = Vec3::new(displacement.x, 0.0, displacement.z);
        let lift = if horizontal.length() > MIN_MOVE { self.step_offset } else { 0.0 };

        // Up
        let mut position = start;
        let rise = lift + displacement.y.max(0.0);
        if rise > MIN_MOVE {
            let (reached, hit) = self.sweep_to(world, position, position + UP * rise);
            position = reached;
            collisions.up = hit.map(|hit| hit.normal);
        }
        let applied_lift = (position.y - start.y).clamp(0.0, lift);

        // Side
        let mut remaining = horizontal;
        for _ in 0..MAX_SIDE_PASSES {
            if remaining.length() <= MIN_MOVE {
                break;
            }
            let (reached, hit) = self.sweep_to(world, position, position + remaining);
            position = reached;
            let Some(hit) = hit else {
                break;
            };

            let mut normal = hit.normal;
            if normal.dot(UP) < self.slope_limit {
                collisions.sides = Some(hit.normal);
                // Too steep to climb: slide as if against a vertical wall
                normal = Vec3::new(normal.x, 0.0, normal.z).try_normalize().unwrap_or(normal);
            }
            let left = remaining * (1.0 - hit.fraction);
            remaining = left - normal * left.dot(normal);
        }

        // Down
        let drop = applied_lift + (-displacement.y).max(0.0);
        if drop > MIN_MOVE {
            let (reached, hit) = self.sweep_to(world, position, position - UP * drop);
            position = reached;
            collisions.down = hit.map(|hit| hit.normal);
        }

        let velocity = if elapsed > 0.0 {
            (position - start) / elapsed
        } else {
            Vec3::ZERO
        };
        self.position = position;
        world.set_object_pose(self.object, Pose::from_position(position));
        world.set_linear_velocity(self.object, velocity);

        self.collisions = collisions;
        collisions
    }

    /// Returns the actor to the controller position and stops it pushing bodies
    /// until the next move.
    pub fn settle(&self, world: &mut World) {
        world.set_linear_velocity(self.object, Vec3::ZERO);
        world.set_object_pose(self.object, Pose::from_position(self.position));
    }

    /// Sweeps from `from` toward `to`, returning where the capsule stopped.
    fn sweep_to(&self, world: &World, from: Vec3, to: Vec3) -> (Vec3, Option<SweepHit>) {
        let cast = CapsuleCast {
            from,
            to,
            radius: self.radius + self.contact_offset,
            half_height: self.half_height,
            filter: SWEEP_FILTER,
        };
        let own = self.object;
        match world.sweep_capsule(&cast, |key, _| key != own) {
            Some(found) => (from + (to - from) * found.hit.fraction, Some(found.hit)),
            None => (to, None),
        }
    }
}

impl SceneController for CapsuleController {
    fn remove_from(&self, world: &mut World) {
        world.remove_object(self.object);
    }
}
