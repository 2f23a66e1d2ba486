//! Kinematic character controller
//!
//! A ghost capsule moved by sweep-and-slide rather than by forces. The controller
//! is ticked as an [`Action`] after every world substep:
//!
//! 1. **Pre-step**: push the capsule out of anything it overlaps, 20% of the
//!    penetration per pass, for up to five passes.
//! 2. **Player step**: cover the accumulated walk velocity for this substep with
//!    up to ten sweeps, deflecting the target along every wall that is hit.
//! 3. **Probes**: short sweeps up and down record the ceiling and ground normals.
//!
//! Surfaces whose normal is within the maximum slope of the up axis never block
//! horizontal movement; walking across a floor does not stop the character.
//!
//! # Example
//!
//! ```ignore
//! let mut controller = KinematicCharacterController::new(&mut world, 1.8, 0.4, &config.bullet);
//! controller.set_velocity_for_time_interval(Vec3::new(2.0, 0.0, 0.0), 0.5);
//! world.step(dt);
//! controller.update_action(&mut world, dt);
//! ```

use glam::Vec3;
use tracing::trace;

use rapier3d::prelude::SharedShape;

use crate::physics::config::BulletConfig;
use crate::physics::scene::SceneController;
use crate::physics::sim::{
    group, Action, CapsuleCast, CollisionFilter, CollisionObject, ObjectKey, ObjectKind, Pose, SweepHit, World,
    WorldSweepHit,
};

const UP: Vec3 = Vec3::Y;

/// Extra radius given to the capsule while sweeping.
const MARGIN_FUDGE: f32 = 0.02;

/// Margin of the capsule shape, used to offset the ground and ceiling probes.
const CONVEX_MARGIN: f32 = 0.04;

const PROBE_DISTANCE: f32 = 1.0;

/// Passes of penetration recovery after the first.
const MAX_RECOVERY_PASSES: usize = 4;

const MAX_SLIDE_ITERATIONS: usize = 10;

/// Share of the penetration depth removed per recovery pass.
const RECOVERY_RATE: f32 = 0.2;

/// A capsule that walks through the world by sweep-and-slide.
#[derive(Debug, Clone)]
pub struct KinematicCharacterController {
    ghost: ObjectKey,
    radius: f32,
    half_height: f32,
    filter: CollisionFilter,
    step_height: f32,
    max_slope_cosine: f32,
    vertical_step: bool,

    current_position: Vec3,
    target_position: Vec3,
    current_step_offset: f32,

    walk_velocity: Vec3,
    normalized_walk_velocity: Vec3,
    velocity_time_remaining: f32,

    touching_contact: bool,
    touching_normal: Vec3,

    up_axis_collision: Option<Vec3>,
    down_axis_collision: Option<Vec3>,
}

impl KinematicCharacterController {
    /// Adds a ghost capsule to `world` at the origin.
    ///
    /// # Arguments
    ///
    /// * `height` - Length of the capsule's cylinder section
    /// * `radius` - Radius of the capsule
    pub fn new(world: &mut World, height: f32, radius: f32, config: &BulletConfig) -> Self {
        let half_height = height * 0.5;
        let filter = CollisionFilter::new(group::CHARACTER, group::STATIC | group::DEFAULT);
        let ghost = world.add_object(CollisionObject::new(
            Pose::IDENTITY,
            SharedShape::capsule_y(half_height, radius),
            Pose::IDENTITY,
            ObjectKind::Ghost,
            filter,
        ));

        Self {
            ghost,
            radius,
            half_height,
            filter,
            step_height: config.character_step_height,
            max_slope_cosine: config.character_max_slope_degrees.to_radians().cos(),
            vertical_step: config.enable_vertical_step,
            current_position: Vec3::ZERO,
            target_position: Vec3::ZERO,
            current_step_offset: 0.0,
            walk_velocity: Vec3::ZERO,
            normalized_walk_velocity: Vec3::ZERO,
            velocity_time_remaining: 0.0,
            touching_contact: false,
            touching_normal: Vec3::ZERO,
            up_axis_collision: None,
            down_axis_collision: None,
        }
    }

    /// The ghost object standing in for the capsule.
    pub fn ghost(&self) -> ObjectKey {
        self.ghost
    }

    /// Centre of the capsule.
    pub fn position(&self, world: &World) -> Vec3 {
        world
            .object_pose(self.ghost)
            .map_or(self.current_position, |pose| pose.position)
    }

    pub fn set_world_position(&mut self, world: &mut World, position: Vec3) {
        self.current_position = position;
        self.target_position = position;
        world.set_object_pose(self.ghost, Pose::from_position(position));
    }

    pub fn up_axis_collision(&self) -> Option<Vec3> {
        self.up_axis_collision
    }

    pub fn down_axis_collision(&self) -> Option<Vec3> {
        self.down_axis_collision
    }

    pub fn is_penetrating(&self) -> bool {
        self.touching_contact
    }

    /// Blends `velocity` into the walk velocity, weighted by `time`.
    ///
    /// Any time still pending from earlier calls is held to `0.0..=0.1` s first, so
    /// a stale request cannot outweigh a fresh one for long.
    pub fn set_velocity_for_time_interval(&mut self, velocity: Vec3, time: f32) {
        if time <= 0.0 {
            return;
        }

        self.velocity_time_remaining = self.velocity_time_remaining.clamp(0.0, 0.1);

        self.walk_velocity = self.walk_velocity * self.velocity_time_remaining + velocity * time;
        self.velocity_time_remaining += time;
        self.walk_velocity /= self.velocity_time_remaining;

        self.normalized_walk_velocity = self.walk_velocity.try_normalize().unwrap_or(Vec3::ZERO);
    }

    /// Seconds of walk velocity not yet applied.
    pub fn velocity_time_remaining(&self) -> f32 {
        self.velocity_time_remaining
    }

    pub fn walk_velocity(&self) -> Vec3 {
        self.walk_velocity
    }

    // =========================================================================
    // Per-step update
    // =========================================================================

    fn pre_step(&mut self, world: &mut World) {
        self.current_position = self.position(world);

        let mut passes = 0;
        self.touching_contact = false;
        while self.recover_from_penetration(world) {
            self.touching_contact = true;
            passes += 1;
            if passes > MAX_RECOVERY_PASSES {
                break;
            }
        }

        self.target_position = self.current_position;
    }

    /// Moves the capsule part of the way out of everything it overlaps.
    ///
    /// # Returns
    ///
    /// Whether any penetration was found.
    fn recover_from_penetration(&mut self, world: &mut World) -> bool {
        let mut penetrated = false;
        let mut deepest = 0.0f32;

        for (_, contact) in world.contacts_with(self.ghost) {
            if contact.distance >= 0.0 {
                continue;
            }
            if contact.distance < deepest {
                deepest = contact.distance;
                self.touching_normal = contact.normal;
            }
            self.current_position += contact.normal * contact.distance * RECOVERY_RATE;
            penetrated = true;
        }

        world.set_object_pose(self.ghost, Pose::from_position(self.current_position));
        penetrated
    }

    fn player_step(&mut self, world: &mut World, dt: f32) {
        if self.velocity_time_remaining <= 0.0 {
            return;
        }

        let dt_moving = dt.min(self.velocity_time_remaining);
        self.velocity_time_remaining -= dt_moving;

        if self.vertical_step {
            self.step_up(world);
        }

        if dt_moving > 0.001 {
            self.step_forward_and_strafe(world, self.walk_velocity * dt_moving);
        }

        if self.vertical_step {
            self.step_down(world);
        }

        world.set_object_pose(self.ghost, Pose::from_position(self.current_position));

        let probe_start = CONVEX_MARGIN + MARGIN_FUDGE;
        let start = self.current_position + UP * probe_start;
        self.up_axis_collision = self
            .sweep(world, start, start + UP * PROBE_DISTANCE, 0.0, |_| true)
            .map(|hit| hit.hit.normal);

        let start = self.current_position - UP * probe_start;
        self.down_axis_collision = self
            .sweep(world, start, start - UP * PROBE_DISTANCE, 0.0, |_| true)
            .map(|hit| hit.hit.normal);

        trace!(
            position = ?self.current_position,
            grounded = self.down_axis_collision.is_some(),
            "character step"
        );
    }

    fn step_up(&mut self, world: &World) {
        self.target_position = self.current_position + UP * self.step_height;

        let start = self.current_position + UP * (CONVEX_MARGIN + MARGIN_FUDGE);
        match self.sweep(world, start, self.target_position, 0.0, |_| true) {
            Some(hit) => {
                let fraction = hit.hit.fraction;
                if hit.hit.normal.dot(UP) > 0.0 {
                    self.current_step_offset = self.step_height * fraction;
                }
                self.current_position = self.current_position.lerp(self.target_position, fraction);
            }
            None => {
                self.current_step_offset = self.step_height;
                self.current_position = self.target_position;
            }
        }
    }

    fn step_forward_and_strafe(&mut self, world: &World, walk_move: Vec3) {
        self.target_position = self.current_position + walk_move;

        if self.touching_contact && self.normalized_walk_velocity.dot(self.touching_normal) > 0.0 {
            self.update_target_position_based_on_collision(self.touching_normal);
        }

        let max_slope_cosine = self.max_slope_cosine;
        let mut fraction = 1.0f32;
        let mut iterations = MAX_SLIDE_ITERATIONS;

        while fraction > 0.01 && iterations > 0 {
            iterations -= 1;

            let motion = self.target_position - self.current_position;
            let hit = self.sweep(world, self.current_position, self.target_position, MARGIN_FUDGE, |hit| {
                hit.normal.dot(-motion) >= 0.0 && hit.normal.dot(UP) < max_slope_cosine
            });

            let Some(hit) = hit else {
                self.current_position = self.target_position;
                break;
            };

            fraction -= hit.hit.fraction;

            self.update_target_position_based_on_collision(hit.hit.normal);
            if hit.hit.normal.dot(self.normalized_walk_velocity) < -0.98 {
                break;
            }

            let current_direction = self.target_position - self.current_position;
            match current_direction.try_normalize() {
                Some(direction) if direction.dot(self.normalized_walk_velocity) > 0.0 => {}
                _ => break,
            }
        }
    }

    fn step_down(&mut self, world: &World) {
        let step_drop = UP * self.current_step_offset;
        self.target_position -= step_drop;

        let max_slope_cosine = self.max_slope_cosine;
        match self.sweep(world, self.current_position, self.target_position, 0.0, |hit| {
            hit.normal.dot(UP) >= max_slope_cosine
        }) {
            Some(hit) => {
                self.current_position = self.current_position.lerp(self.target_position, hit.hit.fraction);
            }
            None => self.current_position = self.target_position,
        }
    }

    /// Redirects the remaining movement along the plane of `hit_normal`.
    fn update_target_position_based_on_collision(&mut self, hit_normal: Vec3) {
        let movement = self.target_position - self.current_position;
        let movement_length = movement.length();
        let Some(movement_direction) = movement.try_normalize() else {
            return;
        };

        let reflect = (movement_direction - 2.0 * movement_direction.dot(hit_normal) * hit_normal).normalize_or_zero();
        let perpendicular = reflect - hit_normal * reflect.dot(hit_normal);

        self.target_position = self.current_position + perpendicular * movement_length;
    }

    /// Sweeps the capsule from `from` to `to`, skipping the ghost itself and any
    /// hit rejected by `accept`.
    fn sweep(
        &self,
        world: &World,
        from: Vec3,
        to: Vec3,
        extra_radius: f32,
        mut accept: impl FnMut(&SweepHit) -> bool,
    ) -> Option<WorldSweepHit> {
        let cast = CapsuleCast {
            from,
            to,
            radius: self.radius + extra_radius,
            half_height: self.half_height,
            filter: self.filter,
        };
        let ghost = self.ghost;
        world.sweep_capsule(&cast, |key, hit| key != ghost && accept(hit))
    }
}

impl SceneController for KinematicCharacterController {
    fn remove_from(&self, world: &mut World) {
        world.remove_object(self.ghost);
    }
}

impl Action for KinematicCharacterController {
    fn update_action(&mut self, world: &mut World, dt: f32) {
        self.pre_step(world);
        self.player_step(world, dt);
    }
}
