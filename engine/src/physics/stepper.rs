//! Fixed-timestep accumulator
//!
//! Frame times vary, simulation ticks do not. [`FixedStepper`] collects frame time
//! and hands out whole substeps, carrying the remainder into the next call. Every
//! backend is driven through the same stepper by
//! [`PhysicsInterface::update`](super::PhysicsInterface::update).

/// Fraction of a substep treated as rounding noise when testing for a boundary.
const BOUNDARY_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct FixedStepper {
    substep: f32,
    max_substeps: u32,
    accumulated: f32,
    steps_taken: u64,
}

impl FixedStepper {
    pub fn new(substep: f32, max_substeps: u32) -> Self {
        Self {
            substep,
            max_substeps: max_substeps.max(1),
            accumulated: 0.0,
            steps_taken: 0,
        }
    }

    pub fn substep(&self) -> f32 {
        self.substep
    }

    pub fn max_substeps(&self) -> u32 {
        self.max_substeps
    }

    /// Time collected but not yet simulated.
    pub fn accumulated(&self) -> f32 {
        self.accumulated
    }

    /// Total substeps handed out since creation or the last reset.
    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    /// Adds `time` seconds and returns how many substeps should run now.
    ///
    /// When more than `max_substeps` are due, the extra whole substeps are dropped
    /// so a long stall cannot snowball into ever longer updates.
    pub fn advance(&mut self, time: f32) -> u32 {
        if !(time > 0.0) || !(self.substep > 0.0) {
            return 0;
        }

        self.accumulated += time;

        let due = ((self.accumulated + self.substep * BOUNDARY_EPSILON) / self.substep).floor();
        if due < 1.0 {
            return 0;
        }

        let steps = (due as u32).min(self.max_substeps);
        self.accumulated = (self.accumulated - due * self.substep).max(0.0);
        self.steps_taken += u64::from(steps);

        steps
    }

    pub fn reset(&mut self) {
        self.accumulated = 0.0;
        self.steps_taken = 0;
    }
}
