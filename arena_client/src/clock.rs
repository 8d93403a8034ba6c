//! Simulation clock.
//!
//! The single owner of the pause flag and the fixed-timestep accumulator.
//! Interpolation, spawn animations, projectile flight and ghost-bar decay all
//! advance only on the steps this clock yields, so pausing halts them together
//! and resuming picks up exactly where they stopped.

use std::time::Duration;

/// Frames longer than this many steps are truncated instead of replayed.
pub const MAX_STEPS_PER_FRAME: u32 = 5;

#[derive(Debug, Clone)]
pub struct SimulationClock {
    step: Duration,
    accumulator: Duration,
    paused: bool,
    steps: u64,
}

impl SimulationClock {
    pub fn new(step: Duration) -> Self {
        Self {
            step: step.max(Duration::from_micros(100)),
            accumulator: Duration::ZERO,
            paused: false,
            steps: 0,
        }
    }

    pub fn from_tick_hz(tick_hz: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / f64::from(tick_hz.max(1))))
    }

    /// Feeds one frame of wall time and returns how many fixed steps to run.
    ///
    /// While paused nothing accumulates, so no catch-up burst follows a resume.
    pub fn advance(&mut self, frame_dt: Duration) -> u32 {
        if self.paused {
            return 0;
        }
        self.accumulator += frame_dt;
        let mut due = 0;
        while self.accumulator >= self.step && due < MAX_STEPS_PER_FRAME {
            self.accumulator -= self.step;
            due += 1;
        }
        if due == MAX_STEPS_PER_FRAME && self.accumulator >= self.step {
            self.accumulator = Duration::ZERO;
        }
        self.steps += u64::from(due);
        due
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn step_secs(&self) -> f32 {
        self.step.as_secs_f32()
    }

    /// Total fixed steps taken.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Simulation time in milliseconds. Frozen while paused.
    pub fn now_ms(&self) -> u64 {
        self.ms_at(self.steps)
    }

    /// Simulation time in milliseconds after `step_index` steps.
    pub fn ms_at(&self, step_index: u64) -> u64 {
        (u128::from(step_index) * self.step.as_nanos() / 1_000_000) as u64
    }
}
