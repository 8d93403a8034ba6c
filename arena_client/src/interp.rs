//! Interpolation.
//!
//! The server sends discrete authoritative positions. The client renders at a
//! fixed step and moves each rendered value a fraction of the remaining
//! distance toward its latest target, snapping onto it once close enough.
//! Motion never overshoots and settles exactly on the target.

use arena_shared::math::Vec2;

/// A position with an authoritative target and a smoothed rendered value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothed {
    rendered: Vec2,
    target: Vec2,
}

impl Smoothed {
    /// Starts settled at `at`; a newly seen entity does not slide in from the
    /// origin.
    pub fn new(at: Vec2) -> Self {
        Self {
            rendered: at,
            target: at,
        }
    }

    pub fn rendered(&self) -> Vec2 {
        self.rendered
    }

    pub fn set_target(&mut self, target: Vec2) {
        self.target = target;
    }

    /// Places the rendered value without touching the target.
    pub fn place(&mut self, at: Vec2) {
        self.rendered = at;
    }

    pub fn is_settled(&self) -> bool {
        self.rendered == self.target
    }

    /// One fixed step toward the target.
    pub fn step(&mut self, fraction: f32, snap_epsilon: f32) {
        if self.is_settled() {
            return;
        }
        let next = self.rendered.lerp(self.target, fraction);
        if next.distance_sq(self.target) <= snap_epsilon * snap_epsilon {
            self.rendered = self.target;
        } else {
            self.rendered = next;
        }
    }
}
