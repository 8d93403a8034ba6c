//! Math types.
//!
//! The arena is a flat 2D playfield, so only a small vector type is needed.
//! Kept deterministic: no SIMD, no unsafe.

use serde::{Deserialize, Serialize};

/// 2D vector in arena pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    pub fn distance(self, to: Self) -> f32 {
        (to - self).len()
    }

    pub fn distance_sq(self, to: Self) -> f32 {
        (to - self).len_sq()
    }

    /// Linear blend toward `to`; `t` is clamped to $[0,1]$ so the result never
    /// passes the destination.
    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(self.x + (to.x - self.x) * t, self.y + (to.y - self.y) * t)
    }

    /// Moves at most `max_step` toward `to`, landing exactly on it when close.
    pub fn move_towards(self, to: Self, max_step: f32) -> Self {
        let delta = to - self;
        let dist = delta.len();
        if dist <= max_step || dist <= f32::EPSILON {
            return to;
        }
        self + delta * (max_step / dist)
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}
