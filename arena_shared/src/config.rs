//! Configuration system.
//!
//! Loads client configuration from JSON strings/files. Every field has a
//! default so a partial file (or none at all) is valid.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Root configuration for the arena client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Game server address, e.g. `127.0.0.1:40000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Fixed simulation tick rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Fallback player name used when no session supplies one.
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Where the session token and username are persisted.
    #[serde(default = "default_session_path")]
    pub session_path: String,
    /// Fixed delay between a failed dial and the next automatic attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Stored sessions older than this are treated as expired.
    #[serde(default = "default_session_max_age_hours")]
    pub session_max_age_hours: i64,
    #[serde(default)]
    pub world: WorldTuning,
    #[serde(default)]
    pub effects: EffectTuning,
}

/// Smoothing and inference constants for the world model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldTuning {
    /// Fraction of the remaining distance covered per fixed step.
    pub lerp_fraction: f32,
    /// Rendered positions closer than this to their target snap onto it.
    pub snap_epsilon: f32,
    /// Duration of a spawn animation.
    pub spawn_anim_ms: f32,
    /// Scale multiplier a spawning unit starts at; grows to 1.
    pub spawn_start_scale: f32,
    /// Flight speed of projectiles, pixels per second.
    pub projectile_speed: f32,
    /// Units with an attack range at or above this count as ranged.
    pub ranged_min_range: f32,
    /// Targets closer than this never get an inferred projectile.
    pub min_projectile_distance: f32,
    /// Arena width in pixels.
    pub arena_width: f32,
    /// Arena height in pixels.
    pub arena_height: f32,
}

impl Default for WorldTuning {
    fn default() -> Self {
        Self {
            lerp_fraction: 0.2,
            snap_epsilon: 0.05,
            spawn_anim_ms: 400.0,
            spawn_start_scale: 0.3,
            projectile_speed: 420.0,
            ranged_min_range: 60.0,
            min_projectile_distance: 24.0,
            arena_width: 800.0,
            arena_height: 600.0,
        }
    }
}

impl WorldTuning {
    pub fn arena_center(&self) -> Vec2 {
        Vec2::new(self.arena_width * 0.5, self.arena_height * 0.5)
    }
}

/// Ghost-bar and hit-flash constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectTuning {
    /// A damage ghost closes its gap within this many milliseconds.
    pub drain_ms: f32,
    /// A heal ghost closes its gap within this many milliseconds.
    pub rise_ms: f32,
    /// Lower bound on convergence speed, HP per millisecond.
    pub min_rate: f32,
    /// How long the hit flash stays armed after damage.
    pub flash_ms: f32,
    /// Half period of the blink cue.
    pub blink_period_ms: f32,
}

impl Default for EffectTuning {
    fn default() -> Self {
        Self {
            drain_ms: 600.0,
            rise_ms: 450.0,
            min_rate: 0.01,
            flash_ms: 300.0,
            blink_period_ms: 60.0,
        }
    }
}

fn default_server_addr() -> String {
    "127.0.0.1:40000".to_string()
}

fn default_tick_hz() -> u32 {
    60
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_session_path() -> String {
    "session.json".to_string()
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_session_max_age_hours() -> i64 {
    24 * 30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_hz: default_tick_hz(),
            player_name: default_player_name(),
            session_path: default_session_path(),
            retry_backoff_ms: default_retry_backoff_ms(),
            session_max_age_hours: default_session_max_age_hours(),
            world: WorldTuning::default(),
            effects: EffectTuning::default(),
        }
    }
}

impl ClientConfig {
    /// Parses and validates config from JSON.
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Rejects values that would break retry pacing or smoothing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry_backoff_ms == 0 {
            anyhow::bail!("retry_backoff_ms must be positive");
        }
        if self.tick_hz == 0 {
            anyhow::bail!("tick_hz must be positive");
        }
        let w = &self.world;
        if w.lerp_fraction.is_nan() || w.lerp_fraction <= 0.0 || w.lerp_fraction > 1.0 {
            anyhow::bail!("world.lerp_fraction must be in (0, 1], got {}", w.lerp_fraction);
        }
        if w.snap_epsilon.is_nan() || w.snap_epsilon < 0.0 {
            anyhow::bail!("world.snap_epsilon must not be negative, got {}", w.snap_epsilon);
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Length of one fixed simulation step.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }
}
