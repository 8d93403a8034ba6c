//! Presentation abstraction.
//!
//! The core does not depend on a graphics backend. Once per frame it hands a
//! read-only [`RenderFrame`] to a [`Presenter`]; what gets drawn from it is
//! the presenter's business.

use tracing::info;

use crate::{connection::ConnectionState, effects::EffectTracker, world::WorldModel};

/// Everything a presenter may read for one frame.
pub struct RenderFrame<'a> {
    pub world: &'a WorldModel,
    pub effects: &'a EffectTracker,
    pub connection: ConnectionState,
    pub status: &'a str,
    pub paused: bool,
}

pub trait Presenter {
    fn present(&mut self, frame: &RenderFrame<'_>);
}

/// Draws nothing. For headless runs and tests.
#[derive(Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&mut self, _frame: &RenderFrame<'_>) {}
}

/// Logs status changes and a periodic summary of the match.
pub struct LogPresenter {
    every: u64,
    frames: u64,
    last_status: String,
}

impl LogPresenter {
    /// Summarizes the match once every `every` frames.
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            frames: 0,
            last_status: String::new(),
        }
    }
}

impl Presenter for LogPresenter {
    fn present(&mut self, frame: &RenderFrame<'_>) {
        self.frames += 1;
        if frame.status != self.last_status {
            info!(connection = %frame.connection, status = %frame.status, "Status");
            self.last_status = frame.status.to_string();
        }

        let world = frame.world;
        let Some(room) = world.room_id() else {
            return;
        };
        if self.frames % self.every != 0 {
            return;
        }
        let view = world.match_view();
        info!(
            room,
            units = world.visible_units().count(),
            spawning = world.spawn_animations().values().filter(|a| a.active).count(),
            bases = world.bases().len(),
            projectiles = world.projectiles().len(),
            ghosts = frame.effects.len(),
            pvp = view.is_pvp,
            mirrored = view.mirrored,
            paused = frame.paused,
            winner = world.winner().map(|w| w.as_str()).unwrap_or("-"),
            "Frame"
        );
    }
}
