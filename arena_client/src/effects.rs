//! Hit feedback: ghost HP bars and hit flash.
//!
//! Each unit and base carries an [`HpFx`] derived from the sequence of
//! authoritative HP values it has shown. The damage ghost lags behind HP going
//! down and the heal ghost lags behind HP going up; both close their gap
//! within a fixed duration of simulation time, independent of how often the
//! server reports HP or how fast frames arrive.
//!
//! Invariants, for every observation:
//! - `ghost_hp >= current_hp` and `heal_ghost_hp <= current_hp`
//! - neither ghost ever moves away from `current_hp`
//! - an HP jump in the opposite direction resets the affected ghost instantly

use std::collections::HashMap;

use arena_shared::{
    config::EffectTuning,
    entity::{BaseId, UnitId},
};

use crate::world::WorldModel;

/// Gaps below this are considered closed.
const CONVERGED_EPSILON: f32 = 1e-3;

/// Which entity an effect belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FxKey {
    Unit(UnitId),
    Base(BaseId),
}

/// Ghost-bar state for one entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HpFx {
    /// Still-draining damage indicator.
    pub ghost_hp: f32,
    /// Still-rising heal indicator.
    pub heal_ghost_hp: f32,
    last_hp: i32,
    last_update_ms: u64,
    drain_rate: f32,
    rise_rate: f32,
    flash_ms: f32,
}

impl HpFx {
    pub fn new(current_hp: i32, now_ms: u64) -> Self {
        let hp = current_hp as f32;
        Self {
            ghost_hp: hp,
            heal_ghost_hp: hp,
            last_hp: current_hp,
            last_update_ms: now_ms,
            drain_rate: 0.0,
            rise_rate: 0.0,
            flash_ms: 0.0,
        }
    }

    /// Folds one authoritative HP observation at simulation time `now_ms`.
    pub fn step(self, current_hp: i32, now_ms: u64, tuning: &EffectTuning) -> Self {
        let cur = current_hp as f32;
        let dt = now_ms.saturating_sub(self.last_update_ms) as f32;
        let mut fx = self;
        fx.last_update_ms = now_ms.max(self.last_update_ms);

        if current_hp < self.last_hp {
            fx.heal_ghost_hp = cur;
            fx.rise_rate = 0.0;
            fx.drain_rate = ((fx.ghost_hp - cur) / tuning.drain_ms.max(1.0)).max(tuning.min_rate);
            fx.flash_ms = tuning.flash_ms;
        } else if current_hp > self.last_hp {
            fx.ghost_hp = cur;
            fx.drain_rate = 0.0;
            fx.rise_rate = ((cur - fx.heal_ghost_hp) / tuning.rise_ms.max(1.0)).max(tuning.min_rate);
        }
        fx.last_hp = current_hp;

        fx.ghost_hp = (fx.ghost_hp - fx.drain_rate * dt).max(cur);
        if fx.ghost_hp - cur < CONVERGED_EPSILON {
            fx.ghost_hp = cur;
        }
        fx.heal_ghost_hp = (fx.heal_ghost_hp + fx.rise_rate * dt).min(cur);
        if cur - fx.heal_ghost_hp < CONVERGED_EPSILON {
            fx.heal_ghost_hp = cur;
        }
        fx.flash_ms = (fx.flash_ms - dt).max(0.0);
        fx
    }

    pub fn is_converged(&self) -> bool {
        let cur = self.last_hp as f32;
        self.ghost_hp == cur && self.heal_ghost_hp == cur
    }

    /// True while the flash timer runs and there is still a damage gap.
    pub fn is_flashing(&self) -> bool {
        self.flash_ms > 0.0 && self.ghost_hp > self.last_hp as f32
    }

    /// Blink phase of the hit flash.
    pub fn blink_visible(&self, tuning: &EffectTuning) -> bool {
        if !self.is_flashing() {
            return false;
        }
        let phase = (self.flash_ms / tuning.blink_period_ms.max(1.0)) as u32;
        phase % 2 == 0
    }
}

/// Per-entity ghost-bar bookkeeping for the active match.
#[derive(Debug, Default)]
pub struct EffectTracker {
    tuning: EffectTuning,
    entries: HashMap<FxKey, HpFx>,
}

impl EffectTracker {
    pub fn new(tuning: EffectTuning) -> Self {
        Self {
            tuning,
            entries: HashMap::new(),
        }
    }

    pub fn tuning(&self) -> &EffectTuning {
        &self.tuning
    }

    /// Records an HP observation, creating the entry on first sight.
    pub fn observe(&mut self, key: FxKey, current_hp: i32, now_ms: u64) -> HpFx {
        let tuning = &self.tuning;
        let fx = match self.entries.get(&key) {
            Some(prev) => prev.step(current_hp, now_ms, tuning),
            None => HpFx::new(current_hp, now_ms),
        };
        self.entries.insert(key, fx);
        fx
    }

    /// Observes every unit and base in the world and forgets entities that
    /// are gone. Called once per fixed step.
    pub fn sync_world(&mut self, world: &WorldModel, now_ms: u64) {
        for (id, unit) in world.units() {
            self.observe(FxKey::Unit(*id), unit.hp, now_ms);
        }
        for (id, base) in world.bases() {
            self.observe(FxKey::Base(*id), base.hp, now_ms);
        }
        self.entries.retain(|key, _| match key {
            FxKey::Unit(id) => world.units().contains_key(id),
            FxKey::Base(id) => world.bases().contains_key(id),
        });
    }

    pub fn get(&self, key: FxKey) -> Option<&HpFx> {
        self.entries.get(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
