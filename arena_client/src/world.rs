//! World model.
//!
//! Mirrors the authoritative match state and turns it into frame-smooth render
//! state. Every entity keeps its last authoritative values next to locally
//! owned smoothing state; the server's values are never edited, only chased.
//!
//! The model is replaced wholesale when a match ends. Nothing from one match
//! survives into the next.

use std::collections::{HashMap, HashSet};

use arena_shared::{
    config::WorldTuning,
    entity::{BaseId, PlayerId, ProjectileId, UnitId},
    math::Vec2,
    protocol::{BaseSnapshot, ProjectileState, RoomJoined, StateUpdate, UnitSpawned, UnitState},
};
use tracing::{debug, info};

use crate::interp::Smoothed;

/// A unit as the renderer sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderUnit {
    pub id: UnitId,
    pub name: String,
    pub class: String,
    pub owner: PlayerId,
    /// Last authoritative position.
    pub x: f32,
    pub y: f32,
    pub hp: i32,
    pub max_hp: i32,
    pub range: f32,
    pub motion: Smoothed,
}

impl RenderUnit {
    fn from_state(state: &UnitState) -> Self {
        Self {
            id: state.id,
            name: state.name.clone(),
            class: state.class.clone(),
            owner: state.owner.clone(),
            x: state.x,
            y: state.y,
            hp: state.hp,
            max_hp: state.max_hp,
            range: state.range,
            motion: Smoothed::new(Vec2::new(state.x, state.y)),
        }
    }

    /// Takes the mutable fields of a newer authoritative state. Class, name
    /// and owner are fixed for the unit's life.
    fn apply(&mut self, state: &UnitState) {
        if state.class != self.class || state.owner != self.owner {
            debug!(unit = %self.id, "Ignoring change to immutable unit fields");
        }
        self.x = state.x;
        self.y = state.y;
        self.hp = state.hp;
        self.max_hp = state.max_hp;
        self.range = state.range;
        self.motion.set_target(Vec2::new(state.x, state.y));
    }

    pub fn authoritative(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn rendered(&self) -> Vec2 {
        self.motion.rendered()
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }

    pub fn is_ranged(&self, tuning: &WorldTuning) -> bool {
        self.range >= tuning.ranged_min_range
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaseState {
    pub id: BaseId,
    pub owner: PlayerId,
    pub position: Vec2,
    pub size: Vec2,
    pub hp: i32,
    pub max_hp: i32,
}

impl BaseState {
    fn from_snapshot(snap: &BaseSnapshot) -> Self {
        Self {
            id: snap.id,
            owner: snap.owner.clone(),
            position: Vec2::new(snap.x, snap.y),
            size: Vec2::new(snap.w, snap.h),
            hp: snap.hp,
            max_hp: snap.max_hp,
        }
    }

    pub fn center(&self) -> Vec2 {
        self.position + self.size * 0.5
    }
}

/// Where a projectile came from; doubles as its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectileKey {
    /// Streamed by the server.
    Server(ProjectileId),
    /// Derived locally from a ranged unit that is engaging.
    Inferred(UnitId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub position: Vec2,
    pub target: Vec2,
    pub kind: String,
    pub active: bool,
}

impl Projectile {
    fn new(position: Vec2, target: Vec2, kind: String) -> Self {
        Self {
            position,
            target,
            kind,
            active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnAnimation {
    pub start: Vec2,
    pub target: Vec2,
    /// In `0.0..=1.0`.
    pub progress: f32,
    pub scale: f32,
    pub active: bool,
}

impl SpawnAnimation {
    pub fn position(&self) -> Vec2 {
        self.start.lerp(self.target, self.progress)
    }
}

/// Orientation hints derived from the bases. See [`WorldModel::match_view`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchView {
    pub is_pvp: bool,
    pub mirrored: bool,
}

/// Aggregate owner of all entities of the active match.
#[derive(Debug, Clone)]
pub struct WorldModel {
    tuning: WorldTuning,
    room_id: Option<String>,
    local_player: Option<PlayerId>,
    winner: Option<PlayerId>,
    units: HashMap<UnitId, RenderUnit>,
    bases: HashMap<BaseId, BaseState>,
    projectiles: HashMap<ProjectileKey, Projectile>,
    spawn_animations: HashMap<UnitId, SpawnAnimation>,
    /// Set once the server streams any projectile; disables inference.
    server_projectiles: bool,
    /// Server projectiles that already landed locally this match.
    retired_projectiles: HashSet<ProjectileId>,
}

impl WorldModel {
    pub fn new(tuning: WorldTuning) -> Self {
        Self {
            tuning,
            room_id: None,
            local_player: None,
            winner: None,
            units: HashMap::new(),
            bases: HashMap::new(),
            projectiles: HashMap::new(),
            spawn_animations: HashMap::new(),
            server_projectiles: false,
            retired_projectiles: HashSet::new(),
        }
    }

    /// Drops the whole match and starts from fresh, empty maps.
    pub fn reset(&mut self) {
        if self.room_id.is_some() || !self.units.is_empty() {
            info!(
                room = self.room_id.as_deref().unwrap_or("-"),
                units = self.units.len(),
                "World reset"
            );
        }
        *self = Self::new(self.tuning.clone());
    }

    pub fn enter_room(&mut self, joined: &RoomJoined) {
        self.reset();
        info!(room = %joined.room_id, player = %joined.player_id, "Entered room");
        self.room_id = Some(joined.room_id.clone());
        self.local_player = Some(joined.player_id.clone());
    }

    pub fn apply_state(&mut self, update: &StateUpdate) {
        for unit in &update.units {
            self.upsert_unit(unit);
        }
        for base in &update.bases {
            self.upsert_base(base);
        }
        if let Some(projectiles) = &update.projectiles {
            self.server_projectiles = true;
            for projectile in projectiles {
                self.apply_projectile(projectile);
            }
        }
        for id in &update.removed {
            self.remove_unit(*id);
        }
    }

    /// Creates or updates a unit. Returns true if it was new.
    pub fn upsert_unit(&mut self, state: &UnitState) -> bool {
        match self.units.get_mut(&state.id) {
            Some(unit) => {
                unit.apply(state);
                false
            }
            None => {
                debug!(unit = %state.id, class = %state.class, owner = %state.owner, "Unit created");
                self.units.insert(state.id, RenderUnit::from_state(state));
                true
            }
        }
    }

    /// A deployed unit: tracked immediately, but hidden behind a spawn
    /// animation that flies in from the deploy point.
    pub fn spawn_unit(&mut self, spawned: &UnitSpawned) {
        self.upsert_unit(&spawned.unit);
        let target = Vec2::new(spawned.unit.x, spawned.unit.y);
        self.spawn_animations.insert(
            spawned.unit.id,
            SpawnAnimation {
                start: Vec2::new(spawned.from_x, spawned.from_y),
                target,
                progress: 0.0,
                scale: self.tuning.spawn_start_scale,
                active: true,
            },
        );
    }

    pub fn remove_unit(&mut self, id: UnitId) -> Option<RenderUnit> {
        self.spawn_animations.remove(&id);
        self.projectiles.remove(&ProjectileKey::Inferred(id));
        let removed = self.units.remove(&id);
        if removed.is_some() {
            debug!(unit = %id, "Unit removed");
        }
        removed
    }

    pub fn upsert_base(&mut self, snap: &BaseSnapshot) {
        match self.bases.get_mut(&snap.id) {
            Some(base) => {
                base.position = Vec2::new(snap.x, snap.y);
                base.size = Vec2::new(snap.w, snap.h);
                base.hp = snap.hp;
                base.max_hp = snap.max_hp;
            }
            None => {
                self.bases.insert(snap.id, BaseState::from_snapshot(snap));
            }
        }
    }

    pub fn apply_projectile(&mut self, state: &ProjectileState) {
        self.server_projectiles = true;
        let key = ProjectileKey::Server(state.id);
        if !state.active {
            self.projectiles.remove(&key);
            self.retired_projectiles.insert(state.id);
            return;
        }
        if self.retired_projectiles.contains(&state.id) {
            return;
        }
        let target = Vec2::new(state.tx, state.ty);
        self.projectiles
            .entry(key)
            .and_modify(|p| p.target = target)
            .or_insert_with(|| {
                Projectile::new(Vec2::new(state.x, state.y), target, state.kind.clone())
            });
    }

    pub fn set_winner(&mut self, winner: PlayerId) {
        info!(winner = %winner, "Match over");
        self.winner = Some(winner);
    }

    /// True while a spawn animation stands in for the unit.
    pub fn is_suppressed(&self, id: UnitId) -> bool {
        self.spawn_animations.get(&id).is_some_and(|a| a.active)
    }

    /// Units that take part in normal rendering and interpolation.
    pub fn visible_units(&self) -> impl Iterator<Item = &RenderUnit> {
        self.units.values().filter(|u| !self.is_suppressed(u.id))
    }

    /// Advances all time-driven state by one fixed step of `dt_secs`.
    pub fn step(&mut self, dt_secs: f32) {
        self.step_spawn_animations(dt_secs);

        let (fraction, eps) = (self.tuning.lerp_fraction, self.tuning.snap_epsilon);
        let animations = &self.spawn_animations;
        for unit in self.units.values_mut() {
            if !animations.get(&unit.id).is_some_and(|a| a.active) {
                unit.motion.step(fraction, eps);
            }
        }

        if !self.server_projectiles {
            self.infer_projectiles();
        }
        self.step_projectiles(dt_secs);
    }

    fn step_spawn_animations(&mut self, dt_secs: f32) {
        let advance = dt_secs * 1000.0 / self.tuning.spawn_anim_ms.max(1.0);
        let start_scale = self.tuning.spawn_start_scale;
        for anim in self.spawn_animations.values_mut() {
            if !anim.active {
                continue;
            }
            anim.progress = (anim.progress + advance).min(1.0);
            anim.scale = start_scale + (1.0 - start_scale) * anim.progress;
            if anim.progress >= 1.0 {
                anim.active = false;
            }
        }

        let units = &mut self.units;
        self.spawn_animations.retain(|id, anim| {
            if anim.active {
                return true;
            }
            if let Some(unit) = units.get_mut(id) {
                unit.motion.place(anim.target);
            }
            false
        });
    }

    fn infer_projectiles(&mut self) {
        let mut plans = Vec::new();
        for unit in self.units.values() {
            if !unit.is_alive() || !unit.is_ranged(&self.tuning) || self.is_suppressed(unit.id) {
                plans.push((unit.id, None));
                continue;
            }
            let from = unit.rendered();
            let target = self.nearest_target(unit);
            let dist = from.distance(target);
            let engaging = dist <= unit.range && dist > self.tuning.min_projectile_distance;
            plans.push((unit.id, engaging.then(|| (from, target, unit.class.clone()))));
        }

        for (id, plan) in plans {
            let key = ProjectileKey::Inferred(id);
            match plan {
                Some((from, target, kind)) => {
                    self.projectiles
                        .entry(key)
                        .and_modify(|p| p.target = target)
                        .or_insert_with(|| Projectile::new(from, target, kind));
                }
                None => {
                    self.projectiles.remove(&key);
                }
            }
        }

        let units = &self.units;
        self.projectiles.retain(|key, _| match key {
            ProjectileKey::Inferred(id) => units.contains_key(id),
            ProjectileKey::Server(_) => true,
        });
    }

    fn step_projectiles(&mut self, dt_secs: f32) {
        let travel = self.tuning.projectile_speed * dt_secs;
        for projectile in self.projectiles.values_mut() {
            if !projectile.active {
                continue;
            }
            projectile.position = projectile.position.move_towards(projectile.target, travel);
            if projectile.position == projectile.target {
                projectile.active = false;
            }
        }
        let retired = &mut self.retired_projectiles;
        self.projectiles.retain(|key, p| {
            if !p.active {
                if let ProjectileKey::Server(id) = key {
                    retired.insert(*id);
                }
            }
            p.active
        });
    }

    /// Nearest living, fully spawned enemy unit, else the nearest enemy base
    /// centre, else the arena centre.
    pub fn nearest_target(&self, shooter: &RenderUnit) -> Vec2 {
        let from = shooter.rendered();
        let nearest_unit = self
            .units
            .values()
            .filter(|u| u.owner != shooter.owner && u.is_alive() && !self.is_suppressed(u.id))
            .map(|u| u.rendered())
            .min_by(|a, b| from.distance_sq(*a).total_cmp(&from.distance_sq(*b)));
        if let Some(pos) = nearest_unit {
            return pos;
        }

        self.bases
            .values()
            .filter(|b| b.owner != shooter.owner)
            .map(BaseState::center)
            .min_by(|a, b| from.distance_sq(*a).total_cmp(&from.distance_sq(*b)))
            .unwrap_or_else(|| self.tuning.arena_center())
    }

    /// PvP and view mirroring are not flagged by the server; they are inferred
    /// from exactly one base per owner across two owners, plus a `pvp` marker
    /// in the room id. The local player is mirrored when their base sits in
    /// the top half.
    pub fn match_view(&self) -> MatchView {
        let mut owners: Vec<&PlayerId> = self.bases.values().map(|b| &b.owner).collect();
        owners.sort();
        owners.dedup();
        let one_each = self.bases.len() == 2 && owners.len() == 2;
        let room_pvp = self
            .room_id
            .as_deref()
            .is_some_and(|room| room.to_ascii_lowercase().contains("pvp"));
        let is_pvp = one_each && room_pvp;

        let mirrored = match (&self.local_player, is_pvp) {
            (Some(me), true) => {
                let mine = self.bases.values().find(|b| &b.owner == me);
                let theirs = self.bases.values().find(|b| &b.owner != me);
                matches!((mine, theirs), (Some(m), Some(t)) if m.center().y < t.center().y)
            }
            _ => false,
        };
        MatchView { is_pvp, mirrored }
    }

    pub fn tuning(&self) -> &WorldTuning {
        &self.tuning
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn local_player(&self) -> Option<&PlayerId> {
        self.local_player.as_ref()
    }

    pub fn winner(&self) -> Option<&PlayerId> {
        self.winner.as_ref()
    }

    pub fn units(&self) -> &HashMap<UnitId, RenderUnit> {
        &self.units
    }

    pub fn bases(&self) -> &HashMap<BaseId, BaseState> {
        &self.bases
    }

    pub fn projectiles(&self) -> &HashMap<ProjectileKey, Projectile> {
        &self.projectiles
    }

    pub fn spawn_animations(&self) -> &HashMap<UnitId, SpawnAnimation> {
        &self.spawn_animations
    }
}
