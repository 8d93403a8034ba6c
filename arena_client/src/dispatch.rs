//! Inbound message dispatch.
//!
//! Routes each envelope to the handler registered for its `type` string.
//! Messages are handled strictly in arrival order. Unknown types are counted
//! and dropped; a payload that fails to decode is logged and skipped without
//! touching the rest of the queue.

use std::collections::HashMap;

use anyhow::Context;
use arena_shared::{
    net::Transport,
    protocol::{
        inbound, Envelope, FriendList, GameOver, GuildInfo, MapList, MiniList, ProfileInfo,
        ProjectileState, RoomJoined, ServerError, StateUpdate, UnitRemoved, UnitSpawned,
    },
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::{clock::SimulationClock, effects::EffectTracker, lobby::LobbyState, world::WorldModel};

/// Mutable state a handler may touch.
pub struct DispatchContext<'a> {
    pub world: &'a mut WorldModel,
    pub effects: &'a mut EffectTracker,
    pub clock: &'a mut SimulationClock,
    pub lobby: &'a mut LobbyState,
}

pub type Handler = Box<dyn FnMut(&mut DispatchContext<'_>, Value) -> anyhow::Result<()> + Send>;

/// What happened to one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Handled,
    Ignored,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub handled: u64,
    pub ignored: u64,
    pub failed: u64,
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Handler>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// A dispatcher with no handlers; every message is ignored.
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher wired to the client's world, clock and lobby cache.
    pub fn with_default_handlers() -> Self {
        let mut d = Self::new();
        d.register(inbound::ROOM_JOINED, on_room_joined);
        d.register(inbound::STATE_UPDATE, on_state_update);
        d.register(inbound::UNIT_SPAWNED, on_unit_spawned);
        d.register(inbound::UNIT_REMOVED, on_unit_removed);
        d.register(inbound::PROJECTILE_SPAWNED, on_projectile_spawned);
        d.register(inbound::GAME_PAUSED, on_game_paused);
        d.register(inbound::GAME_RESUMED, on_game_resumed);
        d.register(inbound::GAME_OVER, on_game_over);
        d.register(inbound::LEFT_ROOM, on_left_room);
        d.register(inbound::PROFILE, on_profile);
        d.register(inbound::MINI_LIST, on_mini_list);
        d.register(inbound::MAP_LIST, on_map_list);
        d.register(inbound::GUILD_INFO, on_guild_info);
        d.register(inbound::FRIEND_LIST, on_friend_list);
        d.register(inbound::ERROR, on_server_error);
        d
    }

    /// Installs `handler` for `kind`, replacing any previous one.
    pub fn register<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: FnMut(&mut DispatchContext<'_>, Value) -> anyhow::Result<()> + Send + 'static,
    {
        self.handlers.insert(kind.into(), Box::new(handler));
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn dispatch(&mut self, envelope: Envelope, ctx: &mut DispatchContext<'_>) -> Dispatched {
        let Some(handler) = self.handlers.get_mut(&envelope.kind) else {
            debug!(kind = %envelope.kind, "No handler, ignoring");
            self.stats.ignored += 1;
            return Dispatched::Ignored;
        };
        match handler(ctx, envelope.payload) {
            Ok(()) => {
                self.stats.handled += 1;
                Dispatched::Handled
            }
            Err(e) => {
                warn!(kind = %envelope.kind, error = %format!("{e:#}"), "Dropping malformed message");
                self.stats.failed += 1;
                Dispatched::Failed
            }
        }
    }

    /// Dispatches everything currently queued on `source`, in order.
    /// Returns the number of envelopes consumed.
    pub fn drain_and_dispatch(
        &mut self,
        source: &mut dyn Transport,
        ctx: &mut DispatchContext<'_>,
    ) -> usize {
        let mut n = 0;
        while let Some(envelope) = source.try_recv() {
            self.dispatch(envelope, ctx);
            n += 1;
        }
        n
    }
}

fn decode<T: DeserializeOwned>(payload: Value) -> anyhow::Result<T> {
    serde_json::from_value(payload)
        .with_context(|| format!("decode {}", std::any::type_name::<T>()))
}

fn on_room_joined(ctx: &mut DispatchContext<'_>, payload: Value) -> anyhow::Result<()> {
    let joined: RoomJoined = decode(payload)?;
    ctx.world.enter_room(&joined);
    ctx.effects.clear();
    ctx.clock.resume();
    Ok(())
}

fn on_state_update(ctx: &mut DispatchContext<'_>, payload: Value) -> anyhow::Result<()> {
    let update: StateUpdate = decode(payload)?;
    trace!(
        units = update.units.len(),
        bases = update.bases.len(),
        removed = update.removed.len(),
        "State update"
    );
    ctx.world.apply_state(&update);
    Ok(())
}

fn on_unit_spawned(ctx: &mut DispatchContext<'_>, payload: Value) -> anyhow::Result<()> {
    let spawned: UnitSpawned = decode(payload)?;
    ctx.world.spawn_unit(&spawned);
    Ok(())
}

fn on_unit_removed(ctx: &mut DispatchContext<'_>, payload: Value) -> anyhow::Result<()> {
    let removed: UnitRemoved = decode(payload)?;
    ctx.world.remove_unit(removed.id);
    Ok(())
}

fn on_projectile_spawned(ctx: &mut DispatchContext<'_>, payload: Value) -> anyhow::Result<()> {
    let projectile: ProjectileState = decode(payload)?;
    ctx.world.apply_projectile(&projectile);
    Ok(())
}

fn on_game_paused(ctx: &mut DispatchContext<'_>, _payload: Value) -> anyhow::Result<()> {
    info!("Game paused");
    ctx.clock.pause();
    Ok(())
}

fn on_game_resumed(ctx: &mut DispatchContext<'_>, _payload: Value) -> anyhow::Result<()> {
    info!("Game resumed");
    ctx.clock.resume();
    Ok(())
}

fn on_game_over(ctx: &mut DispatchContext<'_>, payload: Value) -> anyhow::Result<()> {
    let over: GameOver = decode(payload)?;
    ctx.world.set_winner(over.winner);
    Ok(())
}

fn on_left_room(ctx: &mut DispatchContext<'_>, _payload: Value) -> anyhow::Result<()> {
    info!("Left room");
    ctx.world.reset();
    ctx.effects.clear();
    ctx.clock.resume();
    Ok(())
}

fn on_profile(ctx: &mut DispatchContext<'_>, payload: Value) -> anyhow::Result<()> {
    let profile: ProfileInfo = decode(payload)?;
    debug!(name = %profile.name, level = profile.level, "Profile received");
    ctx.lobby.profile = Some(profile);
    Ok(())
}

fn on_mini_list(ctx: &mut DispatchContext<'_>, payload: Value) -> anyhow::Result<()> {
    ctx.lobby.minis = decode::<MiniList>(payload)?.minis;
    Ok(())
}

fn on_map_list(ctx: &mut DispatchContext<'_>, payload: Value) -> anyhow::Result<()> {
    ctx.lobby.maps = decode::<MapList>(payload)?.maps;
    Ok(())
}

fn on_guild_info(ctx: &mut DispatchContext<'_>, payload: Value) -> anyhow::Result<()> {
    ctx.lobby.guild = Some(decode::<GuildInfo>(payload)?);
    Ok(())
}

fn on_friend_list(ctx: &mut DispatchContext<'_>, payload: Value) -> anyhow::Result<()> {
    ctx.lobby.friends = decode::<FriendList>(payload)?.friends;
    Ok(())
}

fn on_server_error(ctx: &mut DispatchContext<'_>, payload: Value) -> anyhow::Result<()> {
    let err: ServerError = decode(payload)?;
    warn!(message = %err.message, "Server reported error");
    ctx.lobby.last_error = Some(err.message);
    Ok(())
}
