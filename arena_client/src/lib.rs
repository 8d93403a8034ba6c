//! `arena_client`
//!
//! Client core of the arena game:
//! - Connection lifecycle with fixed-backoff retry and stale-result guarding
//! - In-order dispatch of server messages by type string
//! - World model with frame-smooth interpolation, spawn animations and
//!   projectile inference
//! - Ghost HP bars and hit flash driven by simulation time
//! - A pausable fixed-step simulation clock
//! - Session persistence and the presentation seam

pub mod client;
pub mod clock;
pub mod connection;
pub mod dispatch;
pub mod effects;
pub mod interp;
pub mod lobby;
pub mod render;
pub mod session;
pub mod world;

#[cfg(test)]
mod testing;

pub use client::{BootOutcome, GameClient, TickReport};
pub use connection::{ConnectEvent, ConnectionState};
