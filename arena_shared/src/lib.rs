//! `arena_shared`
//!
//! Libraries shared by the arena client and its test harness.
//!
//! Design goals:
//! - Explicit logical protocol (type string + JSON payload) independent of
//!   the byte framing underneath.
//! - Traits at the transport seam so the client core can run against a mock.
//! - No `unsafe`.

pub mod config;
pub mod entity;
pub mod math;
pub mod net;
pub mod protocol;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::entity::*;
    pub use crate::math::*;
    pub use crate::net::{Dialer, Transport};
    pub use crate::protocol::*;
}
