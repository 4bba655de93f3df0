//! `game_shared`
//!
//! Shared libraries used by the game server and its clients.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (net, protocol, ecs, math, events, tuning).
//! - Validate every inbound message before it is interpreted.
//! - No `unsafe`.

pub mod chat;
pub mod config;
pub mod console;
pub mod ecs;
pub mod event;
pub mod math;
pub mod net;
pub mod protocol;
pub mod snapshot;
pub mod tuning;

/// Number of client slots.
pub const MAX_CLIENTS: usize = 64;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::ecs::*;
    pub use crate::event::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::protocol::*;
    pub use crate::snapshot::*;
    pub use crate::tuning::*;
    pub use crate::MAX_CLIENTS;
}
