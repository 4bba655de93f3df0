//! `game_server`
//!
//! Server side of the game:
//! - [`GameContext`]: players, world, game mode, votes and commands
//! - fixed-tick schedule and per-client snapshots
//! - admin console and chat slash commands
//! - [`GameServer`]: TCP front that feeds the context and flushes its outbox
//!
//! Game code never blocks. Everything it sends is queued in the
//! [`outbox`] and delivered by the server after the tick.

pub mod bans;
pub mod chat_commands;
pub mod command;
pub mod console;
pub mod context;
pub mod controller;
pub mod outbox;
pub mod player;
pub mod router;
pub mod server;
pub mod snapshot;
pub mod stats;
pub mod tick;
pub mod vote;
pub mod vote_options;
pub mod world;

pub use context::GameContext;
pub use server::GameServer;
