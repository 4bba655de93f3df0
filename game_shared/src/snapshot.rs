//! Snapshot items.
//!
//! A snapshot is an ordered list of items: an optional tuning record, world
//! entities, the controller summary, the events visible to the viewer and
//! one info item per connected player.

use serde::{Deserialize, Serialize};

use crate::{
    event::GameEvent,
    net::ClientId,
    protocol::{Emote, Team},
    tuning::TuningParams,
};

/// Upper bound on items in one snapshot.
pub const MAX_SNAP_ITEMS: usize = 1024;

bitflags::bitflags! {
    /// Controller state flags carried in the game summary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GameStateFlags: u32 {
        const WARMUP = 1 << 0;
        const PAUSED = 1 << 1;
        const ROUND_OVER = 1 << 2;
        const GAME_OVER = 1 << 3;
        const TEAMPLAY = 1 << 4;
    }
}

/// One snapshot item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapItem {
    /// Non-default tuning, only in the recording view.
    Tuning(TuningParams),
    Character {
        client_id: ClientId,
        x: i32,
        y: i32,
        vel_x: i32,
        vel_y: i32,
        frozen: bool,
        emote: Emote,
        triggered: u32,
    },
    Projectile {
        id: u64,
        x: i32,
        y: i32,
        vel_x: i32,
        vel_y: i32,
        weapon: i32,
        start_tick: u64,
    },
    LaserText {
        id: u64,
        x: i32,
        y: i32,
        points: i32,
    },
    GameData {
        flags: GameStateFlags,
        round_start_tick: u64,
        state_end_tick: Option<u64>,
        score_red: i32,
        score_blue: i32,
    },
    Event(GameEvent),
    PlayerInfo {
        client_id: ClientId,
        local: bool,
        team: Team,
        score: i32,
        ready: bool,
    },
}

/// Per-client view of one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    /// Viewer; `None` is the shared recording view.
    pub viewer: Option<ClientId>,
    pub items: Vec<SnapItem>,
}
