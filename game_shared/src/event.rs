//! World events.
//!
//! Events live for exactly one tick: they are created during simulation,
//! copied into every snapshot whose viewer is in the event's recipient mask,
//! and cleared after the snapshot cycle.

use serde::{Deserialize, Serialize};

use crate::net::ClientId;

/// Maximum events buffered per tick.
pub const MAX_EVENTS: usize = 128;

/// Sound ids referenced by the server.
pub mod sound {
    pub const PLAYER_SPAWN: i32 = 0;
    pub const PLAYER_DIE: i32 = 1;
    pub const HIT: i32 = 2;
    pub const GRENADE_EXPLODE: i32 = 3;
    pub const HAMMER_HIT: i32 = 4;
    pub const TEAM_SCORE: i32 = 5;
}

/// Bitmask of recipient clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientMask(pub u64);

impl ClientMask {
    pub const ALL: ClientMask = ClientMask(u64::MAX);
    pub const NONE: ClientMask = ClientMask(0);

    pub fn one(id: ClientId) -> ClientMask {
        ClientMask(1u64 << (id.0 & 63))
    }

    pub fn insert(&mut self, id: ClientId) {
        self.0 |= Self::one(id).0;
    }

    pub fn contains(self, id: ClientId) -> bool {
        self.0 & Self::one(id).0 != 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Member ids in ascending order.
    pub fn iter(self) -> impl Iterator<Item = ClientId> {
        (0..64u32).filter(move |i| self.0 & (1u64 << i) != 0).map(ClientId)
    }
}

/// One-tick world event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    Sound {
        x: i32,
        y: i32,
        sound: i32,
    },
    Damage {
        x: i32,
        y: i32,
        angle: i32,
        amount: i32,
        from: Option<ClientId>,
    },
    HammerHit {
        x: i32,
        y: i32,
    },
    Explosion {
        x: i32,
        y: i32,
    },
    Spawn {
        x: i32,
        y: i32,
    },
    Death {
        x: i32,
        y: i32,
        client_id: ClientId,
    },
}

/// Bounded per-tick event buffer.
#[derive(Debug)]
pub struct EventQueue {
    events: Vec<(GameEvent, ClientMask)>,
    dropped: u64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self {
            events: Vec::with_capacity(MAX_EVENTS),
            dropped: 0,
        }
    }
}

impl EventQueue {
    /// Queues an event. Returns `false` when the buffer is full.
    pub fn create(&mut self, event: GameEvent, mask: ClientMask) -> bool {
        if self.events.len() >= MAX_EVENTS {
            self.dropped += 1;
            return false;
        }
        self.events.push((event, mask));
        true
    }

    /// Events visible to a viewer; `None` sees everything.
    pub fn visible_to(&self, viewer: Option<ClientId>) -> impl Iterator<Item = &GameEvent> {
        self.events
            .iter()
            .filter(move |(_, mask)| viewer.map_or(true, |id| mask.contains(id)))
            .map(|(event, _)| event)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events refused because the buffer was full, since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_filters_viewers() {
        let mut q = EventQueue::default();
        q.create(GameEvent::HammerHit { x: 0, y: 0 }, ClientMask::ALL);
        q.create(GameEvent::Spawn { x: 1, y: 1 }, ClientMask::one(ClientId(3)));

        assert_eq!(q.visible_to(Some(ClientId(3))).count(), 2);
        assert_eq!(q.visible_to(Some(ClientId(4))).count(), 1);
        assert_eq!(q.visible_to(None).count(), 2);
    }

    #[test]
    fn queue_is_bounded() {
        let mut q = EventQueue::default();
        for _ in 0..MAX_EVENTS {
            assert!(q.create(GameEvent::Explosion { x: 0, y: 0 }, ClientMask::ALL));
        }
        assert!(!q.create(GameEvent::Explosion { x: 0, y: 0 }, ClientMask::ALL));
        assert_eq!(q.dropped(), 1);
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn mask_iterates_members() {
        let mut mask = ClientMask::NONE;
        mask.insert(ClientId(5));
        mask.insert(ClientId(1));
        let ids: Vec<_> = mask.iter().collect();
        assert_eq!(ids, vec![ClientId(1), ClientId(5)]);
        assert_eq!(mask.count(), 2);
    }
}
