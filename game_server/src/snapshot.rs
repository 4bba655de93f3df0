//! Per-viewer snapshot assembly.

use game_shared::{
    net::ClientId,
    snapshot::{SnapItem, Snapshot, MAX_SNAP_ITEMS},
};
use tracing::debug;

/// Collects items for one viewer. The item buffer is reused across viewers.
#[derive(Debug)]
pub struct SnapshotBuilder {
    viewer: Option<ClientId>,
    items: Vec<SnapItem>,
    dropped: u64,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self {
            viewer: None,
            items: Vec::with_capacity(MAX_SNAP_ITEMS),
            dropped: 0,
        }
    }
}

impl SnapshotBuilder {
    pub fn begin(&mut self, viewer: Option<ClientId>) {
        self.viewer = viewer;
        self.items.clear();
    }

    pub fn viewer(&self) -> Option<ClientId> {
        self.viewer
    }

    /// Adds an item. Returns `false` once the snapshot is full.
    pub fn add(&mut self, item: SnapItem) -> bool {
        if self.items.len() >= MAX_SNAP_ITEMS {
            self.dropped += 1;
            debug!(viewer = ?self.viewer, "snapshot full, item dropped");
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn items(&self) -> &[SnapItem] {
        &self.items
    }

    /// Items refused for lack of space, since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn finish(&self, tick: u64) -> Snapshot {
        Snapshot {
            tick,
            viewer: self.viewer,
            items: self.items.clone(),
        }
    }
}
