use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{epoch, RiverItem, DOCUMENT_VERSION};

/// A river's stored items and counters (`riverData.json` / `feedRiver.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RiverData {
    pub version: u32,
    /// Oldest first.
    pub items: Vec<RiverItem>,
    pub ct_items_added: u64,
    pub when_last_item_added: DateTime<Utc>,
    pub ct_saves: u64,
    pub when_last_save: DateTime<Utc>,
    pub ct_river_builds: u64,
    pub when_last_river_build: DateTime<Utc>,
    #[serde(skip)]
    pub dirty: bool,
}

impl Default for RiverData {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            items: Vec::new(),
            ct_items_added: 0,
            when_last_item_added: epoch(),
            ct_saves: 0,
            when_last_save: epoch(),
            ct_river_builds: 0,
            when_last_river_build: epoch(),
            dirty: false,
        }
    }
}

impl RiverData {
    pub fn normalize(&mut self) {
        self.version = DOCUMENT_VERSION;
    }

    /// Append an item, evicting the oldest beyond `max_items`.
    pub fn push(&mut self, item: RiverItem, max_items: usize, now: DateTime<Utc>) {
        self.items.push(item);
        if self.items.len() > max_items {
            let excess = self.items.len() - max_items;
            self.items.drain(..excess);
        }
        self.ct_items_added += 1;
        self.when_last_item_added = now;
        self.dirty = true;
    }

    pub fn record_build(&mut self, now: DateTime<Utc>) -> u64 {
        self.ct_river_builds += 1;
        self.when_last_river_build = now;
        self.dirty = true;
        self.ct_river_builds
    }

    pub fn record_save(&mut self, now: DateTime<Utc>) {
        self.dirty = false;
        self.ct_saves += 1;
        self.when_last_save = now;
    }
}
