use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{epoch, DOCUMENT_VERSION};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListPrefs {
    pub enabled: bool,
}

impl Default for ListPrefs {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListStats {
    pub ct_reads: u64,
    pub when_last_read: DateTime<Utc>,
    pub when_subscribed: DateTime<Utc>,
}

impl Default for ListStats {
    fn default() -> Self {
        Self {
            ct_reads: 0,
            when_last_read: epoch(),
            when_subscribed: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListInfo {
    pub title: String,
}

/// Per-list document (`lists/<name>/listInfo.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListRecord {
    pub version: u32,
    pub prefs: ListPrefs,
    pub stats: ListStats,
    pub list_info: ListInfo,
    /// Feed URLs subscribed by the list at its last load.
    pub feeds: Vec<String>,
}

impl ListRecord {
    pub fn normalize(&mut self) {
        self.version = DOCUMENT_VERSION;
    }

    /// Record a load of the list file and the feeds it named.
    pub fn record_read(&mut self, feeds: Vec<String>, now: DateTime<Utc>) {
        self.stats.ct_reads += 1;
        self.stats.when_last_read = now;
        self.feeds = feeds;
    }
}
