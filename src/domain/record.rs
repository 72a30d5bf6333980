use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::feed::HubDescriptor;
use super::{epoch, DOCUMENT_VERSION};

/// Default hub renewal interval stored in a feed's prefs (24 hours).
pub const DEFAULT_RENEW_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedPrefs {
    pub enabled: bool,
    pub url: String,
    pub ct_secs_betw_renews: u64,
}

impl Default for FeedPrefs {
    fn default() -> Self {
        Self {
            enabled: true,
            url: String::new(),
            ct_secs_betw_renews: DEFAULT_RENEW_SECS,
        }
    }
}

/// Channel-level metadata, last written by the newest accepted item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedInfo {
    pub title: String,
    pub link: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<HubDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedStats {
    pub ct_reads: u64,
    pub ct_read_errors: u64,
    pub ct_consecutive_read_errors: u64,
    pub ct_items: u64,
    pub ct_items_too_old: u64,
    pub ct_info_reads: u64,
    pub ct_info_writes: u64,
    pub item_serialnum: u64,
    pub ct_secs_last_read: f64,
    pub last_read_error: String,
    pub when_subscribed: DateTime<Utc>,
    pub when_last_read: DateTime<Utc>,
    pub when_last_new_item: DateTime<Utc>,
    pub when_last_too_old_item: DateTime<Utc>,
    pub when_last_read_error: DateTime<Utc>,
    pub when_last_info_read: DateTime<Utc>,
    pub when_last_info_write: DateTime<Utc>,
    pub most_recent_pub_date: DateTime<Utc>,
}

impl Default for FeedStats {
    fn default() -> Self {
        Self {
            ct_reads: 0,
            ct_read_errors: 0,
            ct_consecutive_read_errors: 0,
            ct_items: 0,
            ct_items_too_old: 0,
            ct_info_reads: 0,
            ct_info_writes: 0,
            item_serialnum: 0,
            ct_secs_last_read: 0.0,
            last_read_error: String::new(),
            when_subscribed: Utc::now(),
            when_last_read: epoch(),
            when_last_new_item: epoch(),
            when_last_too_old_item: epoch(),
            when_last_read_error: epoch(),
            when_last_info_read: epoch(),
            when_last_info_write: epoch(),
            most_recent_pub_date: epoch(),
        }
    }
}

/// One entry of a feed's history: an item seen in the feed's current window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryItem {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub when: DateTime<Utc>,
}

impl Default for HistoryItem {
    fn default() -> Self {
        Self {
            guid: String::new(),
            title: String::new(),
            link: String::new(),
            description: String::new(),
            when: epoch(),
        }
    }
}

/// Durable per-feed document (`feeds/<safe url>/feedInfo.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedRecord {
    pub version: u32,
    pub prefs: FeedPrefs,
    pub stats: FeedStats,
    pub feed_info: FeedInfo,
    pub history: Vec<HistoryItem>,
}

impl FeedRecord {
    pub fn new(url: &str) -> Self {
        let mut record = Self::default();
        record.normalize_for(url);
        record
    }

    /// Apply load-time defaults that depend on the feed URL.
    pub fn normalize_for(&mut self, url: &str) {
        self.version = DOCUMENT_VERSION;
        if self.prefs.url.is_empty() {
            self.prefs.url = url.to_string();
        }
    }

    pub fn has_guid(&self, guid: &str) -> bool {
        self.history.iter().any(|h| h.guid == guid)
    }

    pub fn is_first_read(&self) -> bool {
        self.stats.ct_reads == 0
    }
}
