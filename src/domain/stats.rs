use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::item::RiverItem;
use super::{epoch, DOCUMENT_VERSION};

/// Server-wide counters (`serverStats.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerStats {
    pub version: u32,
    pub aggregator: String,

    pub ct_starts: u64,
    pub ct_feed_reads: u64,
    pub ct_feed_reads_this_run: u64,
    pub ct_feed_reads_today: u64,
    pub ct_feed_reads_last_hour: u64,
    pub ct_stories_added: u64,
    pub ct_stories_added_this_run: u64,
    pub ct_stories_added_today: u64,
    pub ct_hits: u64,
    pub ct_hits_today: u64,
    pub ct_hits_this_run: u64,
    pub ct_list_folder_reads: u64,
    pub ct_rss_cloud_updates: u64,
    pub ct_rss_cloud_renews: u64,
    pub ct_river_json_saves: u64,
    pub ct_stats_saves: u64,
    pub ct_feed_stats_saves: u64,
    pub ct_local_storage_writes: u64,

    pub ct_secs_since_last_start: i64,
    pub ct_secs_since_last_feed_read: i64,

    pub when_first_start: DateTime<Utc>,
    pub when_last_start: DateTime<Utc>,
    pub when_last_feed_read: DateTime<Utc>,
    pub when_last_story_added: DateTime<Utc>,
    pub when_last_list_folder_read: DateTime<Utc>,
    pub when_last_rss_cloud_update: DateTime<Utc>,
    pub when_last_rss_cloud_renew: DateTime<Utc>,
    pub when_last_river_json_save: DateTime<Utc>,
    pub when_last_stats_save: DateTime<Utc>,
    pub when_last_feed_stats_save: DateTime<Utc>,
    pub when_last_local_storage_write: DateTime<Utc>,
    /// Day the "today" counters cover.
    pub when_day_started: DateTime<Utc>,

    pub last_feed_read: String,
    pub url_feed_last_cloud_update: String,
    /// Source of the process-wide item ids.
    pub serialnum: u64,
    pub list_names: Vec<String>,
    /// Lists whose river needs a rebuild, in order of first change.
    pub lists_that_changed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_story_added: Option<RiverItem>,
}

impl Default for ServerStats {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            version: DOCUMENT_VERSION,
            aggregator: String::new(),
            ct_starts: 0,
            ct_feed_reads: 0,
            ct_feed_reads_this_run: 0,
            ct_feed_reads_today: 0,
            ct_feed_reads_last_hour: 0,
            ct_stories_added: 0,
            ct_stories_added_this_run: 0,
            ct_stories_added_today: 0,
            ct_hits: 0,
            ct_hits_today: 0,
            ct_hits_this_run: 0,
            ct_list_folder_reads: 0,
            ct_rss_cloud_updates: 0,
            ct_rss_cloud_renews: 0,
            ct_river_json_saves: 0,
            ct_stats_saves: 0,
            ct_feed_stats_saves: 0,
            ct_local_storage_writes: 0,
            ct_secs_since_last_start: 0,
            ct_secs_since_last_feed_read: 0,
            when_first_start: now,
            when_last_start: epoch(),
            when_last_feed_read: epoch(),
            when_last_story_added: epoch(),
            when_last_list_folder_read: epoch(),
            when_last_rss_cloud_update: epoch(),
            when_last_rss_cloud_renew: epoch(),
            when_last_river_json_save: epoch(),
            when_last_stats_save: epoch(),
            when_last_feed_stats_save: epoch(),
            when_last_local_storage_write: epoch(),
            when_day_started: now,
            last_feed_read: String::new(),
            url_feed_last_cloud_update: String::new(),
            serialnum: 0,
            list_names: Vec::new(),
            lists_that_changed: Vec::new(),
            last_story_added: None,
        }
    }
}

impl ServerStats {
    /// Reset the per-run counters at process start.
    pub fn record_start(&mut self, aggregator: String, now: DateTime<Utc>) {
        self.version = DOCUMENT_VERSION;
        self.aggregator = aggregator;
        self.ct_starts += 1;
        self.when_last_start = now;
        self.ct_feed_reads_this_run = 0;
        self.ct_stories_added_this_run = 0;
        self.ct_hits_this_run = 0;
        self.ct_feed_reads_last_hour = 0;
    }

    pub fn next_serialnum(&mut self) -> u64 {
        let id = self.serialnum;
        self.serialnum += 1;
        id
    }

    pub fn record_feed_read(&mut self, url: &str, now: DateTime<Utc>) {
        self.ct_feed_reads += 1;
        self.ct_feed_reads_this_run += 1;
        self.ct_feed_reads_today += 1;
        self.ct_feed_reads_last_hour += 1;
        self.last_feed_read = url.to_string();
        self.when_last_feed_read = now;
    }

    pub fn record_story(&mut self, item: &RiverItem) {
        self.ct_stories_added += 1;
        self.ct_stories_added_this_run += 1;
        self.ct_stories_added_today += 1;
        self.when_last_story_added = item.when;
        self.last_story_added = Some(item.clone());
    }

    pub fn record_hit(&mut self) {
        self.ct_hits += 1;
        self.ct_hits_today += 1;
        self.ct_hits_this_run += 1;
    }

    /// Queue a list for rebuild unless it is already waiting.
    pub fn list_changed(&mut self, listname: &str) {
        if !self.lists_that_changed.iter().any(|l| l == listname) {
            self.lists_that_changed.push(listname.to_string());
        }
    }

    pub fn next_changed_list(&mut self) -> Option<String> {
        if self.lists_that_changed.is_empty() {
            None
        } else {
            Some(self.lists_that_changed.remove(0))
        }
    }

    /// Reset the "today" counters when the calendar day changed.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        if now.date_naive() == self.when_day_started.date_naive() {
            return false;
        }
        self.ct_hits_today = 0;
        self.ct_feed_reads_today = 0;
        self.ct_stories_added_today = 0;
        self.when_day_started = now;
        true
    }

    /// Reset the last-hour counter when the hour changed since `last_hour`.
    pub fn roll_hour(&mut self, now: DateTime<Utc>, last_hour: &mut Option<(i32, u32, u32)>) -> bool {
        let this_hour = (now.year(), now.ordinal(), now.hour());
        if *last_hour == Some(this_hour) {
            return false;
        }
        *last_hour = Some(this_hour);
        self.ct_feed_reads_last_hour = 0;
        true
    }

    pub fn refresh_ages(&mut self, now: DateTime<Utc>) {
        self.ct_secs_since_last_start = (now - self.when_last_start).num_seconds();
        self.ct_secs_since_last_feed_read = (now - self.when_last_feed_read).num_seconds();
    }
}

/// Scratch key/value document shared with hooks (`localStorage.json`).
#[derive(Debug, Clone, Default)]
pub struct LocalStorage {
    values: Map<String, Value>,
    last_saved_json: String,
}

impl LocalStorage {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let values: Map<String, Value> = serde_json::from_str(text)?;
        Ok(Self {
            values,
            last_saved_json: text.to_string(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Serialized text if it differs from what was last saved.
    pub fn take_if_changed(&mut self) -> Option<String> {
        let text = serde_json::to_string(&self.values).ok()?;
        if text == self.last_saved_json {
            return None;
        }
        self.last_saved_json = text.clone();
        Some(text)
    }
}
