pub mod file;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::app::Result;
use crate::domain::{FeedRecord, ListRecord, ServerStats, DOCUMENT_VERSION};
use crate::river::RiverData;
use crate::subscriptions::SubscriptionTable;

pub use file::FileStore;

pub const SERVER_STATS_KEY: &str = "serverStats.json";
pub const FEEDS_STATS_KEY: &str = "feedsStats.json";
pub const FEEDS_IN_LISTS_KEY: &str = "feedsInLists.json";
pub const LOCAL_STORAGE_KEY: &str = "localStorage.json";

/// Key/value persistence of JSON documents. Keys are relative paths.
pub trait Store: Send + Sync {
    /// Returns `None` when nothing is stored under `key`.
    fn load_text(&self, key: &str) -> Result<Option<String>>;
    /// Writes `text`, creating intermediate folders.
    fn save_text(&self, key: &str, text: &str) -> Result<()>;
}

/// A persisted document: defaults for every missing field, plus a one-time
/// fixup applied right after loading.
pub trait Document: Serialize + DeserializeOwned + Default {
    fn normalize(&mut self) {}
}

impl Document for FeedRecord {
    fn normalize(&mut self) {
        self.version = DOCUMENT_VERSION;
    }
}

impl Document for ListRecord {
    fn normalize(&mut self) {
        ListRecord::normalize(self);
    }
}

impl Document for ServerStats {
    fn normalize(&mut self) {
        self.version = DOCUMENT_VERSION;
    }
}

impl Document for SubscriptionTable {}

impl Document for RiverData {
    fn normalize(&mut self) {
        RiverData::normalize(self);
    }
}

/// Parse stored text into a document. Missing or unreadable documents come
/// back as defaults; parse failures are logged.
pub fn parse_document<T: Document>(key: &str, text: Option<&str>) -> T {
    let mut doc = match text {
        None => T::default(),
        Some(text) => match serde_json::from_str::<T>(text) {
            Ok(doc) => doc,
            Err(e) => {
                error!(key, error = %e, "Failed to parse stored document, using defaults");
                T::default()
            }
        },
    };
    doc.normalize();
    doc
}

pub fn to_json<T: Serialize>(doc: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(doc)?)
}

/// Folder key for a feed: scheme stripped, path-hostile characters replaced.
pub fn feed_folder(url: &str) -> String {
    let s = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    let safe: String = s
        .chars()
        .map(|c| match c {
            '/' | '?' | ':' | '<' | '>' | '"' | '\\' | '|' | '*' => '_',
            c => c,
        })
        .collect();
    format!("feeds/{}/", safe)
}

pub fn feed_info_key(url: &str) -> String {
    format!("{}feedInfo.json", feed_folder(url))
}

pub fn feed_river_key(url: &str) -> String {
    format!("{}feedRiver.json", feed_folder(url))
}

pub fn feed_item_key(url: &str, serialnum: u64) -> String {
    format!("{}items/{:03}.json", feed_folder(url), serialnum)
}

/// List name with its file extension removed (`news.opml` → `news`).
pub fn list_stem(listname: &str) -> &str {
    match listname.rfind('.') {
        Some(ix) if ix > 0 => &listname[..ix],
        _ => listname,
    }
}

pub fn list_info_key(listname: &str) -> String {
    format!("lists/{}/listInfo.json", list_stem(listname))
}

pub fn list_river_key(listname: &str) -> String {
    format!("lists/{}/riverData.json", list_stem(listname))
}
