use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::domain::{FeedInfo, FeedRecord, HistoryItem};
use crate::normalizer::text::item_body;
use crate::normalizer::{ParsedFeed, ParsedItem};

/// Stable identity of an item within its feed.
///
/// The upstream guid when there is one; otherwise a SHA-256 of pubDate, link
/// and title; otherwise the empty string.
pub fn item_guid(item: &ParsedItem) -> String {
    fn usable(value: &Option<String>) -> Option<&str> {
        value.as_deref().filter(|v| *v != "null")
    }

    if let Some(guid) = usable(&item.guid) {
        return guid.to_string();
    }

    let mut seed = String::new();
    for part in [&item.raw_pub_date, &item.link, &item.title] {
        if let Some(s) = usable(part) {
            seed.push_str(s);
        }
    }
    if seed.is_empty() {
        return seed;
    }

    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hex::encode(hasher.finalize())
}

/// What one successful poll did to a feed's history.
#[derive(Debug, Default)]
pub struct PollOutcome<'a> {
    /// New items that belong in rivers, in feed order.
    pub accepted: Vec<&'a ParsedItem>,
    pub ct_new: usize,
    pub ct_too_old: usize,
    pub ct_pruned: usize,
}

#[derive(Debug, Clone)]
pub struct HistoryEngine {
    add_items_from_new_subs: bool,
    max_body_length: usize,
}

impl HistoryEngine {
    pub fn new(add_items_from_new_subs: bool, max_body_length: usize) -> Self {
        Self {
            add_items_from_new_subs,
            max_body_length,
        }
    }

    /// Count a read attempt. Returns true when this is the feed's first read.
    pub fn begin_read(&self, record: &mut FeedRecord, started: DateTime<Utc>) -> bool {
        let first_read = record.is_first_read();
        record.stats.ct_reads += 1;
        record.stats.when_last_read = started;
        first_read
    }

    /// Run a parsed feed through the history.
    pub fn apply_poll<'a>(
        &self,
        record: &mut FeedRecord,
        feed: &'a ParsedFeed,
        first_read: bool,
        started: DateTime<Utc>,
    ) -> PollOutcome<'a> {
        let (mut outcome, seen) = self.apply_items(record, feed, first_read, started);

        let before = record.history.len();
        record.history.retain(|h| seen.contains(&h.guid));
        outcome.ct_pruned = before - record.history.len();

        record.stats.ct_consecutive_read_errors = 0;
        record.stats.ct_secs_last_read = secs_since(started);
        outcome
    }

    /// Keep the items read before a parse error cut the feed short. Nothing
    /// is pruned since the rest of the feed was never seen.
    pub fn apply_partial<'a>(
        &self,
        record: &mut FeedRecord,
        feed: &'a ParsedFeed,
        first_read: bool,
        started: DateTime<Utc>,
    ) -> PollOutcome<'a> {
        self.apply_items(record, feed, first_read, started).0
    }

    fn apply_items<'a>(
        &self,
        record: &mut FeedRecord,
        feed: &'a ParsedFeed,
        first_read: bool,
        started: DateTime<Utc>,
    ) -> (PollOutcome<'a>, HashSet<String>) {
        let mut outcome = PollOutcome::default();
        let mut seen: HashSet<String> = HashSet::new();

        if let Some(cloud) = &feed.meta.cloud {
            record.feed_info.cloud = Some(cloud.clone());
        }

        for item in &feed.items {
            if let Some(pub_date) = item.pub_date {
                if pub_date > record.stats.most_recent_pub_date {
                    record.stats.most_recent_pub_date = pub_date;
                }
            }

            let guid = item_guid(item);
            seen.insert(guid.clone());
            if record.has_guid(&guid) {
                continue;
            }

            record.history.push(HistoryItem {
                guid,
                title: item.title.clone().unwrap_or_default(),
                link: item.link.clone().unwrap_or_default(),
                description: item_body(item.description.as_deref(), self.max_body_length),
                when: started,
            });
            record.stats.ct_items += 1;
            record.stats.when_last_new_item = started;
            outcome.ct_new += 1;

            record.feed_info = FeedInfo {
                title: feed.meta.title.clone(),
                link: feed.meta.link.clone(),
                description: feed.meta.description.clone(),
                cloud: record.feed_info.cloud.take(),
            };

            let add_to_river = if first_read {
                self.add_items_from_new_subs
            } else if self.is_too_old(record, item) {
                record.stats.ct_items_too_old += 1;
                record.stats.when_last_too_old_item = started;
                outcome.ct_too_old += 1;
                false
            } else {
                true
            };

            if add_to_river {
                outcome.accepted.push(item);
            }
        }
        (outcome, seen)
    }

    /// Record a failed fetch or parse. History is left alone.
    pub fn record_error(&self, record: &mut FeedRecord, message: &str, started: DateTime<Utc>) {
        record.stats.ct_read_errors += 1;
        record.stats.ct_consecutive_read_errors += 1;
        record.stats.when_last_read_error = started;
        record.stats.last_read_error = message.to_string();
        record.stats.ct_secs_last_read = secs_since(started);
    }

    fn is_too_old(&self, record: &FeedRecord, item: &ParsedItem) -> bool {
        match item.pub_date {
            Some(pub_date) => pub_date < record.stats.most_recent_pub_date - Duration::days(1),
            None => false,
        }
    }
}

fn secs_since(started: DateTime<Utc>) -> f64 {
    (Utc::now() - started).num_milliseconds() as f64 / 1000.0
}
