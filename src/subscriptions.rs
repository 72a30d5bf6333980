use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::FeedSubscription;

/// All known feeds in discovery order (`feedsStats.json`).
///
/// Feeds are never removed; a reload of the list folder only clears and
/// rebuilds each feed's list membership.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionTable {
    feeds: Vec<FeedSubscription>,
    #[serde(skip)]
    in_lists: BTreeMap<String, u32>,
    #[serde(skip)]
    changed: bool,
    #[serde(skip)]
    in_lists_changed: bool,
}

impl SubscriptionTable {
    pub fn from_feeds(feeds: Vec<FeedSubscription>) -> Self {
        Self {
            feeds,
            ..Default::default()
        }
    }

    pub fn feeds(&self) -> &[FeedSubscription] {
        &self.feeds
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    pub fn find(&self, url: &str) -> Option<&FeedSubscription> {
        self.feeds.iter().find(|f| f.matches_url(url))
    }

    /// Mutable access marks the table changed.
    pub fn find_mut(&mut self, url: &str) -> Option<&mut FeedSubscription> {
        let feed = self.feeds.iter_mut().find(|f| f.matches_url(url));
        if feed.is_some() {
            self.changed = true;
        }
        feed
    }

    pub fn feeds_mut(&mut self) -> &mut [FeedSubscription] {
        self.changed = true;
        &mut self.feeds
    }

    /// Add `listname` to the feed's lists, creating the feed if needed.
    /// Returns true when the feed was not known before.
    pub fn subscribe(&mut self, url: &str, listname: &str) -> bool {
        let url = url.trim();
        if url.is_empty() {
            return false;
        }

        *self.in_lists.entry(url.to_string()).or_insert(0) += 1;
        self.in_lists_changed = true;

        match self.feeds.iter_mut().find(|f| f.matches_url(url)) {
            Some(feed) => {
                if feed.lists.insert(listname.to_string()) {
                    self.changed = true;
                }
                false
            }
            None => {
                let mut feed = FeedSubscription::new(url.to_string());
                feed.lists.insert(listname.to_string());
                self.feeds.push(feed);
                self.changed = true;
                true
            }
        }
    }

    /// Forget all list memberships ahead of a full list-folder reload.
    pub fn clear_lists(&mut self) {
        for feed in &mut self.feeds {
            feed.lists.clear();
        }
        self.in_lists.clear();
        self.changed = true;
        self.in_lists_changed = true;
    }

    pub fn has_subscriber(&self, url: &str) -> bool {
        self.find(url).is_some_and(|f| !f.lists.is_empty())
    }

    pub fn subscribed_urls(&self) -> Vec<String> {
        self.feeds
            .iter()
            .filter(|f| !f.lists.is_empty())
            .map(|f| f.url.clone())
            .collect()
    }

    /// Number of list entries naming each feed URL (`feedsInLists.json`).
    pub fn feeds_in_lists(&self) -> &BTreeMap<String, u32> {
        &self.in_lists
    }

    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub fn take_in_lists_changed(&mut self) -> bool {
        std::mem::take(&mut self.in_lists_changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_keeps_discovery_order() {
        let mut table = SubscriptionTable::default();
        assert!(table.subscribe("http://b.com/rss", "one.opml"));
        assert!(table.subscribe("http://a.com/rss", "one.opml"));
        assert!(!table.subscribe("http://B.com/rss", "two.opml"));

        let urls: Vec<&str> = table.feeds().iter().map(|f| f.url.as_str()).collect();
        assert_eq!(urls, vec!["http://b.com/rss", "http://a.com/rss"]);
        assert_eq!(table.find("http://b.com/rss").unwrap().lists.len(), 2);
    }

    #[test]
    fn test_empty_url_is_ignored() {
        let mut table = SubscriptionTable::default();
        assert!(!table.subscribe("  ", "one.opml"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_clear_lists_keeps_feeds() {
        let mut table = SubscriptionTable::default();
        table.subscribe("http://a.com/rss", "one.opml");
        table.clear_lists();

        assert_eq!(table.len(), 1);
        assert!(!table.has_subscriber("http://a.com/rss"));
        assert!(table.subscribed_urls().is_empty());
        assert!(table.feeds_in_lists().is_empty());
    }

    #[test]
    fn test_feeds_in_lists_counts() {
        let mut table = SubscriptionTable::default();
        table.subscribe("http://a.com/rss", "one.opml");
        table.subscribe("http://a.com/rss", "two.opml");
        assert_eq!(table.feeds_in_lists().get("http://a.com/rss"), Some(&2));
    }

    #[test]
    fn test_change_tracking() {
        let mut table = SubscriptionTable::default();
        table.subscribe("http://a.com/rss", "one.opml");
        assert!(table.take_changed());
        assert!(!table.take_changed());

        table.find_mut("http://a.com/rss").unwrap().ct_reads += 1;
        assert!(table.take_changed());
    }

    #[test]
    fn test_serializes_as_array() {
        let mut table = SubscriptionTable::default();
        table.subscribe("http://a.com/rss", "one.opml");
        let json = serde_json::to_value(&table).unwrap();
        assert!(json.is_array());

        let back: SubscriptionTable = serde_json::from_value(json).unwrap();
        assert_eq!(back.len(), 1);
    }
}
