use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::epoch;

/// rssCloud hub advertised by a feed's `<cloud>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HubDescriptor {
    pub domain: String,
    pub port: u16,
    pub path: String,
    pub register_procedure: String,
    pub protocol: String,
}

impl HubDescriptor {
    /// Endpoint the renewal request is posted to.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}{}", self.domain, self.port, self.path)
    }
}

/// Push subscription state kept for a cloud-aware feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CloudSubscription {
    pub hub: HubDescriptor,
    pub ct_renewals: u64,
    pub ct_renewal_errors: u64,
    pub ct_consecutive_renewal_errors: u64,
    pub when_last_renewal: DateTime<Utc>,
    pub when_last_renewal_error: DateTime<Utc>,
    pub last_renewal_error: String,
}

impl Default for CloudSubscription {
    fn default() -> Self {
        Self::new(HubDescriptor::default())
    }
}

impl CloudSubscription {
    pub fn new(hub: HubDescriptor) -> Self {
        Self {
            hub,
            ct_renewals: 0,
            ct_renewal_errors: 0,
            ct_consecutive_renewal_errors: 0,
            when_last_renewal: epoch(),
            when_last_renewal_error: epoch(),
            last_renewal_error: String::new(),
        }
    }
}

/// In-memory view of one subscribed feed, the record the scheduler works from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedSubscription {
    pub url: String,
    pub lists: BTreeSet<String>,
    pub title: String,
    pub htmlurl: String,
    pub description: String,
    pub ct_reads: u64,
    pub ct_items: u64,
    pub ct_read_errors: u64,
    pub ct_consecutive_read_errors: u64,
    pub ct_times_chosen: u64,
    pub last_read_error: String,
    pub when_last_read: DateTime<Utc>,
    pub when_last_new_item: DateTime<Utc>,
    pub when_last_read_error: DateTime<Utc>,
    pub when_last_chosen_to_read: DateTime<Utc>,
    pub most_recent_pub_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudSubscription>,
}

impl Default for FeedSubscription {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl FeedSubscription {
    pub fn new(url: String) -> Self {
        Self {
            url,
            lists: BTreeSet::new(),
            title: String::new(),
            htmlurl: String::new(),
            description: String::new(),
            ct_reads: 0,
            ct_items: 0,
            ct_read_errors: 0,
            ct_consecutive_read_errors: 0,
            ct_times_chosen: 0,
            last_read_error: String::new(),
            when_last_read: epoch(),
            when_last_new_item: epoch(),
            when_last_read_error: epoch(),
            when_last_chosen_to_read: epoch(),
            most_recent_pub_date: epoch(),
            cloud: None,
        }
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }

    pub fn matches_url(&self, url: &str) -> bool {
        self.url.eq_ignore_ascii_case(url)
    }

    /// Install or refresh the hub descriptor, keeping renewal counters.
    pub fn set_hub(&mut self, hub: HubDescriptor) {
        match self.cloud.as_mut() {
            Some(cloud) => cloud.hub = hub,
            None => self.cloud = Some(CloudSubscription::new(hub)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_url_ignores_case() {
        let sub = FeedSubscription::new("http://Example.com/RSS.xml".into());
        assert!(sub.matches_url("http://example.com/rss.xml"));
        assert!(!sub.matches_url("http://example.com/other.xml"));
    }

    #[test]
    fn test_display_title_falls_back_to_url() {
        let mut sub = FeedSubscription::new("http://example.com/rss.xml".into());
        assert_eq!(sub.display_title(), "http://example.com/rss.xml");
        sub.title = "Example".into();
        assert_eq!(sub.display_title(), "Example");
    }

    #[test]
    fn test_set_hub_keeps_counters() {
        let mut sub = FeedSubscription::new("http://example.com/rss.xml".into());
        sub.set_hub(HubDescriptor {
            domain: "hub.example.com".into(),
            port: 5337,
            path: "/pleaseNotify".into(),
            ..Default::default()
        });
        sub.cloud.as_mut().unwrap().ct_renewals = 3;

        sub.set_hub(HubDescriptor {
            domain: "hub2.example.com".into(),
            port: 80,
            path: "/rpc".into(),
            ..Default::default()
        });

        let cloud = sub.cloud.unwrap();
        assert_eq!(cloud.ct_renewals, 3);
        assert_eq!(cloud.hub.endpoint(), "http://hub2.example.com:80/rpc");
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let sub: FeedSubscription =
            serde_json::from_str(r#"{"url":"http://example.com/rss.xml","ctReads":4}"#).unwrap();
        assert_eq!(sub.ct_reads, 4);
        assert_eq!(sub.when_last_chosen_to_read, epoch());
        assert!(sub.lists.is_empty());
    }
}
