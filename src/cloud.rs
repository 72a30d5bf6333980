//! rssCloud client side: asking hubs to notify us when a feed changes.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;

use crate::app::{Result, RiverbedError};
use crate::domain::{CloudSubscription, HubDescriptor};
use crate::subscriptions::SubscriptionTable;

/// Path hubs are asked to call back on.
pub const NOTIFY_PATH: &str = "/feedupdated";
/// Subscriptions are renewed once they are older than this.
pub const RENEWAL_AGE_HOURS: i64 = 23;
pub const RENEWAL_SUCCESS: &str = "It worked.";

#[async_trait]
pub trait HubClient: Send + Sync {
    /// Ask `hub` to notify us about `feed_url`. Returns the hub's message on success.
    async fn please_notify(&self, hub: &HubDescriptor, feed_url: &str, port: u16) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct HubResponse {
    success: bool,
    #[serde(default)]
    msg: String,
}

pub struct HttpHubClient {
    client: Client,
}

impl HttpHubClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HubClient for HttpHubClient {
    async fn please_notify(&self, hub: &HubDescriptor, feed_url: &str, port: u16) -> Result<String> {
        let port = port.to_string();
        let form = [
            ("port", port.as_str()),
            ("path", NOTIFY_PATH),
            ("url1", feed_url),
            ("protocol", "http-post"),
        ];

        let response = self
            .client
            .post(hub.endpoint())
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let body: HubResponse = response
            .json()
            .await
            .map_err(|e| RiverbedError::HubRenewal(e.to_string()))?;

        if body.success {
            Ok(body.msg)
        } else {
            Err(RiverbedError::HubRenewal(body.msg))
        }
    }
}

/// The first cloud-aware feed whose subscription is due, marked as renewed.
/// At most one feed is returned per call.
pub fn next_renewal(subs: &mut SubscriptionTable, now: DateTime<Utc>) -> Option<(String, HubDescriptor)> {
    let due = Duration::hours(RENEWAL_AGE_HOURS);
    let ix = subs.feeds().iter().position(|f| {
        f.cloud
            .as_ref()
            .is_some_and(|c| now - c.when_last_renewal > due)
    })?;
    let feed = &mut subs.feeds_mut()[ix];
    let cloud = feed.cloud.as_mut()?;
    record_renewal_started(cloud, now);
    Some((feed.url.clone(), cloud.hub.clone()))
}

pub fn record_renewal_started(cloud: &mut CloudSubscription, now: DateTime<Utc>) {
    cloud.ct_renewals += 1;
    cloud.when_last_renewal = now;
}

/// Apply a renewal result and return the message for whoever asked.
pub fn record_renewal_result(
    cloud: &mut CloudSubscription,
    result: &Result<String>,
    now: DateTime<Utc>,
) -> String {
    match result {
        Ok(_) => {
            cloud.ct_consecutive_renewal_errors = 0;
            RENEWAL_SUCCESS.to_string()
        }
        Err(e) => {
            let message = match e {
                RiverbedError::HubRenewal(msg) => msg.clone(),
                other => other.to_string(),
            };
            cloud.ct_renewal_errors += 1;
            cloud.ct_consecutive_renewal_errors += 1;
            cloud.when_last_renewal_error = now;
            cloud.last_renewal_error = message.clone();
            message
        }
    }
}
