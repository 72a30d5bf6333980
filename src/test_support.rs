//! Doubles shared by the daemon and server tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::aggregator::Aggregator;
use crate::app::{Result, RiverbedError};
use crate::cloud::HubClient;
use crate::config::Config;
use crate::daemon::{AggregatorHandle, Daemon};
use crate::domain::HubDescriptor;
use crate::fetcher::{Downloader, Fetcher};
use crate::store::FileStore;

pub const FEED: &str = "http://example.com/rss.xml";
pub const MISSING_FEED: &str = "http://example.com/missing.xml";

pub const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
<channel>
<title>Example News</title>
<link>http://example.com/</link>
<description>News</description>
<cloud domain="rpc.example.com" port="5337" path="/pleaseNotify" registerProcedure="" protocol="http-post"/>
<item><title>Only story</title><link>http://example.com/1</link><guid>1</guid></item>
</channel>
</rss>"#;

/// Serves [`RSS`] for every URL except ones containing "missing".
#[derive(Default)]
pub struct StaticFetcher {
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.urls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        if url.contains("missing") {
            return Err(RiverbedError::HttpStatus {
                url: url.to_string(),
                status: 404,
            });
        }
        Ok(RSS.as_bytes().to_vec())
    }
}

pub struct AcceptingHub;

#[async_trait]
impl HubClient for AcceptingHub {
    async fn please_notify(&self, _hub: &HubDescriptor, _url: &str, port: u16) -> Result<String> {
        assert_eq!(port, 1337);
        Ok("Thanks".to_string())
    }
}

pub struct NoDownloads;

#[async_trait]
impl Downloader for NoDownloads {
    async fn download(&self, _url: &str, _path: &Path, _pub_date: DateTime<Utc>) -> Result<u64> {
        Ok(0)
    }
}

/// Run a daemon over `dir` whose list `news.txt` names [`FEED`] and
/// [`MISSING_FEED`]. [`FEED`] is subscribed before the loop starts.
pub fn start_daemon(dir: &Path) -> (AggregatorHandle, Arc<StaticFetcher>, JoinHandle<()>) {
    let config = Config::rooted_at(dir);
    std::fs::create_dir_all(&config.paths.lists_folder).unwrap();
    std::fs::write(
        config.paths.lists_folder.join("news.txt"),
        format!("{}\n{}\n", FEED, MISSING_FEED),
    )
    .unwrap();

    let store = Arc::new(FileStore::new(&config.paths.data_folder).unwrap());
    let mut aggregator = Aggregator::new(config, store);
    aggregator.subscribe(FEED, "news.txt");

    let fetcher = Arc::new(StaticFetcher::default());
    let mut daemon = Daemon::new(
        aggregator,
        fetcher.clone(),
        Arc::new(AcceptingHub),
        Arc::new(NoDownloads),
    );
    let handle = daemon.handle();
    let task = tokio::spawn(async move { daemon.event_loop().await });
    (handle, fetcher, task)
}
