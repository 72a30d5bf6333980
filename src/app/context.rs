use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::Aggregator;
use crate::app::error::Result;
use crate::cloud::{HttpHubClient, HubClient};
use crate::config::Config;
use crate::daemon::Daemon;
use crate::fetcher::{
    build_download_client, Downloader, Fetcher, HttpDownloader, HttpFetcher,
    DOWNLOAD_READ_TIMEOUT_SECS,
};
use crate::store::{FileStore, Store};

/// Wires the configured store and network clients together.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub fetcher: Arc<dyn Fetcher>,
    pub hub_client: Arc<dyn HubClient>,
    pub downloader: Arc<dyn Downloader>,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn Store> = Arc::new(FileStore::new(&config.paths.data_folder)?);
        let user_agent = Config::aggregator_name();
        let http = HttpFetcher::new(&user_agent)?;
        let client = http.client().clone();
        let download_client = build_download_client(
            &user_agent,
            Duration::from_secs(DOWNLOAD_READ_TIMEOUT_SECS),
        )?;

        Ok(Self {
            config,
            store,
            fetcher: Arc::new(http),
            hub_client: Arc::new(HttpHubClient::new(client)),
            downloader: Arc::new(HttpDownloader::new(download_client)),
        })
    }

    /// A fresh aggregator over this context's store.
    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.config.clone(), self.store.clone())
    }

    pub fn daemon(&self) -> Daemon {
        Daemon::new(
            self.aggregator(),
            self.fetcher.clone(),
            self.hub_client.clone(),
            self.downloader.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creates_data_folder() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::new(Config::rooted_at(dir.path())).unwrap();

        assert!(dir.path().join("data").is_dir());
        assert_eq!(ctx.aggregator().stats().ct_starts, 1);
    }
}
