pub mod download;
pub mod http_fetcher;

use async_trait::async_trait;

use crate::app::Result;

pub use download::{build_download_client, Downloader, HttpDownloader};
pub use http_fetcher::HttpFetcher;

/// Redirects followed before a fetch is treated as failed.
pub const MAX_REDIRECTS: usize = 5;
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Longest a podcast transfer may go without receiving any bytes.
pub const DOWNLOAD_READ_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` and return the body. Any status other than 200 is an error.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// `feed://` is read as `http://`.
pub fn fetchable_url(url: &str) -> String {
    match url.strip_prefix("feed://") {
        Some(rest) => format!("http://{}", rest),
        None => url.to_string(),
    }
}
