use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::redirect::Policy;
use reqwest::Client;
use tokio::io::AsyncWriteExt;

use crate::app::{Result, RiverbedError};
use crate::fetcher::{MAX_REDIRECTS, REQUEST_TIMEOUT_SECS};

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch `url` into `path` and stamp the file with `pub_date`.
    /// Returns the number of bytes written.
    async fn download(&self, url: &str, path: &Path, pub_date: DateTime<Utc>) -> Result<u64>;
}

/// Client for enclosure downloads. There is no deadline on the whole
/// transfer, only on connecting and on each read.
pub fn build_download_client(user_agent: &str, read_timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .read_timeout(read_timeout)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .user_agent(user_agent)
        .build()?;
    Ok(client)
}

pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, path: &Path, pub_date: DateTime<Utc>) -> Result<u64> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(RiverbedError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        set_modified(path, pub_date)?;
        Ok(written)
    }
}

/// Set a file's modification time.
pub fn set_modified(path: &Path, when: DateTime<Utc>) -> Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_modified(SystemTime::from(when))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, Bytes};
    use axum::routing::get;
    use axum::Router;
    use chrono::TimeZone;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    /// Serves `chunks` KiB, pausing `pause` before each one.
    async fn serve_slowly(chunks: usize, pause: Duration) -> String {
        let app = Router::new().route(
            "/episode.mp3",
            get(move || async move {
                let stream = futures::stream::iter(0..chunks).then(move |_| async move {
                    tokio::time::sleep(pause).await;
                    Ok::<_, std::io::Error>(Bytes::from(vec![b'x'; 1024]))
                });
                Body::from_stream(stream)
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{}/episode.mp3", addr)
    }

    #[tokio::test]
    async fn test_long_transfer_outlasts_read_timeout() {
        let url = serve_slowly(8, Duration::from_millis(100)).await;
        let client = build_download_client("riverbed-test", Duration::from_millis(400)).unwrap();
        let downloader = HttpDownloader::new(client);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("podcasts").join("episode.mp3");
        let when = Utc.with_ymd_and_hms(2020, 5, 17, 12, 0, 0).unwrap();

        let written = downloader.download(&url, &path, when).await.unwrap();

        assert_eq!(written, 8 * 1024);
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(DateTime::<Utc>::from(modified), when);
    }

    #[tokio::test]
    async fn test_stalled_transfer_fails() {
        let url = serve_slowly(2, Duration::from_millis(1500)).await;
        let client = build_download_client("riverbed-test", Duration::from_millis(300)).unwrap();
        let downloader = HttpDownloader::new(client);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("episode.mp3");

        assert!(downloader.download(&url, &path, Utc::now()).await.is_err());
    }

    #[test]
    fn test_set_modified() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("episode.mp3");
        std::fs::write(&path, b"audio").unwrap();
        let when = Utc.with_ymd_and_hms(2020, 5, 17, 12, 0, 0).unwrap();

        set_modified(&path, when).unwrap();

        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(DateTime::<Utc>::from(modified), when);
    }
}
