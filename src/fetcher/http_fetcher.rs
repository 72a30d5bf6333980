use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};

use crate::app::{Result, RiverbedError};
use crate::fetcher::{fetchable_url, Fetcher, MAX_REDIRECTS, REQUEST_TIMEOUT_SECS};

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(user_agent)?,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// The client shared by feed reads and hub renewals.
pub fn build_client(user_agent: &str) -> Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .user_agent(user_agent)
        .build()?;
    Ok(client)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let url = fetchable_url(url);
        let response = self.client.get(&url).send().await?;

        if response.status() != StatusCode::OK {
            return Err(RiverbedError::HttpStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
