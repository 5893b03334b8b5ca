//! Direct channel using the caller's own network identity.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;

use crate::channel::{Channel, ChannelKind, RawResponse};
use crate::Result;

/// Sends requests straight to the origin via reqwest.
pub struct DirectChannel {
    client: Client,
}

impl DirectChannel {
    /// Creates a direct channel whose calls give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }

    /// Creates a direct channel with a custom reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Channel for DirectChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Direct
    }

    async fn send(&self, url: &str, headers: &HeaderMap) -> Result<RawResponse> {
        let response = self.client.get(url).headers(headers.clone()).send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await?;
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
