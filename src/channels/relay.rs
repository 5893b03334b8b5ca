//! Relay channel: delegates the request to a paid relay service.
//!
//! The relay receives a JSON envelope naming the zone, the target URL, the
//! egress country and the headers a browser would have sent, and answers
//! with the target's raw response. A 200 from the relay says nothing about
//! the content, so responses still go through blocking detection.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::Serialize;

use crate::channel::{Channel, ChannelKind, RawResponse};
use crate::config::RelayConfig;
use crate::Result;

/// Request body sent to the relay API.
#[derive(Debug, Serialize)]
struct RelayEnvelope<'a> {
    zone: &'a str,
    url: &'a str,
    format: &'a str,
    country: &'a str,
    headers: BTreeMap<String, String>,
}

/// Sends requests through the relay service.
pub struct RelayChannel {
    client: Client,
    config: RelayConfig,
}

impl RelayChannel {
    /// Creates a relay channel whose calls give up after `timeout`.
    pub fn new(config: RelayConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).gzip(true).build()?;
        Ok(Self { client, config })
    }

    /// Creates a relay channel with a custom reqwest client.
    pub fn with_client(config: RelayConfig, client: Client) -> Self {
        Self { client, config }
    }

    /// Returns the relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn envelope<'a>(&'a self, url: &'a str, headers: &HeaderMap) -> RelayEnvelope<'a> {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        RelayEnvelope {
            zone: &self.config.zone,
            url,
            format: "raw",
            country: &self.config.country,
            headers,
        }
    }
}

#[async_trait]
impl Channel for RelayChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Relay
    }

    async fn send(&self, url: &str, headers: &HeaderMap) -> Result<RawResponse> {
        let envelope = self.envelope(url, headers);
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&envelope)
            .send()
            .await?;
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
