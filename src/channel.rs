//! Delivery channel trait and raw response type.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::Result;

/// The two delivery paths for the same logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// The caller's own network identity.
    Direct,
    /// A paid relay service exiting from the target country.
    Relay,
}

impl ChannelKind {
    /// Returns the channel label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Direct => "direct",
            ChannelKind::Relay => "relay",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Status, headers and body of one round trip.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status as seen by the channel.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body text.
    pub body: String,
}

impl RawResponse {
    /// Creates a response with no headers.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Returns whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns whether the status is in the "not found" class.
    pub fn is_not_found(&self) -> bool {
        self.status == 404 || self.status == 410
    }
}

/// Performs one HTTP round trip.
///
/// Implementations only move bytes; classification of the response is left
/// to the retry controller. A transport failure is an `Err`, any HTTP status
/// is an `Ok`.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Returns which channel this is.
    fn kind(&self) -> ChannelKind;

    /// Issues a GET for `url` with `headers`, through this channel.
    async fn send(&self, url: &str, headers: &HeaderMap) -> Result<RawResponse>;

    /// Returns the channel name.
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }
}
