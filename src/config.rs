//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::blocking::BlockKind;
use crate::retry::BackoffPolicy;
use crate::{FetchError, Result};

/// Credentials and routing for the relay channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay API endpoint receiving the request envelope.
    pub endpoint: String,
    /// Bearer token for the relay API.
    pub api_key: String,
    /// Relay zone identifier.
    pub zone: String,
    /// Egress country code.
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    "il".to_string()
}

impl RelayConfig {
    /// Creates a relay configuration.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            zone: zone.into(),
            country: default_country(),
        }
    }

    /// Sets the egress country.
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    /// Reads `RELAY_API_KEY` and `RELAY_ZONE` (required) plus optional
    /// `RELAY_ENDPOINT` and `RELAY_COUNTRY`. Returns `None` without credentials.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("RELAY_API_KEY").ok()?;
        let zone = std::env::var("RELAY_ZONE").ok()?;
        let endpoint =
            std::env::var("RELAY_ENDPOINT").unwrap_or_else(|_| default_relay_endpoint());
        let mut config = Self::new(endpoint, api_key, zone);
        if let Ok(country) = std::env::var("RELAY_COUNTRY") {
            config.country = country;
        }
        Some(config)
    }
}

/// Default relay API endpoint.
pub fn default_relay_endpoint() -> String {
    "https://api.brightdata.com/request".to_string()
}

/// An extra blocking signature supplied through configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Case-insensitive regular expression.
    pub pattern: String,
    /// Classification when it matches.
    pub kind: BlockKind,
    /// Header to inspect instead of the body.
    #[serde(default)]
    pub header: Option<String>,
}

/// Configuration for a [`crate::ListingClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Origin base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Human-facing listings page, used for referer and identifier recovery.
    #[serde(default = "default_landing_path")]
    pub landing_path: String,
    /// Data endpoint path; `{build_id}` is substituted.
    #[serde(default = "default_data_path")]
    pub data_path: String,
    /// Build identifier used until the origin rejects it.
    #[serde(default = "default_build_id")]
    pub default_build_id: String,
    /// Browser user agent.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Accept-Language header value.
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
    /// Per-call network timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Cache entry lifetime in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Retry budget and delays.
    #[serde(default)]
    pub backoff: BackoffPolicy,
    /// Relay channel; direct only when absent.
    #[serde(default)]
    pub relay: Option<RelayConfig>,
    /// Signatures appended after the built-in list.
    #[serde(default)]
    pub extra_signatures: Vec<SignatureConfig>,
    /// Consecutive direct failures before going relay-first.
    #[serde(default = "default_failure_threshold")]
    pub direct_failure_threshold: u32,
    /// Age of the last direct success after which relay goes first.
    #[serde(default = "default_staleness")]
    pub direct_staleness_secs: u64,
    /// Treat a parsed but empty result as a failed attempt.
    #[serde(default)]
    pub empty_is_failure: bool,
    /// Upper bound on one range pipeline in the parallel fetcher.
    #[serde(default = "default_range_timeout")]
    pub range_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://www.yad2.co.il".to_string()
}

fn default_landing_path() -> String {
    "/vehicles/cars".to_string()
}

fn default_data_path() -> String {
    "/vehicles/_next/data/{build_id}/cars.json".to_string()
}

fn default_build_id() -> String {
    "1745841209540".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string()
}

fn default_accept_language() -> String {
    "he-IL,he;q=0.9,en-US;q=0.8,en;q=0.7".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_staleness() -> u64 {
    3600
}

fn default_range_timeout() -> u64 {
    300
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            landing_path: default_landing_path(),
            data_path: default_data_path(),
            default_build_id: default_build_id(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            request_timeout_secs: default_request_timeout(),
            cache_ttl_secs: default_cache_ttl(),
            backoff: BackoffPolicy::default(),
            relay: None,
            extra_signatures: Vec::new(),
            direct_failure_threshold: default_failure_threshold(),
            direct_staleness_secs: default_staleness(),
            empty_is_failure: false,
            range_timeout_secs: default_range_timeout(),
        }
    }
}

impl ClientConfig {
    /// Loads a JSON configuration file; missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FetchError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the origin base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the initial build identifier.
    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.default_build_id = build_id.into();
        self
    }

    /// Sets the retry policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enables the relay channel.
    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Sets the cache lifetime.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Appends an extra blocking signature.
    pub fn with_signature(mut self, signature: SignatureConfig) -> Self {
        self.extra_signatures.push(signature);
        self
    }

    /// Sets whether empty results count as failures.
    pub fn with_empty_is_failure(mut self, enabled: bool) -> Self {
        self.empty_is_failure = enabled;
        self
    }

    /// Checks values that would make every request fail.
    pub fn validate(&self) -> Result<()> {
        if !self.data_path.contains("{build_id}") {
            return Err(FetchError::Config(
                "data_path must contain a {build_id} placeholder".into(),
            ));
        }
        if self.backoff.max_attempts == 0 {
            return Err(FetchError::Config("backoff.max_attempts must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(FetchError::Config("request_timeout_secs must be positive".into()));
        }
        if self.range_timeout_secs == 0 {
            return Err(FetchError::Config("range_timeout_secs must be positive".into()));
        }
        if self.direct_failure_threshold == 0 {
            return Err(FetchError::Config(
                "direct_failure_threshold must be at least 1".into(),
            ));
        }
        url::Url::parse(&self.base_url)?;
        Ok(())
    }

    /// Per-call network timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Cache entry lifetime.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Direct-success staleness window.
    pub fn direct_staleness(&self) -> Duration {
        Duration::from_secs(self.direct_staleness_secs)
    }

    /// Per-range timeout.
    pub fn range_timeout(&self) -> Duration {
        Duration::from_secs(self.range_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.direct_failure_threshold, 3);
        assert!(config.relay.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialization_defaults() {
        let json = r#"{
            "base_url": "http://localhost:8080",
            "relay": {"endpoint": "http://r", "api_key": "k", "zone": "z"}
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.cache_ttl_secs, 3600);
        assert_eq!(config.backoff.max_attempts, 3);
        let relay = config.relay.unwrap();
        assert_eq!(relay.country, "il");
    }

    #[test]
    fn test_config_builders() {
        let config = ClientConfig::default()
            .with_base_url("http://127.0.0.1:1")
            .with_build_id("abc")
            .with_cache_ttl(Duration::from_secs(60))
            .with_backoff(BackoffPolicy::immediate(5))
            .with_relay(RelayConfig::new("http://relay", "key", "zone").with_country("us"))
            .with_empty_is_failure(true);
        assert_eq!(config.default_build_id, "abc");
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.backoff.max_attempts, 5);
        assert_eq!(config.relay.as_ref().unwrap().country, "us");
        assert!(config.empty_is_failure);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.data_path = "/static/cars.json".into();
        assert!(matches!(config.validate(), Err(FetchError::Config(_))));

        let config = ClientConfig::default().with_backoff(BackoffPolicy::immediate(0));
        assert!(config.validate().is_err());

        let config = ClientConfig::default().with_base_url("not a url");
        assert!(matches!(config.validate(), Err(FetchError::UrlParse(_))));
    }

    #[test]
    fn test_validate_rejects_zero_range_timeout_and_threshold() {
        let mut config = ClientConfig::default();
        config.range_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(FetchError::Config(_))));

        let mut config = ClientConfig::default();
        config.direct_failure_threshold = 0;
        assert!(matches!(config.validate(), Err(FetchError::Config(_))));

        let mut config = ClientConfig::default();
        config.direct_failure_threshold = 1;
        config.range_timeout_secs = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = std::env::temp_dir();
        file.push(format!("listing-fetch-config-{}.json", std::process::id()));
        {
            let mut f = std::fs::File::create(&file).unwrap();
            writeln!(
                f,
                r#"{{"default_build_id":"xyz","extra_signatures":[{{"pattern":"go away","kind":"bot_detection"}}]}}"#
            )
            .unwrap();
        }
        let config = ClientConfig::from_file(&file).unwrap();
        std::fs::remove_file(&file).ok();
        assert_eq!(config.default_build_id, "xyz");
        assert_eq!(config.extra_signatures.len(), 1);
        assert_eq!(config.extra_signatures[0].kind, BlockKind::BotDetection);
    }

    #[test]
    fn test_from_file_missing() {
        let err = ClientConfig::from_file("/nonexistent/listing-fetch.json").unwrap_err();
        assert!(matches!(err, FetchError::Config(_)));
    }
}
