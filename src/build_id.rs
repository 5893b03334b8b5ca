//! Build identifier ownership and recovery.
//!
//! The data endpoint embeds a build identifier that the origin rotates on
//! every deploy. When a data request comes back "not found", the resolver
//! loads the human-facing landing page and searches it for the current
//! identifier with an ordered list of extraction patterns.

use std::time::Duration;

use regex::Regex;
use scraper::{Html, Selector};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::request::RequestPlanner;

/// One way of finding the identifier in landing-page HTML.
#[derive(Debug, Clone)]
pub enum ExtractionPattern {
    /// The `buildId` field of the embedded `__NEXT_DATA__` JSON script.
    NextDataScript,
    /// First capture group of a regular expression.
    Regex(Regex),
}

impl ExtractionPattern {
    fn extract(&self, html: &str) -> Option<String> {
        let found = match self {
            ExtractionPattern::NextDataScript => {
                let document = Html::parse_document(html);
                let selector = Selector::parse("script#__NEXT_DATA__").ok()?;
                let script = document.select(&selector).next()?;
                let json: serde_json::Value =
                    serde_json::from_str(&script.text().collect::<String>()).ok()?;
                json.get("buildId")?.as_str().map(str::to_string)
            }
            ExtractionPattern::Regex(re) => re
                .captures(html)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
        };
        found.filter(|id| is_valid_build_id(id))
    }
}

/// Identifiers are embedded in a URL path segment, so only the characters
/// the origin actually uses are accepted.
fn is_valid_build_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Built-in extraction patterns, in priority order.
pub fn default_patterns() -> Vec<ExtractionPattern> {
    let regexes = [
        r#""buildId"\s*:\s*"([A-Za-z0-9_\-]+)""#,
        r#"/_next/static/([A-Za-z0-9_\-]+)/_buildManifest\.js"#,
        r#"/_next/data/([A-Za-z0-9_\-]+)/"#,
    ];
    std::iter::once(ExtractionPattern::NextDataScript)
        .chain(
            regexes
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .map(ExtractionPattern::Regex),
        )
        .collect()
}

/// Owns the client's current build identifier.
#[derive(Debug)]
pub struct BuildIdResolver {
    current: RwLock<String>,
    patterns: Vec<ExtractionPattern>,
}

impl BuildIdResolver {
    /// Creates a resolver starting from `initial`.
    pub fn new(initial: impl Into<String>) -> Self {
        Self::with_patterns(initial, default_patterns())
    }

    /// Creates a resolver with custom extraction patterns.
    pub fn with_patterns(initial: impl Into<String>, patterns: Vec<ExtractionPattern>) -> Self {
        Self {
            current: RwLock::new(initial.into()),
            patterns,
        }
    }

    /// Returns the current identifier.
    pub async fn current(&self) -> String {
        self.current.read().await.clone()
    }

    /// Replaces the current identifier.
    pub async fn set(&self, build_id: impl Into<String>) {
        *self.current.write().await = build_id.into();
    }

    /// Searches landing-page HTML; first matching pattern wins.
    pub fn extract(&self, html: &str) -> Option<String> {
        self.patterns.iter().find_map(|p| p.extract(html))
    }

    /// Recovers a fresh identifier after `stale` was rejected.
    ///
    /// Returns the identifier to retry with, or `None` when none could be
    /// found or the landing page still advertises `stale`. If another
    /// pipeline already replaced `stale`, its value is returned without a
    /// landing-page request. The landing call is abandoned after
    /// `call_timeout`.
    pub async fn refresh(
        &self,
        stale: &str,
        channel: &dyn Channel,
        planner: &RequestPlanner,
        call_timeout: Duration,
    ) -> Option<String> {
        {
            let current = self.current.read().await;
            if current.as_str() != stale {
                debug!("Build id already rotated to {}", current);
                return Some(current.clone());
            }
        }

        let landing = planner.landing_url();
        let sent = timeout(call_timeout, channel.send(landing, planner.landing_headers())).await;
        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Landing page fetch via {} failed: {}", channel.name(), e);
                return None;
            }
            Err(_) => {
                warn!(
                    "Landing page fetch via {} timed out after {}s",
                    channel.name(),
                    call_timeout.as_secs_f32()
                );
                return None;
            }
        };
        if !response.is_success() {
            debug!("Landing page returned HTTP {}", response.status);
            return None;
        }

        let found = self.extract(&response.body)?;
        if found == stale {
            debug!("Landing page still advertises build id {}", stale);
            return None;
        }

        let mut current = self.current.write().await;
        if current.as_str() == stale {
            info!("Build id rotated: {} -> {}", stale, found);
            *current = found;
        }
        Some(current.clone())
    }
}
