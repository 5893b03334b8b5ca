//! Anti-bot page detection.
//!
//! A response is checked against an ordered list of signatures. Each signature
//! pairs a case-insensitive pattern with the kind of block it indicates; the
//! first one that matches decides the classification. The check runs on every
//! response, including HTTP-success ones, because challenge pages are often
//! served with a 200 status.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::RawResponse;
use crate::config::SignatureConfig;
use crate::{FetchError, Result};

/// Kind of blocking page, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Bot-manager challenge page (the hard block).
    ChallengePage,
    /// Reverse-proxy browser check.
    ReverseProxyChallenge,
    /// Generic CAPTCHA.
    Captcha,
    /// Generic bot-detection wording.
    BotDetection,
    /// Rate limiting.
    RateLimited,
    /// Access denied.
    AccessDenied,
}

impl BlockKind {
    /// Returns whether retrying on the same channel is futile.
    pub fn is_hard(&self) -> bool {
        matches!(self, BlockKind::ChallengePage)
    }

    /// Returns the label used in logs and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::ChallengePage => "challenge_page",
            BlockKind::ReverseProxyChallenge => "reverse_proxy_challenge",
            BlockKind::Captcha => "captcha",
            BlockKind::BotDetection => "bot_detection",
            BlockKind::RateLimited => "rate_limited",
            BlockKind::AccessDenied => "access_denied",
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Where a signature looks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureTarget {
    /// The whole response body.
    Body,
    /// The value of the named response header.
    Header(String),
}

/// Built-in body signatures, in tie-break order.
const BODY_SIGNATURES: &[(&str, BlockKind)] = &[
    (r"shieldsquare", BlockKind::ChallengePage),
    (r"are you for real", BlockKind::ChallengePage),
    (r"radware bot manager", BlockKind::ChallengePage),
    (r"access to this page has been denied", BlockKind::ChallengePage),
    (r"cf-browser-verification", BlockKind::ReverseProxyChallenge),
    (r"cf-challenge", BlockKind::ReverseProxyChallenge),
    (r"just a moment\.\.\.", BlockKind::ReverseProxyChallenge),
    (r"checking your browser", BlockKind::ReverseProxyChallenge),
    (r"captcha", BlockKind::Captcha),
    (r"bot detection", BlockKind::BotDetection),
    (r"automated (access|requests|queries)", BlockKind::BotDetection),
    (r"unusual traffic", BlockKind::BotDetection),
    (r"too many requests", BlockKind::RateLimited),
    (r"rate limit(ed)?", BlockKind::RateLimited),
    (r"access denied", BlockKind::AccessDenied),
];

/// Built-in header signatures, checked after the body list.
const HEADER_SIGNATURES: &[(&str, &str, BlockKind)] =
    &[("cf-mitigated", r"challenge", BlockKind::ReverseProxyChallenge)];

/// A single (pattern, kind) pair.
#[derive(Debug, Clone)]
pub struct BlockSignature {
    pattern: Regex,
    kind: BlockKind,
    target: SignatureTarget,
}

impl BlockSignature {
    /// Creates a signature matched against the response body.
    pub fn body(pattern: &str, kind: BlockKind) -> Result<Self> {
        Ok(Self {
            pattern: compile(pattern)?,
            kind,
            target: SignatureTarget::Body,
        })
    }

    /// Creates a signature matched against one response header.
    pub fn header(name: impl Into<String>, pattern: &str, kind: BlockKind) -> Result<Self> {
        Ok(Self {
            pattern: compile(pattern)?,
            kind,
            target: SignatureTarget::Header(name.into().to_ascii_lowercase()),
        })
    }

    /// Creates a signature from its configuration form.
    pub fn from_config(config: &SignatureConfig) -> Result<Self> {
        match &config.header {
            Some(name) => Self::header(name.as_str(), &config.pattern, config.kind),
            None => Self::body(&config.pattern, config.kind),
        }
    }

    /// Returns the kind this signature classifies as.
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Returns the pattern source.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Returns where the signature looks.
    pub fn target(&self) -> &SignatureTarget {
        &self.target
    }

    fn matches(&self, response: &RawResponse) -> bool {
        match &self.target {
            SignatureTarget::Body => self.pattern.is_match(&response.body),
            SignatureTarget::Header(name) => response
                .headers
                .get_all(name.as_str())
                .iter()
                .filter_map(|v| v.to_str().ok())
                .any(|v| self.pattern.is_match(v)),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| FetchError::Config(format!("Invalid blocking signature '{}': {}", pattern, e)))
}

/// Returns the built-in signature list.
pub fn default_signatures() -> Vec<BlockSignature> {
    let body = BODY_SIGNATURES
        .iter()
        .filter_map(|(pattern, kind)| BlockSignature::body(pattern, *kind).ok());
    let headers = HEADER_SIGNATURES
        .iter()
        .filter_map(|(name, pattern, kind)| BlockSignature::header(*name, pattern, *kind).ok());
    body.chain(headers).collect()
}

/// Classifies responses against an ordered signature list.
#[derive(Debug, Clone)]
pub struct BlockingDetector {
    signatures: Vec<BlockSignature>,
}

impl BlockingDetector {
    /// Creates a detector with the built-in signatures.
    pub fn new() -> Self {
        Self {
            signatures: default_signatures(),
        }
    }

    /// Creates a detector with exactly the given signatures.
    pub fn with_signatures(signatures: Vec<BlockSignature>) -> Self {
        Self { signatures }
    }

    /// Appends signatures after the existing ones.
    pub fn extend(&mut self, signatures: impl IntoIterator<Item = BlockSignature>) {
        self.signatures.extend(signatures);
    }

    /// Returns the signatures in match order.
    pub fn signatures(&self) -> &[BlockSignature] {
        &self.signatures
    }

    /// Returns the first signature matching the response.
    pub fn matching(&self, response: &RawResponse) -> Option<&BlockSignature> {
        self.signatures.iter().find(|s| s.matches(response))
    }

    /// Classifies the response; `None` means it is not a blocking page.
    pub fn detect(&self, response: &RawResponse) -> Option<BlockKind> {
        let signature = self.matching(response)?;
        debug!(
            "Response (HTTP {}) matched blocking signature '{}' ({})",
            response.status,
            signature.pattern(),
            signature.kind
        );
        Some(signature.kind)
    }
}

impl Default for BlockingDetector {
    fn default() -> Self {
        Self::new()
    }
}
