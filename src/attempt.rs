//! Per-attempt records and failure classification.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::blocking::BlockKind;
use crate::channel::ChannelKind;

/// What happened on one channel attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Response parsed into listings.
    Success {
        /// Number of listings parsed.
        listings: usize,
    },
    /// Response parsed but held no listings (only recorded with `empty_is_failure`).
    Empty,
    /// The network call itself failed.
    Transport(String),
    /// Non-success HTTP status.
    Http(u16),
    /// The response was an anti-bot page.
    Blocked(BlockKind),
    /// The body was not the expected document shape.
    Parse(String),
}

impl AttemptOutcome {
    /// Returns whether this attempt produced listings.
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success { .. })
    }

    /// Returns whether this outcome stops the remaining retries on its channel.
    pub fn is_hard_block(&self) -> bool {
        matches!(self, AttemptOutcome::Blocked(kind) if kind.is_hard())
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Success { listings } => write!(f, "ok ({} listings)", listings),
            AttemptOutcome::Empty => write!(f, "empty result"),
            AttemptOutcome::Transport(e) => write!(f, "transport error: {}", e),
            AttemptOutcome::Http(status) => write!(f, "HTTP {}", status),
            AttemptOutcome::Blocked(kind) => write!(f, "blocked: {}", kind),
            AttemptOutcome::Parse(e) => write!(f, "parse error: {}", e),
        }
    }
}

/// One record per (channel, attempt number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchAttempt {
    /// Channel that performed the attempt.
    pub channel: ChannelKind,
    /// 1-based attempt number within the channel.
    pub attempt: u32,
    /// When the attempt started.
    pub timestamp: SystemTime,
    /// URL actually requested; reflects a mid-attempt identifier refresh.
    pub url: String,
    /// Resulting status or classified error.
    pub outcome: AttemptOutcome,
    /// Whether the build identifier was refreshed during this attempt.
    pub build_id_refreshed: bool,
}

impl FetchAttempt {
    /// Creates an attempt record stamped with the current time.
    pub fn new(
        channel: ChannelKind,
        attempt: u32,
        url: impl Into<String>,
        outcome: AttemptOutcome,
    ) -> Self {
        Self {
            channel,
            attempt,
            timestamp: SystemTime::now(),
            url: url.into(),
            outcome,
            build_id_refreshed: false,
        }
    }

    /// Marks the attempt as having rotated the build identifier.
    pub fn with_refresh(mut self, refreshed: bool) -> Self {
        self.build_id_refreshed = refreshed;
        self
    }
}

/// Coarse classification of an exhausted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Every channel ended on a blocking page.
    BlockedEverywhere,
    /// Every channel ended on a transport error.
    NetworkEverywhere,
    /// Every channel ended on a parsed but empty result.
    ParsedButEmpty,
    /// Anything else.
    Mixed,
}

impl FailureKind {
    /// Classifies a history by the last outcome of each channel that ran.
    pub fn classify(attempts: &[FetchAttempt]) -> Self {
        let finals: Vec<&AttemptOutcome> = [ChannelKind::Direct, ChannelKind::Relay]
            .iter()
            .filter_map(|kind| {
                attempts
                    .iter()
                    .rev()
                    .find(|a| a.channel == *kind)
                    .map(|a| &a.outcome)
            })
            .collect();

        if finals.is_empty() {
            return FailureKind::Mixed;
        }
        if finals.iter().all(|o| matches!(o, AttemptOutcome::Blocked(_))) {
            FailureKind::BlockedEverywhere
        } else if finals.iter().all(|o| matches!(o, AttemptOutcome::Transport(_))) {
            FailureKind::NetworkEverywhere
        } else if finals.iter().all(|o| matches!(o, AttemptOutcome::Empty)) {
            FailureKind::ParsedButEmpty
        } else {
            FailureKind::Mixed
        }
    }
}
