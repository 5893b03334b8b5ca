//! Error types for the acquisition client.

use thiserror::Error;

use crate::attempt::{FailureKind, FetchAttempt};

/// Result type alias for acquisition operations.
pub type Result<T> = std::result::Result<T, FetchError>;

/// Errors that can occur while acquiring listings.
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Invalid search parameters.
    #[error("Invalid search parameters: {0}")]
    InvalidParams(String),

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A range pipeline did not finish in time.
    #[error("Fetch timeout exceeded")]
    Timeout,

    /// Every channel used up its retry budget.
    #[error("All channels exhausted after {} attempts", .0.len())]
    Exhausted(Vec<FetchAttempt>),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Returns the attempt history carried by an exhaustion failure.
    pub fn attempts(&self) -> &[FetchAttempt] {
        match self {
            FetchError::Exhausted(attempts) => attempts,
            _ => &[],
        }
    }

    /// Classifies an exhaustion failure; `None` for every other error.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            FetchError::Exhausted(attempts) => Some(FailureKind::classify(attempts)),
            _ => None,
        }
    }
}
