//! Error types for pagebatch.
//!
//! Two families exist:
//!
//! ```text
//! FetchError    - delivered to continuations at flush time
//! ├── Transport - network, timeout, HTTP status, server-side throttling
//! ├── Parse     - malformed or unexpected response shape
//! ├── NotFound  - the title has no page upstream
//! └── Cancelled - the scope was abandoned before the request was sent
//!
//! BatcherError  - returned synchronously to the caller on misuse
//! └── Closed    - registration after the scope ended
//! ```
//!
//! Transport and parse failures are retried by the batcher before they reach
//! a continuation. `NotFound` is a stable answer and is never retried.

use std::time::Duration;

use thiserror::Error;

/// Failure delivered to a continuation in place of page content
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The remote service could not be reached or refused the request
    #[error("transport failure: {message}")]
    Transport {
        message: String,
        /// Delay the server asked for before the next attempt
        retry_after: Option<Duration>,
    },

    /// The response could not be understood
    #[error("malformed response: {0}")]
    Parse(String),

    /// No page exists for the requested title
    #[error("page not found: {title}")]
    NotFound { title: String },

    /// The batcher was abandoned before the request was resolved
    #[error("request cancelled before it was sent")]
    Cancelled,
}

impl FetchError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            retry_after: None,
        }
    }

    /// Create a transport error carrying a server-provided retry hint
    pub fn throttled(msg: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::Transport {
            message: msg.into(),
            retry_after,
        }
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(title: impl Into<String>) -> Self {
        Self::NotFound {
            title: title.into(),
        }
    }

    /// Whether the batcher should try the request again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Parse(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Server-provided minimum delay before retrying, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transport { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short stable name of the failure class, used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Parse(_) => "parse",
            Self::NotFound { .. } => "not_found",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Programming errors raised at the point of misuse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatcherError {
    /// The batcher no longer accepts registrations
    #[error("batcher is closed; cannot register {title:?}")]
    Closed { title: String },
}
