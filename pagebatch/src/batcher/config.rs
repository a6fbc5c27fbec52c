//! Configuration for the page batcher.

use std::time::Duration;

/// Retry policy applied to a failed outbound batch call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per batch, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Upper bound on any single delay
    pub max_backoff: Duration,

    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first failure
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// `initial_backoff * multiplier^retry`, raised to the server hint when one
    /// was given, and capped at `max_backoff`.
    pub fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let exp = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(retry as i32);
        let capped = exp.min(self.max_backoff.as_millis() as f64).max(0.0) as u64;
        let delay = Duration::from_millis(capped);

        match hint {
            Some(h) => delay.max(h).min(self.max_backoff),
            None => delay,
        }
    }
}

/// Configuration for the page batcher
#[derive(Debug, Clone, PartialEq)]
pub struct BatcherConfig {
    /// Maximum titles combined into one request.
    /// MediaWiki allows 50 for regular clients and 500 for bots.
    pub max_titles_per_request: usize,

    /// Maximum batch calls in flight at once
    pub max_concurrent: usize,

    /// Minimum spacing between the starts of two outbound calls
    pub min_request_interval: Duration,

    /// Retry behaviour for transport and parse failures
    pub retry: RetryPolicy,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_titles_per_request: 50,
            max_concurrent: 2,
            min_request_interval: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }
}

impl BatcherConfig {
    /// Serial requests with generous spacing, for shared community wikis
    pub fn polite() -> Self {
        Self {
            max_titles_per_request: 50,
            max_concurrent: 1,
            min_request_interval: Duration::from_secs(1),
            retry: RetryPolicy {
                max_attempts: 6,
                ..RetryPolicy::default()
            },
        }
    }

    /// Higher limits for accounts holding the `apihighlimits` right
    pub fn bot() -> Self {
        Self {
            max_titles_per_request: 500,
            max_concurrent: 4,
            min_request_interval: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PAGEBATCH_MAX_TITLES") {
            if let Ok(n) = val.parse() {
                config.max_titles_per_request = n;
            }
        }

        if let Ok(val) = std::env::var("PAGEBATCH_MAX_CONCURRENT") {
            if let Ok(n) = val.parse() {
                config.max_concurrent = n;
            }
        }

        if let Ok(val) = std::env::var("PAGEBATCH_MIN_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.min_request_interval = Duration::from_millis(n);
            }
        }

        if let Ok(val) = std::env::var("PAGEBATCH_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                config.retry.max_attempts = n;
            }
        }

        config.sanitized()
    }

    /// Clamp values that would stall the batcher to their smallest usable setting
    pub fn sanitized(mut self) -> Self {
        self.max_titles_per_request = self.max_titles_per_request.max(1);
        self.max_concurrent = self.max_concurrent.max(1);
        self.retry.max_attempts = self.retry.max_attempts.max(1);
        self
    }
}
