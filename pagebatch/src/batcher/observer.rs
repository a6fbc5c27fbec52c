//! Diagnostic events emitted while a batcher flushes.
//!
//! The batcher never logs directly: it reports [`BatchEvent`]s to an injected
//! [`BatchObserver`]. [`TracingObserver`] is the default and forwards each
//! event to `tracing` at the event's level.

use std::time::Duration;

use tracing::{debug, error, info, trace, warn, Level};

use crate::error::FetchError;

/// Something that happened during a flush
#[derive(Debug, Clone)]
pub enum BatchEvent<'a> {
    /// An outbound call is about to start
    BatchSent {
        pass: u64,
        batch: usize,
        attempt: u32,
        titles: &'a [String],
    },

    /// An outbound call returned a usable response
    BatchResolved {
        pass: u64,
        batch: usize,
        found: usize,
        missing: usize,
    },

    /// An attempt failed and another one is scheduled
    Retry {
        pass: u64,
        batch: usize,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: &'a FetchError,
    },

    /// Every attempt failed; the batch's continuations get `error`
    BatchFailed {
        pass: u64,
        batch: usize,
        titles: usize,
        error: &'a FetchError,
    },

    /// All continuations of a pass have run
    PassComplete {
        pass: u64,
        titles: usize,
        continuations: usize,
    },

    /// A continuation panicked; the remaining ones still run
    ContinuationPanicked { title: &'a str },

    /// Pending requests were resolved with a cancellation
    Abandoned { titles: usize, continuations: usize },

    /// The batcher was dropped without closing; a background flush took over
    DeferredFlush { titles: usize },
}

impl BatchEvent<'_> {
    /// Severity of the event
    pub fn level(&self) -> Level {
        match self {
            Self::BatchSent { .. } | Self::BatchResolved { .. } | Self::PassComplete { .. } => {
                Level::DEBUG
            }
            Self::Retry { .. } | Self::Abandoned { .. } | Self::DeferredFlush { .. } => {
                Level::WARN
            }
            Self::BatchFailed { .. } | Self::ContinuationPanicked { .. } => Level::ERROR,
        }
    }
}

/// Receiver of batcher diagnostics
pub trait BatchObserver: Send + Sync {
    fn on_event(&self, event: &BatchEvent<'_>);
}

/// Emit a `tracing` event at a level chosen at runtime
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {{
        let level: Level = $level;
        if level == Level::ERROR {
            error!($($arg)+)
        } else if level == Level::WARN {
            warn!($($arg)+)
        } else if level == Level::INFO {
            info!($($arg)+)
        } else if level == Level::DEBUG {
            debug!($($arg)+)
        } else {
            trace!($($arg)+)
        }
    }};
}

/// Forwards events to `tracing` at [`BatchEvent::level`]
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BatchObserver for TracingObserver {
    fn on_event(&self, event: &BatchEvent<'_>) {
        let level = event.level();
        match event {
            BatchEvent::BatchSent {
                pass,
                batch,
                attempt,
                titles,
            } => event_at!(
                level,
                pass,
                batch,
                attempt,
                titles = titles.len(),
                first = titles.first().map(String::as_str).unwrap_or(""),
                "Batch sent"
            ),
            BatchEvent::BatchResolved {
                pass,
                batch,
                found,
                missing,
            } => event_at!(level, pass, batch, found, missing, "Batch resolved"),
            BatchEvent::Retry {
                pass,
                batch,
                attempt,
                max_attempts,
                delay,
                error,
            } => event_at!(
                level,
                pass,
                batch,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retry {} of {}",
                attempt,
                max_attempts.saturating_sub(1)
            ),
            BatchEvent::BatchFailed {
                pass,
                batch,
                titles,
                error,
            } => event_at!(level, pass, batch, titles, error = %error, "Batch failed after retries"),
            BatchEvent::PassComplete {
                pass,
                titles,
                continuations,
            } => event_at!(level, pass, titles, continuations, "Flush pass complete"),
            BatchEvent::ContinuationPanicked { title } => {
                event_at!(level, title, "Continuation panicked")
            }
            BatchEvent::Abandoned {
                titles,
                continuations,
            } => event_at!(level, titles, continuations, "Pending requests abandoned"),
            BatchEvent::DeferredFlush { titles } => {
                event_at!(level, titles, "Batcher dropped while open; flushing in background")
            }
        }
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl BatchObserver for NullObserver {
    fn on_event(&self, _event: &BatchEvent<'_>) {}
}
