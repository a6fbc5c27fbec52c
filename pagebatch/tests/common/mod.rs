//! Shared fixtures for batcher integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pagebatch::{
    BatchEvent, BatchObserver, BatcherConfig, FetchError, Page, PageSet, PageSource, RetryPolicy,
    Throttle,
};

/// In-memory wiki with scripted failures
#[derive(Default)]
pub struct MockWiki {
    pages: HashMap<String, String>,
    calls: Mutex<Vec<Vec<String>>>,
    scripted_failures: Mutex<VecDeque<FetchError>>,
    always_fail: Option<FetchError>,
    latency: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockWiki {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, title: &str, content: &str) -> Self {
        self.pages.insert(title.to_string(), content.to_string());
        self
    }

    /// Fail the next calls with these errors, in order
    pub fn failing_first(self, errors: Vec<FetchError>) -> Self {
        *self.scripted_failures.lock().unwrap() = errors.into();
        self
    }

    pub fn always_failing(mut self, error: FetchError) -> Self {
        self.always_fail = Some(error);
        self
    }

    /// Delay any batch whose first title is `title`
    pub fn with_latency(mut self, title: &str, latency: Duration) -> Self {
        self.latency.insert(title.to_string(), latency);
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl PageSource for MockWiki {
    async fn fetch_pages(&self, titles: &[String], throttle: &Throttle) -> Result<PageSet, FetchError> {
        throttle.acquire().await;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(titles.to_vec());

        let latency = titles
            .first()
            .and_then(|t| self.latency.get(t))
            .copied()
            .unwrap_or(Duration::from_millis(1));
        tokio::time::sleep(latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.scripted_failures.lock().unwrap().pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }
        if let Some(err) = &self.always_fail {
            return Err(err.clone());
        }

        Ok(titles
            .iter()
            .filter_map(|t| {
                self.pages
                    .get(t)
                    .map(|content| Page::new(t.as_str(), t.as_str(), content.as_str()))
            })
            .collect())
    }
}

pub type Outcome = Result<Page, FetchError>;

/// Collects continuation results in invocation order
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<(String, Outcome)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A continuation that records its outcome under `tag`
    pub fn sink(&self, tag: &str) -> impl FnOnce(Outcome) + Send + 'static {
        let seen = self.seen.clone();
        let tag = tag.to_string();
        move |outcome| seen.lock().unwrap().push((tag, outcome))
    }

    pub fn all(&self) -> Vec<(String, Outcome)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn tags(&self) -> Vec<String> {
        self.all().into_iter().map(|(tag, _)| tag).collect()
    }

    pub fn outcomes_for(&self, tag: &str) -> Vec<Outcome> {
        self.all()
            .into_iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, o)| o)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

/// Observer that keeps a short name for every event
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| *e == name).count()
    }
}

impl BatchObserver for RecordingObserver {
    fn on_event(&self, event: &BatchEvent<'_>) {
        let name = match event {
            BatchEvent::BatchSent { .. } => "sent",
            BatchEvent::BatchResolved { .. } => "resolved",
            BatchEvent::Retry { .. } => "retry",
            BatchEvent::BatchFailed { .. } => "failed",
            BatchEvent::PassComplete { .. } => "pass",
            BatchEvent::ContinuationPanicked { .. } => "panicked",
            BatchEvent::Abandoned { .. } => "abandoned",
            BatchEvent::DeferredFlush { .. } => "deferred",
        };
        self.events.lock().unwrap().push(name.to_string());
    }
}

/// Config with no pacing and millisecond backoff
pub fn fast_config(cap: usize) -> BatcherConfig {
    BatcherConfig {
        max_titles_per_request: cap,
        max_concurrent: 4,
        min_request_interval: Duration::ZERO,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
        },
    }
}
