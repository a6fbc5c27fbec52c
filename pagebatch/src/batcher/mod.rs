//! Request coalescing and continuation dispatch.
//!
//! A [`Batcher`] collects page requests during its scope and resolves them
//! together when the scope ends.
//!
//! # Architecture
//!
//! ```text
//! register("A", k1) ─┐
//! register("B", k2) ─┼──► PendingQueue   (distinct titles, first-seen order)
//! register("A", k3) ─┘         │
//!                         close() / Drop
//!                              │
//!                     ┌────────▼────────┐
//!                     │  chunk by cap   │ ← max_titles_per_request
//!                     └────────┬────────┘
//!                     ┌────────▼────────┐
//!                     │   Semaphore     │ ← max_concurrent
//!                     │   Throttle      │ ← min_request_interval
//!                     │   Retry         │ ← RetryPolicy
//!                     └────────┬────────┘
//!                              │ PageSource::fetch_pages
//!                     ┌────────▼────────┐
//!                     │ ordered dispatch│ → k1(A), k3(A), k2(B)
//!                     └────────┬────────┘
//!                              │ new registrations? → next pass
//! ```
//!
//! # Guarantees
//!
//! - Every accepted continuation runs exactly once, with a page or a
//!   [`FetchError`].
//! - Within a pass, continuations run in title accumulation order, and per
//!   title in registration order.
//! - Continuations may register more titles; they are resolved in a later
//!   pass of the same flush.
//! - Registering after the scope ended returns [`BatcherError::Closed`].

mod config;
mod metrics;
mod observer;
mod queue;
mod throttle;

pub use config::{BatcherConfig, RetryPolicy};
pub use metrics::{BatcherMetrics, MetricsSnapshot};
pub use observer::{BatchEvent, BatchObserver, NullObserver, TracingObserver};
pub use throttle::Throttle;

use queue::{Continuation, PendingQueue, PendingTitle};

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::client::{ClientConfig, MediaWikiClient};
use crate::error::{BatcherError, FetchError};
use crate::source::{Page, PageSet, PageSource};

type PanicPayload = Box<dyn Any + Send + 'static>;

/// Summary of one `close` or `abandon`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Drain-fetch-dispatch rounds
    pub passes: usize,
    /// Distinct outbound batches (retries not counted)
    pub batches: usize,
    /// Distinct titles resolved, summed over passes
    pub titles: usize,
    /// Continuations invoked
    pub continuations: usize,
    /// Continuations that received a page
    pub found: usize,
    /// Continuations that received `NotFound`
    pub not_found: usize,
    /// Continuations that received a transport or parse failure
    pub failed: usize,
    /// Continuations that received `Cancelled`
    pub cancelled: usize,
    /// Continuations that panicked
    pub panicked: usize,
}

impl FlushReport {
    /// Whether every continuation received content
    pub fn is_clean(&self) -> bool {
        self.continuations == self.found
    }

    fn count(&mut self, outcome: &Result<Page, FetchError>) {
        self.continuations += 1;
        match outcome {
            Ok(_) => self.found += 1,
            Err(FetchError::NotFound { .. }) => self.not_found += 1,
            Err(FetchError::Cancelled) => self.cancelled += 1,
            Err(_) => self.failed += 1,
        }
    }
}

struct State {
    queue: PendingQueue,
    open: bool,
}

/// Registration state shared between the batcher and its handles
struct Shared {
    state: Mutex<State>,
    metrics: Arc<BatcherMetrics>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave the queue half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register<F>(&self, title: String, continuation: F) -> Result<(), BatcherError>
    where
        F: FnOnce(Result<Page, FetchError>) + Send + 'static,
    {
        let mut state = self.lock();
        if !state.open {
            drop(state);
            self.metrics.record_rejected();
            return Err(BatcherError::Closed { title });
        }
        // Wrapped only once accepted, so a refused closure is never invoked.
        state
            .queue
            .push(title, Continuation::new(continuation, self.metrics.clone()));
        drop(state);
        self.metrics.record_registered();
        Ok(())
    }

    fn drain(&self) -> Vec<PendingTitle> {
        self.lock().queue.drain()
    }

    /// Close the scope if nothing is pending; returns false if work remains
    fn try_close(&self) -> bool {
        let mut state = self.lock();
        if state.queue.is_empty() {
            state.open = false;
            true
        } else {
            false
        }
    }

    fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }
}

/// Cloneable registration handle.
///
/// Handles let continuations register follow-up titles while a flush is
/// running. They cannot end the scope.
#[derive(Clone)]
pub struct BatcherHandle {
    shared: Arc<Shared>,
}

impl BatcherHandle {
    /// Request `title` and run `continuation` once it is resolved.
    ///
    /// Never blocks and performs no I/O.
    pub fn register<F>(&self, title: impl Into<String>, continuation: F) -> Result<(), BatcherError>
    where
        F: FnOnce(Result<Page, FetchError>) + Send + 'static,
    {
        self.shared.register(title.into(), continuation)
    }

    /// Number of distinct titles waiting for the next pass
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }
}

impl std::fmt::Debug for BatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatcherHandle")
            .field("open", &self.is_open())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Network side of the batcher: source, pacing, retries, observation
struct Engine<S> {
    source: S,
    config: BatcherConfig,
    throttle: Throttle,
    permits: Semaphore,
    observer: Arc<dyn BatchObserver>,
    metrics: Arc<BatcherMetrics>,
}

impl<S: PageSource> Engine<S> {
    /// Resolve everything pending, pass after pass, then close the scope
    async fn flush(&self, shared: &Shared) -> (FlushReport, Option<PanicPayload>) {
        let mut report = FlushReport::default();
        let mut panic = None;

        loop {
            let pending = shared.drain();
            if pending.is_empty() {
                if shared.try_close() {
                    break;
                }
                continue;
            }

            report.passes += 1;
            let pass = report.passes as u64;
            self.metrics.record_pass();

            let titles: Vec<String> = pending.iter().map(|p| p.title.clone()).collect();
            let cap = self.config.max_titles_per_request;
            let batches: Vec<_> = titles
                .chunks(cap)
                .enumerate()
                .map(|(batch, chunk)| self.resolve_batch(pass, batch, chunk))
                .collect();
            let results: Vec<Result<PageSet, FetchError>> = join_all(batches).await;
            report.batches += results.len();
            report.titles += titles.len();

            let mut dispatched = 0;
            for (i, entry) in pending.into_iter().enumerate() {
                let outcome = match &results[i / cap] {
                    Ok(set) => set.outcome(&entry.title),
                    Err(err) => Err(err.clone()),
                };
                for continuation in entry.continuations {
                    report.count(&outcome);
                    self.dispatch(&entry.title, continuation, outcome.clone(), &mut report, &mut panic);
                    dispatched += 1;
                }
            }

            self.observer.on_event(&BatchEvent::PassComplete {
                pass,
                titles: titles.len(),
                continuations: dispatched,
            });
        }

        (report, panic)
    }

    /// Resolve everything pending with `Cancelled`, then close the scope
    fn cancel(&self, shared: &Shared) -> (FlushReport, Option<PanicPayload>) {
        let mut report = FlushReport::default();
        let mut panic = None;

        loop {
            let pending = shared.drain();
            if pending.is_empty() {
                if shared.try_close() {
                    break;
                }
                continue;
            }

            report.passes += 1;
            report.titles += pending.len();
            let continuations: usize = pending.iter().map(|p| p.continuations.len()).sum();
            self.observer.on_event(&BatchEvent::Abandoned {
                titles: pending.len(),
                continuations,
            });
            self.metrics.record_cancelled(continuations);

            for entry in pending {
                for continuation in entry.continuations {
                    let outcome = Err(FetchError::Cancelled);
                    report.count(&outcome);
                    self.dispatch(&entry.title, continuation, outcome, &mut report, &mut panic);
                }
            }
        }

        (report, panic)
    }

    /// One outbound batch, retried on transport and parse failures
    async fn resolve_batch(&self, pass: u64, batch: usize, titles: &[String]) -> Result<PageSet, FetchError> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = {
                // The semaphore is never closed.
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| FetchError::Cancelled)?;

                self.observer.on_event(&BatchEvent::BatchSent {
                    pass,
                    batch,
                    attempt,
                    titles,
                });
                self.metrics.record_sent(titles.len(), attempt);
                self.source.fetch_pages(titles, &self.throttle).await
            };

            match result {
                Ok(set) => {
                    let found = titles.iter().filter(|t| set.get(t).is_some()).count();
                    let missing = titles.len() - found;
                    self.metrics.record_resolved(found, missing);
                    self.observer.on_event(&BatchEvent::BatchResolved {
                        pass,
                        batch,
                        found,
                        missing,
                    });
                    return Ok(set);
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.retry.delay_for(attempt - 1, error.retry_after());
                    self.metrics.record_retry();
                    self.observer.on_event(&BatchEvent::Retry {
                        pass,
                        batch,
                        attempt,
                        max_attempts,
                        delay,
                        error: &error,
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    self.metrics.record_batch_failed();
                    self.observer.on_event(&BatchEvent::BatchFailed {
                        pass,
                        batch,
                        titles: titles.len(),
                        error: &error,
                    });
                    return Err(error);
                }
            }
        }
    }

    /// Run one continuation, keeping the first panic for the caller
    fn dispatch(
        &self,
        title: &str,
        continuation: Continuation,
        outcome: Result<Page, FetchError>,
        report: &mut FlushReport,
        panic: &mut Option<PanicPayload>,
    ) {
        let result = catch_unwind(AssertUnwindSafe(move || continuation.invoke(outcome)));

        if let Err(payload) = result {
            report.panicked += 1;
            self.metrics.record_panicked();
            self.observer.on_event(&BatchEvent::ContinuationPanicked { title });
            panic.get_or_insert(payload);
        }
    }
}

/// Scoped page fetcher.
///
/// Requests registered while the batcher is open are resolved when it is
/// closed. The scope ends in one of three ways:
///
/// - [`close`](Self::close): fetch everything, dispatch, repeat until idle.
/// - [`abandon`](Self::abandon): resolve everything with
///   [`FetchError::Cancelled`] without touching the network.
/// - drop: inside a tokio runtime the flush continues on a background task;
///   outside one, pending requests are abandoned.
///
/// # Example
///
/// ```no_run
/// use pagebatch::{Batcher, BatcherConfig, ClientConfig};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let batcher = Batcher::open(ClientConfig::default(), BatcherConfig::default())?;
///
/// batcher.register("Balance", |result| match result {
///     Ok(page) => println!("{}", page.content),
///     Err(e) => eprintln!("{}", e),
/// })?;
///
/// let report = batcher.close().await;
/// assert_eq!(report.continuations, 1);
/// # Ok(())
/// # }
/// ```
pub struct Batcher<S: PageSource = MediaWikiClient> {
    shared: Arc<Shared>,
    engine: Arc<Engine<S>>,
    /// `close` has started flushing
    closing: bool,
    /// The scope ended through `close` or `abandon`
    finished: bool,
}

impl Batcher<MediaWikiClient> {
    /// Open a batcher backed by a MediaWiki HTTP client
    pub fn open(client: ClientConfig, config: BatcherConfig) -> Result<Self, FetchError> {
        Ok(Self::new(MediaWikiClient::new(client)?, config))
    }

    /// Open a batcher configured from `PAGEBATCH_*` environment variables
    pub fn from_env() -> Result<Self, FetchError> {
        Self::open(ClientConfig::from_env(), BatcherConfig::from_env())
    }
}

impl<S: PageSource> Batcher<S> {
    /// Create a batcher over any page source, logging through `tracing`
    pub fn new(source: S, config: BatcherConfig) -> Self {
        Self::with_observer(source, config, Arc::new(TracingObserver))
    }

    /// Create a batcher that reports diagnostics to `observer`
    pub fn with_observer(source: S, config: BatcherConfig, observer: Arc<dyn BatchObserver>) -> Self {
        let config = config.sanitized();
        let metrics = Arc::new(BatcherMetrics::new());

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: PendingQueue::new(),
                open: true,
            }),
            metrics: metrics.clone(),
        });

        let engine = Arc::new(Engine {
            throttle: Throttle::new(config.min_request_interval),
            permits: Semaphore::new(config.max_concurrent),
            source,
            config,
            observer,
            metrics,
        });

        Self {
            shared,
            engine,
            closing: false,
            finished: false,
        }
    }

    /// Request `title` and run `continuation` once it is resolved.
    ///
    /// Never blocks and performs no I/O; the request is sent on close.
    pub fn register<F>(&self, title: impl Into<String>, continuation: F) -> Result<(), BatcherError>
    where
        F: FnOnce(Result<Page, FetchError>) + Send + 'static,
    {
        self.handle().register(title, continuation)
    }

    /// A registration handle that can be moved into continuations
    pub fn handle(&self) -> BatcherHandle {
        BatcherHandle {
            shared: self.shared.clone(),
        }
    }

    /// Number of distinct titles waiting to be fetched
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.engine.config
    }

    pub fn metrics(&self) -> Arc<BatcherMetrics> {
        self.engine.metrics.clone()
    }

    /// Flush every pending request, then end the scope.
    ///
    /// Resolves once no titles remain, including titles registered by
    /// continuations during the flush. If a continuation panicked, the
    /// first panic is resumed after all others have run.
    ///
    /// If the returned future is dropped before it completes, in-flight and
    /// pending requests are resolved with [`FetchError::Cancelled`] and the
    /// scope still ends.
    pub async fn close(mut self) -> FlushReport {
        self.closing = true;
        let (report, panic) = self.engine.flush(&self.shared).await;
        self.finished = true;
        if let Some(payload) = panic {
            resume_unwind(payload);
        }
        report
    }

    /// Resolve every pending request with [`FetchError::Cancelled`] and end
    /// the scope without any network call.
    pub fn abandon(mut self) -> FlushReport {
        self.finished = true;
        let (report, panic) = self.engine.cancel(&self.shared);
        if let Some(payload) = panic {
            resume_unwind(payload);
        }
        report
    }

    /// Run `body` with a registration handle, then close.
    ///
    /// The flush happens whatever `body` returns, so an `Err` from the body
    /// still resolves every registered continuation.
    pub async fn scope<F, Fut, T>(self, body: F) -> (T, FlushReport)
    where
        F: FnOnce(BatcherHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        let output = body(self.handle()).await;
        let report = self.close().await;
        (output, report)
    }
}

impl<S: PageSource> Drop for Batcher<S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        if self.closing {
            // The close future was dropped mid-flush.
            let _ = self.engine.cancel(&self.shared);
            return;
        }

        let pending = self.shared.pending();
        if pending == 0 && self.shared.try_close() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                self.engine
                    .observer
                    .on_event(&BatchEvent::DeferredFlush { titles: pending });
                let engine = self.engine.clone();
                let shared = self.shared.clone();
                runtime.spawn(async move {
                    // Panics were reported to the observer; there is no caller to resume them in.
                    let _ = engine.flush(&shared).await;
                });
            }
            Err(_) => {
                let _ = self.engine.cancel(&self.shared);
            }
        }
    }
}

impl<S: PageSource> std::fmt::Debug for Batcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher")
            .field("config", &self.engine.config)
            .field("pending", &self.pending())
            .field("closing", &self.closing)
            .field("finished", &self.finished)
            .finish()
    }
}
