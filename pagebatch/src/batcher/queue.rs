//! Pending request queue.
//!
//! Holds the distinct titles registered since the last drain, in
//! first-registration order, each with its continuations in registration
//! order.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::metrics::BatcherMetrics;
use crate::error::FetchError;
use crate::source::Page;

type Callback = Box<dyn FnOnce(Result<Page, FetchError>) + Send + 'static>;

/// Callback invoked once with a page or the reason it could not be fetched.
///
/// Dropping a continuation that was never invoked runs it with
/// [`FetchError::Cancelled`], so a lost flush still resolves every request.
/// Both paths count as a dispatch in the batcher metrics.
pub struct Continuation {
    callback: Option<Callback>,
    metrics: Arc<BatcherMetrics>,
}

impl Continuation {
    pub fn new<F>(f: F, metrics: Arc<BatcherMetrics>) -> Self
    where
        F: FnOnce(Result<Page, FetchError>) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(f)),
            metrics,
        }
    }

    pub fn invoke(mut self, outcome: Result<Page, FetchError>) {
        if let Some(f) = self.callback.take() {
            self.metrics.record_dispatched();
            f(outcome);
        }
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        if let Some(f) = self.callback.take() {
            self.metrics.record_dispatched();
            self.metrics.record_cancelled(1);
            // May run during unwinding; a second panic would abort.
            let _ = catch_unwind(AssertUnwindSafe(|| f(Err(FetchError::Cancelled))));
        }
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

/// A title with every continuation waiting on it
#[derive(Debug)]
pub struct PendingTitle {
    pub title: String,
    pub continuations: Vec<Continuation>,
}

/// Insertion-ordered set of pending titles
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Vec<PendingTitle>,
    index: HashMap<String, usize>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a continuation for `title`, coalescing with an earlier entry
    pub fn push(&mut self, title: String, continuation: Continuation) {
        if let Some(&slot) = self.index.get(&title) {
            self.entries[slot].continuations.push(continuation);
            return;
        }

        self.index.insert(title.clone(), self.entries.len());
        self.entries.push(PendingTitle {
            title,
            continuations: vec![continuation],
        });
    }

    /// Take every pending title, leaving the queue empty
    pub fn drain(&mut self) -> Vec<PendingTitle> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }

    /// Number of distinct titles
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    fn noop() -> Continuation {
        Continuation::new(|_| {}, Arc::new(BatcherMetrics::new()))
    }

    #[test]
    fn test_push_coalesces_duplicates() {
        let mut queue = PendingQueue::new();
        queue.push("Balance".to_string(), noop());
        queue.push("Skill Cards".to_string(), noop());
        queue.push("Balance".to_string(), noop());

        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        assert_eq!(drained[0].title, "Balance");
        assert_eq!(drained[0].continuations.len(), 2);
        assert_eq!(drained[1].title, "Skill Cards");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_order_is_first_registration() {
        let mut queue = PendingQueue::new();
        for title in ["C", "A", "B", "A", "C"] {
            queue.push(title.to_string(), noop());
        }

        let titles: Vec<_> = queue.drain().into_iter().map(|p| p.title).collect();
        assert_eq!(titles, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_drain_resets_index() {
        let mut queue = PendingQueue::new();
        queue.push("A".to_string(), noop());
        queue.drain();

        queue.push("A".to_string(), noop());
        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].continuations.len(), 1);
    }

    #[test]
    fn test_dropped_continuation_is_cancelled() {
        let metrics = Arc::new(BatcherMetrics::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        metrics.record_registered();
        let cont = Continuation::new(move |outcome| sink.lock().unwrap().push(outcome), metrics.clone());
        drop(cont);

        assert_eq!(*seen.lock().unwrap(), vec![Err(FetchError::Cancelled)]);
        assert_eq!(metrics.outstanding(), 0);
        assert_eq!(metrics.snapshot().cancelled, 1);
        assert_eq!(metrics.snapshot().continuations_dispatched, 1);
    }

    #[test]
    fn test_invoked_continuation_runs_once() {
        let metrics = Arc::new(BatcherMetrics::new());
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        metrics.record_registered();
        let cont = Continuation::new(move |_| *sink.lock().unwrap() += 1, metrics.clone());
        cont.invoke(Err(FetchError::not_found("A")));

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(metrics.outstanding(), 0);
        assert_eq!(metrics.snapshot().cancelled, 0);
    }
}
