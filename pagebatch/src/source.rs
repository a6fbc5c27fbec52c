//! Page sources: anything that can resolve a batch of titles in one call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::batcher::Throttle;
use crate::error::FetchError;

/// Content of a page, as handed to continuations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    /// Title as it was registered
    pub requested: String,

    /// Canonical title after normalization and redirects
    pub title: String,

    /// Raw page source
    pub content: Arc<str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<u64>,
}

impl Page {
    pub fn new(requested: impl Into<String>, title: impl Into<String>, content: impl Into<Arc<str>>) -> Self {
        Self {
            requested: requested.into(),
            title: title.into(),
            content: content.into(),
            page_id: None,
            revision_id: None,
        }
    }

    /// Whether the requested title was rewritten to reach this page
    pub fn was_redirected(&self) -> bool {
        self.requested != self.title
    }
}

/// Pages found by one batch call, keyed by requested title.
///
/// A title that was asked for but is absent here did not resolve to a page.
#[derive(Debug, Clone, Default)]
pub struct PageSet {
    pages: HashMap<String, Page>,
}

impl PageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, page: Page) {
        self.pages.insert(page.requested.clone(), page);
    }

    pub fn get(&self, requested: &str) -> Option<&Page> {
        self.pages.get(requested)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Outcome for one requested title
    pub fn outcome(&self, requested: &str) -> Result<Page, FetchError> {
        self.pages
            .get(requested)
            .cloned()
            .ok_or_else(|| FetchError::not_found(requested))
    }
}

impl FromIterator<Page> for PageSet {
    fn from_iter<I: IntoIterator<Item = Page>>(iter: I) -> Self {
        let mut set = Self::new();
        for page in iter {
            set.insert(page);
        }
        set
    }
}

/// Resolves many titles with a single logical call
pub trait PageSource: Send + Sync + 'static {
    /// Fetch the current content of `titles`.
    ///
    /// Every outbound request, including follow-ups for partial results,
    /// must first wait on `throttle.acquire()`; the throttle is shared by all
    /// concurrent batches of a batcher.
    ///
    /// An `Err` fails the whole call and is subject to retry. Titles that do
    /// not exist are simply left out of the returned set.
    fn fetch_pages(
        &self,
        titles: &[String],
        throttle: &Throttle,
    ) -> impl Future<Output = Result<PageSet, FetchError>> + Send;
}

impl<S: PageSource> PageSource for Arc<S> {
    fn fetch_pages(
        &self,
        titles: &[String],
        throttle: &Throttle,
    ) -> impl Future<Output = Result<PageSet, FetchError>> + Send {
        (**self).fetch_pages(titles, throttle)
    }
}
