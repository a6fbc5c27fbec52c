//! MediaWiki Action API types.
//!
//! Based on the `action=query` documentation with `formatversion=2`:
//! https://www.mediawiki.org/wiki/API:Query
//!
//! Only the pieces needed to fetch page content are modelled.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

/// Maximum redirect hops followed when resolving a requested title
pub const MAX_REDIRECT_HOPS: usize = 8;

/// Response body of `action=query`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    /// True when every requested module returned its full result
    #[serde(default)]
    pub batchcomplete: bool,

    /// Parameters to merge into the next request when the result is partial
    #[serde(rename = "continue", default)]
    pub continuation: Option<BTreeMap<String, String>>,

    /// Query payload (absent when the request failed)
    #[serde(default)]
    pub query: Option<QueryBody>,

    /// API-level error
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// The `query` object
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryBody {
    /// Titles rewritten to their canonical form (case, underscores)
    #[serde(default)]
    pub normalized: Vec<TitleMapping>,

    /// Redirects followed because of `redirects=1`
    #[serde(default)]
    pub redirects: Vec<TitleMapping>,

    /// One entry per distinct resolved title
    #[serde(default)]
    pub pages: Vec<PageEntry>,
}

/// A `from` → `to` title rewrite
#[derive(Debug, Clone, Deserialize)]
pub struct TitleMapping {
    pub from: String,
    pub to: String,
}

/// A page entry inside `query.pages`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageEntry {
    #[serde(default)]
    pub pageid: Option<u64>,

    #[serde(default)]
    pub ns: Option<i64>,

    #[serde(default)]
    pub title: String,

    /// The title is valid but no page exists
    #[serde(default)]
    pub missing: bool,

    /// The title cannot exist (illegal characters, empty, ...)
    #[serde(default)]
    pub invalid: bool,

    #[serde(default)]
    pub invalidreason: Option<String>,

    /// Revisions requested through `prop=revisions`; empty on partial results
    #[serde(default)]
    pub revisions: Vec<Revision>,
}

impl PageEntry {
    /// Latest revision content, from the main slot or the pre-MCR field
    pub fn content(&self) -> Option<&str> {
        let revision = self.revisions.first()?;
        revision
            .slots
            .as_ref()
            .and_then(|slots| slots.main.as_ref())
            .and_then(|main| main.content.as_deref())
            .or(revision.content.as_deref())
    }

    pub fn revision_id(&self) -> Option<u64> {
        self.revisions.first().and_then(|r| r.revid)
    }
}

/// A single revision
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Revision {
    #[serde(default)]
    pub revid: Option<u64>,

    #[serde(default)]
    pub slots: Option<RevisionSlots>,

    /// Content on wikis predating multi-content revisions
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevisionSlots {
    #[serde(default)]
    pub main: Option<Slot>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Slot {
    #[serde(default)]
    pub contentmodel: Option<String>,

    #[serde(default)]
    pub content: Option<String>,
}

/// The `error` object returned instead of `query`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: String,

    #[serde(default)]
    pub info: String,
}

impl ApiError {
    /// Errors that signal a temporary server condition rather than a bad request
    pub fn is_transient(&self) -> bool {
        matches!(self.code.as_str(), "maxlag" | "ratelimited" | "readonly")
            || self.code.starts_with("internal_api_error")
    }
}

/// Title rewrites accumulated across continued responses
#[derive(Debug, Clone, Default)]
pub struct TitleResolver {
    normalized: HashMap<String, String>,
    redirects: HashMap<String, String>,
}

impl TitleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the rewrites carried by one response
    pub fn absorb(&mut self, body: &QueryBody) {
        for m in &body.normalized {
            self.normalized.insert(m.from.clone(), m.to.clone());
        }
        for m in &body.redirects {
            self.redirects.insert(m.from.clone(), m.to.clone());
        }
    }

    /// Final title a requested title lands on
    pub fn resolve(&self, requested: &str) -> String {
        let mut title = self
            .normalized
            .get(requested)
            .cloned()
            .unwrap_or_else(|| requested.to_string());

        for _ in 0..MAX_REDIRECT_HOPS {
            match self.redirects.get(&title) {
                Some(next) if *next != title => title = next.clone(),
                _ => break,
            }
        }
        title
    }
}
