//! HTTP client for the MediaWiki Action API.
//!
//! Fetches the latest revision content of many titles with one
//! `action=query&prop=revisions` call, following `continue` markers until the
//! result is complete and resolving normalized and redirected titles back to
//! the titles that were asked for.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use crate::batcher::Throttle;
use crate::error::FetchError;
use crate::source::{Page, PageSet, PageSource};
use crate::types::mediawiki::{PageEntry, QueryResponse, TitleResolver};

/// Default endpoint
pub const DEFAULT_API_URL: &str = "https://yugipedia.com/api.php";

/// Library token sent when no User-Agent is configured.
///
/// Wikimedia-style etiquette policies expect contact details; deployments
/// should set `PAGEBATCH_USER_AGENT` to something like
/// `mybot/1.0 (mailto:ops@example.org) pagebatch/0.1`.
pub const DEFAULT_USER_AGENT: &str = concat!("pagebatch/", env!("CARGO_PKG_VERSION"));

/// Upper bound on `continue` round trips for a single batch
const MAX_CONTINUATIONS: usize = 32;

/// Separator MediaWiki accepts in place of `|` when a value contains a pipe
const UNIT_SEPARATOR: char = '\u{1f}';

/// Client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Full URL of `api.php`
    pub api_url: String,

    /// Value of the `User-Agent` header
    pub user_agent: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// `maxlag` parameter; the server refuses work while replicas lag more
    /// than this many seconds
    pub maxlag: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            maxlag: Some(5),
        }
    }
}

impl ClientConfig {
    /// Config pointing at another endpoint, other settings default
    pub fn with_url(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Self::default()
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: std::env::var("PAGEBATCH_API_URL").unwrap_or(defaults.api_url),
            user_agent: std::env::var("PAGEBATCH_USER_AGENT").unwrap_or(defaults.user_agent),
            timeout: std::env::var("PAGEBATCH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            maxlag: match std::env::var("PAGEBATCH_MAXLAG") {
                Ok(v) if v.eq_ignore_ascii_case("off") => None,
                Ok(v) => v.parse().ok().or(defaults.maxlag),
                Err(_) => defaults.maxlag,
            },
        }
    }
}

/// MediaWiki page-content client
#[derive(Debug, Clone)]
pub struct MediaWikiClient {
    client: Client,
    config: ClientConfig,
}

impl MediaWikiClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Result<Self, FetchError> {
        info!(url = %config.api_url, user_agent = %config.user_agent, "Creating MediaWiki client");

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    /// Get the API endpoint
    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch the latest content of every title in one logical query, unpaced
    pub async fn query_pages(&self, titles: &[String]) -> Result<PageSet, FetchError> {
        self.query_pages_paced(titles, &Throttle::disabled()).await
    }

    /// Fetch the latest content of every title, waiting on `throttle` before
    /// the first request and before every continuation request
    #[instrument(skip(self, titles, throttle), fields(titles = titles.len()))]
    pub async fn query_pages_paced(
        &self,
        titles: &[String],
        throttle: &Throttle,
    ) -> Result<PageSet, FetchError> {
        if titles.is_empty() {
            return Ok(PageSet::new());
        }

        let joined = join_titles(titles);
        let mut resolver = TitleResolver::new();
        let mut entries: HashMap<String, PageEntry> = HashMap::new();
        let mut continuation = BTreeMap::new();

        for round in 0..MAX_CONTINUATIONS {
            throttle.acquire().await;
            let response = self.send_query(&joined, &continuation).await?;
            // A request whose titles are all empty yields only `batchcomplete`.
            let Some(body) = response.query else {
                if response.batchcomplete && response.continuation.is_none() {
                    debug!(round, "Response carries no pages");
                    return Ok(build_page_set(titles, &resolver, &entries));
                }
                return Err(FetchError::parse("response has neither `query` nor `error`"));
            };

            resolver.absorb(&body);
            for page in body.pages {
                merge_entry(&mut entries, page);
            }

            match response.continuation {
                Some(next) => {
                    debug!(round, params = ?next, "Following continuation");
                    continuation = next;
                }
                None => return Ok(build_page_set(titles, &resolver, &entries)),
            }
        }

        warn!(rounds = MAX_CONTINUATIONS, "Continuation did not terminate");
        Err(FetchError::parse(format!(
            "result still incomplete after {} continuations",
            MAX_CONTINUATIONS
        )))
    }

    /// Issue one GET and classify the outcome
    async fn send_query(
        &self,
        titles: &str,
        continuation: &BTreeMap<String, String>,
    ) -> Result<QueryResponse, FetchError> {
        let params = query_params(titles, self.config.maxlag, continuation);
        let response = self
            .client
            .get(&self.config.api_url)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        let retry_after = retry_after(response.headers());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "MediaWiki returned error status");
            return Err(FetchError::throttled(
                format!("HTTP {}: {}", status, snippet(&body)),
                retry_after,
            ));
        }

        let text = response.text().await?;
        let parsed: QueryResponse = serde_json::from_str(&text)
            .map_err(|e| FetchError::parse(format!("{}: {}", e, snippet(&text))))?;

        if let Some(err) = &parsed.error {
            let message = format!("API error {}: {}", err.code, err.info);
            if err.is_transient() {
                return Err(FetchError::throttled(message, retry_after));
            }
            return Err(FetchError::parse(message));
        }

        Ok(parsed)
    }
}

impl PageSource for MediaWikiClient {
    async fn fetch_pages(&self, titles: &[String], throttle: &Throttle) -> Result<PageSet, FetchError> {
        self.query_pages_paced(titles, throttle).await
    }
}

/// Build the query string for a content fetch
pub fn query_params(
    titles: &str,
    maxlag: Option<u32>,
    continuation: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = [
        ("action", "query"),
        ("prop", "revisions"),
        ("rvprop", "ids|content"),
        ("rvslots", "main"),
        ("redirects", "1"),
        ("format", "json"),
        ("formatversion", "2"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    params.push(("titles".to_string(), titles.to_string()));
    if let Some(lag) = maxlag {
        params.push(("maxlag".to_string(), lag.to_string()));
    }
    for (k, v) in continuation {
        params.push((k.clone(), v.clone()));
    }
    params
}

/// Join titles into one multi-value parameter
pub fn join_titles(titles: &[String]) -> String {
    if titles.iter().any(|t| t.contains('|')) {
        let mut joined = String::from(UNIT_SEPARATOR);
        joined.push_str(&titles.join(&UNIT_SEPARATOR.to_string()));
        joined
    } else {
        titles.join("|")
    }
}

/// Keep the entry that carries content when a page shows up in several rounds
fn merge_entry(entries: &mut HashMap<String, PageEntry>, page: PageEntry) {
    let has_content = entries
        .get(&page.title)
        .is_some_and(|existing| existing.content().is_some());
    if !has_content {
        entries.insert(page.title.clone(), page);
    }
}

fn build_page_set(
    titles: &[String],
    resolver: &TitleResolver,
    entries: &HashMap<String, PageEntry>,
) -> PageSet {
    let mut set = PageSet::new();
    for requested in titles {
        let resolved = resolver.resolve(requested);
        let Some(entry) = entries.get(&resolved) else {
            debug!(title = %requested, "Title absent from response");
            continue;
        };
        if entry.missing || entry.invalid {
            debug!(
                title = %requested,
                reason = entry.invalidreason.as_deref().unwrap_or("missing"),
                "Page does not exist"
            );
            continue;
        }
        let Some(content) = entry.content() else {
            debug!(title = %requested, "Page has no revision content");
            continue;
        };

        set.insert(Page {
            requested: requested.clone(),
            title: entry.title.clone(),
            content: content.into(),
            page_id: entry.pageid,
            revision_id: entry.revision_id(),
        });
    }
    set
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn snippet(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
