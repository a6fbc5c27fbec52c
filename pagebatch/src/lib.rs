//! pagebatch
//!
//! Coalescing page-content fetcher for MediaWiki-style APIs.
//!
//! Callers open a [`Batcher`], register page titles together with a
//! continuation, and close it. On close the batcher fetches every title with
//! as few requests as the API allows, then runs each continuation exactly
//! once with the page content or a classified [`FetchError`].
//!
//! ```no_run
//! use pagebatch::{Batcher, BatcherConfig, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let batcher = Batcher::open(ClientConfig::default(), BatcherConfig::polite())?;
//!
//!     for title in ["Balance", "Skill Cards"] {
//!         batcher.register(title, move |result| match result {
//!             Ok(page) => println!("{}: {} bytes", page.title, page.content.len()),
//!             Err(e) => eprintln!("{}: {}", title, e),
//!         })?;
//!     }
//!
//!     let report = batcher.close().await;
//!     println!("{} requests in {} batches", report.continuations, report.batches);
//!     Ok(())
//! }
//! ```

pub mod batcher;
pub mod client;
pub mod error;
pub mod source;
pub mod types;

pub use batcher::{
    BatchEvent, BatchObserver, Batcher, BatcherConfig, BatcherHandle, BatcherMetrics, FlushReport,
    MetricsSnapshot, NullObserver, RetryPolicy, Throttle, TracingObserver,
};
pub use client::{ClientConfig, MediaWikiClient};
pub use error::{BatcherError, FetchError};
pub use source::{Page, PageSet, PageSource};
