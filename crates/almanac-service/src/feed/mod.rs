//! Subscribed calendar feeds: retrieval, import and the per-source sync cycle.

pub mod fetch;
pub mod import;
pub mod sync;

pub use fetch::{FeedBody, FeedFetcher, FetchRequest, FetchResponse, HttpFetcher, normalize_feed_url};
pub use import::{ImportOptions, ImportSummary, import_feed};
pub use sync::{SyncOptions, SyncOutcome, Synchronizer};
