//! The synchronization cycle of one calendar source.
//!
//! A run locks the source row, fetches the feed conditionally, imports it when
//! its content changed and records the result on the source. The lock is a
//! pair of columns on the row, taken and released in short transactions of
//! their own, so a crashed worker's lock goes stale instead of blocking the
//! source forever.

use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use almanac_core::config::SyncConfig;
use almanac_core::time;
use almanac_db::db::enums::{SyncMode, SyncStatus};
use almanac_db::db::store::{EventStore, StoreTx};
use almanac_db::model::source::CalendarSource;

use super::fetch::{FeedBody, FeedFetcher, FetchRequest, FetchResponse};
use super::import::{ImportOptions, ImportSummary, import_feed};
use crate::error::SyncError;
use crate::occurrence::ExpansionTrace;

/// Longest error message kept on a source.
const MAX_ERROR_LEN: usize = 500;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub worker_id: String,
    /// Age after which another worker's lock is ignored.
    pub lock_timeout: TimeDelta,
    pub max_entry_age_days: u32,
    /// Sources synchronized at once by `sync_due`; each run holds at most one
    /// store connection at a time.
    pub max_concurrent: usize,
    pub trace: ExpansionTrace,
}

impl SyncOptions {
    #[must_use]
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            lock_timeout: TimeDelta::minutes(30),
            max_entry_age_days: 365,
            max_concurrent: 4,
            trace: ExpansionTrace::default(),
        }
    }

    /// Builds options from the sync settings; `max_concurrent` should match the
    /// size of the store's connection pool.
    #[must_use]
    pub fn from_config(config: &SyncConfig, max_concurrent: usize, trace: ExpansionTrace) -> Self {
        Self {
            worker_id: config.worker_id.clone(),
            lock_timeout: i64::try_from(config.lock_timeout_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::minutes(30)),
            max_entry_age_days: config.max_entry_age_days,
            max_concurrent,
            trace,
        }
    }

    fn actor(&self) -> String {
        format!("sync:{}", self.worker_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another worker holds the source; nothing was written.
    Locked,
    Inactive,
    /// The server or the content hash reported no change.
    NotModified,
    Synced(ImportSummary),
}

/// What a run produced before the source row is finalized.
enum RunResult {
    NotModified,
    Unchanged(FeedBody, String),
    Imported(ImportSummary, FeedBody, String),
}

#[must_use]
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

pub struct Synchronizer<S, F> {
    store: S,
    fetcher: F,
    options: SyncOptions,
}

impl<S: EventStore, F: FeedFetcher> Synchronizer<S, F> {
    pub const fn new(store: S, fetcher: F, options: SyncOptions) -> Self {
        Self {
            store,
            fetcher,
            options,
        }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// ## Summary
    /// Runs one synchronization of a source.
    ///
    /// Returns `Locked` without writing anything when another worker holds a
    /// fresh lock, and `Inactive` for a disabled source. Whatever happens after
    /// the lock is taken, the outcome is recorded on the source and the lock is
    /// released.
    ///
    /// ## Errors
    /// Fetch and import failures are returned after being recorded on the
    /// source. A missing source is `SYNC_SOURCE_NOT_FOUND`.
    #[tracing::instrument(skip(self), fields(worker = %self.options.worker_id))]
    pub async fn sync_source(&self, id: Uuid) -> Result<SyncOutcome, SyncError> {
        let Some(source) = self.acquire(id).await? else {
            return Ok(SyncOutcome::Locked);
        };
        if !source.active {
            return Ok(SyncOutcome::Inactive);
        }

        let result = self.run(&source).await;
        if let Err(error) = &result {
            tracing::warn!(code = error.code(), %error, "Sync failed");
        }
        if let Err(finalize_error) = self.finalize(&source, &result).await {
            if let Err(error) = &result {
                tracing::error!(
                    code = error.code(),
                    %error,
                    %finalize_error,
                    "Failed to record sync failure"
                );
            }
            return Err(finalize_error);
        }

        Ok(match result? {
            RunResult::NotModified | RunResult::Unchanged(..) => SyncOutcome::NotModified,
            RunResult::Imported(summary, ..) => SyncOutcome::Synced(summary),
        })
    }

    /// Takes the lock. `None` when another worker holds it; inactive sources
    /// are returned untouched.
    async fn acquire(&self, id: Uuid) -> Result<Option<CalendarSource>, SyncError> {
        let now = time::now();
        let mut tx = self.store.begin().await?;
        let Some(mut source) = tx.lock_source(id).await? else {
            tx.rollback().await?;
            return Err(SyncError::SourceNotFound(id));
        };

        if !source.active {
            tx.rollback().await?;
            tracing::debug!("Source is inactive");
            return Ok(Some(source));
        }
        if source.is_locked(now - self.options.lock_timeout) {
            tx.rollback().await?;
            tracing::info!(
                owner = source.lock_owner.as_deref().unwrap_or("unknown"),
                "Source is locked by another worker"
            );
            return Ok(None);
        }

        if let Some(owner) = &source.lock_owner {
            tracing::warn!(owner = %owner, locked_at = ?source.locked_at, "Taking over stale lock");
        }
        source.lock_owner = Some(self.options.worker_id.clone());
        source.locked_at = Some(now);
        source.updated_at = now;
        tx.update_source(&source).await?;
        tx.commit().await?;

        Ok(Some(source))
    }

    async fn run(&self, source: &CalendarSource) -> Result<RunResult, SyncError> {
        let response = self
            .fetcher
            .fetch(FetchRequest {
                url: &source.url,
                etag: source.etag.as_deref(),
                last_modified: source.last_modified_header,
            })
            .await?;

        let body = match response {
            FetchResponse::NotModified => {
                tracing::debug!("Feed not modified");
                return Ok(RunResult::NotModified);
            }
            FetchResponse::Body(body) => body,
        };

        let hash = content_hash(&body.text);
        if source.sync_mode == SyncMode::Delta && source.content_hash.as_deref() == Some(hash.as_str()) {
            tracing::debug!("Feed content unchanged");
            return Ok(RunResult::Unchanged(body, hash));
        }

        let options = ImportOptions {
            actor: self.options.actor(),
            now: time::now(),
            max_entry_age_days: self.options.max_entry_age_days,
            trace: self.options.trace.clone(),
        };
        let summary = import_feed(&self.store, source, &body.text, &options).await?;

        Ok(RunResult::Imported(summary, body, hash))
    }

    /// Records the run on the source and releases the lock if it is still ours.
    async fn finalize(
        &self,
        locked: &CalendarSource,
        result: &Result<RunResult, SyncError>,
    ) -> Result<(), SyncError> {
        let now = time::now();
        let mut tx = self.store.begin().await?;
        let Some(mut source) = tx.lock_source(locked.id).await? else {
            tx.rollback().await?;
            return Err(SyncError::SourceNotFound(locked.id));
        };

        source.last_fetched_at = Some(now);
        source.next_due_at = Some(next_due(&source, now));
        match result {
            Ok(run) => {
                let (status, body, hash) = match run {
                    RunResult::NotModified => (SyncStatus::NotModified, None, None),
                    RunResult::Unchanged(body, hash) => (SyncStatus::NotModified, Some(body), Some(hash)),
                    RunResult::Imported(_, body, hash) => (SyncStatus::Ok, Some(body), Some(hash)),
                };
                if let Some(body) = body {
                    if body.etag.is_some() {
                        source.etag.clone_from(&body.etag);
                    }
                    source.last_modified_header = body.last_modified.or(source.last_modified_header);
                }
                if let Some(hash) = hash {
                    source.content_hash = Some(hash.clone());
                }
                source.last_sync_status = Some(status);
                source.last_error = None;
            }
            Err(error) => {
                source.last_sync_status = Some(SyncStatus::Error);
                source.last_error = Some(truncate_error(&format!("{}: {error}", error.code())));
            }
        }

        if holds_lock(&source, locked) {
            source.lock_owner = None;
            source.locked_at = None;
        } else {
            tracing::warn!(owner = ?source.lock_owner, "Lock was taken over during the run");
        }
        source.updated_at = now;
        tx.update_source(&source).await?;
        tx.commit().await?;

        Ok(())
    }

    /// ## Summary
    /// Synchronizes every due source, at most `max_concurrent` at a time.
    ///
    /// ## Errors
    /// Fails only if the due sources cannot be read; per-source failures are
    /// returned alongside the source id.
    #[tracing::instrument(skip(self))]
    pub async fn sync_due(&self) -> Result<Vec<(Uuid, Result<SyncOutcome, SyncError>)>, SyncError> {
        let now = time::now();
        let mut tx = self.store.begin().await?;
        let due = tx.due_sources(now, now - self.options.lock_timeout).await?;
        tx.rollback().await?;

        tracing::debug!(count = due.len(), "Syncing due sources");

        Ok(stream::iter(due)
            .map(|source| async move { (source.id, self.sync_source(source.id).await) })
            .buffer_unordered(self.options.max_concurrent.max(1))
            .collect()
            .await)
    }

    /// ## Summary
    /// Removes every event of a source and deactivates it.
    ///
    /// ## Errors
    /// Returns `SYNC_SOURCE_NOT_FOUND` for an unknown source or a store error.
    #[tracing::instrument(skip(self))]
    pub async fn delete_source_events(&self, id: Uuid) -> Result<Vec<Uuid>, SyncError> {
        let now = time::now();
        let mut tx = self.store.begin().await?;
        let Some(mut source) = tx.lock_source(id).await? else {
            tx.rollback().await?;
            return Err(SyncError::SourceNotFound(id));
        };

        let ids: Vec<Uuid> = tx
            .source_events(id)
            .await?
            .into_iter()
            .map(|event| event.id)
            .collect();
        tx.delete_events(&ids).await?;

        source.active = false;
        source.next_due_at = None;
        source.updated_at = now;
        tx.update_source(&source).await?;
        tx.commit().await?;

        tracing::info!(deleted = ids.len(), "Removed source events");

        Ok(ids)
    }
}

fn holds_lock(current: &CalendarSource, locked: &CalendarSource) -> bool {
    current.lock_owner == locked.lock_owner && current.locked_at == locked.locked_at
}

/// When the source is next due after a run finishing at `now`.
#[must_use]
pub fn next_due(source: &CalendarSource, now: DateTime<Utc>) -> DateTime<Utc> {
    now + TimeDelta::seconds(source.fetch_interval_seconds)
}
