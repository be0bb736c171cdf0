use chrono::{DateTime, Utc};
use diesel::{pg::Pg, prelude::*};

use crate::db::{
    enums::{DeletionPolicy, SyncMode, SyncStatus},
    schema,
};

/// An external calendar feed an organization subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Identifiable, AsChangeset)]
#[diesel(table_name = schema::calendar_source)]
#[diesel(check_for_backend(Pg))]
#[diesel(treat_none_as_null = true)]
pub struct CalendarSource {
    pub id: uuid::Uuid,
    pub org_id: uuid::Uuid,
    pub category_id: uuid::Uuid,
    pub url: String,
    pub active: bool,
    pub fetch_interval_seconds: i64,
    pub deletion_policy: DeletionPolicy,
    pub sync_mode: SyncMode,
    pub horizon_days: i32,
    pub default_event_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified_header: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncStatus>,
    pub last_error: Option<String>,
    pub next_due_at: Option<DateTime<Utc>>,
    pub lock_owner: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarSource {
    /// Whether another worker holds a lock taken after `stale_before`.
    #[must_use]
    pub fn is_locked(&self, stale_before: DateTime<Utc>) -> bool {
        self.locked_at.is_some_and(|at| at > stale_before)
    }
}

/// Insert struct for registering a feed.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::calendar_source)]
pub struct NewCalendarSource {
    pub id: uuid::Uuid,
    pub org_id: uuid::Uuid,
    pub category_id: uuid::Uuid,
    pub url: String,
    pub active: bool,
    pub fetch_interval_seconds: i64,
    pub deletion_policy: DeletionPolicy,
    pub sync_mode: SyncMode,
    pub horizon_days: i32,
    pub default_event_type: Option<String>,
}

impl NewCalendarSource {
    /// An active mirror-mode delta source with the default cadence and horizon.
    #[must_use]
    pub fn new(org_id: uuid::Uuid, category_id: uuid::Uuid, url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            org_id,
            category_id,
            url: url.into(),
            active: true,
            fetch_interval_seconds: 6 * 60 * 60,
            deletion_policy: DeletionPolicy::Mirror,
            sync_mode: SyncMode::Delta,
            horizon_days: 180,
            default_event_type: None,
        }
    }
}
