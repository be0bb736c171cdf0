use chrono::{DateTime, Utc};
use diesel::{pg::Pg, prelude::*};

use crate::db::schema;

/// Location stored when a feed entry does not name one.
pub const DEFAULT_LOCATION: &str = "no location recorded";

/// A schedulable item: one-off, or the parent of a recurrence rule.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Identifiable, AsChangeset)]
#[diesel(table_name = schema::event)]
#[diesel(check_for_backend(Pg))]
#[diesel(treat_none_as_null = true)]
pub struct Event {
    pub id: uuid::Uuid,
    pub org_id: uuid::Uuid,
    pub category_id: uuid::Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    /// IANA zone the event's wall-clock times are defined in.
    pub timezone: String,
    pub source_id: Option<uuid::Uuid>,
    /// Feed UID.
    pub external_id: Option<String>,
    /// Feed SEQUENCE.
    pub revision: i64,
    pub source_modified_at: Option<DateTime<Utc>>,
    pub source_url: Option<String>,
    pub event_type: Option<String>,
    pub edit_history: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Nominal length, never negative.
    #[must_use]
    pub fn duration(&self) -> chrono::TimeDelta {
        (self.end_at - self.start_at).max(chrono::TimeDelta::zero())
    }
}

/// Insert struct for creating new events
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::event)]
pub struct NewEvent {
    pub id: uuid::Uuid,
    pub org_id: uuid::Uuid,
    pub category_id: uuid::Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    pub timezone: String,
    pub source_id: Option<uuid::Uuid>,
    pub external_id: Option<String>,
    pub revision: i64,
    pub source_modified_at: Option<DateTime<Utc>>,
    pub source_url: Option<String>,
    pub event_type: Option<String>,
    pub edit_history: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Identity used to adopt a manually entered event into a feed.
#[derive(Debug, Clone, Copy)]
pub struct LegacyEventKey<'a> {
    pub org_id: uuid::Uuid,
    pub title: &'a str,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub location: &'a str,
}

impl LegacyEventKey<'_> {
    /// Matches events with neither a source nor an external id.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        event.source_id.is_none()
            && event.external_id.is_none()
            && event.org_id == self.org_id
            && event.title == self.title
            && event.start_at == self.start_at
            && event.end_at == self.end_at
            && event.location == self.location
    }
}
