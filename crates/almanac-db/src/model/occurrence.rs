use chrono::{DateTime, Utc};
use diesel::{pg::Pg, prelude::*};

use crate::db::{enums::OccurrenceKind, schema};

/// One concrete, resolved instance of an event.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = schema::event_occurrence)]
#[diesel(check_for_backend(Pg))]
#[diesel(belongs_to(super::event::Event, foreign_key = event_id))]
pub struct EventOccurrence {
    pub id: uuid::Uuid,
    pub event_id: uuid::Uuid,
    pub org_id: uuid::Uuid,
    pub category_id: uuid::Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    pub kind: OccurrenceKind,
    pub source_url: Option<String>,
    /// The generating event's `updated_at` when this row was written.
    pub event_saved_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable)]
#[diesel(table_name = schema::event_occurrence)]
pub struct NewEventOccurrence {
    pub id: uuid::Uuid,
    pub event_id: uuid::Uuid,
    pub org_id: uuid::Uuid,
    pub category_id: uuid::Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    pub kind: OccurrenceKind,
    pub source_url: Option<String>,
    pub event_saved_at: DateTime<Utc>,
}
