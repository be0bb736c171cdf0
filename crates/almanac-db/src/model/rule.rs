use chrono::{DateTime, NaiveTime, Utc};
use diesel::{pg::Pg, prelude::*};

use crate::db::{enums::RuleFrequency, schema};

/// The repetition definition of a recurring event.
///
/// `until_at` is the boundary the source declared; expansion records the
/// boundary it actually used in `effective_until` and never touches `until_at`.
#[derive(
    Debug, Clone, PartialEq, Eq, Queryable, Selectable, Identifiable, Associations, AsChangeset,
)]
#[diesel(table_name = schema::recurrence_rule)]
#[diesel(check_for_backend(Pg))]
#[diesel(belongs_to(super::event::Event, foreign_key = event_id))]
#[diesel(treat_none_as_null = true)]
pub struct RecurrenceRule {
    pub id: uuid::Uuid,
    pub event_id: uuid::Uuid,
    pub frequency: RuleFrequency,
    pub repeat_interval: i32,
    pub start_at: DateTime<Utc>,
    pub repeat_count: Option<i32>,
    pub until_at: Option<DateTime<Utc>>,
    pub effective_until: Option<DateTime<Utc>>,
    pub by_day: Vec<String>,
    pub by_month: Vec<i16>,
    pub by_month_day: Vec<i16>,
    pub by_set_pos: Vec<i32>,
    pub week_start: Option<String>,
    pub last_expanded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::recurrence_rule)]
pub struct NewRecurrenceRule {
    pub id: uuid::Uuid,
    pub event_id: uuid::Uuid,
    pub frequency: RuleFrequency,
    pub repeat_interval: i32,
    pub start_at: DateTime<Utc>,
    pub repeat_count: Option<i32>,
    pub until_at: Option<DateTime<Utc>>,
    pub by_day: Vec<String>,
    pub by_month: Vec<i16>,
    pub by_month_day: Vec<i16>,
    pub by_set_pos: Vec<i32>,
    pub week_start: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::recurrence_exdate)]
pub struct NewRecurrenceExdate {
    pub id: uuid::Uuid,
    pub rule_id: uuid::Uuid,
    pub exdate: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::recurrence_rdate)]
pub struct NewRecurrenceRdate {
    pub id: uuid::Uuid,
    pub rule_id: uuid::Uuid,
    pub rdate: DateTime<Utc>,
}

/// Excluded and included instants of a rule, each ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDates {
    pub exdates: Vec<DateTime<Utc>>,
    pub rdates: Vec<DateTime<Utc>>,
}

/// Replacement of the single occurrence originally starting at `recurrence_at`.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = schema::event_override)]
#[diesel(check_for_backend(Pg))]
#[diesel(belongs_to(RecurrenceRule, foreign_key = rule_id))]
pub struct EventOverride {
    pub id: uuid::Uuid,
    pub rule_id: uuid::Uuid,
    pub recurrence_at: DateTime<Utc>,
    pub new_start: Option<DateTime<Utc>>,
    pub new_end: Option<DateTime<Utc>>,
    pub new_title: Option<String>,
    pub new_description: Option<String>,
    pub new_location: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::event_override)]
pub struct NewEventOverride {
    pub id: uuid::Uuid,
    pub rule_id: uuid::Uuid,
    pub recurrence_at: DateTime<Utc>,
    pub new_start: Option<DateTime<Utc>>,
    pub new_end: Option<DateTime<Utc>>,
    pub new_title: Option<String>,
    pub new_description: Option<String>,
    pub new_location: Option<String>,
}

/// Replacement applied to every occurrence a secondary pattern also produces.
///
/// Times are time-of-day only and land on the matched occurrence's local date.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = schema::recurrence_override)]
#[diesel(check_for_backend(Pg))]
#[diesel(belongs_to(RecurrenceRule, foreign_key = rule_id))]
pub struct RecurrenceOverride {
    pub id: uuid::Uuid,
    pub rule_id: uuid::Uuid,
    pub frequency: RuleFrequency,
    pub repeat_interval: i32,
    pub by_day: Vec<String>,
    pub by_month: Vec<i16>,
    pub by_month_day: Vec<i16>,
    pub new_start_time: Option<NaiveTime>,
    pub new_end_time: Option<NaiveTime>,
    pub new_title: Option<String>,
    pub new_description: Option<String>,
    pub new_location: Option<String>,
    /// Higher wins when several patterns match one occurrence.
    pub priority: i16,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::recurrence_override)]
pub struct NewRecurrenceOverride {
    pub id: uuid::Uuid,
    pub rule_id: uuid::Uuid,
    pub frequency: RuleFrequency,
    pub repeat_interval: i32,
    pub by_day: Vec<String>,
    pub by_month: Vec<i16>,
    pub by_month_day: Vec<i16>,
    pub new_start_time: Option<NaiveTime>,
    pub new_end_time: Option<NaiveTime>,
    pub new_title: Option<String>,
    pub new_description: Option<String>,
    pub new_location: Option<String>,
    pub priority: i16,
}
