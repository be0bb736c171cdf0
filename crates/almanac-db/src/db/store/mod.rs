//! The persistence seam services are written against.
//!
//! A [`StoreTx`] is one transaction: every operation on it sees the writes
//! made earlier on the same handle, and nothing is visible to other
//! transactions until [`StoreTx::commit`]. Dropping a handle without
//! committing rolls it back.
//!
//! A caller holds at most one transaction per store at a time.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DbResult;
use crate::model::{
    event::{Event, LegacyEventKey, NewEvent},
    occurrence::{EventOccurrence, NewEventOccurrence},
    rule::{
        EventOverride, NewEventOverride, NewRecurrenceOverride, NewRecurrenceRule,
        RecurrenceOverride, RecurrenceRule, RuleDates,
    },
    source::{CalendarSource, NewCalendarSource},
};

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

pub trait EventStore: Send + Sync {
    type Tx: StoreTx;

    fn begin(&self) -> impl Future<Output = DbResult<Self::Tx>> + Send;
}

pub trait StoreTx: Send {
    fn commit(self) -> impl Future<Output = DbResult<()>> + Send;
    fn rollback(self) -> impl Future<Output = DbResult<()>> + Send;

    // Sources

    fn insert_source(
        &mut self,
        source: &NewCalendarSource,
    ) -> impl Future<Output = DbResult<CalendarSource>> + Send;
    fn source(&mut self, id: Uuid) -> impl Future<Output = DbResult<Option<CalendarSource>>> + Send;
    /// Reads a source and holds its row lock until the transaction ends.
    fn lock_source(
        &mut self,
        id: Uuid,
    ) -> impl Future<Output = DbResult<Option<CalendarSource>>> + Send;
    fn update_source(&mut self, source: &CalendarSource) -> impl Future<Output = DbResult<()>> + Send;
    /// Active sources due at `now` whose lock is absent or older than `stale_before`.
    fn due_sources(
        &mut self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> impl Future<Output = DbResult<Vec<CalendarSource>>> + Send;

    // Events

    fn insert_event(&mut self, event: &NewEvent) -> impl Future<Output = DbResult<Event>> + Send;
    fn event(&mut self, id: Uuid) -> impl Future<Output = DbResult<Option<Event>>> + Send;
    fn event_by_external_id(
        &mut self,
        source_id: Uuid,
        external_id: &str,
    ) -> impl Future<Output = DbResult<Option<Event>>> + Send;
    /// Oldest unsourced event matching the key.
    fn legacy_event(
        &mut self,
        key: LegacyEventKey<'_>,
    ) -> impl Future<Output = DbResult<Option<Event>>> + Send;
    fn update_event(&mut self, event: &Event) -> impl Future<Output = DbResult<()>> + Send;
    fn touch_event(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = DbResult<()>> + Send;
    fn source_events(
        &mut self,
        source_id: Uuid,
    ) -> impl Future<Output = DbResult<Vec<Event>>> + Send;
    /// Deletes events with their rules, overrides and occurrences.
    fn delete_events(&mut self, ids: &[Uuid]) -> impl Future<Output = DbResult<usize>> + Send;

    // Rules

    fn rule_for_event(
        &mut self,
        event_id: Uuid,
    ) -> impl Future<Output = DbResult<Option<RecurrenceRule>>> + Send;
    fn insert_rule(
        &mut self,
        rule: &NewRecurrenceRule,
    ) -> impl Future<Output = DbResult<RecurrenceRule>> + Send;
    fn update_rule(&mut self, rule: &RecurrenceRule) -> impl Future<Output = DbResult<()>> + Send;
    fn delete_rule(&mut self, id: Uuid) -> impl Future<Output = DbResult<()>> + Send;
    fn mark_rule_expanded(
        &mut self,
        id: Uuid,
        effective_until: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> impl Future<Output = DbResult<()>> + Send;
    fn rule_dates(&mut self, rule_id: Uuid) -> impl Future<Output = DbResult<RuleDates>> + Send;
    fn replace_rule_dates(
        &mut self,
        rule_id: Uuid,
        dates: &RuleDates,
    ) -> impl Future<Output = DbResult<()>> + Send;
    fn event_overrides(
        &mut self,
        rule_id: Uuid,
    ) -> impl Future<Output = DbResult<Vec<EventOverride>>> + Send;
    fn replace_event_overrides(
        &mut self,
        rule_id: Uuid,
        overrides: &[NewEventOverride],
    ) -> impl Future<Output = DbResult<()>> + Send;
    /// Pattern overrides ordered by priority, then creation.
    fn recurrence_overrides(
        &mut self,
        rule_id: Uuid,
    ) -> impl Future<Output = DbResult<Vec<RecurrenceOverride>>> + Send;
    fn insert_recurrence_override(
        &mut self,
        pattern: &NewRecurrenceOverride,
    ) -> impl Future<Output = DbResult<RecurrenceOverride>> + Send;

    // Occurrences

    /// Occurrences of an event ordered by start.
    fn occurrences(
        &mut self,
        event_id: Uuid,
    ) -> impl Future<Output = DbResult<Vec<EventOccurrence>>> + Send;
    /// Deletes every occurrence of the event and inserts `rows`.
    fn replace_occurrences(
        &mut self,
        event_id: Uuid,
        rows: &[NewEventOccurrence],
    ) -> impl Future<Output = DbResult<usize>> + Send;
    fn has_occurrence(
        &mut self,
        event_id: Uuid,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> impl Future<Output = DbResult<bool>> + Send;
}
