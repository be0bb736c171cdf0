//! In-process store used by service tests and local runs without a database.
//!
//! The whole state sits behind one async mutex. A transaction holds the lock
//! for its lifetime and works on a copy; commit writes the copy back. That
//! makes transactions fully serializable, and a dropped transaction simply
//! discards its copy.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use almanac_core::time::now;

use super::{EventStore, StoreTx};
use crate::error::{DbError, DbResult};
use crate::model::{
    event::{Event, LegacyEventKey, NewEvent},
    occurrence::{EventOccurrence, NewEventOccurrence},
    rule::{
        EventOverride, NewEventOverride, NewRecurrenceOverride, NewRecurrenceRule,
        RecurrenceOverride, RecurrenceRule, RuleDates,
    },
    source::{CalendarSource, NewCalendarSource},
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    sources: BTreeMap<Uuid, CalendarSource>,
    events: BTreeMap<Uuid, Event>,
    rules: BTreeMap<Uuid, RecurrenceRule>,
    exdates: BTreeMap<Uuid, BTreeSet<DateTime<Utc>>>,
    rdates: BTreeMap<Uuid, BTreeSet<DateTime<Utc>>>,
    event_overrides: BTreeMap<Uuid, EventOverride>,
    recurrence_overrides: BTreeMap<Uuid, RecurrenceOverride>,
    occurrences: BTreeMap<Uuid, EventOccurrence>,
}

impl MemoryState {
    fn remove_rule(&mut self, rule_id: Uuid) {
        self.rules.remove(&rule_id);
        self.exdates.remove(&rule_id);
        self.rdates.remove(&rule_id);
        self.event_overrides.retain(|_, o| o.rule_id != rule_id);
        self.recurrence_overrides.retain(|_, o| o.rule_id != rule_id);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct MemoryTx {
    committed: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

impl EventStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> DbResult<MemoryTx> {
        let committed = Arc::clone(&self.state).lock_owned().await;
        let work = committed.clone();
        Ok(MemoryTx { committed, work })
    }
}

impl StoreTx for MemoryTx {
    async fn commit(mut self) -> DbResult<()> {
        *self.committed = self.work;
        Ok(())
    }

    async fn rollback(self) -> DbResult<()> {
        Ok(())
    }

    async fn insert_source(&mut self, source: &NewCalendarSource) -> DbResult<CalendarSource> {
        if self.work.sources.contains_key(&source.id) {
            return Err(DbError::Conflict("calendar_source_pkey"));
        }
        let at = now();
        let row = CalendarSource {
            id: source.id,
            org_id: source.org_id,
            category_id: source.category_id,
            url: source.url.clone(),
            active: source.active,
            fetch_interval_seconds: source.fetch_interval_seconds,
            deletion_policy: source.deletion_policy,
            sync_mode: source.sync_mode,
            horizon_days: source.horizon_days,
            default_event_type: source.default_event_type.clone(),
            etag: None,
            last_modified_header: None,
            content_hash: None,
            last_fetched_at: None,
            last_sync_status: None,
            last_error: None,
            next_due_at: None,
            lock_owner: None,
            locked_at: None,
            created_at: at,
            updated_at: at,
        };
        self.work.sources.insert(row.id, row.clone());
        Ok(row)
    }

    async fn source(&mut self, id: Uuid) -> DbResult<Option<CalendarSource>> {
        Ok(self.work.sources.get(&id).cloned())
    }

    async fn lock_source(&mut self, id: Uuid) -> DbResult<Option<CalendarSource>> {
        Ok(self.work.sources.get(&id).cloned())
    }

    async fn update_source(&mut self, source: &CalendarSource) -> DbResult<()> {
        let row = self
            .work
            .sources
            .get_mut(&source.id)
            .ok_or(DbError::NotFound {
                entity: "calendar source",
                id: source.id,
            })?;
        *row = CalendarSource {
            created_at: row.created_at,
            ..source.clone()
        };
        Ok(())
    }

    async fn due_sources(
        &mut self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> DbResult<Vec<CalendarSource>> {
        let mut due: Vec<CalendarSource> = self
            .work
            .sources
            .values()
            .filter(|s| s.active)
            .filter(|s| s.next_due_at.is_none_or(|at| at <= now))
            .filter(|s| !s.is_locked(stale_before))
            .cloned()
            .collect();
        // NULLs last, as in an ascending SQL sort
        due.sort_by_key(|s| (s.next_due_at.is_none(), s.next_due_at, s.id));
        Ok(due)
    }

    async fn insert_event(&mut self, new_event: &NewEvent) -> DbResult<Event> {
        if let (Some(source_id), Some(external_id)) = (new_event.source_id, &new_event.external_id)
            && self.work.events.values().any(|e| {
                e.source_id == Some(source_id) && e.external_id.as_ref() == Some(external_id)
            })
        {
            return Err(DbError::Conflict("event_source_external_id_key"));
        }
        let row = Event {
            id: new_event.id,
            org_id: new_event.org_id,
            category_id: new_event.category_id,
            title: new_event.title.clone(),
            description: new_event.description.clone(),
            location: new_event.location.clone(),
            start_at: new_event.start_at,
            end_at: new_event.end_at,
            all_day: new_event.all_day,
            timezone: new_event.timezone.clone(),
            source_id: new_event.source_id,
            external_id: new_event.external_id.clone(),
            revision: new_event.revision,
            source_modified_at: new_event.source_modified_at,
            source_url: new_event.source_url.clone(),
            event_type: new_event.event_type.clone(),
            edit_history: new_event.edit_history.clone(),
            created_at: now(),
            updated_at: new_event.updated_at,
        };
        self.work.events.insert(row.id, row.clone());
        Ok(row)
    }

    async fn event(&mut self, id: Uuid) -> DbResult<Option<Event>> {
        Ok(self.work.events.get(&id).cloned())
    }

    async fn event_by_external_id(
        &mut self,
        source_id: Uuid,
        external_id: &str,
    ) -> DbResult<Option<Event>> {
        Ok(self
            .work
            .events
            .values()
            .find(|e| e.source_id == Some(source_id) && e.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn legacy_event(&mut self, key: LegacyEventKey<'_>) -> DbResult<Option<Event>> {
        Ok(self
            .work
            .events
            .values()
            .filter(|e| key.matches(e))
            .min_by_key(|e| (e.created_at, e.id))
            .cloned())
    }

    async fn update_event(&mut self, changed: &Event) -> DbResult<()> {
        if let (Some(source_id), Some(external_id)) = (changed.source_id, &changed.external_id)
            && self.work.events.values().any(|e| {
                e.id != changed.id
                    && e.source_id == Some(source_id)
                    && e.external_id.as_ref() == Some(external_id)
            })
        {
            return Err(DbError::Conflict("event_source_external_id_key"));
        }
        let row = self.work.events.get_mut(&changed.id).ok_or(DbError::NotFound {
            entity: "event",
            id: changed.id,
        })?;
        *row = Event {
            created_at: row.created_at,
            ..changed.clone()
        };
        Ok(())
    }

    async fn touch_event(&mut self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let row = self
            .work
            .events
            .get_mut(&id)
            .ok_or(DbError::NotFound { entity: "event", id })?;
        row.updated_at = at;
        Ok(())
    }

    async fn source_events(&mut self, source_id: Uuid) -> DbResult<Vec<Event>> {
        Ok(self
            .work
            .events
            .values()
            .filter(|e| e.source_id == Some(source_id))
            .cloned()
            .collect())
    }

    async fn delete_events(&mut self, ids: &[Uuid]) -> DbResult<usize> {
        let state = &mut self.work;
        let mut deleted = 0;
        for id in ids {
            if state.events.remove(id).is_none() {
                continue;
            }
            deleted += 1;
            let rule_ids: Vec<Uuid> = state
                .rules
                .values()
                .filter(|r| r.event_id == *id)
                .map(|r| r.id)
                .collect();
            for rule_id in rule_ids {
                state.remove_rule(rule_id);
            }
            state.occurrences.retain(|_, o| o.event_id != *id);
        }
        Ok(deleted)
    }

    async fn rule_for_event(&mut self, event_id: Uuid) -> DbResult<Option<RecurrenceRule>> {
        Ok(self
            .work
            .rules
            .values()
            .find(|r| r.event_id == event_id)
            .cloned())
    }

    async fn insert_rule(&mut self, rule: &NewRecurrenceRule) -> DbResult<RecurrenceRule> {
        if !self.work.events.contains_key(&rule.event_id) {
            return Err(DbError::NotFound {
                entity: "event",
                id: rule.event_id,
            });
        }
        if self.work.rules.values().any(|r| r.event_id == rule.event_id) {
            return Err(DbError::Conflict("recurrence_rule_event_id_key"));
        }
        let row = RecurrenceRule {
            id: rule.id,
            event_id: rule.event_id,
            frequency: rule.frequency,
            repeat_interval: rule.repeat_interval,
            start_at: rule.start_at,
            repeat_count: rule.repeat_count,
            until_at: rule.until_at,
            effective_until: None,
            by_day: rule.by_day.clone(),
            by_month: rule.by_month.clone(),
            by_month_day: rule.by_month_day.clone(),
            by_set_pos: rule.by_set_pos.clone(),
            week_start: rule.week_start.clone(),
            last_expanded_at: None,
            created_at: now(),
        };
        self.work.rules.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_rule(&mut self, rule: &RecurrenceRule) -> DbResult<()> {
        let row = self.work.rules.get_mut(&rule.id).ok_or(DbError::NotFound {
            entity: "recurrence rule",
            id: rule.id,
        })?;
        *row = RecurrenceRule {
            created_at: row.created_at,
            ..rule.clone()
        };
        Ok(())
    }

    async fn delete_rule(&mut self, id: Uuid) -> DbResult<()> {
        self.work.remove_rule(id);
        Ok(())
    }

    async fn mark_rule_expanded(
        &mut self,
        id: Uuid,
        effective_until: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let row = self.work.rules.get_mut(&id).ok_or(DbError::NotFound {
            entity: "recurrence rule",
            id,
        })?;
        row.effective_until = effective_until;
        row.last_expanded_at = Some(at);
        Ok(())
    }

    async fn rule_dates(&mut self, rule_id: Uuid) -> DbResult<RuleDates> {
        let collect = |dates: Option<&BTreeSet<DateTime<Utc>>>| {
            dates.map(|d| d.iter().copied().collect()).unwrap_or_default()
        };
        Ok(RuleDates {
            exdates: collect(self.work.exdates.get(&rule_id)),
            rdates: collect(self.work.rdates.get(&rule_id)),
        })
    }

    async fn replace_rule_dates(&mut self, rule_id: Uuid, dates: &RuleDates) -> DbResult<()> {
        if !self.work.rules.contains_key(&rule_id) {
            return Err(DbError::NotFound {
                entity: "recurrence rule",
                id: rule_id,
            });
        }
        self.work
            .exdates
            .insert(rule_id, dates.exdates.iter().copied().collect());
        self.work
            .rdates
            .insert(rule_id, dates.rdates.iter().copied().collect());
        Ok(())
    }

    async fn event_overrides(&mut self, rule_id: Uuid) -> DbResult<Vec<EventOverride>> {
        let mut rows: Vec<EventOverride> = self
            .work
            .event_overrides
            .values()
            .filter(|o| o.rule_id == rule_id)
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.recurrence_at);
        Ok(rows)
    }

    async fn replace_event_overrides(
        &mut self,
        rule_id: Uuid,
        overrides: &[NewEventOverride],
    ) -> DbResult<()> {
        let mut seen = BTreeSet::new();
        if overrides.iter().any(|o| !seen.insert(o.recurrence_at)) {
            return Err(DbError::Conflict("event_override_rule_id_recurrence_at_key"));
        }
        self.work.event_overrides.retain(|_, o| o.rule_id != rule_id);
        let at = now();
        for o in overrides {
            self.work.event_overrides.insert(
                o.id,
                EventOverride {
                    id: o.id,
                    rule_id,
                    recurrence_at: o.recurrence_at,
                    new_start: o.new_start,
                    new_end: o.new_end,
                    new_title: o.new_title.clone(),
                    new_description: o.new_description.clone(),
                    new_location: o.new_location.clone(),
                    created_at: at,
                },
            );
        }
        Ok(())
    }

    async fn recurrence_overrides(&mut self, rule_id: Uuid) -> DbResult<Vec<RecurrenceOverride>> {
        let mut rows: Vec<RecurrenceOverride> = self
            .work
            .recurrence_overrides
            .values()
            .filter(|o| o.rule_id == rule_id)
            .cloned()
            .collect();
        rows.sort_by_key(|o| (o.priority, o.created_at, o.id));
        Ok(rows)
    }

    async fn insert_recurrence_override(
        &mut self,
        pattern: &NewRecurrenceOverride,
    ) -> DbResult<RecurrenceOverride> {
        if !self.work.rules.contains_key(&pattern.rule_id) {
            return Err(DbError::NotFound {
                entity: "recurrence rule",
                id: pattern.rule_id,
            });
        }
        let row = RecurrenceOverride {
            id: pattern.id,
            rule_id: pattern.rule_id,
            frequency: pattern.frequency,
            repeat_interval: pattern.repeat_interval,
            by_day: pattern.by_day.clone(),
            by_month: pattern.by_month.clone(),
            by_month_day: pattern.by_month_day.clone(),
            new_start_time: pattern.new_start_time,
            new_end_time: pattern.new_end_time,
            new_title: pattern.new_title.clone(),
            new_description: pattern.new_description.clone(),
            new_location: pattern.new_location.clone(),
            priority: pattern.priority,
            created_at: now(),
        };
        self.work.recurrence_overrides.insert(row.id, row.clone());
        Ok(row)
    }

    async fn occurrences(&mut self, event_id: Uuid) -> DbResult<Vec<EventOccurrence>> {
        let mut rows: Vec<EventOccurrence> = self
            .work
            .occurrences
            .values()
            .filter(|o| o.event_id == event_id)
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.start_at);
        Ok(rows)
    }

    async fn replace_occurrences(
        &mut self,
        event_id: Uuid,
        rows: &[NewEventOccurrence],
    ) -> DbResult<usize> {
        if !self.work.events.contains_key(&event_id) {
            return Err(DbError::NotFound {
                entity: "event",
                id: event_id,
            });
        }
        let mut seen = BTreeSet::new();
        if rows.iter().any(|o| !seen.insert(o.start_at)) {
            return Err(DbError::Conflict("event_occurrence_event_id_start_at_key"));
        }
        self.work.occurrences.retain(|_, o| o.event_id != event_id);
        let at = now();
        for row in rows {
            self.work.occurrences.insert(
                row.id,
                EventOccurrence {
                    id: row.id,
                    event_id,
                    org_id: row.org_id,
                    category_id: row.category_id,
                    title: row.title.clone(),
                    description: row.description.clone(),
                    location: row.location.clone(),
                    start_at: row.start_at,
                    end_at: row.end_at,
                    all_day: row.all_day,
                    kind: row.kind,
                    source_url: row.source_url.clone(),
                    event_saved_at: row.event_saved_at,
                    created_at: at,
                },
            );
        }
        Ok(rows.len())
    }

    async fn has_occurrence(
        &mut self,
        event_id: Uuid,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        Ok(self
            .work
            .occurrences
            .values()
            .any(|o| o.event_id == event_id && o.start_at == start_at && o.end_at == end_at))
    }
}
