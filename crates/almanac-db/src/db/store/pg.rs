//! `PostgreSQL` store over a bb8 pool of `diesel-async` connections.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::PooledConnection;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};
use uuid::Uuid;

use super::{EventStore, StoreTx};
use crate::db::connection::DbPool;
use crate::db::schema::{
    calendar_source, event, event_occurrence, event_override, recurrence_exdate,
    recurrence_override, recurrence_rdate, recurrence_rule,
};
use crate::error::{DbError, DbResult};
use crate::model::{
    event::{Event, LegacyEventKey, NewEvent},
    occurrence::{EventOccurrence, NewEventOccurrence},
    rule::{
        EventOverride, NewEventOverride, NewRecurrenceExdate, NewRecurrenceOverride,
        NewRecurrenceRdate, NewRecurrenceRule, RecurrenceOverride, RecurrenceRule, RuleDates,
    },
    source::{CalendarSource, NewCalendarSource},
};

/// Rows per multi-row `INSERT`; the widest row binds 13 parameters and
/// `PostgreSQL` accepts at most 65535 per statement.
const INSERT_CHUNK_ROWS: usize = 4_000;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// An open transaction on a connection checked out of the pool.
///
/// The connection is owned so the transaction can outlive the borrow of the
/// store. If it is dropped mid-transaction, the pool discards it as broken and
/// the server rolls the transaction back.
pub struct PgTx {
    conn: PooledConnection<'static, AsyncPgConnection>,
}

impl PgTx {
    fn conn(&mut self) -> &mut AsyncPgConnection {
        &mut self.conn
    }
}

impl EventStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> DbResult<PgTx> {
        let mut conn = self.pool.get_owned().await?;
        AnsiTransactionManager::begin_transaction(&mut *conn).await?;
        Ok(PgTx { conn })
    }
}

fn expect_one(affected: usize, entity: &'static str, id: Uuid) -> DbResult<()> {
    if affected == 0 {
        return Err(DbError::NotFound { entity, id });
    }
    Ok(())
}

impl StoreTx for PgTx {
    async fn commit(mut self) -> DbResult<()> {
        AnsiTransactionManager::commit_transaction(self.conn()).await?;
        Ok(())
    }

    async fn rollback(mut self) -> DbResult<()> {
        AnsiTransactionManager::rollback_transaction(self.conn()).await?;
        Ok(())
    }

    async fn insert_source(&mut self, source: &NewCalendarSource) -> DbResult<CalendarSource> {
        Ok(diesel::insert_into(calendar_source::table)
            .values(source)
            .returning(CalendarSource::as_returning())
            .get_result(self.conn())
            .await?)
    }

    async fn source(&mut self, id: Uuid) -> DbResult<Option<CalendarSource>> {
        Ok(calendar_source::table
            .find(id)
            .select(CalendarSource::as_select())
            .first(self.conn())
            .await
            .optional()?)
    }

    async fn lock_source(&mut self, id: Uuid) -> DbResult<Option<CalendarSource>> {
        Ok(calendar_source::table
            .find(id)
            .select(CalendarSource::as_select())
            .for_update()
            .first(self.conn())
            .await
            .optional()?)
    }

    async fn update_source(&mut self, source: &CalendarSource) -> DbResult<()> {
        let affected = diesel::update(calendar_source::table.find(source.id))
            .set(source)
            .execute(self.conn())
            .await?;
        expect_one(affected, "calendar source", source.id)
    }

    async fn due_sources(
        &mut self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> DbResult<Vec<CalendarSource>> {
        Ok(calendar_source::table
            .filter(calendar_source::active.eq(true))
            .filter(
                calendar_source::next_due_at
                    .is_null()
                    .or(calendar_source::next_due_at.le(now)),
            )
            .filter(
                calendar_source::locked_at
                    .is_null()
                    .or(calendar_source::locked_at.le(stale_before)),
            )
            .order((
                calendar_source::next_due_at.asc(),
                calendar_source::id.asc(),
            ))
            .select(CalendarSource::as_select())
            .load(self.conn())
            .await?)
    }

    async fn insert_event(&mut self, new_event: &NewEvent) -> DbResult<Event> {
        Ok(diesel::insert_into(event::table)
            .values(new_event)
            .returning(Event::as_returning())
            .get_result(self.conn())
            .await?)
    }

    async fn event(&mut self, id: Uuid) -> DbResult<Option<Event>> {
        Ok(event::table
            .find(id)
            .select(Event::as_select())
            .first(self.conn())
            .await
            .optional()?)
    }

    async fn event_by_external_id(
        &mut self,
        source_id: Uuid,
        external_id: &str,
    ) -> DbResult<Option<Event>> {
        Ok(event::table
            .filter(event::source_id.eq(source_id))
            .filter(event::external_id.eq(external_id))
            .select(Event::as_select())
            .first(self.conn())
            .await
            .optional()?)
    }

    async fn legacy_event(&mut self, key: LegacyEventKey<'_>) -> DbResult<Option<Event>> {
        Ok(event::table
            .filter(event::source_id.is_null())
            .filter(event::external_id.is_null())
            .filter(event::org_id.eq(key.org_id))
            .filter(event::title.eq(key.title))
            .filter(event::start_at.eq(key.start_at))
            .filter(event::end_at.eq(key.end_at))
            .filter(event::location.eq(key.location))
            .order((event::created_at.asc(), event::id.asc()))
            .select(Event::as_select())
            .first(self.conn())
            .await
            .optional()?)
    }

    async fn update_event(&mut self, changed: &Event) -> DbResult<()> {
        let affected = diesel::update(event::table.find(changed.id))
            .set(changed)
            .execute(self.conn())
            .await?;
        expect_one(affected, "event", changed.id)
    }

    async fn touch_event(&mut self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let affected = diesel::update(event::table.find(id))
            .set(event::updated_at.eq(at))
            .execute(self.conn())
            .await?;
        expect_one(affected, "event", id)
    }

    async fn source_events(&mut self, source_id: Uuid) -> DbResult<Vec<Event>> {
        Ok(event::table
            .filter(event::source_id.eq(source_id))
            .order(event::id.asc())
            .select(Event::as_select())
            .load(self.conn())
            .await?)
    }

    async fn delete_events(&mut self, ids: &[Uuid]) -> DbResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(diesel::delete(event::table.filter(event::id.eq_any(ids)))
            .execute(self.conn())
            .await?)
    }

    async fn rule_for_event(&mut self, event_id: Uuid) -> DbResult<Option<RecurrenceRule>> {
        Ok(recurrence_rule::table
            .filter(recurrence_rule::event_id.eq(event_id))
            .select(RecurrenceRule::as_select())
            .first(self.conn())
            .await
            .optional()?)
    }

    async fn insert_rule(&mut self, rule: &NewRecurrenceRule) -> DbResult<RecurrenceRule> {
        Ok(diesel::insert_into(recurrence_rule::table)
            .values(rule)
            .returning(RecurrenceRule::as_returning())
            .get_result(self.conn())
            .await?)
    }

    async fn update_rule(&mut self, rule: &RecurrenceRule) -> DbResult<()> {
        let affected = diesel::update(recurrence_rule::table.find(rule.id))
            .set(rule)
            .execute(self.conn())
            .await?;
        expect_one(affected, "recurrence rule", rule.id)
    }

    async fn delete_rule(&mut self, id: Uuid) -> DbResult<()> {
        diesel::delete(recurrence_rule::table.find(id))
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn mark_rule_expanded(
        &mut self,
        id: Uuid,
        effective_until: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let affected = diesel::update(recurrence_rule::table.find(id))
            .set((
                recurrence_rule::effective_until.eq(effective_until),
                recurrence_rule::last_expanded_at.eq(Some(at)),
            ))
            .execute(self.conn())
            .await?;
        expect_one(affected, "recurrence rule", id)
    }

    async fn rule_dates(&mut self, rule_id: Uuid) -> DbResult<RuleDates> {
        let exdates = recurrence_exdate::table
            .filter(recurrence_exdate::rule_id.eq(rule_id))
            .order(recurrence_exdate::exdate.asc())
            .select(recurrence_exdate::exdate)
            .load(self.conn())
            .await?;
        let rdates = recurrence_rdate::table
            .filter(recurrence_rdate::rule_id.eq(rule_id))
            .order(recurrence_rdate::rdate.asc())
            .select(recurrence_rdate::rdate)
            .load(self.conn())
            .await?;
        Ok(RuleDates { exdates, rdates })
    }

    async fn replace_rule_dates(&mut self, rule_id: Uuid, dates: &RuleDates) -> DbResult<()> {
        diesel::delete(recurrence_exdate::table.filter(recurrence_exdate::rule_id.eq(rule_id)))
            .execute(self.conn())
            .await?;
        diesel::delete(recurrence_rdate::table.filter(recurrence_rdate::rule_id.eq(rule_id)))
            .execute(self.conn())
            .await?;

        let exdates: Vec<NewRecurrenceExdate> = dates
            .exdates
            .iter()
            .map(|exdate| NewRecurrenceExdate {
                id: Uuid::now_v7(),
                rule_id,
                exdate: *exdate,
            })
            .collect();
        for chunk in exdates.chunks(INSERT_CHUNK_ROWS) {
            diesel::insert_into(recurrence_exdate::table)
                .values(chunk)
                .on_conflict_do_nothing()
                .execute(self.conn())
                .await?;
        }

        let rdates: Vec<NewRecurrenceRdate> = dates
            .rdates
            .iter()
            .map(|rdate| NewRecurrenceRdate {
                id: Uuid::now_v7(),
                rule_id,
                rdate: *rdate,
            })
            .collect();
        for chunk in rdates.chunks(INSERT_CHUNK_ROWS) {
            diesel::insert_into(recurrence_rdate::table)
                .values(chunk)
                .on_conflict_do_nothing()
                .execute(self.conn())
                .await?;
        }
        Ok(())
    }

    async fn event_overrides(&mut self, rule_id: Uuid) -> DbResult<Vec<EventOverride>> {
        Ok(event_override::table
            .filter(event_override::rule_id.eq(rule_id))
            .order(event_override::recurrence_at.asc())
            .select(EventOverride::as_select())
            .load(self.conn())
            .await?)
    }

    async fn replace_event_overrides(
        &mut self,
        rule_id: Uuid,
        overrides: &[NewEventOverride],
    ) -> DbResult<()> {
        diesel::delete(event_override::table.filter(event_override::rule_id.eq(rule_id)))
            .execute(self.conn())
            .await?;
        for chunk in overrides.chunks(INSERT_CHUNK_ROWS) {
            diesel::insert_into(event_override::table)
                .values(chunk)
                .execute(self.conn())
                .await?;
        }
        Ok(())
    }

    async fn recurrence_overrides(&mut self, rule_id: Uuid) -> DbResult<Vec<RecurrenceOverride>> {
        Ok(recurrence_override::table
            .filter(recurrence_override::rule_id.eq(rule_id))
            .order((
                recurrence_override::priority.asc(),
                recurrence_override::created_at.asc(),
                recurrence_override::id.asc(),
            ))
            .select(RecurrenceOverride::as_select())
            .load(self.conn())
            .await?)
    }

    async fn insert_recurrence_override(
        &mut self,
        pattern: &NewRecurrenceOverride,
    ) -> DbResult<RecurrenceOverride> {
        Ok(diesel::insert_into(recurrence_override::table)
            .values(pattern)
            .returning(RecurrenceOverride::as_returning())
            .get_result(self.conn())
            .await?)
    }

    async fn occurrences(&mut self, event_id: Uuid) -> DbResult<Vec<EventOccurrence>> {
        Ok(event_occurrence::table
            .filter(event_occurrence::event_id.eq(event_id))
            .order(event_occurrence::start_at.asc())
            .select(EventOccurrence::as_select())
            .load(self.conn())
            .await?)
    }

    async fn replace_occurrences(
        &mut self,
        event_id: Uuid,
        rows: &[NewEventOccurrence],
    ) -> DbResult<usize> {
        diesel::delete(event_occurrence::table.filter(event_occurrence::event_id.eq(event_id)))
            .execute(self.conn())
            .await?;
        let mut written = 0;
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            written += diesel::insert_into(event_occurrence::table)
                .values(chunk)
                .execute(self.conn())
                .await?;
        }
        Ok(written)
    }

    async fn has_occurrence(
        &mut self,
        event_id: Uuid,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        Ok(diesel::select(diesel::dsl::exists(
            event_occurrence::table
                .filter(event_occurrence::event_id.eq(event_id))
                .filter(event_occurrence::start_at.eq(start_at))
                .filter(event_occurrence::end_at.eq(end_at)),
        ))
        .get_result(self.conn())
        .await?)
    }
}
