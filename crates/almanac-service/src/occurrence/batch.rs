//! Regenerating occurrences for many events, one transaction each.

use uuid::Uuid;

use almanac_db::db::store::{EventStore, StoreTx};

use super::materialize::{MaterializeOptions, materialize_event};
use crate::error::{ServiceError, ServiceResult};

/// Per-event results of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub regenerated: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
    pub failed: Vec<(Uuid, ServiceError)>,
}

impl BatchReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// ## Summary
/// Rematerializes each event in its own transaction.
///
/// An event whose rule was expanded at or after the event's last update is
/// skipped. A failure is recorded against its event and the batch continues;
/// an id with no event is a failure.
#[tracing::instrument(skip_all, fields(events = ids.len()))]
pub async fn regenerate_events<S: EventStore>(
    store: &S,
    ids: &[Uuid],
    options: &MaterializeOptions,
) -> BatchReport {
    let mut report = BatchReport::default();

    for &id in ids {
        match regenerate_one(store, id, options).await {
            Ok(true) => report.regenerated.push(id),
            Ok(false) => report.skipped.push(id),
            Err(error) => {
                tracing::warn!(event_id = %id, %error, "Failed to regenerate occurrences");
                report.failed.push((id, error));
            }
        }
    }

    tracing::info!(
        regenerated = report.regenerated.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Batch regeneration finished"
    );

    report
}

async fn regenerate_one<S: EventStore>(
    store: &S,
    id: Uuid,
    options: &MaterializeOptions,
) -> ServiceResult<bool> {
    let mut tx = store.begin().await?;

    let event = tx
        .event(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("event {id}")))?;

    let fresh = tx
        .rule_for_event(id)
        .await?
        .and_then(|rule| rule.last_expanded_at)
        .is_some_and(|expanded| expanded >= event.updated_at);
    if fresh {
        tx.rollback().await?;
        return Ok(false);
    }

    materialize_event(&mut tx, &event, options).await?;
    tx.commit().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use almanac_db::db::enums::RuleFrequency;
    use almanac_db::db::store::MemoryStore;
    use almanac_db::model::rule::NewRecurrenceRule;
    use chrono::TimeDelta;

    use crate::test_support::{insert_event, utc};

    #[test_log::test(tokio::test)]
    async fn failures_do_not_abort_the_batch() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let good = insert_event(&mut tx).await;
        let broken = insert_event(&mut tx).await;
        tx.insert_rule(&NewRecurrenceRule {
            id: Uuid::now_v7(),
            event_id: broken.id,
            frequency: RuleFrequency::Weekly,
            repeat_interval: 0,
            start_at: broken.start_at,
            repeat_count: Some(3),
            until_at: None,
            by_day: Vec::new(),
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            by_set_pos: Vec::new(),
            week_start: None,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let missing = Uuid::now_v7();
        let options = MaterializeOptions::new(utc(2026, 9, 1, 0, 0));
        let report = regenerate_events(&store, &[broken.id, missing, good.id], &options).await;

        assert_eq!(report.regenerated, vec![good.id]);
        assert!(!report.is_success());
        let failed: Vec<Uuid> = report.failed.iter().map(|(id, _)| *id).collect();
        assert_eq!(failed, vec![broken.id, missing]);
        assert!(matches!(report.failed[0].1, ServiceError::RuleError(_)));
        assert!(matches!(report.failed[1].1, ServiceError::NotFound(_)));

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.occurrences(good.id).await.unwrap().len(), 1);
        assert!(tx.occurrences(broken.id).await.unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn freshly_expanded_events_are_skipped() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let event = insert_event(&mut tx).await;
        tx.insert_rule(&NewRecurrenceRule {
            id: Uuid::now_v7(),
            event_id: event.id,
            frequency: RuleFrequency::Daily,
            repeat_interval: 1,
            start_at: event.start_at,
            repeat_count: Some(5),
            until_at: None,
            by_day: Vec::new(),
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            by_set_pos: Vec::new(),
            week_start: None,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let options = MaterializeOptions::new(utc(2026, 9, 1, 0, 0));
        let first = regenerate_events(&store, &[event.id], &options).await;
        assert_eq!(first.regenerated, vec![event.id]);

        let second = regenerate_events(&store, &[event.id], &options).await;
        assert_eq!(second.skipped, vec![event.id]);

        // Editing the event makes it stale again.
        let mut tx = store.begin().await.unwrap();
        tx.touch_event(event.id, utc(2026, 9, 1, 0, 0) + TimeDelta::seconds(1))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        let third = regenerate_events(&store, &[event.id], &options).await;
        assert_eq!(third.regenerated, vec![event.id]);
    }
}
