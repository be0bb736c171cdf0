#![allow(clippy::unwrap_used)]

use chrono::{NaiveTime, TimeDelta};
use uuid::Uuid;

use almanac_db::db::enums::{OccurrenceKind, RuleFrequency};
use almanac_db::db::store::{EventStore, StoreTx};
use almanac_db::model::event::NewEvent;
use almanac_db::model::occurrence::NewEventOccurrence;
use almanac_db::model::rule::{NewRecurrenceOverride, NewRecurrenceRule, RuleDates};
use almanac_db::model::source::CalendarSource;

use super::helpers::{TestDb, utc};

fn event(source: &CalendarSource, uid: &str) -> NewEvent {
    NewEvent {
        id: Uuid::now_v7(),
        org_id: source.org_id,
        category_id: source.category_id,
        title: "Reading group".to_owned(),
        description: None,
        location: "Library".to_owned(),
        start_at: utc(2026, 9, 15, 17, 0),
        end_at: utc(2026, 9, 15, 18, 0),
        all_day: false,
        timezone: "UTC".to_owned(),
        source_id: Some(source.id),
        external_id: Some(uid.to_owned()),
        revision: 0,
        source_modified_at: None,
        source_url: None,
        event_type: None,
        edit_history: vec!["sync:test".to_owned()],
        updated_at: utc(2026, 9, 1, 0, 0),
    }
}

fn occurrence(event_id: Uuid, source: &CalendarSource, day: u32) -> NewEventOccurrence {
    NewEventOccurrence {
        id: Uuid::now_v7(),
        event_id,
        org_id: source.org_id,
        category_id: source.category_id,
        title: "Reading group".to_owned(),
        description: None,
        location: "Library".to_owned(),
        start_at: utc(2026, 9, day, 17, 0),
        end_at: utc(2026, 9, day, 18, 0),
        all_day: false,
        kind: OccurrenceKind::Recurring,
        source_url: None,
        event_saved_at: utc(2026, 9, 1, 0, 0),
    }
}

/// ## Summary
/// Writes are invisible until commit and discarded when the handle is dropped.
#[test_log::test(tokio::test)]
async fn dropped_transaction_rolls_back() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let source = db.source().await;

    let mut tx = db.store.begin().await.unwrap();
    let dropped = tx.insert_event(&event(&source, "a@test")).await.unwrap();
    drop(tx);

    let mut tx = db.store.begin().await.unwrap();
    assert!(tx.event(dropped.id).await.unwrap().is_none());
    let kept = tx.insert_event(&event(&source, "a@test")).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = db.store.begin().await.unwrap();
    let found = tx
        .event_by_external_id(source.id, "a@test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, kept.id);
    assert_eq!(found.edit_history, vec!["sync:test".to_owned()]);
    drop(tx);

    db.cleanup().await;
}

/// ## Summary
/// A UID is unique within its source.
#[test_log::test(tokio::test)]
async fn duplicate_external_id_conflicts() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let source = db.source().await;

    let mut tx = db.store.begin().await.unwrap();
    tx.insert_event(&event(&source, "dup@test")).await.unwrap();
    let error = tx
        .insert_event(&event(&source, "dup@test"))
        .await
        .unwrap_err();
    assert!(error.is_conflict(), "{error}");
    drop(tx);

    db.cleanup().await;
}

/// ## Summary
/// Deleting an event removes its rule, dates, overrides and occurrences.
#[test_log::test(tokio::test)]
async fn delete_events_cascades() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let source = db.source().await;

    let mut tx = db.store.begin().await.unwrap();
    let stored = tx.insert_event(&event(&source, "series@test")).await.unwrap();
    let rule = tx
        .insert_rule(&NewRecurrenceRule {
            id: Uuid::now_v7(),
            event_id: stored.id,
            frequency: RuleFrequency::Weekly,
            repeat_interval: 1,
            start_at: stored.start_at,
            repeat_count: Some(4),
            until_at: None,
            by_day: vec!["TU".to_owned()],
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            by_set_pos: Vec::new(),
            week_start: None,
        })
        .await
        .unwrap();
    let dates = RuleDates {
        exdates: vec![utc(2026, 9, 22, 17, 0)],
        rdates: vec![utc(2026, 9, 24, 17, 0)],
    };
    tx.replace_rule_dates(rule.id, &dates).await.unwrap();
    let written = tx
        .replace_occurrences(
            stored.id,
            &[occurrence(stored.id, &source, 15), occurrence(stored.id, &source, 29)],
        )
        .await
        .unwrap();
    assert_eq!(written, 2);
    tx.commit().await.unwrap();

    let mut tx = db.store.begin().await.unwrap();
    assert_eq!(tx.rule_dates(rule.id).await.unwrap(), dates);
    assert!(
        tx.has_occurrence(stored.id, utc(2026, 9, 29, 17, 0), utc(2026, 9, 29, 18, 0))
            .await
            .unwrap()
    );
    assert_eq!(tx.delete_events(&[stored.id]).await.unwrap(), 1);
    assert!(tx.rule_for_event(stored.id).await.unwrap().is_none());
    assert!(tx.occurrences(stored.id).await.unwrap().is_empty());
    assert_eq!(tx.rule_dates(rule.id).await.unwrap(), RuleDates::default());
    tx.commit().await.unwrap();

    db.cleanup().await;
}

/// ## Summary
/// Pattern overrides come back lowest priority first, ties by creation.
#[test_log::test(tokio::test)]
async fn recurrence_overrides_are_ordered() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let source = db.source().await;

    let mut tx = db.store.begin().await.unwrap();
    let stored = tx.insert_event(&event(&source, "ordered@test")).await.unwrap();
    let rule = tx
        .insert_rule(&NewRecurrenceRule {
            id: Uuid::now_v7(),
            event_id: stored.id,
            frequency: RuleFrequency::Daily,
            repeat_interval: 1,
            start_at: stored.start_at,
            repeat_count: Some(10),
            until_at: None,
            by_day: Vec::new(),
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            by_set_pos: Vec::new(),
            week_start: None,
        })
        .await
        .unwrap();
    for (priority, title) in [(5, "high"), (0, "low"), (5, "high-later")] {
        tx.insert_recurrence_override(&NewRecurrenceOverride {
            id: Uuid::now_v7(),
            rule_id: rule.id,
            frequency: RuleFrequency::Weekly,
            repeat_interval: 1,
            by_day: vec!["TU".to_owned()],
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            new_start_time: NaiveTime::from_hms_opt(9, 0, 0),
            new_end_time: None,
            new_title: Some(title.to_owned()),
            new_description: None,
            new_location: None,
            priority,
        })
        .await
        .unwrap();
    }
    tx.commit().await.unwrap();

    let mut tx = db.store.begin().await.unwrap();
    let titles: Vec<String> = tx
        .recurrence_overrides(rule.id)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|o| o.new_title)
        .collect();
    assert_eq!(titles, vec!["low", "high", "high-later"]);
    drop(tx);

    db.cleanup().await;
}

/// ## Summary
/// Due selection skips inactive, not-yet-due and freshly locked sources.
#[test_log::test(tokio::test)]
async fn due_sources_respects_schedule_and_locks() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let now = utc(2026, 10, 1, 12, 0);
    let mut sources = Vec::new();
    for _ in 0..4 {
        sources.push(db.source().await);
    }

    let mut tx = db.store.begin().await.unwrap();
    sources[1].active = false;
    sources[2].next_due_at = Some(now + TimeDelta::hours(1));
    sources[3].lock_owner = Some("node-b".to_owned());
    sources[3].locked_at = Some(now - TimeDelta::minutes(5));
    for source in &sources[1..] {
        tx.update_source(source).await.unwrap();
    }
    tx.commit().await.unwrap();

    let mut tx = db.store.begin().await.unwrap();
    let due = tx
        .due_sources(now, now - TimeDelta::minutes(30))
        .await
        .unwrap();
    assert_eq!(due.iter().map(|s| s.id).collect::<Vec<_>>(), vec![sources[0].id]);
    let later = tx
        .due_sources(now + TimeDelta::hours(2), now + TimeDelta::hours(1))
        .await
        .unwrap();
    assert_eq!(later.len(), 3);
    drop(tx);

    db.cleanup().await;
}
