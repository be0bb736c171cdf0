#![allow(clippy::unwrap_used)]

use almanac_db::db::enums::SyncStatus;
use almanac_db::db::store::{EventStore, StoreTx};
use almanac_service::feed::{
    FetchResponse, ImportOptions, SyncOptions, SyncOutcome, Synchronizer, import_feed,
};
use almanac_test::{CAMPUS_FEED, StaticFetcher};

use super::helpers::{TestDb, utc};

fn options(worker_id: &str) -> SyncOptions {
    SyncOptions {
        max_entry_age_days: 36_500,
        ..SyncOptions::new(worker_id)
    }
}

/// ## Summary
/// Importing the same feed twice keeps every occurrence row as it was.
#[test_log::test(tokio::test)]
async fn reimport_is_idempotent() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let source = db.source().await;
    let options = ImportOptions::new("sync:test", utc(2026, 9, 1, 0, 0));

    let first = import_feed(&db.store, &source, CAMPUS_FEED, &options)
        .await
        .unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(first.occurrences, 10);

    let lecture = {
        let mut tx = db.store.begin().await.unwrap();
        tx.event_by_external_id(source.id, "lecture-1@campus")
            .await
            .unwrap()
            .unwrap()
    };
    let before = db.store.begin().await.unwrap().occurrences(lecture.id).await.unwrap();
    assert_eq!(before.len(), 9);

    let second = import_feed(&db.store, &source, CAMPUS_FEED, &options)
        .await
        .unwrap();
    assert_eq!(second.unchanged, 2);
    let after = db.store.begin().await.unwrap().occurrences(lecture.id).await.unwrap();
    assert_eq!(before, after);

    db.cleanup().await;
}

/// ## Summary
/// A long counted series is written even when its rows exceed what one
/// `INSERT` statement may bind.
#[test_log::test(tokio::test)]
async fn long_counted_series_is_stored() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let source = db.source().await;
    let exdates: Vec<String> = (2..=4)
        .map(|day| format!("2026090{day}T130000Z"))
        .collect();
    let feed = format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         BEGIN:VEVENT\r\n\
         UID:standup@campus\r\n\
         DTSTART:20260901T130000Z\r\n\
         DTEND:20260901T131500Z\r\n\
         SUMMARY:Standup\r\n\
         RRULE:FREQ=DAILY;COUNT=6000\r\n\
         EXDATE:{}\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR\r\n",
        exdates.join(",")
    );
    let options = ImportOptions::new("sync:test", utc(2026, 9, 1, 0, 0));

    let summary = import_feed(&db.store, &source, &feed, &options).await.unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(summary.occurrences, 5997);

    let mut tx = db.store.begin().await.unwrap();
    let event = tx
        .event_by_external_id(source.id, "standup@campus")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.occurrences(event.id).await.unwrap().len(), 5997);
    drop(tx);

    db.cleanup().await;
}

/// ## Summary
/// Two workers racing on one source: one imports, the other sees the lock.
#[test_log::test(tokio::test)]
async fn concurrent_workers_import_once() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let source = db.source().await;
    let first = Synchronizer::new(
        db.store.clone(),
        StaticFetcher::new(CAMPUS_FEED),
        options("node-a"),
    );
    let second = Synchronizer::new(
        db.store.clone(),
        StaticFetcher::new(CAMPUS_FEED),
        options("node-b"),
    );

    let (a, b) = tokio::join!(first.sync_source(source.id), second.sync_source(source.id));
    let outcomes = [a.unwrap(), b.unwrap()];
    let synced = outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Synced(_)))
        .count();
    let locked = outcomes
        .iter()
        .filter(|o| **o == SyncOutcome::Locked)
        .count();
    // The loser may also arrive after the winner released the lock and find
    // the content unchanged.
    assert_eq!(synced, 1);
    assert_eq!(locked + outcomes.iter().filter(|o| **o == SyncOutcome::NotModified).count(), 1);
    assert_eq!(first.fetcher().calls() + second.fetcher().calls(), 1 + usize::from(locked == 0));

    let mut tx = db.store.begin().await.unwrap();
    let stored = tx.source(source.id).await.unwrap().unwrap();
    assert!(stored.last_sync_status.is_some());
    assert_eq!(stored.locked_at, None);
    assert_eq!(tx.source_events(source.id).await.unwrap().len(), 2);
    drop(tx);

    db.cleanup().await;
}

/// ## Summary
/// A 304 is recorded without touching events, and teardown removes them.
#[test_log::test(tokio::test)]
async fn not_modified_then_teardown() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let source = db.source().await;
    let fetcher = StaticFetcher::new(CAMPUS_FEED);
    let sync = Synchronizer::new(db.store.clone(), fetcher, options("node-a"));

    assert!(matches!(
        sync.sync_source(source.id).await.unwrap(),
        SyncOutcome::Synced(_)
    ));
    sync.fetcher().push(FetchResponse::NotModified);
    assert_eq!(
        sync.sync_source(source.id).await.unwrap(),
        SyncOutcome::NotModified
    );

    let stored = db.store.begin().await.unwrap().source(source.id).await.unwrap().unwrap();
    assert_eq!(stored.last_sync_status, Some(SyncStatus::NotModified));

    let deleted = sync.delete_source_events(source.id).await.unwrap();
    assert_eq!(deleted.len(), 2);
    let mut tx = db.store.begin().await.unwrap();
    assert!(!tx.source(source.id).await.unwrap().unwrap().active);
    assert!(tx.source_events(source.id).await.unwrap().is_empty());
    drop(tx);

    db.cleanup().await;
}
