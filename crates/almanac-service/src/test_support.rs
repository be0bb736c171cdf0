//! Shared fixtures for service tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::Notify;
use uuid::Uuid;

use almanac_db::db::store::StoreTx;
use almanac_db::model::event::{Event, NewEvent};

use crate::error::FetchError;
use crate::feed::fetch::{FeedFetcher, FetchRequest, FetchResponse};

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn ny(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
    Tz::America__New_York
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
}

fn new_event() -> NewEvent {
    let start = ny(2026, 9, 14, 18, 0).to_utc();
    NewEvent {
        id: Uuid::now_v7(),
        org_id: Uuid::nil(),
        category_id: Uuid::nil(),
        title: "Intro to Systems".to_owned(),
        description: Some("Weekly lecture".to_owned()),
        location: "Hall 2".to_owned(),
        start_at: start,
        end_at: start + TimeDelta::minutes(90),
        all_day: false,
        timezone: "America/New_York".to_owned(),
        source_id: None,
        external_id: None,
        revision: 0,
        source_modified_at: None,
        source_url: None,
        event_type: None,
        edit_history: Vec::new(),
        updated_at: utc(2026, 8, 1, 0, 0),
    }
}

/// A weekly lecture at 18:00 New York time, not yet stored.
pub fn sample_event() -> Event {
    let new = new_event();
    Event {
        id: new.id,
        org_id: new.org_id,
        category_id: new.category_id,
        title: new.title,
        description: new.description,
        location: new.location,
        start_at: new.start_at,
        end_at: new.end_at,
        all_day: new.all_day,
        timezone: new.timezone,
        source_id: new.source_id,
        external_id: new.external_id,
        revision: new.revision,
        source_modified_at: new.source_modified_at,
        source_url: new.source_url,
        event_type: new.event_type,
        edit_history: new.edit_history,
        created_at: new.updated_at,
        updated_at: new.updated_at,
    }
}

pub async fn insert_event<T: StoreTx>(tx: &mut T) -> Event {
    tx.insert_event(&new_event()).await.unwrap()
}

/// Two weekly lectures, one of them moved once, and a one-off fair.
pub const FEED: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
PRODID:-//Campus//Schedule//EN\r
X-WR-TIMEZONE:America/New_York\r
BEGIN:VEVENT\r
UID:lecture-1@campus\r
DTSTART;TZID=America/New_York:20260914T180000\r
DTEND;TZID=America/New_York:20260914T193000\r
SUMMARY:Intro to Systems\r
LOCATION:Hall 2\r
RRULE:FREQ=WEEKLY;BYDAY=MO;COUNT=10\r
EXDATE;TZID=America/New_York:20260921T180000\r
SEQUENCE:1\r
LAST-MODIFIED:20260901T120000Z\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:lecture-1@campus\r
RECURRENCE-ID;TZID=America/New_York:20261005T180000\r
DTSTART;TZID=America/New_York:20261005T190000\r
DTEND;TZID=America/New_York:20261005T203000\r
SUMMARY:Intro to Systems (moved)\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:fair@campus\r
DTSTART:20261010T140000Z\r
DTEND:20261010T180000Z\r
SUMMARY:Career Fair\r
END:VEVENT\r
END:VCALENDAR\r
";

/// Replays queued responses in order.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<FetchResponse, FetchError>>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(responses: impl IntoIterator<Item = Result<FetchResponse, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FeedFetcher for ScriptedFetcher {
    async fn fetch(&self, _request: FetchRequest<'_>) -> Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(FetchResponse::NotModified))
    }
}

/// Signals `entered` when a fetch starts and holds it until `release`.
#[derive(Debug, Default)]
pub struct GatedFetcher {
    pub entered: Notify,
    pub release: Notify,
    pub inner: ScriptedFetcher,
}

impl FeedFetcher for GatedFetcher {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchResponse, FetchError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.fetch(request).await
    }
}

/// Answers `NotModified` after a short pause and records the highest number
/// of fetches in flight at once.
#[derive(Debug, Default)]
pub struct CountingFetcher {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl CountingFetcher {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl FeedFetcher for CountingFetcher {
    async fn fetch(&self, _request: FetchRequest<'_>) -> Result<FetchResponse, FetchError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(FetchResponse::NotModified)
    }
}
