//! Almanac - integration test support.
//!
//! Feed fixtures and a fetcher that serves them without a network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use almanac_service::error::FetchError;
use almanac_service::feed::{FeedBody, FeedFetcher, FetchRequest, FetchResponse};

/// A weekly lecture with one excluded and one moved instance, and a one-off.
pub const CAMPUS_FEED: &str = "BEGIN:VCALENDAR\r
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

/// Serves the same body on every fetch and counts the calls.
#[derive(Debug)]
pub struct StaticFetcher {
    body: String,
    pending: Mutex<VecDeque<FetchResponse>>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            pending: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Serves `response` once before falling back to the body.
    pub fn push(&self, response: FetchResponse) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push_back(response);
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FeedFetcher for StaticFetcher {
    async fn fetch(&self, _request: FetchRequest<'_>) -> Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let queued = self.pending.lock().ok().and_then(|mut pending| pending.pop_front());
        Ok(queued.unwrap_or_else(|| {
            FetchResponse::Body(FeedBody {
                text: self.body.clone(),
                etag: None,
                last_modified: None,
            })
        }))
    }
}
