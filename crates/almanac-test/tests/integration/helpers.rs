#![allow(clippy::expect_used, dead_code)]
//! Test helpers for integration tests.
//!
//! Each test gets its own database, created from `ALMANAC_TEST_DATABASE_URL`
//! and migrated on demand. Tests call [`TestDb::cleanup`] when they finish;
//! databases left behind by a failed test carry the `almanac_test_` prefix.

use chrono::{DateTime, TimeZone, Utc};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use almanac_db::db::connection::create_pool;
use almanac_db::db::migrate::run_migrations;
use almanac_db::db::store::{EventStore, PgStore, StoreTx};
use almanac_db::model::source::{CalendarSource, NewCalendarSource};

const DATABASE_URL_VAR: &str = "ALMANAC_TEST_DATABASE_URL";

pub struct TestDb {
    name: String,
    admin_url: String,
    pub store: PgStore,
}

impl TestDb {
    /// ## Summary
    /// Creates and migrates a fresh database, or returns `None` when no test
    /// server is configured.
    pub async fn new() -> Option<Self> {
        let Ok(base_url) = std::env::var(DATABASE_URL_VAR) else {
            eprintln!("[TestDb] {DATABASE_URL_VAR} is not set, skipping");
            return None;
        };
        let base_url = base_url.trim_end_matches('/');
        let admin_url = format!("{base_url}/postgres");
        let name = format!("almanac_test_{}", Uuid::now_v7().simple());

        let mut admin = AsyncPgConnection::establish(&admin_url)
            .await
            .expect("Failed to connect to the admin database");
        diesel::sql_query(format!("CREATE DATABASE \"{name}\""))
            .execute(&mut admin)
            .await
            .expect("Failed to create test database");

        let url = format!("{base_url}/{name}");
        run_migrations(&url).await.expect("Failed to run migrations");
        let pool = create_pool(&url, 4).await.expect("Failed to create pool");

        tracing::debug!(database = %name, "Created test database");

        Some(Self {
            name,
            admin_url,
            store: PgStore::new(pool),
        })
    }

    pub async fn cleanup(self) {
        let Self {
            name, admin_url, store,
        } = self;
        drop(store);

        let mut admin = AsyncPgConnection::establish(&admin_url)
            .await
            .expect("Failed to connect to the admin database");
        diesel::sql_query(format!("DROP DATABASE IF EXISTS \"{name}\" WITH (FORCE)"))
            .execute(&mut admin)
            .await
            .expect("Failed to drop test database");
    }

    pub async fn source(&self) -> CalendarSource {
        let mut tx = self.store.begin().await.expect("begin");
        let source = tx
            .insert_source(&NewCalendarSource::new(
                Uuid::now_v7(),
                Uuid::now_v7(),
                "https://campus.example/feed.ics",
            ))
            .await
            .expect("insert source");
        tx.commit().await.expect("commit");
        source
    }
}

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0)
        .single()
        .expect("valid timestamp")
}
