use diesel::Connection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::error::{DbError, DbResult};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// ## Summary
/// Applies pending schema migrations on a dedicated blocking connection.
///
/// ## Errors
/// Returns an error if the database is unreachable or a migration fails.
#[tracing::instrument(skip(database_url))]
pub async fn run_migrations(database_url: &str) -> DbResult<usize> {
    let url = database_url.to_owned();
    tokio::task::spawn_blocking(move || {
        let mut conn = diesel::PgConnection::establish(&url)
            .map_err(|e| DbError::MigrationError(e.to_string()))?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| DbError::MigrationError(e.to_string()))?;
        for version in &applied {
            tracing::info!(%version, "Applied migration");
        }
        Ok(applied.len())
    })
    .await
    .map_err(|e| DbError::MigrationError(e.to_string()))?
}
