use thiserror::Error;

/// Database layer errors
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] diesel::result::Error),

    #[error("Pool error: {0}")]
    PoolError(#[from] diesel_async::pooled_connection::bb8::RunError),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: uuid::Uuid },

    #[error("Unique constraint violated: {0}")]
    Conflict(&'static str),
}

impl DbError {
    /// Whether the error is a unique constraint violation, from either store.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_)
                | Self::DatabaseError(diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _
                ))
        )
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
