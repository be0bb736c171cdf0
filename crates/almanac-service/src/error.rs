use almanac_db::error::DbError;
use almanac_rfc::ical::expand::{ConversionError, RuleError};
use almanac_rfc::ical::parse::ParseError;
use thiserror::Error;

/// Service layer errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    DatabaseError(#[from] DbError),

    #[error("Invalid recurrence rule: {0}")]
    RuleError(#[from] RuleError),

    #[error(transparent)]
    ConversionError(#[from] ConversionError),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Failure to retrieve a feed, with a stable code per cause.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Access to the calendar feed was denied (HTTP {0})")]
    PermissionDenied(u16),

    #[error("The calendar feed URL was not found")]
    NotFound,

    #[error("The calendar feed returned HTTP {0}")]
    Http(u16),

    #[error("The calendar feed took too long to respond")]
    Timeout,

    #[error("Unable to connect to the calendar feed: {0}")]
    Connection(String),

    #[error("The URL does not point to a calendar feed (content type {0})")]
    NotCalendar(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl FetchError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "ICAL_PERMISSION_DENIED",
            Self::NotFound => "ICAL_NOT_FOUND",
            Self::Http(_) | Self::Client(_) => "ICAL_HTTP_ERROR",
            Self::Timeout => "ICAL_TIMEOUT",
            Self::Connection(_) => "ICAL_CONNECTION_ERROR",
            Self::NotCalendar(_) => "ICAL_NOT_ICS",
        }
    }
}

/// Failure to apply a fetched feed to the store.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("The calendar data could not be parsed as iCalendar: {0}")]
    Parse(#[from] ParseError),

    #[error("The calendar feed could not be imported: {0}")]
    Failed(#[from] ServiceError),
}

impl ImportError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "ICAL_PARSE_ERROR",
            Self::Failed(_) => "ICAL_IMPORT_FAILED",
        }
    }
}

impl From<DbError> for ImportError {
    fn from(error: DbError) -> Self {
        Self::Failed(ServiceError::DatabaseError(error))
    }
}

/// Failure of a synchronization run. Lock contention is not an error.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    DatabaseError(#[from] DbError),

    #[error("Calendar source not found: {0}")]
    SourceNotFound(uuid::Uuid),
}

impl SyncError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Fetch(error) => error.code(),
            Self::Import(error) => error.code(),
            Self::DatabaseError(_) => "SYNC_DATABASE_ERROR",
            Self::SourceNotFound(_) => "SYNC_SOURCE_NOT_FOUND",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(FetchError::PermissionDenied(403).code(), "ICAL_PERMISSION_DENIED");
        assert_eq!(FetchError::NotCalendar("text/html".to_owned()).code(), "ICAL_NOT_ICS");
        let import = ImportError::Failed(ServiceError::RuleError(RuleError::MissingFrequency));
        assert_eq!(import.code(), "ICAL_IMPORT_FAILED");
        assert_eq!(SyncError::from(import).code(), "ICAL_IMPORT_FAILED");
        assert_eq!(SyncError::from(FetchError::Timeout).code(), "ICAL_TIMEOUT");
    }
}
