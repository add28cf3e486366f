//! SQLite adapters for the workflow ports.

use chrono::{DateTime, NaiveDate, Utc};
use portal_core::errors::RepositoryError;
use thiserror::Error;

pub mod directory;
pub mod request;
pub mod schedule;
pub mod template;

pub use directory::SqlDirectory;
pub use request::SqlRequestRepository;
pub use schedule::{ScheduledLeave, SqlVacationScheduler};
pub use template::SqlTemplateRepository;

/// Failures raised inside this crate before they cross a port boundary.
#[derive(Debug, Error)]
pub(crate) enum SqlError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<SqlError> for RepositoryError {
    fn from(value: SqlError) -> Self {
        match value {
            SqlError::Database(error) => RepositoryError::Storage(error.to_string()),
            SqlError::Decode(message) => RepositoryError::Decode(message),
            SqlError::Repository(error) => error,
        }
    }
}

pub(crate) fn decode(error: impl std::fmt::Display) -> SqlError {
    SqlError::Decode(error.to_string())
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| SqlError::Decode(format!("timestamp `{value}`: {error}")))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, SqlError> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, SqlError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|error| SqlError::Decode(format!("date `{value}`: {error}")))
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// SQLite stores small counters as i64; the domain keeps them as percentages.
pub(crate) fn score_from_column(value: Option<i64>) -> Result<Option<u8>, SqlError> {
    value.map(|score| u8::try_from(score).map_err(decode)).transpose()
}
