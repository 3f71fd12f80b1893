//! Error types for the attendance engine.

use thiserror::Error;
use uuid::Uuid;

use crate::models::EventStatus;

/// Result type for attendance operations.
pub type Result<T> = std::result::Result<T, AttendanceError>;

#[derive(Error, Debug)]
pub enum AttendanceError {
    /// A wall-clock value that is not `HH:MM` on a 24-hour clock.
    #[error("invalid time '{value}': {reason}")]
    InvalidTime { value: String, reason: String },

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid threshold table: {0}")]
    InvalidThresholdTable(String),

    #[error(
        "token lifetime of {0} minutes is outside 1..={max}",
        max = crate::token::MAX_TOKEN_LIFETIME_MINUTES
    )]
    InvalidTokenLifetime(i64),

    #[error("event status cannot move from {from:?} to {to:?}")]
    StatusRegression { from: EventStatus, to: EventStatus },

    #[error("attendance event {0} not found")]
    EventNotFound(Uuid),

    #[error("attendance event {0} is not a late arrival")]
    NotLateEvent(Uuid),

    #[error("student {0} is not on the roster")]
    UnknownStudent(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttendanceError {
    pub(crate) fn invalid_time(value: &str, reason: impl Into<String>) -> Self {
        AttendanceError::InvalidTime {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
