use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;
use shared_models::error::AppError;

/// Runtime-editable sync schedule, stored in a single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    pub enabled: bool,
    pub interval_minutes: i64,
    pub bidirectional: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSyncSettingsRequest {
    pub enabled: Option<bool>,
    pub interval_minutes: Option<i64>,
    pub bidirectional: Option<bool>,
}

/// Upper bound for `interval_minutes`: one day.
pub const MAX_SYNC_INTERVAL_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Succeeded,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Succeeded => "succeeded",
            SyncRunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for SyncRunStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SyncRunStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "succeeded" => Ok(SyncRunStatus::Succeeded),
            "failed" => Ok(SyncRunStatus::Failed),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub created: u32,
    pub updated: u32,
    pub cancelled: u32,
    /// Internal appointments cancelled because an external event took their slot
    pub displaced: u32,
    /// External events dropped because they overlap another external appointment
    pub skipped: u32,
}

impl ReconcileStats {
    pub fn is_noop(&self) -> bool {
        *self == ReconcileStats::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: SyncRunStatus,
    #[serde(flatten)]
    pub stats: ReconcileStats,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunHistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Doctor has no external calendar configured")]
    NoFeed,

    #[error("Failed to fetch calendar feed: {0}")]
    Fetch(String),

    #[error("Malformed calendar feed: {0}")]
    Parse(String),

    #[error("Failed to push calendar: {0}")]
    Push(String),

    #[error("Invalid sync settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Database(err.into())
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::DoctorNotFound => AppError::NotFound(err.to_string()),
            SyncError::NoFeed => AppError::BadRequest(err.to_string()),
            SyncError::Fetch(_) | SyncError::Parse(_) | SyncError::Push(_) => {
                AppError::ExternalService(err.to_string())
            }
            SyncError::InvalidSettings(_) => AppError::ValidationError(err.to_string()),
            SyncError::Database(e) => e.into(),
        }
    }
}
