use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared_database::DatabaseError;
use shared_models::auth::UserRole;
use shared_models::error::AppError;

/// Back-office account row mirrored from the session provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub role: UserRole,
    pub approved: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub pending: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveUserRequest {
    pub role: UserRole,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for AuthError {
    fn from(err: rusqlite::Error) -> Self {
        AuthError::Database(err.into())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UserNotFound(_) => AppError::NotFound(err.to_string()),
            AuthError::Validation(msg) => AppError::BadRequest(msg),
            AuthError::Database(e) => e.into(),
        }
    }
}
