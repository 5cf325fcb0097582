use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use headers::{authorization::Bearer, Authorization, HeaderMapExt};
use rusqlite::OptionalExtension;
use tracing::debug;

use shared_database::{AppState, DatabaseError};
use shared_models::auth::{User, UserRole};
use shared_models::error::AppError;

use crate::jwt::validate_token;

/// Back-office access recorded for a user.
#[derive(Debug, Clone)]
pub struct UserAccess {
    pub role: Option<UserRole>,
    pub approved: bool,
}

// Middleware for any authenticated session
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(&state, request.headers())?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

// Middleware for admin console routes: approved users with role=admin only
pub async fn admin_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(&state, request.headers())?;

    let access = load_user_access(&state, &user.id)?
        .ok_or_else(|| AppError::Forbidden("Account is not registered for back-office access".to_string()))?;

    if !access.approved {
        return Err(AppError::Forbidden("Account is pending approval".to_string()));
    }

    if access.role != Some(UserRole::Admin) {
        return Err(AppError::Forbidden("Administrator role required".to_string()));
    }

    debug!("Admin access granted to {}", user.id);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let token = bearer_token(headers)?;

    validate_token(&token, &state.config.session_jwt_secret).map_err(AppError::Auth)
}

pub fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth = headers
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| AppError::Auth("Missing or invalid authorization header".to_string()))?;

    Ok(auth.token().to_string())
}

pub fn load_user_access(state: &AppState, user_id: &str) -> Result<Option<UserAccess>, AppError> {
    state
        .db
        .with_conn(|conn| {
            conn.query_row(
                "SELECT role, approved FROM users WHERE id = ?1",
                [user_id],
                |row| {
                    let role: String = row.get(0)?;
                    Ok(UserAccess {
                        role: UserRole::parse(&role),
                        approved: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(DatabaseError::from)
        })
        .map_err(|e| AppError::Database(e.to_string()))
}
