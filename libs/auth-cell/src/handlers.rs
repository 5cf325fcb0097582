use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use axum_extra::typed_header::{TypedHeader, TypedHeaderRejection};
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::debug;

use shared_database::AppState;
use shared_models::auth::{TokenResponse, User};
use shared_models::error::AppError;
use shared_utils::jwt::validate_token as decode_session;

use crate::models::{ApproveUserRequest, UserQuery};
use crate::services::UserService;

type BearerHeader = Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>;

fn bearer(header: BearerHeader) -> Result<String, AppError> {
    header
        .map(|TypedHeader(auth)| auth.token().to_string())
        .map_err(|_| AppError::Auth("Missing or invalid authorization header".to_string()))
}

#[axum::debug_handler]
pub async fn validate_token(
    State(state): State<Arc<AppState>>,
    header: BearerHeader,
) -> Result<Json<TokenResponse>, AppError> {
    debug!("Validating token");

    let token = bearer(header)?;
    let user = decode_session(&token, &state.config.session_jwt_secret).map_err(AppError::Auth)?;

    Ok(Json(TokenResponse {
        valid: true,
        user_id: user.id,
        email: user.email,
        role: user.role,
    }))
}

#[axum::debug_handler]
pub async fn verify_token(
    State(state): State<Arc<AppState>>,
    header: BearerHeader,
) -> Result<Json<Value>, AppError> {
    debug!("Verifying token");

    let token = bearer(header)?;
    let valid = decode_session(&token, &state.config.session_jwt_secret).is_ok();

    Ok(Json(json!({ "valid": valid })))
}

#[axum::debug_handler]
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    debug!("Loading profile for user: {}", user.id);

    let account = UserService::new(&state).register(&user)?;

    Ok(Json(json!({
        "user_id": account.id,
        "email": account.email,
        "role": account.role,
        "approved": account.approved,
        "approved_at": account.approved_at,
        "created_at": account.created_at
    })))
}

#[axum::debug_handler]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Value>, AppError> {
    let users = UserService::new(&state).list_users(query.pending.unwrap_or(false))?;

    Ok(Json(json!({
        "users": users,
        "total": users.len()
    })))
}

#[axum::debug_handler]
pub async fn approve_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<ApproveUserRequest>,
) -> Result<Json<Value>, AppError> {
    let account = UserService::new(&state).approve(&user_id, request.role)?;
    Ok(Json(json!(account)))
}

#[axum::debug_handler]
pub async fn revoke_user(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<User>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let account = UserService::new(&state).revoke(&user_id, &admin.id)?;
    Ok(Json(json!(account)))
}
