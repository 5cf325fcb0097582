use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::feed::CALENDAR_CONTENT_TYPE;
use crate::models::{RunHistoryQuery, UpdateSyncSettingsRequest};
use crate::services::CalendarSyncService;

#[axum::debug_handler]
pub async fn get_settings(State(sync): State<Arc<CalendarSyncService>>) -> Result<Json<Value>, AppError> {
    let settings = sync.settings()?;
    Ok(Json(json!(settings)))
}

#[axum::debug_handler]
pub async fn update_settings(
    State(sync): State<Arc<CalendarSyncService>>,
    Json(request): Json<UpdateSyncSettingsRequest>,
) -> Result<Json<Value>, AppError> {
    let settings = sync.update_settings(request)?;
    Ok(Json(json!(settings)))
}

#[axum::debug_handler]
pub async fn sync_all(State(sync): State<Arc<CalendarSyncService>>) -> Result<Json<Value>, AppError> {
    let runs = sync.sync_all().await?;

    Ok(Json(json!({
        "runs": runs,
        "total": runs.len()
    })))
}

#[axum::debug_handler]
pub async fn sync_doctor(
    State(sync): State<Arc<CalendarSyncService>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let run = sync.sync_doctor(doctor_id).await?;
    Ok(Json(json!(run)))
}

#[axum::debug_handler]
pub async fn list_runs(
    State(sync): State<Arc<CalendarSyncService>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<RunHistoryQuery>,
) -> Result<Json<Value>, AppError> {
    let runs = sync.runs(doctor_id, query.limit)?;

    Ok(Json(json!({
        "runs": runs,
        "total": runs.len()
    })))
}

#[axum::debug_handler]
pub async fn export_calendar(
    State(sync): State<Arc<CalendarSyncService>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let calendar = sync.export_calendar(doctor_id)?;

    Ok((
        [
            (header::CONTENT_TYPE, CALENDAR_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"doctor-{}.ics\"", doctor_id),
            ),
        ],
        calendar,
    )
        .into_response())
}
