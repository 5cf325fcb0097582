use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_database::AppState;
use shared_models::error::AppError;

use crate::models::{
    AppointmentSearchQuery, BookAppointmentRequest, CancelAppointmentRequest, ConflictCheckRequest,
    CreateAppointmentRequest, UpdateAppointmentRequest,
};
use crate::services::{AppointmentBookingService, ConflictDetectionService};

// ==============================================================================
// PUBLIC BOOKING
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = AppointmentBookingService::new(&state).book_appointment(request)?;

    Ok(Json(json!({
        "id": appointment.id,
        "doctor_id": appointment.doctor_id,
        "start_time": appointment.start_time,
        "end_time": appointment.end_time,
        "status": appointment.status,
        "message": "Appointment requested"
    })))
}

// ==============================================================================
// BACK-OFFICE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = AppointmentBookingService::new(&state).create_appointment(request)?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = AppointmentBookingService::new(&state).get_appointment(appointment_id)?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = AppointmentBookingService::new(&state).update_appointment(appointment_id, request)?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<Uuid>,
    request: Option<Json<CancelAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let reason = request.and_then(|Json(body)| body.reason);
    let appointment = AppointmentBookingService::new(&state).cancel_appointment(appointment_id, reason)?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AppointmentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = AppointmentBookingService::new(&state).list_appointments(query)?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn check_conflicts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConflictCheckRequest>,
) -> Result<Json<Value>, AppError> {
    let response = ConflictDetectionService::new(&state).check_conflicts(query)?;
    Ok(Json(json!(response)))
}
