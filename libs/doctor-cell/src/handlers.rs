use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_database::AppState;
use shared_models::error::AppError;

use crate::models::{
    CreateDoctorRequest, CreateSpecialtyRequest, PublicDoctor, SetAvailabilityRequest, UpdateDoctorRequest,
    UpdateSpecialtyRequest,
};
use crate::services::{AvailabilityService, DoctorService, SpecialtyService};

#[derive(Debug, Deserialize)]
pub struct DoctorListQuery {
    pub specialty_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub date: NaiveDate,
    pub duration_minutes: Option<i64>,
}

const DEFAULT_SLOT_MINUTES: i64 = 30;

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_doctors_public(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DoctorListQuery>,
) -> Result<Json<Value>, AppError> {
    let doctors: Vec<PublicDoctor> = DoctorService::new(&state)
        .list_doctors(true, query.specialty_id)?
        .into_iter()
        .map(PublicDoctor::from)
        .collect();

    Ok(Json(json!({
        "doctors": doctors,
        "total": doctors.len()
    })))
}

#[axum::debug_handler]
pub async fn get_doctor_public(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let doctor = DoctorService::new(&state).get_doctor(doctor_id, true)?;
    Ok(Json(json!(PublicDoctor::from(doctor))))
}

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    // Inactive doctors do not publish a schedule
    DoctorService::new(&state).get_doctor(doctor_id, true)?;
    let windows = AvailabilityService::new(&state).get_windows(doctor_id)?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "windows": windows
    })))
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let duration = query.duration_minutes.unwrap_or(DEFAULT_SLOT_MINUTES);
    let slots = AvailabilityService::new(&state).available_slots(doctor_id, query.date, duration)?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": query.date,
        "duration_minutes": duration,
        "slots": slots
    })))
}

#[axum::debug_handler]
pub async fn list_specialties(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let specialties = SpecialtyService::new(&state).list_specialties()?;

    Ok(Json(json!({
        "specialties": specialties,
        "total": specialties.len()
    })))
}

#[axum::debug_handler]
pub async fn get_specialty(
    State(state): State<Arc<AppState>>,
    Path(specialty_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let specialty = SpecialtyService::new(&state).get_specialty(specialty_id)?;
    Ok(Json(json!(specialty)))
}

// ==============================================================================
// ADMIN HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_doctors_admin(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DoctorListQuery>,
) -> Result<Json<Value>, AppError> {
    let doctors = DoctorService::new(&state).list_doctors(false, query.specialty_id)?;

    Ok(Json(json!({
        "doctors": doctors,
        "total": doctors.len()
    })))
}

#[axum::debug_handler]
pub async fn create_doctor(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateDoctorRequest>,
) -> Result<Json<Value>, AppError> {
    let doctor = DoctorService::new(&state).create_doctor(request)?;
    Ok(Json(json!(doctor)))
}

#[axum::debug_handler]
pub async fn update_doctor(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<UpdateDoctorRequest>,
) -> Result<Json<Value>, AppError> {
    let doctor = DoctorService::new(&state).update_doctor(doctor_id, request)?;
    Ok(Json(json!(doctor)))
}

#[axum::debug_handler]
pub async fn deactivate_doctor(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let doctor = DoctorService::new(&state).deactivate_doctor(doctor_id)?;
    Ok(Json(json!(doctor)))
}

#[axum::debug_handler]
pub async fn set_availability(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<SetAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    let windows = AvailabilityService::new(&state).set_windows(doctor_id, request.windows)?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "windows": windows
    })))
}

#[axum::debug_handler]
pub async fn create_specialty(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSpecialtyRequest>,
) -> Result<Json<Value>, AppError> {
    let specialty = SpecialtyService::new(&state).create_specialty(request)?;
    Ok(Json(json!(specialty)))
}

#[axum::debug_handler]
pub async fn update_specialty(
    State(state): State<Arc<AppState>>,
    Path(specialty_id): Path<Uuid>,
    Json(request): Json<UpdateSpecialtyRequest>,
) -> Result<Json<Value>, AppError> {
    let specialty = SpecialtyService::new(&state).update_specialty(specialty_id, request)?;
    Ok(Json(json!(specialty)))
}

#[axum::debug_handler]
pub async fn delete_specialty(
    State(state): State<Arc<AppState>>,
    Path(specialty_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    SpecialtyService::new(&state).delete_specialty(specialty_id)?;
    Ok(Json(json!({ "deleted": true, "id": specialty_id })))
}
