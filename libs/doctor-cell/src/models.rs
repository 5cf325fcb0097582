use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;
use shared_models::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    pub timezone: String,
    pub external_calendar_url: Option<String>,
    pub calendar_push_url: Option<String>,
    pub is_active: bool,
    pub specialty_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view of a doctor: calendar URLs are back-office only.
#[derive(Debug, Clone, Serialize)]
pub struct PublicDoctor {
    pub id: Uuid,
    pub name: String,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    pub timezone: String,
    pub specialty_ids: Vec<Uuid>,
}

impl From<Doctor> for PublicDoctor {
    fn from(doctor: Doctor) -> Self {
        Self {
            id: doctor.id,
            name: doctor.name,
            bio: doctor.bio,
            photo_url: doctor.photo_url,
            timezone: doctor.timezone,
            specialty_ids: doctor.specialty_ids,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specialty {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Weekly recurring window in the doctor's local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub day_of_week: u8, // 0 = Sunday, 1 = Monday, etc.
    #[serde(with = "clock")]
    pub start_time: NaiveTime,
    #[serde(with = "clock")]
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDoctorRequest {
    pub name: String,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    pub timezone: Option<String>,
    pub external_calendar_url: Option<String>,
    pub calendar_push_url: Option<String>,
    #[serde(default)]
    pub specialty_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateDoctorRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    pub timezone: Option<String>,
    pub external_calendar_url: Option<String>,
    pub calendar_push_url: Option<String>,
    pub is_active: Option<bool>,
    pub specialty_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSpecialtyRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSpecialtyRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityWindowInput {
    pub day_of_week: u8,
    #[serde(with = "clock")]
    pub start_time: NaiveTime,
    #[serde(with = "clock")]
    pub end_time: NaiveTime,
}

#[derive(Debug, Deserialize)]
pub struct SetAvailabilityRequest {
    pub windows: Vec<AvailabilityWindowInput>,
}

#[derive(Debug, Error)]
pub enum DoctorError {
    #[error("Doctor not found")]
    NotFound,

    #[error("Specialty not found")]
    SpecialtyNotFound,

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    InUse(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for DoctorError {
    fn from(err: rusqlite::Error) -> Self {
        DoctorError::Database(err.into())
    }
}

impl From<DoctorError> for AppError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound | DoctorError::SpecialtyNotFound => AppError::NotFound(err.to_string()),
            DoctorError::InvalidTimezone(_) | DoctorError::Validation(_) => {
                AppError::ValidationError(err.to_string())
            }
            DoctorError::Duplicate(_) | DoctorError::InUse(_) => AppError::Conflict(err.to_string()),
            DoctorError::Database(e) => e.into(),
        }
    }
}

/// `HH:MM` wall-clock times; `HH:MM:SS` is accepted on input.
pub mod clock {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(value: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(value, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
            .ok()
    }

    pub fn serialize<S: Serializer>(value: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time '{}', expected HH:MM", raw)))
    }
}
