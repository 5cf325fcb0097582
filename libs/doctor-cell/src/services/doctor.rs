use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_database::{encode_timestamp, get_timestamp, get_uuid, now_timestamp, AppState, Database, DatabaseError};
use shared_utils::validation::{is_valid_email, require_text};

use crate::models::{CreateDoctorRequest, Doctor, DoctorError, UpdateDoctorRequest};
use crate::services::availability::parse_timezone;

const DOCTOR_COLUMNS: &str = "id, name, email, bio, photo_url, timezone, external_calendar_url, \
     calendar_push_url, is_active, created_at, updated_at";

pub struct DoctorService {
    db: Database,
}

impl DoctorService {
    pub fn new(state: &AppState) -> Self {
        Self { db: state.db.clone() }
    }

    /// Doctors ordered by name, optionally filtered by specialty.
    pub fn list_doctors(&self, active_only: bool, specialty_id: Option<Uuid>) -> Result<Vec<Doctor>, DoctorError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM doctors d
                 WHERE (?1 = 0 OR d.is_active = 1)
                   AND (?2 IS NULL OR EXISTS (
                        SELECT 1 FROM doctor_specialties ds
                        WHERE ds.doctor_id = d.id AND ds.specialty_id = ?2))
                 ORDER BY d.name COLLATE NOCASE",
                DOCTOR_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![active_only, specialty_id.map(|id| id.to_string())],
                doctor_from_row,
            )?;

            let mut doctors = Vec::new();
            for row in rows {
                let mut doctor = row?;
                doctor.specialty_ids = load_specialty_ids(conn, doctor.id)?;
                doctors.push(doctor);
            }

            debug!("Listed {} doctors", doctors.len());
            Ok(doctors)
        })
    }

    pub fn get_doctor(&self, doctor_id: Uuid, active_only: bool) -> Result<Doctor, DoctorError> {
        let doctor = self
            .db
            .with_conn(|conn| find_doctor(conn, doctor_id))?
            .ok_or(DoctorError::NotFound)?;

        if active_only && !doctor.is_active {
            return Err(DoctorError::NotFound);
        }

        Ok(doctor)
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub fn create_doctor(&self, request: CreateDoctorRequest) -> Result<Doctor, DoctorError> {
        let name = require_text("name", &request.name).map_err(DoctorError::Validation)?;
        let email = normalize_email(request.email)?;
        let timezone = request.timezone.unwrap_or_else(|| "UTC".to_string());
        parse_timezone(&timezone)?;

        let id = Uuid::new_v4();
        let now = encode_timestamp(&now_timestamp());

        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO doctors (id, name, email, bio, photo_url, timezone, external_calendar_url,
                                      calendar_push_url, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9)",
                params![
                    id.to_string(),
                    name,
                    email,
                    request.bio,
                    request.photo_url,
                    timezone,
                    blank_to_none(request.external_calendar_url),
                    blank_to_none(request.calendar_push_url),
                    now
                ],
            )?;
            replace_specialties(tx, id, &request.specialty_ids)?;
            Ok::<_, DoctorError>(())
        })?;

        info!("Created doctor {}", id);
        self.get_doctor(id, false)
    }

    #[instrument(skip(self, request))]
    pub fn update_doctor(&self, doctor_id: Uuid, request: UpdateDoctorRequest) -> Result<Doctor, DoctorError> {
        let current = self.get_doctor(doctor_id, false)?;

        let name = match request.name {
            Some(name) => require_text("name", &name).map_err(DoctorError::Validation)?,
            None => current.name,
        };
        let email = match request.email {
            Some(email) => normalize_email(Some(email))?,
            None => current.email,
        };
        let timezone = match request.timezone {
            Some(timezone) => {
                parse_timezone(&timezone)?;
                timezone
            }
            None => current.timezone,
        };
        let external_calendar_url = match request.external_calendar_url {
            Some(url) => blank_to_none(Some(url)),
            None => current.external_calendar_url,
        };
        let calendar_push_url = match request.calendar_push_url {
            Some(url) => blank_to_none(Some(url)),
            None => current.calendar_push_url,
        };

        self.db.transaction(|tx| {
            tx.execute(
                "UPDATE doctors
                 SET name = ?2, email = ?3, bio = ?4, photo_url = ?5, timezone = ?6,
                     external_calendar_url = ?7, calendar_push_url = ?8, is_active = ?9, updated_at = ?10
                 WHERE id = ?1",
                params![
                    doctor_id.to_string(),
                    name,
                    email,
                    request.bio.or(current.bio),
                    request.photo_url.or(current.photo_url),
                    timezone,
                    external_calendar_url,
                    calendar_push_url,
                    request.is_active.unwrap_or(current.is_active),
                    encode_timestamp(&now_timestamp())
                ],
            )?;

            if let Some(specialty_ids) = &request.specialty_ids {
                replace_specialties(tx, doctor_id, specialty_ids)?;
            }
            Ok::<_, DoctorError>(())
        })?;

        info!("Updated doctor {}", doctor_id);
        self.get_doctor(doctor_id, false)
    }

    /// Doctors are never hard-deleted: their appointments keep referencing them.
    #[instrument(skip(self))]
    pub fn deactivate_doctor(&self, doctor_id: Uuid) -> Result<Doctor, DoctorError> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE doctors SET is_active = 0, updated_at = ?2 WHERE id = ?1",
                params![doctor_id.to_string(), encode_timestamp(&now_timestamp())],
            )
            .map_err(DatabaseError::from)
        })?;

        if changed == 0 {
            return Err(DoctorError::NotFound);
        }

        info!("Deactivated doctor {}", doctor_id);
        self.get_doctor(doctor_id, false)
    }
}

pub fn find_doctor(conn: &Connection, doctor_id: Uuid) -> Result<Option<Doctor>, DatabaseError> {
    let sql = format!("SELECT {} FROM doctors WHERE id = ?1", DOCTOR_COLUMNS);
    let doctor = conn
        .query_row(&sql, [doctor_id.to_string()], doctor_from_row)
        .optional()?;

    match doctor {
        Some(mut doctor) => {
            doctor.specialty_ids = load_specialty_ids(conn, doctor.id)?;
            Ok(Some(doctor))
        }
        None => Ok(None),
    }
}

/// Active doctors that publish an external calendar feed.
pub fn doctors_with_feeds(conn: &Connection) -> Result<Vec<Doctor>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM doctors
         WHERE is_active = 1 AND external_calendar_url IS NOT NULL AND external_calendar_url <> ''
         ORDER BY name",
        DOCTOR_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let doctors = stmt
        .query_map([], doctor_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(doctors)
}

pub fn doctor_offers_specialty(conn: &Connection, doctor_id: Uuid, specialty_id: Uuid) -> Result<bool, DatabaseError> {
    let offered = conn
        .query_row(
            "SELECT 1 FROM doctor_specialties WHERE doctor_id = ?1 AND specialty_id = ?2",
            params![doctor_id.to_string(), specialty_id.to_string()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(offered)
}

fn load_specialty_ids(conn: &Connection, doctor_id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT ds.specialty_id FROM doctor_specialties ds
         JOIN specialties s ON s.id = ds.specialty_id
         WHERE ds.doctor_id = ?1
         ORDER BY s.name COLLATE NOCASE",
    )?;
    let ids = stmt
        .query_map([doctor_id.to_string()], |row| get_uuid(row, "specialty_id"))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn replace_specialties(conn: &Connection, doctor_id: Uuid, specialty_ids: &[Uuid]) -> Result<(), DoctorError> {
    conn.execute("DELETE FROM doctor_specialties WHERE doctor_id = ?1", [doctor_id.to_string()])?;

    for specialty_id in specialty_ids {
        let exists = conn
            .query_row("SELECT 1 FROM specialties WHERE id = ?1", [specialty_id.to_string()], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(DoctorError::SpecialtyNotFound);
        }

        conn.execute(
            "INSERT OR IGNORE INTO doctor_specialties (doctor_id, specialty_id) VALUES (?1, ?2)",
            params![doctor_id.to_string(), specialty_id.to_string()],
        )?;
    }
    Ok(())
}

fn doctor_from_row(row: &Row<'_>) -> rusqlite::Result<Doctor> {
    Ok(Doctor {
        id: get_uuid(row, "id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        bio: row.get("bio")?,
        photo_url: row.get("photo_url")?,
        timezone: row.get("timezone")?,
        external_calendar_url: row.get("external_calendar_url")?,
        calendar_push_url: row.get("calendar_push_url")?,
        is_active: row.get("is_active")?,
        specialty_ids: Vec::new(),
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

fn normalize_email(email: Option<String>) -> Result<Option<String>, DoctorError> {
    match blank_to_none(email) {
        Some(email) if !is_valid_email(&email) => Err(DoctorError::Validation(format!("Invalid email: {}", email))),
        other => Ok(other.map(|e| e.to_lowercase())),
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
