//! Row-level access to the `appointments` table.
//!
//! Every function takes the caller's connection so it composes inside the
//! booking and calendar-sync transactions.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use shared_database::{encode_timestamp, get_opt_timestamp, get_opt_uuid, get_timestamp, get_uuid, DatabaseError};

use crate::models::{Appointment, AppointmentSource, AppointmentStatus};

pub const APPOINTMENT_COLUMNS: &str = "id, patient_id, doctor_id, specialty_id, start_time, end_time, status, source, \
     external_event_id, notes, cancellation_reason, cancelled_at, created_at, updated_at";

/// Fields of a row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Uuid,
    pub specialty_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub source: AppointmentSource,
    pub external_event_id: Option<String>,
    pub notes: Option<String>,
}

pub fn appointment_from_row(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: get_uuid(row, "id")?,
        patient_id: get_opt_uuid(row, "patient_id")?,
        doctor_id: get_uuid(row, "doctor_id")?,
        specialty_id: get_opt_uuid(row, "specialty_id")?,
        start_time: get_timestamp(row, "start_time")?,
        end_time: get_timestamp(row, "end_time")?,
        status: row.get("status")?,
        source: row.get("source")?,
        external_event_id: row.get("external_event_id")?,
        notes: row.get("notes")?,
        cancellation_reason: row.get("cancellation_reason")?,
        cancelled_at: get_opt_timestamp(row, "cancelled_at")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

pub fn find_appointment(conn: &Connection, appointment_id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
    let sql = format!("SELECT {} FROM appointments WHERE id = ?1", APPOINTMENT_COLUMNS);
    Ok(conn
        .query_row(&sql, [appointment_id.to_string()], appointment_from_row)
        .optional()?)
}

pub fn insert_appointment(conn: &Connection, new: &NewAppointment, now: DateTime<Utc>) -> Result<Appointment, DatabaseError> {
    let id = Uuid::new_v4();
    let now = encode_timestamp(&now);

    conn.execute(
        "INSERT INTO appointments (id, patient_id, doctor_id, specialty_id, start_time, end_time, status, source,
                                   external_event_id, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            id.to_string(),
            new.patient_id.map(|id| id.to_string()),
            new.doctor_id.to_string(),
            new.specialty_id.map(|id| id.to_string()),
            encode_timestamp(&new.start_time),
            encode_timestamp(&new.end_time),
            new.status,
            new.source,
            new.external_event_id,
            new.notes,
            now
        ],
    )?;

    find_appointment(conn, id)?
        .ok_or_else(|| DatabaseError::ConstraintViolation(format!("appointment {} missing after insert", id)))
}

/// Move an appointment to a new interval; a cancelled row is reactivated with `status`.
pub fn reschedule_appointment(
    conn: &Connection,
    appointment_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: AppointmentStatus,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE appointments
         SET start_time = ?2, end_time = ?3, status = ?4,
             cancellation_reason = CASE WHEN ?4 = 'cancelled' THEN cancellation_reason ELSE NULL END,
             cancelled_at = CASE WHEN ?4 = 'cancelled' THEN cancelled_at ELSE NULL END,
             updated_at = ?5
         WHERE id = ?1",
        params![
            appointment_id.to_string(),
            encode_timestamp(&start_time),
            encode_timestamp(&end_time),
            status,
            encode_timestamp(&now)
        ],
    )?;
    Ok(())
}

/// Soft delete: the row stays for the audit trail.
pub fn mark_cancelled(
    conn: &Connection,
    appointment_id: Uuid,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let now = encode_timestamp(&now);
    conn.execute(
        "UPDATE appointments
         SET status = 'cancelled', cancellation_reason = ?2, cancelled_at = ?3, updated_at = ?3
         WHERE id = ?1 AND status <> 'cancelled'",
        params![appointment_id.to_string(), reason, now],
    )?;
    Ok(())
}

/// Non-cancelled appointments of a doctor overlapping `[start, end)`.
pub fn overlapping_appointments(
    conn: &Connection,
    doctor_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    exclude_appointment_id: Option<Uuid>,
) -> Result<Vec<Appointment>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM appointments
         WHERE doctor_id = ?1
           AND status <> 'cancelled'
           AND start_time < ?3
           AND end_time > ?2
           AND (?4 IS NULL OR id <> ?4)
         ORDER BY start_time",
        APPOINTMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let appointments = stmt
        .query_map(
            params![
                doctor_id.to_string(),
                encode_timestamp(&start_time),
                encode_timestamp(&end_time),
                exclude_appointment_id.map(|id| id.to_string())
            ],
            appointment_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(appointments)
}

/// A doctor's non-cancelled appointments from `source`, ordered by start time.
pub fn active_appointments_for_doctor(
    conn: &Connection,
    doctor_id: Uuid,
    source: AppointmentSource,
) -> Result<Vec<Appointment>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM appointments
         WHERE doctor_id = ?1 AND source = ?2 AND status <> 'cancelled'
         ORDER BY start_time",
        APPOINTMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let appointments = stmt
        .query_map(params![doctor_id.to_string(), source], appointment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(appointments)
}
