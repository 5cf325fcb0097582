use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_database::{
    encode_date, encode_timestamp, get_opt_date, get_timestamp, get_uuid, now_timestamp, AppState, Database,
    DatabaseError,
};
use shared_utils::validation::{is_valid_email, is_valid_phone, require_text};

use crate::models::{
    CreatePatientRequest, Patient, PatientAppointment, PatientError, PatientSearchQuery, UpdatePatientRequest,
};

const PATIENT_COLUMNS: &str = "id, first_name, last_name, email, phone, date_of_birth, notes, created_at, updated_at";
const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

pub struct PatientService {
    db: Database,
}

impl PatientService {
    pub fn new(state: &AppState) -> Self {
        Self { db: state.db.clone() }
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub fn create_patient(&self, request: CreatePatientRequest) -> Result<Patient, PatientError> {
        self.db.transaction(|tx| {
            if find_patient_by_email(tx, &request.email)?.is_some() {
                return Err(PatientError::EmailAlreadyExists { email: request.email.clone() });
            }
            insert_patient(tx, request)
        })
    }

    pub fn get_patient(&self, patient_id: Uuid) -> Result<Patient, PatientError> {
        self.db
            .with_conn(|conn| find_patient(conn, patient_id))?
            .ok_or(PatientError::NotFound)
    }

    #[instrument(skip(self, request))]
    pub fn update_patient(&self, patient_id: Uuid, request: UpdatePatientRequest) -> Result<Patient, PatientError> {
        self.db.transaction(|tx| {
            let current = find_patient(tx, patient_id)?.ok_or(PatientError::NotFound)?;

            let first_name = match request.first_name {
                Some(value) => require_text("first_name", &value).map_err(PatientError::ValidationError)?,
                None => current.first_name,
            };
            let last_name = match request.last_name {
                Some(value) => require_text("last_name", &value).map_err(PatientError::ValidationError)?,
                None => current.last_name,
            };
            let email = match request.email {
                Some(value) => {
                    let email = normalize_email(&value)?;
                    if let Some(other) = find_patient_by_email(tx, &email)? {
                        if other.id != patient_id {
                            return Err(PatientError::EmailAlreadyExists { email });
                        }
                    }
                    email
                }
                None => current.email,
            };
            let phone = match request.phone {
                Some(value) => normalize_phone(Some(value))?,
                None => current.phone,
            };

            tx.execute(
                "UPDATE patients
                 SET first_name = ?2, last_name = ?3, email = ?4, phone = ?5, date_of_birth = ?6,
                     notes = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    patient_id.to_string(),
                    first_name,
                    last_name,
                    email,
                    phone,
                    request.date_of_birth.or(current.date_of_birth).map(|d| encode_date(&d)),
                    request.notes.or(current.notes),
                    encode_timestamp(&now_timestamp())
                ],
            )?;

            info!("Updated patient {}", patient_id);
            find_patient(tx, patient_id)?.ok_or(PatientError::NotFound)
        })
    }

    /// Name or email substring search, newest first.
    pub fn search_patients(&self, query: PatientSearchQuery) -> Result<Vec<Patient>, PatientError> {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = query.offset.unwrap_or(0).max(0);
        let pattern = query
            .q
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", q));

        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM patients
                 WHERE ?1 IS NULL
                    OR lower(first_name || ' ' || last_name) LIKE ?1
                    OR lower(email) LIKE ?1
                 ORDER BY created_at DESC, last_name
                 LIMIT ?2 OFFSET ?3",
                PATIENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let patients = stmt
                .query_map(params![pattern, limit, offset], patient_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            debug!("Patient search returned {} rows", patients.len());
            Ok(patients)
        })
    }

    pub fn patient_appointments(&self, patient_id: Uuid) -> Result<Vec<PatientAppointment>, PatientError> {
        self.db.with_conn(|conn| {
            find_patient(conn, patient_id)?.ok_or(PatientError::NotFound)?;

            let mut stmt = conn.prepare(
                "SELECT a.id, a.doctor_id, d.name AS doctor_name, a.start_time, a.end_time, a.status, a.notes
                 FROM appointments a
                 JOIN doctors d ON d.id = a.doctor_id
                 WHERE a.patient_id = ?1
                 ORDER BY a.start_time DESC",
            )?;
            let appointments = stmt
                .query_map([patient_id.to_string()], |row| {
                    Ok(PatientAppointment {
                        id: get_uuid(row, "id")?,
                        doctor_id: get_uuid(row, "doctor_id")?,
                        doctor_name: row.get("doctor_name")?,
                        start_time: get_timestamp(row, "start_time")?,
                        end_time: get_timestamp(row, "end_time")?,
                        status: row.get("status")?,
                        notes: row.get("notes")?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(appointments)
        })
    }
}

pub fn find_patient(conn: &Connection, patient_id: Uuid) -> Result<Option<Patient>, DatabaseError> {
    let sql = format!("SELECT {} FROM patients WHERE id = ?1", PATIENT_COLUMNS);
    Ok(conn.query_row(&sql, [patient_id.to_string()], patient_from_row).optional()?)
}

pub fn find_patient_by_email(conn: &Connection, email: &str) -> Result<Option<Patient>, DatabaseError> {
    let sql = format!("SELECT {} FROM patients WHERE email = ?1 COLLATE NOCASE", PATIENT_COLUMNS);
    Ok(conn.query_row(&sql, [email.trim()], patient_from_row).optional()?)
}

/// Reuse the patient record matching the email, or register a new one.
///
/// Runs on the caller's connection so public booking can do it inside the
/// same transaction as the appointment insert.
pub fn find_or_create_by_email(conn: &Connection, request: CreatePatientRequest) -> Result<Patient, PatientError> {
    let email = normalize_email(&request.email)?;
    if let Some(existing) = find_patient_by_email(conn, &email)? {
        debug!("Booking matched existing patient {}", existing.id);
        return Ok(existing);
    }
    insert_patient(conn, request)
}

fn insert_patient(conn: &Connection, request: CreatePatientRequest) -> Result<Patient, PatientError> {
    let first_name = require_text("first_name", &request.first_name).map_err(PatientError::ValidationError)?;
    let last_name = require_text("last_name", &request.last_name).map_err(PatientError::ValidationError)?;
    let email = normalize_email(&request.email)?;
    let phone = normalize_phone(request.phone)?;

    let id = Uuid::new_v4();
    let now = encode_timestamp(&now_timestamp());
    conn.execute(
        "INSERT INTO patients (id, first_name, last_name, email, phone, date_of_birth, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id.to_string(),
            first_name,
            last_name,
            email,
            phone,
            request.date_of_birth.map(|d| encode_date(&d)),
            request.notes,
            now
        ],
    )?;

    info!("Registered patient {}", id);
    find_patient(conn, id)?.ok_or(PatientError::NotFound)
}

fn normalize_email(email: &str) -> Result<String, PatientError> {
    let email = email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(PatientError::ValidationError(format!("Invalid email: {}", email)));
    }
    Ok(email)
}

fn normalize_phone(phone: Option<String>) -> Result<Option<String>, PatientError> {
    match phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()) {
        Some(phone) if !is_valid_phone(&phone) => {
            Err(PatientError::ValidationError(format!("Invalid phone number: {}", phone)))
        }
        other => Ok(other),
    }
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: get_uuid(row, "id")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        date_of_birth: get_opt_date(row, "date_of_birth")?,
        notes: row.get("notes")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_utils::test_utils::TestContext;

    fn request(email: &str) -> CreatePatientRequest {
        CreatePatientRequest {
            first_name: "Lucia".into(),
            last_name: "Fernandez".into(),
            email: email.into(),
            phone: Some("+34 600 111 222".into()),
            date_of_birth: None,
            notes: None,
        }
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let ctx = TestContext::new();
        let service = PatientService::new(&ctx.state);

        service.create_patient(request("lucia@example.com")).unwrap();
        let duplicate = service.create_patient(request("LUCIA@example.com"));

        assert_matches!(duplicate, Err(PatientError::EmailAlreadyExists { .. }));
    }

    #[test]
    fn find_or_create_reuses_existing_patient() {
        let ctx = TestContext::new();
        let first = ctx
            .state
            .db
            .transaction(|tx| find_or_create_by_email(tx, request("lucia@example.com")))
            .unwrap();
        let second = ctx
            .state
            .db
            .transaction(|tx| find_or_create_by_email(tx, request(" Lucia@Example.com ")))
            .unwrap();

        assert_eq!(first.id, second.id);
    }

    #[test]
    fn invalid_contact_details_are_rejected() {
        let ctx = TestContext::new();
        let service = PatientService::new(&ctx.state);

        assert_matches!(service.create_patient(request("not-an-email")), Err(PatientError::ValidationError(_)));

        let mut bad_phone = request("lucia@example.com");
        bad_phone.phone = Some("call me maybe".into());
        assert_matches!(service.create_patient(bad_phone), Err(PatientError::ValidationError(_)));
    }

    #[test]
    fn search_matches_name_and_email() {
        let ctx = TestContext::new();
        let service = PatientService::new(&ctx.state);
        service.create_patient(request("lucia@example.com")).unwrap();
        let mut other = request("pablo@example.com");
        other.first_name = "Pablo".into();
        other.last_name = "Ruiz".into();
        service.create_patient(other).unwrap();

        let by_name = service
            .search_patients(PatientSearchQuery { q: Some("ruiz".into()), ..Default::default() })
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].full_name(), "Pablo Ruiz");

        let all = service.search_patients(PatientSearchQuery::default()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn update_changes_only_given_fields() {
        let ctx = TestContext::new();
        let service = PatientService::new(&ctx.state);
        let patient = service.create_patient(request("lucia@example.com")).unwrap();

        let updated = service
            .update_patient(patient.id, UpdatePatientRequest { notes: Some("Allergic to penicillin".into()), ..Default::default() })
            .unwrap();

        assert_eq!(updated.email, "lucia@example.com");
        assert_eq!(updated.notes.as_deref(), Some("Allergic to penicillin"));
        assert_matches!(
            service.update_patient(Uuid::new_v4(), UpdatePatientRequest::default()),
            Err(PatientError::NotFound)
        );
    }
}
