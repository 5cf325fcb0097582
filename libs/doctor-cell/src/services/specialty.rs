use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use shared_database::{encode_timestamp, get_timestamp, get_uuid, now_timestamp, AppState, Database, DatabaseError};
use shared_utils::validation::require_text;

use crate::models::{CreateSpecialtyRequest, DoctorError, Specialty, UpdateSpecialtyRequest};

pub struct SpecialtyService {
    db: Database,
}

impl SpecialtyService {
    pub fn new(state: &AppState) -> Self {
        Self { db: state.db.clone() }
    }

    pub fn list_specialties(&self) -> Result<Vec<Specialty>, DoctorError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, created_at, updated_at
                 FROM specialties ORDER BY name COLLATE NOCASE",
            )?;
            let specialties = stmt
                .query_map([], specialty_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(specialties)
        })
    }

    pub fn get_specialty(&self, specialty_id: Uuid) -> Result<Specialty, DoctorError> {
        self.db
            .with_conn(|conn| find_specialty(conn, specialty_id))?
            .ok_or(DoctorError::SpecialtyNotFound)
    }

    #[instrument(skip(self, request))]
    pub fn create_specialty(&self, request: CreateSpecialtyRequest) -> Result<Specialty, DoctorError> {
        let name = require_text("name", &request.name).map_err(DoctorError::Validation)?;
        let id = Uuid::new_v4();
        let now = encode_timestamp(&now_timestamp());

        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO specialties (id, name, description, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![id.to_string(), name, request.description, now],
                )
                .map_err(DatabaseError::from)
            })
            .map_err(|e| duplicate_name(e, &name))?;

        info!("Created specialty {} ({})", name, id);
        self.get_specialty(id)
    }

    #[instrument(skip(self, request))]
    pub fn update_specialty(&self, specialty_id: Uuid, request: UpdateSpecialtyRequest) -> Result<Specialty, DoctorError> {
        let current = self.get_specialty(specialty_id)?;
        let name = match request.name {
            Some(name) => require_text("name", &name).map_err(DoctorError::Validation)?,
            None => current.name,
        };

        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE specialties SET name = ?2, description = ?3, updated_at = ?4 WHERE id = ?1",
                    params![
                        specialty_id.to_string(),
                        name,
                        request.description.or(current.description),
                        encode_timestamp(&now_timestamp())
                    ],
                )
                .map_err(DatabaseError::from)
            })
            .map_err(|e| duplicate_name(e, &name))?;

        self.get_specialty(specialty_id)
    }

    /// Specialties still referenced by appointments cannot be removed.
    #[instrument(skip(self))]
    pub fn delete_specialty(&self, specialty_id: Uuid) -> Result<(), DoctorError> {
        self.db.transaction(|tx| {
            let in_use: i64 = tx.query_row(
                "SELECT COUNT(*) FROM appointments WHERE specialty_id = ?1",
                [specialty_id.to_string()],
                |row| row.get(0),
            )?;
            if in_use > 0 {
                return Err(DoctorError::InUse(format!(
                    "Specialty is referenced by {} appointment(s)",
                    in_use
                )));
            }

            let deleted = tx.execute("DELETE FROM specialties WHERE id = ?1", [specialty_id.to_string()])?;
            if deleted == 0 {
                return Err(DoctorError::SpecialtyNotFound);
            }
            Ok(())
        })?;

        info!("Deleted specialty {}", specialty_id);
        Ok(())
    }
}

pub fn find_specialty(conn: &Connection, specialty_id: Uuid) -> Result<Option<Specialty>, DatabaseError> {
    let specialty = conn
        .query_row(
            "SELECT id, name, description, created_at, updated_at FROM specialties WHERE id = ?1",
            [specialty_id.to_string()],
            specialty_from_row,
        )
        .optional()?;
    Ok(specialty)
}

fn specialty_from_row(row: &Row<'_>) -> rusqlite::Result<Specialty> {
    Ok(Specialty {
        id: get_uuid(row, "id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

fn duplicate_name(err: DatabaseError, name: &str) -> DoctorError {
    if err.is_unique_violation() {
        DoctorError::Duplicate(format!("Specialty '{}' already exists", name))
    } else {
        DoctorError::Database(err)
    }
}
