use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use doctor_cell::services::availability::{fits_availability, load_windows, parse_timezone};
use doctor_cell::services::doctor::{doctor_offers_specialty, find_doctor};
use doctor_cell::services::specialty::find_specialty;
use patient_cell::services::patient::{find_or_create_by_email, find_patient};
use patient_cell::CreatePatientRequest;
use shared_database::{encode_timestamp, now_timestamp, truncate_to_seconds, AppState, Database};

use crate::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentSource, AppointmentStatus,
    AppointmentValidationRules, BookAppointmentRequest, CreateAppointmentRequest, UpdateAppointmentRequest,
};
use crate::services::store::{
    appointment_from_row, find_appointment, insert_appointment, mark_cancelled, overlapping_appointments,
    NewAppointment, APPOINTMENT_COLUMNS,
};

/// Slot a booking wants to occupy, checked as a unit.
struct SlotRequest {
    doctor_id: Uuid,
    specialty_id: Option<Uuid>,
    patient_id: Option<Uuid>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    exclude_appointment_id: Option<Uuid>,
    check_availability: bool,
    reject_past: bool,
}

pub struct AppointmentBookingService {
    db: Database,
    rules: AppointmentValidationRules,
}

impl AppointmentBookingService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            rules: AppointmentValidationRules::default(),
        }
    }

    pub fn with_rules(mut self, rules: AppointmentValidationRules) -> Self {
        self.rules = rules;
        self
    }

    /// Book a slot from the back office.
    ///
    /// Availability, overlap and insert share one `BEGIN IMMEDIATE`
    /// transaction, so two concurrent bookings of the same slot cannot both
    /// succeed.
    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id))]
    pub fn create_appointment(&self, request: CreateAppointmentRequest) -> Result<Appointment, AppointmentError> {
        let status = request.status.unwrap_or(AppointmentStatus::Pending);
        if !matches!(status, AppointmentStatus::Pending | AppointmentStatus::Confirmed) {
            return Err(AppointmentError::ValidationError(
                "New appointments must be pending or confirmed".to_string(),
            ));
        }

        let now = now_timestamp();
        let appointment = self.db.transaction(|tx| {
            let slot = SlotRequest {
                doctor_id: request.doctor_id,
                specialty_id: request.specialty_id,
                patient_id: request.patient_id,
                start_time: truncate_to_seconds(request.start_time),
                end_time: truncate_to_seconds(request.end_time),
                exclude_appointment_id: None,
                check_availability: true,
                reject_past: true,
            };
            self.validate_slot(tx, &slot, now)?;

            Ok::<_, AppointmentError>(insert_appointment(
                tx,
                &NewAppointment {
                    patient_id: slot.patient_id,
                    doctor_id: slot.doctor_id,
                    specialty_id: slot.specialty_id,
                    start_time: slot.start_time,
                    end_time: slot.end_time,
                    status,
                    source: AppointmentSource::Internal,
                    external_event_id: None,
                    notes: request.notes.clone(),
                },
                now,
            )?)
        })?;

        info!("Created appointment {} for doctor {}", appointment.id, appointment.doctor_id);
        Ok(appointment)
    }

    /// Public booking: registers the patient by email in the same transaction.
    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id))]
    pub fn book_appointment(&self, request: BookAppointmentRequest) -> Result<Appointment, AppointmentError> {
        let now = now_timestamp();
        let appointment = self.db.transaction(|tx| {
            let patient = find_or_create_by_email(
                tx,
                CreatePatientRequest {
                    first_name: request.first_name.clone(),
                    last_name: request.last_name.clone(),
                    email: request.email.clone(),
                    phone: request.phone.clone(),
                    date_of_birth: None,
                    notes: None,
                },
            )?;

            let slot = SlotRequest {
                doctor_id: request.doctor_id,
                specialty_id: request.specialty_id,
                patient_id: Some(patient.id),
                start_time: truncate_to_seconds(request.start_time),
                end_time: truncate_to_seconds(request.end_time),
                exclude_appointment_id: None,
                check_availability: true,
                reject_past: true,
            };
            self.validate_slot(tx, &slot, now)?;

            Ok::<_, AppointmentError>(insert_appointment(
                tx,
                &NewAppointment {
                    patient_id: slot.patient_id,
                    doctor_id: slot.doctor_id,
                    specialty_id: slot.specialty_id,
                    start_time: slot.start_time,
                    end_time: slot.end_time,
                    status: AppointmentStatus::Pending,
                    source: AppointmentSource::Internal,
                    external_event_id: None,
                    notes: request.notes.clone(),
                },
                now,
            )?)
        })?;

        info!("Public booking {} created", appointment.id);
        Ok(appointment)
    }

    pub fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.db
            .with_conn(|conn| find_appointment(conn, appointment_id))?
            .ok_or(AppointmentError::NotFound)
    }

    #[instrument(skip(self, request))]
    pub fn update_appointment(
        &self,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let now = now_timestamp();

        let appointment = self.db.transaction(|tx| {
            let current = find_appointment(tx, appointment_id)?.ok_or(AppointmentError::NotFound)?;

            let doctor_id = request.doctor_id.unwrap_or(current.doctor_id);
            let specialty_id = request.specialty_id.or(current.specialty_id);
            let start_time = request.start_time.map(truncate_to_seconds).unwrap_or(current.start_time);
            let end_time = request.end_time.map(truncate_to_seconds).unwrap_or(current.end_time);

            let slot_changed = doctor_id != current.doctor_id
                || specialty_id != current.specialty_id
                || start_time != current.start_time
                || end_time != current.end_time;
            let next_status = request.status.filter(|status| *status != current.status);

            if current.status.is_terminal() && (slot_changed || next_status.is_some()) {
                return Err(AppointmentError::CannotModify(current.status));
            }

            if let Some(next) = next_status {
                if !current.status.can_transition_to(next) {
                    return Err(AppointmentError::InvalidStatusTransition {
                        from: current.status,
                        to: next,
                    });
                }
            }

            if slot_changed && next_status != Some(AppointmentStatus::Cancelled) {
                let slot = SlotRequest {
                    doctor_id,
                    specialty_id,
                    patient_id: current.patient_id,
                    start_time,
                    end_time,
                    exclude_appointment_id: Some(appointment_id),
                    // Imported events mirror the doctor's own calendar
                    check_availability: current.source == AppointmentSource::Internal,
                    reject_past: start_time != current.start_time,
                };
                self.validate_slot(tx, &slot, now)?;
            }

            tx.execute(
                "UPDATE appointments
                 SET doctor_id = ?2, specialty_id = ?3, start_time = ?4, end_time = ?5, notes = ?6, updated_at = ?7
                 WHERE id = ?1",
                params![
                    appointment_id.to_string(),
                    doctor_id.to_string(),
                    specialty_id.map(|id| id.to_string()),
                    encode_timestamp(&start_time),
                    encode_timestamp(&end_time),
                    request.notes.clone().or(current.notes),
                    encode_timestamp(&now)
                ],
            )?;

            match next_status {
                Some(AppointmentStatus::Cancelled) => mark_cancelled(tx, appointment_id, None, now)?,
                Some(status) => {
                    tx.execute(
                        "UPDATE appointments SET status = ?2 WHERE id = ?1",
                        params![appointment_id.to_string(), status],
                    )?;
                }
                None => {}
            }

            find_appointment(tx, appointment_id)?.ok_or(AppointmentError::NotFound)
        })?;

        info!("Updated appointment {} (status {})", appointment.id, appointment.status);
        Ok(appointment)
    }

    /// Soft cancel. Cancelling twice returns the already-cancelled record.
    #[instrument(skip(self, reason))]
    pub fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let now = now_timestamp();

        self.db.transaction(|tx| {
            let current = find_appointment(tx, appointment_id)?.ok_or(AppointmentError::NotFound)?;

            match current.status {
                AppointmentStatus::Cancelled => {
                    debug!("Appointment {} already cancelled", appointment_id);
                    return Ok(current);
                }
                AppointmentStatus::Completed => {
                    return Err(AppointmentError::InvalidStatusTransition {
                        from: current.status,
                        to: AppointmentStatus::Cancelled,
                    });
                }
                _ => {}
            }

            let reason = reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
            mark_cancelled(tx, appointment_id, reason, now)?;
            info!("Cancelled appointment {}", appointment_id);

            find_appointment(tx, appointment_id)?.ok_or(AppointmentError::NotFound)
        })
    }

    /// Appointments intersecting `[from, to)` ordered by start time.
    pub fn list_appointments(&self, query: AppointmentSearchQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let limit = query
            .limit
            .unwrap_or(self.rules.default_list_limit)
            .clamp(1, self.rules.max_list_limit);
        let offset = query.offset.unwrap_or(0).max(0);

        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM appointments
                 WHERE (?1 IS NULL OR end_time > ?1)
                   AND (?2 IS NULL OR start_time < ?2)
                   AND (?3 IS NULL OR doctor_id = ?3)
                   AND (?4 IS NULL OR patient_id = ?4)
                   AND (?5 IS NULL OR status = ?5)
                   AND (?6 IS NULL OR source = ?6)
                 ORDER BY start_time, id
                 LIMIT ?7 OFFSET ?8",
                APPOINTMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let appointments = stmt
                .query_map(
                    params![
                        query.from.map(|t| encode_timestamp(&truncate_to_seconds(t))),
                        query.to.map(|t| encode_timestamp(&truncate_to_seconds(t))),
                        query.doctor_id.map(|id| id.to_string()),
                        query.patient_id.map(|id| id.to_string()),
                        query.status,
                        query.source,
                        limit,
                        offset
                    ],
                    appointment_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;

            debug!("Listed {} appointments", appointments.len());
            Ok(appointments)
        })
    }

    fn validate_slot(&self, conn: &Connection, slot: &SlotRequest, now: DateTime<Utc>) -> Result<(), AppointmentError> {
        if slot.start_time >= slot.end_time {
            return Err(AppointmentError::InvalidTime("start_time must be before end_time".to_string()));
        }

        let minutes = (slot.end_time - slot.start_time).num_minutes();
        if minutes < self.rules.min_duration_minutes || minutes > self.rules.max_duration_minutes {
            return Err(AppointmentError::ValidationError(format!(
                "Duration must be between {} and {} minutes",
                self.rules.min_duration_minutes, self.rules.max_duration_minutes
            )));
        }

        if slot.reject_past && slot.start_time < now {
            return Err(AppointmentError::InvalidTime("Appointments cannot start in the past".to_string()));
        }

        let doctor = find_doctor(conn, slot.doctor_id)?
            .filter(|doctor| doctor.is_active)
            .ok_or(AppointmentError::DoctorNotFound)?;

        if let Some(specialty_id) = slot.specialty_id {
            find_specialty(conn, specialty_id)?.ok_or(AppointmentError::SpecialtyNotFound)?;
            if !doctor_offers_specialty(conn, doctor.id, specialty_id)? {
                return Err(AppointmentError::ValidationError(
                    "Doctor does not offer the requested specialty".to_string(),
                ));
            }
        }

        if let Some(patient_id) = slot.patient_id {
            find_patient(conn, patient_id)?.ok_or(AppointmentError::PatientNotFound)?;
        }

        if slot.check_availability {
            let tz = parse_timezone(&doctor.timezone)
                .map_err(|e| AppointmentError::ValidationError(e.to_string()))?;
            let windows = load_windows(conn, doctor.id)?;
            if !fits_availability(&windows, tz, slot.start_time, slot.end_time) {
                debug!("Slot {} - {} outside availability of doctor {}", slot.start_time, slot.end_time, doctor.id);
                return Err(AppointmentError::OutsideAvailability);
            }
        }

        let conflicts = overlapping_appointments(
            conn,
            slot.doctor_id,
            slot.start_time,
            slot.end_time,
            slot.exclude_appointment_id,
        )?;
        if !conflicts.is_empty() {
            warn!(
                "Slot {} - {} for doctor {} overlaps {} appointment(s)",
                slot.start_time,
                slot.end_time,
                slot.doctor_id,
                conflicts.len()
            );
            return Err(AppointmentError::ConflictError);
        }

        Ok(())
    }
}
