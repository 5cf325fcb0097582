use tracing::{debug, warn};

use shared_database::{truncate_to_seconds, AppState, Database};

use crate::models::{AppointmentError, ConflictCheckRequest, ConflictCheckResponse};
use crate::services::store::overlapping_appointments;

pub struct ConflictDetectionService {
    db: Database,
}

impl ConflictDetectionService {
    pub fn new(state: &AppState) -> Self {
        Self { db: state.db.clone() }
    }

    /// Report the appointments a booking would collide with, without booking.
    pub fn check_conflicts(&self, request: ConflictCheckRequest) -> Result<ConflictCheckResponse, AppointmentError> {
        if request.start_time >= request.end_time {
            return Err(AppointmentError::InvalidTime("start_time must be before end_time".to_string()));
        }

        debug!(
            "Checking conflicts for doctor {} from {} to {}",
            request.doctor_id, request.start_time, request.end_time
        );

        let conflicting_appointments = self.db.with_conn(|conn| {
            overlapping_appointments(
                conn,
                request.doctor_id,
                truncate_to_seconds(request.start_time),
                truncate_to_seconds(request.end_time),
                request.exclude_appointment_id,
            )
        })?;

        let has_conflict = !conflicting_appointments.is_empty();
        if has_conflict {
            warn!(
                "Conflict detected for doctor {} - {} conflicting appointments",
                request.doctor_id,
                conflicting_appointments.len()
            );
        }

        Ok(ConflictCheckResponse {
            has_conflict,
            conflicting_appointments,
        })
    }
}
