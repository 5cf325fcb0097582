use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Duration;
use chrono_tz::Tz;
use futures::future::join_all;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use appointment_cell::models::{AppointmentSource, AppointmentStatus};
use appointment_cell::services::store::active_appointments_for_doctor;
use doctor_cell::models::Doctor;
use doctor_cell::services::availability::parse_timezone;
use doctor_cell::services::doctor::{doctors_with_feeds, find_doctor};
use shared_database::{now_timestamp, AppState};

use crate::feed::{CalendarFeedSource, HttpCalendarFeed};
use crate::ical::{parse_calendar, write_calendar, ExportEvent};
use crate::models::{ReconcileStats, SyncError, SyncRun, SyncRunStatus, SyncSettings, UpdateSyncSettingsRequest};
use crate::services::reconcile::{export_uid, reconcile_events};
use crate::services::settings::{list_runs, load_settings, record_run, save_settings};

type DoctorLock = Arc<tokio::sync::Mutex<()>>;

/// Pulls external feeds into the appointment book and publishes it back.
///
/// Runs for the same doctor never overlap: the scheduler and manual
/// triggers share one async lock per doctor.
pub struct CalendarSyncService {
    state: Arc<AppState>,
    source: Arc<dyn CalendarFeedSource>,
    locks: Mutex<HashMap<Uuid, DoctorLock>>,
}

impl CalendarSyncService {
    pub fn new(state: Arc<AppState>, source: Arc<dyn CalendarFeedSource>) -> Self {
        Self {
            state,
            source,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Service backed by HTTP feeds with the configured timeout.
    pub fn with_http(state: Arc<AppState>) -> Result<Self, SyncError> {
        let timeout = StdDuration::from_secs(state.config.ical_fetch_timeout_seconds);
        let source = HttpCalendarFeed::new(timeout)?;
        Ok(Self::new(state, Arc::new(source)))
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    fn doctor_lock(&self, doctor_id: Uuid) -> DoctorLock {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(doctor_id).or_default().clone()
    }

    pub fn settings(&self) -> Result<SyncSettings, SyncError> {
        self.state.db.with_conn(load_settings)
    }

    pub fn update_settings(&self, request: UpdateSyncSettingsRequest) -> Result<SyncSettings, SyncError> {
        let settings = self
            .state
            .db
            .with_conn(|conn| save_settings(conn, &request, now_timestamp()))?;

        info!(
            "Calendar sync settings updated: enabled={} interval={}m bidirectional={}",
            settings.enabled, settings.interval_minutes, settings.bidirectional
        );
        Ok(settings)
    }

    pub fn runs(&self, doctor_id: Uuid, limit: Option<i64>) -> Result<Vec<SyncRun>, SyncError> {
        self.state.db.with_conn(|conn| {
            find_doctor(conn, doctor_id)?.ok_or(SyncError::DoctorNotFound)?;
            list_runs(conn, doctor_id, limit)
        })
    }

    /// Sync one doctor now. Feed failures are recorded as a failed run and returned as errors.
    #[instrument(skip(self))]
    pub async fn sync_doctor(&self, doctor_id: Uuid) -> Result<SyncRun, SyncError> {
        let doctor = self
            .state
            .db
            .with_conn(|conn| find_doctor(conn, doctor_id))?
            .ok_or(SyncError::DoctorNotFound)?;

        if feed_url(&doctor).is_none() {
            return Err(SyncError::NoFeed);
        }

        let settings = self.settings()?;
        let (run, failure) = self.run_for(&doctor, &settings).await?;
        match failure {
            Some(err) => Err(err),
            None => Ok(run),
        }
    }

    /// Sync every active doctor with a feed, concurrently.
    #[instrument(skip(self))]
    pub async fn sync_all(&self) -> Result<Vec<SyncRun>, SyncError> {
        let doctors = self.state.db.with_conn(doctors_with_feeds)?;
        let settings = self.settings()?;
        info!("Syncing {} external calendars", doctors.len());

        let results = join_all(doctors.iter().map(|doctor| self.run_for(doctor, &settings))).await;

        let mut runs = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok((run, _)) => runs.push(run),
                Err(err) => error!("Could not record calendar sync run: {}", err),
            }
        }
        Ok(runs)
    }

    /// One locked run: fetch, reconcile, record, then push if enabled.
    async fn run_for(
        &self,
        doctor: &Doctor,
        settings: &SyncSettings,
    ) -> Result<(SyncRun, Option<SyncError>), SyncError> {
        let lock = self.doctor_lock(doctor.id);
        let _guard = lock.lock().await;

        let started_at = now_timestamp();
        let outcome = self.fetch_and_reconcile(doctor).await;
        let finished_at = now_timestamp();

        let (run, failure) = match outcome {
            Ok(stats) => {
                if !stats.is_noop() {
                    info!(
                        "Calendar sync for doctor {}: {} created, {} updated, {} cancelled, {} displaced, {} skipped",
                        doctor.id, stats.created, stats.updated, stats.cancelled, stats.displaced, stats.skipped
                    );
                }
                let run = SyncRun {
                    id: Uuid::new_v4(),
                    doctor_id: doctor.id,
                    started_at,
                    finished_at,
                    status: SyncRunStatus::Succeeded,
                    stats,
                    error: None,
                };
                (run, None)
            }
            Err(err) => {
                warn!("Calendar sync for doctor {} failed: {}", doctor.id, err);
                let run = SyncRun {
                    id: Uuid::new_v4(),
                    doctor_id: doctor.id,
                    started_at,
                    finished_at,
                    status: SyncRunStatus::Failed,
                    stats: ReconcileStats::default(),
                    error: Some(err.to_string()),
                };
                (run, Some(err))
            }
        };

        self.state.db.with_conn(|conn| record_run(conn, &run))?;

        if failure.is_none() && settings.bidirectional {
            self.push(doctor).await;
        }

        Ok((run, failure))
    }

    async fn fetch_and_reconcile(&self, doctor: &Doctor) -> Result<ReconcileStats, SyncError> {
        let url = feed_url(doctor).ok_or(SyncError::NoFeed)?;
        let body = self.source.fetch(url).await?;

        let tz = self.doctor_timezone(doctor);
        let default_length = Duration::minutes(self.state.config.ical_default_event_minutes);
        let events = parse_calendar(&body, tz, default_length)?;

        let uid_domain = self.state.config.ical_uid_domain.clone();
        let now = now_timestamp();
        self.state
            .db
            .transaction(|tx| reconcile_events(tx, doctor.id, &events, &uid_domain, now))
    }

    /// Push failures are logged and never fail the run.
    async fn push(&self, doctor: &Doctor) {
        let Some(url) = doctor.calendar_push_url.as_deref().filter(|url| !url.trim().is_empty()) else {
            return;
        };

        let calendar = match self.export_for(doctor) {
            Ok(calendar) => calendar,
            Err(err) => {
                error!("Could not build calendar for doctor {}: {}", doctor.id, err);
                return;
            }
        };

        match self.source.push(url, calendar).await {
            Ok(()) => info!("Pushed calendar of doctor {} to {}", doctor.id, url),
            Err(err) => warn!("Calendar push for doctor {} failed: {}", doctor.id, err),
        }
    }

    /// The doctor's internal, non-cancelled appointments as an iCalendar document.
    pub fn export_calendar(&self, doctor_id: Uuid) -> Result<String, SyncError> {
        let doctor = self
            .state
            .db
            .with_conn(|conn| find_doctor(conn, doctor_id))?
            .ok_or(SyncError::DoctorNotFound)?;

        self.export_for(&doctor)
    }

    fn export_for(&self, doctor: &Doctor) -> Result<String, SyncError> {
        let appointments = self
            .state
            .db
            .with_conn(|conn| active_appointments_for_doctor(conn, doctor.id, AppointmentSource::Internal))?;

        let uid_domain = &self.state.config.ical_uid_domain;
        let events: Vec<ExportEvent> = appointments
            .iter()
            .map(|appointment| ExportEvent {
                uid: export_uid(appointment.id, uid_domain),
                start: appointment.start_time,
                end: appointment.end_time,
                // Patient details stay out of third-party calendars
                summary: "Clinic appointment".to_string(),
                status: match appointment.status {
                    AppointmentStatus::Pending => "TENTATIVE",
                    _ => "CONFIRMED",
                },
                stamp: appointment.updated_at,
            })
            .collect();

        Ok(write_calendar(&doctor.name, &events))
    }

    fn doctor_timezone(&self, doctor: &Doctor) -> Tz {
        parse_timezone(&doctor.timezone)
            .or_else(|_| parse_timezone(&self.state.config.clinic_timezone))
            .unwrap_or_else(|_| {
                warn!("Doctor {} has unusable timezone {}, using UTC", doctor.id, doctor.timezone);
                Tz::UTC
            })
    }
}

fn feed_url(doctor: &Doctor) -> Option<&str> {
    doctor
        .external_calendar_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
}
