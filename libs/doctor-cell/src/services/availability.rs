use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rusqlite::{params, Connection, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_database::{encode_time, encode_timestamp, get_time, get_timestamp, get_uuid, now_timestamp, AppState, Database, DatabaseError};

use crate::models::{AvailabilityWindow, AvailabilityWindowInput, AvailableSlot, DoctorError};
use crate::services::doctor::find_doctor;

/// Longest slot length the slot finder accepts (one day).
pub const MAX_SLOT_MINUTES: i64 = 24 * 60;

pub struct AvailabilityService {
    db: Database,
}

impl AvailabilityService {
    pub fn new(state: &AppState) -> Self {
        Self { db: state.db.clone() }
    }

    pub fn get_windows(&self, doctor_id: Uuid) -> Result<Vec<AvailabilityWindow>, DoctorError> {
        self.db.with_conn(|conn| {
            find_doctor(conn, doctor_id)?.ok_or(DoctorError::NotFound)?;
            Ok(load_windows(conn, doctor_id)?)
        })
    }

    /// Replace the doctor's whole weekly schedule.
    #[instrument(skip(self, windows), fields(count = windows.len()))]
    pub fn set_windows(
        &self,
        doctor_id: Uuid,
        windows: Vec<AvailabilityWindowInput>,
    ) -> Result<Vec<AvailabilityWindow>, DoctorError> {
        validate_windows(&windows)?;

        self.db.transaction(|tx| {
            find_doctor(tx, doctor_id)?.ok_or(DoctorError::NotFound)?;

            tx.execute("DELETE FROM doctor_availability WHERE doctor_id = ?1", [doctor_id.to_string()])?;
            for window in &windows {
                tx.execute(
                    "INSERT INTO doctor_availability (id, doctor_id, day_of_week, start_time, end_time)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        Uuid::new_v4().to_string(),
                        doctor_id.to_string(),
                        window.day_of_week,
                        encode_time(&window.start_time),
                        encode_time(&window.end_time)
                    ],
                )?;
            }

            info!("Stored {} availability windows for doctor {}", windows.len(), doctor_id);
            Ok(load_windows(tx, doctor_id)?)
        })
    }

    /// Free slots of `duration_minutes` on a local calendar date.
    pub fn available_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> Result<Vec<AvailableSlot>, DoctorError> {
        if !(1..=MAX_SLOT_MINUTES).contains(&duration_minutes) {
            return Err(DoctorError::Validation(format!(
                "duration_minutes must be between 1 and {}",
                MAX_SLOT_MINUTES
            )));
        }

        self.db.with_conn(|conn| {
            let doctor = find_doctor(conn, doctor_id)?
                .filter(|doctor| doctor.is_active)
                .ok_or(DoctorError::NotFound)?;
            let tz = parse_timezone(&doctor.timezone)?;
            let windows = load_windows(conn, doctor_id)?;

            let (day_start, day_end) = local_day_bounds(tz, date);
            let busy = busy_intervals(conn, doctor_id, day_start, day_end)?;

            let slots = compute_slots(&windows, tz, date, Duration::minutes(duration_minutes), &busy, now_timestamp());
            debug!("Doctor {} has {} free slots on {}", doctor_id, slots.len(), date);
            Ok(slots)
        })
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, DoctorError> {
    name.parse::<Tz>()
        .map_err(|_| DoctorError::InvalidTimezone(name.to_string()))
}

pub fn load_windows(conn: &Connection, doctor_id: Uuid) -> Result<Vec<AvailabilityWindow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, doctor_id, day_of_week, start_time, end_time
         FROM doctor_availability
         WHERE doctor_id = ?1
         ORDER BY day_of_week, start_time",
    )?;
    let windows = stmt
        .query_map([doctor_id.to_string()], window_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(windows)
}

/// Non-cancelled appointment intervals of a doctor intersecting `[from, to)`.
pub fn busy_intervals(
    conn: &Connection,
    doctor_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT start_time, end_time FROM appointments
         WHERE doctor_id = ?1 AND status <> 'cancelled'
           AND start_time < ?3 AND end_time > ?2
         ORDER BY start_time",
    )?;
    let intervals = stmt
        .query_map(
            params![doctor_id.to_string(), encode_timestamp(&from), encode_timestamp(&to)],
            |row| Ok((get_timestamp(row, "start_time")?, get_timestamp(row, "end_time")?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(intervals)
}

/// Half-open interval overlap: `[a_start, a_end)` and `[b_start, b_end)`.
pub fn intervals_overlap<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// Working spans of one weekday, with touching windows joined (09-12 + 12-14 = 09-14).
pub fn day_spans(windows: &[AvailabilityWindow], day: u8) -> Vec<(NaiveTime, NaiveTime)> {
    let mut day_windows: Vec<(NaiveTime, NaiveTime)> = windows
        .iter()
        .filter(|w| w.day_of_week == day)
        .map(|w| (w.start_time, w.end_time))
        .collect();
    day_windows.sort();

    let mut spans: Vec<(NaiveTime, NaiveTime)> = Vec::with_capacity(day_windows.len());
    for (start, end) in day_windows {
        match spans.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => spans.push((start, end)),
        }
    }
    spans
}

/// True when `[start, end)` lies inside the doctor's working hours on a single local day.
pub fn fits_availability(windows: &[AvailabilityWindow], tz: Tz, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    let local_start = start.with_timezone(&tz).naive_local();
    let local_end = end.with_timezone(&tz).naive_local();

    if local_start.date() != local_end.date() || local_start >= local_end {
        return false;
    }

    let day = local_start.weekday().num_days_from_sunday() as u8;
    day_spans(windows, day)
        .iter()
        .any(|(span_start, span_end)| *span_start <= local_start.time() && local_end.time() <= *span_end)
}

pub fn compute_slots(
    windows: &[AvailabilityWindow],
    tz: Tz,
    date: NaiveDate,
    duration: Duration,
    busy: &[(DateTime<Utc>, DateTime<Utc>)],
    now: DateTime<Utc>,
) -> Vec<AvailableSlot> {
    if duration <= Duration::zero() {
        return Vec::new();
    }

    let day = date.weekday().num_days_from_sunday() as u8;
    let mut slots = Vec::new();

    for (span_start, span_end) in day_spans(windows, day) {
        let span_end = date.and_time(span_end);
        let mut cursor = date.and_time(span_start);

        while let Some(slot_end) = cursor.checked_add_signed(duration).filter(|end| *end <= span_end) {
            if let (Some(start), Some(end)) = (to_utc(tz, cursor), to_utc(tz, slot_end)) {
                let taken = busy
                    .iter()
                    .any(|(busy_start, busy_end)| intervals_overlap(start, end, *busy_start, *busy_end));
                if start >= now && !taken {
                    slots.push(AvailableSlot { start_time: start, end_time: end });
                }
            }
            cursor = slot_end;
        }
    }

    slots.sort_by_key(|slot| slot.start_time);
    slots
}

/// UTC bounds of a local calendar day.
pub fn local_day_bounds(tz: Tz, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN);
    let day_start = to_utc(tz, start).unwrap_or_else(|| Utc.from_utc_datetime(&start));

    // The last representable date has no successor
    let day_end = match date.succ_opt() {
        Some(next) => {
            let next = next.and_time(NaiveTime::MIN);
            to_utc(tz, next).unwrap_or_else(|| Utc.from_utc_datetime(&next))
        }
        None => DateTime::<Utc>::MAX_UTC,
    };

    (day_start, day_end)
}

/// Resolve a local wall-clock time; DST gaps yield `None`, overlaps take the earlier instant.
pub fn to_utc(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

fn validate_windows(windows: &[AvailabilityWindowInput]) -> Result<(), DoctorError> {
    for window in windows {
        if window.day_of_week > 6 {
            return Err(DoctorError::Validation(
                "day_of_week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }
        if window.start_time >= window.end_time {
            return Err(DoctorError::Validation("start_time must be before end_time".to_string()));
        }
    }

    for (i, a) in windows.iter().enumerate() {
        for b in windows.iter().skip(i + 1) {
            if a.day_of_week == b.day_of_week && intervals_overlap(a.start_time, a.end_time, b.start_time, b.end_time) {
                return Err(DoctorError::Validation(format!(
                    "Overlapping availability windows on day {}",
                    a.day_of_week
                )));
            }
        }
    }

    Ok(())
}

fn window_from_row(row: &Row<'_>) -> rusqlite::Result<AvailabilityWindow> {
    Ok(AvailabilityWindow {
        id: get_uuid(row, "id")?,
        doctor_id: get_uuid(row, "doctor_id")?,
        day_of_week: row.get("day_of_week")?,
        start_time: get_time(row, "start_time")?,
        end_time: get_time(row, "end_time")?,
    })
}
