//! Apply a parsed feed to a doctor's appointments.
//!
//! Runs on the caller's transaction. The external calendar is authoritative:
//! internal bookings in the way of an external event are cancelled, while
//! two external events competing for the same slot keep the first one.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};
use uuid::Uuid;

use appointment_cell::models::{Appointment, AppointmentSource, AppointmentStatus};
use appointment_cell::services::store::{
    find_appointment, insert_appointment, mark_cancelled, overlapping_appointments, reschedule_appointment,
    NewAppointment,
};
use shared_database::{encode_timestamp, get_uuid};

use crate::ical::ParsedEvent;
use crate::models::{ReconcileStats, SyncError};

pub const REMOVED_REASON: &str = "Removed from external calendar";

pub fn displaced_reason(uid: &str) -> String {
    format!("Displaced by external calendar event {}", uid)
}

/// UIDs we put on exported events: `<appointment-id>@<domain>`.
pub fn export_uid(appointment_id: Uuid, uid_domain: &str) -> String {
    format!("{}@{}", appointment_id, uid_domain)
}

pub fn is_echo(uid: &str, uid_domain: &str) -> bool {
    match uid.rsplit_once('@') {
        Some((local, domain)) => domain.eq_ignore_ascii_case(uid_domain) && Uuid::parse_str(local).is_ok(),
        None => false,
    }
}

pub fn reconcile_events(
    conn: &Connection,
    doctor_id: Uuid,
    events: &[ParsedEvent],
    uid_domain: &str,
    now: DateTime<Utc>,
) -> Result<ReconcileStats, SyncError> {
    let records = load_records(conn, doctor_id)?;
    let mut stats = ReconcileStats::default();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut pending: Vec<(&ParsedEvent, Option<Appointment>)> = Vec::new();

    for event in events {
        if is_echo(&event.uid, uid_domain) {
            debug!("Ignoring echo of exported event {}", event.uid);
            continue;
        }
        seen.insert(event.uid.as_str());

        let existing = match records.get(&event.uid) {
            Some(appointment_id) => find_appointment(conn, *appointment_id)?,
            None => None,
        };

        if event.cancelled {
            if let Some(appointment) = existing.filter(|a| a.is_active()) {
                mark_cancelled(conn, appointment.id, Some(REMOVED_REASON), now)?;
                touch_record(conn, doctor_id, &event.uid, now)?;
                stats.cancelled += 1;
            }
            continue;
        }

        match existing {
            Some(appointment)
                if appointment.start_time == event.start
                    && appointment.end_time == event.end
                    && !removed_by_feed(&appointment) =>
            {
                touch_record(conn, doctor_id, &event.uid, now)?;
            }
            other => pending.push((event, other)),
        }
    }

    // Removals first so moved events can take the freed slots
    for (uid, appointment_id) in &records {
        if seen.contains(uid.as_str()) {
            continue;
        }
        if let Some(appointment) = find_appointment(conn, *appointment_id)? {
            if appointment.is_active() {
                info!("External event {} disappeared, cancelling appointment {}", uid, appointment.id);
                mark_cancelled(conn, appointment.id, Some(REMOVED_REASON), now)?;
                stats.cancelled += 1;
            }
        }
    }

    pending.sort_by_key(|(event, _)| event.start);

    // An event blocked by another external event may be unblocked once that one moves
    loop {
        let attempted = pending.len();
        let mut deferred = Vec::new();

        for (event, existing) in pending {
            let exclude = existing.as_ref().map(|a| a.id);
            let blockers = overlapping_appointments(conn, doctor_id, event.start, event.end, exclude)?;

            if blockers.iter().any(|a| a.source == AppointmentSource::ExternalIcal) {
                deferred.push((event, existing));
                continue;
            }

            for internal in blockers {
                warn!(
                    "External event {} displaces internal appointment {} of doctor {}",
                    event.uid, internal.id, doctor_id
                );
                mark_cancelled(conn, internal.id, Some(&displaced_reason(&event.uid)), now)?;
                stats.displaced += 1;
            }

            apply_event(conn, doctor_id, event, existing, now, &mut stats)?;
        }

        if deferred.is_empty() || deferred.len() == attempted {
            for (event, _) in &deferred {
                warn!(
                    "Skipping external event {} for doctor {}: overlaps another external event",
                    event.uid, doctor_id
                );
                stats.skipped += 1;
            }
            break;
        }
        pending = deferred;
    }

    Ok(stats)
}

fn apply_event(
    conn: &Connection,
    doctor_id: Uuid,
    event: &ParsedEvent,
    existing: Option<Appointment>,
    now: DateTime<Utc>,
    stats: &mut ReconcileStats,
) -> Result<(), SyncError> {
    match existing {
        Some(appointment) => {
            // Reappearing or moved events come back confirmed
            let status = if appointment.is_active() {
                appointment.status
            } else {
                AppointmentStatus::Confirmed
            };
            reschedule_appointment(conn, appointment.id, event.start, event.end, status, now)?;
            touch_record(conn, doctor_id, &event.uid, now)?;
            stats.updated += 1;
        }
        None => {
            let appointment = insert_appointment(
                conn,
                &NewAppointment {
                    patient_id: None,
                    doctor_id,
                    specialty_id: None,
                    start_time: event.start,
                    end_time: event.end,
                    status: AppointmentStatus::Confirmed,
                    source: AppointmentSource::ExternalIcal,
                    external_event_id: Some(event.uid.clone()),
                    notes: event.summary.clone(),
                },
                now,
            )?;
            upsert_record(conn, doctor_id, &event.uid, appointment.id, now)?;
            stats.created += 1;
        }
    }
    Ok(())
}

/// Cancelled because the event left the feed, as opposed to by staff.
fn removed_by_feed(appointment: &Appointment) -> bool {
    !appointment.is_active() && appointment.cancellation_reason.as_deref() == Some(REMOVED_REASON)
}

fn load_records(conn: &Connection, doctor_id: Uuid) -> Result<HashMap<String, Uuid>, SyncError> {
    let mut stmt = conn.prepare(
        "SELECT external_event_id, appointment_id FROM calendar_sync_records WHERE doctor_id = ?1",
    )?;
    let records = stmt
        .query_map([doctor_id.to_string()], |row| {
            Ok((row.get::<_, String>("external_event_id")?, get_uuid(row, "appointment_id")?))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(records)
}

fn touch_record(conn: &Connection, doctor_id: Uuid, uid: &str, now: DateTime<Utc>) -> Result<(), SyncError> {
    conn.execute(
        "UPDATE calendar_sync_records SET last_synced_at = ?3 WHERE doctor_id = ?1 AND external_event_id = ?2",
        params![doctor_id.to_string(), uid, encode_timestamp(&now)],
    )?;
    Ok(())
}

fn upsert_record(
    conn: &Connection,
    doctor_id: Uuid,
    uid: &str,
    appointment_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    conn.execute(
        "INSERT INTO calendar_sync_records (id, doctor_id, external_event_id, appointment_id, last_synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (doctor_id, external_event_id)
         DO UPDATE SET appointment_id = excluded.appointment_id, last_synced_at = excluded.last_synced_at",
        params![
            Uuid::new_v4().to_string(),
            doctor_id.to_string(),
            uid,
            appointment_id.to_string(),
            encode_timestamp(&now)
        ],
    )?;
    Ok(())
}
