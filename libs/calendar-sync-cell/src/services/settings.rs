use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use shared_database::{encode_timestamp, get_timestamp, get_uuid};

use crate::models::{
    ReconcileStats, SyncError, SyncRun, SyncSettings, UpdateSyncSettingsRequest, MAX_SYNC_INTERVAL_MINUTES,
};

pub const DEFAULT_RUN_HISTORY: i64 = 20;
pub const MAX_RUN_HISTORY: i64 = 200;

pub fn load_settings(conn: &Connection) -> Result<SyncSettings, SyncError> {
    let settings = conn.query_row(
        "SELECT enabled, interval_minutes, bidirectional, updated_at FROM calendar_sync_settings WHERE id = 1",
        [],
        |row| {
            Ok(SyncSettings {
                enabled: row.get("enabled")?,
                interval_minutes: row.get("interval_minutes")?,
                bidirectional: row.get("bidirectional")?,
                updated_at: get_timestamp(row, "updated_at")?,
            })
        },
    )?;
    Ok(settings)
}

pub fn save_settings(
    conn: &Connection,
    request: &UpdateSyncSettingsRequest,
    now: DateTime<Utc>,
) -> Result<SyncSettings, SyncError> {
    if let Some(minutes) = request.interval_minutes {
        if !(1..=MAX_SYNC_INTERVAL_MINUTES).contains(&minutes) {
            return Err(SyncError::InvalidSettings(format!(
                "interval_minutes must be between 1 and {}",
                MAX_SYNC_INTERVAL_MINUTES
            )));
        }
    }

    let current = load_settings(conn)?;
    conn.execute(
        "UPDATE calendar_sync_settings
         SET enabled = ?1, interval_minutes = ?2, bidirectional = ?3, updated_at = ?4
         WHERE id = 1",
        params![
            request.enabled.unwrap_or(current.enabled),
            request.interval_minutes.unwrap_or(current.interval_minutes),
            request.bidirectional.unwrap_or(current.bidirectional),
            encode_timestamp(&now)
        ],
    )?;

    load_settings(conn)
}

pub fn record_run(conn: &Connection, run: &SyncRun) -> Result<(), SyncError> {
    conn.execute(
        "INSERT INTO calendar_sync_runs (id, doctor_id, started_at, finished_at, status,
                                         created, updated, cancelled, displaced, skipped, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            run.id.to_string(),
            run.doctor_id.to_string(),
            encode_timestamp(&run.started_at),
            encode_timestamp(&run.finished_at),
            run.status,
            run.stats.created,
            run.stats.updated,
            run.stats.cancelled,
            run.stats.displaced,
            run.stats.skipped,
            run.error
        ],
    )?;
    Ok(())
}

/// Most recent runs first.
pub fn list_runs(conn: &Connection, doctor_id: Uuid, limit: Option<i64>) -> Result<Vec<SyncRun>, SyncError> {
    let limit = limit.unwrap_or(DEFAULT_RUN_HISTORY).clamp(1, MAX_RUN_HISTORY);

    let mut stmt = conn.prepare(
        "SELECT id, doctor_id, started_at, finished_at, status, created, updated, cancelled, displaced, skipped, error
         FROM calendar_sync_runs
         WHERE doctor_id = ?1
         ORDER BY started_at DESC, rowid DESC
         LIMIT ?2",
    )?;
    let runs = stmt
        .query_map(params![doctor_id.to_string(), limit], run_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(runs)
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<SyncRun> {
    Ok(SyncRun {
        id: get_uuid(row, "id")?,
        doctor_id: get_uuid(row, "doctor_id")?,
        started_at: get_timestamp(row, "started_at")?,
        finished_at: get_timestamp(row, "finished_at")?,
        status: row.get("status")?,
        stats: ReconcileStats {
            created: row.get("created")?,
            updated: row.get("updated")?,
            cancelled: row.get("cancelled")?,
            displaced: row.get("displaced")?,
            skipped: row.get("skipped")?,
        },
        error: row.get("error")?,
    })
}
