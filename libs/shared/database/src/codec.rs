//! Column encodings shared by every table.
//!
//! Timestamps are stored as second-precision RFC 3339 UTC strings so that
//! string comparison in SQL matches chronological order. Ids are stored as
//! hyphenated UUID text.

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

pub fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// Current time truncated to what the store keeps.
pub fn now_timestamp() -> DateTime<Utc> {
    truncate_to_seconds(Utc::now())
}

pub fn truncate_to_seconds(value: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(value.timestamp(), 0).unwrap_or(value)
}

pub fn encode_time(value: &NaiveTime) -> String {
    value.format("%H:%M").to_string()
}

pub fn encode_date(value: &NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn column_index(row: &Row<'_>, column: &str) -> usize {
    row.as_ref().column_index(column).unwrap_or(0)
}

pub fn get_uuid(row: &Row<'_>, column: &str) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(column)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(column_index(row, column), e))
}

pub fn get_opt_uuid(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| Uuid::parse_str(&value).map_err(|e| conversion_error(column_index(row, column), e)))
        .transpose()
}

pub fn get_timestamp(row: &Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    decode_timestamp(&raw).map_err(|e| conversion_error(column_index(row, column), e))
}

pub fn get_opt_timestamp(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| decode_timestamp(&value).map_err(|e| conversion_error(column_index(row, column), e)))
        .transpose()
}

pub fn get_time(row: &Row<'_>, column: &str) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(column)?;
    NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|e| conversion_error(column_index(row, column), e))
}

pub fn get_opt_date(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| {
        NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|e| conversion_error(column_index(row, column), e))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_lexicographically() {
        let early = Utc.with_ymd_and_hms(2030, 1, 7, 9, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2030, 1, 7, 10, 30, 0).unwrap();

        assert_eq!(encode_timestamp(&early), "2030-01-07T09:00:00Z");
        assert!(encode_timestamp(&early) < encode_timestamp(&late));
    }

    #[test]
    fn timestamp_decodes_offsets_to_utc() {
        let decoded = decode_timestamp("2030-01-07T11:00:00+02:00").unwrap();
        assert_eq!(decoded, Utc.with_ymd_and_hms(2030, 1, 7, 9, 0, 0).unwrap());
    }

    #[test]
    fn truncation_drops_subseconds() {
        let value = Utc.timestamp_opt(1_900_000_000, 123_456_789).unwrap();
        assert_eq!(truncate_to_seconds(value).timestamp_subsec_nanos(), 0);
    }
}
