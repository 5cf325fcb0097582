//! Minimal iCalendar (RFC 5545) reader and writer.
//!
//! Only what calendar feeds need: `VEVENT` blocks with `UID`, `DTSTART`,
//! `DTEND` / `DURATION`, `STATUS` and `SUMMARY`. Recurrence rules are not
//! expanded; the master occurrence is imported as-is.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use doctor_cell::services::availability::{local_day_bounds, to_utc};

use crate::models::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub uid: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub summary: Option<String>,
    pub cancelled: bool,
}

/// Event to serialize for export or push.
#[derive(Debug, Clone)]
pub struct ExportEvent {
    pub uid: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub summary: String,
    pub status: &'static str,
    pub stamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
struct ContentLine {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl ContentLine {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Either an instant or a whole calendar day.
#[derive(Debug, Clone, Copy, PartialEq)]
enum When {
    Instant(DateTime<Utc>),
    Date(NaiveDate),
}

#[derive(Default)]
struct EventBuilder {
    uid: Option<String>,
    start: Option<When>,
    end: Option<When>,
    duration: Option<Duration>,
    summary: Option<String>,
    cancelled: bool,
    is_override: bool,
}

/// Parse a feed. Floating times and all-day dates resolve in `local_tz`;
/// events without an end last `default_duration`.
pub fn parse_calendar(input: &str, local_tz: Tz, default_duration: Duration) -> Result<Vec<ParsedEvent>, SyncError> {
    let lines = unfold(input);
    if !lines
        .iter()
        .any(|line| line.trim().eq_ignore_ascii_case("BEGIN:VCALENDAR"))
    {
        return Err(SyncError::Parse("missing BEGIN:VCALENDAR".to_string()));
    }

    let mut events: Vec<ParsedEvent> = Vec::new();
    let mut current: Option<EventBuilder> = None;
    // Depth of components nested inside a VEVENT (VALARM and friends)
    let mut nested = 0usize;

    for raw in lines.iter().filter(|line| !line.trim().is_empty()) {
        let Some(line) = parse_content_line(raw) else {
            warn!("Skipping malformed iCal line: {}", raw);
            continue;
        };

        match (line.name.as_str(), current.as_mut()) {
            ("BEGIN", None) if line.value.eq_ignore_ascii_case("VEVENT") => {
                current = Some(EventBuilder::default());
                nested = 0;
            }
            ("BEGIN", Some(_)) => nested += 1,
            ("END", Some(_)) if nested > 0 => nested -= 1,
            ("END", Some(_)) if line.value.eq_ignore_ascii_case("VEVENT") => {
                if let Some(builder) = current.take() {
                    if let Some(event) = finish_event(builder, local_tz, default_duration) {
                        if events.iter().any(|e| e.uid == event.uid) {
                            warn!("Duplicate UID {} in feed, keeping the first occurrence", event.uid);
                        } else {
                            events.push(event);
                        }
                    }
                }
            }
            (_, Some(builder)) if nested == 0 => apply_property(builder, &line, local_tz),
            _ => {}
        }
    }

    Ok(events)
}

fn apply_property(builder: &mut EventBuilder, line: &ContentLine, local_tz: Tz) {
    match line.name.as_str() {
        "UID" => builder.uid = Some(line.value.trim().to_string()).filter(|uid| !uid.is_empty()),
        "DTSTART" => builder.start = parse_when(line, local_tz),
        "DTEND" => builder.end = parse_when(line, local_tz),
        "DURATION" => {
            builder.duration = parse_duration(&line.value);
            if builder.duration.is_none() {
                warn!("Ignoring unusable DURATION {}", line.value.trim());
            }
        }
        "SUMMARY" => builder.summary = Some(unescape_text(&line.value)),
        "STATUS" => builder.cancelled = line.value.trim().eq_ignore_ascii_case("CANCELLED"),
        "RECURRENCE-ID" => builder.is_override = true,
        _ => {}
    }
}

fn finish_event(builder: EventBuilder, local_tz: Tz, default_duration: Duration) -> Option<ParsedEvent> {
    let Some(uid) = builder.uid else {
        warn!("Skipping VEVENT without UID");
        return None;
    };
    if builder.is_override {
        warn!("Skipping recurrence override of {}", uid);
        return None;
    }
    let Some(start) = builder.start else {
        warn!("Skipping VEVENT {} without a usable DTSTART", uid);
        return None;
    };

    let (start, end) = match start {
        When::Instant(start) => {
            let end = match (builder.end, builder.duration) {
                (Some(When::Instant(end)), _) => Some(end),
                (Some(When::Date(date)), _) => Some(local_day_bounds(local_tz, date).0),
                (None, Some(duration)) => start.checked_add_signed(duration),
                (None, None) => start.checked_add_signed(default_duration),
            };
            (start, end)
        }
        When::Date(date) => {
            let (day_start, day_end) = local_day_bounds(local_tz, date);
            let end = match (builder.end, builder.duration) {
                // DTEND of an all-day event is exclusive
                (Some(When::Date(end_date)), _) => Some(local_day_bounds(local_tz, end_date).0),
                (Some(When::Instant(end)), _) => Some(end),
                (None, Some(duration)) => day_start.checked_add_signed(duration),
                (None, None) => Some(day_end),
            };
            (day_start, end)
        }
    };

    let Some(end) = end else {
        warn!("Skipping VEVENT {} whose end is out of range", uid);
        return None;
    };

    if end <= start {
        warn!("Skipping VEVENT {} that ends before it starts", uid);
        return None;
    }

    Some(ParsedEvent {
        uid,
        start,
        end,
        summary: builder.summary,
        cancelled: builder.cancelled,
    })
}

fn parse_when(line: &ContentLine, local_tz: Tz) -> Option<When> {
    let value = line.value.trim();
    let is_date = line
        .param("VALUE")
        .map(|v| v.eq_ignore_ascii_case("DATE"))
        .unwrap_or(false)
        || (value.len() == 8 && value.chars().all(|c| c.is_ascii_digit()));

    if is_date {
        return NaiveDate::parse_from_str(value, "%Y%m%d").ok().map(When::Date);
    }

    if let Some(utc) = value.strip_suffix('Z').or_else(|| value.strip_suffix('z')) {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(When::Instant(naive.and_utc()));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    let tz = match line.param("TZID") {
        Some(tzid) => resolve_tzid(tzid).unwrap_or_else(|| {
            warn!("Unknown TZID {}, using {}", tzid, local_tz);
            local_tz
        }),
        None => local_tz,
    };
    to_utc(tz, naive).map(When::Instant)
}

/// Accepts plain IANA names and the `/mozilla.org/.../Europe/Madrid` style prefixes some producers emit.
fn resolve_tzid(tzid: &str) -> Option<Tz> {
    let trimmed = tzid.trim_matches('"');
    if let Ok(tz) = trimmed.parse::<Tz>() {
        return Some(tz);
    }

    let parts: Vec<&str> = trimmed.split('/').filter(|p| !p.is_empty()).collect();
    (0..parts.len()).find_map(|i| parts[i..].join("/").parse::<Tz>().ok())
}

/// RFC 5545 `dur-value`, e.g. `PT30M`, `PT1H30M`, `P1D`, `P1W`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (negative, rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let rest = rest.strip_prefix('P')?;

    let mut total = Duration::zero();
    let mut number = String::new();
    let mut in_time = false;
    let mut seen_unit = false;

    for c in rest.chars() {
        match c {
            'T' => in_time = true,
            '0'..='9' => number.push(c),
            unit => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                seen_unit = true;
                let part = match (unit, in_time) {
                    ('W', false) => Duration::try_weeks(n),
                    ('D', false) => Duration::try_days(n),
                    ('H', true) => Duration::try_hours(n),
                    ('M', true) => Duration::try_minutes(n),
                    ('S', true) => Duration::try_seconds(n),
                    _ => return None,
                };
                total = total.checked_add(&part?)?;
            }
        }
    }

    if !number.is_empty() || !seen_unit {
        return None;
    }
    if negative {
        Duration::zero().checked_sub(&total)
    } else {
        Some(total)
    }
}

/// Join folded lines: a line starting with a space or tab continues the previous one.
fn unfold(input: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in input.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        match (raw.chars().next(), lines.last_mut()) {
            (Some(' ') | Some('\t'), Some(previous)) => previous.push_str(&raw[1..]),
            _ => lines.push(raw.to_string()),
        }
    }
    lines
}

fn parse_content_line(line: &str) -> Option<ContentLine> {
    // The value starts at the first colon outside a quoted parameter
    let mut in_quotes = false;
    let mut split_at = None;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                split_at = Some(i);
                break;
            }
            _ => {}
        }
    }

    let split_at = split_at?;
    let (head, value) = (&line[..split_at], &line[split_at + 1..]);
    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }

    let params = parts
        .filter_map(|param| {
            let (key, value) = param.split_once('=')?;
            Some((key.trim().to_ascii_uppercase(), value.trim().trim_matches('"').to_string()))
        })
        .collect();

    Some(ContentLine {
        name,
        params,
        value: value.to_string(),
    })
}

pub fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

fn format_utc(value: &DateTime<Utc>) -> String {
    value.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Fold to 75 octets per line without splitting UTF-8 sequences.
fn fold_line(line: &str, out: &mut String) {
    let mut width = 0;
    for c in line.chars() {
        let len = c.len_utf8();
        if width + len > 75 {
            out.push_str("\r\n ");
            width = 1;
        }
        out.push(c);
        width += len;
    }
    out.push_str("\r\n");
}

pub fn write_calendar(calendar_name: &str, events: &[ExportEvent]) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//Clinic//Appointments//EN".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        "METHOD:PUBLISH".to_string(),
        format!("X-WR-CALNAME:{}", escape_text(calendar_name)),
    ];

    for event in events {
        lines.push("BEGIN:VEVENT".to_string());
        lines.push(format!("UID:{}", event.uid));
        lines.push(format!("DTSTAMP:{}", format_utc(&event.stamp)));
        lines.push(format!("DTSTART:{}", format_utc(&event.start)));
        lines.push(format!("DTEND:{}", format_utc(&event.end)));
        lines.push(format!("SUMMARY:{}", escape_text(&event.summary)));
        lines.push(format!("STATUS:{}", event.status));
        lines.push("END:VEVENT".to_string());
    }
    lines.push("END:VCALENDAR".to_string());

    let mut out = String::new();
    for line in &lines {
        fold_line(line, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, d, h, m, 0).unwrap()
    }

    fn parse(input: &str) -> Vec<ParsedEvent> {
        let madrid: Tz = "Europe/Madrid".parse().unwrap();
        parse_calendar(input, madrid, Duration::minutes(30)).unwrap()
    }

    #[test]
    fn parses_utc_tzid_floating_and_date_forms() {
        let feed = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:utc@example.com\r\n\
DTSTART:20300107T090000Z\r\n\
DTEND:20300107T093000Z\r\n\
SUMMARY:Board meeting\\, room 2\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:tzid@example.com\r\n\
DTSTART;TZID=America/New_York:20300107T090000\r\n\
DURATION:PT1H\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:floating@example.com\r\n\
DTSTART:20300107T120000\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:allday@example.com\r\n\
DTSTART;VALUE=DATE:20300108\r\n\
DTEND;VALUE=DATE:20300109\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse(feed);
        assert_eq!(events.len(), 4);

        assert_eq!(events[0].start, utc(7, 9, 0));
        assert_eq!(events[0].end, utc(7, 9, 30));
        assert_eq!(events[0].summary.as_deref(), Some("Board meeting, room 2"));

        // New York is UTC-5 in January
        assert_eq!(events[1].start, utc(7, 14, 0));
        assert_eq!(events[1].end, utc(7, 15, 0));

        // Floating time in the doctor's zone (Madrid, UTC+1) with the default length
        assert_eq!(events[2].start, utc(7, 11, 0));
        assert_eq!(events[2].end, utc(7, 11, 30));

        // All-day: local midnight to next local midnight
        assert_eq!(events[3].start, utc(7, 23, 0));
        assert_eq!(events[3].end, utc(8, 23, 0));
    }

    #[test]
    fn unfolds_lines_and_ignores_nested_alarms() {
        let feed = "BEGIN:VCALENDAR\n\
BEGIN:VEVENT\n\
UID:folded-\n uid@example.com\n\
DTSTART:20300107T100000Z\n\
SUMMARY:Long\n\t summary\n\
BEGIN:VALARM\n\
DESCRIPTION:Reminder\n\
DTSTART:20300101T000000Z\n\
END:VALARM\n\
STATUS:CANCELLED\n\
END:VEVENT\n\
END:VCALENDAR\n";

        let events = parse(feed);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid, "folded-uid@example.com");
        assert_eq!(events[0].summary.as_deref(), Some("Long summary"));
        assert_eq!(events[0].start, utc(7, 10, 0));
        assert!(events[0].cancelled);
    }

    #[test]
    fn skips_incomplete_and_duplicate_events() {
        let feed = "BEGIN:VCALENDAR\n\
BEGIN:VEVENT\n\
DTSTART:20300107T100000Z\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:no-start\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:twice\n\
DTSTART:20300107T100000Z\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:twice\n\
RECURRENCE-ID:20300114T100000Z\n\
DTSTART:20300114T110000Z\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:backwards\n\
DTSTART:20300107T100000Z\n\
DTEND:20300107T090000Z\n\
END:VEVENT\n\
END:VCALENDAR\n";

        let events = parse(feed);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid, "twice");
        assert_eq!(events[0].start, utc(7, 10, 0));
    }

    #[test]
    fn rejects_documents_without_calendar() {
        let result = parse_calendar("<html>Not found</html>", Tz::UTC, Duration::minutes(30));
        assert!(matches!(result, Err(SyncError::Parse(_))));
    }

    #[test]
    fn tzid_with_vendor_prefix() {
        assert_eq!(resolve_tzid("/mozilla.org/20050126_1/Europe/Madrid"), Some(chrono_tz::Europe::Madrid));
        assert_eq!(resolve_tzid("\"Europe/Lisbon\""), Some(chrono_tz::Europe::Lisbon));
        assert_eq!(resolve_tzid("Not/AZone"), None);
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("PT30M"), Some(Duration::minutes(30)));
        assert_eq!(parse_duration("PT1H30M"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration("P1D"), Some(Duration::days(1)));
        assert_eq!(parse_duration("P1W"), Some(Duration::weeks(1)));
        assert_eq!(parse_duration("-PT15M"), Some(Duration::minutes(-15)));
        assert_eq!(parse_duration("PT"), None);
        assert_eq!(parse_duration("30M"), None);
        assert_eq!(parse_duration("PT9999999999999999H"), None);
        assert_eq!(parse_duration("P99999999999999999999D"), None);
    }

    #[test]
    fn out_of_range_durations_do_not_abort_the_feed() {
        let feed = "BEGIN:VCALENDAR\n\
BEGIN:VEVENT\n\
UID:huge-hours\n\
DTSTART:20300107T100000Z\n\
DURATION:PT9999999999999999H\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:huge-days\n\
DTSTART:20300107T120000Z\n\
DURATION:P100000000D\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:huge-allday\n\
DTSTART;VALUE=DATE:20300108\n\
DURATION:P100000000D\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:normal\n\
DTSTART:20300107T150000Z\n\
DURATION:PT45M\n\
END:VEVENT\n\
END:VCALENDAR\n";

        let events = parse(feed);
        let uids: Vec<_> = events.iter().map(|e| e.uid.as_str()).collect();
        assert_eq!(uids, vec!["huge-hours", "normal"]);

        // An unusable DURATION falls back to the default length
        assert_eq!(events[0].end, utc(7, 10, 30));
        assert_eq!(events[1].end, utc(7, 15, 45));
    }

    #[test]
    fn text_escaping_round_trips() {
        let original = "Check-up; bring results, fasting\nRoom \\ 3";
        assert_eq!(unescape_text(&escape_text(original)), original);
    }

    #[test]
    fn writer_produces_parseable_folded_output() {
        let events = vec![ExportEvent {
            uid: "a1@clinic.local".into(),
            start: utc(7, 9, 0),
            end: utc(7, 9, 30),
            summary: "Appointment with a very long description that certainly needs folding, yes".into(),
            status: "CONFIRMED",
            stamp: utc(1, 0, 0),
        }];

        let ics = write_calendar("Dr. Vidal", &events);
        assert!(ics.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(ics.lines().all(|line| line.len() <= 75));

        let parsed = parse_calendar(&ics, Tz::UTC, Duration::minutes(30)).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].uid, "a1@clinic.local");
        assert_eq!(parsed[0].start, utc(7, 9, 0));
        assert_eq!(parsed[0].summary.as_deref(), Some(events[0].summary.as_str()));
    }
}
