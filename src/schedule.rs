//! # Schedule Module
//!
//! This module owns the timetable: decoding departure records from JSON,
//! normalising their date-less `HH:MM` clock readings into concrete
//! timestamps, and keeping the full schedule sorted by effective
//! (delay-adjusted) departure time. The board engine draws its visible
//! window from here, one not-yet-shown entry at a time.

use crate::error::AppError;
use chrono::{DateTime, Duration, Local, TimeZone};
use serde::Deserialize;
use serde::de::Deserializer;
use std::path::Path;

/// Train category that marks a service terminating at this station
/// (an empty-stock run in the source data).
pub const TERMINAL_CATEGORY: &str = "回送";

/// Grace window in seconds: an entry whose effective time slipped into the
/// past by less than this is still eligible for display, so a departure
/// that just became due is not skipped between ticks.
pub const GRACE_SECS: i64 = 60;

/// A single timetable record as it appears in the schedule file.
///
/// All optional fields take documented defaults so sparse records decode
/// cleanly; unknown fields are ignored.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DepartureRecord {
    /// Date-less departure time, `HH:MM`. Malformed values are treated as
    /// midnight rather than failing the load.
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub line: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Free-form train category (普通, 快速, 特急, …). The special value
    /// 回送 means the service terminates here.
    #[serde(rename = "type", default)]
    pub category: String,
    #[serde(default)]
    pub via: Option<String>,
    /// Calling points. The source data carries either a list or a single
    /// pre-joined string; both decode to a list.
    #[serde(default, deserialize_with = "stops_list_or_string")]
    pub stops: Vec<String>,
    #[serde(default)]
    pub pass_through: bool,
    /// Delay in seconds. Non-numeric and negative values decode as 0.
    #[serde(default, deserialize_with = "lenient_secs")]
    pub delay_secs: u32,
    #[serde(default)]
    pub first: bool,
    #[serde(default)]
    pub last: bool,
}

impl DepartureRecord {
    pub fn is_terminal_here(&self) -> bool {
        self.category.trim() == TERMINAL_CATEGORY
    }

    pub fn is_delayed(&self) -> bool {
        self.delay_secs > 0
    }
}

fn default_platform() -> String {
    "-".to_string()
}

fn lenient_secs<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let secs = match value {
        serde_json::Value::Number(n) => n.as_i64().unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    };
    Ok(secs.clamp(0, i64::from(u32::MAX)) as u32)
}

fn stops_list_or_string<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(stop) => Some(stop),
                _ => None,
            })
            .collect(),
        serde_json::Value::String(text) if !text.trim().is_empty() => {
            vec![text.trim().to_string()]
        }
        _ => Vec::new(),
    })
}

/// Splits an `HH:MM` reading, rejecting anything out of clock range.
fn split_clock(hhmm: &str) -> Option<(u32, u32)> {
    let (h, m) = hhmm.split_once(':')?;
    let hour: u32 = h.trim().parse().ok()?;
    let minute: u32 = m.trim().parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Resolves a date-less `HH:MM` reading against `now`.
///
/// The reading is pinned to today unless the resulting instant would be
/// more than 12 hours in the past, in which case it rolls over to tomorrow
/// (a past-midnight timetable viewed late at night). Malformed readings
/// fall back to midnight today.
pub fn parse_departure_time(hhmm: &str, now: DateTime<Local>) -> DateTime<Local> {
    let (hour, minute) = split_clock(hhmm).unwrap_or((0, 0));
    let naive = match now.date_naive().and_hms_opt(hour, minute, 0) {
        Some(naive) => naive,
        None => return now,
    };
    let candidate = match Local.from_local_datetime(&naive).earliest() {
        Some(candidate) => candidate,
        // Nonexistent local time (DST gap); the reading cannot be pinned.
        None => return now,
    };
    if candidate < now - Duration::hours(12) {
        candidate + Duration::days(1)
    } else {
        candidate
    }
}

/// A timetable record bound to a concrete departure instant.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub record: DepartureRecord,
    /// Scheduled time plus delay.
    pub effective_time: DateTime<Local>,
    /// Whether this entry has already been promoted into the visible
    /// window. Set once, never cleared before the next rebuild.
    pub shown: bool,
}

/// The full schedule, sorted ascending by effective time.
#[derive(Debug, Default)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
}

impl Schedule {
    /// Rebuilds the store from raw records: parse, delay-adjust, sort.
    /// The sort is stable, so entries with equal effective times keep
    /// their input order.
    pub fn rebuild(records: Vec<DepartureRecord>, now: DateTime<Local>) -> Self {
        let mut entries: Vec<ScheduleEntry> = records
            .into_iter()
            .map(|record| {
                let effective_time = parse_departure_time(&record.time, now)
                    + Duration::seconds(i64::from(record.delay_secs));
                ScheduleEntry {
                    record,
                    effective_time,
                    shown: false,
                }
            })
            .collect();
        entries.sort_by_key(|entry| entry.effective_time);
        Schedule { entries }
    }

    /// Returns the earliest not-yet-shown entry still inside the grace
    /// window, marking it shown.
    pub fn take_next_eligible(&mut self, now: DateTime<Local>) -> Option<ScheduleEntry> {
        let cutoff = now - Duration::seconds(GRACE_SECS);
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| !entry.shown && entry.effective_time >= cutoff)?;
        entry.shown = true;
        Some(entry.clone())
    }

    /// Whether any unshown entry is still due now or later.
    pub fn has_upcoming(&self, now: DateTime<Local>) -> bool {
        self.entries
            .iter()
            .any(|entry| !entry.shown && entry.effective_time >= now)
    }
}

/// Raw schedule document: either a bare array of records or an object
/// wrapping the list under `"departures"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScheduleDocument {
    Wrapped { departures: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

/// Decodes a schedule document. Items that are not well-formed records are
/// skipped; only a structurally invalid document fails the load.
pub fn decode_records(text: &str) -> Result<Vec<DepartureRecord>, serde_json::Error> {
    let document: ScheduleDocument = serde_json::from_str(text)?;
    let items = match document {
        ScheduleDocument::Wrapped { departures } => departures,
        ScheduleDocument::Bare(items) => items,
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

/// Reads and decodes the schedule file at `path`.
pub fn load_records(path: &Path) -> Result<Vec<DepartureRecord>, AppError> {
    let text = std::fs::read_to_string(path)?;
    Ok(decode_records(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 6, 1, hour, minute, second)
            .unwrap()
    }

    fn record(time: &str) -> DepartureRecord {
        DepartureRecord {
            time: time.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn parse_pins_reading_to_today() {
        let now = at(9, 0, 0);
        assert_eq!(parse_departure_time("10:30", now), at(10, 30, 0));
        // An hour in the past is still today.
        assert_eq!(parse_departure_time("08:00", now), at(8, 0, 0));
    }

    #[test]
    fn parse_rolls_over_past_midnight() {
        let now = at(23, 30, 0);
        let parsed = parse_departure_time("00:15", now);
        assert_eq!(parsed, at(0, 15, 0) + Duration::days(1));
        // Tonight's 23:50 is in the future; no rollover.
        assert_eq!(parse_departure_time("23:50", now), at(23, 50, 0));
    }

    #[test]
    fn parse_malformed_defaults_to_midnight() {
        let now = at(9, 0, 0);
        let midnight = at(0, 0, 0);
        assert_eq!(parse_departure_time("", now), midnight);
        assert_eq!(parse_departure_time("0930", now), midnight);
        assert_eq!(parse_departure_time("ab:cd", now), midnight);
        assert_eq!(parse_departure_time("25:00", now), midnight);
        assert_eq!(parse_departure_time("09:75", now), midnight);
        // A seconds suffix makes the minute field unparseable.
        assert_eq!(parse_departure_time("09:30:00", now), midnight);
    }

    #[test]
    fn record_decodes_with_defaults() {
        let record: DepartureRecord =
            serde_json::from_str(r#"{"time": "08:00", "destination": "千葉"}"#).unwrap();
        assert_eq!(record.time, "08:00");
        assert_eq!(record.platform, "-");
        assert_eq!(record.delay_secs, 0);
        assert!(record.stops.is_empty());
        assert!(!record.pass_through);
        assert!(!record.first && !record.last);
    }

    #[test]
    fn record_decode_is_lenient_about_delay() {
        let cases = [
            (r#"{"delay_secs": 90}"#, 90),
            (r#"{"delay_secs": "120"}"#, 120),
            (r#"{"delay_secs": "soon"}"#, 0),
            (r#"{"delay_secs": true}"#, 0),
            (r#"{"delay_secs": -5}"#, 0),
            (r#"{}"#, 0),
        ];
        for (json, expected) in cases {
            let record: DepartureRecord = serde_json::from_str(json).unwrap();
            assert_eq!(record.delay_secs, expected, "input: {json}");
        }
    }

    #[test]
    fn record_decodes_stops_as_list_or_string() {
        let listed: DepartureRecord =
            serde_json::from_str(r#"{"stops": ["日暮里", "空港第2ビル"]}"#).unwrap();
        assert_eq!(listed.stops, vec!["日暮里", "空港第2ビル"]);

        let joined: DepartureRecord = serde_json::from_str(r#"{"stops": "日暮里"}"#).unwrap();
        assert_eq!(joined.stops, vec!["日暮里"]);

        let odd: DepartureRecord = serde_json::from_str(r#"{"stops": 7}"#).unwrap();
        assert!(odd.stops.is_empty());
    }

    #[test]
    fn decode_accepts_bare_and_wrapped_documents() {
        let bare = decode_records(r#"[{"time": "08:00"}, {"time": "09:00"}]"#).unwrap();
        assert_eq!(bare.len(), 2);

        let wrapped =
            decode_records(r#"{"departures": [{"time": "08:00"}], "version": 2}"#).unwrap();
        assert_eq!(wrapped.len(), 1);
    }

    #[test]
    fn decode_skips_malformed_entries() {
        let records =
            decode_records(r#"[42, {"time": "08:00"}, "oops", {"destination": 5}]"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].time, "08:00");
    }

    #[test]
    fn decode_rejects_non_list_documents() {
        assert!(decode_records(r#""just a string""#).is_err());
        assert!(decode_records(r#"{"schedule": []}"#).is_err());
    }

    #[test]
    fn rebuild_sorts_by_effective_time() {
        let now = at(7, 0, 0);
        let mut delayed = record("08:00");
        delayed.delay_secs = 600; // effective 08:10
        let records = vec![delayed, record("08:05")];
        let mut schedule = Schedule::rebuild(records, now);

        let first = schedule.take_next_eligible(now).unwrap();
        assert_eq!(first.record.time, "08:05");
        let second = schedule.take_next_eligible(now).unwrap();
        assert_eq!(second.record.time, "08:00");
        assert_eq!(second.effective_time, at(8, 10, 0));
    }

    #[test]
    fn rebuild_keeps_input_order_for_ties() {
        let now = at(7, 0, 0);
        let mut a = record("08:00");
        a.destination = "甲".to_string();
        let mut b = record("08:00");
        b.destination = "乙".to_string();
        let mut schedule = Schedule::rebuild(vec![a, b], now);

        assert_eq!(schedule.take_next_eligible(now).unwrap().record.destination, "甲");
        assert_eq!(schedule.take_next_eligible(now).unwrap().record.destination, "乙");
    }

    #[test]
    fn eligibility_respects_grace_window() {
        let now = at(9, 0, 0);
        let mut schedule = Schedule::rebuild(vec![record("08:58"), record("08:59:30")], now);
        // 08:58 is 120s past: outside the grace window. The malformed
        // second entry parsed to midnight, also long past.
        assert!(schedule.take_next_eligible(now).is_none());

        let mut schedule = Schedule::rebuild(vec![record("08:59")], now);
        // 60s past: exactly on the grace boundary, still eligible.
        let entry = schedule.take_next_eligible(now).unwrap();
        assert_eq!(entry.record.time, "08:59");
        // Shown entries are never handed out twice.
        assert!(schedule.take_next_eligible(now).is_none());
    }

    #[test]
    fn has_upcoming_ignores_shown_and_past_entries() {
        let now = at(9, 0, 0);
        let mut schedule = Schedule::rebuild(vec![record("09:30")], now);
        assert!(schedule.has_upcoming(now));
        schedule.take_next_eligible(now).unwrap();
        assert!(!schedule.has_upcoming(now));

        let schedule = Schedule::rebuild(vec![record("06:00")], now);
        assert!(!schedule.has_upcoming(now));
    }

    #[test]
    fn load_records_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"departures": [{{"time": "08:00", "destination": "千葉"}}]}}"#
        )
        .unwrap();
        let records = load_records(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].destination, "千葉");

        assert!(load_records(Path::new("/nonexistent/departures.json")).is_err());
    }
}
