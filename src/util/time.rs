//! Timestamp parsing and elapsed-time formatting.

use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone, Utc};
use std::time::Duration;

/// Formats the cluster has used for timestamps over its lifetime.
const KNOWN_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y%m%dT%H:%M:%SZ",
];

/// Parse a cluster timestamp into a UTC datetime.
///
/// Syslog-style stamps without a year (`Nov 15 19:18:46`) are placed in the
/// current year.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    for format in KNOWN_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&parsed));
        }
    }

    let with_year = format!("{} {}", Utc::now().year(), value);
    NaiveDateTime::parse_from_str(&with_year, "%Y %b %d %H:%M:%S")
        .ok()
        .map(|parsed| Utc.from_utc_datetime(&parsed))
}

/// Parse a cluster timestamp into epoch seconds, 0 when unparseable.
pub fn parse_timestamp(value: &str) -> i64 {
    parse_datetime(value).map(|dt| dt.timestamp()).unwrap_or(0)
}

/// Parse a cluster timestamp into fractional epoch seconds, 0.0 when unparseable.
pub fn parse_timestamp_hires(value: &str) -> f64 {
    parse_datetime(value)
        .map(|dt| dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) / 1_000_000.0)
        .unwrap_or(0.0)
}

/// Render epoch seconds in local time.
pub fn timestamp_to_str(timestamp: i64) -> String {
    timestamp_to_str_fmt(timestamp, "%Y-%m-%d %H:%M:%S")
}

pub fn timestamp_to_str_fmt(timestamp: i64, format: &str) -> String {
    match Local.timestamp_opt(timestamp, 0).single() {
        Some(dt) => dt.format(format).to_string(),
        None => timestamp.to_string(),
    }
}

/// Current time as epoch seconds.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Format a duration as `MM:SS`, `HH:MM:SS` or `D-HH:MM:SS`.
pub fn elapsed_str(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{}-{:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// [`elapsed_str`] for a count of seconds.
pub fn seconds_to_elapsed_str(seconds: u64) -> String {
    elapsed_str(Duration::from_secs(seconds))
}
