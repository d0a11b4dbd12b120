//! Conversion between spreadsheet serial dates and ISO-8601 strings
//!
//! Serial day 0 is 1899-12-30, so serial 25569 is the Unix epoch.
//! Outgoing date cells become ISO strings with millisecond precision;
//! incoming ISO strings become serial numbers again.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Timelike, Utc};

/// Serial number of 1970-01-01
pub const UNIX_EPOCH_SERIAL: f64 = 25569.0;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Number format applied to cells written from a date-only ISO string
pub const DATE_FORMAT: &str = "yyyy-mm-dd";

/// Number format applied to cells written from an ISO string with a time part
pub const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

pub fn serial_to_datetime(serial: f64) -> Option<DateTime<Utc>> {
    let millis = ((serial - UNIX_EPOCH_SERIAL) * MILLIS_PER_DAY).round();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64)
}

/// `44562.0` -> `"2022-01-01T00:00:00.000Z"`
pub fn serial_to_iso(serial: f64) -> Option<String> {
    serial_to_datetime(serial).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn datetime_to_serial(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / MILLIS_PER_DAY + UNIX_EPOCH_SERIAL
}

/// Parse an ISO-8601 timestamp. Strings without an offset are read as UTC.
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn iso_to_serial(s: &str) -> Option<f64> {
    parse_iso(s).map(|dt| datetime_to_serial(&dt))
}

/// Cheap pre-check before attempting a parse on every incoming string
pub fn looks_like_iso_datetime(s: &str) -> bool {
    s.len() > 18 && s.contains('T')
}

pub fn has_time_component(dt: &DateTime<Utc>) -> bool {
    dt.hour() + dt.minute() + dt.second() + dt.nanosecond() != 0
}
