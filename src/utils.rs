//! # Utility Functions and Helper Module
//!
//! Small helpers shared by every stage of the converter: timestamp parsing and
//! formatting, epoch conversions, output file naming and human-readable
//! duration formatting for progress messages.
//!
//! ## Timestamp Handling
//!
//! Telemetry exports from the testbed write timestamps as
//! `YYYY-MM-DD HH:MM:SS[.fffffffff]`, occasionally in ISO-8601 form with a `T`
//! separator or an explicit UTC offset. All of them are parsed into a
//! `NaiveDateTime` interpreted as UTC; offsets are normalized to UTC.
//!
//! ## Usage Examples
//!
//! ```rust
//! use rca_trans::utils::*;
//! use std::time::Duration;
//!
//! let ts = parse_timestamp("2024-10-24 13:05:00.123456789").unwrap();
//! assert_eq!(format_timestamp(&ts), "2024-10-24 13:05:00.123456789");
//! assert_eq!(epoch_seconds(&ts), 1729775100);
//!
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(sanitize_file_stem("ts/order service"), "ts_order_service");
//! ```

use crate::error::{TransError, TransResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::time::Duration;

/// Accepted layouts for naive timestamps, tried in order.
///
/// `%.f` also matches an absent fraction, so whole-second values parse with
/// the same pattern.
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Output layout for timestamps written back to CSV.
const OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parse a telemetry timestamp into a UTC-based `NaiveDateTime`
///
/// ## Parameters
/// - `raw`: the cell text, surrounding whitespace is ignored
///
/// ## Returns
/// - `Ok(NaiveDateTime)` for any of the accepted layouts
/// - `Err(TransError::Timestamp)` carrying the original text otherwise
///
/// ## Accepted Layouts
///
/// - `2024-10-24 13:05:00`
/// - `2024-10-24 13:05:00.123456789` (up to nanosecond precision)
/// - `2024-10-24T13:05:00.123`
/// - RFC 3339 with offset, e.g. `2024-10-24T15:05:00+02:00` (converted to UTC)
pub fn parse_timestamp(raw: &str) -> TransResult<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TransError::Timestamp(raw.to_string()));
    }

    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(ts);
        }
    }

    DateTime::parse_from_rfc3339(trimmed)
        .map(|ts| ts.naive_utc())
        .map_err(|_| TransError::Timestamp(raw.to_string()))
}

/// Format a timestamp the way the downstream tool reads it.
///
/// The fractional part is omitted when it is zero.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(OUTPUT_FORMAT).to_string()
}

/// Keep at most `digits` fractional-second digits of a timestamp string.
///
/// Strings without a fractional part are returned unchanged.
pub fn truncate_fraction(raw: &str, digits: usize) -> String {
    match raw.trim().split_once('.') {
        Some((whole, fraction)) => {
            let kept: String = fraction.chars().take(digits).collect();
            format!("{}.{}", whole, kept)
        }
        None => raw.trim().to_string(),
    }
}

/// Whole seconds since the Unix epoch.
pub fn epoch_seconds(ts: &NaiveDateTime) -> i64 {
    Utc.from_utc_datetime(ts).timestamp()
}

/// Nanoseconds since the Unix epoch.
///
/// ## Returns
/// `Err(TransError::Timestamp)` when the value does not fit an `i64`
/// nanosecond count (outside 1677..2262).
pub fn epoch_nanos(ts: &NaiveDateTime) -> TransResult<i64> {
    Utc.from_utc_datetime(ts)
        .timestamp_nanos_opt()
        .ok_or_else(|| TransError::Timestamp(format_timestamp(ts)))
}

/// Turn a service or experiment name into a safe file stem
///
/// Anything other than ASCII alphanumerics, `-`, `_` and `.` becomes `_` so
/// service names can never escape the output directory. An empty name maps
/// to `unknown`.
pub fn sanitize_file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        "unknown".to_string()
    } else {
        stem
    }
}

/// Format a duration in a human-readable way
///
/// Converts a Duration to a human-readable string, automatically selecting
/// the most appropriate unit based on the magnitude. Used for per-stage
/// elapsed time in progress messages and the run report.
///
/// ## Unit Selection Logic
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s", "2h 15m 30s")
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}
