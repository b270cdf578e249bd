//! Fault-injection schedule conversion.
//!
//! The chaos tooling records its injections in TOML:
//!
//! ```toml
//! [[chaos_injection]]
//! timestamp = 2024-10-24 13:05:00
//! service = "ts-order-service"
//! chaos_type = "cpu"
//! ```
//!
//! The analysis tool wants them grouped by hour of day in a JSON object,
//! `{"13": [{"inject_time": ..., "inject_pod": ..., "inject_type": ...}]}`.
//! Hours are sorted, entries keep their schedule order inside an hour.

use crate::error::{TransError, TransResult};
use crate::results::WrittenFile;
use crate::utils::parse_timestamp;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// `inject_time` layout.
const INJECT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Deserialize)]
struct FaultSchedule {
    #[serde(default)]
    chaos_injection: Vec<ChaosInjection>,
}

#[derive(Debug, Deserialize)]
struct ChaosInjection {
    timestamp: toml::Value,
    service: String,
    chaos_type: String,
}

/// One injection as written to the fault list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub inject_time: String,
    pub inject_pod: String,
    pub inject_type: String,
}

/// Injections keyed by two-digit hour.
pub type FaultTimeline = BTreeMap<String, Vec<FaultRecord>>;

/// A parsed schedule: injections in file order with their parsed times.
#[derive(Debug, Default)]
pub struct FaultList {
    entries: Vec<(NaiveDateTime, FaultRecord)>,
}

impl FaultList {
    pub fn parse(content: &str) -> TransResult<Self> {
        let schedule: FaultSchedule = toml::from_str(content)?;
        let entries = schedule
            .chaos_injection
            .into_iter()
            .map(|injection| -> TransResult<(NaiveDateTime, FaultRecord)> {
                let time = injection_time(&injection.timestamp)?;
                Ok((
                    time,
                    FaultRecord {
                        inject_time: time.format(INJECT_TIME_FORMAT).to_string(),
                        inject_pod: injection.service,
                        inject_type: injection.chaos_type,
                    },
                ))
            })
            .collect::<TransResult<Vec<_>>>()?;

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Group injections by hour of day.
    pub fn timeline(&self) -> FaultTimeline {
        let mut timeline = FaultTimeline::new();
        for (time, record) in &self.entries {
            timeline
                .entry(format!("{:02}", time.hour()))
                .or_default()
                .push(record.clone());
        }
        timeline
    }

    /// `<date of first injection>-fault_list.json`, or `fault_list.json`.
    pub fn default_file_name(&self) -> String {
        match self.entries.first() {
            Some((time, _)) => format!("{}-fault_list.json", time.format("%Y-%m-%d")),
            None => "fault_list.json".to_string(),
        }
    }
}

/// Accept a TOML datetime or a timestamp string.
///
/// Offsets on TOML datetimes are ignored; the wall-clock time is kept.
fn injection_time(value: &toml::Value) -> TransResult<NaiveDateTime> {
    match value {
        toml::Value::String(text) => parse_timestamp(text),
        toml::Value::Datetime(datetime) => {
            let invalid = || TransError::Timestamp(datetime.to_string());
            let date = datetime.date.ok_or_else(invalid)?;
            let date = NaiveDate::from_ymd_opt(
                i32::from(date.year),
                u32::from(date.month),
                u32::from(date.day),
            )
            .ok_or_else(invalid)?;
            let time = match datetime.time {
                Some(t) => NaiveTime::from_hms_nano_opt(
                    u32::from(t.hour),
                    u32::from(t.minute),
                    u32::from(t.second),
                    t.nanosecond,
                )
                .ok_or_else(invalid)?,
                None => NaiveTime::from_hms_opt(0, 0, 0).ok_or_else(invalid)?,
            };
            Ok(date.and_time(time))
        }
        other => Err(TransError::Timestamp(format!("{:?}", other))),
    }
}

/// Serialize with four-space indentation.
pub fn to_json_pretty4<T: Serialize>(value: &T) -> TransResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    Ok(buffer)
}

/// Convert a schedule file into the hour-keyed fault list
///
/// The output goes to `output_root/<file_name>`, or to the name derived
/// from the first injection date when `file_name` is `None`.
pub fn convert_fault_schedule(
    input: &Path,
    output_root: &Path,
    file_name: Option<&str>,
) -> TransResult<WrittenFile> {
    let content = fs::read_to_string(input)?;
    let faults = FaultList::parse(&content)?;
    debug!("Parsed {} injections from {}", faults.len(), input.display());

    let path = match file_name {
        Some(name) => output_root.join(name),
        None => output_root.join(faults.default_file_name()),
    };
    fs::create_dir_all(output_root)?;
    fs::write(&path, to_json_pretty4(&faults.timeline())?)?;

    info!("Saved {} injections to {}", faults.len(), path.display());
    Ok(WrittenFile {
        path,
        rows: faults.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SCHEDULE: &str = r#"
[[chaos_injection]]
timestamp = 2024-10-24 13:40:00
service = "ts-auth-service"
chaos_type = "network-delay"

[[chaos_injection]]
timestamp = "2024-10-24 14:02:00"
service = "ts-order-service"
chaos_type = "cpu"

[[chaos_injection]]
timestamp = 2024-10-24T13:05:00
service = "ts-user-service"
chaos_type = "memory"
"#;

    #[test]
    fn test_timeline_grouped_by_hour() {
        let faults = FaultList::parse(SCHEDULE).unwrap();
        let timeline = faults.timeline();

        assert_eq!(timeline.keys().collect::<Vec<_>>(), vec!["13", "14"]);
        let thirteen: Vec<&str> = timeline["13"].iter().map(|r| r.inject_time.as_str()).collect();
        assert_eq!(thirteen, vec!["2024-10-24 13:40:00", "2024-10-24 13:05:00"]);
        assert_eq!(timeline["14"][0].inject_pod, "ts-order-service");
        assert_eq!(timeline["14"][0].inject_type, "cpu");
    }

    #[test]
    fn test_default_file_name() {
        assert_eq!(
            FaultList::parse(SCHEDULE).unwrap().default_file_name(),
            "2024-10-24-fault_list.json"
        );
        assert_eq!(FaultList::parse("").unwrap().default_file_name(), "fault_list.json");
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let content = "[[chaos_injection]]\ntimestamp = 2024-10-24 13:40:00\nservice = \"a\"\n";
        assert!(matches!(FaultList::parse(content), Err(TransError::Toml(_))));
    }

    #[test]
    fn test_non_time_value_is_an_error() {
        let content = "[[chaos_injection]]\ntimestamp = 42\nservice = \"a\"\nchaos_type = \"b\"\n";
        assert!(matches!(FaultList::parse(content), Err(TransError::Timestamp(_))));
    }

    #[test]
    fn test_convert_writes_four_space_json() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("fault_injection.toml");
        fs::write(&input, SCHEDULE).unwrap();

        let written = convert_fault_schedule(&input, &dir.path().join("out"), None).unwrap();
        assert_eq!(written.rows, 3);
        assert_eq!(
            written.path,
            dir.path().join("out").join("2024-10-24-fault_list.json")
        );

        let json = fs::read_to_string(&written.path).unwrap();
        assert!(json.starts_with("{\n    \"13\": [\n        {"));
        let parsed: FaultTimeline = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["13"].len(), 2);
    }
}
