//! Log export reformatting.
//!
//! Turns the collector's log export into the column layout the analysis tool
//! reads and writes it as one file per minute under `<output_root>/log/`.
//! Severity columns of the export are not carried over.

use crate::chunking::split_into_chunks;
use crate::config::ChunkSpec;
use crate::error::TransResult;
use crate::results::WrittenFile;
use crate::table::{cell, write_csv, CsvTable};
use crate::utils::{epoch_nanos, parse_timestamp, truncate_fraction};
use chrono::NaiveDateTime;
use std::path::Path;
use tracing::{debug, info};

/// Columns written to every log chunk, in order.
pub const LOG_OUTPUT_COLUMNS: [&str; 8] = [
    "Timestamp",
    "TimeUnixNano",
    "Node",
    "PodName",
    "Container",
    "TraceID",
    "SpanID",
    "Log",
];

/// Fractional digits kept when deriving `TimeUnixNano`.
const NANO_SOURCE_DIGITS: usize = 6;

/// One reformatted log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: String,
    pub time: NaiveDateTime,
    pub time_unix_nano: i64,
    pub pod_name: String,
    pub trace_id: String,
    pub span_id: String,
    pub body: String,
}

impl LogRecord {
    /// Parse every row of a log export
    ///
    /// Requires `Timestamp`, `ServiceName`, `Body`, `SpanId` and `TraceId`.
    /// A row whose timestamp does not parse fails the whole table.
    pub fn from_table(table: &CsvTable) -> TransResult<Vec<Self>> {
        let [timestamp, service, body, span, trace] =
            table.columns(["Timestamp", "ServiceName", "Body", "SpanId", "TraceId"])?;

        table
            .rows()
            .iter()
            .map(|row| -> TransResult<Self> {
                let raw = cell(row, timestamp).trim();
                let truncated = parse_timestamp(&truncate_fraction(raw, NANO_SOURCE_DIGITS))?;
                Ok(Self {
                    timestamp: raw.to_string(),
                    time: parse_timestamp(raw)?,
                    time_unix_nano: epoch_nanos(&truncated)?,
                    pod_name: cell(row, service).to_string(),
                    trace_id: cell(row, trace).to_string(),
                    span_id: cell(row, span).to_string(),
                    body: cell(row, body).to_string(),
                })
            })
            .collect()
    }

    fn to_record(&self, node: &str, container: &str) -> [String; 8] {
        [
            self.timestamp.clone(),
            self.time_unix_nano.to_string(),
            node.to_string(),
            self.pod_name.clone(),
            container.to_string(),
            self.trace_id.clone(),
            self.span_id.clone(),
            self.body.clone(),
        ]
    }
}

/// Write `records` as per-minute chunk files into `out_dir`.
pub fn write_log_chunks(
    records: &[LogRecord],
    node: &str,
    container: &str,
    spec: ChunkSpec,
    out_dir: &Path,
) -> TransResult<Vec<WrittenFile>> {
    let mut written = Vec::new();

    for chunk in split_into_chunks(records, |r| r.time, spec) {
        let path = out_dir.join(chunk.file_name("log"));
        let rows = write_csv(
            &path,
            &LOG_OUTPUT_COLUMNS,
            chunk.rows.iter().map(|r| r.to_record(node, container)),
        )?;
        info!("Saved {} log rows to {}", rows, path.display());
        written.push(WrittenFile { path, rows });
    }

    Ok(written)
}

/// Read a log export, reformat it and write the chunk files.
pub fn convert_logs(
    input: &Path,
    out_dir: &Path,
    node: &str,
    container: &str,
    spec: ChunkSpec,
) -> TransResult<Vec<WrittenFile>> {
    let table = CsvTable::read(input)?;
    debug!("Read {} log rows from {}", table.len(), input.display());

    let records = LogRecord::from_table(&table)?;
    write_log_chunks(&records, node, container, spec, out_dir)
}
