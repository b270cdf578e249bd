//! Trace export reformatting and trace-id extraction.
//!
//! Spans are rewritten to the analysis tool's column layout with absolute
//! start and end times in Unix nanoseconds, then chunked per minute into
//! `<output_root>/trace/`. For every trace chunk a companion file under
//! `<output_root>/traceid/` lists the distinct trace ids it contains.

use crate::chunking::{split_into_chunks, Chunk};
use crate::config::ChunkSpec;
use crate::error::{TransError, TransResult};
use crate::results::WrittenFile;
use crate::table::{cell, write_csv, CsvTable};
use crate::utils::{epoch_nanos, parse_timestamp};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Columns written to every trace chunk, in order.
pub const TRACE_OUTPUT_COLUMNS: [&str; 8] = [
    "TraceID",
    "SpanID",
    "ParentID",
    "PodName",
    "OperationName",
    "Timestamp",
    "StartTimeUnixNano",
    "EndTimeUnixNano",
];

pub const TRACE_ID_COLUMN: &str = "TraceID";

/// One reformatted span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_id: String,
    pub pod_name: String,
    pub operation_name: String,
    pub timestamp: String,
    pub time: NaiveDateTime,
    pub start_unix_nano: i64,
    pub end_unix_nano: i64,
}

impl SpanRecord {
    /// Parse every row of a trace export
    ///
    /// `Duration` is in microseconds. The start time keeps the full
    /// nanosecond precision of `Timestamp`.
    pub fn from_table(table: &CsvTable) -> TransResult<Vec<Self>> {
        let [timestamp, duration, trace, span, parent, service, name] = table.columns([
            "Timestamp",
            "Duration",
            "TraceId",
            "SpanId",
            "ParentSpanId",
            "ServiceName",
            "SpanName",
        ])?;

        table
            .rows()
            .iter()
            .map(|row| -> TransResult<Self> {
                let raw = cell(row, timestamp).trim();
                let time = parse_timestamp(raw)?;
                let start_unix_nano = epoch_nanos(&time)?;
                let duration_nanos = parse_duration_nanos(cell(row, duration))?;

                Ok(Self {
                    trace_id: cell(row, trace).to_string(),
                    span_id: cell(row, span).to_string(),
                    parent_id: cell(row, parent).to_string(),
                    pod_name: cell(row, service).to_string(),
                    operation_name: cell(row, name).to_string(),
                    timestamp: raw.to_string(),
                    time,
                    start_unix_nano,
                    end_unix_nano: start_unix_nano.saturating_add(duration_nanos),
                })
            })
            .collect()
    }

    fn to_record(&self) -> [String; 8] {
        [
            self.trace_id.clone(),
            self.span_id.clone(),
            self.parent_id.clone(),
            self.pod_name.clone(),
            self.operation_name.clone(),
            self.timestamp.clone(),
            self.start_unix_nano.to_string(),
            self.end_unix_nano.to_string(),
        ]
    }
}

/// Microsecond `Duration` cell to nanoseconds.
fn parse_duration_nanos(raw: &str) -> TransResult<i64> {
    let raw = raw.trim();
    if let Ok(micros) = raw.parse::<i64>() {
        return Ok(micros.saturating_mul(1000));
    }
    match raw.parse::<f64>() {
        Ok(micros) if micros.is_finite() => Ok((micros * 1000.0).round() as i64),
        _ => Err(TransError::MalformedValue {
            column: "Duration".to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Distinct trace ids of a chunk in first-seen order.
pub fn distinct_trace_ids<'a>(spans: impl IntoIterator<Item = &'a SpanRecord>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    spans
        .into_iter()
        .map(|span| span.trace_id.as_str())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Files produced by the trace stage.
#[derive(Debug, Default)]
pub struct TraceOutput {
    pub trace_files: Vec<WrittenFile>,
    pub trace_id_files: Vec<WrittenFile>,
}

impl TraceOutput {
    pub fn into_files(self) -> Vec<WrittenFile> {
        let mut files = self.trace_files;
        files.extend(self.trace_id_files);
        files
    }
}

fn write_trace_id_file(chunk: &Chunk<'_, SpanRecord>, dir: &Path) -> TransResult<WrittenFile> {
    let path = dir.join(chunk.file_name("traceid"));
    let ids = distinct_trace_ids(chunk.rows.iter().copied());
    let rows = write_csv(&path, &[TRACE_ID_COLUMN], ids.into_iter().map(|id| [id]))?;
    debug!("Saved {} trace ids to {}", rows, path.display());
    Ok(WrittenFile { path, rows })
}

/// Write `spans` as per-minute trace chunks plus their trace-id lists.
pub fn write_trace_chunks(
    spans: &[SpanRecord],
    spec: ChunkSpec,
    trace_dir: &Path,
    traceid_dir: &Path,
) -> TransResult<TraceOutput> {
    let mut output = TraceOutput::default();

    for chunk in split_into_chunks(spans, |s| s.time, spec) {
        let path = trace_dir.join(chunk.file_name("trace"));
        let rows = write_csv(
            &path,
            &TRACE_OUTPUT_COLUMNS,
            chunk.rows.iter().map(|s| s.to_record()),
        )?;
        info!("Saved {} spans to {}", rows, path.display());
        output.trace_files.push(WrittenFile { path, rows });
        output.trace_id_files.push(write_trace_id_file(&chunk, traceid_dir)?);
    }

    Ok(output)
}

/// Read a trace export, reformat it and write trace and trace-id chunks.
pub fn convert_traces(
    input: &Path,
    spec: ChunkSpec,
    trace_dir: &Path,
    traceid_dir: &Path,
) -> TransResult<TraceOutput> {
    let table = CsvTable::read(input)?;
    debug!("Read {} spans from {}", table.len(), input.display());

    let spans = SpanRecord::from_table(&table)?;
    write_trace_chunks(&spans, spec, trace_dir, traceid_dir)
}
