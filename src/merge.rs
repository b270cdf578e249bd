//! # Latency Merge
//!
//! Runs the full latency pipeline over every per-service histogram file of
//! an experiment and concatenates the results into one table.
//!
//! ## Per File
//!
//! 1. `LatencyHistogramRow::from_table` parses the histogram rows
//! 2. `percentiles` normalizes and extracts the P90/P95/P99 tails
//! 3. `collapse` reduces each tail with the bucket weights
//! 4. `split_dimensions` routes values to client or server columns
//! 5. `average_by_timestamp` produces one row per timestamp
//!
//! The result is written to `<service_dir>/<service>.csv`.
//!
//! ## Failure Isolation
//!
//! A file that fails to parse or normalize is logged, recorded in the
//! `MergeSummary` and left out of the merged output. Errors that would make
//! every file fail (bad weight configuration) abort the merge instead.
//!
//! ## Merged Output
//!
//! Services appear in file-name order, rows of a service by timestamp:
//!
//! ```text
//! Time,TimeStamp,PodName,client_P90,client_P95,client_P99,server_P90,server_P95,server_P99
//! 2024-10-24 13:05:00,1729775100,ts-order-service,0,0,4,0,0,0
//! ```

use crate::error::TransResult;
use crate::histogram::BucketWeights;
use crate::metrics::{
    average_by_timestamp, split_dimensions, LatencyHistogramRow, TimeBucketedRow,
    LATENCY_COLUMNS, TIME_UNIX_COLUMN,
};
use crate::results::{SkippedFile, WrittenFile};
use crate::table::{write_csv, CsvTable};
use crate::utils::{epoch_seconds, format_timestamp};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Leading columns of the merged table, followed by `LATENCY_COLUMNS`.
pub const MERGED_KEY_COLUMNS: [&str; 3] = ["Time", "TimeStamp", "PodName"];

/// Time-bucketed latencies of one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceLatency {
    pub pod_name: String,
    pub rows: Vec<TimeBucketedRow>,
}

/// Outcome of a merge run
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSummary {
    /// Per-service outputs of the files that succeeded
    pub processed: Vec<WrittenFile>,
    /// Files left out, with the reason
    pub skipped: Vec<SkippedFile>,
    /// The merged table
    pub merged: WrittenFile,
}

impl MergeSummary {
    pub fn into_files(self) -> (Vec<WrittenFile>, Vec<SkippedFile>) {
        let mut files = self.processed;
        files.push(self.merged);
        (files, self.skipped)
    }
}

/// Run the latency pipeline on one per-service table.
pub fn process_table(
    table: &CsvTable,
    weights: &BucketWeights,
    strict_counts: bool,
) -> TransResult<Vec<TimeBucketedRow>> {
    let split = LatencyHistogramRow::from_table(table)?
        .iter()
        .map(|row| -> TransResult<_> {
            let scalar = row.percentiles(strict_counts)?.collapse(weights)?;
            Ok(split_dimensions(&scalar))
        })
        .collect::<TransResult<Vec<_>>>()?;

    Ok(average_by_timestamp(&split))
}

/// Header of the merged table.
pub fn merged_headers() -> Vec<&'static str> {
    MERGED_KEY_COLUMNS
        .iter()
        .chain(LATENCY_COLUMNS.iter())
        .copied()
        .collect()
}

/// Concatenate services into merged-table records.
pub fn merged_records(services: &[ServiceLatency]) -> impl Iterator<Item = Vec<String>> + '_ {
    services.iter().flat_map(|service| {
        service.rows.iter().map(move |row| {
            let mut record = Vec::with_capacity(MERGED_KEY_COLUMNS.len() + LATENCY_COLUMNS.len());
            record.push(format_timestamp(&row.time));
            record.push(epoch_seconds(&row.time).to_string());
            record.push(service.pod_name.clone());
            record.extend(row.latency_values().iter().map(|v| v.to_string()));
            record
        })
    })
}

/// Per-service CSV files of a directory, sorted by file name.
fn list_csv_files(dir: &Path) -> TransResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if path.is_file() && is_csv {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Drives the latency pipeline over an experiment's service files
pub struct MergeOrchestrator<'a> {
    weights: &'a BucketWeights,
    strict_counts: bool,
}

impl<'a> MergeOrchestrator<'a> {
    pub fn new(weights: &'a BucketWeights, strict_counts: bool) -> Self {
        Self {
            weights,
            strict_counts,
        }
    }

    /// Read one service file and run the pipeline on it.
    pub fn process_file(&self, path: &Path) -> TransResult<ServiceLatency> {
        let table = CsvTable::read(path)?;
        let rows = process_table(&table, self.weights, self.strict_counts)?;
        let pod_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(ServiceLatency { pod_name, rows })
    }

    /// Merge every `*.csv` in `input_dir`
    ///
    /// ## Parameters
    /// - `input_dir`: per-service histogram files; created when missing
    /// - `service_dir`: receives one time-bucketed file per service
    /// - `merged_path`: the concatenated table
    ///
    /// ## Errors
    /// Only errors that are not recoverable per file, plus output I/O
    /// failures. An input directory without usable files still yields a
    /// header-only merged table.
    pub fn run(
        &self,
        input_dir: &Path,
        service_dir: &Path,
        merged_path: &Path,
    ) -> TransResult<MergeSummary> {
        fs::create_dir_all(input_dir)?;
        let files = list_csv_files(input_dir)?;
        debug!("Merging {} service files from {}", files.len(), input_dir.display());

        let mut services = Vec::new();
        let mut processed = Vec::new();
        let mut skipped = Vec::new();

        for path in &files {
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match self.process_file(path) {
                Ok(service) => {
                    let out = service_dir.join(&file);
                    let rows = write_csv(
                        &out,
                        &service_headers(),
                        service.rows.iter().map(TimeBucketedRow::to_record),
                    )?;
                    info!("Processed and saved: {}", out.display());
                    processed.push(WrittenFile { path: out, rows });
                    services.push(service);
                }
                Err(e) if e.is_recoverable() => {
                    error!("Error processing file {}: {}", file, e);
                    skipped.push(SkippedFile {
                        file,
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if services.is_empty() {
            warn!(
                "No service files could be processed in {}; writing an empty merged table",
                input_dir.display()
            );
        }

        let rows = write_csv(merged_path, &merged_headers(), merged_records(&services))?;
        info!("Saved merged latencies ({} rows) to {}", rows, merged_path.display());

        Ok(MergeSummary {
            processed,
            skipped,
            merged: WrittenFile {
                path: merged_path.to_path_buf(),
                rows,
            },
        })
    }
}

fn service_headers() -> Vec<&'static str> {
    std::iter::once(TIME_UNIX_COLUMN)
        .chain(LATENCY_COLUMNS.iter().copied())
        .collect()
}
