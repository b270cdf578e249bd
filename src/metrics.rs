//! # Request-Latency Metric Rows
//!
//! Row types for each step of the latency pipeline and the table-level
//! operations between them:
//!
//! - `group_by_service`: split the raw export into one table per service
//! - `LatencyHistogramRow::percentiles`: normalize and extract the three tails
//! - `PercentileRow::collapse`: reduce each tail to a scalar latency
//! - `split_dimensions`: route the scalars to client or server columns
//! - `average_by_timestamp`: one row per timestamp, averaging non-zero values
//!
//! `split_request_metrics` drives the first step from a raw export on disk.
//!
//! Each step returns new rows; nothing is mutated in place.

use crate::error::{TransError, TransResult};
use crate::histogram::{self, BucketCounts, BucketWeights, TailFraction};
use crate::results::WrittenFile;
use crate::table::{cell, write_csv, CsvTable};
use crate::utils::{format_timestamp, parse_timestamp, sanitize_file_stem};
use chrono::NaiveDateTime;
use csv::StringRecord;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// `MetricName` of server-side request duration histograms.
pub const SERVER_DURATION_METRIC: &str = "http.server.request.duration";

/// `MetricName` of client-side request duration histograms.
pub const CLIENT_DURATION_METRIC: &str = "http.client.request.duration";

pub const SERVICE_NAME_COLUMN: &str = "ServiceName";
pub const METRIC_NAME_COLUMN: &str = "MetricName";
pub const TIME_UNIX_COLUMN: &str = "TimeUnix";
pub const BUCKET_COUNTS_COLUMN: &str = "BucketCounts";
pub const COUNT_COLUMN: &str = "Count";

/// Output columns of the client/server split, in write order.
pub const LATENCY_COLUMNS: [&str; 6] = [
    "client_P90",
    "client_P95",
    "client_P99",
    "server_P90",
    "server_P95",
    "server_P99",
];

/// Which side of a request a duration metric was measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricSide {
    Client,
    Server,
    /// Any other metric; contributes nothing to either side.
    Other,
}

impl MetricSide {
    pub fn from_metric_name(name: &str) -> Self {
        match name {
            CLIENT_DURATION_METRIC => MetricSide::Client,
            SERVER_DURATION_METRIC => MetricSide::Server,
            _ => MetricSide::Other,
        }
    }
}

/// P90/P95/P99 latency triple.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyTriple {
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencyTriple {
    fn set(&mut self, tail: TailFraction, value: f64) {
        match tail {
            TailFraction::P90 => self.p90 = value,
            TailFraction::P95 => self.p95 = value,
            TailFraction::P99 => self.p99 = value,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.p90 == 0.0 && self.p95 == 0.0 && self.p99 == 0.0
    }
}

/// One histogram observation from a per-service metrics file.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyHistogramRow {
    pub metric_name: String,
    pub time_unix: String,
    pub bucket_counts: BucketCounts,
    pub count: u64,
}

impl LatencyHistogramRow {
    /// Parse every row of a per-service metrics table
    ///
    /// Requires the `MetricName`, `TimeUnix`, `BucketCounts` and `Count`
    /// columns; other columns are ignored. Timestamps are kept as text here
    /// and only parsed when rows are bucketed by time.
    pub fn from_table(table: &CsvTable) -> TransResult<Vec<Self>> {
        let [metric, time, buckets, count] = table.columns([
            METRIC_NAME_COLUMN,
            TIME_UNIX_COLUMN,
            BUCKET_COUNTS_COLUMN,
            COUNT_COLUMN,
        ])?;

        table
            .rows()
            .iter()
            .map(|row| -> TransResult<Self> {
                Ok(Self {
                    metric_name: cell(row, metric).to_string(),
                    time_unix: cell(row, time).to_string(),
                    bucket_counts: BucketCounts::parse(cell(row, buckets))?,
                    count: parse_count_cell(cell(row, count))?,
                })
            })
            .collect()
    }

    /// Normalize the histogram and extract the P90, P95 and P99 tails.
    pub fn percentiles(&self, strict_counts: bool) -> TransResult<PercentileRow> {
        let mass = histogram::normalize(&self.bucket_counts, self.count, strict_counts)?;

        Ok(PercentileRow {
            metric_name: self.metric_name.clone(),
            time_unix: self.time_unix.clone(),
            latency_p90: histogram::extract_tail(mass.as_slice(), TailFraction::P90.fraction())?,
            latency_p95: histogram::extract_tail(mass.as_slice(), TailFraction::P95.fraction())?,
            latency_p99: histogram::extract_tail(mass.as_slice(), TailFraction::P99.fraction())?,
        })
    }
}

fn parse_count_cell(raw: &str) -> TransResult<u64> {
    let raw = raw.trim();
    let malformed = || TransError::MalformedValue {
        column: COUNT_COLUMN.to_string(),
        value: raw.to_string(),
    };

    if let Ok(count) = raw.parse::<u64>() {
        return Ok(count);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 && value.fract() == 0.0 => Ok(value as u64),
        _ => Err(malformed()),
    }
}

/// Per-bucket tail percentages for the three tails of one row.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileRow {
    pub metric_name: String,
    pub time_unix: String,
    pub latency_p90: Vec<f64>,
    pub latency_p95: Vec<f64>,
    pub latency_p99: Vec<f64>,
}

impl PercentileRow {
    pub fn tail(&self, tail: TailFraction) -> &[f64] {
        match tail {
            TailFraction::P90 => &self.latency_p90,
            TailFraction::P95 => &self.latency_p95,
            TailFraction::P99 => &self.latency_p99,
        }
    }

    /// Collapse every tail to a scalar with the configured bucket weights.
    pub fn collapse(&self, weights: &BucketWeights) -> TransResult<ScalarLatencyRow> {
        let mut latency = LatencyTriple::default();
        for tail in TailFraction::ALL {
            latency.set(tail, histogram::collapse(self.tail(tail), weights, tail)?);
        }

        Ok(ScalarLatencyRow {
            metric_name: self.metric_name.clone(),
            time_unix: self.time_unix.clone(),
            latency,
        })
    }
}

/// Scalar P90/P95/P99 estimates for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarLatencyRow {
    pub metric_name: String,
    pub time_unix: String,
    pub latency: LatencyTriple,
}

/// Latencies routed to the client or server side.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientServerRow {
    pub time_unix: String,
    pub client: LatencyTriple,
    pub server: LatencyTriple,
}

/// Route a row's latencies by its `MetricName`
///
/// Client-duration rows fill the client triple, server-duration rows the
/// server triple. Unrecognized metric names leave both triples at zero; this
/// is not an error. A row can never populate both sides.
pub fn split_dimensions(row: &ScalarLatencyRow) -> ClientServerRow {
    let mut split = ClientServerRow {
        time_unix: row.time_unix.clone(),
        client: LatencyTriple::default(),
        server: LatencyTriple::default(),
    };

    match MetricSide::from_metric_name(&row.metric_name) {
        MetricSide::Client => split.client = row.latency,
        MetricSide::Server => split.server = row.latency,
        MetricSide::Other => {}
    }

    split
}

/// One row per distinct timestamp after averaging.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBucketedRow {
    pub time: NaiveDateTime,
    pub client: LatencyTriple,
    pub server: LatencyTriple,
}

impl TimeBucketedRow {
    /// The six latency columns in `LATENCY_COLUMNS` order.
    pub fn latency_values(&self) -> [f64; 6] {
        [
            self.client.p90,
            self.client.p95,
            self.client.p99,
            self.server.p90,
            self.server.p95,
            self.server.p99,
        ]
    }

    /// `TimeUnix` followed by the six latency columns.
    pub fn to_record(&self) -> Vec<String> {
        let mut record = Vec::with_capacity(7);
        record.push(format_timestamp(&self.time));
        record.extend(self.latency_values().iter().map(|v| v.to_string()));
        record
    }
}

/// Running mean that ignores zero and missing values.
#[derive(Debug, Clone, Copy, Default)]
struct NonZeroMean {
    sum: f64,
    count: usize,
}

impl NonZeroMean {
    fn push(&mut self, value: f64) {
        // NaN stands in for an empty cell and counts as zero.
        if value.is_finite() && value != 0.0 {
            self.sum += value;
            self.count += 1;
        }
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Debug, Default)]
struct BucketAccumulator {
    columns: [NonZeroMean; 6],
}

impl BucketAccumulator {
    fn push(&mut self, row: &ClientServerRow) {
        let values = [
            row.client.p90,
            row.client.p95,
            row.client.p99,
            row.server.p90,
            row.server.p95,
            row.server.p99,
        ];
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.push(value);
        }
    }

    fn finish(&self, time: NaiveDateTime) -> TimeBucketedRow {
        let mean = |i: usize| self.columns[i].mean();
        TimeBucketedRow {
            time,
            client: LatencyTriple {
                p90: mean(0),
                p95: mean(1),
                p99: mean(2),
            },
            server: LatencyTriple {
                p90: mean(3),
                p95: mean(4),
                p99: mean(5),
            },
        }
    }
}

/// Collapse rows sharing a timestamp into one averaged row
///
/// For each of the six latency columns the result is the mean of the
/// non-zero values at that timestamp, or zero when there are none. Grouping
/// compares parsed timestamps exactly; rows whose timestamp does not parse
/// are dropped. Output is ordered by timestamp.
pub fn average_by_timestamp(rows: &[ClientServerRow]) -> Vec<TimeBucketedRow> {
    let mut buckets: BTreeMap<NaiveDateTime, BucketAccumulator> = BTreeMap::new();
    let mut dropped = 0usize;

    for row in rows {
        match parse_timestamp(&row.time_unix) {
            Ok(time) => buckets.entry(time).or_default().push(row),
            Err(_) => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("Dropped {} rows with unparseable timestamps", dropped);
    }

    buckets
        .iter()
        .map(|(time, acc)| acc.finish(*time))
        .collect()
}

/// Rows of the raw export belonging to one service.
#[derive(Debug, Clone)]
pub struct ServiceGroup {
    pub service: String,
    /// Input header without the `ServiceName` column.
    pub headers: StringRecord,
    pub rows: Vec<StringRecord>,
}

/// Split a raw metrics export into one table per `ServiceName`
///
/// Groups appear in the order their service is first seen. The
/// `ServiceName` column is removed from every group; all other columns are
/// kept verbatim. Rows with an empty service name are skipped.
pub fn group_by_service(table: &CsvTable) -> TransResult<Vec<ServiceGroup>> {
    let service_idx = table.column(SERVICE_NAME_COLUMN)?;
    let without_service = |record: &StringRecord| -> StringRecord {
        record
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != service_idx)
            .map(|(_, value)| value)
            .collect()
    };

    let headers = without_service(table.headers());
    let mut groups: Vec<ServiceGroup> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unnamed = 0usize;

    for row in table.rows() {
        let service = cell(row, service_idx).trim();
        if service.is_empty() {
            unnamed += 1;
            continue;
        }

        let position = *positions.entry(service.to_string()).or_insert_with(|| {
            groups.push(ServiceGroup {
                service: service.to_string(),
                headers: headers.clone(),
                rows: Vec::new(),
            });
            groups.len() - 1
        });
        groups[position].rows.push(without_service(row));
    }

    if unnamed > 0 {
        debug!("Skipped {} metric rows without a ServiceName", unnamed);
    }

    Ok(groups)
}

/// Write each service group to `<dir>/<service>.csv`
///
/// Services whose names sanitize to the same stem get a `-2`, `-3`, ...
/// suffix in group order, so every group lands in its own file.
pub fn write_service_groups(groups: &[ServiceGroup], dir: &Path) -> TransResult<Vec<WrittenFile>> {
    let mut used: HashSet<String> = HashSet::new();

    groups
        .iter()
        .map(|group| -> TransResult<WrittenFile> {
            let base = sanitize_file_stem(&group.service);
            let stem = unique_stem(&base, &mut used);
            if stem != base {
                warn!(
                    "Service {:?} clashes with an earlier service file name; writing {}.csv",
                    group.service, stem
                );
            }
            let path = dir.join(format!("{}.csv", stem));
            let headers: Vec<&str> = group.headers.iter().collect();
            let rows = write_csv(&path, &headers, &group.rows)?;
            debug!("Saved {} rows for {} to {}", rows, group.service, path.display());
            Ok(WrittenFile { path, rows })
        })
        .collect()
}

fn unique_stem(base: &str, used: &mut HashSet<String>) -> String {
    let mut stem = base.to_string();
    let mut suffix = 2usize;
    // Case-insensitive, as on case-folding filesystems.
    while !used.insert(stem.to_lowercase()) {
        stem = format!("{}-{}", base, suffix);
        suffix += 1;
    }
    stem
}

/// Split a raw request-metrics export into per-service files under `dir`.
pub fn split_request_metrics(input: &Path, dir: &Path) -> TransResult<Vec<WrittenFile>> {
    let table = CsvTable::read(input)?;
    let groups = group_by_service(&table)?;
    let written = write_service_groups(&groups, dir)?;
    info!(
        "Split {} metric rows from {} into {} service files",
        table.len(),
        input.display(),
        written.len()
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(content: &str) -> CsvTable {
        CsvTable::from_reader(content.as_bytes()).unwrap()
    }

    fn split_row(time: &str, client: [f64; 3], server: [f64; 3]) -> ClientServerRow {
        ClientServerRow {
            time_unix: time.to_string(),
            client: LatencyTriple {
                p90: client[0],
                p95: client[1],
                p99: client[2],
            },
            server: LatencyTriple {
                p90: server[0],
                p95: server[1],
                p99: server[2],
            },
        }
    }

    #[test]
    fn test_metric_side() {
        assert_eq!(
            MetricSide::from_metric_name("http.client.request.duration"),
            MetricSide::Client
        );
        assert_eq!(
            MetricSide::from_metric_name("http.server.request.duration"),
            MetricSide::Server
        );
        assert_eq!(MetricSide::from_metric_name("rpc.duration"), MetricSide::Other);
    }

    #[test]
    fn test_split_client_row() {
        let row = ScalarLatencyRow {
            metric_name: CLIENT_DURATION_METRIC.to_string(),
            time_unix: "2024-10-24 13:05:00".to_string(),
            latency: LatencyTriple {
                p90: 7.0,
                p95: 8.0,
                p99: 9.0,
            },
        };
        let split = split_dimensions(&row);
        assert_eq!(split.client.p90, 7.0);
        assert_eq!(split.client.p99, 9.0);
        assert!(split.server.is_zero());
    }

    #[test]
    fn test_split_is_mutually_exclusive() {
        for name in [CLIENT_DURATION_METRIC, SERVER_DURATION_METRIC, "other", ""] {
            let row = ScalarLatencyRow {
                metric_name: name.to_string(),
                time_unix: String::new(),
                latency: LatencyTriple {
                    p90: 1.0,
                    p95: 2.0,
                    p99: 3.0,
                },
            };
            let split = split_dimensions(&row);
            assert!(split.client.is_zero() || split.server.is_zero());
            if name == "other" || name.is_empty() {
                assert!(split.client.is_zero() && split.server.is_zero());
            }
        }
    }

    #[test]
    fn test_average_excludes_zeros() {
        let rows = vec![
            split_row("2024-10-24 13:05:00", [0.0; 3], [5.0, 1.0, 0.0]),
            split_row("2024-10-24 13:05:00", [0.0; 3], [0.0, 3.0, 0.0]),
        ];
        let averaged = average_by_timestamp(&rows);
        assert_eq!(averaged.len(), 1);
        assert_eq!(averaged[0].server.p90, 5.0);
        assert_eq!(averaged[0].server.p95, 2.0);
        assert_eq!(averaged[0].server.p99, 0.0);
        assert!(averaged[0].client.is_zero());
    }

    #[test]
    fn test_average_groups_and_orders_by_time() {
        let rows = vec![
            split_row("2024-10-24 13:06:00", [2.0, 0.0, 0.0], [0.0; 3]),
            split_row("2024-10-24 13:05:00", [4.0, 0.0, 0.0], [0.0; 3]),
            split_row("2024-10-24T13:06:00", [6.0, 0.0, 0.0], [0.0; 3]),
            split_row("garbage", [100.0, 0.0, 0.0], [0.0; 3]),
            split_row("2024-10-24 13:05:00", [f64::NAN, 0.0, 0.0], [0.0; 3]),
        ];
        let averaged = average_by_timestamp(&rows);
        assert_eq!(averaged.len(), 2);
        assert_eq!(format_timestamp(&averaged[0].time), "2024-10-24 13:05:00");
        assert_eq!(averaged[0].client.p90, 4.0);
        assert_eq!(averaged[1].client.p90, 4.0);
    }

    #[test]
    fn test_histogram_rows_from_table() {
        let t = table(
            "TimeUnix,MetricName,BucketCounts,Count,Extra\n\
             2024-10-24 13:05:00,http.client.request.duration,\"[10, 20, 30, 40]\",100,x\n",
        );
        let rows = LatencyHistogramRow::from_table(&t).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 100);
        assert_eq!(rows[0].bucket_counts.as_slice(), &[10, 20, 30, 40]);
    }

    #[test]
    fn test_histogram_rows_missing_bucket_counts() {
        let t = table("TimeUnix,MetricName,Count\n2024-10-24 13:05:00,x,1\n");
        assert!(matches!(
            LatencyHistogramRow::from_table(&t),
            Err(TransError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_histogram_rows_bad_count() {
        let t = table("TimeUnix,MetricName,BucketCounts,Count\nt,m,\"[1]\",abc\n");
        assert!(matches!(
            LatencyHistogramRow::from_table(&t),
            Err(TransError::MalformedValue { .. })
        ));
        assert_eq!(parse_count_cell("12.0").unwrap(), 12);
    }

    #[test]
    fn test_percentiles_then_collapse() {
        let row = LatencyHistogramRow {
            metric_name: CLIENT_DURATION_METRIC.to_string(),
            time_unix: "2024-10-24 13:05:00".to_string(),
            bucket_counts: BucketCounts::new(vec![10, 20, 30, 40]),
            count: 100,
        };
        let weights = BucketWeights::new(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let scalar = row.percentiles(false).unwrap().collapse(&weights).unwrap();

        assert!((scalar.latency.p99 - 4.0).abs() < 1e-9);
        // The top bucket alone covers P90 and P95 as well.
        assert!((scalar.latency.p90 - 4.0).abs() < 1e-9);
        assert!((scalar.latency.p95 - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_group_by_service_drops_column_and_keeps_order() {
        let t = table(
            "ServiceName,MetricName,TimeUnix\n\
             ts-order,m1,t1\n\
             ts-auth,m2,t2\n\
             ,m3,t3\n\
             ts-order,m4,t4\n",
        );
        let groups = group_by_service(&t).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].service, "ts-order");
        assert_eq!(groups[1].service, "ts-auth");
        assert_eq!(groups[0].headers, StringRecord::from(vec!["MetricName", "TimeUnix"]));
        assert_eq!(groups[0].rows.len(), 2);
        assert_eq!(&groups[0].rows[1][0], "m4");
    }

    #[test]
    fn test_split_request_metrics_writes_one_file_per_service() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("request_metrics.csv");
        std::fs::write(
            &input,
            "ServiceName,TimeUnix,Count\n\
             ts-order,t1,1\n\
             ts/ui,t2,2\n\
             ts-order,t3,3\n",
        )
        .unwrap();

        let written = split_request_metrics(&input, &dir.path().join("request")).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].rows, 2);
        assert_eq!(written[1].path, dir.path().join("request").join("ts_ui.csv"));

        let order = std::fs::read_to_string(&written[0].path).unwrap();
        assert_eq!(order, "TimeUnix,Count\nt1,1\nt3,3\n");
    }

    #[test]
    fn test_colliding_service_stems_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("request_metrics.csv");
        std::fs::write(
            &input,
            "ServiceName,TimeUnix,Count\n\
             ts/ui,t1,1\n\
             ts_ui,t2,2\n\
             ts_ui,t3,3\n\
             ts:ui,t4,4\n",
        )
        .unwrap();

        let request_dir = dir.path().join("request");
        let written = split_request_metrics(&input, &request_dir).unwrap();
        let rows: Vec<usize> = written.iter().map(|f| f.rows).collect();
        assert_eq!(rows, vec![1, 2, 1]);
        assert_eq!(written[0].path, request_dir.join("ts_ui.csv"));
        assert_eq!(written[1].path, request_dir.join("ts_ui-2.csv"));
        assert_eq!(written[2].path, request_dir.join("ts_ui-3.csv"));

        let on_disk = std::fs::read_dir(&request_dir).unwrap().count();
        assert_eq!(on_disk, written.len());
        assert_eq!(
            std::fs::read_to_string(&written[0].path).unwrap(),
            "TimeUnix,Count\nt1,1\n"
        );
        assert_eq!(
            std::fs::read_to_string(&written[1].path).unwrap(),
            "TimeUnix,Count\nt2,2\nt3,3\n"
        );
    }

    #[test]
    fn test_group_by_service_requires_column() {
        let t = table("MetricName\nm\n");
        assert!(group_by_service(&t).is_err());
    }

    #[test]
    fn test_bucketed_row_record() {
        let rows = vec![split_row("2024-10-24 13:05:00", [1.5, 0.0, 0.0], [0.0; 3])];
        let averaged = average_by_timestamp(&rows);
        assert_eq!(
            averaged[0].to_record(),
            vec!["2024-10-24 13:05:00", "1.5", "0", "0", "0", "0", "0"]
        );
    }
}
