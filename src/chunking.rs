//! Fixed-width time chunking for log and trace tables.
//!
//! Windows are anchored at the earliest timestamp in the input, not at wall
//! clock minute boundaries. Rows past the last window are dropped and empty
//! windows produce no chunk.

use crate::config::ChunkSpec;
use chrono::{Duration, NaiveDateTime, Timelike};
use std::collections::BTreeMap;

/// Rows falling into one window `[start, start + width)`.
#[derive(Debug)]
pub struct Chunk<'a, T> {
    pub start: NaiveDateTime,
    pub rows: Vec<&'a T>,
}

impl<'a, T> Chunk<'a, T> {
    /// `{hour}_{minute}_{kind}.csv`, hour unpadded, minute zero-padded.
    pub fn file_name(&self, kind: &str) -> String {
        format!("{}_{:02}_{}.csv", self.start.hour(), self.start.minute(), kind)
    }
}

/// Split `rows` into consecutive windows starting at the earliest timestamp.
///
/// Rows keep their input order within a window. Only windows holding rows
/// are materialized.
pub fn split_into_chunks<'a, T, F>(rows: &'a [T], timestamp: F, spec: ChunkSpec) -> Vec<Chunk<'a, T>>
where
    F: Fn(&T) -> NaiveDateTime,
{
    let Some(origin) = rows.iter().map(&timestamp).min() else {
        return Vec::new();
    };
    let width_ms = (i64::from(spec.width_minutes) * 60_000).max(1);
    let count = i64::try_from(spec.count).unwrap_or(i64::MAX);

    let mut windows: BTreeMap<i64, Vec<&'a T>> = BTreeMap::new();
    for row in rows {
        let index = (timestamp(row) - origin).num_milliseconds() / width_ms;
        if index < count {
            windows.entry(index).or_default().push(row);
        }
    }

    // index * width_ms never exceeds an observed offset, so the start exists.
    windows
        .into_iter()
        .filter_map(|(index, rows)| {
            let start = origin.checked_add_signed(Duration::milliseconds(index * width_ms))?;
            Some(Chunk { start, rows })
        })
        .collect()
}
