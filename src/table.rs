//! Flat CSV tables: read a whole file into memory, look columns up by name,
//! and write rows back out.
//!
//! Every stage of the converter works on tables small enough to hold in
//! memory, so there is no streaming here.

use crate::error::{TransError, TransResult};
use csv::StringRecord;
use std::fs;
use std::io::Read;
use std::path::Path;

/// A CSV file with a header row.
#[derive(Debug, Clone)]
pub struct CsvTable {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl CsvTable {
    /// Read a CSV file from disk.
    pub fn read(path: &Path) -> TransResult<Self> {
        let file = fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Read CSV content from any reader.
    pub fn from_reader<R: Read>(reader: R) -> TransResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let rows = reader.records().collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            headers,
            rows,
        })
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a required column.
    pub fn column(&self, name: &str) -> TransResult<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| TransError::MissingColumn {
                column: name.to_string(),
            })
    }

    /// Indices of several required columns, failing on the first one absent.
    pub fn columns<const N: usize>(&self, names: [&str; N]) -> TransResult<[usize; N]> {
        let mut indices = [0usize; N];
        for (slot, name) in indices.iter_mut().zip(names) {
            *slot = self.column(name)?;
        }
        Ok(indices)
    }
}

/// Cell text, empty when the row is shorter than the header.
pub fn cell(row: &StringRecord, index: usize) -> &str {
    row.get(index).unwrap_or("")
}

/// Write a header and rows to `path`, creating parent directories.
///
/// Returns the number of data rows written.
pub fn write_csv<I, R, S>(path: &Path, headers: &[&str], rows: I) -> TransResult<usize>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(headers)?;

    let mut written = 0;
    for row in rows {
        writer.write_record(row)?;
        written += 1;
    }
    writer.flush()?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn table(content: &str) -> CsvTable {
        CsvTable::from_reader(content.as_bytes()).unwrap()
    }

    #[test]
    fn test_column_lookup() {
        let t = table("TimeUnix, Count\n2024-10-24 13:05:00,3\n");
        assert_eq!(t.column("Count").unwrap(), 1);
        assert_eq!(t.columns(["Count", "TimeUnix"]).unwrap(), [1, 0]);
        assert_eq!(t.len(), 1);
        assert_eq!(cell(&t.rows()[0], 1), "3");
        assert_eq!(cell(&t.rows()[0], 7), "");
    }

    #[test]
    fn test_missing_column() {
        let t = table("TimeUnix,Count\n");
        match t.column("BucketCounts") {
            Err(TransError::MissingColumn { column }) => assert_eq!(column, "BucketCounts"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(t.is_empty());
    }

    #[test]
    fn test_write_then_read_quoted_lists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("svc.csv");

        let rows = vec![vec!["a".to_string(), "[1, 2, 3]".to_string()]];
        let written = write_csv(&path, &["Name", "BucketCounts"], rows).unwrap();
        assert_eq!(written, 1);

        let t = CsvTable::read(&path).unwrap();
        let idx = t.column("BucketCounts").unwrap();
        assert_eq!(cell(&t.rows()[0], idx), "[1, 2, 3]");
    }
}
