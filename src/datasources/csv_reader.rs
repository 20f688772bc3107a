//! # Generic CSV coordinate reader
//!
//! Each row holds one station:
//!
//! ```text
//! station, t, x, y, z, sx, sy, sz[, weight]
//! ```
//!
//! where `t` is the epoch as a decimal year, `(x, y, z)` the coordinates and
//! `(sx, sy, sz)` their standard deviations. `weight` is optional and defaults to
//! `1.0` when the column is absent or the cell is empty.
//!
//! The column order can be changed with [`CsvDataSource::columns`]; extra columns
//! are ignored with [`CsvColumn::Skip`]. A first row in which none of the `x`, `y`,
//! `z` cells is a number is treated as a header and skipped; any other unparsable
//! row is an error. Lines starting with `#` are comments.
use std::path::{Path, PathBuf};

use itertools::Itertools;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::{
    coordinates::{overrides::DataSourceOverrides, CoordinateRecord},
    framefit_errors::FrameFitError,
};

/// Meaning of a CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsvColumn {
    Skip,
    Station,
    T,
    X,
    Y,
    Z,
    Sx,
    Sy,
    Sz,
    Weight,
}

const REQUIRED_COLUMNS: [CsvColumn; 8] = [
    CsvColumn::Station,
    CsvColumn::T,
    CsvColumn::X,
    CsvColumn::Y,
    CsvColumn::Z,
    CsvColumn::Sx,
    CsvColumn::Sy,
    CsvColumn::Sz,
];

fn default_columns() -> Vec<CsvColumn> {
    let mut columns = REQUIRED_COLUMNS.to_vec();
    columns.push(CsvColumn::Weight);
    columns
}

fn default_delimiter() -> char {
    ','
}

/// CSV file descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvDataSource {
    pub filename: PathBuf,
    #[serde(default = "default_columns")]
    pub columns: Vec<CsvColumn>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(flatten)]
    pub common: DataSourceOverrides,
}

impl CsvDataSource {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        CsvDataSource {
            filename: filename.into(),
            columns: default_columns(),
            delimiter: default_delimiter(),
            common: DataSourceOverrides::default(),
        }
    }

    /// Position of every column kind, `None` for absent optional columns.
    fn column_layout(&self) -> Result<ColumnLayout, FrameFitError> {
        if let Some(missing) = REQUIRED_COLUMNS.iter().find(|c| !self.columns.contains(c)) {
            return Err(FrameFitError::Configuration(format!(
                "CSV data source is missing column '{missing:?}'"
            )));
        }
        if let Some(dup) = self
            .columns
            .iter()
            .filter(|c| **c != CsvColumn::Skip)
            .duplicates()
            .next()
        {
            return Err(FrameFitError::Configuration(format!(
                "CSV column '{dup:?}' given more than once"
            )));
        }

        let position = |kind: CsvColumn| self.columns.iter().position(|c| *c == kind);
        let required = |kind: CsvColumn| position(kind).unwrap_or_default();
        Ok(ColumnLayout {
            station: required(CsvColumn::Station),
            t: required(CsvColumn::T),
            xyz: [
                required(CsvColumn::X),
                required(CsvColumn::Y),
                required(CsvColumn::Z),
            ],
            sigma: [
                required(CsvColumn::Sx),
                required(CsvColumn::Sy),
                required(CsvColumn::Sz),
            ],
            weight: position(CsvColumn::Weight),
        })
    }

    /// Read the raw records of the file at `path`.
    ///
    /// Errors
    /// ----------
    /// * `FrameFitError::IoError` / `FrameFitError::CsvError` when the file cannot be read.
    /// * `FrameFitError::Configuration` on an invalid column layout or a malformed row.
    pub fn read(&self, path: &Path) -> Result<Vec<CoordinateRecord>, FrameFitError> {
        let layout = self.column_layout()?;
        let delimiter = u8::try_from(self.delimiter).map_err(|_| {
            FrameFitError::Configuration(format!(
                "CSV delimiter '{}' is not a single byte",
                self.delimiter
            ))
        })?;

        let file = std::fs::File::open(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(delimiter)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(file);

        let mut records = Vec::new();
        for (idx, row) in reader.records().enumerate() {
            let row = row?;
            let line = row.position().map_or(idx as u64 + 1, |p| p.line());

            if idx == 0 && is_header(&row, &layout) {
                tracing::debug!("{}: skipping header row", path.display());
                continue;
            }

            let record = layout.parse(&row).map_err(|msg| {
                FrameFitError::Configuration(format!("{}:{line}: {msg}", path.display()))
            })?;
            records.push(record);
        }

        Ok(records)
    }
}

struct ColumnLayout {
    station: usize,
    t: usize,
    xyz: [usize; 3],
    sigma: [usize; 3],
    weight: Option<usize>,
}

fn is_header(row: &csv::StringRecord, layout: &ColumnLayout) -> bool {
    layout
        .xyz
        .iter()
        .all(|&idx| row.get(idx).map_or(true, |cell| cell.parse::<f64>().is_err()))
}

impl ColumnLayout {
    fn parse(&self, row: &csv::StringRecord) -> Result<CoordinateRecord, String> {
        let cell = |idx: usize| {
            row.get(idx)
                .ok_or_else(|| format!("expected at least {} fields, found {}", idx + 1, row.len()))
        };
        let number = |idx: usize| -> Result<f64, String> {
            let text = cell(idx)?;
            text.parse::<f64>()
                .map_err(|_| format!("'{text}' is not a number"))
        };

        let station = cell(self.station)?;
        let t = match cell(self.t)? {
            "" => None,
            _ => Some(number(self.t)?),
        };
        let position = Vector3::new(
            number(self.xyz[0])?,
            number(self.xyz[1])?,
            number(self.xyz[2])?,
        );
        let sigma = Vector3::new(
            number(self.sigma[0])?,
            number(self.sigma[1])?,
            number(self.sigma[2])?,
        );
        let weight = match self.weight {
            Some(idx) if row.get(idx).is_some_and(|c| !c.is_empty()) => number(idx)?,
            _ => 1.0,
        };

        CoordinateRecord::new(station, position, sigma, weight, t).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod csv_reader_test {
    use std::io::Write;

    use approx::assert_abs_diff_eq;
    use tempfile::NamedTempFile;

    use super::*;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_read_with_header() {
        let file = write_csv(
            "station,t,x,y,z,sx,sy,sz,weight\n\
             BUDP,2020.5,3513638.1,778956.2,5248216.4,0.001,0.002,0.003,0.8\n\
             ONSA,2020.5,3370658.5,711877.1,5349786.9,0.001,0.001,0.001,\n",
        );
        let records = CsvDataSource::new(file.path()).read(file.path()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].station, "BUDP");
        assert_eq!(records[0].epoch, Some(2020.5));
        assert_abs_diff_eq!(records[0].position.z, 5248216.4);
        assert_abs_diff_eq!(records[0].uncertainty.y, 0.002);
        assert_eq!(records[0].weight, 0.8);
        assert_eq!(records[1].weight, 1.0);
    }

    #[test]
    fn test_read_without_header_and_custom_columns() {
        let file = write_csv(
            "# comment line\n\
             1; BUDP; 3513638.1; 778956.2; 5248216.4; 0.01; 0.01; 0.02; 2021.0\n",
        );
        let source = CsvDataSource {
            columns: vec![
                CsvColumn::Skip,
                CsvColumn::Station,
                CsvColumn::X,
                CsvColumn::Y,
                CsvColumn::Z,
                CsvColumn::Sx,
                CsvColumn::Sy,
                CsvColumn::Sz,
                CsvColumn::T,
            ],
            delimiter: ';',
            ..CsvDataSource::new(file.path())
        };
        let records = source.read(file.path()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].station, "BUDP");
        assert_eq!(records[0].epoch, Some(2021.0));
        assert_eq!(records[0].weight, 1.0);
        assert_abs_diff_eq!(records[0].uncertainty.z, 0.02);
    }

    #[test]
    fn test_missing_column_configuration() {
        let source = CsvDataSource {
            columns: vec![CsvColumn::Station, CsvColumn::X, CsvColumn::Y, CsvColumn::Z],
            ..CsvDataSource::new("unused.csv")
        };
        let err = source.read(Path::new("unused.csv")).unwrap_err();
        assert!(matches!(err, FrameFitError::Configuration(_)));

        let mut columns = default_columns();
        columns.push(CsvColumn::X);
        let source = CsvDataSource {
            columns,
            ..CsvDataSource::new("unused.csv")
        };
        assert!(matches!(
            source.read(Path::new("unused.csv")).unwrap_err(),
            FrameFitError::Configuration(_)
        ));
    }

    #[test]
    fn test_malformed_rows() {
        let file = write_csv(
            "BUDP,2020.5,3513638.1,778956.2,5248216.4,0.001,0.002,0.003\n\
             ONSA,2020.5,3370658.5,abc,5349786.9,0.001,0.001,0.001\n",
        );
        let err = CsvDataSource::new(file.path())
            .read(file.path())
            .unwrap_err();
        let FrameFitError::Configuration(msg) = err else {
            panic!("configuration error expected")
        };
        assert!(msg.contains(":2:"), "{msg}");
        assert!(msg.contains("abc"), "{msg}");

        let file = write_csv("BUDP,2020.5,3513638.1\n");
        assert!(CsvDataSource::new(file.path()).read(file.path()).is_err());
    }

    #[test]
    fn test_malformed_first_row_is_not_a_header() {
        let file = write_csv(
            "BUDP,2020.5,35136x8.1,778956.2,5248216.4,0.001,0.002,0.003\n\
             ONSA,2020.5,3370658.5,711877.1,5349786.9,0.001,0.001,0.001\n",
        );
        let err = CsvDataSource::new(file.path())
            .read(file.path())
            .unwrap_err();
        let FrameFitError::Configuration(msg) = err else {
            panic!("configuration error expected")
        };
        assert!(msg.contains(":1:"), "{msg}");
        assert!(msg.contains("35136x8.1"), "{msg}");
    }

    #[test]
    fn test_missing_file() {
        let err = CsvDataSource::new("does/not/exist.csv")
            .read(Path::new("does/not/exist.csv"))
            .unwrap_err();
        assert!(matches!(err, FrameFitError::IoError(_)));
    }

    #[test]
    fn test_columns_from_json() {
        let source: CsvDataSource = serde_json::from_str(
            r#"{"filename": "a.csv", "columns": ["station", "skip", "t", "x", "y", "z", "sx", "sy", "sz"]}"#,
        )
        .unwrap();
        assert_eq!(source.columns[1], CsvColumn::Skip);
        assert_eq!(source.delimiter, ',');
    }
}
