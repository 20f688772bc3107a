//! # Bernese CRD reader
//!
//! Station coordinate files written by the Bernese GNSS software have a loosely
//! structured layout: a header carrying the coordinate epoch, a table of stations
//! and sometimes a footer. Typical table lines are
//!
//! ```text
//!   2  BUDD 10101S001    3513649.04104   778955.02287  5248202.12784    A
//!   2  BUDD 10101S001    3513649.04138   778955.02303  5248202.12838    A      GRE
//!   5  ESBH 10115M002    3585278.72001   531971.41288  5230646.6845
//! 920  KELY              1575559.29890 -1941827.91620  5848076.48160    A
//! ```
//!
//! The epoch is read from columns 47 to 66 of the first header line holding a
//! `YYYY-MM-DD hh:mm:ss` timestamp there, and converted to a decimal year. Any line
//! that does not parse as a coordinate is skipped.
//!
//! CRD files hold neither uncertainties nor weights, so a file-wide standard
//! deviation and weight are taken from the descriptor.
use std::path::{Path, PathBuf};

use hifitime::Epoch;
use nalgebra::Vector3;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{DecimalYear, StationId},
    coordinates::{overrides::DataSourceOverrides, CoordinateRecord},
    framefit_errors::FrameFitError,
};

const EPOCH_COLUMNS: std::ops::Range<usize> = 47..66;
const EPOCH_PATTERN: &str = r"^(\d{4})-(\d{2})-(\d{2}) (\d{2}):(\d{2}):(\d{2})$";

fn default_weight() -> f64 {
    1.0
}

/// Bernese CRD file descriptor.
///
/// Fields
/// -----------------
/// * `filename` – path of the CRD file.
/// * `stddev` – standard deviation given to every coordinate component (default `0`).
/// * `weight` – weight given to every station (default `1`).
/// * `discard_flags` – stations carrying one of these flags are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BerneseCrdDataSource {
    pub filename: PathBuf,
    #[serde(default)]
    pub stddev: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discard_flags: Vec<String>,
    #[serde(flatten)]
    pub common: DataSourceOverrides,
}

/// One station line of a CRD file.
#[derive(Debug, Clone, PartialEq)]
pub struct CrdLine {
    pub station: StationId,
    pub flag: Option<String>,
    pub position: Vector3<f64>,
}

/// Parse a CRD table line, `None` for anything that is not a station line.
pub fn parse_crd_line(line: &str) -> Option<CrdLine> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let is_number = |s: &str| s.parse::<f64>().is_ok();

    // station, optional DOMES number, x y z, optional flag, optional trailing field
    let (station, xyz, flag) = match fields.as_slice() {
        [_, station, x, y, z] => (station, [x, y, z], None),
        [_, station, x, y, z, flag] if is_number(*x) => (station, [x, y, z], Some(flag)),
        [_, station, _, x, y, z] => (station, [x, y, z], None),
        [_, station, _, x, y, z, flag] => (station, [x, y, z], Some(flag)),
        [_, station, _, x, y, z, flag, _] => (station, [x, y, z], Some(flag)),
        _ => return None,
    };

    let mut position = Vector3::zeros();
    for (i, value) in xyz.iter().enumerate() {
        position[i] = value.parse::<f64>().ok()?;
    }

    Some(CrdLine {
        station: station.to_string(),
        flag: flag.map(|f| f.to_string()),
        position,
    })
}

/// Decimal year of a UTC calendar date.
pub fn decimal_year(
    year: i32,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
) -> Result<DecimalYear, FrameFitError> {
    let to_config = |e: hifitime::HifitimeError| FrameFitError::Configuration(e.to_string());

    let epoch = Epoch::maybe_from_gregorian_utc(year, month, day, hour, minute, second, 0)
        .map_err(to_config)?;
    let start = Epoch::maybe_from_gregorian_utc(year, 1, 1, 0, 0, 0, 0).map_err(to_config)?;
    let end = Epoch::maybe_from_gregorian_utc(year + 1, 1, 1, 0, 0, 0, 0).map_err(to_config)?;

    Ok(year as f64 + (epoch - start).to_seconds() / (end - start).to_seconds())
}

fn parse_header_epoch(line: &str, pattern: &Regex) -> Option<DecimalYear> {
    let text = line.get(EPOCH_COLUMNS)?;
    let caps = pattern.captures(text)?;
    let field = |i: usize| caps[i].parse::<u8>().ok();

    decimal_year(
        caps[1].parse().ok()?,
        field(2)?,
        field(3)?,
        field(4)?,
        field(5)?,
        field(6)?,
    )
    .ok()
}

impl BerneseCrdDataSource {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        BerneseCrdDataSource {
            filename: filename.into(),
            stddev: 0.0,
            weight: default_weight(),
            discard_flags: Vec::new(),
            common: DataSourceOverrides::default(),
        }
    }

    /// Read the raw records of the file at `path`.
    pub fn read(&self, path: &Path) -> Result<Vec<CoordinateRecord>, FrameFitError> {
        let content = std::fs::read_to_string(path)?;
        self.parse(&content)
    }

    /// Parse the content of a CRD file.
    pub fn parse(&self, content: &str) -> Result<Vec<CoordinateRecord>, FrameFitError> {
        let pattern =
            Regex::new(EPOCH_PATTERN).map_err(|e| FrameFitError::Configuration(e.to_string()))?;

        let mut epoch = None;
        let mut records = Vec::new();
        for line in content.lines() {
            if epoch.is_none() {
                epoch = parse_header_epoch(line, &pattern);
                if epoch.is_some() {
                    continue;
                }
            }

            let Some(crd) = parse_crd_line(line) else {
                continue;
            };
            if crd
                .flag
                .as_ref()
                .is_some_and(|f| self.discard_flags.contains(f))
            {
                tracing::debug!("discarding {} (flag {:?})", crd.station, crd.flag);
                continue;
            }

            records.push(CoordinateRecord::new(
                crd.station,
                crd.position,
                Vector3::repeat(self.stddev),
                self.weight,
                epoch,
            )?);
        }

        if epoch.is_none() {
            tracing::warn!("no epoch found in CRD header, coordinates carry no epoch");
        }

        Ok(records)
    }
}
