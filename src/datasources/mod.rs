//! # Coordinate data sources
//!
//! A [`DataSource`] describes where the coordinates of one role (source or target)
//! come from. It is deserialized from the pipeline configuration through the `type`
//! tag and turned into a [`CoordinateSet`] by [`DataSource::load`].
//!
//! | `type` | Reader | Notes |
//! |---|---|---|
//! | `csv` | [`csv_reader`] | configurable column order, optional header row |
//! | `bernese_crd` | [`bernese_crd`] | epoch from the file header, flag filtering |
//! | `inline` | – | records written directly in the configuration |
//!
//! Every variant carries the common [`DataSourceOverrides`] (flattened in the
//! configuration), which are applied to the raw records before they are handed
//! to the pipeline.
//!
//! Relative file names are resolved against the directory passed to
//! [`DataSource::load`], normally the directory of the configuration file.
pub mod bernese_crd;
pub mod csv_reader;

use std::path::{Path, PathBuf};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{DecimalYear, StationId},
    coordinates::{overrides::DataSourceOverrides, CoordinateRecord, CoordinateSet},
    framefit_errors::FrameFitError,
};

pub use bernese_crd::BerneseCrdDataSource;
pub use csv_reader::{CsvColumn, CsvDataSource};

fn default_weight() -> f64 {
    1.0
}

/// One coordinate written directly in a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineCoordinate {
    pub station: StationId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub sx: f64,
    #[serde(default)]
    pub sy: f64,
    #[serde(default)]
    pub sz: f64,
    #[serde(default = "default_weight")]
    pub w: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<DecimalYear>,
}

/// Coordinates listed in the configuration itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InlineDataSource {
    pub coordinates: Vec<InlineCoordinate>,
    #[serde(flatten)]
    pub common: DataSourceOverrides,
}

impl InlineDataSource {
    fn read(&self) -> Result<Vec<CoordinateRecord>, FrameFitError> {
        self.coordinates
            .iter()
            .map(|c| {
                CoordinateRecord::new(
                    c.station.as_str(),
                    Vector3::new(c.x, c.y, c.z),
                    Vector3::new(c.sx, c.sy, c.sz),
                    c.w,
                    c.t,
                )
            })
            .collect()
    }
}

/// Descriptor of a coordinate source, selected by its `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSource {
    Csv(CsvDataSource),
    BerneseCrd(BerneseCrdDataSource),
    Inline(InlineDataSource),
}

impl DataSource {
    pub fn kind(&self) -> &'static str {
        match self {
            DataSource::Csv(_) => "csv",
            DataSource::BerneseCrd(_) => "bernese_crd",
            DataSource::Inline(_) => "inline",
        }
    }

    /// Overrides shared by every variant.
    pub fn overrides(&self) -> &DataSourceOverrides {
        match self {
            DataSource::Csv(src) => &src.common,
            DataSource::BerneseCrd(src) => &src.common,
            DataSource::Inline(src) => &src.common,
        }
    }

    /// Read the raw records, apply the overrides and return the resulting set.
    ///
    /// Arguments
    /// -----------------
    /// * `base_dir`: directory used to resolve relative file names, `None` for the
    ///   current working directory.
    ///
    /// Return
    /// ----------
    /// * The [`CoordinateSet`], sorted by station name.
    ///
    /// Errors
    /// ----------
    /// * `FrameFitError::IoError` / `FrameFitError::CsvError` on unreadable files.
    /// * `FrameFitError::Configuration` on malformed content, duplicated stations or
    ///   invalid override values.
    pub fn load(&self, base_dir: Option<&Path>) -> Result<CoordinateSet, FrameFitError> {
        let records = match self {
            DataSource::Csv(src) => src.read(&resolve_path(&src.filename, base_dir))?,
            DataSource::BerneseCrd(src) => src.read(&resolve_path(&src.filename, base_dir))?,
            DataSource::Inline(src) => src.read()?,
        };

        tracing::info!(
            "{} data source {}: {} coordinates",
            self.kind(),
            self.overrides().name.as_deref().unwrap_or("<unnamed>"),
            records.len()
        );

        self.overrides().apply(records)
    }
}

fn resolve_path(filename: &Path, base_dir: Option<&Path>) -> PathBuf {
    match base_dir {
        Some(dir) if filename.is_relative() => dir.join(filename),
        _ => filename.to_path_buf(),
    }
}
