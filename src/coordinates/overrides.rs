//! # Coordinate overrides and set aggregation
//!
//! Readers produce raw station records. Before those records take part in a
//! pipeline two kinds of user overrides may be applied:
//!
//! * **Whole-set overrides** ([`DataSourceOverrides`] fields `sx`, `sy`, `sz`, `w`, `t`)
//!   replace the corresponding value on every record of the set.
//! * **Per-station overrides** ([`CoordinateOverrides`], keyed by the station name
//!   *as read from the source*) replace any field of a single record, including the
//!   station name itself.
//!
//! Whole-set values are applied first, per-station values second, so a per-station
//! value always takes precedence.
//!
//! Several sets of the same [`Role`] are then merged by [`aggregate`]. When the
//! same station appears in more than one input set, **the later set wins**: its
//! record replaces the earlier one at the earlier position.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::{CoordinateRecord, CoordinateSet};
use crate::{constants::StationId, framefit_errors::FrameFitError};

/// The role a coordinate set plays in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Target,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => write!(f, "source"),
            Role::Target => write!(f, "target"),
        }
    }
}

/// Per-station replacement values. Unset fields leave the record untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinateOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<StationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<f64>,
}

impl CoordinateOverrides {
    fn apply(&self, record: &mut CoordinateRecord) {
        if let Some(station) = &self.station {
            record.station = station.clone();
        }
        if let Some(x) = self.x {
            record.position.x = x;
        }
        if let Some(y) = self.y {
            record.position.y = y;
        }
        if let Some(z) = self.z {
            record.position.z = z;
        }
        if let Some(sx) = self.sx {
            record.uncertainty.x = sx;
        }
        if let Some(sy) = self.sy {
            record.uncertainty.y = sy;
        }
        if let Some(sz) = self.sz {
            record.uncertainty.z = sz;
        }
        if let Some(w) = self.w {
            record.weight = w;
        }
        if let Some(t) = self.t {
            record.epoch = Some(t);
        }
    }
}

/// Overrides shared by every data source descriptor.
///
/// Fields
/// -----------------
/// * `name` – optional label given to the resulting [`CoordinateSet`].
/// * `sx`, `sy`, `sz`, `w`, `t` – whole-set replacement values.
/// * `overrides` – per-station replacement values keyed by the original station name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSourceOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<StationId, CoordinateOverrides>,
}

impl DataSourceOverrides {
    /// Apply these overrides to the raw output of a reader.
    ///
    /// Arguments
    /// -----------------
    /// * `records`: station records exactly as produced by the reader.
    ///
    /// Return
    /// ----------
    /// * A [`CoordinateSet`] named after `self.name`, sorted by station.
    ///
    /// Errors
    /// ----------
    /// * `FrameFitError::Configuration` if the raw records contain the same station
    ///   twice, if a rename produces a duplicate, or if an overridden value breaks a
    ///   record invariant (e.g. a weight outside `[0, 1]`).
    pub fn apply(&self, records: Vec<CoordinateRecord>) -> Result<CoordinateSet, FrameFitError> {
        let label = self.name.as_deref().unwrap_or("<unnamed>");

        let mut seen = HashSet::with_capacity(records.len());
        if let Some(dup) = records.iter().find(|r| !seen.insert(r.station.as_str())) {
            return Err(FrameFitError::Configuration(format!(
                "station '{}' appears more than once in data source {label}",
                dup.station
            )));
        }

        for station in self.overrides.keys() {
            if !seen.contains(station.as_str()) {
                tracing::warn!("override for unknown station '{station}' in data source {label}");
            }
        }

        let mut records = records;
        for record in records.iter_mut() {
            if let Some(sx) = self.sx {
                record.uncertainty.x = sx;
            }
            if let Some(sy) = self.sy {
                record.uncertainty.y = sy;
            }
            if let Some(sz) = self.sz {
                record.uncertainty.z = sz;
            }
            if let Some(w) = self.w {
                record.weight = w;
            }
            if let Some(t) = self.t {
                record.epoch = Some(t);
            }

            // keyed on the name as read, before any rename
            if let Some(station_overrides) = self.overrides.get(&record.station) {
                station_overrides.apply(record);
            }
        }

        let mut set = CoordinateSet::new(self.name.clone(), records)?;
        set.sort_by_station();
        Ok(set)
    }
}

/// Merge coordinate sets of the same role into one.
///
/// Records are concatenated in input order. When a station identifier occurs in more
/// than one set, the record of the later set replaces the earlier record in place.
///
/// Arguments
/// -----------------
/// * `role`: the role of the sets, used in diagnostics.
/// * `sets`: the sets to merge, in precedence order (last wins).
///
/// Return
/// ----------
/// * The merged [`CoordinateSet`]. A single input set is returned unchanged.
///
/// Errors
/// ----------
/// * `FrameFitError::Configuration` if `sets` is empty.
pub fn aggregate(role: Role, sets: Vec<CoordinateSet>) -> Result<CoordinateSet, FrameFitError> {
    if sets.is_empty() {
        return Err(FrameFitError::Configuration(format!(
            "at least one {role} data source is required"
        )));
    }
    if sets.len() == 1 {
        return Ok(sets.into_iter().next().unwrap_or_default());
    }

    let names: Vec<String> = sets.iter().filter_map(|s| s.name().map(String::from)).collect();
    let name = if names.is_empty() {
        None
    } else {
        Some(names.iter().join("+"))
    };

    let mut merged: Vec<CoordinateRecord> = Vec::new();
    let mut position: HashMap<StationId, usize> = HashMap::new();
    for set in sets {
        let (_, records) = set.into_parts();
        for record in records {
            match position.get(&record.station) {
                Some(&idx) => {
                    tracing::debug!(
                        "{role} station '{}' overridden by a later data source",
                        record.station
                    );
                    merged[idx] = record;
                }
                None => {
                    position.insert(record.station.clone(), merged.len());
                    merged.push(record);
                }
            }
        }
    }

    CoordinateSet::new(name, merged)
}

#[cfg(test)]
mod overrides_test {
    use nalgebra::Vector3;

    use super::*;

    fn raw(station: &str, x: f64) -> CoordinateRecord {
        CoordinateRecord::new(
            station,
            Vector3::new(x, 0.0, 0.0),
            Vector3::new(0.01, 0.01, 0.01),
            1.0,
            Some(2010.0),
        )
        .unwrap()
    }

    #[test]
    fn test_whole_set_overrides() {
        let overrides = DataSourceOverrides {
            sx: Some(0.5),
            w: Some(0.25),
            t: Some(2024.5),
            ..Default::default()
        };
        let set = overrides.apply(vec![raw("B", 1.0), raw("A", 2.0)]).unwrap();

        assert_eq!(set.stations(), vec!["A", "B"]);
        for r in &set {
            assert_eq!(r.uncertainty.x, 0.5);
            assert_eq!(r.uncertainty.y, 0.01);
            assert_eq!(r.weight, 0.25);
            assert_eq!(r.epoch, Some(2024.5));
        }
    }

    #[test]
    fn test_station_overrides_take_precedence_and_rename() {
        let mut per_station = BTreeMap::new();
        per_station.insert(
            "A".to_string(),
            CoordinateOverrides {
                station: Some("Z".into()),
                x: Some(42.0),
                w: Some(0.0),
                ..Default::default()
            },
        );
        let overrides = DataSourceOverrides {
            name: Some("src".into()),
            w: Some(0.5),
            overrides: per_station,
            ..Default::default()
        };

        let set = overrides.apply(vec![raw("A", 1.0), raw("B", 2.0)]).unwrap();
        assert_eq!(set.name(), Some("src"));
        assert_eq!(set.stations(), vec!["B", "Z"]);
        let z = set.get("Z").unwrap();
        assert_eq!(z.position.x, 42.0);
        assert_eq!(z.weight, 0.0);
        assert_eq!(set.get("B").unwrap().weight, 0.5);
    }

    #[test]
    fn test_duplicates_within_reader_rejected() {
        let err = DataSourceOverrides::default()
            .apply(vec![raw("A", 1.0), raw("A", 2.0)])
            .unwrap_err();
        assert!(matches!(err, FrameFitError::Configuration(_)));

        let mut per_station = BTreeMap::new();
        per_station.insert(
            "A".to_string(),
            CoordinateOverrides {
                station: Some("B".into()),
                ..Default::default()
            },
        );
        let renamed = DataSourceOverrides {
            overrides: per_station,
            ..Default::default()
        }
        .apply(vec![raw("A", 1.0), raw("B", 2.0)]);
        assert!(renamed.is_err());
    }

    #[test]
    fn test_invalid_override_value() {
        let overrides = DataSourceOverrides {
            w: Some(3.0),
            ..Default::default()
        };
        assert!(overrides.apply(vec![raw("A", 1.0)]).is_err());
    }

    #[test]
    fn test_aggregate_disjoint_and_shared() {
        let a = CoordinateSet::new(Some("a".into()), vec![raw("A", 1.0), raw("B", 2.0)]).unwrap();
        let b = CoordinateSet::new(Some("b".into()), vec![raw("C", 3.0)]).unwrap();
        let merged = aggregate(Role::Source, vec![a.clone(), b]).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.name(), Some("a+b"));

        let c = CoordinateSet::new(None, vec![raw("B", 20.0), raw("D", 4.0)]).unwrap();
        let merged = aggregate(Role::Source, vec![a, c]).unwrap();
        assert_eq!(merged.stations(), vec!["A", "B", "D"]);
        assert_eq!(merged.get("B").unwrap().position.x, 20.0);
    }

    #[test]
    fn test_aggregate_requires_input() {
        let err = aggregate(Role::Target, vec![]).unwrap_err();
        assert_eq!(
            err,
            FrameFitError::Configuration("at least one target data source is required".into())
        );
    }
}
