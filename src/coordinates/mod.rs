//! # Station coordinates
//!
//! Standardized in-memory representation of observed station coordinates:
//!
//! * [`CoordinateRecord`] – one station: position, per-axis standard deviation,
//!   weight in `[0, 1]` and an optional epoch (decimal year).
//! * [`CoordinateSet`] – an ordered collection of records with unique station names,
//!   exposing the N×3 [`CoordinateMatrix`] and weight vector consumed by operators.
//! * [`StationPairing`] – the station-wise intersection of a source and a target set,
//!   used to build least-squares observations.
//!
//! Merging several sets of the same role (and the per-reader overrides applied
//! before merging) lives in [`overrides`].
pub mod overrides;

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use nalgebra::{DVector, Vector3};

use crate::{
    constants::{CoordinateMatrix, DecimalYear, StationId, EPOCH_RANGE},
    framefit_errors::FrameFitError,
};

/// A single observed station coordinate.
///
/// Fields
/// -----------------
/// * `station` – station identifier, unique within a [`CoordinateSet`].
/// * `position` – cartesian (or geodetic, depending on the frame) coordinate triplet.
/// * `uncertainty` – standard deviations `(sx, sy, sz)`, non-negative.
/// * `weight` – station weight in `[0, 1]`. A weight of `0` keeps the station in the
///   set but excludes it from parameter estimation.
/// * `epoch` – observation epoch as a decimal year, if known.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateRecord {
    pub station: StationId,
    pub position: Vector3<f64>,
    pub uncertainty: Vector3<f64>,
    pub weight: f64,
    pub epoch: Option<DecimalYear>,
}

impl CoordinateRecord {
    /// Create a validated coordinate record.
    ///
    /// Arguments
    /// -----------------
    /// * `station`: the station identifier (non-empty).
    /// * `position`: coordinate triplet.
    /// * `uncertainty`: per-axis standard deviations (≥ 0).
    /// * `weight`: station weight (in `[0, 1]`).
    /// * `epoch`: optional decimal-year epoch (in `[0, 10000]`).
    ///
    /// Return
    /// ----------
    /// * `Ok(CoordinateRecord)` when every invariant holds,
    /// * `Err(FrameFitError::Configuration)` otherwise.
    pub fn new(
        station: impl Into<StationId>,
        position: Vector3<f64>,
        uncertainty: Vector3<f64>,
        weight: f64,
        epoch: Option<DecimalYear>,
    ) -> Result<Self, FrameFitError> {
        let record = CoordinateRecord {
            station: station.into(),
            position,
            uncertainty,
            weight,
            epoch,
        };
        record.validate()?;
        Ok(record)
    }

    /// Check the record invariants.
    pub fn validate(&self) -> Result<(), FrameFitError> {
        let invalid = |what: &str| {
            Err(FrameFitError::Configuration(format!(
                "station '{}': {what}",
                self.station
            )))
        };

        if self.station.trim().is_empty() {
            return Err(FrameFitError::Configuration(
                "station identifier must not be empty".into(),
            ));
        }
        if self.position.iter().any(|v| !v.is_finite()) {
            return invalid("position must be finite");
        }
        if self
            .uncertainty
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return invalid("uncertainties must be finite and non-negative");
        }
        if !(0.0..=1.0).contains(&self.weight) {
            return invalid("weight must lie in [0, 1]");
        }
        if let Some(t) = self.epoch {
            if !EPOCH_RANGE.contains(&t) {
                return invalid("epoch must lie in [0, 10000]");
            }
        }
        Ok(())
    }
}

impl fmt::Display for CoordinateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.4}, {:.4}, {:.4}) ± ({:.4}, {:.4}, {:.4}) w={:.2}",
            self.station,
            self.position.x,
            self.position.y,
            self.position.z,
            self.uncertainty.x,
            self.uncertainty.y,
            self.uncertainty.z,
            self.weight
        )?;
        if let Some(t) = self.epoch {
            write!(f, " t={t:.4}")?;
        }
        Ok(())
    }
}

/// Build a [`CoordinateMatrix`] from row triplets.
pub fn matrix_from_rows(rows: &[[f64; 3]]) -> CoordinateMatrix {
    CoordinateMatrix::from_fn(rows.len(), |i, j| rows[i][j])
}

/// An ordered set of station coordinates expressed in a single reference frame.
///
/// Station identifiers are unique inside a set; insertion order is kept for display.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoordinateSet {
    name: Option<String>,
    records: Vec<CoordinateRecord>,
}

impl CoordinateSet {
    /// Build a set from records, rejecting invalid records and duplicate stations.
    pub fn new(name: Option<String>, records: Vec<CoordinateRecord>) -> Result<Self, FrameFitError> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());
        for record in &records {
            record.validate()?;
            if !seen.insert(record.station.as_str()) {
                return Err(FrameFitError::Configuration(format!(
                    "duplicate station '{}' in coordinate set {}",
                    record.station,
                    name.as_deref().unwrap_or("<unnamed>")
                )));
            }
        }
        Ok(CoordinateSet { name, records })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn records(&self) -> &[CoordinateRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CoordinateRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, station: &str) -> Option<&CoordinateRecord> {
        self.records.iter().find(|r| r.station == station)
    }

    pub fn stations(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.station.as_str()).collect()
    }

    /// Coordinates as an N×3 matrix, rows in station order.
    pub fn coordinate_matrix(&self) -> CoordinateMatrix {
        CoordinateMatrix::from_fn(self.records.len(), |i, j| self.records[i].position[j])
    }

    /// Station weights, same order as [`CoordinateSet::coordinate_matrix`].
    pub fn weight_vector(&self) -> DVector<f64> {
        DVector::from_iterator(self.records.len(), self.records.iter().map(|r| r.weight))
    }

    /// Create a copy of this set with positions replaced by the rows of `coordinates`.
    ///
    /// Station names, uncertainties, weights and epochs are carried over unchanged.
    ///
    /// Return
    /// ----------
    /// * `Err(FrameFitError::Configuration)` if the row count differs from the set size.
    pub fn with_coordinates(&self, coordinates: &CoordinateMatrix) -> Result<Self, FrameFitError> {
        if coordinates.nrows() != self.records.len() {
            return Err(FrameFitError::Configuration(format!(
                "cannot update {} coordinates from a matrix with {} rows",
                self.records.len(),
                coordinates.nrows()
            )));
        }

        let records = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| CoordinateRecord {
                position: coordinates.row(i).transpose(),
                ..r.clone()
            })
            .collect();

        Ok(CoordinateSet {
            name: self.name.clone(),
            records,
        })
    }

    /// Restrict the set to the given stations, keeping the current order.
    pub fn limit_to_stations(&self, stations: &[&str]) -> Self {
        CoordinateSet {
            name: self.name.clone(),
            records: self
                .records
                .iter()
                .filter(|r| stations.contains(&r.station.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub(crate) fn sort_by_station(&mut self) {
        self.records.sort_by(|a, b| a.station.cmp(&b.station));
    }

    pub(crate) fn into_parts(self) -> (Option<String>, Vec<CoordinateRecord>) {
        (self.name, self.records)
    }
}

impl<'a> IntoIterator for &'a CoordinateSet {
    type Item = &'a CoordinateRecord;
    type IntoIter = std::slice::Iter<'a, CoordinateRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Station-wise correspondence between a source and a target [`CoordinateSet`].
///
/// Pairs are ordered as in the source set. The weight of a pair is the product of the
/// source and target station weights, so a zero weight on either side removes the
/// station from estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct StationPairing {
    stations: Vec<StationId>,
    source_rows: Vec<usize>,
    source: CoordinateMatrix,
    target: CoordinateMatrix,
    weights: DVector<f64>,
}

impl StationPairing {
    /// Pair `source` and `target` by station identifier.
    pub fn new(source: &CoordinateSet, target: &CoordinateSet) -> Self {
        let target_index: HashMap<&str, &CoordinateRecord> = target
            .iter()
            .map(|r| (r.station.as_str(), r))
            .collect();

        let pairs: Vec<(usize, &CoordinateRecord, &CoordinateRecord)> = source
            .iter()
            .enumerate()
            .filter_map(|(i, s)| target_index.get(s.station.as_str()).map(|t| (i, s, *t)))
            .collect();

        let n = pairs.len();
        StationPairing {
            stations: pairs.iter().map(|(_, s, _)| s.station.clone()).collect(),
            source_rows: pairs.iter().map(|(i, _, _)| *i).collect(),
            source: CoordinateMatrix::from_fn(n, |i, j| pairs[i].1.position[j]),
            target: CoordinateMatrix::from_fn(n, |i, j| pairs[i].2.position[j]),
            weights: DVector::from_iterator(n, pairs.iter().map(|(_, s, t)| s.weight * t.weight)),
        }
    }

    /// Keep only pairs whose combined weight is strictly positive.
    pub fn active(&self) -> Self {
        let keep: Vec<usize> = (0..self.len()).filter(|&i| self.weights[i] > 0.0).collect();
        let n = keep.len();
        StationPairing {
            stations: keep.iter().map(|&i| self.stations[i].clone()).collect(),
            source_rows: keep.iter().map(|&i| self.source_rows[i]).collect(),
            source: CoordinateMatrix::from_fn(n, |r, c| self.source[(keep[r], c)]),
            target: CoordinateMatrix::from_fn(n, |r, c| self.target[(keep[r], c)]),
            weights: DVector::from_iterator(n, keep.iter().map(|&i| self.weights[i])),
        }
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn stations(&self) -> &[StationId] {
        &self.stations
    }

    /// Row index in the source set of each pair.
    pub fn source_rows(&self) -> &[usize] {
        &self.source_rows
    }

    pub fn source_matrix(&self) -> &CoordinateMatrix {
        &self.source
    }

    pub fn target_matrix(&self) -> &CoordinateMatrix {
        &self.target
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }
}

#[cfg(test)]
mod coordinates_test {
    use super::*;

    fn record(station: &str, x: f64, y: f64, z: f64, w: f64) -> CoordinateRecord {
        CoordinateRecord::new(
            station,
            Vector3::new(x, y, z),
            Vector3::new(0.01, 0.01, 0.02),
            w,
            Some(2020.0),
        )
        .unwrap()
    }

    #[test]
    fn test_record_invariants() {
        let bad_weight =
            CoordinateRecord::new("A", Vector3::zeros(), Vector3::zeros(), 1.5, None);
        assert!(matches!(bad_weight, Err(FrameFitError::Configuration(_))));

        let bad_sigma =
            CoordinateRecord::new("A", Vector3::zeros(), Vector3::new(0., -1., 0.), 1.0, None);
        assert!(bad_sigma.is_err());

        let empty = CoordinateRecord::new(" ", Vector3::zeros(), Vector3::zeros(), 1.0, None);
        assert!(empty.is_err());

        let bad_epoch =
            CoordinateRecord::new("A", Vector3::zeros(), Vector3::zeros(), 1.0, Some(-1.0));
        assert!(bad_epoch.is_err());
    }

    #[test]
    fn test_duplicate_station_rejected() {
        let set = CoordinateSet::new(
            Some("dup".into()),
            vec![record("A", 0., 0., 0., 1.), record("A", 1., 0., 0., 1.)],
        );
        assert!(matches!(set, Err(FrameFitError::Configuration(_))));
    }

    #[test]
    fn test_matrix_views() {
        let set = CoordinateSet::new(
            None,
            vec![record("A", 1., 2., 3., 1.), record("B", 4., 5., 6., 0.5)],
        )
        .unwrap();

        let m = set.coordinate_matrix();
        assert_eq!(m.nrows(), 2);
        assert_eq!(m[(1, 2)], 6.0);
        assert_eq!(set.weight_vector().as_slice(), &[1.0, 0.5]);

        let empty = CoordinateSet::default();
        assert_eq!(empty.coordinate_matrix().nrows(), 0);
    }

    #[test]
    fn test_with_coordinates() {
        let set = CoordinateSet::new(None, vec![record("A", 1., 2., 3., 0.3)]).unwrap();
        let moved = set
            .with_coordinates(&matrix_from_rows(&[[7., 8., 9.]]))
            .unwrap();
        assert_eq!(moved.records()[0].position, Vector3::new(7., 8., 9.));
        assert_eq!(moved.records()[0].weight, 0.3);

        let wrong = set.with_coordinates(&CoordinateMatrix::zeros(2));
        assert!(wrong.is_err());
    }

    #[test]
    fn test_limit_to_stations() {
        let set = CoordinateSet::new(
            Some("net".into()),
            vec![
                record("A", 0., 0., 0., 1.),
                record("B", 1., 0., 0., 1.),
                record("C", 2., 0., 0., 1.),
            ],
        )
        .unwrap();

        let limited = set.limit_to_stations(&["C", "A", "X"]);
        assert_eq!(limited.stations(), vec!["A", "C"]);
        assert_eq!(limited.name(), Some("net"));
        assert!(set.limit_to_stations(&[]).is_empty());
    }

    #[test]
    fn test_pairing() {
        let source = CoordinateSet::new(
            None,
            vec![
                record("A", 0., 0., 0., 1.),
                record("B", 1., 0., 0., 0.),
                record("C", 0., 1., 0., 1.),
                record("X", 9., 9., 9., 1.),
            ],
        )
        .unwrap();
        let target = CoordinateSet::new(
            None,
            vec![
                record("C", 10., 1., 0., 0.5),
                record("B", 11., 0., 0., 1.),
                record("A", 10., 0., 0., 1.),
            ],
        )
        .unwrap();

        let pairing = StationPairing::new(&source, &target);
        assert_eq!(pairing.stations(), &["A", "B", "C"]);
        assert_eq!(pairing.source_rows(), &[0, 1, 2]);
        assert_eq!(pairing.target_matrix()[(2, 0)], 10.0);
        assert_eq!(pairing.weights().as_slice(), &[1.0, 0.0, 0.5]);

        let active = pairing.active();
        assert_eq!(active.stations(), &["A", "C"]);
        assert_eq!(active.source_rows(), &[0, 2]);
        assert_eq!(active.source_matrix()[(1, 1)], 1.0);
    }
}
