//! Results of a pipeline execution.
use std::fmt;

use nalgebra::Vector3;

use crate::{
    constants::{Meter, StationId},
    coordinates::{CoordinateSet, StationPairing},
    operators::{OperatorParameters, Parameter},
};

/// Residual `transformed − target` of one paired station.
#[derive(Debug, Clone, PartialEq)]
pub struct StationResidual {
    pub station: StationId,
    pub residual: Vector3<Meter>,
    /// Combined source × target weight of the pair.
    pub weight: f64,
}

/// Summary statistics of the residuals of one stage.
///
/// Fields
/// -----------------
/// * `paired` – number of stations present in both source and target.
/// * `used` – number of pairs with a strictly positive weight.
/// * `rms` – weighted root mean square per axis.
/// * `rms_3d` – weighted root mean square of the residual vector length.
///
/// The RMS values are zero when no pair carries any weight.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResidualStats {
    pub paired: usize,
    pub used: usize,
    pub rms: Vector3<Meter>,
    pub rms_3d: Meter,
}

impl ResidualStats {
    pub fn from_residuals(residuals: &[StationResidual]) -> Self {
        let weighted: Vec<&StationResidual> = residuals.iter().filter(|r| r.weight > 0.0).collect();
        let total: f64 = weighted.iter().map(|r| r.weight).sum();

        let (rms, rms_3d) = if total > 0.0 {
            let sum_sq = weighted.iter().fold(Vector3::zeros(), |acc, r| {
                acc + r.residual.component_mul(&r.residual) * r.weight
            });
            let mean_sq = sum_sq / total;
            (mean_sq.map(f64::sqrt), mean_sq.sum().sqrt())
        } else {
            (Vector3::zeros(), 0.0)
        };

        ResidualStats {
            paired: residuals.len(),
            used: weighted.len(),
            rms,
            rms_3d,
        }
    }
}

impl fmt::Display for ResidualStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "paired: {}, used: {}, RMS x/y/z: {:.4}/{:.4}/{:.4} m, RMS 3D: {:.4} m",
            self.paired, self.used, self.rms.x, self.rms.y, self.rms.z, self.rms_3d
        )
    }
}

/// Residuals of every station shared by `source` and `target`, in source order.
pub fn residuals_between(source: &CoordinateSet, target: &CoordinateSet) -> Vec<StationResidual> {
    let pairing = StationPairing::new(source, target);
    let (s, t) = (pairing.source_matrix(), pairing.target_matrix());
    pairing
        .stations()
        .iter()
        .enumerate()
        .map(|(i, station)| StationResidual {
            station: station.clone(),
            residual: (s.row(i) - t.row(i)).transpose(),
            weight: pairing.weights()[i],
        })
        .collect()
}

/// Outcome of one pipeline stage.
///
/// Fields
/// -----------------
/// * `stage` – zero-based position of the operator in the pipeline.
/// * `kind`, `label` – operator type tag and user label.
/// * `parameters` – parameters after the stage, `None` for operators without an
///   estimation capability.
/// * `estimated` – the parameters fitted in this stage, `None` if nothing was fitted.
/// * `proj_steps` – the PROJ steps equivalent to the operator after the stage.
/// * `transformed_source` – the full source set after `forward`.
/// * `residuals` / `statistics` – per-station and summary residuals against the target.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorResult {
    pub stage: usize,
    pub kind: &'static str,
    pub label: Option<String>,
    pub parameters: Option<Vec<Parameter>>,
    pub estimated: Option<OperatorParameters>,
    pub proj_steps: Vec<String>,
    pub transformed_source: CoordinateSet,
    pub residuals: Vec<StationResidual>,
    pub statistics: ResidualStats,
}

impl OperatorResult {
    pub fn title(&self) -> &str {
        self.label.as_deref().unwrap_or(self.kind)
    }

    /// Look up a parameter by its PROJ name.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters
            .as_ref()
            .and_then(|params| params.iter().find(|p| p.name == name))
    }
}

/// Everything produced by [`crate::pipeline::Pipeline::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    source: CoordinateSet,
    target: CoordinateSet,
    results: Vec<OperatorResult>,
}

impl PipelineRun {
    pub(crate) fn new(
        source: CoordinateSet,
        target: CoordinateSet,
        results: Vec<OperatorResult>,
    ) -> Self {
        PipelineRun {
            source,
            target,
            results,
        }
    }

    /// Aggregated source coordinates, before any stage.
    pub fn source(&self) -> &CoordinateSet {
        &self.source
    }

    pub fn target(&self) -> &CoordinateSet {
        &self.target
    }

    pub fn results(&self) -> &[OperatorResult] {
        &self.results
    }

    /// Source coordinates after the last stage.
    pub fn final_coordinates(&self) -> &CoordinateSet {
        self.results
            .last()
            .map(|r| &r.transformed_source)
            .unwrap_or(&self.source)
    }

    /// Residuals of the last stage, or of the untransformed source for an
    /// empty pipeline.
    pub fn final_residuals(&self) -> Vec<StationResidual> {
        match self.results.last() {
            Some(last) => last.residuals.clone(),
            None => residuals_between(&self.source, &self.target),
        }
    }

    pub fn final_statistics(&self) -> ResidualStats {
        match self.results.last() {
            Some(last) => last.statistics,
            None => ResidualStats::from_residuals(&self.final_residuals()),
        }
    }
}
