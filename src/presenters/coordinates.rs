use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use serde::Serialize;

use super::Presenter;
use crate::{
    constants::StationId,
    coordinates::CoordinateSet,
    framefit_errors::FrameFitError,
    pipeline::{PipelineRun, ResidualStats, StationResidual},
};

/// Coordinates of one stage: station → `[x, y, z, t]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct StageCoordinates {
    title: String,
    coordinates: BTreeMap<StationId, [Option<f64>; 4]>,
}

impl StageCoordinates {
    fn from_set(title: String, set: &CoordinateSet) -> Self {
        StageCoordinates {
            title,
            coordinates: set
                .iter()
                .map(|r| {
                    (
                        r.station.clone(),
                        [
                            Some(r.position.x),
                            Some(r.position.y),
                            Some(r.position.z),
                            r.epoch,
                        ],
                    )
                })
                .collect(),
        }
    }
}

/// Presents the coordinates of the source, every stage and the target.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatePresenter {
    name: String,
    stages: Vec<StageCoordinates>,
}

impl Default for CoordinatePresenter {
    fn default() -> Self {
        CoordinatePresenter::new(None)
    }
}

impl CoordinatePresenter {
    pub fn new(name: Option<String>) -> Self {
        CoordinatePresenter {
            name: name.unwrap_or_else(|| "Coordinates".to_string()),
            stages: Vec::new(),
        }
    }

    /// Stage titles in presentation order.
    pub fn titles(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.title.as_str()).collect()
    }
}

fn fmt_cell(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

impl fmt::Display for StageCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(
            f,
            "{:<12} {:>16} {:>16} {:>16} {:>10}",
            "station", "x", "y", "z", "t"
        )?;
        for (station, [x, y, z, t]) in &self.coordinates {
            writeln!(
                f,
                "{:<12} {:>16} {:>16} {:>16} {:>10}",
                station,
                fmt_cell(*x, 4),
                fmt_cell(*y, 4),
                fmt_cell(*z, 4),
                fmt_cell(*t, 3)
            )?;
        }
        Ok(())
    }
}

/// Tables separated by a blank line.
fn join_tables<T: fmt::Display>(tables: &[T]) -> String {
    tables.iter().join("\n").trim_end().to_string()
}

impl Presenter for CoordinatePresenter {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&mut self, run: &PipelineRun) {
        let mut stages = vec![StageCoordinates::from_set(
            "Source coordinates".to_string(),
            run.source(),
        )];
        stages.extend(run.results().iter().map(|r| {
            StageCoordinates::from_set(
                format!("Step {}: {}", r.stage + 1, r.title()),
                &r.transformed_source,
            )
        }));
        stages.push(StageCoordinates::from_set(
            "Target coordinates".to_string(),
            run.target(),
        ));
        self.stages = stages;
    }

    fn as_json(&self) -> Result<String, FrameFitError> {
        Ok(serde_json::to_string(&self.stages)?)
    }

    fn as_text(&self) -> String {
        join_tables(&self.stages)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct StatsOutput {
    paired: usize,
    used: usize,
    rms: [f64; 3],
    rms_3d: f64,
}

impl From<&ResidualStats> for StatsOutput {
    fn from(stats: &ResidualStats) -> Self {
        StatsOutput {
            paired: stats.paired,
            used: stats.used,
            rms: [stats.rms.x, stats.rms.y, stats.rms.z],
            rms_3d: stats.rms_3d,
        }
    }
}

/// Residuals of one stage: station → `[dx, dy, dz, weight]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct StageResiduals {
    title: String,
    residuals: BTreeMap<StationId, [f64; 4]>,
    statistics: StatsOutput,
}

impl fmt::Display for StageResiduals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(
            f,
            "{:<12} {:>10} {:>10} {:>10} {:>6}",
            "station", "dx", "dy", "dz", "w"
        )?;
        for (station, [dx, dy, dz, w]) in &self.residuals {
            writeln!(f, "{station:<12} {dx:>10.4} {dy:>10.4} {dz:>10.4} {w:>6.2}")?;
        }
        let s = &self.statistics;
        writeln!(
            f,
            "RMS (m) x: {:.4} y: {:.4} z: {:.4} 3D: {:.4} ({} of {} stations used)",
            s.rms[0], s.rms[1], s.rms[2], s.rms_3d, s.used, s.paired
        )
    }
}

/// Presents residual vectors and statistics of every stage.
///
/// An empty pipeline yields a single entry with the residuals of the
/// untransformed source.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualPresenter {
    name: String,
    stages: Vec<StageResiduals>,
}

impl Default for ResidualPresenter {
    fn default() -> Self {
        ResidualPresenter::new(None)
    }
}

impl ResidualPresenter {
    pub fn new(name: Option<String>) -> Self {
        ResidualPresenter {
            name: name.unwrap_or_else(|| "Residuals".to_string()),
            stages: Vec::new(),
        }
    }
}

impl Presenter for ResidualPresenter {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&mut self, run: &PipelineRun) {
        let stage = |title: String, residuals: &[StationResidual], stats: &ResidualStats| {
            StageResiduals {
                title,
                residuals: residuals
                    .iter()
                    .map(|r| {
                        (
                            r.station.clone(),
                            [r.residual.x, r.residual.y, r.residual.z, r.weight],
                        )
                    })
                    .collect(),
                statistics: StatsOutput::from(stats),
            }
        };

        self.stages = if run.results().is_empty() {
            vec![stage(
                "Source coordinates".to_string(),
                &run.final_residuals(),
                &run.final_statistics(),
            )]
        } else {
            run.results()
                .iter()
                .map(|r| {
                    stage(
                        format!("Step {}: {}", r.stage + 1, r.title()),
                        &r.residuals,
                        &r.statistics,
                    )
                })
                .collect()
        };
    }

    fn as_json(&self) -> Result<String, FrameFitError> {
        Ok(serde_json::to_string(&self.stages)?)
    }

    fn as_text(&self) -> String {
        join_tables(&self.stages)
    }
}
