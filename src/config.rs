//! # Pipeline configuration
//!
//! A pipeline is described by a JSON document:
//!
//! ```json
//! {
//!   "source_data": [{"type": "csv", "filename": "itrf2014.csv", "name": "ITRF2014"}],
//!   "target_data": [{"type": "bernese_crd", "filename": "etrf.CRD", "stddev": 0.005}],
//!   "operators": [
//!     {"type": "helmert_translation", "name": "shift"},
//!     {"type": "helmert_7param", "convention": "coordinate_frame"}
//!   ],
//!   "presenters": [{"type": "proj_presenter"}, {"type": "residual_presenter"}]
//! }
//! ```
//!
//! Every entry is selected by its `type` tag. [`PipelineConfig::resolve`] is the
//! factory turning the descriptors into a ready-to-run [`ResolvedPipeline`]: data
//! sources are read, operators built and presenters created. Every validation
//! failure is reported as [`FrameFitError::Configuration`].
//!
//! Operators with parameters given in the configuration are **fixed**: they are
//! applied as-is and never estimated. Leaving all parameters out makes them estimate.
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::{
    datasources::DataSource,
    framefit_errors::FrameFitError,
    operators::{
        DummyOperator, Helmert7Param, HelmertParameters, HelmertTranslation, Operator,
        ProjOperator, RotationConvention,
    },
    pipeline::{Pipeline, PipelineRun},
    presenters::{
        CoordinatePresenter, DataSourcePresenter, Presenter, ProjPresenter, ResidualPresenter,
    },
};

fn default_small_angle() -> bool {
    true
}

/// `helmert_translation` descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HelmertTranslationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

/// `helmert_7param` descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Helmert7ParamConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub convention: RotationConvention,
    #[serde(default = "default_small_angle")]
    pub small_angle_approximation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ry: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<f64>,
}

/// `proj_operator` descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjOperatorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub proj_string: String,
}

/// Descriptor with nothing but an optional name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Operator descriptor, selected by its `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperatorConfig {
    #[serde(rename = "dummy_operator")]
    Dummy(NamedConfig),
    #[serde(rename = "helmert_translation")]
    HelmertTranslation(HelmertTranslationConfig),
    #[serde(rename = "helmert_7param")]
    Helmert7Param(Helmert7ParamConfig),
    #[serde(rename = "proj_operator")]
    Proj(ProjOperatorConfig),
}

/// Presenter descriptor, selected by its `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenterConfig {
    ProjPresenter(NamedConfig),
    CoordinatePresenter(NamedConfig),
    ResidualPresenter(NamedConfig),
    DatasourcePresenter(NamedConfig),
}

fn finite(label: &str, value: Option<f64>) -> Result<Option<f64>, FrameFitError> {
    match value {
        Some(v) if !v.is_finite() => Err(FrameFitError::Configuration(format!(
            "parameter '{label}' must be finite, got {v}"
        ))),
        other => Ok(other),
    }
}

impl OperatorConfig {
    /// Build the operator described by this entry.
    pub fn build(&self) -> Result<Operator, FrameFitError> {
        match self {
            OperatorConfig::Dummy(cfg) => Ok(Operator::Dummy(DummyOperator {
                label: cfg.name.clone(),
            })),

            OperatorConfig::HelmertTranslation(cfg) => {
                let values = [
                    finite("x", cfg.x)?,
                    finite("y", cfg.y)?,
                    finite("z", cfg.z)?,
                ];
                let op = if values.iter().any(Option::is_some) {
                    let [x, y, z] = values.map(|v| v.unwrap_or(0.0));
                    HelmertTranslation::with_translation(cfg.name.clone(), Vector3::new(x, y, z))
                } else {
                    HelmertTranslation::new(cfg.name.clone())
                };
                Ok(Operator::HelmertTranslation(op))
            }

            OperatorConfig::Helmert7Param(cfg) => {
                let values = [
                    finite("x", cfg.x)?,
                    finite("y", cfg.y)?,
                    finite("z", cfg.z)?,
                    finite("rx", cfg.rx)?,
                    finite("ry", cfg.ry)?,
                    finite("rz", cfg.rz)?,
                    finite("s", cfg.s)?,
                ];
                let op = if values.iter().any(Option::is_some) {
                    let [x, y, z, rx, ry, rz, s] = values.map(|v| v.unwrap_or(0.0));
                    if s <= -1e6 {
                        return Err(FrameFitError::Configuration(format!(
                            "scale of {s} ppm collapses coordinates"
                        )));
                    }
                    Helmert7Param::with_parameters(
                        cfg.name.clone(),
                        HelmertParameters::new(x, y, z, rx, ry, rz, s),
                        cfg.convention,
                    )
                } else {
                    Helmert7Param::new(cfg.name.clone(), cfg.convention)
                };
                Ok(Operator::Helmert7Param(
                    op.with_small_angle_approximation(cfg.small_angle_approximation),
                ))
            }

            OperatorConfig::Proj(cfg) => Ok(Operator::Proj(ProjOperator::new(
                cfg.name.clone(),
                &cfg.proj_string,
            )?)),
        }
    }
}

impl PresenterConfig {
    /// Build the presenter; `source_data` and `target_data` are the descriptors
    /// the pipeline was loaded from.
    pub fn build(
        &self,
        source_data: &[DataSource],
        target_data: &[DataSource],
    ) -> Box<dyn Presenter> {
        match self {
            PresenterConfig::ProjPresenter(cfg) => Box::new(ProjPresenter::new(cfg.name.clone())),
            PresenterConfig::CoordinatePresenter(cfg) => {
                Box::new(CoordinatePresenter::new(cfg.name.clone()))
            }
            PresenterConfig::ResidualPresenter(cfg) => {
                Box::new(ResidualPresenter::new(cfg.name.clone()))
            }
            PresenterConfig::DatasourcePresenter(cfg) => Box::new(DataSourcePresenter::new(
                cfg.name.clone(),
                source_data,
                target_data,
            )),
        }
    }
}

/// Complete, serializable description of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub source_data: Vec<DataSource>,
    pub target_data: Vec<DataSource>,
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
    #[serde(default)]
    pub presenters: Vec<PresenterConfig>,
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, FrameFitError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, FrameFitError> {
        let content = std::fs::read_to_string(path)?;
        PipelineConfig::from_json(&content)
    }

    /// Pretty-printed JSON representation.
    pub fn to_json(&self) -> Result<String, FrameFitError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Turn every descriptor into its runtime object.
    ///
    /// Arguments
    /// -----------------
    /// * `base_dir`: directory relative data file names are resolved against,
    ///   typically the directory of the configuration file.
    ///
    /// Return
    /// ----------
    /// * A [`ResolvedPipeline`] ready to run.
    ///
    /// Errors
    /// ----------
    /// * `FrameFitError::Configuration` for missing data sources, invalid operator
    ///   parameters or malformed data.
    /// * `FrameFitError::IoError` / `FrameFitError::CsvError` for unreadable files.
    pub fn resolve(&self, base_dir: Option<&Path>) -> Result<ResolvedPipeline, FrameFitError> {
        let operators = self
            .operators
            .iter()
            .map(OperatorConfig::build)
            .collect::<Result<Vec<_>, _>>()?;

        let sources = self
            .source_data
            .iter()
            .map(|ds| ds.load(base_dir))
            .collect::<Result<Vec<_>, _>>()?;
        let targets = self
            .target_data
            .iter()
            .map(|ds| ds.load(base_dir))
            .collect::<Result<Vec<_>, _>>()?;

        let presenters = self
            .presenters
            .iter()
            .map(|p| p.build(&self.source_data, &self.target_data))
            .collect();

        Ok(ResolvedPipeline {
            pipeline: Pipeline::from_sets(sources, targets, operators)?,
            presenters,
            source_data: self.source_data.clone(),
            target_data: self.target_data.clone(),
        })
    }
}

/// A pipeline together with the presenters that will render its run.
pub struct ResolvedPipeline {
    pub pipeline: Pipeline,
    pub presenters: Vec<Box<dyn Presenter>>,
    /// Descriptors the source set was loaded from.
    pub source_data: Vec<DataSource>,
    /// Descriptors the target set was loaded from.
    pub target_data: Vec<DataSource>,
}

impl ResolvedPipeline {
    /// Run the pipeline and evaluate every presenter on the result.
    pub fn execute(&mut self) -> Result<PipelineRun, FrameFitError> {
        let run = self.pipeline.run()?;
        for presenter in self.presenters.iter_mut() {
            presenter.evaluate(&run);
        }
        Ok(run)
    }
}

#[cfg(test)]
mod config_test {
    use super::*;

    const CONFIG: &str = r#"{
        "source_data": [{
            "type": "inline",
            "name": "src",
            "coordinates": [
                {"station": "A", "x": 0.0, "y": 0.0, "z": 0.0},
                {"station": "B", "x": 1.0, "y": 0.0, "z": 0.0},
                {"station": "C", "x": 0.0, "y": 1.0, "z": 0.0}
            ]
        }],
        "target_data": [{
            "type": "inline",
            "name": "tgt",
            "coordinates": [
                {"station": "A", "x": 10.0, "y": 0.0, "z": 0.0},
                {"station": "B", "x": 11.0, "y": 0.0, "z": 0.0},
                {"station": "C", "x": 10.0, "y": 1.0, "z": 0.0}
            ]
        }],
        "operators": [
            {"type": "dummy_operator"},
            {"type": "helmert_translation", "name": "shift"}
        ],
        "presenters": [
            {"type": "proj_presenter"},
            {"type": "residual_presenter"},
            {"type": "datasource_presenter"}
        ]
    }"#;

    #[test]
    fn test_resolve_and_execute() {
        let config = PipelineConfig::from_json(CONFIG).unwrap();
        let mut resolved = config.resolve(None).unwrap();
        assert_eq!(resolved.pipeline.operators().len(), 2);
        assert_eq!(resolved.presenters.len(), 3);
        assert_eq!(resolved.source_data.len(), 1);

        let run = resolved.execute().unwrap();
        assert!(run.final_statistics().rms_3d < 1e-12);
        let shift = run.results()[1].parameter("x").and_then(|p| p.as_number()).unwrap();
        assert!((shift - 10.0).abs() < 1e-9);
        let projstring = resolved.presenters[0].as_json().unwrap();
        assert!(projstring.starts_with(r#"{"projstring":"+proj=helmert +x="#), "{projstring}");
    }

    #[test]
    fn test_datasource_presenter_reports_descriptors() {
        let mut resolved = PipelineConfig::from_json(CONFIG).unwrap().resolve(None).unwrap();
        resolved.execute().unwrap();

        let presenter = &resolved.presenters[2];
        assert_eq!(presenter.name(), "Data sources");
        let json: serde_json::Value = serde_json::from_str(&presenter.as_json().unwrap()).unwrap();
        assert_eq!(json["source_data"][0]["name"], "src");
        assert_eq!(json["source_data"][0]["type"], "inline");
        assert_eq!(json["target_data"][0]["name"], "tgt");
        assert_eq!(
            presenter.as_text(),
            "Source data\n  inline src: 3 coordinates\nTarget data\n  inline tgt: 3 coordinates"
        );
    }

    #[test]
    fn test_json_round_trip() {
        let config = PipelineConfig::from_json(CONFIG).unwrap();
        let again = PipelineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_fixed_parameters_from_config() {
        let op = OperatorConfig::HelmertTranslation(HelmertTranslationConfig {
            x: Some(1.0),
            ..Default::default()
        })
        .build()
        .unwrap();
        assert!(!op.can_estimate());

        let op = OperatorConfig::Helmert7Param(Helmert7ParamConfig {
            name: None,
            convention: RotationConvention::CoordinateFrame,
            small_angle_approximation: false,
            x: None,
            y: None,
            z: None,
            rx: None,
            ry: None,
            rz: None,
            s: None,
        })
        .build()
        .unwrap();
        assert!(op.can_estimate());
        assert!(!op.parameters().iter().any(|p| p.name == "approx"));
    }

    #[test]
    fn test_configuration_errors() {
        let missing_target = r#"{"source_data": [{"type": "inline", "coordinates": []}], "target_data": []}"#;
        let err = PipelineConfig::from_json(missing_target)
            .unwrap()
            .resolve(None)
            .err()
            .unwrap();
        assert!(matches!(err, FrameFitError::Configuration(_)));

        let bad_proj = OperatorConfig::Proj(ProjOperatorConfig {
            name: None,
            proj_string: "+proj=tmerc".into(),
        });
        assert!(matches!(
            bad_proj.build().unwrap_err(),
            FrameFitError::Configuration(_)
        ));

        let unknown = r#"{"source_data": [], "target_data": [], "operators": [{"type": "magic"}]}"#;
        assert!(matches!(
            PipelineConfig::from_json(unknown).unwrap_err(),
            FrameFitError::JsonError(_)
        ));

        let no_convention = r#"{"type": "helmert_7param"}"#;
        assert!(serde_json::from_str::<OperatorConfig>(no_convention).is_err());
    }
}
