//! # framefit
//!
//! Estimate and apply transformations between geodetic reference frames.
//!
//! A [`Pipeline`](pipeline::Pipeline) takes a *source* and a *target* set of
//! station coordinates and runs an ordered list of
//! [`Operator`](operators::Operator)s over the source. Operators that can estimate
//! their parameters (Helmert translation, 7-parameter Helmert) are fitted by
//! weighted least squares on the stations common to both sets. The source is then
//! transformed and handed to the next stage. Each stage records its residuals
//! against the target.
//!
//! ## Modules
//!
//! * [`coordinates`] – station records, coordinate sets, pairing and merging.
//! * [`operators`] – the operator model: dummy, Helmert family and PROJ strings.
//! * [`pipeline`] – the stage runner and its per-stage results.
//! * [`datasources`] – readers for CSV, Bernese CRD and inline coordinates.
//! * [`presenters`] – PROJ string, coordinate, residual and data source reports.
//! * [`config`] – JSON pipeline descriptions and their resolution.
//!
//! ## Example
//!
//! ```rust
//! use framefit::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_json(r#"{
//!     "source_data": [{"type": "inline", "coordinates": [
//!         {"station": "A", "x": 0.0, "y": 0.0, "z": 0.0},
//!         {"station": "B", "x": 1.0, "y": 0.0, "z": 0.0}]}],
//!     "target_data": [{"type": "inline", "coordinates": [
//!         {"station": "A", "x": 10.0, "y": 0.0, "z": 0.0},
//!         {"station": "B", "x": 11.0, "y": 0.0, "z": 0.0}]}],
//!     "operators": [{"type": "helmert_translation"}],
//!     "presenters": [{"type": "proj_presenter"}]
//! }"#)?;
//!
//! let mut resolved = config.resolve(None)?;
//! let run = resolved.execute()?;
//! assert!(run.final_statistics().rms_3d < 1e-9);
//! # Ok::<(), framefit::framefit_errors::FrameFitError>(())
//! ```
pub mod config;
pub mod constants;
pub mod coordinates;
pub mod datasources;
pub mod framefit_errors;
mod least_squares;
pub mod operators;
pub mod pipeline;
pub mod presenters;

pub use config::PipelineConfig;
pub use framefit_errors::FrameFitError;
pub use pipeline::{Pipeline, PipelineRun};
