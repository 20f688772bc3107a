//! # Presenters
//!
//! A presenter turns a finished [`PipelineRun`] into something a user can read. It
//! is evaluated once per run and then rendered as JSON (machine readable) or as
//! plain text (terminal output).
//!
//! | Presenter | Content |
//! |---|---|
//! | [`ProjPresenter`] | the whole pipeline as a single PROJ string |
//! | [`CoordinatePresenter`] | station coordinates of the source, every stage and the target |
//! | [`ResidualPresenter`] | residual vectors and statistics per stage |
//! | [`DataSourcePresenter`] | the data source descriptors of both roles |
pub mod coordinates;
pub mod datasources;

use itertools::Itertools;
use serde::Serialize;

use crate::{framefit_errors::FrameFitError, pipeline::PipelineRun};

pub use coordinates::{CoordinatePresenter, ResidualPresenter};
pub use datasources::DataSourcePresenter;

/// Renders the outcome of a pipeline run.
pub trait Presenter {
    /// Display name, used as section title and JSON key.
    fn name(&self) -> &str;

    /// Collect what is needed from `run`. Replaces any earlier evaluation.
    fn evaluate(&mut self, run: &PipelineRun);

    fn as_json(&self) -> Result<String, FrameFitError>;

    fn as_text(&self) -> String;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
struct ProjOutput {
    projstring: String,
}

/// Presents the pipeline as a PROJ string.
///
/// Stages equivalent to `+proj=noop` are left out. An empty result yields
/// `+proj=noop`, a single remaining step is given on its own and several steps are
/// wrapped in `+proj=pipeline`. Pipelines coming from PROJ-string operators are
/// flattened, since PROJ does not allow nested pipelines.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjPresenter {
    name: String,
    output: ProjOutput,
}

impl Default for ProjPresenter {
    fn default() -> Self {
        ProjPresenter::new(None)
    }
}

impl ProjPresenter {
    pub fn new(name: Option<String>) -> Self {
        ProjPresenter {
            name: name.unwrap_or_else(|| "PROJ string".to_string()),
            output: ProjOutput {
                projstring: "+proj=noop".to_string(),
            },
        }
    }

    pub fn proj_string(&self) -> &str {
        &self.output.projstring
    }
}

impl Presenter for ProjPresenter {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&mut self, run: &PipelineRun) {
        let steps: Vec<&String> = run
            .results()
            .iter()
            .flat_map(|r| r.proj_steps.iter())
            .filter(|step| step.as_str() != "+proj=noop")
            .collect();

        self.output.projstring = match steps.as_slice() {
            [] => "+proj=noop".to_string(),
            [single] => single.to_string(),
            many => format!("+proj=pipeline +step {}", many.iter().join(" +step ")),
        };
    }

    fn as_json(&self) -> Result<String, FrameFitError> {
        Ok(serde_json::to_string(&self.output)?)
    }

    fn as_text(&self) -> String {
        self.output.projstring.replace(" +step", "\n  +step")
    }
}
