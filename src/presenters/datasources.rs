use std::fmt;

use serde::Serialize;

use super::Presenter;
use crate::{datasources::DataSource, framefit_errors::FrameFitError, pipeline::PipelineRun};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
struct DataSourceOutput {
    source_data: Vec<DataSource>,
    target_data: Vec<DataSource>,
}

/// Lists the data source descriptors the pipeline coordinates were read from.
///
/// The descriptors are handed over at construction and reported as configured,
/// overrides included, once the presenter has been evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourcePresenter {
    name: String,
    configured: DataSourceOutput,
    output: DataSourceOutput,
}

impl DataSourcePresenter {
    pub fn new(
        name: Option<String>,
        source_data: &[DataSource],
        target_data: &[DataSource],
    ) -> Self {
        DataSourcePresenter {
            name: name.unwrap_or_else(|| "Data sources".to_string()),
            configured: DataSourceOutput {
                source_data: source_data.to_vec(),
                target_data: target_data.to_vec(),
            },
            output: DataSourceOutput::default(),
        }
    }
}

/// One line per descriptor: `kind name: origin`.
struct Origin<'a>(&'a DataSource);

impl fmt::Display for Origin<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self.0;
        write!(f, "  {}", source.kind())?;
        if let Some(name) = &source.overrides().name {
            write!(f, " {name}")?;
        }
        match source {
            DataSource::Csv(csv) => write!(f, ": {}", csv.filename.display()),
            DataSource::BerneseCrd(crd) => write!(f, ": {}", crd.filename.display()),
            DataSource::Inline(inline) => write!(f, ": {} coordinates", inline.coordinates.len()),
        }
    }
}

impl fmt::Display for DataSourceOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Source data")?;
        for source in &self.source_data {
            writeln!(f, "{}", Origin(source))?;
        }
        write!(f, "Target data")?;
        for target in &self.target_data {
            write!(f, "\n{}", Origin(target))?;
        }
        Ok(())
    }
}

impl Presenter for DataSourcePresenter {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&mut self, _run: &PipelineRun) {
        self.output = self.configured.clone();
    }

    fn as_json(&self) -> Result<String, FrameFitError> {
        Ok(serde_json::to_string(&self.output)?)
    }

    fn as_text(&self) -> String {
        self.output.to_string()
    }
}
