use thiserror::Error;

/// Failures raised while fitting parameters of an operator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimationError {
    #[error("Underdetermined system: {observations} weighted observations for {parameters} parameters")]
    Underdetermined {
        observations: usize,
        parameters: usize,
    },

    #[error("Normal equations are singular; station geometry cannot determine all parameters")]
    Singular,

    #[error("Source and target matrices differ in size: {source_rows} vs {target_rows} rows")]
    ShapeMismatch {
        source_rows: usize,
        target_rows: usize,
    },

    #[error("Weight vector has {weights} entries but {rows} stations were given")]
    WeightMismatch { weights: usize, rows: usize },

    #[error("Invalid weight: {0}")]
    InvalidWeight(String),

    #[error("Least-squares system is malformed: {0}")]
    MalformedSystem(SolverError),
}

/// Failures of the weighted least-squares primitive.
///
/// Malformed input (`ShapeMismatch`, `InvalidWeight`) is reported apart from
/// insufficient geometry (`Underdetermined`, `Singular`).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Design matrix has {design_rows} rows, observations {observations}, weights {weights}")]
    ShapeMismatch {
        design_rows: usize,
        observations: usize,
        weights: usize,
    },

    #[error("Weight at row {row} is negative or not finite: {value}")]
    InvalidWeight { row: usize, value: f64 },

    #[error("Only {observations} weighted rows for {parameters} unknowns")]
    Underdetermined {
        observations: usize,
        parameters: usize,
    },

    #[error("Normal matrix is singular (rank {rank} of {parameters})")]
    Singular { rank: usize, parameters: usize },
}

impl From<SolverError> for EstimationError {
    fn from(err: SolverError) -> Self {
        match err {
            SolverError::ShapeMismatch { .. } => EstimationError::MalformedSystem(err),
            SolverError::InvalidWeight { row, value } => {
                EstimationError::InvalidWeight(format!("row {row}: {value}"))
            }
            SolverError::Underdetermined {
                observations,
                parameters,
            } => EstimationError::Underdetermined {
                observations,
                parameters,
            },
            SolverError::Singular { .. } => EstimationError::Singular,
        }
    }
}

#[derive(Error, Debug)]
pub enum FrameFitError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Pairing error: {0}")]
    Pairing(String),

    #[error("Estimation error: {0}")]
    Estimation(#[from] EstimationError),

    #[error("Pipeline stage {stage} ({operator}) failed: {source}")]
    Pipeline {
        stage: usize,
        operator: String,
        source: Box<FrameFitError>,
    },

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<SolverError> for FrameFitError {
    fn from(err: SolverError) -> Self {
        FrameFitError::Estimation(err.into())
    }
}

impl FrameFitError {
    /// Wrap an error raised by the operator at position `stage` of a pipeline.
    pub fn in_stage(self, stage: usize, operator: impl Into<String>) -> Self {
        FrameFitError::Pipeline {
            stage,
            operator: operator.into(),
            source: Box::new(self),
        }
    }

    /// Walk through pipeline wrappers and return the underlying cause.
    pub fn root_cause(&self) -> &FrameFitError {
        match self {
            FrameFitError::Pipeline { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl PartialEq for FrameFitError {
    fn eq(&self, other: &Self) -> bool {
        use FrameFitError::*;
        match (self, other) {
            (Configuration(a), Configuration(b)) => a == b,
            (Pairing(a), Pairing(b)) => a == b,
            (Estimation(a), Estimation(b)) => a == b,
            (
                Pipeline {
                    stage: s1,
                    operator: o1,
                    source: e1,
                },
                Pipeline {
                    stage: s2,
                    operator: o2,
                    source: e2,
                },
            ) => s1 == s2 && o1 == o2 && e1 == e2,

            // not comparable, same variant is enough
            (IoError(_), IoError(_)) => true,
            (CsvError(_), CsvError(_)) => true,
            (JsonError(_), JsonError(_)) => true,

            _ => false,
        }
    }
}

#[cfg(test)]
mod framefit_errors_test {
    use super::*;

    #[test]
    fn test_solver_shape_mismatch_keeps_its_counts() {
        let solver = SolverError::ShapeMismatch {
            design_rows: 9,
            observations: 6,
            weights: 3,
        };
        let err = FrameFitError::from(solver.clone());
        assert_eq!(
            err,
            FrameFitError::Estimation(EstimationError::MalformedSystem(solver))
        );
        assert!(err.to_string().contains("9 rows, observations 6, weights 3"));
    }

    #[test]
    fn test_solver_geometry_failures() {
        let err: EstimationError = SolverError::Singular {
            rank: 5,
            parameters: 7,
        }
        .into();
        assert_eq!(err, EstimationError::Singular);

        let err: EstimationError = SolverError::Underdetermined {
            observations: 3,
            parameters: 7,
        }
        .into();
        assert_eq!(
            err,
            EstimationError::Underdetermined {
                observations: 3,
                parameters: 7
            }
        );
    }

    #[test]
    fn test_root_cause_unwraps_stages() {
        let err = FrameFitError::Pairing("none".into())
            .in_stage(0, "inner")
            .in_stage(2, "outer");
        assert_eq!(err.root_cause(), &FrameFitError::Pairing("none".into()));
    }
}
