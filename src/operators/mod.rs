//! # Coordinate operators
//!
//! Operators are the building blocks of a transformation pipeline. Every operator
//! can transform coordinates (**forward**). Some can also undo that transform
//! (**inverse**) and some can fit their own parameters from paired coordinates
//! (**estimate**). Both optional capabilities are queried explicitly with
//! [`Operator::has_inverse`] and [`Operator::can_estimate`].
//!
//! ## Variants
//! -----------------
//! | Variant | forward | inverse | estimate |
//! |---|---|---|---|
//! | [`DummyOperator`] | identity | identity | – |
//! | [`HelmertTranslation`] | `X + T` | `X − T` | 3 parameters |
//! | [`Helmert7Param`] | `T + (1+s)·R·X` | exact | 7 parameters |
//! | [`ProjOperator`] | fixed PROJ-style string | when all steps invert | – |
//!
//! ## Parameter state
//! -----------------
//! Estimation never mutates an operator. [`Operator::estimate`] *returns* an
//! [`OperatorParameters`] value and the caller commits it with [`Operator::assign`].
//! An operator built with fixed parameters answers `estimate` with its current
//! parameters and `assign` leaves it unchanged.
pub mod helmert;
pub mod proj;

use std::fmt;

use itertools::Itertools;
use nalgebra::{DVector, Vector3};

use crate::{
    constants::CoordinateMatrix,
    framefit_errors::{EstimationError, FrameFitError},
};

pub use helmert::{Helmert7Param, HelmertParameters, HelmertTranslation, RotationConvention};
pub use proj::ProjOperator;

/// Value of a named operator parameter, following PROJ parameter forms
/// (`+name=number`, `+name=string`, `+name`).
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Number(f64),
    Text(String),
    Flag,
}

/// A named operator parameter, as presented to users.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: ParameterValue,
}

impl Parameter {
    pub fn number(name: &str, value: f64) -> Self {
        Parameter {
            name: name.to_string(),
            value: ParameterValue::Number(value),
        }
    }

    pub fn text(name: &str, value: impl Into<String>) -> Self {
        Parameter {
            name: name.to_string(),
            value: ParameterValue::Text(value.into()),
        }
    }

    pub fn flag(name: &str) -> Self {
        Parameter {
            name: name.to_string(),
            value: ParameterValue::Flag,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.value {
            ParameterValue::Number(v) => Some(v),
            _ => None,
        }
    }

    /// PROJ string representation, e.g. `+x=10.5` or `+approx`.
    pub fn as_proj_param(&self) -> String {
        match &self.value {
            ParameterValue::Number(v) => format!("+{}={}", self.name, v),
            ParameterValue::Text(t) => format!("+{}={}", self.name, t),
            ParameterValue::Flag => format!("+{}", self.name),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            ParameterValue::Number(v) => write!(f, "{}: {}", self.name, v),
            ParameterValue::Text(t) => write!(f, "{}: {}", self.name, t),
            ParameterValue::Flag => write!(f, "{}", self.name),
        }
    }
}

/// Parameters produced by an estimating operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorParameters {
    /// Translation vector in meters.
    Translation(Vector3<f64>),
    /// Full similarity transform.
    Helmert(HelmertParameters),
}

/// Coordinate-transform capability shared by all operators.
pub trait CoordinateOperation {
    /// Transform every row of `coordinates` independently.
    fn forward(&self, coordinates: &CoordinateMatrix) -> Result<CoordinateMatrix, FrameFitError>;

    /// Inverse of [`CoordinateOperation::forward`], `None` when not available.
    fn inverse(
        &self,
        _coordinates: &CoordinateMatrix,
    ) -> Option<Result<CoordinateMatrix, FrameFitError>> {
        None
    }

    fn has_inverse(&self) -> bool {
        false
    }

    /// Current parameters in PROJ naming.
    fn parameters(&self) -> Vec<Parameter>;

    /// Steps of the equivalent PROJ pipeline, one string per step.
    fn proj_steps(&self) -> Vec<String>;
}

/// Parameter-estimation capability.
pub trait ParameterEstimation {
    /// Number of unknowns fitted by [`ParameterEstimation::estimate`].
    fn parameter_count(&self) -> usize;

    /// `true` when the parameters were given at construction and must not be fitted.
    fn is_fixed(&self) -> bool;

    /// Fit parameters minimizing the weighted squared residuals between
    /// `forward(source)` and `target`.
    ///
    /// Rows with a weight of zero are ignored.
    fn estimate(
        &self,
        source: &CoordinateMatrix,
        target: &CoordinateMatrix,
        weights: &DVector<f64>,
    ) -> Result<OperatorParameters, FrameFitError>;

    /// Commit parameters previously returned by [`ParameterEstimation::estimate`].
    fn assign(&mut self, parameters: OperatorParameters) -> Result<(), FrameFitError>;
}

/// Pass-through operator, used as identity stage and for pipeline wiring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DummyOperator {
    pub label: Option<String>,
}

impl CoordinateOperation for DummyOperator {
    fn forward(&self, coordinates: &CoordinateMatrix) -> Result<CoordinateMatrix, FrameFitError> {
        Ok(coordinates.clone())
    }

    fn inverse(
        &self,
        coordinates: &CoordinateMatrix,
    ) -> Option<Result<CoordinateMatrix, FrameFitError>> {
        Some(Ok(coordinates.clone()))
    }

    fn has_inverse(&self) -> bool {
        true
    }

    fn parameters(&self) -> Vec<Parameter> {
        Vec::new()
    }

    fn proj_steps(&self) -> Vec<String> {
        vec!["+proj=noop".to_string()]
    }
}

/// A pipeline operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Dummy(DummyOperator),
    HelmertTranslation(HelmertTranslation),
    Helmert7Param(Helmert7Param),
    Proj(ProjOperator),
}

impl Operator {
    /// Type tag of the operator, as used in pipeline configurations.
    pub fn kind(&self) -> &'static str {
        match self {
            Operator::Dummy(_) => "dummy_operator",
            Operator::HelmertTranslation(_) => "helmert_translation",
            Operator::Helmert7Param(_) => "helmert_7param",
            Operator::Proj(_) => "proj_operator",
        }
    }

    /// User-given label, if any.
    pub fn label(&self) -> Option<&str> {
        match self {
            Operator::Dummy(op) => op.label.as_deref(),
            Operator::HelmertTranslation(op) => op.label.as_deref(),
            Operator::Helmert7Param(op) => op.label.as_deref(),
            Operator::Proj(op) => op.label.as_deref(),
        }
    }

    /// Label if given, type tag otherwise.
    pub fn title(&self) -> String {
        self.label().unwrap_or(self.kind()).to_string()
    }

    fn operation(&self) -> &dyn CoordinateOperation {
        match self {
            Operator::Dummy(op) => op,
            Operator::HelmertTranslation(op) => op,
            Operator::Helmert7Param(op) => op,
            Operator::Proj(op) => op,
        }
    }

    fn estimation(&self) -> Option<&dyn ParameterEstimation> {
        match self {
            Operator::HelmertTranslation(op) => Some(op),
            Operator::Helmert7Param(op) => Some(op),
            Operator::Dummy(_) | Operator::Proj(_) => None,
        }
    }

    fn estimation_mut(&mut self) -> Option<&mut dyn ParameterEstimation> {
        match self {
            Operator::HelmertTranslation(op) => Some(op),
            Operator::Helmert7Param(op) => Some(op),
            Operator::Dummy(_) | Operator::Proj(_) => None,
        }
    }

    pub fn forward(&self, coordinates: &CoordinateMatrix) -> Result<CoordinateMatrix, FrameFitError> {
        self.operation().forward(coordinates)
    }

    pub fn has_inverse(&self) -> bool {
        self.operation().has_inverse()
    }

    pub fn inverse(
        &self,
        coordinates: &CoordinateMatrix,
    ) -> Option<Result<CoordinateMatrix, FrameFitError>> {
        self.operation().inverse(coordinates)
    }

    pub fn parameters(&self) -> Vec<Parameter> {
        self.operation().parameters()
    }

    pub fn proj_steps(&self) -> Vec<String> {
        self.operation().proj_steps()
    }

    /// `true` for operator types with an estimation capability, fixed or not.
    pub fn is_estimator(&self) -> bool {
        self.estimation().is_some()
    }

    /// `true` if the operator has an estimation capability and was not built with
    /// fixed parameters.
    pub fn can_estimate(&self) -> bool {
        self.estimation().is_some_and(|e| !e.is_fixed())
    }

    /// Number of fitted unknowns, `None` without an estimation capability.
    pub fn parameter_count(&self) -> Option<usize> {
        self.estimation().map(|e| e.parameter_count())
    }

    /// Run the estimation capability, if any.
    ///
    /// Return
    /// ----------
    /// * `Ok(None)` – the operator has no estimation capability.
    /// * `Ok(Some(p))` – fitted parameters, or the current ones for a fixed operator.
    /// * `Err(_)` – shape problems or insufficient geometry.
    pub fn estimate(
        &self,
        source: &CoordinateMatrix,
        target: &CoordinateMatrix,
        weights: &DVector<f64>,
    ) -> Result<Option<OperatorParameters>, FrameFitError> {
        match self.estimation() {
            None => Ok(None),
            Some(e) => e.estimate(source, target, weights).map(Some),
        }
    }

    /// Commit estimated parameters.
    pub fn assign(&mut self, parameters: OperatorParameters) -> Result<(), FrameFitError> {
        let kind = self.kind();
        match self.estimation_mut() {
            Some(e) => e.assign(parameters),
            None => Err(FrameFitError::Configuration(format!(
                "operator {kind} does not accept estimated parameters"
            ))),
        }
    }

    /// Name of the PROJ operation matching this operator.
    pub fn proj_name(&self) -> String {
        match self {
            Operator::Proj(op) => op.proj_name().to_string(),
            other => other
                .proj_steps()
                .first()
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.strip_prefix("+proj="))
                .unwrap_or("noop")
                .to_string(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.title(), self.parameters().iter().join(", "))
    }
}

/// Check the inputs shared by every estimation routine.
pub(crate) fn check_estimation_input(
    source: &CoordinateMatrix,
    target: &CoordinateMatrix,
    weights: &DVector<f64>,
) -> Result<(), EstimationError> {
    if source.nrows() != target.nrows() {
        return Err(EstimationError::ShapeMismatch {
            source_rows: source.nrows(),
            target_rows: target.nrows(),
        });
    }
    if weights.len() != source.nrows() {
        return Err(EstimationError::WeightMismatch {
            weights: weights.len(),
            rows: source.nrows(),
        });
    }
    Ok(())
}

/// Add `offset` to every row.
pub(crate) fn translate_rows(coordinates: &mut CoordinateMatrix, offset: &Vector3<f64>) {
    for i in 0..coordinates.nrows() {
        for j in 0..3 {
            coordinates[(i, j)] += offset[j];
        }
    }
}
