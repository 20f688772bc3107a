//! # Helmert similarity transforms
//!
//! Two members of the Helmert family are provided:
//!
//! * [`HelmertTranslation`] – a pure shift `X' = X + T` (3 parameters).
//! * [`Helmert7Param`] – the full similarity transform
//!
//! ```text
//! X' = T + (1 + s·10⁻⁶) · R(rx, ry, rz) · X
//! ```
//!
//! with translations in meters, rotations in arcseconds and scale in ppm.
//!
//! ## Rotation matrix
//! -----------------
//! With the small-angle approximation (the default) the rotation matrix is
//!
//! ```text
//!     |  1   -rz   ry |
//! R = |  rz   1   -rx |
//!     | -ry   rx   1  |
//! ```
//!
//! otherwise the exact product `Rz · Ry · Rx` is used. Both matrices are given in
//! the *position vector* convention; the *coordinate frame* convention uses the
//! transposed matrix, which flips the sign of the rotation angles.
//!
//! ## Estimation
//! -----------------
//! Parameters are fitted with the linearized model
//!
//! ```text
//! X' − X = T + s·X + Ω·X,    Ω = R − I
//! ```
//!
//! by [`solve_weighted_least_squares`]. Coordinates are first reduced to the weighted
//! centroid of the source stations, which keeps the normal matrix well conditioned
//! for earth-centered coordinates. The translation relative to the original origin
//! is restored afterwards as `T = T' − (s·I + Ω)·c`.
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use super::{
    check_estimation_input, translate_rows, CoordinateOperation, OperatorParameters, Parameter,
    ParameterEstimation,
};
use crate::{
    constants::{ArcSec, CoordinateMatrix, Meter, Ppm, PPM, RADSEC},
    framefit_errors::{EstimationError, FrameFitError},
    least_squares::solve_weighted_least_squares,
};

/// Sign convention of the rotation angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationConvention {
    #[default]
    PositionVector,
    CoordinateFrame,
}

impl RotationConvention {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationConvention::PositionVector => "position_vector",
            RotationConvention::CoordinateFrame => "coordinate_frame",
        }
    }
}

impl std::str::FromStr for RotationConvention {
    type Err = FrameFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "position_vector" => Ok(RotationConvention::PositionVector),
            "coordinate_frame" => Ok(RotationConvention::CoordinateFrame),
            other => Err(FrameFitError::Configuration(format!(
                "unknown rotation convention '{other}'"
            ))),
        }
    }
}

/// The seven parameters of a similarity transform.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HelmertParameters {
    pub translation: Vector3<Meter>,
    pub rotation: Vector3<ArcSec>,
    pub scale: Ppm,
}

impl HelmertParameters {
    pub fn new(x: Meter, y: Meter, z: Meter, rx: ArcSec, ry: ArcSec, rz: ArcSec, s: Ppm) -> Self {
        HelmertParameters {
            translation: Vector3::new(x, y, z),
            rotation: Vector3::new(rx, ry, rz),
            scale: s,
        }
    }

    /// Non-zero parameters in PROJ naming.
    fn proj_parameters(&self) -> Vec<Parameter> {
        let values = [
            ("x", self.translation.x),
            ("y", self.translation.y),
            ("z", self.translation.z),
            ("rx", self.rotation.x),
            ("ry", self.rotation.y),
            ("rz", self.rotation.z),
            ("s", self.scale),
        ];
        values
            .into_iter()
            .filter(|(_, v)| *v != 0.0)
            .map(|(name, v)| Parameter::number(name, v))
            .collect()
    }
}

/// Which columns of the linearized model are estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HelmertModel {
    Translation,
    Similarity,
}

impl HelmertModel {
    fn unknowns(&self) -> usize {
        match self {
            HelmertModel::Translation => 3,
            HelmertModel::Similarity => 7,
        }
    }
}

/// Fit a Helmert model in the position vector convention.
///
/// Arguments
/// -----------------
/// * `source`, `target`: paired `N×3` coordinate matrices.
/// * `weights`: one weight per station, applied to its three coordinate rows.
/// * `model`: the set of parameters to estimate; the others stay zero.
///
/// Return
/// ----------
/// * The fitted parameters, rotations in arcseconds and scale in ppm.
fn fit_helmert(
    source: &CoordinateMatrix,
    target: &CoordinateMatrix,
    weights: &DVector<f64>,
    model: HelmertModel,
) -> Result<HelmertParameters, EstimationError> {
    check_estimation_input(source, target, weights)?;

    let stations = source.nrows();
    let unknowns = model.unknowns();

    let mut centroid = Vector3::zeros();
    let mut total_weight = 0.0;
    for (i, w) in weights.iter().enumerate() {
        if w.is_finite() && *w > 0.0 {
            centroid += source.row(i).transpose() * *w;
            total_weight += w;
        }
    }
    if total_weight > 0.0 {
        centroid /= total_weight;
    }

    let mut design = DMatrix::zeros(3 * stations, unknowns);
    let mut observations = DVector::zeros(3 * stations);
    let mut row_weights = DVector::zeros(3 * stations);

    for i in 0..stations {
        let (dx, dy, dz) = (
            source[(i, 0)] - centroid.x,
            source[(i, 1)] - centroid.y,
            source[(i, 2)] - centroid.z,
        );

        for axis in 0..3 {
            let row = 3 * i + axis;
            design[(row, axis)] = 1.0;
            observations[row] = target[(i, axis)] - source[(i, axis)];
            row_weights[row] = weights[i];
        }

        if model == HelmertModel::Similarity {
            // columns: rx, ry, rz, s
            let x_row = [0.0, dz, -dy, dx];
            let y_row = [-dz, 0.0, dx, dy];
            let z_row = [dy, -dx, 0.0, dz];
            for (axis, coefficients) in [x_row, y_row, z_row].iter().enumerate() {
                for (k, c) in coefficients.iter().enumerate() {
                    design[(3 * i + axis, 3 + k)] = *c;
                }
            }
        }
    }

    let solution = solve_weighted_least_squares(&design, &observations, &row_weights)?;
    let p = &solution.parameters;

    let shifted = Vector3::new(p[0], p[1], p[2]);
    let parameters = match model {
        HelmertModel::Translation => HelmertParameters {
            translation: shifted,
            ..Default::default()
        },
        HelmertModel::Similarity => {
            let (rx, ry, rz, s) = (p[3], p[4], p[5], p[6]);
            let omega = Matrix3::new(0.0, -rz, ry, rz, 0.0, -rx, -ry, rx, 0.0);
            let translation = shifted - (omega + Matrix3::identity() * s) * centroid;
            HelmertParameters {
                translation,
                rotation: Vector3::new(rx, ry, rz) / RADSEC,
                scale: s / PPM,
            }
        }
    };

    tracing::debug!(
        "helmert fit: {} weighted observations, rank {}, weighted SSE {:.6e}",
        solution.observations,
        solution.rank,
        solution.weighted_sse
    );

    Ok(parameters)
}

/// Translation-only Helmert transform, `X' = X + T`.
///
/// Built with [`HelmertTranslation::new`] the translation is estimated by the
/// pipeline; built with [`HelmertTranslation::with_translation`] it is fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct HelmertTranslation {
    pub label: Option<String>,
    translation: Vector3<Meter>,
    fixed: bool,
}

impl HelmertTranslation {
    /// An estimating translation, starting from a zero shift.
    pub fn new(label: Option<String>) -> Self {
        HelmertTranslation {
            label,
            translation: Vector3::zeros(),
            fixed: false,
        }
    }

    /// A translation with fixed parameters.
    pub fn with_translation(label: Option<String>, translation: Vector3<Meter>) -> Self {
        HelmertTranslation {
            label,
            translation,
            fixed: true,
        }
    }

    pub fn translation(&self) -> &Vector3<Meter> {
        &self.translation
    }
}

impl CoordinateOperation for HelmertTranslation {
    fn forward(&self, coordinates: &CoordinateMatrix) -> Result<CoordinateMatrix, FrameFitError> {
        let mut out = coordinates.clone();
        translate_rows(&mut out, &self.translation);
        Ok(out)
    }

    fn inverse(
        &self,
        coordinates: &CoordinateMatrix,
    ) -> Option<Result<CoordinateMatrix, FrameFitError>> {
        let mut out = coordinates.clone();
        translate_rows(&mut out, &-self.translation);
        Some(Ok(out))
    }

    fn has_inverse(&self) -> bool {
        true
    }

    fn parameters(&self) -> Vec<Parameter> {
        HelmertParameters {
            translation: self.translation,
            ..Default::default()
        }
        .proj_parameters()
    }

    fn proj_steps(&self) -> Vec<String> {
        let params = self.parameters();
        if params.is_empty() {
            return vec!["+proj=noop".to_string()];
        }
        let mut step = vec!["+proj=helmert".to_string()];
        step.extend(params.iter().map(Parameter::as_proj_param));
        vec![step.join(" ")]
    }
}

impl ParameterEstimation for HelmertTranslation {
    fn parameter_count(&self) -> usize {
        3
    }

    fn is_fixed(&self) -> bool {
        self.fixed
    }

    fn estimate(
        &self,
        source: &CoordinateMatrix,
        target: &CoordinateMatrix,
        weights: &DVector<f64>,
    ) -> Result<OperatorParameters, FrameFitError> {
        if self.fixed {
            return Ok(OperatorParameters::Translation(self.translation));
        }
        let fitted = fit_helmert(source, target, weights, HelmertModel::Translation)?;
        Ok(OperatorParameters::Translation(fitted.translation))
    }

    fn assign(&mut self, parameters: OperatorParameters) -> Result<(), FrameFitError> {
        if self.fixed {
            return Ok(());
        }
        match parameters {
            OperatorParameters::Translation(t) => {
                self.translation = t;
                Ok(())
            }
            other => Err(FrameFitError::Configuration(format!(
                "helmert_translation cannot take parameters {other:?}"
            ))),
        }
    }
}

/// Seven-parameter Helmert transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Helmert7Param {
    pub label: Option<String>,
    parameters: HelmertParameters,
    convention: RotationConvention,
    small_angle: bool,
    fixed: bool,
}

impl Helmert7Param {
    /// An estimating transform using the small-angle rotation matrix.
    pub fn new(label: Option<String>, convention: RotationConvention) -> Self {
        Helmert7Param {
            label,
            parameters: HelmertParameters::default(),
            convention,
            small_angle: true,
            fixed: false,
        }
    }

    /// A transform with fixed parameters.
    pub fn with_parameters(
        label: Option<String>,
        parameters: HelmertParameters,
        convention: RotationConvention,
    ) -> Self {
        Helmert7Param {
            label,
            parameters,
            convention,
            small_angle: true,
            fixed: true,
        }
    }

    /// Use the exact rotation matrix `Rz·Ry·Rx` instead of the small-angle one.
    pub fn with_small_angle_approximation(mut self, small_angle: bool) -> Self {
        self.small_angle = small_angle;
        self
    }

    pub fn helmert_parameters(&self) -> &HelmertParameters {
        &self.parameters
    }

    pub fn convention(&self) -> RotationConvention {
        self.convention
    }

    pub fn small_angle_approximation(&self) -> bool {
        self.small_angle
    }

    /// Unitless scale factor `1 + s·10⁻⁶`.
    pub fn scale_factor(&self) -> f64 {
        1.0 + self.parameters.scale * PPM
    }

    /// Rotation matrix acting on column vectors, convention applied.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        let r = self.parameters.rotation * RADSEC;
        let (rx, ry, rz) = (r.x, r.y, r.z);

        let rotation = if self.small_angle {
            Matrix3::new(1.0, -rz, ry, rz, 1.0, -rx, -ry, rx, 1.0)
        } else {
            let (sx, cx) = rx.sin_cos();
            let (sy, cy) = ry.sin_cos();
            let (sz, cz) = rz.sin_cos();
            let rot_x = Matrix3::new(1.0, 0.0, 0.0, 0.0, cx, -sx, 0.0, sx, cx);
            let rot_y = Matrix3::new(cy, 0.0, sy, 0.0, 1.0, 0.0, -sy, 0.0, cy);
            let rot_z = Matrix3::new(cz, -sz, 0.0, sz, cz, 0.0, 0.0, 0.0, 1.0);
            rot_z * rot_y * rot_x
        };

        match self.convention {
            RotationConvention::PositionVector => rotation,
            RotationConvention::CoordinateFrame => rotation.transpose(),
        }
    }
}

impl CoordinateOperation for Helmert7Param {
    fn forward(&self, coordinates: &CoordinateMatrix) -> Result<CoordinateMatrix, FrameFitError> {
        // rows are points, so X·(sR)ᵀ
        let m = (self.rotation_matrix() * self.scale_factor()).transpose();
        let mut out: CoordinateMatrix = coordinates * m;
        translate_rows(&mut out, &self.parameters.translation);
        Ok(out)
    }

    fn inverse(
        &self,
        coordinates: &CoordinateMatrix,
    ) -> Option<Result<CoordinateMatrix, FrameFitError>> {
        let scale = self.scale_factor();
        if scale == 0.0 || !scale.is_finite() {
            return Some(Err(FrameFitError::Configuration(format!(
                "scale of {} ppm cannot be inverted",
                self.parameters.scale
            ))));
        }
        let Some(inverse_rotation) = self.rotation_matrix().try_inverse() else {
            return Some(Err(FrameFitError::Configuration(
                "rotation matrix is not invertible".to_string(),
            )));
        };

        let mut shifted = coordinates.clone();
        translate_rows(&mut shifted, &-self.parameters.translation);
        let m = (inverse_rotation / scale).transpose();
        Some(Ok(shifted * m))
    }

    fn has_inverse(&self) -> bool {
        true
    }

    fn parameters(&self) -> Vec<Parameter> {
        let mut params = self.parameters.proj_parameters();
        params.push(Parameter::text("convention", self.convention.as_str()));
        if self.small_angle {
            params.push(Parameter::flag("approx"));
        }
        params
    }

    fn proj_steps(&self) -> Vec<String> {
        let mut step = vec!["+proj=helmert".to_string()];
        step.extend(self.parameters().iter().map(Parameter::as_proj_param));
        vec![step.join(" ")]
    }
}

impl ParameterEstimation for Helmert7Param {
    fn parameter_count(&self) -> usize {
        7
    }

    fn is_fixed(&self) -> bool {
        self.fixed
    }

    fn estimate(
        &self,
        source: &CoordinateMatrix,
        target: &CoordinateMatrix,
        weights: &DVector<f64>,
    ) -> Result<OperatorParameters, FrameFitError> {
        if self.fixed {
            return Ok(OperatorParameters::Helmert(self.parameters));
        }

        let mut fitted = fit_helmert(source, target, weights, HelmertModel::Similarity)?;
        if self.convention == RotationConvention::CoordinateFrame {
            fitted.rotation = -fitted.rotation;
        }
        Ok(OperatorParameters::Helmert(fitted))
    }

    fn assign(&mut self, parameters: OperatorParameters) -> Result<(), FrameFitError> {
        if self.fixed {
            return Ok(());
        }
        match parameters {
            OperatorParameters::Helmert(p) => {
                self.parameters = p;
                Ok(())
            }
            other => Err(FrameFitError::Configuration(format!(
                "helmert_7param cannot take parameters {other:?}"
            ))),
        }
    }
}
