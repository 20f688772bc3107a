//! # Weighted linear least squares
//!
//! Stateless primitive used by estimating operators. Given a design matrix `A`,
//! an observation vector `b` and diagonal weights `w`, [`solve_weighted_least_squares`]
//! returns the parameter vector minimizing
//!
//! ```text
//! (A·p − b)ᵀ · W · (A·p − b),    W = diag(w)
//! ```
//!
//! by solving the normal equations `(AᵀWA) p = AᵀWb`.
//!
//! ## Numerical approach
//! -----------------
//! Columns of a geodetic design matrix have wildly different magnitudes (unit
//! translation columns next to rotation columns scaled by coordinates of several
//! thousand kilometers). The normal matrix is therefore Jacobi-scaled to unit
//! diagonal before a singular value decomposition. A relative singular value
//! below [`RANK_TOLERANCE`] marks the system as rank deficient and the solver
//! fails with [`SolverError::Singular`] instead of returning non-finite numbers.
//!
//! ## Errors
//! -----------------
//! * [`SolverError::ShapeMismatch`] / [`SolverError::InvalidWeight`] – malformed input.
//! * [`SolverError::Underdetermined`] – fewer positively weighted rows than unknowns.
//! * [`SolverError::Singular`] – insufficient geometry.
use nalgebra::{DMatrix, DVector, SVD};

use crate::{constants::RANK_TOLERANCE, framefit_errors::SolverError};

/// Outcome of a weighted least-squares fit.
///
/// Fields
/// -----------------
/// * `parameters` – the fitted parameter vector `p`.
/// * `weighted_sse` – the minimized objective `(Ap − b)ᵀ W (Ap − b)`.
/// * `observations` – number of rows with a strictly positive weight.
/// * `rank` – numerical rank of the (scaled) normal matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresSolution {
    pub parameters: DVector<f64>,
    pub weighted_sse: f64,
    pub observations: usize,
    pub rank: usize,
}

/// Solve a weighted linear least-squares problem.
///
/// Arguments
/// -----------------
/// * `design`: the `m × n` design matrix `A`.
/// * `observations`: the length-`m` observation vector `b`.
/// * `weights`: the length-`m` diagonal of `W`; zero excludes a row.
///
/// Return
/// ----------
/// * A [`LeastSquaresSolution`] on success, a [`SolverError`] otherwise.
pub fn solve_weighted_least_squares(
    design: &DMatrix<f64>,
    observations: &DVector<f64>,
    weights: &DVector<f64>,
) -> Result<LeastSquaresSolution, SolverError> {
    let (rows, cols) = design.shape();
    if observations.len() != rows || weights.len() != rows {
        return Err(SolverError::ShapeMismatch {
            design_rows: rows,
            observations: observations.len(),
            weights: weights.len(),
        });
    }

    if let Some((row, value)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !w.is_finite() || **w < 0.0)
    {
        return Err(SolverError::InvalidWeight { row, value: *value });
    }

    let used = weights.iter().filter(|w| **w > 0.0).count();
    if used < cols {
        return Err(SolverError::Underdetermined {
            observations: used,
            parameters: cols,
        });
    }

    let weighted_design = DMatrix::from_fn(rows, cols, |i, j| design[(i, j)] * weights[i]);
    let normal = design.transpose() * &weighted_design;
    let rhs = weighted_design.transpose() * observations;

    // Jacobi scaling, a zero column keeps a zero factor and shows up as rank loss
    let scale = DVector::from_iterator(
        cols,
        normal
            .diagonal()
            .iter()
            .map(|d| if *d > 0.0 { 1.0 / d.sqrt() } else { 0.0 }),
    );
    let scaled = DMatrix::from_fn(cols, cols, |i, j| normal[(i, j)] * scale[i] * scale[j]);

    let svd = SVD::new(scaled, true, true);
    let largest = svd.singular_values.max();
    let tolerance = RANK_TOLERANCE * largest.max(f64::MIN_POSITIVE);
    let rank = svd.rank(tolerance);
    if rank < cols {
        return Err(SolverError::Singular {
            rank,
            parameters: cols,
        });
    }

    let reduced = svd
        .solve(&rhs.component_mul(&scale), tolerance)
        .map_err(|_| SolverError::Singular {
            rank,
            parameters: cols,
        })?;
    let parameters = reduced.component_mul(&scale);

    if parameters.iter().any(|p| !p.is_finite()) {
        return Err(SolverError::Singular {
            rank,
            parameters: cols,
        });
    }

    let residuals = design * &parameters - observations;
    let weighted_sse = residuals
        .iter()
        .zip(weights.iter())
        .map(|(r, w)| w * r * r)
        .sum();

    Ok(LeastSquaresSolution {
        parameters,
        weighted_sse,
        observations: used,
        rank,
    })
}
