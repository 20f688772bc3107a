//! # Constants and type definitions for framefit
//!
//! This module centralizes the **unit conversions**, **reference ellipsoids**,
//! **numerical tolerances** and **common type aliases** used throughout the crate.
//!
//! ## Overview
//!
//! - Angle and scale conversions (arcseconds ↔ radians, ppm ↔ unitless)
//! - GRS80 / WGS84 ellipsoid definitions used by the `cart` conversion
//! - Tolerances for rank detection and epoch validation
//! - Core type aliases shared by coordinates, operators and the pipeline

use nalgebra::{Dyn, OMatrix, U3};

// -------------------------------------------------------------------------------------------------
// Unit conversions
// -------------------------------------------------------------------------------------------------

/// Degrees → radians
pub const RADEG: f64 = std::f64::consts::PI / 180.0;

/// Arcseconds → radians
pub const RADSEC: f64 = std::f64::consts::PI / 648000.0;

/// Parts per million → unitless factor
pub const PPM: f64 = 1e-6;

// -------------------------------------------------------------------------------------------------
// Reference ellipsoids
// -------------------------------------------------------------------------------------------------

/// Semi-major axis of GRS80 and WGS84 in meters
pub const ELLIPSOID_MAJOR_AXIS: f64 = 6_378_137.0;

/// Inverse flattening of GRS80
pub const GRS80_INV_FLATTENING: f64 = 298.257_222_101;

/// Inverse flattening of WGS84
pub const WGS84_INV_FLATTENING: f64 = 298.257_223_563;

// -------------------------------------------------------------------------------------------------
// Numerical tolerances
// -------------------------------------------------------------------------------------------------

/// Relative singular value threshold below which the normal matrix is treated as rank deficient
pub const RANK_TOLERANCE: f64 = 1e-10;

/// Convergence threshold (radians) for the iterative ECEF → geodetic latitude
pub const LATITUDE_EPS: f64 = 1e-12;

/// Maximum iterations for the ECEF → geodetic latitude loop
pub const LATITUDE_MAX_ITER: usize = 10;

/// Valid range for epochs given as decimal years
pub const EPOCH_RANGE: std::ops::RangeInclusive<f64> = 0.0..=10_000.0;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Distance in meters
pub type Meter = f64;
/// Angle in arcseconds
pub type ArcSec = f64;
/// Scale difference in parts per million
pub type Ppm = f64;
/// Epoch expressed as a decimal year (e.g. `2015.5`)
pub type DecimalYear = f64;
/// Station identifier
pub type StationId = String;

/// N×3 matrix of cartesian coordinates, one station per row.
pub type CoordinateMatrix = OMatrix<f64, Dyn, U3>;
