//! # PROJ-string operator
//!
//! A fixed transformation described by a PROJ-style string. The operator never
//! estimates anything: it is used for well-known frame changes placed before or
//! after estimated stages.
//!
//! ## Supported operations
//! -----------------
//! | Operation | Parameters | Coordinates |
//! |---|---|---|
//! | `noop` | – | any |
//! | `helmert` | `x y z rx ry rz s convention approx` | ECEF meters |
//! | `cart` | `ellps=GRS80\|WGS84` | geodetic (lon°, lat°, h m) ↔ ECEF meters |
//! | `pipeline` | `+step` entries, each optionally with `+inv` | chained |
//!
//! Parameters placed before the first `+step` of a pipeline are global and
//! passed to every step that understands them. A global no step understands is
//! rejected.
//!
//! A string using anything else is rejected at construction with
//! [`FrameFitError::Configuration`].
use std::sync::LazyLock;

use regex::Regex;

use super::{
    helmert::{Helmert7Param, HelmertParameters, RotationConvention},
    CoordinateOperation, Parameter,
};
use crate::{
    constants::{
        CoordinateMatrix, ELLIPSOID_MAJOR_AXIS, GRS80_INV_FLATTENING, LATITUDE_EPS,
        LATITUDE_MAX_ITER, RADEG, WGS84_INV_FLATTENING,
    },
    framefit_errors::FrameFitError,
};

static PROJ_TOKEN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\+?([a-z_][a-z0-9_]*)(?:=(\S+))?$"));

const HELMERT_KEYS: [&str; 9] = ["x", "y", "z", "rx", "ry", "rz", "s", "convention", "approx"];

/// Reference ellipsoid of a `cart` step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    pub name: &'static str,
    pub semi_major_axis: f64,
    pub inverse_flattening: f64,
}

impl Ellipsoid {
    pub const GRS80: Ellipsoid = Ellipsoid {
        name: "GRS80",
        semi_major_axis: ELLIPSOID_MAJOR_AXIS,
        inverse_flattening: GRS80_INV_FLATTENING,
    };

    pub const WGS84: Ellipsoid = Ellipsoid {
        name: "WGS84",
        semi_major_axis: ELLIPSOID_MAJOR_AXIS,
        inverse_flattening: WGS84_INV_FLATTENING,
    };

    fn from_name(name: &str) -> Result<Self, FrameFitError> {
        match name {
            "GRS80" => Ok(Ellipsoid::GRS80),
            "WGS84" => Ok(Ellipsoid::WGS84),
            other => Err(FrameFitError::Configuration(format!(
                "unsupported ellipsoid '{other}'"
            ))),
        }
    }

    /// First eccentricity squared.
    pub fn eccentricity_squared(&self) -> f64 {
        let f = 1.0 / self.inverse_flattening;
        f * (2.0 - f)
    }

    /// Prime vertical radius of curvature at geodetic latitude `lat` (radians).
    fn prime_vertical_radius(&self, lat: f64) -> f64 {
        let s = lat.sin();
        self.semi_major_axis / (1.0 - self.eccentricity_squared() * s * s).sqrt()
    }

    /// Geodetic (lon°, lat°, h) to earth-centered cartesian coordinates.
    pub fn geodetic_to_cartesian(&self, lon: f64, lat: f64, h: f64) -> [f64; 3] {
        let (lam, phi) = (lon * RADEG, lat * RADEG);
        let n = self.prime_vertical_radius(phi);
        let e2 = self.eccentricity_squared();
        [
            (n + h) * phi.cos() * lam.cos(),
            (n + h) * phi.cos() * lam.sin(),
            (n * (1.0 - e2) + h) * phi.sin(),
        ]
    }

    /// Earth-centered cartesian to geodetic (lon°, lat°, h) coordinates.
    ///
    /// The latitude is found by fixed-point iteration on
    /// `tan φ = Z / (p · (1 − e²·N / (N + h)))`, which converges to machine
    /// precision in a handful of steps for terrestrial heights.
    pub fn cartesian_to_geodetic(&self, x: f64, y: f64, z: f64) -> [f64; 3] {
        let e2 = self.eccentricity_squared();
        let p = x.hypot(y);
        let lam = y.atan2(x);

        // stable at the poles, unlike p / cos φ − N
        let height = |phi: f64| {
            p * phi.cos() + z * phi.sin()
                - self.semi_major_axis * self.semi_major_axis / self.prime_vertical_radius(phi)
        };

        let mut phi = z.atan2(p * (1.0 - e2));
        for _ in 0..LATITUDE_MAX_ITER {
            let n = self.prime_vertical_radius(phi);
            let next = z.atan2(p * (1.0 - e2 * n / (n + height(phi))));
            let converged = (next - phi).abs() < LATITUDE_EPS;
            phi = next;
            if converged {
                break;
            }
        }

        [lam / RADEG, phi / RADEG, height(phi)]
    }
}

#[derive(Debug, Clone, PartialEq)]
enum StepKind {
    Noop,
    Helmert(Helmert7Param),
    Cart(Ellipsoid),
}

impl StepKind {
    fn accepts(name: &str, key: &str) -> bool {
        match name {
            "helmert" => HELMERT_KEYS.contains(&key),
            "cart" => key == "ellps",
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ProjStep {
    kind: StepKind,
    inverse: bool,
    /// Normalized `+key=value` tokens of the step.
    tokens: Vec<String>,
}

type Token = (String, Option<String>);

impl ProjStep {
    fn parse(tokens: &[Token], globals: &[Token]) -> Result<Self, FrameFitError> {
        let name = tokens
            .iter()
            .find(|(k, _)| k == "proj")
            .and_then(|(_, v)| v.clone())
            .ok_or_else(|| {
                FrameFitError::Configuration("PROJ step without a '+proj=' entry".to_string())
            })?;

        let mut params: Vec<Token> = globals
            .iter()
            .filter(|(k, _)| StepKind::accepts(&name, k) && !tokens.iter().any(|(t, _)| t == k))
            .cloned()
            .collect();
        let mut inverse = false;
        for (key, value) in tokens {
            match key.as_str() {
                "proj" => {}
                "inv" => inverse = true,
                k if StepKind::accepts(&name, k) => params.push((key.clone(), value.clone())),
                k => {
                    return Err(FrameFitError::Configuration(format!(
                        "unknown parameter '+{k}' for proj={name}"
                    )))
                }
            }
        }

        let kind = match name.as_str() {
            "noop" => StepKind::Noop,
            "helmert" => StepKind::Helmert(parse_helmert(&params)?),
            "cart" => {
                let ellps = params
                    .iter()
                    .find(|(k, _)| k == "ellps")
                    .and_then(|(_, v)| v.as_deref())
                    .unwrap_or("GRS80");
                StepKind::Cart(Ellipsoid::from_name(ellps)?)
            }
            "pipeline" => {
                return Err(FrameFitError::Configuration(
                    "nested PROJ pipelines are not supported".to_string(),
                ))
            }
            other => {
                return Err(FrameFitError::Configuration(format!(
                    "unsupported PROJ operation '{other}'"
                )))
            }
        };

        let mut normalized = vec![format!("+proj={name}")];
        if inverse {
            normalized.insert(0, "+inv".to_string());
        }
        normalized.extend(params.iter().map(|(k, v)| match v {
            Some(v) => format!("+{k}={v}"),
            None => format!("+{k}"),
        }));

        Ok(ProjStep {
            kind,
            inverse,
            tokens: normalized,
        })
    }

    fn apply(
        &self,
        coordinates: &CoordinateMatrix,
        inverse: bool,
    ) -> Result<CoordinateMatrix, FrameFitError> {
        match &self.kind {
            StepKind::Noop => Ok(coordinates.clone()),
            StepKind::Helmert(op) if inverse => op.inverse(coordinates).unwrap_or_else(|| {
                Err(FrameFitError::Configuration(
                    "helmert step has no inverse".to_string(),
                ))
            }),
            StepKind::Helmert(op) => op.forward(coordinates),
            StepKind::Cart(ellps) => {
                let mut out = coordinates.clone();
                for i in 0..out.nrows() {
                    let (a, b, c) = (out[(i, 0)], out[(i, 1)], out[(i, 2)]);
                    let converted = if inverse {
                        ellps.cartesian_to_geodetic(a, b, c)
                    } else {
                        ellps.geodetic_to_cartesian(a, b, c)
                    };
                    for (j, v) in converted.iter().enumerate() {
                        out[(i, j)] = *v;
                    }
                }
                Ok(out)
            }
        }
    }
}

fn parse_number(key: &str, value: Option<&str>) -> Result<f64, FrameFitError> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            FrameFitError::Configuration(format!(
                "PROJ parameter '+{key}' needs a numeric value, got {value:?}"
            ))
        })
}

fn parse_helmert(params: &[Token]) -> Result<Helmert7Param, FrameFitError> {
    let mut values = [0.0; 7];
    let mut convention = None;
    let mut approx = false;

    for (key, value) in params {
        match key.as_str() {
            "convention" => {
                let text = value.as_deref().unwrap_or_default();
                convention = Some(text.parse::<RotationConvention>()?);
            }
            "approx" => approx = true,
            k => {
                let idx = HELMERT_KEYS
                    .iter()
                    .position(|name| *name == k)
                    .filter(|idx| *idx < 7)
                    .ok_or_else(|| {
                        FrameFitError::Configuration(format!("unknown helmert parameter '+{k}'"))
                    })?;
                values[idx] = parse_number(k, value.as_deref())?;
            }
        }
    }

    let rotated = values[3..6].iter().any(|r| *r != 0.0);
    let convention = match convention {
        Some(c) => c,
        None if rotated => {
            return Err(FrameFitError::Configuration(
                "helmert rotations require '+convention'".to_string(),
            ))
        }
        None => RotationConvention::PositionVector,
    };

    let [x, y, z, rx, ry, rz, s] = values;
    Ok(
        Helmert7Param::with_parameters(
            None,
            HelmertParameters::new(x, y, z, rx, ry, rz, s),
            convention,
        )
        .with_small_angle_approximation(approx),
    )
}

fn tokenize(proj_string: &str) -> Result<Vec<Token>, FrameFitError> {
    let pattern = PROJ_TOKEN
        .as_ref()
        .map_err(|e| FrameFitError::Configuration(e.to_string()))?;

    proj_string
        .split_whitespace()
        .map(|token| {
            let caps = pattern.captures(token).ok_or_else(|| {
                FrameFitError::Configuration(format!("malformed PROJ token '{token}'"))
            })?;
            Ok((
                caps[1].to_string(),
                caps.get(2).map(|m| m.as_str().to_string()),
            ))
        })
        .collect()
}

/// Fixed transformation given as a PROJ-style string.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjOperator {
    pub label: Option<String>,
    proj_string: String,
    name: String,
    steps: Vec<ProjStep>,
}

impl ProjOperator {
    /// Parse and validate a PROJ string.
    ///
    /// Arguments
    /// -----------------
    /// * `label`: optional user label.
    /// * `proj_string`: e.g. `"+proj=pipeline +step +proj=cart +step +proj=helmert +x=1"`.
    ///
    /// Errors
    /// ----------
    /// * `FrameFitError::Configuration` on malformed tokens, unknown operations,
    ///   unknown parameters or non-numeric values.
    pub fn new(label: Option<String>, proj_string: &str) -> Result<Self, FrameFitError> {
        let tokens = tokenize(proj_string)?;
        let first = tokens.iter().find(|(k, _)| k == "proj").ok_or_else(|| {
            FrameFitError::Configuration(format!("'{proj_string}' has no '+proj=' entry"))
        })?;
        let name = first.1.clone().unwrap_or_default();

        let steps = if name == "pipeline" {
            let mut groups = tokens.split(|(k, _)| k == "step");
            let globals: Vec<Token> = groups
                .next()
                .unwrap_or_default()
                .iter()
                .filter(|(k, _)| k != "proj")
                .cloned()
                .collect();
            let groups: Vec<&[Token]> = groups.collect();
            if groups.is_empty() {
                return Err(FrameFitError::Configuration(
                    "PROJ pipeline without any '+step'".to_string(),
                ));
            }

            let step_names: Vec<&str> = groups
                .iter()
                .filter_map(|group| group.iter().find(|(k, _)| k == "proj"))
                .filter_map(|(_, v)| v.as_deref())
                .collect();
            if let Some((key, _)) = globals
                .iter()
                .find(|(k, _)| !step_names.iter().any(|name| StepKind::accepts(name, k)))
            {
                return Err(FrameFitError::Configuration(format!(
                    "global parameter '+{key}' is not used by any pipeline step"
                )));
            }

            groups
                .into_iter()
                .map(|group| ProjStep::parse(group, &globals))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            vec![ProjStep::parse(&tokens, &[])?]
        };

        Ok(ProjOperator {
            label,
            proj_string: proj_string.to_string(),
            name,
            steps,
        })
    }

    pub fn proj_string(&self) -> &str {
        &self.proj_string
    }

    /// Name of the outermost PROJ operation, `pipeline` for pipelines.
    pub fn proj_name(&self) -> &str {
        &self.name
    }
}

impl CoordinateOperation for ProjOperator {
    fn forward(&self, coordinates: &CoordinateMatrix) -> Result<CoordinateMatrix, FrameFitError> {
        self.steps
            .iter()
            .try_fold(coordinates.clone(), |acc, step| step.apply(&acc, step.inverse))
    }

    fn inverse(
        &self,
        coordinates: &CoordinateMatrix,
    ) -> Option<Result<CoordinateMatrix, FrameFitError>> {
        Some(
            self.steps
                .iter()
                .rev()
                .try_fold(coordinates.clone(), |acc, step| step.apply(&acc, !step.inverse)),
        )
    }

    fn has_inverse(&self) -> bool {
        true
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.proj_string
            .split_whitespace()
            .filter(|t| t.trim_start_matches('+') != "proj=pipeline")
            .map(|t| {
                let t = t.trim_start_matches('+');
                match t.split_once('=') {
                    Some((k, v)) => match v.parse::<f64>() {
                        Ok(n) => Parameter::number(k, n),
                        Err(_) => Parameter::text(k, v),
                    },
                    None => Parameter::flag(t),
                }
            })
            .collect()
    }

    fn proj_steps(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.tokens.join(" ")).collect()
    }
}
