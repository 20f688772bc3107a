use std::path::PathBuf;

use approx::assert_abs_diff_eq;
use framefit::operators::{HelmertParameters, OperatorParameters};

/// Parameters used to produce `tests/data/target.CRD` from `tests/data/source.csv`
/// (small-angle position vector rotation).
pub fn reference_helmert() -> HelmertParameters {
    HelmertParameters::new(0.05, -0.03, 0.12, 0.002, -0.001, 0.003, 0.015)
}

pub fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("data")
}

pub fn assert_helmert_close(actual: &OperatorParameters, expected: &HelmertParameters) {
    let OperatorParameters::Helmert(actual) = actual else {
        panic!("expected Helmert parameters, got {actual:?}");
    };
    for i in 0..3 {
        assert_abs_diff_eq!(actual.translation[i], expected.translation[i], epsilon = 1e-3);
        assert_abs_diff_eq!(actual.rotation[i], expected.rotation[i], epsilon = 1e-4);
    }
    assert_abs_diff_eq!(actual.scale, expected.scale, epsilon = 1e-3);
}
