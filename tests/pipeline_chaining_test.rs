mod common;

use approx::assert_abs_diff_eq;
use common::{assert_helmert_close, data_dir, reference_helmert};
use framefit::{
    datasources::{BerneseCrdDataSource, CsvDataSource, DataSource},
    operators::{
        DummyOperator, Helmert7Param, HelmertTranslation, Operator, OperatorParameters,
        ProjOperator, RotationConvention,
    },
    presenters::{Presenter, ProjPresenter},
    Pipeline,
};

fn load_sets() -> (
    framefit::coordinates::CoordinateSet,
    framefit::coordinates::CoordinateSet,
) {
    let source = DataSource::Csv(CsvDataSource::new("source.csv"))
        .load(Some(&data_dir()))
        .unwrap();
    let target = DataSource::BerneseCrd(BerneseCrdDataSource {
        discard_flags: vec!["X".into()],
        ..BerneseCrdDataSource::new("target.CRD")
    })
    .load(Some(&data_dir()))
    .unwrap();
    (source, target)
}

#[test]
fn test_translation_then_seven_parameters() {
    let (source, target) = load_sets();
    let mut pipeline = Pipeline::new(
        source,
        target,
        vec![
            Operator::HelmertTranslation(HelmertTranslation::new(Some("shift".into()))),
            Operator::Helmert7Param(Helmert7Param::new(
                Some("helmert".into()),
                RotationConvention::PositionVector,
            )),
        ],
    );
    let run = pipeline.run().unwrap();
    let [shift, helmert] = run.results() else {
        panic!("two stages expected")
    };

    // a pure shift cannot absorb the rotation and scale
    assert!(shift.statistics.rms_3d > 1e-3);
    assert!(helmert.statistics.rms_3d < 1e-4);
    assert!(helmert.statistics.rms_3d < shift.statistics.rms_3d);

    // the second stage starts from the shifted coordinates
    let Some(OperatorParameters::Helmert(residual)) = &helmert.estimated else {
        panic!("helmert parameters expected")
    };
    assert_abs_diff_eq!(residual.rotation.z, 0.003, epsilon = 1e-4);
    assert_abs_diff_eq!(residual.scale, 0.015, epsilon = 1e-3);

    let mut presenter = ProjPresenter::default();
    presenter.evaluate(&run);
    let projstring = presenter.proj_string();
    assert!(projstring.starts_with("+proj=pipeline +step +proj=helmert +x="));
    assert_eq!(projstring.matches("+step").count(), 2);
}

#[test]
fn test_cartesian_round_trip_does_not_disturb_fit() {
    let (source, target) = load_sets();
    let mut pipeline = Pipeline::new(
        source,
        target,
        vec![
            Operator::Proj(
                ProjOperator::new(
                    Some("geodetic round trip".into()),
                    "+proj=pipeline +ellps=GRS80 +step +inv +proj=cart +step +proj=cart",
                )
                .unwrap(),
            ),
            Operator::Dummy(DummyOperator::default()),
            Operator::Helmert7Param(Helmert7Param::new(None, RotationConvention::PositionVector)),
        ],
    );
    let run = pipeline.run().unwrap();

    let round_trip = &run.results()[0];
    assert!(round_trip.parameters.is_none());
    assert!(round_trip.estimated.is_none());
    let original = pipeline.source().coordinate_matrix();
    let back = round_trip.transformed_source.coordinate_matrix();
    assert!((back - original).abs().max() < 1e-6);

    assert_helmert_close(
        run.results()[2].estimated.as_ref().unwrap(),
        &reference_helmert(),
    );

    let mut presenter = ProjPresenter::default();
    presenter.evaluate(&run);
    assert!(presenter.proj_string().starts_with(
        "+proj=pipeline +step +inv +proj=cart +ellps=GRS80 +step +proj=cart +ellps=GRS80 \
         +step +proj=helmert"
    ));
}

#[test]
fn test_fitted_operator_inverse_restores_source() {
    let (source, target) = load_sets();
    let mut pipeline = Pipeline::new(
        source.clone(),
        target,
        vec![Operator::Helmert7Param(
            Helmert7Param::new(None, RotationConvention::CoordinateFrame)
                .with_small_angle_approximation(false),
        )],
    );
    let run = pipeline.run().unwrap();
    assert!(run.final_statistics().rms_3d < 1e-4);

    // coordinate frame convention flips the rotation signs
    let Some(OperatorParameters::Helmert(fitted)) = &run.results()[0].estimated else {
        panic!("helmert parameters expected")
    };
    assert_abs_diff_eq!(fitted.rotation.x, -0.002, epsilon = 1e-4);

    let operator = &pipeline.operators()[0];
    assert!(operator.has_inverse());
    let forward = run.final_coordinates().coordinate_matrix();
    let inverse = operator.inverse(&forward).unwrap().unwrap();
    assert!((inverse - source.coordinate_matrix()).abs().max() < 1e-6);
}
