//! # Transformation pipeline
//!
//! A [`Pipeline`] chains [`Operator`]s between a fixed *target* coordinate set and a
//! *source* set that is carried through every stage:
//!
//! ```text
//! source ──▶ [op 0] ──▶ source' ──▶ [op 1] ──▶ source'' ─ … ─▶ final coordinates
//!              ▲                       ▲
//!              └──────── target ───────┘   (pairing + estimation)
//! ```
//!
//! For stage `i` the engine
//!
//! 1. pairs the current source with the target by station, keeping pairs with a
//!    positive combined weight,
//! 2. lets an estimating operator fit its parameters on those pairs and commits them,
//! 3. applies `forward` to **all** current source stations, paired or not,
//! 4. records an [`OperatorResult`] with residuals `transformed − target`.
//!
//! Later stages therefore estimate on whatever the earlier stages left unexplained.
//! Execution stops at the first failing stage; the error is wrapped with
//! [`FrameFitError::in_stage`] and no partial [`PipelineRun`] is produced.
pub mod run;

use crate::{
    coordinates::{
        overrides::{aggregate, Role},
        CoordinateSet, StationPairing,
    },
    framefit_errors::FrameFitError,
    operators::Operator,
};

pub use run::{residuals_between, OperatorResult, PipelineRun, ResidualStats, StationResidual};

/// Ordered operators together with the coordinate sets they act on.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    source: CoordinateSet,
    target: CoordinateSet,
    operators: Vec<Operator>,
}

impl Pipeline {
    pub fn new(source: CoordinateSet, target: CoordinateSet, operators: Vec<Operator>) -> Self {
        Pipeline {
            source,
            target,
            operators,
        }
    }

    /// Build a pipeline from several sets per role, merged with [`aggregate`].
    ///
    /// Errors
    /// ----------
    /// * `FrameFitError::Configuration` if a role has no set.
    pub fn from_sets(
        sources: Vec<CoordinateSet>,
        targets: Vec<CoordinateSet>,
        operators: Vec<Operator>,
    ) -> Result<Self, FrameFitError> {
        Ok(Pipeline::new(
            aggregate(Role::Source, sources)?,
            aggregate(Role::Target, targets)?,
            operators,
        ))
    }

    pub fn source(&self) -> &CoordinateSet {
        &self.source
    }

    pub fn target(&self) -> &CoordinateSet {
        &self.target
    }

    /// Operators with the parameters committed by the last run.
    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    /// Execute every stage in order.
    ///
    /// Return
    /// ----------
    /// * A [`PipelineRun`] with one [`OperatorResult`] per operator.
    ///
    /// Errors
    /// ----------
    /// * `FrameFitError::Pipeline` wrapping the first stage failure, e.g. a
    ///   `FrameFitError::Pairing` when an estimating stage has no usable station or an
    ///   `FrameFitError::Estimation` on insufficient geometry.
    pub fn run(&mut self) -> Result<PipelineRun, FrameFitError> {
        let span = tracing::info_span!("pipeline", stages = self.operators.len());
        let _enter = span.enter();

        tracing::info!(
            "running {} stage(s): {} source / {} target stations",
            self.operators.len(),
            self.source.len(),
            self.target.len()
        );

        // parameters are committed only once every stage has succeeded
        let mut operators = self.operators.clone();
        let mut current = self.source.clone();
        let mut results = Vec::with_capacity(operators.len());

        for (stage, operator) in operators.iter_mut().enumerate() {
            let title = operator.title();
            let result = run_stage(stage, operator, &current, &self.target)
                .map_err(|err| err.in_stage(stage, title))?;

            current = result.transformed_source.clone();
            results.push(result);
        }
        self.operators = operators;

        Ok(PipelineRun::new(
            self.source.clone(),
            self.target.clone(),
            results,
        ))
    }
}

fn run_stage(
    stage: usize,
    operator: &mut Operator,
    source: &CoordinateSet,
    target: &CoordinateSet,
) -> Result<OperatorResult, FrameFitError> {
    let span = tracing::info_span!("stage", stage, operator = %operator.title());
    let _enter = span.enter();

    let pairing = StationPairing::new(source, target);
    let active = pairing.active();
    tracing::info!("{} paired stations, {} with weight", pairing.len(), active.len());

    let mut estimated = None;
    if operator.can_estimate() {
        if active.is_empty() {
            return Err(FrameFitError::Pairing(format!(
                "no weighted station is shared by source ({}) and target ({})",
                source.name().unwrap_or("<unnamed>"),
                target.name().unwrap_or("<unnamed>")
            )));
        }

        tracing::debug!(
            "estimating {} parameters from {} stations",
            operator.parameter_count().unwrap_or_default(),
            active.len()
        );
        if let Some(parameters) = operator.estimate(
            active.source_matrix(),
            active.target_matrix(),
            active.weights(),
        )? {
            operator.assign(parameters)?;
            estimated = Some(parameters);
            tracing::debug!("estimated {operator}");
        }
    }

    let transformed = operator.forward(&source.coordinate_matrix())?;
    let transformed_source = source.with_coordinates(&transformed)?;

    let residuals = residuals_between(&transformed_source, target);
    let statistics = ResidualStats::from_residuals(&residuals);
    tracing::info!("residuals: {statistics}");

    let parameters = operator.is_estimator().then(|| operator.parameters());

    Ok(OperatorResult {
        stage,
        kind: operator.kind(),
        label: operator.label().map(String::from),
        parameters,
        estimated,
        proj_steps: operator.proj_steps(),
        transformed_source,
        residuals,
        statistics,
    })
}

#[cfg(test)]
mod pipeline_test {
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;

    use super::*;
    use crate::{
        coordinates::CoordinateRecord,
        framefit_errors::EstimationError,
        operators::{DummyOperator, Helmert7Param, HelmertTranslation, RotationConvention},
    };

    fn set(name: &str, rows: &[(&str, [f64; 3], f64)]) -> CoordinateSet {
        CoordinateSet::new(
            Some(name.to_string()),
            rows.iter()
                .map(|(s, p, w)| {
                    CoordinateRecord::new(*s, Vector3::from(*p), Vector3::zeros(), *w, None)
                        .unwrap()
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_translation_scenario() {
        let source = set(
            "src",
            &[("A", [0., 0., 0.], 1.0), ("B", [1., 0., 0.], 1.0), ("C", [0., 1., 0.], 1.0)],
        );
        let target = set(
            "tgt",
            &[("A", [10., 0., 0.], 1.0), ("B", [11., 0., 0.], 1.0), ("C", [10., 1., 0.], 1.0)],
        );
        let mut pipeline = Pipeline::new(
            source,
            target,
            vec![Operator::HelmertTranslation(HelmertTranslation::new(None))],
        );

        let run = pipeline.run().unwrap();
        let result = &run.results()[0];
        let x = result.parameter("x").and_then(|p| p.as_number()).unwrap();
        assert_abs_diff_eq!(x, 10.0, epsilon = 1e-12);
        let y = result.parameter("y").and_then(|p| p.as_number()).unwrap_or(0.0);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-12);
        assert!(result.estimated.is_some());
        for r in run.final_residuals() {
            assert_abs_diff_eq!(r.residual, Vector3::zeros(), epsilon = 1e-12);
        }
        assert_eq!(result.statistics.used, 3);
    }

    #[test]
    fn test_fixed_then_estimated_offset() {
        let source = set("src", &[("A", [0., 0., 0.], 1.0), ("B", [5., 5., 5.], 1.0)]);
        let target = set("tgt", &[("A", [3., 2., 1.], 1.0), ("B", [8., 7., 6.], 1.0)]);
        let mut pipeline = Pipeline::new(
            source,
            target,
            vec![
                Operator::HelmertTranslation(HelmertTranslation::with_translation(
                    Some("fixed".into()),
                    Vector3::new(1., 1., 1.),
                )),
                Operator::HelmertTranslation(HelmertTranslation::new(Some("fitted".into()))),
            ],
        );

        let run = pipeline.run().unwrap();
        assert_eq!(run.results().len(), 2);
        assert!(run.results()[0].estimated.is_none());
        assert!(run.results()[0].parameters.is_some());
        assert_abs_diff_eq!(run.results()[0].statistics.rms.x, 2.0, epsilon = 1e-12);

        let Operator::HelmertTranslation(second) = &pipeline.operators()[1] else {
            panic!("translation expected")
        };
        assert_abs_diff_eq!(*second.translation(), Vector3::new(2., 1., 0.), epsilon = 1e-12);
        assert_abs_diff_eq!(run.final_statistics().rms_3d, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_weight_station_is_transformed_but_not_fitted() {
        let source = set(
            "src",
            &[
                ("A", [0., 0., 0.], 1.0),
                ("B", [1., 0., 0.], 1.0),
                ("OUT", [0., 0., 1.], 0.0),
                ("NEW", [7., 7., 7.], 1.0),
            ],
        );
        let target = set(
            "tgt",
            &[("A", [1., 0., 0.], 1.0), ("B", [2., 0., 0.], 1.0), ("OUT", [50., 0., 1.], 1.0)],
        );
        let mut pipeline = Pipeline::new(
            source,
            target,
            vec![Operator::HelmertTranslation(HelmertTranslation::new(None))],
        );

        let run = pipeline.run().unwrap();
        let result = &run.results()[0];
        let x = result.parameter("x").and_then(|p| p.as_number()).unwrap();
        assert_abs_diff_eq!(x, 1.0, epsilon = 1e-12);
        assert_eq!(result.statistics.paired, 3);
        assert_eq!(result.statistics.used, 2);

        let moved = run.final_coordinates();
        assert_abs_diff_eq!(
            moved.get("OUT").unwrap().position,
            Vector3::new(1., 0., 1.),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            moved.get("NEW").unwrap().position,
            Vector3::new(8., 7., 7.),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_no_weighted_pairs_is_a_pairing_error() {
        let source = set("src", &[("A", [0., 0., 0.], 0.0)]);
        let target = set("tgt", &[("A", [1., 0., 0.], 1.0)]);
        let mut pipeline = Pipeline::new(
            source,
            target,
            vec![
                Operator::Dummy(DummyOperator::default()),
                Operator::HelmertTranslation(HelmertTranslation::new(Some("shift".into()))),
            ],
        );

        let err = pipeline.run().unwrap_err();
        let FrameFitError::Pipeline { stage, operator, .. } = &err else {
            panic!("pipeline error expected, got {err}")
        };
        assert_eq!(*stage, 1);
        assert_eq!(operator, "shift");
        assert!(matches!(err.root_cause(), FrameFitError::Pairing(_)));
    }

    #[test]
    fn test_estimation_failure_is_wrapped() {
        let source = set("src", &[("A", [0., 0., 0.], 1.0)]);
        let target = set("tgt", &[("A", [1., 0., 0.], 1.0)]);
        let mut pipeline = Pipeline::new(
            source,
            target,
            vec![Operator::Helmert7Param(Helmert7Param::new(
                None,
                RotationConvention::PositionVector,
            ))],
        );

        let err = pipeline.run().unwrap_err();
        assert!(matches!(
            err.root_cause(),
            FrameFitError::Estimation(EstimationError::Underdetermined { .. })
        ));
    }

    #[test]
    fn test_failed_run_keeps_previous_parameters() {
        let source = set("src", &[("A", [0., 0., 0.], 1.0)]);
        let target = set("tgt", &[("A", [5., 0., 0.], 1.0)]);
        let operators = vec![
            Operator::HelmertTranslation(HelmertTranslation::new(None)),
            Operator::Helmert7Param(Helmert7Param::new(None, RotationConvention::PositionVector)),
        ];
        let mut pipeline = Pipeline::new(source, target, operators.clone());

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, FrameFitError::Pipeline { stage: 1, .. }));
        assert_eq!(pipeline.operators(), operators.as_slice());
        assert!(pipeline.operators()[0].can_estimate());
        let Operator::HelmertTranslation(first) = &pipeline.operators()[0] else {
            panic!("translation expected")
        };
        assert_eq!(*first.translation(), Vector3::zeros());
    }

    #[test]
    fn test_dummy_stage_has_no_parameters() {
        let source = set("src", &[("A", [1., 2., 3.], 1.0)]);
        let target = set("tgt", &[("A", [1., 2., 4.], 1.0)]);
        let mut pipeline = Pipeline::new(
            source.clone(),
            target,
            vec![Operator::Dummy(DummyOperator::default())],
        );

        let run = pipeline.run().unwrap();
        let result = &run.results()[0];
        assert_eq!(result.parameters, None);
        assert_eq!(result.estimated, None);
        assert_eq!(result.transformed_source, source);
        assert_eq!(result.residuals[0].residual, Vector3::new(0., 0., -1.));
    }

    #[test]
    fn test_from_sets_aggregates() {
        let a = set("a", &[("A", [0., 0., 0.], 1.0)]);
        let b = set("b", &[("B", [1., 0., 0.], 1.0)]);
        let t = set("t", &[("A", [0., 0., 0.], 1.0), ("B", [1., 0., 0.], 1.0)]);

        let pipeline = Pipeline::from_sets(vec![a, b], vec![t], vec![]).unwrap();
        assert_eq!(pipeline.source().len(), 2);
        assert!(Pipeline::from_sets(vec![], vec![], vec![]).is_err());
    }
}
