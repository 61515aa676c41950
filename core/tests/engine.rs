//! Analytics engine: ingestion, snapshot swaps, model cache, request surface.

mod common;

use aegis_core::{
    config::AegisConfig,
    engine::{AnalyticsEngine, EnrollmentResponse, InstitutionFilter, OptimizeRequest, MAX_LIST_LIMIT},
    error::AegisError,
    predictor,
    record::{Field, Reported},
    snapshot::DatasetSnapshot,
};
use std::sync::Arc;

#[test]
fn requests_before_ingest_report_batch_not_loaded() {
    let engine = AnalyticsEngine::new(AegisConfig::default_test());
    assert!(matches!(engine.snapshot(), Err(AegisError::BatchNotLoaded)));
    assert!(matches!(engine.stats(), Err(AegisError::BatchNotLoaded)));
    assert!(matches!(
        engine.optimize(&OptimizeRequest {
            budget: 1_000.0,
            ..Default::default()
        }),
        Err(AegisError::BatchNotLoaded)
    ));
    // Purchasing power is a fixed table and needs no batch.
    assert!(!engine.purchasing_power().is_empty());
}

#[test]
fn ingest_reports_accepted_and_skipped_rows() {
    let engine = AnalyticsEngine::new(AegisConfig::default_test());
    let mut records = common::synthetic_batch(40);
    records[5].id = None;
    let summary = engine.ingest(&records).expect("ingest");

    assert_eq!(summary.accepted, 39);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.scored, 39);
    assert_eq!(summary.unscored, 0);
    assert_eq!(engine.snapshot().expect("snapshot").batch_id, summary.batch_id);
}

#[test]
fn institutions_without_indicators_stay_listed_but_unscored() {
    let engine = AnalyticsEngine::new(AegisConfig::default_test());
    let bare = common::record(1, None, &[(Field::EnrollmentSize, 1_200.0)]);
    let summary = engine.ingest(&[bare]).expect("ingest");
    assert_eq!(summary.unscored, 1);

    let snap = engine.snapshot().expect("snapshot");
    assert_eq!(snap.unscored, vec![1]);
    let listed = engine.institutions(&InstitutionFilter::default()).expect("list");
    assert_eq!(listed.len(), 1);
    assert!(listed[0].score.is_none());
}

#[test]
fn refresh_replaces_snapshot_without_disturbing_holders() {
    let engine = common::loaded_engine(30);
    let held = engine.snapshot().expect("first snapshot");

    let summary = engine.ingest(&common::synthetic_batch(45)).expect("refresh");
    let current = engine.snapshot().expect("second snapshot");

    assert_ne!(held.batch_id, current.batch_id);
    assert_eq!(current.batch_id, summary.batch_id);
    assert_eq!(held.len(), 30, "old readers keep the batch they started with");
    assert_eq!(current.len(), 45);
}

#[test]
fn reloaded_snapshot_still_finds_institutions_by_id() {
    let engine = common::loaded_engine(20);
    let snap = engine.snapshot().expect("snapshot");
    let json = serde_json::to_string(&*snap).expect("serialize snapshot");
    let reloaded: DatasetSnapshot = serde_json::from_str(&json).expect("deserialize snapshot");

    assert_eq!(reloaded.batch_id, snap.batch_id);
    assert_eq!(reloaded.len(), 20);
    for inst in &snap.institutions {
        let found = reloaded.institution(inst.id).expect("id index rebuilt on load");
        assert_eq!(found.name, inst.name);
        assert_eq!(reloaded.score(inst.id), snap.score(inst.id));
    }
}

#[test]
fn model_is_cached_per_batch() {
    let engine = common::loaded_engine(60);
    let a = engine.model().expect("fit");
    let b = engine.model().expect("cached");
    assert!(Arc::ptr_eq(&a, &b));

    engine.ingest(&common::synthetic_batch(61)).expect("refresh");
    let c = engine.model().expect("refit");
    assert!(!Arc::ptr_eq(&a, &c));

    let info = engine.model_info().expect("model info");
    assert_eq!(info.trained_at, c.trained_at);
    assert_eq!(info.batch_id, engine.snapshot().expect("snapshot").batch_id);
}

#[test]
fn held_snapshot_is_paired_with_its_own_model() {
    let engine = common::loaded_engine(60);
    let held = engine.snapshot().expect("first snapshot");
    engine.ingest(&common::synthetic_batch(75)).expect("refresh");

    let for_held = engine.model_for(&held).expect("fit on held batch");
    let current = engine.model().expect("fit on current batch");
    let expected = predictor::fit(&held.institutions, &engine.config().predictor).expect("reference fit");

    assert_eq!(for_held.retention.coefficients, expected.retention.coefficients);
    assert_eq!(for_held.retention.training_rows, expected.retention.training_rows);
    assert_ne!(for_held.retention.training_rows, current.retention.training_rows);
}

#[test]
fn thin_batch_has_no_model() {
    let engine = common::loaded_engine(8);
    assert!(matches!(engine.model(), Err(AegisError::InsufficientData { .. })));
    // Detail still works; it just carries no prediction.
    let detail = engine.institution_detail(100_003).expect("detail").expect("present");
    assert!(detail.prediction.is_none());
}

#[test]
fn institution_listing_filters_sorts_and_limits() {
    let engine = common::loaded_engine(150);

    let all = engine.institutions(&InstitutionFilter::default()).expect("list");
    assert_eq!(all.len(), 100, "default limit");
    let risks: Vec<f64> = all.iter().map(|s| s.score.as_ref().expect("scored").raw_index).collect();
    assert!(risks.windows(2).all(|w| w[0] >= w[1]), "highest risk first");

    let texas = engine
        .institutions(&InstitutionFilter {
            state: Some("tx".into()),
            limit: Some(MAX_LIST_LIMIT + 100),
            ..Default::default()
        })
        .expect("filtered");
    assert_eq!(texas.len(), 30);
    assert!(texas.iter().all(|s| s.institution.state == "TX"));

    let band = engine
        .institutions(&InstitutionFilter {
            min_risk: Some(40.0),
            max_risk: Some(60.0),
            limit: Some(MAX_LIST_LIMIT),
            ..Default::default()
        })
        .expect("banded");
    assert!(band
        .iter()
        .all(|s| (40..=60).contains(&s.score.as_ref().expect("scored").index)));
}

#[test]
fn detail_lists_comparable_peers() {
    let engine = common::loaded_engine(80);
    let id = 100_010;
    let detail = engine.institution_detail(id).expect("detail").expect("present");
    let size = detail.institution.enrollment();

    assert!(detail.score.is_some());
    assert!(detail.prediction.is_some());
    assert!(detail.peers.len() <= 5);
    let snap = engine.snapshot().expect("snapshot");
    for peer in &detail.peers {
        assert_ne!(peer.institution_id, id);
        let p = snap.institution(peer.institution_id).expect("peer in batch");
        assert_eq!(p.carnegie, detail.institution.carnegie);
        assert!(p.enrollment() >= size * 0.5 && p.enrollment() <= size * 2.0);
    }

    assert!(engine.institution_detail(42).expect("lookup").is_none());
}

#[test]
fn retention_optimizer_respects_budget_and_floor() {
    let engine = common::loaded_engine(120);
    let budget = 2_000_000.0;
    let result = engine
        .optimize(&OptimizeRequest {
            budget,
            ..Default::default()
        })
        .expect("optimize");

    assert!(result.total_allocated <= budget + 1e-6);
    assert!(result.equity_allocated + 1e-6 >= result.equity_floor);
    let snap = engine.snapshot().expect("snapshot");
    for a in &result.allocations {
        let score = snap.score(a.institution_id).expect("funded institutions are scored");
        assert!(score.index >= engine.config().optimizer.min_risk_index);
        assert!(a.projected_metric >= a.baseline_metric);
    }
}

#[test]
fn retention_optimizer_surfaces_infeasible_floor() {
    let engine = common::loaded_engine(60);
    let err = engine
        .optimize(&OptimizeRequest {
            budget: 100_000.0,
            equity_floor_amount: Some(250_000.0),
            ..Default::default()
        })
        .unwrap_err();
    assert!(
        matches!(&err, AegisError::ConstraintInfeasible { constraint, .. } if constraint == "equity_floor"),
        "got {err}"
    );
}

#[test]
fn reported_sat_below_target_excludes_but_imputed_sat_does_not() {
    let engine = AnalyticsEngine::new(AegisConfig::default_test());
    let mut records = common::synthetic_batch(60);
    for rec in records.iter_mut().step_by(2) {
        rec.metrics.sat_average = Reported::Missing;
    }
    engine.ingest(&records).expect("ingest");
    let snap = engine.snapshot().expect("snapshot");

    let request = OptimizeRequest {
        budget: 1_000_000.0,
        min_sat_average: Some(2_000.0),
        equity_floor_share: Some(0.0),
        ..Default::default()
    };
    let candidates = engine.retention_candidates(&snap, &request);
    assert!(!candidates.is_empty());
    for c in &candidates {
        let inst = snap.institution(c.institution_id).expect("candidate in batch");
        let imputed = inst.imputed.contains(&Field::SatAverage);
        assert_eq!(c.eligibility.meets_academic, imputed, "institution {}", inst.id);
    }

    let result = engine.optimize(&request).expect("optimize");
    for a in &result.allocations {
        let inst = snap.institution(a.institution_id).expect("funded");
        assert!(inst.imputed.contains(&Field::SatAverage));
    }
}

#[test]
fn enrollment_optimizer_single_and_compare() {
    let engine = common::loaded_engine(90);
    match engine.optimize_enrollment(5_000_000.0, "performance", false).expect("single") {
        EnrollmentResponse::Single(run) => {
            assert_eq!(run.summary.strategy.name(), "performance");
            assert!(run.summary.total_allocated <= 5_000_000.0 + 1e-6);
        }
        other => panic!("expected a single run, got {other:?}"),
    }
    match engine.optimize_enrollment(5_000_000.0, "ignored", true).expect("compare") {
        EnrollmentResponse::Comparison(rows) => assert_eq!(rows.len(), 3),
        other => panic!("expected a comparison, got {other:?}"),
    }
    let err = engine.optimize_enrollment(5_000_000.0, "lottery", false).unwrap_err();
    assert!(matches!(err, AegisError::UnknownStrategy { .. }));
}

#[test]
fn enrollment_optimizer_falls_back_to_viability_without_model() {
    let engine = common::loaded_engine(12);
    let response = engine
        .optimize_enrollment(1_000_000.0, "retention_trigger", false)
        .expect("runs without a fitted model");
    assert!(matches!(response, EnrollmentResponse::Single(_)));
}

#[test]
fn predictive_endpoints_answer_from_current_batch() {
    let engine = common::loaded_engine(60);

    let viability = engine.viability(None).expect("viability");
    assert_eq!(viability.evaluated + viability.unavailable, 60);
    assert!(viability.flagged.iter().all(|a| a.score < 50.0));

    let one = engine.elasticity(1_000.0).expect("elasticity");
    assert_eq!(one.institutions_analyzed, 60);
    let report = engine.elasticity_scenarios().expect("scenarios");
    assert_eq!(report.scenarios.len(), engine.config().predictor.elasticity_scenarios.len());

    let prediction = engine.predict(100_001).expect("predict").expect("present");
    assert!(prediction.retention_estimate.is_some());
}

#[test]
fn descriptive_endpoints_answer_from_current_batch() {
    let engine = common::loaded_engine(50);

    let stats = engine.stats().expect("stats");
    assert_eq!(stats.total_schools, 50);

    let dist = engine.risk_distribution().expect("distribution");
    assert_eq!(dist.counts.iter().sum::<usize>(), 50);

    let geo = engine.geo_points().expect("geo");
    assert_eq!(geo.len(), 50);
    assert!(geo.iter().all(|g| g.risk_index.is_some()));

    let gaps = engine.completion_gap(10).expect("gaps");
    assert_eq!(gaps.len(), 10);

    let trends = engine.trends().expect("trends");
    assert_eq!(trends.years.len(), 5);
    assert!(trends.projected);
}
