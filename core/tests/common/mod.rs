//! Shared fixtures for the integration tests.
//!
//! Batches are built from closed-form arithmetic over the row index, so every
//! test sees the same data on every run without touching an RNG.

#![allow(dead_code)]

use aegis_core::{
    config::AegisConfig,
    engine::AnalyticsEngine,
    record::{Field, InstitutionRecord, Metrics, NormalizedInstitution, Ownership, Reported},
    types::{CarnegieCode, InstitutionId},
};

pub const STATES: [&str; 5] = ["CA", "TX", "NY", "OH", "GA"];

/// A raw record with the given reported values; everything else missing.
pub fn record(id: InstitutionId, carnegie: Option<CarnegieCode>, values: &[(Field, f64)]) -> InstitutionRecord {
    let mut metrics = Metrics::<Reported>::default();
    for (field, value) in values {
        *metrics.get_mut(*field) = Reported::Value(*value);
    }
    InstitutionRecord {
        id: Some(id),
        name: format!("Institution {id}"),
        city: "Springfield".into(),
        state: "OH".into(),
        carnegie,
        ownership: Some(Ownership::Public),
        latitude: None,
        longitude: None,
        metrics,
    }
}

/// A normalized institution built directly, bypassing imputation.
pub fn institution(id: InstitutionId, values: &[(Field, f64)]) -> NormalizedInstitution {
    let mut metrics = Metrics::<Option<f64>>::default();
    for (field, value) in values {
        *metrics.get_mut(*field) = Some(*value);
    }
    let value_add_ratio = match (metrics.median_earnings, metrics.median_debt) {
        (Some(e), Some(d)) => Some(e / d.max(1.0)),
        _ => None,
    };
    NormalizedInstitution {
        id,
        name: format!("Institution {id}"),
        city: "Springfield".into(),
        state: "OH".into(),
        carnegie: Some(15),
        ownership: Some(Ownership::Public),
        latitude: None,
        longitude: None,
        metrics,
        imputed: Vec::new(),
        degraded: Vec::new(),
        value_add_ratio,
        unmet_need_gap: None,
        geographic_isolation_miles: None,
        adjusted_earnings: None,
    }
}

fn spread(i: u64, mul: u64, modulo: u64) -> f64 {
    ((i * mul) % modulo) as f64
}

/// One fully-reported synthetic row. Retention falls with Pell share and
/// completion tracks retention, so both dropout classes appear in any batch
/// of a few dozen rows.
pub fn synthetic_record(i: u64) -> InstitutionRecord {
    let pell = 0.15 + spread(i, 29, 60) / 100.0;
    let retention = (0.92 - 0.45 * pell + (spread(i, 13, 11) - 5.0) / 100.0).clamp(0.3, 0.98);
    let completion = (retention - 0.2 + (spread(i, 7, 9) - 4.0) / 100.0).clamp(0.1, 0.95);
    let values = [
        (Field::EnrollmentSize, 800.0 + spread(i, 137, 20_000)),
        (Field::AdmissionRate, 0.30 + spread(i, 17, 65) / 100.0),
        (Field::RetentionRate, retention),
        (Field::CompletionRate, completion),
        (Field::CompletionRatePell, (completion - 0.06).max(0.0)),
        (Field::CompletionRateNonPell, (completion + 0.04).min(1.0)),
        (Field::MedianEarnings, 30_000.0 + spread(i, 911, 40_000)),
        (Field::MedianDebt, 12_000.0 + spread(i, 433, 18_000)),
        (Field::PellShare, pell),
        (Field::InstructionalSpend, 6_000.0 + spread(i, 271, 14_000)),
        (Field::SatAverage, 900.0 + spread(i, 53, 500)),
        (Field::NetPriceLowIncome, 8_000.0 + spread(i, 311, 15_000)),
        (Field::CostOfAttendance, 20_000.0 + spread(i, 577, 30_000)),
        (Field::ExpectedFamilyContribution, 2_000.0 + spread(i, 97, 8_000)),
        (Field::GrantAid, 4_000.0 + spread(i, 199, 9_000)),
        (Field::RepaymentRate, 0.30 + spread(i, 19, 60) / 100.0),
    ];
    let mut rec = record(100_000 + i, Some(15 + (i % 4) as CarnegieCode), &values);
    rec.state = STATES[(i % 5) as usize].into();
    rec.latitude = Some(30.0 + spread(i, 7, 17));
    rec.longitude = Some(-120.0 + spread(i, 11, 45));
    rec
}

pub fn synthetic_batch(n: u64) -> Vec<InstitutionRecord> {
    (0..n).map(synthetic_record).collect()
}

/// Engine with the default test config and a synthetic batch ingested.
pub fn loaded_engine(n: u64) -> AnalyticsEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = AnalyticsEngine::new(AegisConfig::default_test());
    engine.ingest(&synthetic_batch(n)).expect("ingest synthetic batch");
    engine
}
