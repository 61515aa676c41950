//! The analytics engine — request/response facade over one dataset.
//!
//! PIPELINE (per ingestion batch):
//!   1. Normalizer    raw records → NormalizedInstitution
//!   2. Risk scorer   every institution, in parallel
//!   3. Snapshot      swapped in whole; never mutated afterwards
//!
//! Predictive models are fit lazily on first use and cached per batch,
//! tagged with their training timestamp.
//!
//! RULES:
//!   - Every request works on the `Arc<DatasetSnapshot>` it grabbed at the
//!     start; a concurrent `ingest` never changes data under it.
//!   - Optimizer runs share nothing mutable and may run in parallel.
//!   - Failures are terminal for the request only and carry the reason.

use crate::{
    config::AegisConfig,
    error::{AegisError, AegisResult},
    metrics::{self, DashboardStats, EquityFilter, EquityPerformance, RiskDistribution, Trends},
    normalizer,
    optimizer::{self, AllocationCandidate, AllocationConstraints, AllocationResult, Channel, EligibilityFlags, ImprovementCurve},
    predictor::{self, elasticity, viability, Model, Prediction},
    record::{Field, InstitutionRecord, NormalizedInstitution},
    risk::{self, RiskScore},
    snapshot::DatasetSnapshot,
    strategy::{self, StrategyInputs, StrategyKind, StrategyRun, StrategySummary},
    types::{BatchId, InstitutionId},
};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

// ── Requests and responses ───────────────────────────────────────────────────

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 500;
pub const DEFAULT_VIABILITY_THRESHOLD: f64 = 50.0;
const PEER_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstitutionFilter {
    pub state:    Option<String>,
    pub min_risk: Option<f64>,
    pub max_risk: Option<f64>,
    pub limit:    Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredInstitution {
    pub institution: NormalizedInstitution,
    pub score:       Option<RiskScore>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestSummary {
    pub batch_id: BatchId,
    pub accepted: usize,
    pub skipped:  usize,
    pub scored:   usize,
    pub unscored: usize,
}

/// Per-request overrides on top of the configured optimizer policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub budget:              f64,
    #[serde(default)]
    pub min_sat_average:     Option<f64>,
    #[serde(default)]
    pub min_enrollment:      Option<f64>,
    #[serde(default)]
    pub equity_floor_share:  Option<f64>,
    #[serde(default)]
    pub equity_floor_amount: Option<f64>,
    #[serde(default)]
    pub max_per_institution: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EnrollmentResponse {
    Single(StrategyRun),
    Comparison(Vec<StrategySummary>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerSummary {
    pub institution_id: InstitutionId,
    pub name:           String,
    pub retention_rate: Option<f64>,
    pub risk_index:     Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstitutionDetail {
    pub institution: NormalizedInstitution,
    pub score:       Option<RiskScore>,
    pub prediction:  Option<Prediction>,
    pub peers:       Vec<PeerSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub institution_id: InstitutionId,
    pub name:           String,
    pub state:          String,
    pub latitude:       f64,
    pub longitude:      f64,
    pub enrollment:     f64,
    pub risk_index:     Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub batch_id:   BatchId,
    pub trained_at: DateTime<Utc>,
    pub retention:  predictor::RetentionModel,
    pub dropout:    Option<predictor::DropoutModel>,
}

struct CachedModel {
    batch_id: BatchId,
    model:    Arc<Model>,
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct AnalyticsEngine {
    config:   AegisConfig,
    snapshot: RwLock<Option<Arc<DatasetSnapshot>>>,
    models:   RwLock<Option<CachedModel>>,
}

impl AnalyticsEngine {
    pub fn new(config: AegisConfig) -> Self {
        Self {
            config,
            snapshot: RwLock::new(None),
            models: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &AegisConfig {
        &self.config
    }

    /// Normalizes and scores a fresh batch, then replaces the current one.
    pub fn ingest(&self, records: &[InstitutionRecord]) -> AegisResult<IngestSummary> {
        let batch_id: BatchId = uuid::Uuid::new_v4().to_string();
        let batch = normalizer::normalize(records, &self.config.normalizer);

        let mut scores = HashMap::with_capacity(batch.institutions.len());
        let mut unscored = Vec::new();
        for (id, outcome) in risk::score_batch(&batch.institutions, &self.config.risk) {
            match outcome {
                Ok(score) => {
                    scores.insert(id, score);
                }
                Err(AegisError::InsufficientData { .. }) => unscored.push(id),
                Err(e) => return Err(e),
            }
        }
        if !unscored.is_empty() {
            log::warn!("batch={batch_id} score: {} institutions have no risk indicator", unscored.len());
        }

        let summary = IngestSummary {
            batch_id: batch_id.clone(),
            accepted: batch.report.accepted,
            skipped: batch.report.skipped_rows,
            scored: scores.len(),
            unscored: unscored.len(),
        };
        let snapshot = DatasetSnapshot::new(batch_id.clone(), batch.institutions, scores, unscored, batch.report);

        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(snapshot));
        log::info!(
            "batch={batch_id} ingest: accepted={} skipped={} scored={}",
            summary.accepted,
            summary.skipped,
            summary.scored
        );
        Ok(summary)
    }

    /// The current batch. Callers keep this `Arc` for the whole request.
    pub fn snapshot(&self) -> AegisResult<Arc<DatasetSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(AegisError::BatchNotLoaded)
    }

    /// Fitted model for the current batch; fits and caches on first use.
    pub fn model(&self) -> AegisResult<Arc<Model>> {
        self.model_for(&*self.snapshot()?)
    }

    /// Fitted model for `snap`. Requests pass the snapshot they already hold
    /// so a concurrent refresh never pairs one batch with another's model.
    pub fn model_for(&self, snap: &DatasetSnapshot) -> AegisResult<Arc<Model>> {
        if let Some(cached) = self.models.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            if cached.batch_id == snap.batch_id {
                return Ok(Arc::clone(&cached.model));
            }
        }
        let model = Arc::new(predictor::fit(&snap.institutions, &self.config.predictor)?);
        log::info!("batch={} fit: model trained_at={}", snap.batch_id, model.trained_at);
        *self.models.write().unwrap_or_else(|e| e.into_inner()) = Some(CachedModel {
            batch_id: snap.batch_id.clone(),
            model: Arc::clone(&model),
        });
        Ok(model)
    }

    pub fn model_info(&self) -> AegisResult<ModelInfo> {
        let snap = self.snapshot()?;
        let model = self.model_for(&snap)?;
        Ok(ModelInfo {
            batch_id: snap.batch_id.clone(),
            trained_at: model.trained_at,
            retention: model.retention.clone(),
            dropout: model.dropout.clone(),
        })
    }

    // ── Descriptive ──────────────────────────────────────────────────────────

    pub fn institutions(&self, filter: &InstitutionFilter) -> AegisResult<Vec<ScoredInstitution>> {
        let snap = self.snapshot()?;
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
        let state = filter.state.as_ref().map(|s| s.trim().to_ascii_uppercase());

        let mut rows: Vec<ScoredInstitution> = snap
            .institutions
            .iter()
            .filter(|inst| state.as_ref().map_or(true, |s| &inst.state == s))
            .filter(|inst| {
                let index = snap.score(inst.id).map(|s| f64::from(s.index));
                let above = filter.min_risk.map_or(true, |min| index.is_some_and(|i| i >= min));
                let below = filter.max_risk.map_or(true, |max| index.is_some_and(|i| i <= max));
                above && below
            })
            .map(|inst| ScoredInstitution {
                institution: inst.clone(),
                score: snap.score(inst.id).cloned(),
            })
            .collect();

        rows.sort_by(|a, b| {
            let ia = a.score.as_ref().map(|s| s.raw_index);
            let ib = b.score.as_ref().map(|s| s.raw_index);
            match (ia, ib) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then_with(|| a.institution.id.cmp(&b.institution.id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    pub fn risk_distribution(&self) -> AegisResult<RiskDistribution> {
        let snap = self.snapshot()?;
        Ok(metrics::risk_distribution(snap.scores.values()))
    }

    pub fn stats(&self) -> AegisResult<DashboardStats> {
        let snap = self.snapshot()?;
        Ok(metrics::stats(&snap.institutions, &snap.scores))
    }

    /// Projection ending in the current calendar year.
    pub fn trends(&self) -> AegisResult<Trends> {
        let snap = self.snapshot()?;
        Ok(metrics::trends(&snap.institutions, Utc::now().year()))
    }

    pub fn purchasing_power(&self) -> Vec<metrics::PurchasingPowerPoint> {
        metrics::purchasing_power()
    }

    pub fn completion_gap(&self, limit: usize) -> AegisResult<Vec<metrics::CompletionGap>> {
        let snap = self.snapshot()?;
        Ok(metrics::completion_gap(&snap.institutions, limit))
    }

    pub fn equity_performance(&self, filter: &EquityFilter) -> AegisResult<EquityPerformance> {
        let snap = self.snapshot()?;
        Ok(metrics::equity_performance(&snap.institutions, filter))
    }

    pub fn geo_points(&self) -> AegisResult<Vec<GeoPoint>> {
        let snap = self.snapshot()?;
        Ok(snap
            .institutions
            .iter()
            .filter_map(|inst| {
                Some(GeoPoint {
                    institution_id: inst.id,
                    name: inst.name.clone(),
                    state: inst.state.clone(),
                    latitude: inst.latitude?,
                    longitude: inst.longitude?,
                    enrollment: inst.enrollment(),
                    risk_index: snap.score(inst.id).map(|s| s.index),
                })
            })
            .collect())
    }

    /// One institution with its score, prediction and up to five peers in the
    /// same Carnegie class with enrollment within half to double its own.
    pub fn institution_detail(&self, id: InstitutionId) -> AegisResult<Option<InstitutionDetail>> {
        let snap = self.snapshot()?;
        let Some(inst) = snap.institution(id) else {
            return Ok(None);
        };
        let size = inst.enrollment();
        let peers = snap
            .institutions
            .iter()
            .filter(|p| p.id != id && p.carnegie.is_some() && p.carnegie == inst.carnegie)
            .filter(|p| (size * 0.5..=size * 2.0).contains(&p.enrollment()))
            .take(PEER_LIMIT)
            .map(|p| PeerSummary {
                institution_id: p.id,
                name: p.name.clone(),
                retention_rate: p.metrics.retention_rate,
                risk_index: snap.score(p.id).map(|s| s.index),
            })
            .collect();

        let prediction = match self.model_for(&snap) {
            Ok(model) => Some(predictor::predict(&model, inst, &self.config.predictor)),
            Err(e) => {
                log::debug!("detail: institution={id} prediction unavailable: {e}");
                None
            }
        };

        Ok(Some(InstitutionDetail {
            institution: inst.clone(),
            score: snap.score(id).cloned(),
            prediction,
            peers,
        }))
    }

    // ── Predictive ───────────────────────────────────────────────────────────

    pub fn predict(&self, id: InstitutionId) -> AegisResult<Option<Prediction>> {
        let snap = self.snapshot()?;
        let model = self.model_for(&snap)?;
        Ok(snap
            .institution(id)
            .map(|inst| predictor::predict(&model, inst, &self.config.predictor)))
    }

    pub fn viability(&self, max_score: Option<f64>) -> AegisResult<viability::ViabilitySummary> {
        let snap = self.snapshot()?;
        Ok(viability::summarize(
            &snap.institutions,
            &self.config.predictor.viability,
            max_score.unwrap_or(DEFAULT_VIABILITY_THRESHOLD),
        ))
    }

    pub fn elasticity(&self, grant_change: f64) -> AegisResult<elasticity::ElasticityEstimate> {
        let snap = self.snapshot()?;
        Ok(elasticity::estimate(
            &snap.institutions,
            grant_change,
            self.config.predictor.enrollment_sensitivity,
        ))
    }

    pub fn elasticity_scenarios(&self) -> AegisResult<elasticity::ElasticityReport> {
        let snap = self.snapshot()?;
        Ok(elasticity::scenarios(&snap.institutions, &self.config.predictor))
    }

    /// Institutions flagged high short-term risk. Without a fitted model the
    /// flag falls back to viability alone.
    fn short_term_flags(&self, snap: &DatasetSnapshot) -> HashSet<InstitutionId> {
        let config = &self.config.predictor;
        let model = match self.model_for(snap) {
            Ok(model) => Some(model),
            Err(e) => {
                log::warn!("batch={} short-term flags use viability only: {e}", snap.batch_id);
                None
            }
        };
        snap.institutions
            .iter()
            .filter(|inst| match &model {
                Some(m) => predictor::predict(m, inst, config).short_term_risk,
                None => {
                    let v = viability::assess(inst, &config.viability);
                    predictor::is_short_term_risk(None, v.as_ref(), config)
                }
            })
            .map(|inst| inst.id)
            .collect()
    }

    // ── Prescriptive ─────────────────────────────────────────────────────────

    /// Candidate pool for the retention optimizer: institutions at or above the
    /// minimum risk index, lowest retention first, capped at the pool limit.
    pub fn retention_candidates(&self, snap: &DatasetSnapshot, request: &OptimizeRequest) -> Vec<AllocationCandidate> {
        let cfg = &self.config.optimizer;
        let min_enrollment = request.min_enrollment.unwrap_or(cfg.min_enrollment);
        let min_sat = request.min_sat_average.or(cfg.min_sat_average);

        let mut pool: Vec<(&NormalizedInstitution, &RiskScore, f64)> = snap
            .institutions
            .iter()
            .filter_map(|inst| {
                let score = snap.score(inst.id)?;
                let retention = inst.metrics.retention_rate?;
                (score.index >= cfg.min_risk_index).then_some((inst, score, retention))
            })
            .collect();
        pool.sort_by(|a, b| a.2.total_cmp(&b.2).then_with(|| a.0.id.cmp(&b.0.id)));
        pool.truncate(cfg.pool_limit);

        pool.into_iter()
            .map(|(inst, score, retention)| {
                let pell = inst.metrics.pell_share.unwrap_or(0.0);
                let enrollment = inst.enrollment();
                // Only a reported SAT average can exclude an institution.
                let sat = inst
                    .metrics
                    .sat_average
                    .filter(|_| !inst.imputed.contains(&Field::SatAverage));
                let lift = enrollment * (1.0 - retention) * strategy::headroom_share(&cfg.lift, score.index, pell);
                AllocationCandidate {
                    institution_id: inst.id,
                    name: inst.name.clone(),
                    enrollment,
                    population: enrollment,
                    baseline_metric: retention,
                    curve: ImprovementCurve::Saturating {
                        lift,
                        scale: cfg.curve_scale,
                    },
                    pell_share: pell,
                    channel: Channel::Standard,
                    eligibility: EligibilityFlags {
                        meets_enrollment: enrollment >= min_enrollment && enrollment > 0.0,
                        meets_academic: match (min_sat, sat) {
                            (Some(min), Some(s)) => s >= min,
                            _ => true,
                        },
                        meets_outcome: true,
                    },
                }
            })
            .collect()
    }

    pub fn optimize(&self, request: &OptimizeRequest) -> AegisResult<AllocationResult> {
        let snap = self.snapshot()?;
        let candidates = self.retention_candidates(&snap, request);
        let mut constraints = AllocationConstraints::from_config(&self.config.optimizer);
        if let Some(share) = request.equity_floor_share {
            constraints.equity_floor_share = share;
        }
        constraints.equity_floor_amount = request.equity_floor_amount;
        if request.max_per_institution.is_some() {
            constraints.max_per_institution = request.max_per_institution;
        }
        log::debug!(
            "batch={} optimize: budget={:.2} candidates={}",
            snap.batch_id,
            request.budget,
            candidates.len()
        );
        optimizer::optimize(&candidates, request.budget, &constraints)
    }

    pub fn optimize_enrollment(&self, budget: f64, strategy: &str, compare: bool) -> AegisResult<EnrollmentResponse> {
        let snap = self.snapshot()?;
        let risk_index = snap.risk_index_map();
        let short_term = self.short_term_flags(&snap);
        let inputs = StrategyInputs {
            institutions: &snap.institutions,
            risk_index: &risk_index,
            short_term_risk: &short_term,
        };
        if compare {
            return Ok(EnrollmentResponse::Comparison(strategy::compare(inputs, budget, &self.config)?));
        }
        let kind: StrategyKind = strategy.parse()?;
        Ok(EnrollmentResponse::Single(strategy::run(kind, inputs, budget, &self.config)?))
    }
}
