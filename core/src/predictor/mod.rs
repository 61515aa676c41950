//! Predictive estimator.
//!
//! `fit` trains two models on one normalized batch:
//!   - retention: ridge regression over standardised features
//!   - dropout: logistic classifier for completion below a cutoff
//!
//! Viability and elasticity are closed-form and need no training.
//! A model is only returned when it was actually fit; a batch too thin to
//! train on yields `InsufficientData` and the caller decides the fallback.

pub mod dropout;
pub mod elasticity;
pub mod regression;
pub mod viability;

use crate::{
    config::PredictorConfig,
    error::{AegisError, AegisResult},
    record::NormalizedInstitution,
    types::{InstitutionId, EPSILON},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use dropout::{DropoutLevel, DropoutModel, DropoutPrediction};
pub use elasticity::{ElasticityEstimate, ElasticityReport};
pub use regression::{FairnessAudit, HoldoutEvaluation, RetentionModel};
pub use viability::{ViabilityAssessment, ViabilityLevel, ViabilitySummary};

// ── Model ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub trained_at: DateTime<Utc>,
    pub retention:  RetentionModel,
    /// None when the batch had only one dropout class to learn from.
    pub dropout:    Option<DropoutModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub institution_id:     InstitutionId,
    pub retention_estimate: Option<f64>,
    pub viability:          Option<ViabilityAssessment>,
    pub dropout:            Option<DropoutPrediction>,
    pub short_term_risk:    bool,
}

pub fn fit(training_set: &[NormalizedInstitution], config: &PredictorConfig) -> AegisResult<Model> {
    let trained_at = Utc::now();
    let retention = regression::fit(training_set, config, trained_at)?;
    let dropout = match dropout::fit(training_set, config) {
        Ok(model) => Some(model),
        Err(e @ (AegisError::InsufficientData { .. } | AegisError::ModelUnavailable { .. })) => {
            log::warn!("fit: dropout classifier unavailable: {e}");
            None
        }
        Err(e) => return Err(e),
    };
    log::info!(
        "fit: retention rows={} rmse={:?} dropout={}",
        retention.training_rows,
        retention.evaluation.as_ref().map(|e| e.rmse),
        if dropout.is_some() { "trained" } else { "unavailable" },
    );
    Ok(Model {
        trained_at,
        retention,
        dropout,
    })
}

pub fn predict(model: &Model, inst: &NormalizedInstitution, config: &PredictorConfig) -> Prediction {
    let viability = viability::assess(inst, &config.viability);
    let dropout = model.dropout.as_ref().and_then(|m| m.predict(inst));
    Prediction {
        institution_id: inst.id,
        retention_estimate: model.retention.predict(inst),
        short_term_risk: is_short_term_risk(dropout.as_ref(), viability.as_ref(), config),
        viability,
        dropout,
    }
}

/// High short-term risk: dropout probability at or above the configured
/// level, or viability in one of the two worst levels.
pub fn is_short_term_risk(
    dropout: Option<&DropoutPrediction>,
    viability: Option<&ViabilityAssessment>,
    config: &PredictorConfig,
) -> bool {
    let by_dropout = dropout.is_some_and(|d| d.probability >= config.short_term_dropout_probability);
    let by_viability = viability
        .is_some_and(|v| matches!(v.level, ViabilityLevel::Critical | ViabilityLevel::Elevated));
    by_dropout || by_viability
}

// ── Shared numerics ──────────────────────────────────────────────────────────

/// Column-wise z-scoring fitted on training rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Standardizer {
    pub means: Vec<f64>,
    pub stds:  Vec<f64>,
}

impl Standardizer {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map_or(0, Vec::len);
        let n = rows.len().max(1) as f64;
        let mut means = vec![0.0; width];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut stds = vec![0.0; width];
        for row in rows {
            for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        // Constant columns scale by 1 so they standardise to 0.
        let stds = stds
            .into_iter()
            .map(|var| if var.sqrt() > EPSILON { var.sqrt() } else { 1.0 })
            .collect();
        Self { means, stds }
    }

    pub fn apply(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// Solves `a · x = b` by Gaussian elimination with partial pivoting.
pub fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> AegisResult<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < EPSILON {
            return Err(AegisError::ModelUnavailable {
                reason: "normal equations are singular".into(),
            });
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        let pivot_row = a[col].clone();
        let pivot_b = b[col];
        for row in col + 1..n {
            let factor = a[row][col] / pivot_row[col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * pivot_row[k];
            }
            b[row] -= factor * pivot_b;
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}
