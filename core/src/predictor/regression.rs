//! Retention regression — ridge over standardised features.
//!
//! Features: admission rate, Pell share, value-add ratio, instructional spend,
//! completion rate. Target: first-year retention, using only institutions that
//! reported it (an imputed retention is never a training label). Rows are
//! split into train and holdout with a seeded shuffle; the holdout reports
//! RMSE, R² and a four-fifths-rule fairness check across Pell groups.

use super::{solve_linear, Standardizer};
use crate::{
    config::PredictorConfig,
    error::{AegisError, AegisResult},
    record::{Field, NormalizedInstitution},
    rng::{holdout_split, RngStream},
    types::EPSILON,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};

pub const FEATURE_NAMES: [&str; 5] = [
    "admission_rate",
    "pell_share",
    "value_add_ratio",
    "instructional_spend",
    "completion_rate",
];

/// Selection-rate ratio below which group outcomes are flagged.
const FOUR_FIFTHS: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoldoutEvaluation {
    pub train_rows: usize,
    pub test_rows:  usize,
    pub rmse:       f64,
    pub r_squared:  f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FairnessAudit {
    /// Ratio of "predicted above median retention" rates, lower group over higher.
    pub demographic_parity_ratio: f64,
    pub four_fifths_violation:    bool,
    pub high_pell:                usize,
    pub low_pell:                 usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionModel {
    pub trained_at:    DateTime<Utc>,
    pub features:      Vec<String>,
    pub scaler:        Standardizer,
    pub coefficients:  Vec<f64>,
    pub intercept:     f64,
    pub training_rows: usize,
    pub evaluation:    Option<HoldoutEvaluation>,
    pub fairness:      Option<FairnessAudit>,
    /// |standardised coefficient| per feature, largest first.
    pub feature_importance: Vec<(String, f64)>,
}

pub fn features(inst: &NormalizedInstitution) -> Option<Vec<f64>> {
    let m = &inst.metrics;
    Some(vec![
        m.admission_rate?,
        m.pell_share?,
        inst.value_add_ratio?,
        m.instructional_spend?,
        m.completion_rate?,
    ])
}

fn observed_label(inst: &NormalizedInstitution) -> Option<f64> {
    if inst.imputed.contains(&Field::RetentionRate) {
        return None;
    }
    inst.metrics.retention_rate
}

pub fn fit(
    training_set: &[NormalizedInstitution],
    config: &PredictorConfig,
    trained_at: DateTime<Utc>,
) -> AegisResult<RetentionModel> {
    let rows: Vec<(Vec<f64>, f64, f64)> = training_set
        .iter()
        .filter_map(|inst| Some((features(inst)?, observed_label(inst)?, inst.metrics.pell_share?)))
        .collect();

    if rows.len() < config.min_training_rows.max(FEATURE_NAMES.len() + 1) {
        return Err(AegisError::InsufficientData {
            what: "retention regression (complete labelled rows)".into(),
            required: config.min_training_rows.max(FEATURE_NAMES.len() + 1),
            available: rows.len(),
        });
    }

    let (mut train, test) = holdout_split(
        rows.len(),
        config.holdout_fraction,
        config.split_seed,
        RngStream::RetentionHoldout,
    );
    // Too few rows to hold any out: fit on everything and skip evaluation.
    let evaluate = !test.is_empty() && train.len() > FEATURE_NAMES.len();
    if !evaluate {
        train = (0..rows.len()).collect();
    }

    let train_x: Vec<Vec<f64>> = train.iter().map(|&i| rows[i].0.clone()).collect();
    let train_y: Vec<f64> = train.iter().map(|&i| rows[i].1).collect();
    let scaler = Standardizer::fit(&train_x);
    let z: Vec<Vec<f64>> = train_x.iter().map(|x| scaler.apply(x)).collect();

    let intercept = train_y.iter().sum::<f64>() / train_y.len() as f64;
    let p = FEATURE_NAMES.len();
    let mut gram = vec![vec![0.0; p]; p];
    let mut rhs = vec![0.0; p];
    for (zi, yi) in z.iter().zip(&train_y) {
        for a in 0..p {
            rhs[a] += zi[a] * (yi - intercept);
            for b in 0..p {
                gram[a][b] += zi[a] * zi[b];
            }
        }
    }
    for (a, row) in gram.iter_mut().enumerate() {
        row[a] += config.ridge_lambda;
    }
    let coefficients = solve_linear(gram, rhs)?;

    let mut feature_importance: Vec<(String, f64)> = FEATURE_NAMES
        .iter()
        .zip(&coefficients)
        .map(|(name, c)| (name.to_string(), c.abs()))
        .collect();
    feature_importance.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut model = RetentionModel {
        trained_at,
        features: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        scaler,
        coefficients,
        intercept,
        training_rows: train.len(),
        evaluation: None,
        fairness: None,
        feature_importance,
    };

    if evaluate {
        let scored: Vec<(f64, f64, f64)> = test
            .iter()
            .map(|&i| (model.predict_features(&rows[i].0), rows[i].1, rows[i].2))
            .collect();
        model.evaluation = Some(holdout_metrics(&scored, train.len()));
        model.fairness = fairness_audit(&scored);
        log::debug!(
            "fit: retention holdout rows={} rmse={:.4} r2={:.4}",
            test.len(),
            model.evaluation.as_ref().map_or(0.0, |e| e.rmse),
            model.evaluation.as_ref().map_or(0.0, |e| e.r_squared),
        );
    }
    Ok(model)
}

impl RetentionModel {
    fn predict_features(&self, x: &[f64]) -> f64 {
        let z = self.scaler.apply(x);
        let y = self.intercept + z.iter().zip(&self.coefficients).map(|(a, b)| a * b).sum::<f64>();
        y.clamp(0.0, 1.0)
    }

    /// Retention estimate in [0, 1]; None when any feature is unavailable.
    pub fn predict(&self, inst: &NormalizedInstitution) -> Option<f64> {
        features(inst).map(|x| self.predict_features(&x))
    }
}

fn holdout_metrics(scored: &[(f64, f64, f64)], train_rows: usize) -> HoldoutEvaluation {
    let n = scored.len() as f64;
    let mean_y = scored.iter().map(|(_, y, _)| y).sum::<f64>() / n;
    let ss_res: f64 = scored.iter().map(|(p, y, _)| (y - p).powi(2)).sum();
    let ss_tot: f64 = scored.iter().map(|(_, y, _)| (y - mean_y).powi(2)).sum();
    HoldoutEvaluation {
        train_rows,
        test_rows: scored.len(),
        rmse: (ss_res / n).sqrt(),
        r_squared: if ss_tot > EPSILON { 1.0 - ss_res / ss_tot } else { 0.0 },
    }
}

/// Groups rows by Pell share above/below its median and compares how often
/// each group is predicted to retain above the observed median.
fn fairness_audit(scored: &[(f64, f64, f64)]) -> Option<FairnessAudit> {
    if scored.len() < 2 {
        return None;
    }
    let pell_median = Data::new(scored.iter().map(|s| s.2).collect::<Vec<_>>()).median();
    let y_median = Data::new(scored.iter().map(|s| s.1).collect::<Vec<_>>()).median();

    let (high, low): (Vec<_>, Vec<_>) = scored.iter().partition(|s| s.2 > pell_median);
    if high.is_empty() || low.is_empty() {
        return None;
    }
    let rate = |group: &[&(f64, f64, f64)]| {
        group.iter().filter(|s| s.0 > y_median).count() as f64 / group.len() as f64
    };
    let (rate_high, rate_low) = (rate(&high), rate(&low));
    let top = rate_high.max(rate_low);
    let ratio = if top > EPSILON { rate_high.min(rate_low) / top } else { 1.0 };

    if ratio < FOUR_FIFTHS {
        log::warn!("fit: retention predictions fail four-fifths rule ratio={ratio:.3}");
    }
    Some(FairnessAudit {
        demographic_parity_ratio: ratio,
        four_fifths_violation: ratio < FOUR_FIFTHS,
        high_pell: high.len(),
        low_pell: low.len(),
    })
}
