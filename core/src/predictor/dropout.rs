//! Dropout risk classifier.
//!
//! Logistic regression, fixed-iteration batch gradient descent with an L2
//! penalty, over standardised features: low-income net price, median debt,
//! retention, Pell share, enrollment, admission rate. The positive class is
//! an institution whose completion rate is below the configured cutoff.

use super::Standardizer;
use crate::{
    config::PredictorConfig,
    error::{AegisError, AegisResult},
    record::NormalizedInstitution,
    rng::{holdout_split, RngStream},
};
use serde::{Deserialize, Serialize};

pub const FEATURE_NAMES: [&str; 6] = [
    "net_price_low_income",
    "median_debt",
    "retention_rate",
    "pell_share",
    "enrollment_size",
    "admission_rate",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropoutLevel {
    Low,
    Medium,
    High,
}

impl DropoutLevel {
    pub fn for_probability(p: f64) -> Self {
        if p > 0.5 {
            Self::High
        } else if p > 0.3 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DropoutPrediction {
    pub probability: f64,
    pub level:       DropoutLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropoutModel {
    pub scaler:          Standardizer,
    pub weights:         Vec<f64>,
    pub bias:            f64,
    pub samples:         usize,
    pub positive_rate:   f64,
    pub holdout_accuracy: Option<f64>,
    pub feature_importance: Vec<(String, f64)>,
}

pub fn features(inst: &NormalizedInstitution) -> Option<Vec<f64>> {
    let m = &inst.metrics;
    Some(vec![
        m.net_price_low_income?,
        m.median_debt?,
        m.retention_rate?,
        m.pell_share?,
        m.enrollment_size?,
        m.admission_rate?,
    ])
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn fit(training_set: &[NormalizedInstitution], config: &PredictorConfig) -> AegisResult<DropoutModel> {
    let rows: Vec<(Vec<f64>, f64)> = training_set
        .iter()
        .filter_map(|inst| {
            let label = inst.metrics.completion_rate? < config.dropout_completion_cutoff;
            Some((features(inst)?, if label { 1.0 } else { 0.0 }))
        })
        .collect();

    if rows.len() < config.min_training_rows {
        return Err(AegisError::InsufficientData {
            what: "dropout classifier (complete rows)".into(),
            required: config.min_training_rows,
            available: rows.len(),
        });
    }
    let positives = rows.iter().filter(|r| r.1 > 0.5).count();
    if positives == 0 || positives == rows.len() {
        return Err(AegisError::ModelUnavailable {
            reason: "dropout labels contain a single class".into(),
        });
    }

    let (mut train, test) = holdout_split(
        rows.len(),
        config.holdout_fraction,
        config.split_seed,
        RngStream::DropoutHoldout,
    );
    if test.is_empty() || train.is_empty() {
        train = (0..rows.len()).collect();
    }

    let train_x: Vec<Vec<f64>> = train.iter().map(|&i| rows[i].0.clone()).collect();
    let scaler = Standardizer::fit(&train_x);
    let z: Vec<Vec<f64>> = train_x.iter().map(|x| scaler.apply(x)).collect();
    let y: Vec<f64> = train.iter().map(|&i| rows[i].1).collect();

    let p = FEATURE_NAMES.len();
    let n = z.len() as f64;
    let mut weights = vec![0.0; p];
    let mut bias = 0.0;
    for _ in 0..config.logistic_iterations {
        let mut grad_w = vec![0.0; p];
        let mut grad_b = 0.0;
        for (zi, yi) in z.iter().zip(&y) {
            let linear = bias + zi.iter().zip(&weights).map(|(a, b)| a * b).sum::<f64>();
            let err = sigmoid(linear) - yi;
            grad_b += err / n;
            for (g, x) in grad_w.iter_mut().zip(zi) {
                *g += err * x / n;
            }
        }
        for (w, g) in weights.iter_mut().zip(&grad_w) {
            *w -= config.logistic_learning_rate * (g + config.logistic_l2 * *w);
        }
        bias -= config.logistic_learning_rate * grad_b;
    }

    let mut feature_importance: Vec<(String, f64)> = FEATURE_NAMES
        .iter()
        .zip(&weights)
        .map(|(name, w)| (name.to_string(), w.abs()))
        .collect();
    feature_importance.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut model = DropoutModel {
        scaler,
        weights,
        bias,
        samples: rows.len(),
        positive_rate: positives as f64 / rows.len() as f64,
        holdout_accuracy: None,
        feature_importance,
    };

    if train.len() < rows.len() {
        let correct = test
            .iter()
            .filter(|&&i| (model.probability(&rows[i].0) > 0.5) == (rows[i].1 > 0.5))
            .count();
        model.holdout_accuracy = Some(correct as f64 / test.len() as f64);
    }
    Ok(model)
}

impl DropoutModel {
    fn probability(&self, x: &[f64]) -> f64 {
        let z = self.scaler.apply(x);
        sigmoid(self.bias + z.iter().zip(&self.weights).map(|(a, b)| a * b).sum::<f64>())
    }

    pub fn predict(&self, inst: &NormalizedInstitution) -> Option<DropoutPrediction> {
        let probability = self.probability(&features(inst)?);
        Some(DropoutPrediction {
            probability,
            level: DropoutLevel::for_probability(probability),
        })
    }
}
