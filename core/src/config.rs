//! Deployment policy — weights, thresholds and solver parameters.
//!
//! Every number that changes a score or an allocation lives here so that a
//! deployment can pin it. Scores are only comparable across institutions and
//! batches when they were produced under the same config.

use crate::error::{AegisError, AegisResult};
use serde::{Deserialize, Serialize};

// ── Normalizer ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Floor applied to median debt in the value-add ratio.
    pub value_add_epsilon: f64,
    /// Compute distance-to-nearest-metro for records with coordinates.
    pub compute_isolation: bool,
}

// ── Risk scoring ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskWeights {
    pub retention_deficit: f64,
    pub completion_deficit: f64,
    pub pell_dependency: f64,
    pub financial_fragility: f64,
}

impl RiskWeights {
    pub fn sum(&self) -> f64 {
        self.retention_deficit + self.completion_deficit + self.pell_dependency + self.financial_fragility
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BandDirection {
    /// Worse as the observed value falls (retention, completion).
    Below,
    /// Worse as the observed value rises (Pell share, debt burden).
    Above,
}

/// Three-step severity band for one factor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeverityBand {
    pub direction: BandDirection,
    /// Past this value the factor is reported at all (low severity).
    pub trigger: f64,
    pub medium: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub weights: RiskWeights,
    /// fragility = clamp(fragility_scale / value_add_ratio, 0, 100)
    pub fragility_scale: f64,
    pub retention_band: SeverityBand,
    pub completion_band: SeverityBand,
    pub pell_band: SeverityBand,
    pub debt_to_earnings_band: SeverityBand,
    pub admission_rate_trigger: f64,
    pub isolation_trigger_miles: f64,
}

// ── Predictive estimator ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViabilityConfig {
    pub pell_floor: f64,
    pub pell_weight: f64,
    pub repayment_weight: f64,
    pub completion_target: f64,
    pub completion_weight: f64,
    pub retention_target: f64,
    pub retention_weight: f64,
    pub size_floor: f64,
    pub size_weight: f64,
    /// Value-add ratio treated as full repayment when no repayment rate exists.
    pub value_add_reference: f64,
    pub critical_below: f64,
    pub elevated_below: f64,
    pub moderate_below: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub min_training_rows: usize,
    pub ridge_lambda: f64,
    pub holdout_fraction: f64,
    pub split_seed: u64,
    pub logistic_iterations: usize,
    pub logistic_learning_rate: f64,
    pub logistic_l2: f64,
    /// Institutions completing below this rate are the positive class.
    pub dropout_completion_cutoff: f64,
    /// Fractional change in Pell enrollment per $1,000 of grant change.
    pub enrollment_sensitivity: f64,
    pub elasticity_scenarios: Vec<f64>,
    /// Dropout probability at or above which an institution is short-term at-risk.
    pub short_term_dropout_probability: f64,
    pub viability: ViabilityConfig,
}

// ── Allocation optimizer ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LiftModel {
    /// Share of the improvement headroom unlocked per unit of risk index / 100.
    pub risk_weight: f64,
    /// Share of the improvement headroom unlocked per unit of Pell share.
    pub pell_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Dollar increment committed per water-filling iteration.
    pub step: f64,
    /// Stop general allocation once the best marginal return per dollar drops below this.
    pub marginal_floor: f64,
    pub max_iterations: usize,
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
    /// Dollars at which the saturating curve reaches 1 − 1/e of its lift.
    pub curve_scale: f64,
    #[serde(default)]
    pub max_per_institution: Option<f64>,
    pub min_enrollment: f64,
    #[serde(default)]
    pub min_sat_average: Option<f64>,
    /// Only institutions at or above this risk index enter the investment pool.
    pub min_risk_index: u8,
    pub pool_limit: usize,
    pub equity_floor_share: f64,
    pub equity_pell_threshold: f64,
    pub lift: LiftModel,
    pub parallel_scan_threshold: usize,
}

// ── Strategies ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub min_completion_rate: f64,
    pub max_per_institution: f64,
    pub curve_scale: f64,
    pub step: f64,
    pub performance_percentile: f64,
    pub performance_multiplier: f64,
    pub reserve_fraction: f64,
    pub per_student_grant: f64,
    /// Graduates gained per micro-grant recipient.
    pub micro_grant_effect: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct ScoringFile {
    normalizer: NormalizerConfig,
    risk: RiskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AegisConfig {
    pub normalizer: NormalizerConfig,
    pub risk: RiskConfig,
    pub predictor: PredictorConfig,
    pub optimizer: OptimizerConfig,
    pub strategies: StrategyConfig,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))
}

impl AegisConfig {
    /// Load from the data/ directory.
    /// In tests, use AegisConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let scoring: ScoringFile = read_json(&format!("{data_dir}/config/scoring.json"))?;
        let predictor: PredictorConfig = read_json(&format!("{data_dir}/config/predictor.json"))?;
        let optimizer: OptimizerConfig = read_json(&format!("{data_dir}/config/optimizer.json"))?;
        let strategies: StrategyConfig = read_json(&format!("{data_dir}/config/strategies.json"))?;

        let config = Self {
            normalizer: scoring.normalizer,
            risk: scoring.risk,
            predictor,
            optimizer,
            strategies,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AegisResult<()> {
        let w = &self.risk.weights;
        if (w.sum() - 1.0).abs() > 1e-6 {
            return Err(AegisError::InvalidConfig(format!(
                "risk weights must sum to 1, got {:.6}",
                w.sum()
            )));
        }
        let weights = [w.retention_deficit, w.completion_deficit, w.pell_dependency, w.financial_fragility];
        if weights.iter().any(|v| *v < 0.0) {
            return Err(AegisError::InvalidConfig("risk weights must be non-negative".into()));
        }
        if self.optimizer.step <= 0.0 || self.strategies.step <= 0.0 {
            return Err(AegisError::InvalidConfig("optimizer step must be positive".into()));
        }
        if self.optimizer.curve_scale <= 0.0 || self.strategies.curve_scale <= 0.0 {
            return Err(AegisError::InvalidConfig("curve scale must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.predictor.holdout_fraction) {
            return Err(AegisError::InvalidConfig("holdout_fraction must lie in [0, 1]".into()));
        }
        if !(0.0..1.0).contains(&self.strategies.reserve_fraction) {
            return Err(AegisError::InvalidConfig("reserve_fraction must lie in [0, 1)".into()));
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            normalizer: NormalizerConfig {
                value_add_epsilon: 1.0,
                compute_isolation: true,
            },
            risk: RiskConfig {
                weights: RiskWeights {
                    retention_deficit: 0.35,
                    completion_deficit: 0.30,
                    pell_dependency: 0.20,
                    financial_fragility: 0.15,
                },
                fragility_scale: 100.0,
                retention_band: SeverityBand {
                    direction: BandDirection::Below,
                    trigger: 0.70,
                    medium: 0.65,
                    high: 0.55,
                },
                completion_band: SeverityBand {
                    direction: BandDirection::Below,
                    trigger: 0.45,
                    medium: 0.35,
                    high: 0.25,
                },
                pell_band: SeverityBand {
                    direction: BandDirection::Above,
                    trigger: 0.45,
                    medium: 0.55,
                    high: 0.70,
                },
                debt_to_earnings_band: SeverityBand {
                    direction: BandDirection::Above,
                    trigger: 0.55,
                    medium: 0.65,
                    high: 0.80,
                },
                admission_rate_trigger: 0.85,
                isolation_trigger_miles: 150.0,
            },
            predictor: PredictorConfig {
                min_training_rows: 30,
                ridge_lambda: 1.0,
                holdout_fraction: 0.2,
                split_seed: 42,
                logistic_iterations: 500,
                logistic_learning_rate: 0.1,
                logistic_l2: 0.01,
                dropout_completion_cutoff: 0.50,
                enrollment_sensitivity: 0.05,
                elasticity_scenarios: vec![-1000.0, 0.0, 1000.0, 2000.0, 3000.0, 5000.0],
                short_term_dropout_probability: 0.5,
                viability: ViabilityConfig {
                    pell_floor: 0.40,
                    pell_weight: 0.30,
                    repayment_weight: 0.40,
                    completion_target: 0.60,
                    completion_weight: 0.50,
                    retention_target: 0.75,
                    retention_weight: 0.30,
                    size_floor: 1000.0,
                    size_weight: 0.15,
                    value_add_reference: 4.0,
                    critical_below: 40.0,
                    elevated_below: 60.0,
                    moderate_below: 75.0,
                },
            },
            optimizer: OptimizerConfig {
                step: 10_000.0,
                marginal_floor: 0.0,
                max_iterations: 200_000,
                time_limit_ms: None,
                curve_scale: 50_000.0,
                max_per_institution: Some(500_000.0),
                min_enrollment: 0.0,
                min_sat_average: None,
                min_risk_index: 40,
                pool_limit: 100,
                equity_floor_share: 0.20,
                equity_pell_threshold: 0.50,
                lift: LiftModel {
                    risk_weight: 0.5,
                    pell_weight: 0.3,
                },
                parallel_scan_threshold: 2048,
            },
            strategies: StrategyConfig {
                min_completion_rate: 0.30,
                max_per_institution: 2_000_000.0,
                curve_scale: 250_000.0,
                step: 50_000.0,
                performance_percentile: 0.80,
                performance_multiplier: 1.25,
                reserve_fraction: 0.10,
                per_student_grant: 1_000.0,
                micro_grant_effect: 0.10,
            },
        }
    }
}
