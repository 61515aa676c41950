//! Risk scorer — the Resilience Risk Index.
//!
//! This module:
//!   1. Maps four sub-indicators onto [0, 100] (100 = worst)
//!   2. Combines them with the configured weights, renormalised over the
//!      indicators actually present for the institution
//!   3. Buckets the rounded index at 20/40/60/80 (upper bounds inclusive)
//!   4. Explains the score with severity-ranked factors
//!
//! A missing indicator is never read as zero or as worst-case; it drops out
//! of the sum and its weight is spread over the rest. `coverage` records the
//! share of the configured weight that was actually observed.

use crate::{
    config::{BandDirection, RiskConfig, SeverityBand},
    error::{AegisError, AegisResult},
    record::NormalizedInstitution,
    types::{InstitutionId, EPSILON},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskBucket {
    #[serde(rename = "Very Low")]
    VeryLow,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskBucket {
    pub const ALL: [RiskBucket; 5] = [
        RiskBucket::VeryLow,
        RiskBucket::Low,
        RiskBucket::Medium,
        RiskBucket::High,
        RiskBucket::Critical,
    ];

    pub fn for_index(index: u8) -> Self {
        match index {
            0..=20 => Self::VeryLow,
            21..=40 => Self::Low,
            41..=60 => Self::Medium,
            61..=80 => Self::High,
            _ => Self::Critical,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::VeryLow => "Very Low",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name:        String,
    pub observed:    f64,
    pub severity:    Severity,
    pub explanation: String,
    /// Distance past the trigger, as a percentage of the trigger.
    pub magnitude:   f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubIndicator {
    pub name:   String,
    /// Mapped value in [0, 100]; None when the input was unavailable.
    pub value:  Option<f64>,
    pub weight: f64,
    /// Weight after renormalisation over the available subset.
    pub effective_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub institution_id: InstitutionId,
    pub index:          u8,
    pub raw_index:      f64,
    pub bucket:         RiskBucket,
    pub coverage:       f64,
    pub components:     Vec<SubIndicator>,
    pub factors:        Vec<RiskFactor>,
    pub summary:        String,
}

impl RiskScore {
    pub fn top_factors(&self, n: usize) -> &[RiskFactor] {
        &self.factors[..n.min(self.factors.len())]
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────────

pub fn score(inst: &NormalizedInstitution, config: &RiskConfig) -> AegisResult<RiskScore> {
    let m = &inst.metrics;
    let w = &config.weights;

    let raw = [
        ("retention_deficit", m.retention_rate.map(|r| (1.0 - r) * 100.0), w.retention_deficit),
        ("completion_deficit", m.completion_rate.map(|c| (1.0 - c) * 100.0), w.completion_deficit),
        ("pell_dependency", m.pell_share.map(|p| p * 100.0), w.pell_dependency),
        (
            "financial_fragility",
            inst.value_add_ratio.map(|va| fragility(va, config.fragility_scale)),
            w.financial_fragility,
        ),
    ];

    let available_weight: f64 = raw
        .iter()
        .filter(|(_, v, _)| v.is_some())
        .map(|(_, _, weight)| *weight)
        .sum();
    let present = raw.iter().filter(|(_, v, _)| v.is_some()).count();

    if present == 0 || available_weight <= EPSILON {
        return Err(AegisError::InsufficientData {
            what: format!("risk index for institution {}", inst.id),
            required: 1,
            available: 0,
        });
    }

    let mut weighted = 0.0;
    let components: Vec<SubIndicator> = raw
        .iter()
        .map(|(name, value, weight)| {
            let effective_weight = if value.is_some() { weight / available_weight } else { 0.0 };
            if let Some(v) = value {
                weighted += v.clamp(0.0, 100.0) * effective_weight;
            }
            SubIndicator {
                name: name.to_string(),
                value: value.map(|v| v.clamp(0.0, 100.0)),
                weight: *weight,
                effective_weight,
            }
        })
        .collect();

    let raw_index = weighted.clamp(0.0, 100.0);
    let index = raw_index.round() as u8;
    let factors = explain(inst, config);
    let summary = summarize(&factors);

    if present < raw.len() {
        log::debug!(
            "score: institution={} renormalised over {present}/{} indicators coverage={:.2}",
            inst.id,
            raw.len(),
            available_weight / w.sum().max(EPSILON),
        );
    }

    Ok(RiskScore {
        institution_id: inst.id,
        index,
        raw_index,
        bucket: RiskBucket::for_index(index),
        coverage: available_weight / w.sum().max(EPSILON),
        components,
        factors,
        summary,
    })
}

/// Scores every institution in parallel; order follows the input.
pub fn score_batch(
    institutions: &[NormalizedInstitution],
    config: &RiskConfig,
) -> Vec<(InstitutionId, AegisResult<RiskScore>)> {
    institutions
        .par_iter()
        .map(|inst| (inst.id, score(inst, config)))
        .collect()
}

fn fragility(value_add_ratio: f64, scale: f64) -> f64 {
    if value_add_ratio <= 0.0 {
        100.0
    } else {
        (scale / value_add_ratio).clamp(0.0, 100.0)
    }
}

// ── Factors ──────────────────────────────────────────────────────────────────

fn severity_of(band: &SeverityBand, value: f64) -> Option<Severity> {
    let past = |threshold: f64| match band.direction {
        BandDirection::Below => value < threshold,
        BandDirection::Above => value > threshold,
    };
    if past(band.high) {
        Some(Severity::High)
    } else if past(band.medium) {
        Some(Severity::Medium)
    } else if past(band.trigger) {
        Some(Severity::Low)
    } else {
        None
    }
}

fn magnitude(trigger: f64, value: f64) -> f64 {
    ((value - trigger).abs() / trigger.abs().max(EPSILON) * 100.0).clamp(0.0, 100.0)
}

fn explain(inst: &NormalizedInstitution, config: &RiskConfig) -> Vec<RiskFactor> {
    let m = &inst.metrics;
    let mut factors = Vec::new();

    let mut banded = |name: &str, band: &SeverityBand, value: Option<f64>, text: &dyn Fn(f64) -> String| {
        let Some(v) = value else { return };
        if let Some(severity) = severity_of(band, v) {
            factors.push(RiskFactor {
                name: name.to_string(),
                observed: v,
                severity,
                explanation: text(v),
                magnitude: magnitude(band.trigger, v),
            });
        }
    };

    banded("Low Retention", &config.retention_band, m.retention_rate, &|v| {
        format!("Only {:.1}% of students return for a second year", v * 100.0)
    });
    banded("Low Completion", &config.completion_band, m.completion_rate, &|v| {
        format!("Only {:.1}% of students graduate within six years", v * 100.0)
    });
    banded("High Pell Dependency", &config.pell_band, m.pell_share, &|v| {
        format!("{:.1}% of students rely on Pell Grants", v * 100.0)
    });

    let debt_to_earnings = match (m.median_debt, m.median_earnings) {
        (Some(debt), Some(earnings)) if debt > 0.0 && earnings > 0.0 => Some(debt / earnings),
        _ => None,
    };
    let (debt, earnings) = (m.median_debt.unwrap_or(0.0), m.median_earnings.unwrap_or(0.0));
    banded("Poor ROI", &config.debt_to_earnings_band, debt_to_earnings, &|v| {
        format!("Debt-to-earnings ratio of {v:.2}x (${debt:.0} debt vs ${earnings:.0} earnings)")
    });

    if let Some(admission) = m.admission_rate.filter(|a| *a > config.admission_rate_trigger) {
        factors.push(RiskFactor {
            name: "Non-Selective Admissions".into(),
            observed: admission,
            severity: Severity::Low,
            explanation: format!(
                "Admits {:.1}% of applicants; may face quality perception issues",
                admission * 100.0
            ),
            magnitude: magnitude(config.admission_rate_trigger, admission),
        });
    }

    if let Some(miles) = inst
        .geographic_isolation_miles
        .filter(|d| *d > config.isolation_trigger_miles)
    {
        factors.push(RiskFactor {
            name: "Geographic Isolation".into(),
            observed: miles,
            severity: Severity::Low,
            explanation: format!("{miles:.0} miles from the nearest major metro"),
            magnitude: magnitude(config.isolation_trigger_miles, miles),
        });
    }

    factors.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.magnitude.total_cmp(&a.magnitude))
            .then_with(|| a.name.cmp(&b.name))
    });
    factors
}

fn summarize(factors: &[RiskFactor]) -> String {
    let high = factors.iter().filter(|f| f.severity == Severity::High).count();
    let medium = factors.iter().filter(|f| f.severity == Severity::Medium).count();
    match (high, medium) {
        (0, 0) => "Low risk".to_string(),
        (0, m) => format!("{m} moderate concerns"),
        (h, 0) => format!("{h} critical"),
        (h, m) => format!("{h} critical, {m} moderate"),
    }
}
