//! Institutional viability score.
//!
//! risk = pell_weight × max(0, pell − pell_floor)
//!      + repayment_weight × (1 − repayment proxy)
//!      + completion / retention / size shortfall terms
//! score = 100 × (1 − min(1, risk))
//!
//! The repayment proxy is the reported loan repayment rate, or the value-add
//! ratio scaled by `value_add_reference` when no rate exists. Without Pell
//! share or a repayment proxy there is no assessment. A missing completion,
//! retention or enrollment contributes no shortfall term.

use crate::{config::ViabilityConfig, record::NormalizedInstitution, types::InstitutionId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViabilityLevel {
    Critical,
    Elevated,
    Moderate,
    Stable,
}

impl ViabilityLevel {
    pub fn for_score(score: f64, config: &ViabilityConfig) -> Self {
        if score < config.critical_below {
            Self::Critical
        } else if score < config.elevated_below {
            Self::Elevated
        } else if score < config.moderate_below {
            Self::Moderate
        } else {
            Self::Stable
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViabilityAssessment {
    pub institution_id:  InstitutionId,
    pub name:            String,
    pub state:           String,
    /// 0..=100, rounded to one decimal; higher is more viable.
    pub score:           f64,
    pub level:           ViabilityLevel,
    pub pell_dependency: f64,
    pub repayment_proxy: f64,
    pub factors:         Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ViabilitySummary {
    pub evaluated:   usize,
    pub unavailable: usize,
    pub mean_score:  Option<f64>,
    pub critical:    usize,
    pub elevated:    usize,
    pub moderate:    usize,
    pub stable:      usize,
    /// Institutions below the requested score, weakest first.
    pub flagged:     Vec<ViabilityAssessment>,
}

pub fn repayment_proxy(inst: &NormalizedInstitution, config: &ViabilityConfig) -> Option<f64> {
    inst.metrics
        .repayment_rate
        .or_else(|| inst.value_add_ratio.map(|va| va / config.value_add_reference))
        .map(|p| p.clamp(0.0, 1.0))
}

pub fn assess(inst: &NormalizedInstitution, config: &ViabilityConfig) -> Option<ViabilityAssessment> {
    let m = &inst.metrics;
    let pell = m.pell_share?;
    let proxy = repayment_proxy(inst, config)?;

    let pell_risk = config.pell_weight * (pell - config.pell_floor).max(0.0);
    let repayment_risk = config.repayment_weight * (1.0 - proxy);
    let completion_risk = m
        .completion_rate
        .map_or(0.0, |c| config.completion_weight * (config.completion_target - c).max(0.0));
    let retention_risk = m
        .retention_rate
        .map_or(0.0, |r| config.retention_weight * (config.retention_target - r).max(0.0));
    let size_risk = m.enrollment_size.map_or(0.0, |s| {
        config.size_weight * ((config.size_floor - s) / config.size_floor).clamp(0.0, 1.0)
    });

    let risk = (pell_risk + repayment_risk + completion_risk + retention_risk + size_risk).min(1.0);
    let score = ((1.0 - risk) * 1000.0).round() / 10.0;

    let mut factors = Vec::new();
    if pell > 0.5 {
        factors.push(format!("High Pell dependence ({:.0}%)", pell * 100.0));
    }
    if proxy < 0.5 {
        factors.push(format!("Weak loan repayment ({:.0}%)", proxy * 100.0));
    }
    if let Some(c) = m.completion_rate.filter(|c| *c < 0.4) {
        factors.push(format!("Low completion rate ({:.0}%)", c * 100.0));
    }
    if let Some(r) = m.retention_rate.filter(|r| *r < 0.6) {
        factors.push(format!("Low retention rate ({:.0}%)", r * 100.0));
    }
    if let Some(s) = m.enrollment_size.filter(|s| *s < config.size_floor / 2.0) {
        factors.push(format!("Small enrollment ({s:.0})"));
    }
    factors.truncate(3);

    Some(ViabilityAssessment {
        institution_id: inst.id,
        name: inst.name.clone(),
        state: inst.state.clone(),
        score,
        level: ViabilityLevel::for_score(score, config),
        pell_dependency: pell,
        repayment_proxy: proxy,
        factors,
    })
}

/// Assesses every institution and flags those scoring below `max_score`.
pub fn summarize(
    institutions: &[NormalizedInstitution],
    config: &ViabilityConfig,
    max_score: f64,
) -> ViabilitySummary {
    let mut summary = ViabilitySummary::default();
    let mut total = 0.0;
    for inst in institutions {
        let Some(a) = assess(inst, config) else {
            summary.unavailable += 1;
            continue;
        };
        summary.evaluated += 1;
        total += a.score;
        match a.level {
            ViabilityLevel::Critical => summary.critical += 1,
            ViabilityLevel::Elevated => summary.elevated += 1,
            ViabilityLevel::Moderate => summary.moderate += 1,
            ViabilityLevel::Stable => summary.stable += 1,
        }
        if a.score < max_score {
            summary.flagged.push(a);
        }
    }
    summary.mean_score = (summary.evaluated > 0).then(|| total / summary.evaluated as f64);
    summary
        .flagged
        .sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| a.institution_id.cmp(&b.institution_id)));
    summary
}
