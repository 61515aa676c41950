//! Enrollment response to a change in per-student grant aid.
//!
//! Per institution: pell_students × (Δ / 1000) × enrollment_sensitivity,
//! summed over every institution with an enrollment and a Pell share. The
//! sensitivity is a configured constant, not fitted per request.

use crate::{config::PredictorConfig, record::NormalizedInstitution};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElasticityEstimate {
    pub grant_change:            f64,
    pub total_enrollment_change: f64,
    pub institutions_analyzed:   usize,
    pub pell_students:           f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElasticityReport {
    pub sensitivity: f64,
    pub scenarios:   Vec<ElasticityEstimate>,
}

pub fn estimate(institutions: &[NormalizedInstitution], grant_change: f64, sensitivity: f64) -> ElasticityEstimate {
    let pell: Vec<f64> = institutions.iter().filter_map(|i| i.pell_students()).collect();
    let pell_students: f64 = pell.iter().sum();
    ElasticityEstimate {
        grant_change,
        total_enrollment_change: pell_students * grant_change / 1000.0 * sensitivity,
        institutions_analyzed: pell.len(),
        pell_students,
    }
}

/// One estimate per configured grant-change scenario.
pub fn scenarios(institutions: &[NormalizedInstitution], config: &PredictorConfig) -> ElasticityReport {
    ElasticityReport {
        sensitivity: config.enrollment_sensitivity,
        scenarios: config
            .elasticity_scenarios
            .iter()
            .map(|delta| estimate(institutions, *delta, config.enrollment_sensitivity))
            .collect(),
    }
}
