//! Descriptive metrics over a scored batch.
//!
//! Everything here is a read-only aggregation: risk histogram, dashboard
//! stats, Pell completion gaps, the equity/value-add quadrant matrix and
//! the enrollment/revenue projection. Purchasing power comes from a fixed
//! historical table and ignores the batch entirely.

use crate::{
    record::{Field, NormalizedInstitution, Ownership},
    risk::{RiskBucket, RiskScore},
    types::InstitutionId,
};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};
use std::collections::HashMap;

// ── Purchasing power ─────────────────────────────────────────────────────────

/// (award year, maximum Pell grant, average public four-year cost of attendance)
const PELL_HISTORY: [(i32, f64, f64); 12] = [
    (1976, 1_400.0, 2_275.0),
    (1980, 1_750.0, 2_550.0),
    (1985, 2_100.0, 3_860.0),
    (1990, 2_300.0, 5_070.0),
    (1995, 2_340.0, 6_740.0),
    (2000, 3_300.0, 8_440.0),
    (2005, 4_050.0, 12_130.0),
    (2010, 5_550.0, 16_140.0),
    (2015, 5_775.0, 19_550.0),
    (2020, 6_345.0, 22_180.0),
    (2023, 7_395.0, 24_030.0),
    (2024, 7_395.0, 24_920.0),
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurchasingPowerPoint {
    pub year:           i32,
    pub max_pell:       f64,
    pub cost:           f64,
    /// Share of cost of attendance the maximum award covers.
    pub coverage_ratio: f64,
}

pub fn purchasing_power() -> Vec<PurchasingPowerPoint> {
    PELL_HISTORY
        .iter()
        .map(|&(year, max_pell, cost)| PurchasingPowerPoint {
            year,
            max_pell,
            cost,
            coverage_ratio: max_pell / cost,
        })
        .collect()
}

// ── Risk distribution ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskDistribution {
    pub bins:   Vec<String>,
    pub counts: Vec<usize>,
}

pub fn risk_distribution<'a>(scores: impl IntoIterator<Item = &'a RiskScore>) -> RiskDistribution {
    let mut counts = [0usize; 5];
    for s in scores {
        let slot = RiskBucket::ALL.iter().position(|b| *b == s.bucket).unwrap_or(0);
        counts[slot] += 1;
    }
    RiskDistribution {
        bins: RiskBucket::ALL.iter().map(|b| b.label().to_string()).collect(),
        counts: counts.to_vec(),
    }
}

// ── Dashboard stats ──────────────────────────────────────────────────────────

/// Risk index above which an institution counts as high-risk on the dashboard.
pub const HIGH_RISK_INDEX: u8 = 70;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardStats {
    pub total_schools:   usize,
    pub avg_retention:   Option<f64>,
    pub avg_risk_index:  Option<f64>,
    pub high_risk_count: usize,
    pub median_earnings: Option<f64>,
    pub median_debt:     Option<f64>,
    pub avg_value_add:   Option<f64>,
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: Vec<f64>) -> Option<f64> {
    (!values.is_empty()).then(|| Data::new(values).median())
}

pub fn stats(institutions: &[NormalizedInstitution], scores: &HashMap<InstitutionId, RiskScore>) -> DashboardStats {
    let column = |field: Field| -> Vec<f64> { institutions.iter().filter_map(|i| i.metric(field)).collect() };
    let indices: Vec<f64> = institutions
        .iter()
        .filter_map(|i| scores.get(&i.id))
        .map(|s| f64::from(s.index))
        .collect();
    let value_add: Vec<f64> = institutions.iter().filter_map(|i| i.value_add_ratio).collect();

    DashboardStats {
        total_schools: institutions.len(),
        avg_retention: mean(&column(Field::RetentionRate)),
        avg_risk_index: mean(&indices),
        high_risk_count: indices.iter().filter(|i| **i > f64::from(HIGH_RISK_INDEX)).count(),
        median_earnings: median(column(Field::MedianEarnings)),
        median_debt: median(column(Field::MedianDebt)),
        avg_value_add: mean(&value_add),
    }
}

// ── Completion gap ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionGap {
    pub institution_id:      InstitutionId,
    pub name:                String,
    pub state:               String,
    pub pell_completion:     f64,
    pub non_pell_completion: f64,
    /// Pell minus non-Pell; negative when Pell students lag.
    pub gap:                 f64,
    pub imputed:             bool,
}

/// Institutions with both completion rates, widest Pell shortfall first.
pub fn completion_gap(institutions: &[NormalizedInstitution], limit: usize) -> Vec<CompletionGap> {
    let mut gaps: Vec<CompletionGap> = institutions
        .iter()
        .filter_map(|i| {
            Some(CompletionGap {
                institution_id: i.id,
                name: i.name.clone(),
                state: i.state.clone(),
                pell_completion: i.metrics.completion_rate_pell?,
                non_pell_completion: i.metrics.completion_rate_non_pell?,
                gap: i.completion_gap()?,
                imputed: i.imputed.contains(&Field::CompletionRatePell)
                    || i.imputed.contains(&Field::CompletionRateNonPell),
            })
        })
        .collect();
    gaps.sort_by(|a, b| a.gap.total_cmp(&b.gap).then_with(|| a.institution_id.cmp(&b.institution_id)));
    gaps.truncate(limit);
    gaps
}

// ── Equity / value-add matrix ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quadrant {
    /// High Pell share, high value-add.
    MobilityEngine,
    /// High Pell share, low value-add.
    UnderResourcedAccess,
    /// Low Pell share, high value-add.
    ExclusiveValue,
    Underperforming,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EquityFilter {
    pub state:          Option<String>,
    pub ownership:      Option<Ownership>,
    pub min_enrollment: Option<f64>,
}

impl EquityFilter {
    fn admits(&self, inst: &NormalizedInstitution) -> bool {
        self.state.as_ref().map_or(true, |s| inst.state.eq_ignore_ascii_case(s.trim()))
            && self.ownership.map_or(true, |o| inst.ownership == Some(o))
            && self.min_enrollment.map_or(true, |m| inst.enrollment() >= m)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EquityPoint {
    pub institution_id: InstitutionId,
    pub name:           String,
    pub state:          String,
    pub pell_share:     f64,
    pub value_add:      f64,
    pub quadrant:       Quadrant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EquityPerformance {
    pub pell_median:      Option<f64>,
    pub value_add_median: Option<f64>,
    pub points:           Vec<EquityPoint>,
}

impl EquityPerformance {
    pub fn count(&self, quadrant: Quadrant) -> usize {
        self.points.iter().filter(|p| p.quadrant == quadrant).count()
    }
}

/// Splits the filtered set at the median Pell share and median value-add.
pub fn equity_performance(institutions: &[NormalizedInstitution], filter: &EquityFilter) -> EquityPerformance {
    let pairs: Vec<(&NormalizedInstitution, f64, f64)> = institutions
        .iter()
        .filter(|i| filter.admits(i))
        .filter_map(|i| Some((i, i.metrics.pell_share?, i.value_add_ratio?)))
        .collect();

    let pell_median = median(pairs.iter().map(|p| p.1).collect());
    let value_add_median = median(pairs.iter().map(|p| p.2).collect());
    let (Some(pm), Some(vm)) = (pell_median, value_add_median) else {
        return EquityPerformance {
            pell_median,
            value_add_median,
            points: Vec::new(),
        };
    };

    let points = pairs
        .into_iter()
        .map(|(inst, pell, va)| EquityPoint {
            institution_id: inst.id,
            name: inst.name.clone(),
            state: inst.state.clone(),
            pell_share: pell,
            value_add: va,
            quadrant: match (pell >= pm, va >= vm) {
                (true, true) => Quadrant::MobilityEngine,
                (true, false) => Quadrant::UnderResourcedAccess,
                (false, true) => Quadrant::ExclusiveValue,
                (false, false) => Quadrant::Underperforming,
            },
        })
        .collect();

    EquityPerformance {
        pell_median,
        value_add_median,
        points,
    }
}

// ── Trends ───────────────────────────────────────────────────────────────────

pub const TREND_YEARS: i32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trends {
    pub years:      Vec<i32>,
    pub enrollment: Vec<f64>,
    pub revenue:    Vec<f64>,
    /// Always true: the series is projected from one batch, not observed.
    pub projected:  bool,
    pub note:       String,
}

/// Five-year projection ending at `end_year` from current enrollment and
/// low-income net price.
pub fn trends(institutions: &[NormalizedInstitution], end_year: i32) -> Trends {
    let base_enrollment: f64 = institutions.iter().map(|i| i.enrollment()).sum();
    let prices: Vec<f64> = institutions.iter().filter_map(|i| i.metrics.net_price_low_income).collect();
    let base_price = mean(&prices).unwrap_or(0.0);

    let start = end_year - (TREND_YEARS - 1);
    let mut out = Trends {
        years: Vec::new(),
        enrollment: Vec::new(),
        revenue: Vec::new(),
        projected: true,
        note: format!("{end_year} marks the demographic cliff"),
    };
    for i in 0..TREND_YEARS {
        let k = f64::from(i);
        let enrollment = base_enrollment * (1.0 - 0.02 * k - 0.005 * k * k);
        out.years.push(start + i);
        out.enrollment.push(enrollment.floor());
        out.revenue.push((enrollment * base_price * (1.0 + 0.03 * k)).floor());
    }
    out
}
