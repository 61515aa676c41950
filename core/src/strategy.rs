//! Strategy comparator — named allocation strategies over one optimizer.
//!
//! Strategies differ only in how candidates and constraints are built:
//!   - base: graduates-per-dollar curves, eligibility by minimum completion
//!   - performance: base, with lift multiplied for institutions whose
//!     value-add ratio is at or above a percentile of the eligible pool
//!   - retention_trigger: base, plus a reserved budget share spent as fixed
//!     per-student micro-grants at institutions flagged short-term at-risk
//!
//! The outcome is Pell graduates: population = Pell students, baseline
//! metric = completion rate.

use crate::{
    config::{AegisConfig, LiftModel},
    error::{AegisError, AegisResult},
    optimizer::{
        self, AllocationCandidate, AllocationConstraints, AllocationResult, Channel, EligibilityFlags,
        ImprovementCurve,
    },
    record::NormalizedInstitution,
    types::{InstitutionId, EPSILON},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Base,
    Performance,
    RetentionTrigger,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [Self::Base, Self::Performance, Self::RetentionTrigger];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Performance => "performance",
            Self::RetentionTrigger => "retention_trigger",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = AegisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Ok(Self::Base),
            "performance" => Ok(Self::Performance),
            "retention_trigger" | "retention-trigger" => Ok(Self::RetentionTrigger),
            other => Err(AegisError::UnknownStrategy { name: other.to_string() }),
        }
    }
}

/// Read-only inputs shared by every strategy run.
#[derive(Debug, Clone, Copy)]
pub struct StrategyInputs<'a> {
    pub institutions:    &'a [NormalizedInstitution],
    pub risk_index:      &'a HashMap<InstitutionId, u8>,
    pub short_term_risk: &'a HashSet<InstitutionId>,
}

#[derive(Debug, Clone)]
pub struct StrategyPlan {
    pub kind:          StrategyKind,
    pub candidates:    Vec<AllocationCandidate>,
    pub constraints:   AllocationConstraints,
    pub bonus_schools: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySummary {
    pub strategy:              StrategyKind,
    pub graduates:             f64,
    pub additional_graduates:  f64,
    pub cost_per_graduate:     Option<f64>,
    pub cost_per_additional_graduate: Option<f64>,
    pub schools_funded:        usize,
    pub total_allocated:       f64,
    pub approximate:           bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bonus_schools:         Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub micro_grant_students:  Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervention_lift:     Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRun {
    pub summary: StrategySummary,
    pub result:  AllocationResult,
}

/// Share of the improvement headroom an investment can unlock.
pub fn headroom_share(lift: &LiftModel, risk_index: u8, pell_share: f64) -> f64 {
    (f64::from(risk_index) / 100.0) * lift.risk_weight + pell_share * lift.pell_weight
}

pub fn plan(kind: StrategyKind, inputs: StrategyInputs<'_>, config: &AegisConfig) -> StrategyPlan {
    let s = &config.strategies;
    let mut candidates: Vec<AllocationCandidate> = inputs
        .institutions
        .iter()
        .filter_map(|inst| {
            let m = &inst.metrics;
            let completion = m.completion_rate?;
            let pell_share = m.pell_share?;
            let pell_students = inst.pell_students()?;
            let risk = inputs.risk_index.get(&inst.id).copied().unwrap_or(0);
            let lift = pell_students * (1.0 - completion) * headroom_share(&config.optimizer.lift, risk, pell_share);
            Some(AllocationCandidate {
                institution_id: inst.id,
                name: inst.name.clone(),
                enrollment: inst.enrollment(),
                population: pell_students,
                baseline_metric: completion,
                curve: ImprovementCurve::Saturating {
                    lift,
                    scale: s.curve_scale,
                },
                pell_share,
                channel: Channel::Standard,
                eligibility: EligibilityFlags {
                    meets_enrollment: pell_students > 0.0,
                    meets_academic: true,
                    meets_outcome: completion >= s.min_completion_rate,
                },
            })
        })
        .collect();

    let mut bonus_schools = 0;
    let mut shock_reserve_share = 0.0;

    match kind {
        StrategyKind::Base => {}
        StrategyKind::Performance => {
            let value_add: HashMap<InstitutionId, f64> = inputs
                .institutions
                .iter()
                .filter_map(|i| Some((i.id, i.value_add_ratio?)))
                .collect();
            let pool: Vec<f64> = candidates
                .iter()
                .filter(|c| c.is_eligible())
                .filter_map(|c| value_add.get(&c.institution_id).copied())
                .collect();
            if !pool.is_empty() {
                let threshold = Data::new(pool).quantile(s.performance_percentile);
                for c in candidates.iter_mut().filter(|c| c.is_eligible()) {
                    if value_add.get(&c.institution_id).is_some_and(|va| *va >= threshold) {
                        if let ImprovementCurve::Saturating { lift, .. } = &mut c.curve {
                            *lift *= s.performance_multiplier;
                        }
                        bonus_schools += 1;
                    }
                }
                log::debug!("plan: performance threshold={threshold:.3} bonus_schools={bonus_schools}");
            }
        }
        StrategyKind::RetentionTrigger => {
            shock_reserve_share = s.reserve_fraction;
            let shock: Vec<AllocationCandidate> = candidates
                .iter()
                .filter(|c| c.is_eligible() && inputs.short_term_risk.contains(&c.institution_id))
                .filter_map(|c| {
                    let inst = inputs.institutions.iter().find(|i| i.id == c.institution_id)?;
                    let retention = inst.metrics.retention_rate?;
                    Some(AllocationCandidate {
                        curve: ImprovementCurve::PerStudentGrant {
                            grant: s.per_student_grant,
                            effect: s.micro_grant_effect,
                            max_students: (c.population * (1.0 - retention)).floor(),
                        },
                        channel: Channel::ShockAbsorption,
                        ..c.clone()
                    })
                })
                .collect();
            log::debug!("plan: retention_trigger shock candidates={}", shock.len());
            candidates.extend(shock);
        }
    }

    let constraints = AllocationConstraints {
        step: s.step,
        max_per_institution: Some(s.max_per_institution),
        shock_reserve_share,
        max_iterations: config.optimizer.max_iterations,
        time_limit: config.optimizer.time_limit_ms.map(std::time::Duration::from_millis),
        parallel_scan_threshold: config.optimizer.parallel_scan_threshold,
        ..AllocationConstraints::default()
    };

    StrategyPlan {
        kind,
        candidates,
        constraints,
        bonus_schools,
    }
}

pub fn run(kind: StrategyKind, inputs: StrategyInputs<'_>, budget: f64, config: &AegisConfig) -> AegisResult<StrategyRun> {
    let plan = plan(kind, inputs, config);
    let result = optimizer::optimize(&plan.candidates, budget, &plan.constraints)?;
    let summary = summarize(&plan, &result, config);
    log::info!(
        "strategy: {kind} graduates={:.1} funded={} allocated={:.2}",
        summary.graduates,
        summary.schools_funded,
        summary.total_allocated,
    );
    Ok(StrategyRun { summary, result })
}

fn summarize(plan: &StrategyPlan, result: &AllocationResult, config: &AegisConfig) -> StrategySummary {
    // Baseline graduates across the whole eligible pool, funded or not.
    let pool_baseline: f64 = plan
        .candidates
        .iter()
        .filter(|c| c.channel == Channel::Standard && c.is_eligible())
        .map(|c| c.population * c.baseline_metric)
        .sum();
    let additional = result.outcome_gain();
    let graduates = pool_baseline + additional;
    let per = |denominator: f64| (denominator > EPSILON).then(|| result.total_allocated / denominator);

    let shock: Vec<_> = result
        .allocations
        .iter()
        .filter(|a| a.channel == Channel::ShockAbsorption)
        .collect();
    let retention_trigger = plan.kind == StrategyKind::RetentionTrigger;

    StrategySummary {
        strategy: plan.kind,
        graduates,
        additional_graduates: additional,
        cost_per_graduate: per(graduates),
        cost_per_additional_graduate: per(additional),
        schools_funded: result.institutions_funded(),
        total_allocated: result.total_allocated,
        approximate: result.status == optimizer::AllocationStatus::Approximate,
        bonus_schools: (plan.kind == StrategyKind::Performance).then_some(plan.bonus_schools),
        micro_grant_students: retention_trigger.then(|| {
            shock
                .iter()
                .map(|a| (a.amount / config.strategies.per_student_grant).round())
                .sum::<f64>()
        }),
        intervention_lift: retention_trigger.then(|| shock.iter().map(|a| a.outcome_gain).sum::<f64>()),
    }
}

/// Runs every strategy on the same inputs and budget.
pub fn compare(inputs: StrategyInputs<'_>, budget: f64, config: &AegisConfig) -> AegisResult<Vec<StrategySummary>> {
    StrategyKind::ALL
        .par_iter()
        .map(|kind| run(*kind, inputs, budget, config).map(|r| r.summary))
        .collect()
}
