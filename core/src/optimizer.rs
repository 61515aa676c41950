//! Allocation optimizer — greedy water-filling over concave improvement curves.
//!
//! One optimizer serves every strategy. A run has three phases, each the same
//! increment loop over a different candidate subset:
//!   1. shock: the shock-absorption reserve, spent on per-student grants
//!   2. equity: the equity floor, spent only on institutions at or above the
//!      Pell-share threshold (the marginal floor does not apply)
//!   3. general: the remaining budget, all standard candidates compete
//!
//! Each increment goes to the candidate with the highest marginal return per
//! dollar; ties go to the larger enrollment, then the lower identifier.
//! Candidates are ranked on a full step whatever budget is left, so a larger
//! budget only extends the sequence of picks and never reorders it. The
//! per-institution cap covers every channel an institution is funded through.
//! Concave curves make the greedy choice optimal up to the step size.
//! Only the best-candidate scan is parallel; commits stay sequential.

use crate::{
    config::OptimizerConfig,
    error::{AegisError, AegisResult},
    types::{InstitutionId, EPSILON},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

// ── Improvement curves ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Dollars covered by this segment.
    pub width: f64,
    /// Outcome gained per dollar inside the segment.
    pub slope: f64,
}

/// Outcome gained as a function of dollars invested. Always concave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImprovementCurve {
    /// lift × (1 − e^(−x / scale))
    Saturating { lift: f64, scale: f64 },
    /// Consecutive segments with non-increasing slopes; flat past the last one.
    PiecewiseLinear { segments: Vec<Segment> },
    /// effect per funded student, `grant` dollars each, at most `max_students`.
    PerStudentGrant { grant: f64, effect: f64, max_students: f64 },
}

impl ImprovementCurve {
    pub fn value(&self, x: f64) -> f64 {
        let x = x.max(0.0);
        match self {
            Self::Saturating { lift, scale } => lift * (1.0 - (-x / scale).exp()),
            Self::PiecewiseLinear { segments } => {
                let mut left = x;
                let mut total = 0.0;
                for seg in segments {
                    let used = left.min(seg.width);
                    total += used * seg.slope;
                    left -= used;
                    if left <= 0.0 {
                        break;
                    }
                }
                total
            }
            Self::PerStudentGrant { grant, effect, max_students } => {
                ((x + EPSILON) / grant).floor().min(*max_students) * effect
            }
        }
    }

    /// Dollars past which the curve is flat.
    pub fn capacity(&self) -> Option<f64> {
        match self {
            Self::Saturating { .. } => None,
            Self::PiecewiseLinear { segments } => Some(segments.iter().map(|s| s.width).sum()),
            Self::PerStudentGrant { grant, max_students, .. } => Some(grant * max_students.floor()),
        }
    }

    /// Smallest indivisible increment, if the curve has one.
    pub fn granularity(&self) -> Option<f64> {
        match self {
            Self::PerStudentGrant { grant, .. } => Some(*grant),
            _ => None,
        }
    }

    pub fn validate(&self) -> AegisResult<()> {
        let bad = |detail: String| -> AegisResult<()> { Err(AegisError::infeasible("improvement_curve", detail)) };
        match self {
            Self::Saturating { lift, scale } => {
                if !(lift.is_finite() && *lift >= 0.0) || !(scale.is_finite() && *scale > 0.0) {
                    return bad(format!("saturating curve needs lift >= 0 and scale > 0, got {lift}/{scale}"));
                }
            }
            Self::PiecewiseLinear { segments } => {
                let mut prev = f64::INFINITY;
                for (i, seg) in segments.iter().enumerate() {
                    if !(seg.width.is_finite() && seg.width > 0.0) || !(seg.slope.is_finite() && seg.slope >= 0.0) {
                        return bad(format!("segment {i} must have positive width and non-negative slope"));
                    }
                    if seg.slope > prev {
                        return bad(format!("segment {i} slope {} exceeds previous {prev}; curve is not concave", seg.slope));
                    }
                    prev = seg.slope;
                }
            }
            Self::PerStudentGrant { grant, effect, max_students } => {
                if !(grant.is_finite() && *grant > 0.0) || *effect < 0.0 || *max_students < 0.0 {
                    return bad("per-student grant needs grant > 0, effect >= 0, max_students >= 0".into());
                }
            }
        }
        Ok(())
    }
}

// ── Candidates ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Standard,
    ShockAbsorption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityFlags {
    pub meets_enrollment: bool,
    pub meets_academic:   bool,
    pub meets_outcome:    bool,
}

impl Default for EligibilityFlags {
    fn default() -> Self {
        Self {
            meets_enrollment: true,
            meets_academic: true,
            meets_outcome: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationCandidate {
    pub institution_id:  InstitutionId,
    pub name:            String,
    pub enrollment:      f64,
    /// Students the baseline metric is measured over.
    pub population:      f64,
    pub baseline_metric: f64,
    pub curve:           ImprovementCurve,
    pub pell_share:      f64,
    pub channel:         Channel,
    pub eligibility:     EligibilityFlags,
}

impl AllocationCandidate {
    pub fn is_eligible(&self) -> bool {
        let e = &self.eligibility;
        e.meets_enrollment && e.meets_academic && e.meets_outcome
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConstraints {
    pub step:                    f64,
    pub marginal_floor:          f64,
    pub max_per_institution:     Option<f64>,
    pub equity_floor_share:      f64,
    /// Absolute floor; overrides the share when set.
    pub equity_floor_amount:     Option<f64>,
    pub equity_pell_threshold:   f64,
    pub shock_reserve_share:     f64,
    pub max_iterations:          usize,
    pub time_limit:              Option<Duration>,
    pub parallel_scan_threshold: usize,
}

impl Default for AllocationConstraints {
    fn default() -> Self {
        Self {
            step: 10_000.0,
            marginal_floor: 0.0,
            max_per_institution: None,
            equity_floor_share: 0.0,
            equity_floor_amount: None,
            equity_pell_threshold: 0.5,
            shock_reserve_share: 0.0,
            max_iterations: 1_000_000,
            time_limit: None,
            parallel_scan_threshold: 2048,
        }
    }
}

impl AllocationConstraints {
    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self {
            step: config.step,
            marginal_floor: config.marginal_floor,
            max_per_institution: config.max_per_institution,
            equity_floor_share: config.equity_floor_share,
            equity_floor_amount: None,
            equity_pell_threshold: config.equity_pell_threshold,
            shock_reserve_share: 0.0,
            max_iterations: config.max_iterations,
            time_limit: config.time_limit_ms.map(Duration::from_millis),
            parallel_scan_threshold: config.parallel_scan_threshold,
        }
    }

    pub fn equity_floor(&self, budget: f64) -> f64 {
        self.equity_floor_amount
            .unwrap_or(self.equity_floor_share * budget)
            .max(0.0)
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationStatus {
    Optimal,
    /// An iteration cap or time limit stopped the loop with budget left to place.
    Approximate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub institution_id:   InstitutionId,
    pub name:             String,
    pub channel:          Channel,
    pub amount:           f64,
    pub population:       f64,
    pub baseline_metric:  f64,
    pub projected_metric: f64,
    pub delta:            f64,
    pub outcome_gain:     f64,
    pub equity_reserved:  bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub status:            AllocationStatus,
    pub total_budget:      f64,
    pub total_allocated:   f64,
    pub utilization:       f64,
    pub equity_floor:      f64,
    pub equity_allocated:  f64,
    pub shock_reserve:     f64,
    pub shock_allocated:   f64,
    pub iterations:        usize,
    pub candidates_considered: usize,
    pub candidates_excluded:   usize,
    pub baseline_outcome:  f64,
    pub projected_outcome: f64,
    pub allocations:       Vec<Allocation>,
}

impl AllocationResult {
    fn empty(budget: f64, considered: usize, excluded: usize) -> Self {
        Self {
            status: AllocationStatus::Optimal,
            total_budget: budget,
            total_allocated: 0.0,
            utilization: 0.0,
            equity_floor: 0.0,
            equity_allocated: 0.0,
            shock_reserve: 0.0,
            shock_allocated: 0.0,
            iterations: 0,
            candidates_considered: considered,
            candidates_excluded: excluded,
            baseline_outcome: 0.0,
            projected_outcome: 0.0,
            allocations: Vec::new(),
        }
    }

    pub fn outcome_gain(&self) -> f64 {
        self.projected_outcome - self.baseline_outcome
    }

    /// Distinct institutions receiving any funds.
    pub fn institutions_funded(&self) -> usize {
        let mut ids: Vec<InstitutionId> = self.allocations.iter().map(|a| a.institution_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    pub fn allocation_for(&self, id: InstitutionId) -> f64 {
        self.allocations
            .iter()
            .filter(|a| a.institution_id == id)
            .map(|a| a.amount)
            .sum()
    }
}

// ── Water-filling ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Pick {
    idx:        usize,
    increment:  f64,
    marginal:   f64,
    enrollment: f64,
    id:         InstitutionId,
}

/// Greater means preferred.
fn rank(a: &Pick, b: &Pick) -> Ordering {
    a.marginal
        .total_cmp(&b.marginal)
        .then_with(|| a.enrollment.total_cmp(&b.enrollment))
        .then_with(|| b.id.cmp(&a.id))
}

struct Solver<'a> {
    candidates:  &'a [AllocationCandidate],
    constraints: &'a AllocationConstraints,
    amounts:     Vec<f64>,
    /// Curve capacity per candidate.
    caps:        Vec<f64>,
    /// Dollars committed per institution across channels.
    spent:       HashMap<InstitutionId, f64>,
    iterations:  usize,
    started:     Instant,
    truncated:   bool,
}

impl<'a> Solver<'a> {
    fn new(candidates: &'a [AllocationCandidate], constraints: &'a AllocationConstraints) -> Self {
        let caps = candidates
            .iter()
            .map(|c| c.curve.capacity().unwrap_or(f64::INFINITY))
            .collect();
        Self {
            candidates,
            constraints,
            amounts: vec![0.0; candidates.len()],
            caps,
            spent: HashMap::new(),
            iterations: 0,
            started: Instant::now(),
            truncated: false,
        }
    }

    fn headroom(&self, idx: usize) -> f64 {
        let c = &self.candidates[idx];
        let institution_left = self.constraints.max_per_institution.map_or(f64::INFINITY, |cap| {
            cap - self.spent.get(&c.institution_id).copied().unwrap_or(0.0)
        });
        (self.caps[idx] - self.amounts[idx]).min(institution_left)
    }

    /// Ranks a candidate on the increment it would take with an unlimited
    /// budget; `remaining` only rules out indivisible grants that no longer fit.
    fn evaluate(&self, idx: usize, remaining: f64) -> Option<Pick> {
        let c = &self.candidates[idx];
        let x = self.amounts[idx];
        let headroom = self.headroom(idx);
        let increment = match c.curve.granularity() {
            Some(g) if remaining + EPSILON >= g && headroom + EPSILON >= g => g,
            Some(_) => return None,
            None => self.constraints.step.min(headroom),
        };
        if increment <= EPSILON {
            return None;
        }
        let gain = c.curve.value(x + increment) - c.curve.value(x);
        Some(Pick {
            idx,
            increment,
            marginal: gain / increment,
            enrollment: c.enrollment,
            id: c.institution_id,
        })
    }

    fn best(&self, pool: &[usize], remaining: f64) -> Option<Pick> {
        let better = |a: Pick, b: Pick| if rank(&b, &a) == Ordering::Greater { b } else { a };
        if pool.len() >= self.constraints.parallel_scan_threshold {
            pool.par_iter()
                .filter_map(|&i| self.evaluate(i, remaining))
                .reduce_with(better)
        } else {
            pool.iter()
                .filter_map(|&i| self.evaluate(i, remaining))
                .reduce(better)
        }
    }

    fn out_of_time(&self) -> bool {
        self.iterations >= self.constraints.max_iterations
            || self
                .constraints
                .time_limit
                .is_some_and(|limit| self.started.elapsed() >= limit)
    }

    /// Spends up to `budget` over `pool`. Returns the amount placed.
    fn fill(&mut self, phase: &str, pool: &[usize], budget: f64, respect_floor: bool) -> f64 {
        let mut remaining = budget;
        while remaining > EPSILON {
            if self.out_of_time() {
                self.truncated = true;
                log::warn!(
                    "optimize: phase={phase} stopped at iteration={} remaining={remaining:.2}",
                    self.iterations
                );
                break;
            }
            let Some(pick) = self.best(pool, remaining) else { break };
            if respect_floor && (pick.marginal <= 0.0 || pick.marginal < self.constraints.marginal_floor) {
                log::debug!(
                    "optimize: phase={phase} marginal {:.3e} below floor, {remaining:.2} left unplaced",
                    pick.marginal
                );
                break;
            }
            let committed = pick.increment.min(remaining);
            self.amounts[pick.idx] += committed;
            *self.spent.entry(pick.id).or_insert(0.0) += committed;
            remaining -= committed;
            self.iterations += 1;
        }
        budget - remaining.max(0.0)
    }
}

/// Distributes `budget` across eligible candidates.
///
/// Ineligible candidates are dropped before the solve and never receive an
/// allocation. A zero budget or an empty eligible set yields an empty result.
pub fn optimize(
    candidates: &[AllocationCandidate],
    budget: f64,
    constraints: &AllocationConstraints,
) -> AegisResult<AllocationResult> {
    if !budget.is_finite() || budget < 0.0 {
        return Err(AegisError::infeasible("budget", format!("budget must be a non-negative amount, got {budget}")));
    }
    if !(constraints.step.is_finite() && constraints.step > 0.0) {
        return Err(AegisError::infeasible("step", format!("step must be positive, got {}", constraints.step)));
    }
    if !(0.0..1.0).contains(&constraints.shock_reserve_share) {
        return Err(AegisError::infeasible(
            "shock_reserve",
            format!("reserve share must lie in [0, 1), got {}", constraints.shock_reserve_share),
        ));
    }
    let equity_floor = constraints.equity_floor(budget);
    if equity_floor > budget + EPSILON {
        return Err(AegisError::infeasible(
            "equity_floor",
            format!("floor {equity_floor:.2} exceeds budget {budget:.2}"),
        ));
    }
    let shock_reserve = constraints.shock_reserve_share * budget;
    if equity_floor + shock_reserve > budget + EPSILON {
        return Err(AegisError::infeasible(
            "shock_reserve",
            format!("floor {equity_floor:.2} plus reserve {shock_reserve:.2} exceeds budget {budget:.2}"),
        ));
    }

    let eligible: Vec<AllocationCandidate> = candidates.iter().filter(|c| c.is_eligible()).cloned().collect();
    let excluded = candidates.len() - eligible.len();
    for c in &eligible {
        c.curve.validate()?;
    }
    if budget <= EPSILON || eligible.is_empty() {
        log::info!(
            "optimize: budget={budget:.2} eligible={} excluded={excluded}; nothing to allocate",
            eligible.len()
        );
        return Ok(AllocationResult::empty(budget, eligible.len(), excluded));
    }

    let is_reserved = |c: &AllocationCandidate| {
        c.channel == Channel::Standard && c.pell_share >= constraints.equity_pell_threshold
    };
    let shock_pool: Vec<usize> = (0..eligible.len())
        .filter(|&i| eligible[i].channel == Channel::ShockAbsorption)
        .collect();
    let standard_pool: Vec<usize> = (0..eligible.len())
        .filter(|&i| eligible[i].channel == Channel::Standard)
        .collect();
    let reserved_pool: Vec<usize> = standard_pool.iter().copied().filter(|&i| is_reserved(&eligible[i])).collect();

    let mut solver = Solver::new(&eligible, constraints);

    // 1. Shock-absorption reserve; whatever it cannot place returns to the pool.
    let shock_allocated = if shock_reserve > EPSILON {
        let placed = solver.fill("shock", &shock_pool, shock_reserve, false);
        if placed + EPSILON < shock_reserve {
            log::warn!(
                "optimize: shock reserve {shock_reserve:.2} only placed {placed:.2}; remainder returns to general pool"
            );
        }
        placed
    } else {
        0.0
    };

    // 2. Equity floor.
    let mut equity_placed = 0.0;
    if equity_floor > EPSILON {
        if reserved_pool.is_empty() {
            return Err(AegisError::infeasible(
                "equity_floor",
                format!(
                    "floor {equity_floor:.2} requires institutions with Pell share >= {:.2}; none are eligible",
                    constraints.equity_pell_threshold
                ),
            ));
        }
        equity_placed = solver.fill("equity", &reserved_pool, equity_floor, false);
        if equity_placed + EPSILON < equity_floor && !solver.truncated {
            return Err(AegisError::infeasible(
                "equity_floor",
                format!("reserved institutions can absorb only {equity_placed:.2} of floor {equity_floor:.2}"),
            ));
        }
    }

    // 3. General budget; reserved institutions compete here too.
    let general = budget - shock_allocated - equity_placed;
    solver.fill("general", &standard_pool, general, true);

    let status = if solver.truncated {
        AllocationStatus::Approximate
    } else {
        AllocationStatus::Optimal
    };
    let mut result = assemble(&eligible, &solver.amounts, budget, status, excluded, &is_reserved);
    result.equity_floor = equity_floor;
    result.shock_reserve = shock_reserve;
    result.shock_allocated = shock_allocated;
    result.iterations = solver.iterations;

    log::info!(
        "optimize: budget={budget:.2} allocated={:.2} funded={} iterations={} status={:?}",
        result.total_allocated,
        result.institutions_funded(),
        result.iterations,
        result.status,
    );
    Ok(result)
}

fn assemble(
    eligible: &[AllocationCandidate],
    amounts: &[f64],
    budget: f64,
    status: AllocationStatus,
    excluded: usize,
    is_reserved: &dyn Fn(&AllocationCandidate) -> bool,
) -> AllocationResult {
    let mut result = AllocationResult::empty(budget, eligible.len(), excluded);
    result.status = status;
    let mut counted: HashSet<InstitutionId> = HashSet::new();

    for (c, &amount) in eligible.iter().zip(amounts) {
        if amount <= EPSILON {
            continue;
        }
        let gain = c.curve.value(amount);
        let population = c.population.max(EPSILON);
        let projected_metric = c.baseline_metric + gain / population;
        let reserved = is_reserved(c);

        result.total_allocated += amount;
        if reserved {
            result.equity_allocated += amount;
        }
        // Baseline once per institution, however many channels fund it.
        if counted.insert(c.institution_id) {
            result.baseline_outcome += c.population * c.baseline_metric;
            result.projected_outcome += c.population * c.baseline_metric;
        }
        result.projected_outcome += gain;
        result.allocations.push(Allocation {
            institution_id: c.institution_id,
            name: c.name.clone(),
            channel: c.channel,
            amount,
            population: c.population,
            baseline_metric: c.baseline_metric,
            projected_metric,
            delta: projected_metric - c.baseline_metric,
            outcome_gain: gain,
            equity_reserved: reserved,
        });
    }

    result.allocations.sort_by(|a, b| {
        b.amount
            .total_cmp(&a.amount)
            .then_with(|| a.institution_id.cmp(&b.institution_id))
            .then_with(|| a.channel.cmp(&b.channel))
    });
    result.utilization = if budget > 0.0 { result.total_allocated / budget } else { 0.0 };
    result
}
