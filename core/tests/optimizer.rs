//! Allocation optimizer: water-filling order, budget and eligibility
//! invariants, equity floor, shock reserve, truncation.

use aegis_core::{
    error::AegisError,
    optimizer::{
        optimize, AllocationCandidate, AllocationConstraints, AllocationStatus, Channel, EligibilityFlags,
        ImprovementCurve, Segment,
    },
};

const MILLION: f64 = 1_000_000.0;

fn candidate(id: u64, curve: ImprovementCurve) -> AllocationCandidate {
    AllocationCandidate {
        institution_id: id,
        name: format!("Institution {id}"),
        enrollment: 1000.0,
        population: 1000.0,
        baseline_metric: 0.5,
        curve,
        pell_share: 0.3,
        channel: Channel::Standard,
        eligibility: EligibilityFlags::default(),
    }
}

/// Linear at `lift` outcome per $1M for each listed width.
fn piecewise(parts: &[(f64, f64)]) -> ImprovementCurve {
    ImprovementCurve::PiecewiseLinear {
        segments: parts
            .iter()
            .map(|&(width, lift_per_million)| Segment {
                width,
                slope: lift_per_million / MILLION,
            })
            .collect(),
    }
}

fn saturating(id: u64, lift: f64, pell_share: f64) -> AllocationCandidate {
    AllocationCandidate {
        pell_share,
        enrollment: 500.0 + id as f64,
        ..candidate(id, ImprovementCurve::Saturating { lift, scale: 200_000.0 })
    }
}

fn constraints(step: f64) -> AllocationConstraints {
    AllocationConstraints {
        step,
        ..AllocationConstraints::default()
    }
}

/// A: 0.08 per $1M for the first $1M, then 0.02 for the next $1M.
/// B: 0.05 per $1M for $1M.  C: 0.03 per $1M for $2M.
fn three_institutions() -> Vec<AllocationCandidate> {
    vec![
        candidate(1, piecewise(&[(MILLION, 0.08), (MILLION, 0.02)])),
        candidate(2, piecewise(&[(MILLION, 0.05)])),
        candidate(3, piecewise(&[(2.0 * MILLION, 0.03)])),
    ]
}

#[test]
fn water_filling_follows_marginal_order() {
    let candidates = three_institutions();
    let steps = constraints(100_000.0);

    // $2M: A's first segment (0.08), then B (0.05); C (0.03) never reached.
    let r = optimize(&candidates, 2.0 * MILLION, &steps).expect("optimize");
    assert_eq!(r.status, AllocationStatus::Optimal);
    assert!((r.allocation_for(1) - MILLION).abs() < 1e-6);
    assert!((r.allocation_for(2) - MILLION).abs() < 1e-6);
    assert_eq!(r.allocation_for(3), 0.0);
    assert!((r.outcome_gain() - 0.13).abs() < 1e-9, "gain {}", r.outcome_gain());

    // $3M: C's 0.03 beats A's second segment at 0.02.
    let r = optimize(&candidates, 3.0 * MILLION, &steps).expect("optimize");
    assert!((r.allocation_for(1) - MILLION).abs() < 1e-6);
    assert!((r.allocation_for(2) - MILLION).abs() < 1e-6);
    assert!((r.allocation_for(3) - MILLION).abs() < 1e-6);

    // $5M: C saturates at $2M, then A's second segment takes the last $1M.
    let r = optimize(&candidates, 5.0 * MILLION, &steps).expect("optimize");
    assert!((r.allocation_for(1) - 2.0 * MILLION).abs() < 1e-6);
    assert!((r.allocation_for(2) - MILLION).abs() < 1e-6);
    assert!((r.allocation_for(3) - 2.0 * MILLION).abs() < 1e-6);
    assert!((r.total_allocated - 5.0 * MILLION).abs() < 1e-6);
}

#[test]
fn flat_curves_leave_budget_unplaced() {
    let candidates = three_institutions();
    // Total capacity is $5M; the rest has zero marginal return.
    let r = optimize(&candidates, 8.0 * MILLION, &constraints(100_000.0)).expect("optimize");
    assert!((r.total_allocated - 5.0 * MILLION).abs() < 1e-6);
    assert!(r.utilization < 1.0);
    assert_eq!(r.status, AllocationStatus::Optimal);
}

#[test]
fn projected_metric_adds_gain_over_population() {
    let r = optimize(&three_institutions(), 2.0 * MILLION, &constraints(100_000.0)).expect("optimize");
    let a = r.allocations.iter().find(|a| a.institution_id == 1).expect("A funded");
    assert!((a.outcome_gain - 0.08).abs() < 1e-9);
    assert!((a.projected_metric - (0.5 + 0.08 / 1000.0)).abs() < 1e-12);
    assert!((a.delta - 0.08 / 1000.0).abs() < 1e-12);
}

#[test]
fn ties_prefer_larger_enrollment_then_lower_id() {
    let curve = piecewise(&[(MILLION, 0.05)]);
    let mut small = candidate(1, curve.clone());
    small.enrollment = 500.0;
    let large = candidate(2, curve.clone());

    let r = optimize(&[small.clone(), large], 100_000.0, &constraints(100_000.0)).expect("optimize");
    assert_eq!(r.allocations.len(), 1);
    assert_eq!(r.allocations[0].institution_id, 2, "larger enrollment wins the tie");

    let twin = AllocationCandidate {
        institution_id: 0,
        ..small.clone()
    };
    let r = optimize(&[small, twin], 100_000.0, &constraints(100_000.0)).expect("optimize");
    assert_eq!(r.allocations[0].institution_id, 0, "lower id wins a full tie");
}

#[test]
fn never_exceeds_budget() {
    let candidates: Vec<_> = (1..=25).map(|i| saturating(i, 10.0 + i as f64, 0.4)).collect();
    for budget in [0.0, 55_555.0, 1_234_567.0, 3.0 * MILLION, 40.0 * MILLION] {
        let r = optimize(&candidates, budget, &constraints(25_000.0)).expect("optimize");
        assert!(
            r.total_allocated <= budget + 1e-6,
            "allocated {} of budget {budget}",
            r.total_allocated
        );
        let sum: f64 = r.allocations.iter().map(|a| a.amount).sum();
        assert!((sum - r.total_allocated).abs() < 1e-6);
    }
}

#[test]
fn ineligible_candidates_are_never_funded() {
    let mut candidates: Vec<_> = (1..=6).map(|i| saturating(i, 20.0, 0.4)).collect();
    candidates[1].eligibility.meets_academic = false;
    candidates[4].eligibility.meets_outcome = false;
    // The ineligible ones carry the best curves.
    candidates[1].curve = ImprovementCurve::Saturating { lift: 1_000.0, scale: 1_000.0 };
    candidates[4].curve = ImprovementCurve::Saturating { lift: 1_000.0, scale: 1_000.0 };

    let r = optimize(&candidates, 2.0 * MILLION, &constraints(50_000.0)).expect("optimize");
    assert_eq!(r.allocation_for(2), 0.0);
    assert_eq!(r.allocation_for(5), 0.0);
    assert_eq!(r.candidates_excluded, 2);
    assert_eq!(r.candidates_considered, 4);
}

#[test]
fn no_eligible_candidates_is_an_empty_result() {
    let mut only = saturating(1, 50.0, 0.6);
    only.eligibility.meets_enrollment = false;
    let r = optimize(&[only], MILLION, &constraints(10_000.0)).expect("not an error");
    assert_eq!(r.total_allocated, 0.0);
    assert!(r.allocations.is_empty());

    let r = optimize(&[], MILLION, &constraints(10_000.0)).expect("not an error");
    assert_eq!(r.total_allocated, 0.0);
    assert!(r.allocations.is_empty());
}

#[test]
fn zero_budget_is_an_empty_result() {
    let r = optimize(&three_institutions(), 0.0, &constraints(10_000.0)).expect("optimize");
    assert!(r.allocations.is_empty());
    assert_eq!(r.utilization, 0.0);
}

#[test]
fn more_budget_never_shrinks_an_allocation() {
    let candidates: Vec<_> = (1..=12).map(|i| saturating(i, 5.0 * i as f64, 0.4)).collect();
    let steps = constraints(20_000.0);
    let budgets = [200_000.0, 500_000.0, MILLION, 2.0 * MILLION, 5.0 * MILLION];
    let runs: Vec<_> = budgets
        .iter()
        .map(|b| optimize(&candidates, *b, &steps).expect("optimize"))
        .collect();
    for pair in runs.windows(2) {
        for c in &candidates {
            let before = pair[0].allocation_for(c.institution_id);
            let after = pair[1].allocation_for(c.institution_id);
            assert!(
                after + 1e-6 >= before,
                "institution {} dropped from {before} to {after}",
                c.institution_id
            );
        }
    }
}

/// A fast-saturating and a slow-saturating curve rank differently on a
/// partial step than on a full one; budgets below and between steps must
/// still extend the same sequence of picks.
#[test]
fn budgets_off_the_step_grid_never_shrink_an_allocation() {
    let fast = candidate(1, ImprovementCurve::Saturating { lift: 1.1, scale: 10_000.0 });
    let slow = candidate(2, ImprovementCurve::Saturating { lift: 10.0, scale: 100_000.0 });
    let candidates = vec![fast, slow];
    let steps = constraints(10_000.0);

    let budgets = [1_000.0, 5_000.0, 12_500.0, 37_000.0, 45_000.0, 61_000.0];
    let runs: Vec<_> = budgets
        .iter()
        .map(|b| optimize(&candidates, *b, &steps).expect("optimize"))
        .collect();

    // The slow curve wins the first full step, so it takes the first dollars too.
    assert_eq!(runs[0].allocation_for(1), 0.0);
    assert!((runs[0].allocation_for(2) - 1_000.0).abs() < 1e-6);
    assert!((runs[1].allocation_for(2) - 5_000.0).abs() < 1e-6);

    for (pair, budget) in runs.windows(2).zip(&budgets[1..]) {
        for id in [1, 2] {
            let before = pair[0].allocation_for(id);
            let after = pair[1].allocation_for(id);
            assert!(
                after + 1e-6 >= before,
                "institution {id} dropped from {before} to {after} at budget {budget}"
            );
        }
        assert!((pair[1].total_allocated - budget).abs() < 1e-6);
    }
}

/// One institution funded through both the standard curve and the shock
/// reserve.
fn dual_channel(max_per_institution: Option<f64>) -> (Vec<AllocationCandidate>, AllocationConstraints) {
    let shock = AllocationCandidate {
        channel: Channel::ShockAbsorption,
        ..candidate(
            1,
            ImprovementCurve::PerStudentGrant {
                grant: 1_000.0,
                effect: 0.1,
                max_students: 50.0,
            },
        )
    };
    let standard = candidate(1, ImprovementCurve::Saturating { lift: 500.0, scale: 200_000.0 });
    let cons = AllocationConstraints {
        shock_reserve_share: 0.1,
        max_per_institution,
        ..constraints(10_000.0)
    };
    (vec![standard, shock], cons)
}

#[test]
fn institution_cap_spans_both_channels() {
    let (candidates, cons) = dual_channel(Some(60_000.0));
    let r = optimize(&candidates, 200_000.0, &cons).expect("optimize");

    assert!((r.shock_allocated - 20_000.0).abs() < 1e-6);
    assert!(
        (r.allocation_for(1) - 60_000.0).abs() < 1e-6,
        "standard and shock together got {}",
        r.allocation_for(1)
    );
    assert_eq!(r.allocations.len(), 2);
}

#[test]
fn baseline_counts_each_institution_once() {
    let (candidates, cons) = dual_channel(None);
    let r = optimize(&candidates, 200_000.0, &cons).expect("optimize");

    assert_eq!(r.allocations.len(), 2);
    assert_eq!(r.institutions_funded(), 1);
    // population 1000 × baseline 0.5
    assert!((r.baseline_outcome - 500.0).abs() < 1e-9, "baseline {}", r.baseline_outcome);
    let gains: f64 = r.allocations.iter().map(|a| a.outcome_gain).sum();
    assert!((r.outcome_gain() - gains).abs() < 1e-9);
}

#[test]
fn equity_floor_above_budget_is_infeasible() {
    let cons = AllocationConstraints {
        equity_floor_amount: Some(2.0 * MILLION),
        ..constraints(10_000.0)
    };
    let err = optimize(&[saturating(1, 50.0, 0.8)], MILLION, &cons).unwrap_err();
    match err {
        AegisError::ConstraintInfeasible { constraint, .. } => assert_eq!(constraint, "equity_floor"),
        other => panic!("expected ConstraintInfeasible, got {other}"),
    }
}

#[test]
fn equity_floor_without_reserved_institutions_is_infeasible() {
    let cons = AllocationConstraints {
        equity_floor_share: 0.2,
        equity_pell_threshold: 0.5,
        ..constraints(10_000.0)
    };
    let candidates = vec![saturating(1, 50.0, 0.2), saturating(2, 50.0, 0.3)];
    let err = optimize(&candidates, MILLION, &cons).unwrap_err();
    assert!(
        matches!(&err, AegisError::ConstraintInfeasible { constraint, .. } if constraint == "equity_floor"),
        "got {err}"
    );
}

#[test]
fn equity_floor_reaches_high_pell_institutions() {
    // The high-Pell institution has the weaker curve and would get nothing
    // without the floor.
    let strong = saturating(1, 100.0, 0.2);
    let weak = saturating(2, 10.0, 0.7);
    let cons = AllocationConstraints {
        equity_floor_share: 0.3,
        equity_pell_threshold: 0.5,
        ..constraints(10_000.0)
    };
    let budget = 500_000.0;
    let r = optimize(&[strong, weak], budget, &cons).expect("optimize");

    assert!((r.equity_floor - 150_000.0).abs() < 1e-6);
    assert!(r.allocation_for(2) + 1e-6 >= 150_000.0, "got {}", r.allocation_for(2));
    assert!(r.equity_allocated + 1e-6 >= r.equity_floor);
    assert!(r.total_allocated <= budget + 1e-6);
    assert!(r.allocations.iter().filter(|a| a.institution_id == 2).all(|a| a.equity_reserved));
}

#[test]
fn iteration_cap_marks_result_approximate() {
    let candidates: Vec<_> = (1..=5).map(|i| saturating(i, 50.0, 0.4)).collect();
    let cons = AllocationConstraints {
        max_iterations: 3,
        ..constraints(10_000.0)
    };
    let r = optimize(&candidates, MILLION, &cons).expect("truncation is not an error");
    assert_eq!(r.status, AllocationStatus::Approximate);
    assert_eq!(r.iterations, 3);
    assert!((r.total_allocated - 30_000.0).abs() < 1e-6);
}

#[test]
fn non_concave_curve_is_rejected() {
    let convex = candidate(1, piecewise(&[(MILLION, 0.01), (MILLION, 0.05)]));
    let err = optimize(&[convex], MILLION, &constraints(100_000.0)).unwrap_err();
    assert!(
        matches!(&err, AegisError::ConstraintInfeasible { constraint, .. } if constraint == "improvement_curve"),
        "got {err}"
    );
}

#[test]
fn negative_budget_is_rejected() {
    let err = optimize(&three_institutions(), -1.0, &constraints(100_000.0)).unwrap_err();
    assert!(matches!(&err, AegisError::ConstraintInfeasible { constraint, .. } if constraint == "budget"));
}

#[test]
fn per_student_grants_are_indivisible() {
    let grant = candidate(
        1,
        ImprovementCurve::PerStudentGrant {
            grant: 1_000.0,
            effect: 0.1,
            max_students: 5.0,
        },
    );
    let r = optimize(&[grant.clone()], 3_500.0, &constraints(10_000.0)).expect("optimize");
    assert!((r.total_allocated - 3_000.0).abs() < 1e-6);
    assert!((r.outcome_gain() - 0.3).abs() < 1e-9);

    let r = optimize(&[grant], 50_000.0, &constraints(10_000.0)).expect("optimize");
    assert!((r.total_allocated - 5_000.0).abs() < 1e-6, "capped at max_students");
}

#[test]
fn max_per_institution_caps_each_allocation() {
    let candidates: Vec<_> = (1..=4).map(|i| saturating(i, 100.0, 0.4)).collect();
    let cons = AllocationConstraints {
        max_per_institution: Some(100_000.0),
        ..constraints(10_000.0)
    };
    let r = optimize(&candidates, MILLION, &cons).expect("optimize");
    assert!(r.allocations.iter().all(|a| a.amount <= 100_000.0 + 1e-6));
    assert!((r.total_allocated - 400_000.0).abs() < 1e-6);
}

#[test]
fn unspent_shock_reserve_returns_to_general_pool() {
    let shock = AllocationCandidate {
        channel: Channel::ShockAbsorption,
        ..candidate(
            1,
            ImprovementCurve::PerStudentGrant {
                grant: 1_000.0,
                effect: 0.1,
                max_students: 50.0,
            },
        )
    };
    let standard = saturating(2, 500.0, 0.4);
    let cons = AllocationConstraints {
        shock_reserve_share: 0.1,
        ..constraints(10_000.0)
    };
    let r = optimize(&[shock, standard], MILLION, &cons).expect("optimize");

    assert!((r.shock_reserve - 100_000.0).abs() < 1e-6);
    assert!((r.shock_allocated - 50_000.0).abs() < 1e-6);
    assert!((r.total_allocated - MILLION).abs() < 1e-6, "got {}", r.total_allocated);
    let shock_row = r
        .allocations
        .iter()
        .find(|a| a.channel == Channel::ShockAbsorption)
        .expect("shock allocation");
    assert!((shock_row.amount - 50_000.0).abs() < 1e-6);
}

#[test]
fn allocations_sorted_by_amount() {
    let candidates: Vec<_> = (1..=8).map(|i| saturating(i, 10.0 * i as f64, 0.4)).collect();
    let r = optimize(&candidates, 2.0 * MILLION, &constraints(20_000.0)).expect("optimize");
    assert!(r.allocations.windows(2).all(|w| w[0].amount >= w[1].amount));
}

#[test]
fn parallel_scan_matches_sequential_scan() {
    let candidates: Vec<_> = (1..=64).map(|i| saturating(i, (i % 9) as f64 + 5.0, 0.4)).collect();
    let sequential = constraints(25_000.0);
    let parallel = AllocationConstraints {
        parallel_scan_threshold: 1,
        ..constraints(25_000.0)
    };
    let a = optimize(&candidates, 3.0 * MILLION, &sequential).expect("sequential");
    let b = optimize(&candidates, 3.0 * MILLION, &parallel).expect("parallel");
    assert_eq!(a, b);
}
