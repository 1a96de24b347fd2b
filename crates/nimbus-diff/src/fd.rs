//! Finite differences: central differences, Ridders extrapolation and the
//! full-step oracle.

use crate::config::Differencing;
use crate::wrt::JacobianKind;
use nimbus_math::{CENTRAL_STEP, DMat, DVec, central_column, central_difference};
use nimbus_world::{RestoreGuard, StepStats, World, WorldState};
use tracing::warn;

/// Central-difference step for tree quantities (mass matrix, bias forces).
pub const TREE_EPS: f64 = CENTRAL_STEP;
/// First Ridders step for tree quantities.
pub const TREE_RIDDERS_STEP: f64 = 1e-3;
/// Central-difference step for a full simulation step.
pub const STEP_EPS: f64 = 1e-7;
/// First Ridders step for a full simulation step.
pub const STEP_RIDDERS_STEP: f64 = 1e-4;
/// Smallest step the adaptive search may reach.
pub const MIN_STEP: f64 = 1e-20;

const RIDDERS_SHRINK: f64 = 1.4;
const RIDDERS_LEVELS: usize = 10;
const RIDDERS_SAFE: f64 = 2.0;

fn inf_norm(v: &DVec) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

/// Ridders' extrapolation of a derivative column.
///
/// `sample(h)` returns a central-difference estimate with step `h`, or
/// `None` when no valid sample exists at that step. Returns `None` only if
/// the first sample is invalid; a later invalid sample ends the tableau
/// and the best estimate so far is returned.
pub fn ridders(initial_step: f64, mut sample: impl FnMut(f64) -> Option<DVec>) -> Option<DVec> {
    let fac_step = RIDDERS_SHRINK * RIDDERS_SHRINK;
    let mut h = initial_step;
    let first = sample(h)?;
    let mut best = first.clone();
    let mut best_err = f64::INFINITY;
    // tab[i][j]: level i (step h/1.4^i), extrapolation order j.
    let mut tab: Vec<Vec<DVec>> = vec![vec![first]];

    for i in 1..RIDDERS_LEVELS {
        h /= RIDDERS_SHRINK;
        let Some(estimate) = sample(h) else {
            break;
        };
        let mut row = vec![estimate];
        let mut fac = fac_step;
        for j in 1..=i {
            let next = (&row[j - 1] * fac - &tab[i - 1][j - 1]) / (fac - 1.0);
            fac *= fac_step;
            let err = inf_norm(&(&next - &row[j - 1])).max(inf_norm(&(&next - &tab[i - 1][j - 1])));
            if err <= best_err {
                best_err = err;
                best = next.clone();
            }
            row.push(next);
        }
        let worsened = inf_norm(&(&row[i] - &tab[i - 1][i - 1])) >= RIDDERS_SAFE * best_err;
        tab.push(row);
        if worsened {
            break;
        }
    }
    Some(best)
}

/// Jacobian of `eval` at `x0`, one column per entry of `x0`.
///
/// Used for tree quantities, which are smooth: every sample is valid.
pub fn differentiate(x0: &DVec, differencing: Differencing, mut eval: impl FnMut(&DVec) -> DVec) -> DMat {
    match differencing {
        Differencing::Central => central_difference(x0, TREE_EPS, eval),
        Differencing::Ridders => {
            if x0.is_empty() {
                return DMat::zeros(eval(x0).len(), 0);
            }
            let columns: Vec<DVec> = (0..x0.len())
                .map(|i| {
                    ridders(TREE_RIDDERS_STEP, |h| Some(central_column(x0, i, h, &mut eval)))
                        .unwrap_or_else(|| central_column(x0, i, TREE_EPS, &mut eval))
                })
                .collect();
            DMat::from_columns(&columns)
        }
    }
}

/// Finite-difference Jacobian of a whole step.
///
/// The world is rewound to `pre` for every sample, with penetration
/// correction and constraint force mixing off, and restored afterwards.
/// Samples whose active set differs from the unperturbed step are
/// rejected; central mode halves the offending side's step until the set
/// matches and panics below [`MIN_STEP`].
pub fn step_jacobian(world: &mut World, pre: &WorldState, kind: JacobianKind, differencing: Differencing) -> DMat {
    let wrt = kind.wrt();
    let output = kind.output();
    let mut base = pre.clone();
    base.penetration_correction = false;
    base.constraint_force_mixing = false;

    let mut guard = RestoreGuard::new(world);
    let x0 = {
        base.apply(&mut guard);
        wrt.get(&guard)
    };
    let mut run = |x: &DVec| -> (DVec, StepStats) {
        base.apply(&mut guard);
        wrt.set(&mut guard, x);
        guard.step();
        (output.get(&guard), guard.last_step_stats())
    };
    let (out0, reference) = run(&x0);

    let mut jac = DMat::zeros(out0.len(), x0.len());
    for i in 0..x0.len() {
        let mut side = |h: f64| {
            let mut x = x0.clone();
            x[i] += h;
            run(&x)
        };
        let column = match differencing {
            Differencing::Central => adaptive_central(&mut side, &reference, STEP_EPS, wrt.name(), i),
            Differencing::Ridders => {
                let estimate = ridders(STEP_RIDDERS_STEP, |h| {
                    let (plus, plus_stats) = side(h);
                    let (minus, minus_stats) = side(-h);
                    (plus_stats.same_active_set(&reference) && minus_stats.same_active_set(&reference))
                        .then(|| (plus - minus) / (2.0 * h))
                });
                match estimate {
                    Some(column) => column,
                    None => adaptive_central(&mut side, &reference, STEP_EPS, wrt.name(), i),
                }
            }
        };
        jac.set_column(i, &column);
    }
    jac
}

/// Central difference whose two sides shrink independently until each
/// sample reproduces the reference active set.
fn adaptive_central(
    side: &mut impl FnMut(f64) -> (DVec, StepStats),
    reference: &StepStats,
    eps: f64,
    wrt: &str,
    column: usize,
) -> DVec {
    let mut consistent = |sign: f64| {
        let mut h = eps;
        loop {
            let (out, stats) = side(sign * h);
            if stats.same_active_set(reference) {
                return (out, h);
            }
            h /= 2.0;
            assert!(
                h > MIN_STEP,
                "no consistent finite-difference sample for {wrt} column {column}: \
                 the active set changes under any perturbation"
            );
        }
    };
    let (plus, eps_plus) = consistent(1.0);
    let (minus, eps_minus) = consistent(-1.0);
    if eps_plus < eps || eps_minus < eps {
        warn!(wrt, column, eps_plus, eps_minus, "finite-difference step shrunk to keep the active set");
    }
    (plus - minus) / (eps_plus + eps_minus)
}
