//! Cross-checking analytic Jacobians against finite differences.

use nimbus_math::{DMat, DVec, max_abs};
use nimbus_world::WorldState;
use std::fmt;
use tracing::error;

/// Literal pre-step vectors that reproduce a failing step.
#[derive(Debug, Clone, PartialEq)]
pub struct Replication {
    pub positions: DVec,
    pub velocities: DVec,
    pub forces: DVec,
    pub lcp_cache: DVec,
}

impl Replication {
    pub fn from_state(state: &WorldState) -> Self {
        Self {
            positions: state.positions.clone(),
            velocities: state.velocities.clone(),
            forces: state.forces.clone(),
            lcp_cache: state.lcp_cache.clone(),
        }
    }
}

fn literal(v: &DVec) -> String {
    let items: Vec<String> = v.iter().map(|x| format!("{x:?}")).collect();
    format!("DVec::from_vec(vec![{}])", items.join(", "))
}

impl fmt::Display for Replication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "world.set_positions(&{});", literal(&self.positions))?;
        writeln!(f, "world.set_velocities(&{});", literal(&self.velocities))?;
        writeln!(f, "world.set_forces(&{});", literal(&self.forces))?;
        write!(f, "world.set_lcp_cache({});", literal(&self.lcp_cache))
    }
}

/// Largest element-wise difference if it exceeds `tolerance` (or the shapes
/// differ), `None` when the matrices agree.
pub fn mismatch(analytic: &DMat, numeric: &DMat, tolerance: f64) -> Option<f64> {
    if analytic.shape() != numeric.shape() {
        return Some(f64::INFINITY);
    }
    let diff = analytic - numeric;
    if diff.iter().any(|x| x.is_nan()) {
        return Some(f64::NAN);
    }
    let worst = max_abs(&diff);
    (worst > tolerance).then_some(worst)
}

/// Stop the process if `analytic` and `numeric` disagree beyond `tolerance`,
/// after printing both matrices, their difference and replication code.
pub fn equals_or_crash(analytic: &DMat, numeric: &DMat, tolerance: f64, label: &str, replication: &Replication) {
    let Some(worst) = mismatch(analytic, numeric, tolerance) else {
        return;
    };
    error!(jacobian = label, worst, tolerance, "analytic Jacobian disagrees with finite differences");
    eprintln!("{label}: analytic Jacobian disagrees with finite differences (max |diff| = {worst:e})");
    eprintln!("analytic:{analytic}");
    eprintln!("brute force:{numeric}");
    if analytic.shape() == numeric.shape() {
        eprintln!("|diff|:{}", (analytic - numeric).abs());
    }
    eprintln!("to replicate:\n{replication}");
    std::process::exit(1);
}
