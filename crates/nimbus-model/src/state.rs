//! Mutable per-skeleton simulation state.

use nimbus_math::DVec;

/// Generalized positions, velocities and applied forces of one skeleton.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    /// Joint angles and displacements.
    pub q: DVec,
    /// Joint rates.
    pub v: DVec,
    /// Applied generalized forces (joint torques / actuator forces).
    pub tau: DVec,
}

impl State {
    pub fn new(ndof: usize) -> Self {
        Self {
            q: DVec::zeros(ndof),
            v: DVec::zeros(ndof),
            tau: DVec::zeros(ndof),
        }
    }
}
