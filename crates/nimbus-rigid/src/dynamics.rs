//! Unconstrained dynamics of one skeleton.
//!
//! The functions here take positions, velocities and masses explicitly so
//! they can be evaluated away from the live simulation state, which is what
//! finite differencing needs.

use crate::{crba, rnea};
use nimbus_math::{CENTRAL_STEP, DMat, DVec, Vec3, central_difference, pseudo_inverse};
use nimbus_model::Model;

/// Bias vector C(q, v): Coriolis, centrifugal and gravity forces.
pub fn bias_forces(model: &Model, q: &DVec, v: &DVec, gravity: &Vec3) -> DVec {
    rnea(model, q, v, &DVec::zeros(model.ndof), gravity)
}

/// `M(q)⁻¹ · x` by Cholesky solve, without forming the inverse.
///
/// Falls back to a pseudo-inverse when M is only semi-definite (a massless
/// leaf body).
pub fn minv_multiply(model: &Model, q: &DVec, x: &DVec) -> DVec {
    let m = crba(model, q);
    match m.clone().cholesky() {
        Some(chol) => chol.solve(x),
        None => pseudo_inverse(&m) * x,
    }
}

pub fn inverse_mass_matrix(model: &Model, q: &DVec) -> DMat {
    let m = crba(model, q);
    match m.clone().cholesky() {
        Some(chol) => chol.inverse(),
        None => pseudo_inverse(&m),
    }
}

/// Semi-implicit velocity update without constraints:
/// `v + dt · M⁻¹ (τ − C(q, v))`.
pub fn unconstrained_velocity(
    model: &Model,
    q: &DVec,
    v: &DVec,
    tau: &DVec,
    gravity: &Vec3,
    dt: f64,
) -> DVec {
    let c = bias_forces(model, q, v, gravity);
    v + minv_multiply(model, q, &(tau - c)) * dt
}

/// Jacobians of the unconstrained step that the tree has no closed form for.
#[derive(Debug, Clone)]
pub struct UnconstrainedJacobians {
    /// ∂C/∂v.
    pub vel_c: DMat,
    /// ∂v_pre/∂q with `v_pre = v + dt·M⁻¹(τ − C)`.
    pub pos_vel: DMat,
    /// ∂v_pre/∂m over per-body masses.
    pub mass_vel: DMat,
}

/// Central-difference Jacobians of C and of the unconstrained velocity
/// update at `(q, v, τ)`.
pub fn unconstrained_jacobians(
    model: &Model,
    q: &DVec,
    v: &DVec,
    tau: &DVec,
    gravity: &Vec3,
    dt: f64,
) -> UnconstrainedJacobians {
    let masses = model.body_masses();
    let vel_c = central_difference(v, CENTRAL_STEP, |v_eps| bias_forces(model, q, v_eps, gravity));
    let pos_vel = central_difference(q, CENTRAL_STEP, |q_eps| unconstrained_velocity(model, q_eps, v, tau, gravity, dt));
    let mass_vel = central_difference(&masses, CENTRAL_STEP, |m_eps| {
        unconstrained_velocity(&model.with_body_masses(m_eps), q, v, tau, gravity, dt)
    });
    UnconstrainedJacobians { vel_c, pos_vel, mass_vel }
}
