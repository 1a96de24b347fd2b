//! Closed-form Jacobians of one step through its clamping contacts.
//!
//! With `A = A_c + A_ub·E` and `Q = A_cᵀ·M⁻¹·A`, the clamping impulses solve
//! `Q·f = b`, `b = −bounce ⊙ A_cᵀ·v_pre`, and the step is
//!
//! ```text
//! v_pre = v + dt·M⁻¹(τ − C)
//! v'    = v_pre + M⁻¹·A·f
//! q'    = q + dt·v'
//! ```
//!
//! The mass matrix inverse and bias forces are differentiated numerically
//! by [`TreeEval`]; everything else, including `∂A/∂q`, is exact.

use crate::bounce::bounce_approximation;
use crate::loss::LossGradient;
use crate::tree::TreeEval;
use crate::wrt::JacobianKind;
use nimbus_contact::{ContactConstraint, DofScope};
use nimbus_math::{DMat, DVec, pseudo_inverse, rank_deficiency};
use nimbus_world::ConstraintMatrices;

/// Below this `‖I − Q·Q⁺‖²` the clamping system is treated as full rank.
pub const RANK_TOLERANCE: f64 = 1e-9;

/// All six Jacobians of one step over some set of DOFs.
#[derive(Debug, Clone, PartialEq)]
pub struct StepJacobians {
    pub pos_pos: DMat,
    pub pos_vel: DMat,
    pub vel_pos: DMat,
    pub vel_vel: DMat,
    pub force_vel: DMat,
    pub mass_vel: DMat,
}

impl StepJacobians {
    pub fn get(&self, kind: JacobianKind) -> &DMat {
        match kind {
            JacobianKind::PosPos => &self.pos_pos,
            JacobianKind::PosVel => &self.pos_vel,
            JacobianKind::VelPos => &self.vel_pos,
            JacobianKind::VelVel => &self.vel_vel,
            JacobianKind::ForceVel => &self.force_vel,
            JacobianKind::MassVel => &self.mass_vel,
        }
    }

    /// Reverse-mode chain rule through the step, without clipping.
    ///
    /// `next` is the loss gradient at the end of the step; its mass entry
    /// is the gradient accumulated from later steps.
    pub fn backprop(&self, dt: f64, next: &LossGradient) -> LossGradient {
        let n = self.vel_vel.nrows();
        next.assert_dims(n, self.mass_vel.ncols());
        // q' = q + dt·v', so τ and m reach q' through dt·v'.
        let through_velocity = &next.position * dt + &next.velocity;
        LossGradient {
            position: self.pos_pos.tr_mul(&next.position) + self.pos_vel.tr_mul(&next.velocity),
            velocity: self.vel_pos.tr_mul(&next.position) + self.vel_vel.tr_mul(&next.velocity),
            force: self.force_vel.tr_mul(&through_velocity),
            mass: &next.mass + self.mass_vel.tr_mul(&through_velocity),
        }
    }
}

fn scale_rows(scale: &DVec, m: DMat) -> DMat {
    DMat::from_diagonal(scale) * m
}

/// Jacobian engine over one scope: either the whole world with assembled
/// constraint matrices, or a single constraint group.
pub struct JacobianEngine<'a> {
    tree: TreeEval<'a>,
    scope: DofScope<'a>,
    matrices: &'a ConstraintMatrices,
    dt: f64,
    minv: DMat,
    /// `τ − C`.
    net_force: DVec,
    v_pre: DVec,
    a: DMat,
    minv_a: DMat,
    q: DMat,
    q_pinv: DMat,
    /// `Q⁺·b`, the impulses every force term is evaluated at.
    f_hat: DVec,
}

impl<'a> JacobianEngine<'a> {
    /// `matrices` rows must follow the DOF order of `tree`.
    pub fn new(tree: TreeEval<'a>, matrices: &'a ConstraintMatrices, num_skeletons: usize) -> Self {
        assert_eq!(
            matrices.ndofs(),
            tree.ndofs(),
            "constraint matrices and tree disagree on the DOF count"
        );
        let scope = tree.scope(num_skeletons);
        let dt = tree.dt();
        let minv = tree.inverse_mass_matrix();
        let net_force = tree.forces() - tree.bias_forces();
        let v_pre = tree.pre_constraint_velocity();
        let a = matrices.combined();
        let minv_a = &minv * &a;
        let q = matrices.clamping.tr_mul(&minv_a);
        let q_pinv = pseudo_inverse(&q);
        let f_hat = &q_pinv * &matrices.clamping_offsets;
        Self {
            tree,
            scope,
            matrices,
            dt,
            minv,
            net_force,
            v_pre,
            a,
            minv_a,
            q,
            q_pinv,
            f_hat,
        }
    }

    pub fn ndofs(&self) -> usize {
        self.tree.ndofs()
    }

    pub fn num_clamping(&self) -> usize {
        self.matrices.num_clamping()
    }

    pub fn inverse_mass_matrix(&self) -> &DMat {
        &self.minv
    }

    /// `A_cᵀ·M⁻¹·A`.
    pub fn clamping_system(&self) -> &DMat {
        &self.q
    }

    pub fn combined_columns(&self) -> &DMat {
        &self.a
    }

    /// `Q⁺·b`. Equals the solver's clamping impulses up to its tolerance
    /// when the offsets carry no position correction.
    pub fn clamping_solution(&self) -> &DVec {
        &self.f_hat
    }

    /// Whether the position derivative needs the full pseudo-inverse form.
    pub fn is_rank_deficient(&self) -> bool {
        self.num_clamping() > 0 && rank_deficiency(&self.q, &self.q_pinv) >= RANK_TOLERANCE
    }

    // Q does not depend on v or τ: those reach the impulses through b only.
    fn through_offsets(&self, dv_pre: DMat) -> DMat {
        if self.num_clamping() == 0 {
            return dv_pre;
        }
        let db = -scale_rows(&self.matrices.bounce, self.matrices.clamping.tr_mul(&dv_pre));
        &dv_pre + &self.minv_a * (&self.q_pinv * db)
    }

    /// ∂v'/∂τ.
    pub fn force_vel(&self) -> DMat {
        self.through_offsets(&self.minv * self.dt)
    }

    /// ∂v'/∂v.
    pub fn vel_vel(&self) -> DMat {
        let n = self.ndofs();
        let dv_pre = DMat::identity(n, n) - &self.minv * self.tree.bias_velocity_jacobian() * self.dt;
        self.through_offsets(dv_pre)
    }

    /// ∂v'/∂q.
    pub fn pos_vel(&self) -> DMat {
        let dv_pre = (self.tree.minv_position_jacobian(&self.net_force)
            - &self.minv * self.tree.bias_position_jacobian())
            * self.dt;
        if self.num_clamping() == 0 {
            return dv_pre;
        }
        let ops = ConstraintTerms {
            clamping: &self.matrices.clamping_constraints,
            upper_bound: &self.matrices.upper_bound_constraints,
            e: &self.matrices.upper_bound_map,
            scope: &self.scope,
        };
        let a_c = &self.matrices.clamping;

        // ∂(Q·x)/∂q and ∂(Qᵀ·y)/∂q for fixed x, y.
        let dq = |x: &DVec| {
            let ax = ops.combined_force(x);
            ops.transposed_clamping(&(&self.minv * &ax))
                + a_c.tr_mul(&(self.tree.minv_position_jacobian(&ax) + &self.minv * ops.combined(x)))
        };
        let dq_t = |y: &DVec| {
            let ay = ops.clamping_force(y);
            ops.transposed_combined(&(&self.minv * &ay))
                + self.a.tr_mul(&(self.tree.minv_position_jacobian(&ay) + &self.minv * ops.clamping(y)))
        };

        let db = -scale_rows(
            &self.matrices.bounce,
            ops.transposed_clamping(&self.v_pre) + a_c.tr_mul(&dv_pre),
        );
        let df = self.solution_jacobian(dq, dq_t) + &self.q_pinv * db;
        let f = &self.f_hat;
        dv_pre
            + self.tree.minv_position_jacobian(&ops.combined_force(f))
            + &self.minv * (&self.a * df + ops.combined(f))
    }

    /// ∂v'/∂m over per-body masses.
    pub fn mass_vel(&self) -> DMat {
        let dv_pre = (self.tree.minv_mass_jacobian(&self.net_force) - &self.minv * self.tree.bias_mass_jacobian())
            * self.dt;
        if self.num_clamping() == 0 {
            return dv_pre;
        }
        let a_c = &self.matrices.clamping;
        let dq = |x: &DVec| a_c.tr_mul(&self.tree.minv_mass_jacobian(&(&self.a * x)));
        let dq_t = |y: &DVec| self.a.tr_mul(&self.tree.minv_mass_jacobian(&(a_c * y)));
        let db = -scale_rows(&self.matrices.bounce, a_c.tr_mul(&dv_pre));
        let df = self.solution_jacobian(dq, dq_t) + &self.q_pinv * db;
        let f = &self.f_hat;
        dv_pre + self.tree.minv_mass_jacobian(&(&self.a * f)) + &self.minv_a * df
    }

    /// Derivative of `Q⁺·b` through `Q` alone, given the directional
    /// derivatives `dq(x) = ∂(Q·x)` and `dq_t(y) = ∂(Qᵀ·y)`.
    ///
    /// ```text
    /// d(Q⁺)b = −Q⁺·dQ·Q⁺b + Q⁺Q⁺ᵀ·dQᵀ·(I − QQ⁺)b + (I − Q⁺Q)·dQᵀ·Q⁺ᵀQ⁺b
    /// ```
    ///
    /// The last two terms vanish when `Q` is invertible.
    fn solution_jacobian(&self, dq: impl Fn(&DVec) -> DMat, dq_t: impl Fn(&DVec) -> DMat) -> DMat {
        let leading = -(&self.q_pinv * dq(&self.f_hat));
        if !self.is_rank_deficient() {
            return leading;
        }
        let k = self.num_clamping();
        let residual = &self.matrices.clamping_offsets - &self.q * &self.f_hat;
        let back = self.q_pinv.tr_mul(&self.f_hat);
        let null_projector = DMat::identity(k, k) - &self.q_pinv * &self.q;
        leading + &self.q_pinv * self.q_pinv.transpose() * dq_t(&residual) + null_projector * dq_t(&back)
    }

    /// Velocity re-map through bouncing contacts.
    pub fn bounce(&self) -> DMat {
        bounce_approximation(&self.matrices.bouncing, &self.matrices.restitution)
    }

    /// All six Jacobians.
    pub fn jacobians(&self) -> StepJacobians {
        let bounce = self.bounce();
        let pos_vel = self.pos_vel();
        let vel_vel = self.vel_vel();
        StepJacobians {
            pos_pos: pos_pos(&pos_vel, &bounce, self.dt),
            vel_pos: vel_pos(&vel_vel, &bounce, self.dt),
            pos_vel,
            vel_vel,
            force_vel: self.force_vel(),
            mass_vel: self.mass_vel(),
        }
    }
}

/// `(I + dt·∂v'/∂q)·B`.
pub fn pos_pos(pos_vel: &DMat, bounce: &DMat, dt: f64) -> DMat {
    let n = pos_vel.nrows();
    (DMat::identity(n, n) + pos_vel * dt) * bounce
}

/// `dt·(∂v'/∂v)·B`.
pub fn vel_pos(vel_vel: &DMat, bounce: &DMat, dt: f64) -> DMat {
    vel_vel * bounce * dt
}

/// Constraint forces `A·x` and the contractions of the column derivatives
/// `∂aⱼ/∂q`, evaluated constraint by constraint.
struct ConstraintTerms<'m, 's> {
    clamping: &'m [ContactConstraint],
    upper_bound: &'m [ContactConstraint],
    e: &'m DMat,
    scope: &'m DofScope<'s>,
}

impl ConstraintTerms<'_, '_> {
    fn n(&self) -> usize {
        self.scope.ndofs()
    }

    /// `A_c·x`.
    fn clamping_force(&self, x: &DVec) -> DVec {
        self.force_sum(self.clamping, x)
    }

    /// `A·x` with `A = A_c + A_ub·E`.
    fn combined_force(&self, x: &DVec) -> DVec {
        self.clamping_force(x) + self.force_sum(self.upper_bound, &(self.e * x))
    }

    /// `∂(A_c·x)/∂q`.
    fn clamping(&self, x: &DVec) -> DMat {
        self.force_jacobian_sum(self.clamping, x)
    }

    /// `∂(A·x)/∂q`.
    fn combined(&self, x: &DVec) -> DMat {
        self.clamping(x) + self.force_jacobian_sum(self.upper_bound, &(self.e * x))
    }

    /// `∂(A_cᵀ·w)/∂q`.
    fn transposed_clamping(&self, w: &DVec) -> DMat {
        self.velocity_rows(self.clamping, w)
    }

    /// `∂(Aᵀ·w)/∂q`.
    fn transposed_combined(&self, w: &DVec) -> DMat {
        self.transposed_clamping(w) + self.e.tr_mul(&self.velocity_rows(self.upper_bound, w))
    }

    fn force_sum(&self, constraints: &[ContactConstraint], x: &DVec) -> DVec {
        constraints
            .iter()
            .zip(x.iter())
            .fold(DVec::zeros(self.n()), |acc, (c, &xj)| acc + c.constraint_force(self.scope, xj))
    }

    fn force_jacobian_sum(&self, constraints: &[ContactConstraint], x: &DVec) -> DMat {
        let n = self.n();
        constraints
            .iter()
            .zip(x.iter())
            .fold(DMat::zeros(n, n), |acc, (c, &xj)| acc + c.constraint_force_jacobian(self.scope, xj))
    }

    fn velocity_rows(&self, constraints: &[ContactConstraint], w: &DVec) -> DMat {
        let mut out = DMat::zeros(constraints.len(), self.n());
        for (j, c) in constraints.iter().enumerate() {
            out.set_row(j, &c.relative_velocity_jacobian(self.scope, w).transpose());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nimbus_contact::{ContactMaterial, Ground, SkeletonGeometry, detect_contacts};
    use nimbus_math::{SpatialInertia, SpatialTransform, Vec3, central_difference};
    use nimbus_model::{Model, ModelBuilder};
    use nimbus_rigid::forward_kinematics;

    fn two_link_leg() -> Model {
        ModelBuilder::new("leg")
            .add_revolute_body("thigh", -1, SpatialTransform::translation(Vec3::new(0.0, 0.0, 1.0)), Vec3::y(), SpatialInertia::point_mass(1.0, Vec3::new(0.0, 0.0, -0.5)))
            .add_revolute_body("shin", 0, SpatialTransform::translation(Vec3::new(0.0, 0.0, -0.5)), Vec3::y(), SpatialInertia::point_mass(1.0, Vec3::new(0.0, 0.0, -0.25)))
            .contact_points(&[Vec3::new(0.0, 0.0, -0.5)])
            .build()
            .unwrap()
    }

    fn foot_constraints(model: &Model, q: &DVec) -> Vec<ContactConstraint> {
        let kin = forward_kinematics(model, q);
        let material = ContactMaterial::new(0.8, 0.0);
        let geo = [SkeletonGeometry { index: 0, model, kin: &kin, material }];
        let ground = Ground { height: 0.0, material };
        ContactConstraint::from_contacts(&detect_contacts(&geo, Some(&ground), 10.0))
    }

    fn columns_at(model: &Model, constraints: &[ContactConstraint], q: &DVec) -> DMat {
        let mut scope = DofScope::new(1);
        scope.push(0, model, q);
        let cols: Vec<DVec> = constraints.iter().map(|c| c.column(&scope)).collect();
        DMat::from_columns(&cols)
    }

    #[test]
    fn constraint_terms_match_column_matrices() {
        let model = two_link_leg();
        let q = DVec::from_vec(vec![0.3, -0.7]);
        let constraints = foot_constraints(&model, &q);
        assert_eq!(constraints.len(), 3);
        // Normal clamps; the two friction rows sit at their bound, scaled
        // from the normal impulse.
        let clamping = &constraints[..1];
        let upper = &constraints[1..];
        let e = DMat::from_row_slice(2, 1, &[0.8, -0.8]);
        let mut scope = DofScope::new(1);
        scope.push(0, &model, &q);
        let ops = ConstraintTerms { clamping, upper_bound: upper, e: &e, scope: &scope };

        let x = DVec::from_vec(vec![1.7]);
        let w = DVec::from_vec(vec![0.4, -1.1]);
        let a_c = columns_at(&model, clamping, &q);
        let a = &a_c + columns_at(&model, upper, &q) * &e;
        assert_relative_eq!(ops.combined_force(&x), &a * &x, epsilon = 1e-12);

        let fd_combined = central_difference(&q, 1e-6, |q| {
            (columns_at(&model, clamping, q) + columns_at(&model, upper, q) * &e) * &x
        });
        assert_relative_eq!(ops.combined(&x), fd_combined, epsilon = 1e-7);

        let fd_transposed = central_difference(&q, 1e-6, |q| {
            (columns_at(&model, clamping, q) + columns_at(&model, upper, q) * &e).tr_mul(&w)
        });
        assert_relative_eq!(ops.transposed_combined(&w), fd_transposed, epsilon = 1e-7);
    }
}
