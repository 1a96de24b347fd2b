//! Constraint groups: skeletons coupled by contacts within one step.

use crate::World;
use nimbus_contact::{BoxedLcp, ContactConstraint, DofScope, LcpSolution};
use nimbus_math::{DMat, DVec};

/// Constraint data of one group (or of the whole world, once assembled),
/// evaluated at the pre-step configuration.
///
/// Matrix rows follow the DOF order of the scope the data was built over.
/// Columns follow constraint order within each class.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintMatrices {
    /// Columns of the clamping constraints (`A_c`).
    pub clamping: DMat,
    /// Columns of the upper-bound constraints (`A_ub`).
    pub upper_bound: DMat,
    /// Upper-bound impulses as a function of clamping impulses (`E`).
    pub upper_bound_map: DMat,
    /// Columns of the bouncing constraints.
    pub bouncing: DMat,
    pub clamping_impulses: DVec,
    /// Offsets `−bounce ⊙ A_cᵀ v_pre` of the clamping rows. Unlike the
    /// solved LCP's `b`, these never carry the position-correction term.
    pub clamping_offsets: DVec,
    /// `A_cᵀ v_pre`.
    pub clamping_relative_velocities: DVec,
    /// `1 + e` per clamping constraint (`1` for friction).
    pub bounce: DVec,
    /// Restitution of each bouncing constraint.
    pub restitution: DVec,
    /// Velocity change due to constraint impulses, per DOF.
    pub velocity_change: DVec,
    pub clamping_constraints: Vec<ContactConstraint>,
    pub upper_bound_constraints: Vec<ContactConstraint>,
    pub bouncing_constraints: Vec<ContactConstraint>,
}

impl ConstraintMatrices {
    /// No constraints over `ndofs` DOFs.
    pub fn empty(ndofs: usize) -> Self {
        Self {
            clamping: DMat::zeros(ndofs, 0),
            upper_bound: DMat::zeros(ndofs, 0),
            upper_bound_map: DMat::zeros(0, 0),
            bouncing: DMat::zeros(ndofs, 0),
            clamping_impulses: DVec::zeros(0),
            clamping_offsets: DVec::zeros(0),
            clamping_relative_velocities: DVec::zeros(0),
            bounce: DVec::zeros(0),
            restitution: DVec::zeros(0),
            velocity_change: DVec::zeros(ndofs),
            clamping_constraints: Vec::new(),
            upper_bound_constraints: Vec::new(),
            bouncing_constraints: Vec::new(),
        }
    }

    pub fn ndofs(&self) -> usize {
        self.clamping.nrows()
    }

    pub fn num_clamping(&self) -> usize {
        self.clamping.ncols()
    }

    pub fn num_upper_bound(&self) -> usize {
        self.upper_bound.ncols()
    }

    pub fn num_bouncing(&self) -> usize {
        self.bouncing.ncols()
    }

    /// `A_c + A_ub·E`: the generalized impulse per unit clamping impulse.
    pub fn combined(&self) -> DMat {
        &self.clamping + &self.upper_bound * &self.upper_bound_map
    }
}

/// A maximal set of skeletons coupled by contacts in one step.
#[derive(Debug, Clone)]
pub struct ConstraintGroup {
    skeletons: Vec<usize>,
    constraints: Vec<ContactConstraint>,
    lcp: BoxedLcp,
    solution: LcpSolution,
    pre_constraint_velocity: DVec,
    velocity_change: DVec,
    matrices: Option<ConstraintMatrices>,
}

fn columns(constraints: &[&ContactConstraint], scope: &DofScope) -> DMat {
    let mut m = DMat::zeros(scope.ndofs(), constraints.len());
    for (j, c) in constraints.iter().enumerate() {
        m.set_column(j, &c.column(scope));
    }
    m
}

impl ConstraintGroup {
    pub(crate) fn new(
        skeletons: Vec<usize>,
        constraints: Vec<ContactConstraint>,
        lcp: BoxedLcp,
        solution: LcpSolution,
        pre_constraint_velocity: DVec,
        velocity_change: DVec,
    ) -> Self {
        Self {
            skeletons,
            constraints,
            lcp,
            solution,
            pre_constraint_velocity,
            velocity_change,
            matrices: None,
        }
    }

    /// World indices of the skeletons in this group, in group DOF order.
    pub fn skeletons(&self) -> &[usize] {
        &self.skeletons
    }

    pub fn constraints(&self) -> &[ContactConstraint] {
        &self.constraints
    }

    pub fn solution(&self) -> &LcpSolution {
        &self.solution
    }

    /// The LCP this group's impulses solve.
    pub fn lcp(&self) -> &BoxedLcp {
        &self.lcp
    }

    /// `v + dt·M⁻¹(τ − C)` over the group's DOFs.
    pub fn pre_constraint_velocity(&self) -> &DVec {
        &self.pre_constraint_velocity
    }

    pub fn velocity_change(&self) -> &DVec {
        &self.velocity_change
    }

    pub fn ndofs(&self) -> usize {
        self.pre_constraint_velocity.len()
    }

    pub fn num_clamping(&self) -> usize {
        self.solution.num_clamping()
    }

    pub fn num_upper_bound(&self) -> usize {
        self.solution.num_upper_bound()
    }

    pub fn num_bouncing(&self) -> usize {
        self.solution
            .clamping()
            .into_iter()
            .filter(|&i| self.constraints[i].is_bouncing())
            .count()
    }

    /// Evaluate the group's constraint matrices at the world's current
    /// positions, which must be the pre-step positions.
    pub fn finalize(&mut self, world: &World) {
        let scope = world.scope(&self.skeletons);
        let clamping_idx = self.solution.clamping();
        let upper_idx = self.solution.upper_bound();

        let clamping: Vec<&ContactConstraint> = clamping_idx.iter().map(|&i| &self.constraints[i]).collect();
        let upper: Vec<&ContactConstraint> = upper_idx.iter().map(|&i| &self.constraints[i]).collect();
        let bouncing: Vec<&ContactConstraint> = clamping.iter().copied().filter(|c| c.is_bouncing()).collect();

        let a_c = columns(&clamping, &scope);
        let relative = a_c.transpose() * &self.pre_constraint_velocity;
        let bounce = DVec::from_iterator(clamping.len(), clamping.iter().map(|c| c.bounce()));

        let matrices = ConstraintMatrices {
            clamping_offsets: -bounce.component_mul(&relative),
            clamping_relative_velocities: relative,
            clamping: a_c,
            upper_bound: columns(&upper, &scope),
            upper_bound_map: self.lcp.upper_bound_map(&self.solution.classes),
            bouncing: columns(&bouncing, &scope),
            clamping_impulses: self.solution.impulses.select_rows(&clamping_idx),
            bounce,
            restitution: DVec::from_iterator(bouncing.len(), bouncing.iter().map(|c| c.restitution)),
            velocity_change: self.velocity_change.clone(),
            clamping_constraints: clamping.into_iter().cloned().collect(),
            upper_bound_constraints: upper.into_iter().cloned().collect(),
            bouncing_constraints: bouncing.into_iter().cloned().collect(),
        };
        self.matrices = Some(matrices);
    }

    /// Group-local constraint matrices. Calling this before [`finalize`]
    /// is a programming error.
    ///
    /// [`finalize`]: ConstraintGroup::finalize
    pub fn matrices(&self) -> &ConstraintMatrices {
        self.matrices
            .as_ref()
            .unwrap_or_else(|| panic!("constraint group over {:?} was not finalized", self.skeletons))
    }
}
