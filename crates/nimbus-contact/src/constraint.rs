//! Velocity-level contact constraints.
//!
//! A constraint measures the rate of `d·(p_A − s_B)` for a world-fixed
//! direction `d`, where `p_A` is a body-fixed contact point and `s_B` the
//! anchor of the platform it rests on (absent for the ground). Its column in
//! generalized coordinates is `a = J_A(p_A)ᵀ d − J_B(s_B)ᵀ d`.

use crate::{Contact, DofScope};
use nimbus_math::{DMat, DVec, Vec3};
use nimbus_rigid::{point_jacobian, point_jacobian_derivative};

/// A point fixed in a body of a skeleton.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    /// World index of the skeleton.
    pub skeleton: usize,
    pub body: usize,
    /// Point in body coordinates.
    pub local: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Non-penetration along the surface normal.
    Normal,
    /// Tangential friction, bounded by the normal constraint at index
    /// `normal` in the same constraint list.
    Friction { normal: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactConstraint {
    /// Index of the originating contact.
    pub contact: usize,
    pub kind: ConstraintKind,
    /// Unit world direction.
    pub direction: Vec3,
    pub point: Anchor,
    pub surface: Option<Anchor>,
    pub restitution: f64,
    pub friction: f64,
    /// Penetration depth of the contact, for position correction.
    pub depth: f64,
}

impl ContactConstraint {
    /// One normal constraint per contact plus two tangential ones when the
    /// contact has friction.
    pub fn from_contacts(contacts: &[Contact]) -> Vec<ContactConstraint> {
        let mut constraints = Vec::new();
        for (i, contact) in contacts.iter().enumerate() {
            let make = |kind, direction| ContactConstraint {
                contact: i,
                kind,
                direction,
                point: contact.point,
                surface: contact.surface,
                restitution: contact.material.restitution,
                friction: contact.material.friction,
                depth: contact.depth(),
            };
            let normal = constraints.len();
            constraints.push(make(ConstraintKind::Normal, Vec3::z()));
            if contact.material.friction > 0.0 {
                constraints.push(make(ConstraintKind::Friction { normal }, Vec3::x()));
                constraints.push(make(ConstraintKind::Friction { normal }, Vec3::y()));
            }
        }
        constraints
    }

    pub fn is_normal(&self) -> bool {
        self.kind == ConstraintKind::Normal
    }

    /// Skeletons touched by this constraint.
    pub fn skeletons(&self) -> (usize, Option<usize>) {
        (self.point.skeleton, self.surface.map(|s| s.skeleton))
    }

    /// Factor applied to the approach velocity in the LCP offset: `1 + e`
    /// for normals, `1` for friction.
    pub fn bounce(&self) -> f64 {
        if self.is_normal() { 1.0 + self.restitution } else { 1.0 }
    }

    /// A clamping normal with positive restitution bounces.
    pub fn is_bouncing(&self) -> bool {
        self.is_normal() && self.restitution > 0.0
    }

    fn anchors(&self) -> impl Iterator<Item = (Anchor, f64)> {
        std::iter::once((self.point, 1.0)).chain(self.surface.map(|s| (s, -1.0)))
    }

    /// Constraint column `a` over the DOFs of `scope`.
    pub fn column(&self, scope: &DofScope) -> DVec {
        let mut a = DVec::zeros(scope.ndofs());
        for (anchor, sign) in self.anchors() {
            let frame = scope.frame(anchor.skeleton);
            let p = frame.kin.point_world(anchor.body, &anchor.local);
            let jac = point_jacobian(frame.model, &frame.kin, anchor.body, &p);
            let n = frame.model.ndof;
            let mut block = a.rows_mut(frame.offset, n);
            block += jac.transpose() * self.direction * sign;
        }
        a
    }

    /// Generalized impulse `a·f` of a constraint impulse `f`.
    pub fn constraint_force(&self, scope: &DofScope, f: f64) -> DVec {
        self.column(scope) * f
    }

    /// `∂a/∂q` over the DOFs of `scope` (column m is the derivative with
    /// respect to coordinate m).
    pub fn column_jacobian(&self, scope: &DofScope) -> DMat {
        let mut deriv = DMat::zeros(scope.ndofs(), scope.ndofs());
        for (anchor, sign) in self.anchors() {
            let frame = scope.frame(anchor.skeleton);
            let p = frame.kin.point_world(anchor.body, &anchor.local);
            let block = point_jacobian_derivative(frame.model, &frame.kin, anchor.body, &p, &self.direction);
            let n = frame.model.ndof;
            let mut view = deriv.view_mut((frame.offset, frame.offset), (n, n));
            view += block * sign;
        }
        deriv
    }

    /// `∂(a·f)/∂q` for a fixed impulse `f`.
    pub fn constraint_force_jacobian(&self, scope: &DofScope, f: f64) -> DMat {
        self.column_jacobian(scope) * f
    }

    /// `∂(aᵀv)/∂q` for a fixed velocity `v`, as a vector over the scope DOFs.
    pub fn relative_velocity_jacobian(&self, scope: &DofScope, v: &DVec) -> DVec {
        self.column_jacobian(scope).transpose() * v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContactMaterial, Ground, SkeletonGeometry, detect_contacts};
    use approx::assert_relative_eq;
    use nimbus_math::{SpatialInertia, SpatialTransform};
    use nimbus_model::{Model, ModelBuilder};
    use nimbus_rigid::forward_kinematics;

    fn pendulum_with_foot() -> Model {
        ModelBuilder::new("leg")
            .add_revolute_body(
                "thigh",
                -1,
                SpatialTransform::translation(Vec3::new(0.0, 0.0, 1.0)),
                Vec3::y(),
                SpatialInertia::point_mass(1.0, Vec3::new(0.0, 0.0, -0.5)),
            )
            .add_revolute_body(
                "shin",
                0,
                SpatialTransform::translation(Vec3::new(0.0, 0.0, -0.5)),
                Vec3::y(),
                SpatialInertia::point_mass(1.0, Vec3::new(0.0, 0.0, -0.25)),
            )
            .contact_points(&[Vec3::new(0.0, 0.0, -0.5)])
            .build()
            .unwrap()
    }

    fn foot_constraints(model: &Model, q: &DVec, friction: f64) -> Vec<ContactConstraint> {
        let kin = forward_kinematics(model, q);
        let geo = [SkeletonGeometry {
            index: 0,
            model,
            kin: &kin,
            material: ContactMaterial::new(friction, 0.0),
        }];
        let ground = Ground {
            height: 0.0,
            material: ContactMaterial::new(friction, 0.0),
        };
        ContactConstraint::from_contacts(&detect_contacts(&geo, Some(&ground), 10.0))
    }

    #[test]
    fn friction_adds_tangent_constraints() {
        let model = pendulum_with_foot();
        let q = DVec::from_vec(vec![0.2, -0.4]);
        let constraints = foot_constraints(&model, &q, 0.5);
        assert_eq!(constraints.len(), 3);
        assert_eq!(constraints[1].kind, ConstraintKind::Friction { normal: 0 });
        assert_eq!(foot_constraints(&model, &q, 0.0).len(), 1);
    }

    #[test]
    fn column_jacobian_matches_finite_differences() {
        let model = pendulum_with_foot();
        let q = DVec::from_vec(vec![0.2, -0.4]);
        let constraints = foot_constraints(&model, &q, 0.5);

        let column_at = |c: &ContactConstraint, q: &DVec| {
            let mut scope = DofScope::new(1);
            scope.push(0, &model, q);
            c.column(&scope)
        };

        let mut scope = DofScope::new(1);
        scope.push(0, &model, &q);
        let eps = 1e-6;
        for c in &constraints {
            let analytic = c.column_jacobian(&scope);
            let mut fd = DMat::zeros(2, 2);
            for m in 0..2 {
                let mut qp = q.clone();
                qp[m] += eps;
                let mut qm = q.clone();
                qm[m] -= eps;
                fd.set_column(m, &((column_at(c, &qp) - column_at(c, &qm)) / (2.0 * eps)));
            }
            assert_relative_eq!(analytic, fd, epsilon = 1e-7);
        }
    }

    #[test]
    fn platform_anchor_enters_with_opposite_sign() {
        let upper = ModelBuilder::new("box")
            .add_prismatic_body("box", -1, SpatialTransform::identity(), Vec3::z(), SpatialInertia::point_mass(1.0, Vec3::zeros()))
            .contact_points(&[Vec3::zeros()])
            .build()
            .unwrap();
        let lower = ModelBuilder::new("table")
            .add_prismatic_body("table", -1, SpatialTransform::identity(), Vec3::z(), SpatialInertia::point_mass(1.0, Vec3::zeros()))
            .platform(Vec3::zeros(), [1.0, 1.0])
            .build()
            .unwrap();
        let q_upper = DVec::from_vec(vec![1.0]);
        let q_lower = DVec::from_vec(vec![1.0]);
        let (ku, kl) = (forward_kinematics(&upper, &q_upper), forward_kinematics(&lower, &q_lower));
        let geo = [
            SkeletonGeometry { index: 0, model: &upper, kin: &ku, material: ContactMaterial::default() },
            SkeletonGeometry { index: 1, model: &lower, kin: &kl, material: ContactMaterial::default() },
        ];
        let constraints = ContactConstraint::from_contacts(&detect_contacts(&geo, None, 1e-3));
        assert_eq!(constraints.len(), 1);

        let mut scope = DofScope::new(2);
        scope.push(0, &upper, &q_upper);
        scope.push(1, &lower, &q_lower);
        let a = constraints[0].column(&scope);
        assert_relative_eq!(a, DVec::from_vec(vec![1.0, -1.0]), epsilon = 1e-12);
    }

    #[test]
    fn force_primitives_scale_the_column() {
        let model = pendulum_with_foot();
        let q = DVec::from_vec(vec![0.2, -0.4]);
        let constraints = foot_constraints(&model, &q, 0.0);
        let mut scope = DofScope::new(1);
        scope.push(0, &model, &q);
        let c = &constraints[0];

        assert_relative_eq!(c.constraint_force(&scope, 2.5), c.column(&scope) * 2.5, epsilon = 1e-12);
        assert_relative_eq!(
            c.constraint_force_jacobian(&scope, -0.5),
            c.column_jacobian(&scope) * -0.5,
            epsilon = 1e-12
        );

        let v = DVec::from_vec(vec![0.7, -1.1]);
        let eps = 1e-6;
        let relative_at = |q: &DVec| {
            let mut s = DofScope::new(1);
            s.push(0, &model, q);
            c.column(&s).dot(&v)
        };
        let analytic = c.relative_velocity_jacobian(&scope, &v);
        for m in 0..2 {
            let mut qp = q.clone();
            qp[m] += eps;
            let mut qm = q.clone();
            qm[m] -= eps;
            let fd = (relative_at(&qp) - relative_at(&qm)) / (2.0 * eps);
            assert_relative_eq!(analytic[m], fd, epsilon = 1e-7);
        }
    }
}
