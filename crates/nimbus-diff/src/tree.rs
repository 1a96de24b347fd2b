//! Tree dynamics of a set of skeletons at a fixed state, with numerical
//! derivatives of the mass matrix inverse and bias forces.

use crate::config::Differencing;
use crate::fd::differentiate;
use nimbus_contact::DofScope;
use nimbus_math::{DMat, DVec, Vec3};
use nimbus_model::Model;
use nimbus_rigid::{bias_forces, inverse_mass_matrix, minv_multiply};
use nimbus_world::{World, WorldState};

struct TreePart<'a> {
    skeleton: usize,
    model: &'a Model,
    q: DVec,
    v: DVec,
    tau: DVec,
    dof_offset: usize,
    body_offset: usize,
}

/// Skeletons stacked in one DOF vector (in the order given), evaluated at a
/// captured state rather than the live world state.
///
/// Every skeleton's dynamics depend only on its own coordinates, so all
/// derivatives are block diagonal.
pub struct TreeEval<'a> {
    parts: Vec<TreePart<'a>>,
    ndofs: usize,
    nbodies: usize,
    gravity: Vec3,
    dt: f64,
    differencing: Differencing,
}

impl<'a> TreeEval<'a> {
    pub fn new(world: &'a World, state: &WorldState, skeletons: &[usize], differencing: Differencing) -> Self {
        let layout = world.layout();
        let (mut ndofs, mut nbodies) = (0, 0);
        let mut parts = Vec::with_capacity(skeletons.len());
        for &s in skeletons {
            let span = layout.span(s);
            let one = [s];
            parts.push(TreePart {
                skeleton: s,
                model: &world.skeleton(s).model,
                q: layout.gather_dofs(&one, &state.positions),
                v: layout.gather_dofs(&one, &state.velocities),
                tau: layout.gather_dofs(&one, &state.forces),
                dof_offset: ndofs,
                body_offset: nbodies,
            });
            ndofs += span.ndofs;
            nbodies += span.nbodies;
        }
        Self {
            parts,
            ndofs,
            nbodies,
            gravity: world.gravity(),
            dt: world.dt(),
            differencing,
        }
    }

    pub fn ndofs(&self) -> usize {
        self.ndofs
    }

    pub fn nbodies(&self) -> usize {
        self.nbodies
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Kinematic scope over the same skeletons and coordinates.
    pub fn scope(&self, num_skeletons: usize) -> DofScope<'a> {
        let mut scope = DofScope::new(num_skeletons);
        for part in &self.parts {
            scope.push(part.skeleton, part.model, &part.q);
        }
        scope
    }

    fn stack(&self, segment: impl Fn(&TreePart) -> DVec) -> DVec {
        let mut out = DVec::zeros(self.ndofs);
        for part in &self.parts {
            out.rows_mut(part.dof_offset, part.model.ndof).copy_from(&segment(part));
        }
        out
    }

    fn dof_blocks(&self, block: impl Fn(&TreePart) -> DMat) -> DMat {
        let mut out = DMat::zeros(self.ndofs, self.ndofs);
        for part in &self.parts {
            let n = part.model.ndof;
            out.view_mut((part.dof_offset, part.dof_offset), (n, n)).copy_from(&block(part));
        }
        out
    }

    fn body_blocks(&self, block: impl Fn(&TreePart) -> DMat) -> DMat {
        let mut out = DMat::zeros(self.ndofs, self.nbodies);
        for part in &self.parts {
            let (n, nb) = (part.model.ndof, part.model.nbodies());
            out.view_mut((part.dof_offset, part.body_offset), (n, nb)).copy_from(&block(part));
        }
        out
    }

    fn segment(part: &TreePart, x: &DVec) -> DVec {
        x.rows(part.dof_offset, part.model.ndof).into_owned()
    }

    pub fn positions(&self) -> DVec {
        self.stack(|p| p.q.clone())
    }

    pub fn forces(&self) -> DVec {
        self.stack(|p| p.tau.clone())
    }

    pub fn inverse_mass_matrix(&self) -> DMat {
        self.dof_blocks(|p| inverse_mass_matrix(p.model, &p.q))
    }

    /// C(q, v).
    pub fn bias_forces(&self) -> DVec {
        self.stack(|p| bias_forces(p.model, &p.q, &p.v, &self.gravity))
    }

    /// `v + dt·M⁻¹(τ − C)`.
    pub fn pre_constraint_velocity(&self) -> DVec {
        self.stack(|p| {
            let c = bias_forces(p.model, &p.q, &p.v, &self.gravity);
            &p.v + minv_multiply(p.model, &p.q, &(&p.tau - c)) * self.dt
        })
    }

    /// ∂(M⁻¹(q)·x)/∂q for a fixed `x`.
    pub fn minv_position_jacobian(&self, x: &DVec) -> DMat {
        self.dof_blocks(|p| {
            let xs = Self::segment(p, x);
            differentiate(&p.q, self.differencing, |q| minv_multiply(p.model, q, &xs))
        })
    }

    /// ∂(M⁻¹·x)/∂m over per-body masses for a fixed `x`.
    pub fn minv_mass_jacobian(&self, x: &DVec) -> DMat {
        self.body_blocks(|p| {
            let xs = Self::segment(p, x);
            differentiate(&p.model.body_masses(), self.differencing, |m| {
                minv_multiply(&p.model.with_body_masses(m), &p.q, &xs)
            })
        })
    }

    /// ∂C/∂q.
    pub fn bias_position_jacobian(&self) -> DMat {
        self.dof_blocks(|p| differentiate(&p.q, self.differencing, |q| bias_forces(p.model, q, &p.v, &self.gravity)))
    }

    /// ∂C/∂v.
    pub fn bias_velocity_jacobian(&self) -> DMat {
        self.dof_blocks(|p| differentiate(&p.v, self.differencing, |v| bias_forces(p.model, &p.q, v, &self.gravity)))
    }

    /// ∂C/∂m.
    pub fn bias_mass_jacobian(&self) -> DMat {
        self.body_blocks(|p| {
            differentiate(&p.model.body_masses(), self.differencing, |m| {
                bias_forces(&p.model.with_body_masses(m), &p.q, &p.v, &self.gravity)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nimbus_contact::ContactMaterial;
    use nimbus_math::{GRAVITY, SpatialInertia, SpatialTransform};
    use nimbus_model::ModelBuilder;
    use nimbus_world::WorldConfig;

    fn pendulum_world() -> World {
        let model = ModelBuilder::new("dp")
            .add_revolute_body(
                "a",
                -1,
                SpatialTransform::identity(),
                Vec3::y(),
                SpatialInertia::point_mass(1.0, Vec3::new(0.0, 0.0, -1.0)),
            )
            .add_revolute_body(
                "b",
                0,
                SpatialTransform::translation(Vec3::new(0.0, 0.0, -1.0)),
                Vec3::y(),
                SpatialInertia::point_mass(2.0, Vec3::new(0.0, 0.0, -0.5)),
            )
            .build()
            .unwrap();
        let mut world = World::new(WorldConfig {
            ground: None,
            ..Default::default()
        })
        .unwrap();
        world.add_skeleton(model, ContactMaterial::default()).unwrap();
        world.set_positions(&DVec::from_vec(vec![0.3, -0.6]));
        world.set_velocities(&DVec::from_vec(vec![0.5, 1.0]));
        world
    }

    #[test]
    fn pre_constraint_velocity_matches_world_step() {
        let mut world = pendulum_world();
        let state = WorldState::capture(&world);
        let expected = {
            let tree = TreeEval::new(&world, &state, &[0], Differencing::Central);
            tree.pre_constraint_velocity()
        };
        world.step();
        assert_relative_eq!(world.velocities(), expected, epsilon = 1e-12);
    }

    #[test]
    fn minv_jacobian_matches_identity_derivative() {
        // d(M⁻¹·M·y)/dq = 0 gives dM⁻¹(My) = −M⁻¹·dM(y).
        let world = pendulum_world();
        let state = WorldState::capture(&world);
        let tree = TreeEval::new(&world, &state, &[0], Differencing::Ridders);
        let model = &world.skeleton(0).model;
        let y = DVec::from_vec(vec![1.0, -0.5]);
        let q = tree.positions();
        let m = nimbus_rigid::crba(model, &q);
        let dm = differentiate(&q, Differencing::Ridders, |q| nimbus_rigid::crba(model, q) * &y);
        let lhs = tree.minv_position_jacobian(&(&m * &y));
        let rhs = -tree.inverse_mass_matrix() * dm;
        assert_relative_eq!(lhs, rhs, epsilon = 1e-7);
    }

    #[test]
    fn gravity_bias_scales_with_mass() {
        let model = ModelBuilder::new("drop")
            .add_prismatic_body("m", -1, SpatialTransform::identity(), Vec3::z(), SpatialInertia::point_mass(3.0, Vec3::zeros()))
            .build()
            .unwrap();
        let mut world = World::new(WorldConfig::default()).unwrap();
        world.add_skeleton(model, ContactMaterial::default()).unwrap();
        let state = WorldState::capture(&world);
        let tree = TreeEval::new(&world, &state, &[0], Differencing::Central);
        assert_relative_eq!(tree.bias_mass_jacobian()[(0, 0)], GRAVITY, epsilon = 1e-6);
        assert_relative_eq!(tree.minv_mass_jacobian(&DVec::from_element(1, 1.0))[(0, 0)], -1.0 / 9.0, epsilon = 1e-6);
    }
}
