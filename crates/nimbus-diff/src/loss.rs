use nimbus_math::DVec;
use nimbus_world::{World, WorldLayout};
use std::ops::AddAssign;

/// Gradient of a scalar loss with respect to the inputs (or outputs) of one
/// step.
#[derive(Debug, Clone, PartialEq)]
pub struct LossGradient {
    pub position: DVec,
    pub velocity: DVec,
    pub force: DVec,
    /// Per body.
    pub mass: DVec,
}

impl LossGradient {
    pub fn zeros(ndofs: usize, nbodies: usize) -> Self {
        Self {
            position: DVec::zeros(ndofs),
            velocity: DVec::zeros(ndofs),
            force: DVec::zeros(ndofs),
            mass: DVec::zeros(nbodies),
        }
    }

    pub fn for_world(world: &World) -> Self {
        Self::zeros(world.ndofs(), world.nbodies())
    }

    /// Panics unless every vector matches the given sizes.
    pub fn assert_dims(&self, ndofs: usize, nbodies: usize) {
        assert_eq!(self.position.len(), ndofs, "position gradient has wrong length");
        assert_eq!(self.velocity.len(), ndofs, "velocity gradient has wrong length");
        assert_eq!(self.force.len(), ndofs, "force gradient has wrong length");
        assert_eq!(self.mass.len(), nbodies, "mass gradient has wrong length");
    }

    /// The entries belonging to `skeletons`, concatenated in that order.
    pub fn gather(&self, layout: &WorldLayout, skeletons: &[usize]) -> LossGradient {
        LossGradient {
            position: layout.gather_dofs(skeletons, &self.position),
            velocity: layout.gather_dofs(skeletons, &self.velocity),
            force: layout.gather_dofs(skeletons, &self.force),
            mass: layout.gather_bodies(skeletons, &self.mass),
        }
    }

    /// Inverse of [`gather`](LossGradient::gather): write a gathered
    /// gradient into the world-sized `out`.
    pub fn scatter_into(&self, layout: &WorldLayout, skeletons: &[usize], out: &mut LossGradient) {
        layout.scatter_dofs(skeletons, &self.position, &mut out.position);
        layout.scatter_dofs(skeletons, &self.velocity, &mut out.velocity);
        layout.scatter_dofs(skeletons, &self.force, &mut out.force);
        layout.scatter_bodies(skeletons, &self.mass, &mut out.mass);
    }
}

impl AddAssign<&LossGradient> for LossGradient {
    fn add_assign(&mut self, other: &LossGradient) {
        self.position += &other.position;
        self.velocity += &other.velocity;
        self.force += &other.force;
        self.mass += &other.mass;
    }
}
