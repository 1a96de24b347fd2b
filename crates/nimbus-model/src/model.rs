//! Skeleton model: the static description of one kinematic tree.

use crate::{Body, Joint, ModelError, Platform, Result, State};
use nimbus_math::{DVec, SpatialInertia, SpatialTransform, Vec3};

/// Per-DOF box limits; unlimited sides are `±∞`.
#[derive(Debug, Clone, PartialEq)]
pub struct DofLimits {
    pub lower: DVec,
    pub upper: DVec,
}

/// Static model of one skeleton.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    /// Bodies in topological order (parents before children).
    pub bodies: Vec<Body>,
    /// One joint per body.
    pub joints: Vec<Joint>,
    /// Number of generalized coordinates.
    pub ndof: usize,
    /// DOF offset of each joint; fixed joints get the offset of the next DOF.
    pub dof_offsets: Vec<usize>,
}

impl Model {
    pub fn default_state(&self) -> State {
        State::new(self.ndof)
    }

    pub fn nbodies(&self) -> usize {
        self.bodies.len()
    }

    /// DOF index driven by the joint of `body`, if that joint moves.
    pub fn body_dof(&self, body: usize) -> Option<usize> {
        let joint_idx = self.bodies[body].joint_idx;
        (self.joints[joint_idx].ndof() == 1).then(|| self.dof_offsets[joint_idx])
    }

    /// Bodies from the root down to `body` (inclusive).
    pub fn chain(&self, body: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = body as i32;
        while current >= 0 {
            chain.push(current as usize);
            current = self.bodies[current as usize].parent;
        }
        chain.reverse();
        chain
    }

    pub fn body_masses(&self) -> DVec {
        DVec::from_iterator(self.bodies.len(), self.bodies.iter().map(|b| b.inertia.mass))
    }

    /// Replace every body's mass, keeping the rest of its inertia.
    pub fn set_body_masses(&mut self, masses: &DVec) {
        assert_eq!(masses.len(), self.bodies.len(), "mass vector has wrong length");
        for (body, &m) in self.bodies.iter_mut().zip(masses.iter()) {
            body.inertia = body.inertia.with_mass(m);
        }
    }

    /// Copy of this model with new body masses.
    pub fn with_body_masses(&self, masses: &DVec) -> Model {
        let mut model = self.clone();
        model.set_body_masses(masses);
        model
    }

    fn limits_of(&self, pick: impl Fn(&Joint) -> Option<[f64; 2]>) -> DofLimits {
        let mut lower = DVec::from_element(self.ndof, f64::NEG_INFINITY);
        let mut upper = DVec::from_element(self.ndof, f64::INFINITY);
        for (joint, &offset) in self.joints.iter().zip(&self.dof_offsets) {
            if joint.ndof() == 1 {
                if let Some([lo, hi]) = pick(joint) {
                    lower[offset] = lo;
                    upper[offset] = hi;
                }
            }
        }
        DofLimits { lower, upper }
    }

    pub fn position_limits(&self) -> DofLimits {
        self.limits_of(|j| j.position_limits)
    }

    pub fn velocity_limits(&self) -> DofLimits {
        self.limits_of(|j| j.velocity_limits)
    }

    pub fn force_limits(&self) -> DofLimits {
        self.limits_of(|j| j.force_limits)
    }
}

/// Builder for skeleton models.
pub struct ModelBuilder {
    name: String,
    bodies: Vec<Body>,
    joints: Vec<Joint>,
    pending_error: Option<ModelError>,
}

impl ModelBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bodies: Vec::new(),
            joints: Vec::new(),
            pending_error: None,
        }
    }

    /// Add a body with a generic joint.
    ///
    /// `parent` is the index of the parent body, or -1 for the world.
    pub fn add_body(mut self, name: &str, parent: i32, joint: Joint, inertia: SpatialInertia) -> Self {
        let joint_idx = self.joints.len();
        self.joints.push(joint);
        self.bodies.push(Body {
            name: name.to_string(),
            inertia,
            parent,
            joint_idx,
            contact_points: Vec::new(),
            platform: None,
        });
        self
    }

    pub fn add_revolute_body(
        self,
        name: &str,
        parent: i32,
        parent_to_joint: SpatialTransform,
        axis: Vec3,
        inertia: SpatialInertia,
    ) -> Self {
        self.add_body(name, parent, Joint::revolute(parent_to_joint, axis), inertia)
    }

    pub fn add_prismatic_body(
        self,
        name: &str,
        parent: i32,
        parent_to_joint: SpatialTransform,
        axis: Vec3,
        inertia: SpatialInertia,
    ) -> Self {
        self.add_body(name, parent, Joint::prismatic(parent_to_joint, axis), inertia)
    }

    /// Three stacked prismatic joints (x, y, z) ending in a body with the
    /// given inertia: a point-like body that translates freely in space.
    /// The two massless carrier bodies are named `<name>_x` and `<name>_y`.
    pub fn add_translating_body(self, name: &str, parent: i32, origin: Vec3, inertia: SpatialInertia) -> Self {
        let first = self.bodies.len() as i32;
        let carrier = SpatialInertia::point_mass(0.0, Vec3::zeros());
        self.add_prismatic_body(&format!("{name}_x"), parent, SpatialTransform::translation(origin), Vec3::x(), carrier)
            .add_prismatic_body(&format!("{name}_y"), first, SpatialTransform::identity(), Vec3::y(), carrier)
            .add_prismatic_body(name, first + 1, SpatialTransform::identity(), Vec3::z(), inertia)
    }

    /// Attach body-fixed contact points to the most recently added body.
    pub fn contact_points(mut self, points: &[Vec3]) -> Self {
        match self.bodies.last_mut() {
            Some(body) => body.contact_points.extend_from_slice(points),
            None => self.pending_error = Some(ModelError::NoBody("contact points")),
        }
        self
    }

    /// Attach a level platform to the most recently added body.
    pub fn platform(mut self, anchor: Vec3, half_extents: [f64; 2]) -> Self {
        match self.bodies.last_mut() {
            Some(body) => body.platform = Some(Platform { anchor, half_extents }),
            None => self.pending_error = Some(ModelError::NoBody("platform")),
        }
        self
    }

    /// Validate and build the model.
    pub fn build(self) -> Result<Model> {
        if let Some(err) = self.pending_error {
            return Err(err);
        }
        let mut joints = self.joints;
        for (i, body) in self.bodies.iter().enumerate() {
            if body.parent >= i as i32 || body.parent < -1 {
                return Err(ModelError::InvalidParent {
                    body: body.name.clone(),
                    parent: body.parent,
                });
            }
            let joint = &mut joints[body.joint_idx];
            if joint.ndof() == 1 {
                let norm = joint.axis.norm();
                if norm < 1e-12 {
                    return Err(ModelError::DegenerateAxis(body.name.clone()));
                }
                joint.axis /= norm;
            }
            let limits = [joint.position_limits, joint.velocity_limits, joint.force_limits];
            for [lower, upper] in limits.into_iter().flatten() {
                if lower > upper {
                    return Err(ModelError::InvertedLimits {
                        body: body.name.clone(),
                        lower,
                        upper,
                    });
                }
            }
            if body.inertia.mass < 0.0 {
                return Err(ModelError::NegativeMass(body.name.clone()));
            }
        }

        let mut ndof = 0;
        let dof_offsets = joints
            .iter()
            .map(|joint| {
                let offset = ndof;
                ndof += joint.ndof();
                offset
            })
            .collect();

        Ok(Model {
            name: self.name,
            bodies: self.bodies,
            joints,
            ndof,
            dof_offsets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_link() -> Model {
        ModelBuilder::new("arm")
            .add_revolute_body(
                "upper",
                -1,
                SpatialTransform::identity(),
                Vec3::y(),
                SpatialInertia::point_mass(1.0, Vec3::new(0.0, 0.0, -0.5)),
            )
            .add_body(
                "lower",
                0,
                Joint::revolute(SpatialTransform::translation(Vec3::new(0.0, 0.0, -1.0)), Vec3::y() * 2.0)
                    .with_position_limits(-1.0, 1.0),
                SpatialInertia::point_mass(1.0, Vec3::new(0.0, 0.0, -0.5)),
            )
            .contact_points(&[Vec3::new(0.0, 0.0, -1.0)])
            .build()
            .unwrap()
    }

    #[test]
    fn offsets_and_chain() {
        let model = two_link();
        assert_eq!(model.ndof, 2);
        assert_eq!(model.dof_offsets, vec![0, 1]);
        assert_eq!(model.chain(1), vec![0, 1]);
        assert_eq!(model.body_dof(1), Some(1));
        assert_eq!(model.bodies[1].contact_points.len(), 1);
    }

    #[test]
    fn axes_are_normalized() {
        let model = two_link();
        assert!((model.joints[1].axis.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn limits_default_to_infinite() {
        let limits = two_link().position_limits();
        assert_eq!(limits.lower[0], f64::NEG_INFINITY);
        assert_eq!(limits.lower[1], -1.0);
        assert_eq!(limits.upper[1], 1.0);
    }

    #[test]
    fn fixed_joint_takes_no_dof() {
        let model = ModelBuilder::new("m")
            .add_prismatic_body("slider", -1, SpatialTransform::identity(), Vec3::x(), SpatialInertia::point_mass(1.0, Vec3::zeros()))
            .add_body("weld", 0, Joint::fixed(SpatialTransform::identity()), SpatialInertia::point_mass(1.0, Vec3::zeros()))
            .build()
            .unwrap();
        assert_eq!(model.ndof, 1);
        assert_eq!(model.body_dof(1), None);
    }

    #[test]
    fn rejects_forward_parent() {
        let err = ModelBuilder::new("bad")
            .add_revolute_body("a", 3, SpatialTransform::identity(), Vec3::z(), SpatialInertia::point_mass(1.0, Vec3::zeros()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidParent { parent: 3, .. }));
    }

    #[test]
    fn rejects_inverted_limits() {
        let err = ModelBuilder::new("bad")
            .add_body(
                "a",
                -1,
                Joint::prismatic(SpatialTransform::identity(), Vec3::z()).with_force_limits(1.0, -1.0),
                SpatialInertia::point_mass(1.0, Vec3::zeros()),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::InvertedLimits { .. }));
    }

    #[test]
    fn masses_round_trip() {
        let mut model = two_link();
        model.set_body_masses(&DVec::from_vec(vec![2.0, 3.0]));
        assert_eq!(model.body_masses(), DVec::from_vec(vec![2.0, 3.0]));
    }
}
