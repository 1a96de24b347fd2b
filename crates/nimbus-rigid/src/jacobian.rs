//! Linear Jacobians of body-fixed points and their position derivatives.
//!
//! For a point `p` fixed in body `b`, each moving joint `k` on the chain from
//! the root to `b` contributes a column
//!
//! ```text
//! c_k = ω_k × (p − o_k)    (revolute, world axis ω_k through origin o_k)
//! c_k = d_k                (prismatic, world direction d_k)
//! ```
//!
//! Moving joint `m` rigidly moves everything distal to it, which gives the
//! exact derivative of those columns:
//!
//! ```text
//! ∂c_k/∂q_m = ω_m × c_k   if m is k or an ancestor of k (revolute m, else 0)
//! ∂c_k/∂q_m = ω_k × c_m   if m is a descendant of k     (revolute k, else 0)
//! ```

use crate::Kinematics;
use nimbus_math::{DMat, Vec3};
use nimbus_model::{JointType, Model};

/// World-frame description of one moving joint on a chain.
#[derive(Debug, Clone, Copy)]
pub struct JointFrame {
    pub dof: usize,
    pub joint_type: JointType,
    /// Unit axis (revolute) or direction (prismatic) in world coordinates.
    pub axis: Vec3,
    /// A world point on the axis.
    pub origin: Vec3,
}

impl JointFrame {
    /// Velocity of world point `p` per unit rate of this joint.
    pub fn point_column(&self, p: &Vec3) -> Vec3 {
        match self.joint_type {
            JointType::Revolute => self.axis.cross(&(p - self.origin)),
            JointType::Prismatic => self.axis,
            JointType::Fixed => Vec3::zeros(),
        }
    }

    fn rotates(&self) -> bool {
        self.joint_type == JointType::Revolute
    }
}

/// Moving joints from the root down to `body`, in world coordinates.
pub fn chain_frames(model: &Model, kin: &Kinematics, body: usize) -> Vec<JointFrame> {
    model
        .chain(body)
        .into_iter()
        .filter_map(|b| {
            let dof = model.body_dof(b)?;
            let joint = &model.joints[model.bodies[b].joint_idx];
            Some(JointFrame {
                dof,
                joint_type: joint.joint_type,
                axis: kin.world[b].vector_to_parent(&joint.axis),
                origin: kin.world[b].pos,
            })
        })
        .collect()
}

/// Linear Jacobian (3 × ndof) of the world point `p` fixed in `body`.
pub fn point_jacobian(model: &Model, kin: &Kinematics, body: usize, p: &Vec3) -> DMat {
    let mut jac = DMat::zeros(3, model.ndof);
    for frame in chain_frames(model, kin, body) {
        jac.fixed_view_mut::<3, 1>(0, frame.dof)
            .copy_from(&frame.point_column(p));
    }
    jac
}

/// Exact derivative of `J_p(q)ᵀ·d` with respect to q, for a fixed world
/// direction `d`: entry `(k, m)` is `∂(d·c_k)/∂q_m`.
pub fn point_jacobian_derivative(
    model: &Model,
    kin: &Kinematics,
    body: usize,
    p: &Vec3,
    d: &Vec3,
) -> DMat {
    let frames = chain_frames(model, kin, body);
    let columns: Vec<Vec3> = frames.iter().map(|f| f.point_column(p)).collect();
    let mut deriv = DMat::zeros(model.ndof, model.ndof);

    for (k, frame_k) in frames.iter().enumerate() {
        for (m, frame_m) in frames.iter().enumerate() {
            let dc = if m <= k {
                if frame_m.rotates() {
                    frame_m.axis.cross(&columns[k])
                } else {
                    continue;
                }
            } else if frame_k.rotates() {
                frame_k.axis.cross(&columns[m])
            } else {
                continue;
            };
            deriv[(frame_k.dof, frame_m.dof)] += d.dot(&dc);
        }
    }
    deriv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward_kinematics;
    use approx::assert_relative_eq;
    use nimbus_math::{DVec, SpatialInertia, SpatialTransform};
    use nimbus_model::{Joint, ModelBuilder};

    /// Revolute - prismatic - revolute arm with skewed axes.
    fn arm() -> Model {
        ModelBuilder::new("arm")
            .add_revolute_body("base", -1, SpatialTransform::translation(Vec3::new(0.1, 0.0, 1.0)), Vec3::new(0.0, 1.0, 0.2), SpatialInertia::point_mass(1.0, Vec3::new(0.0, 0.0, -0.5)))
            .add_body("slide", 0, Joint::prismatic(SpatialTransform::translation(Vec3::new(0.0, 0.0, -1.0)), Vec3::new(1.0, 0.0, -0.3)), SpatialInertia::point_mass(1.0, Vec3::zeros()))
            .add_revolute_body("wrist", 1, SpatialTransform::translation(Vec3::new(0.2, 0.1, -0.4)), Vec3::new(0.3, 0.2, 1.0), SpatialInertia::point_mass(0.5, Vec3::new(0.0, 0.0, -0.3)))
            .build()
            .unwrap()
    }

    fn tip_world(model: &Model, q: &DVec, local: &Vec3) -> Vec3 {
        forward_kinematics(model, q).point_world(2, local)
    }

    #[test]
    fn point_jacobian_matches_finite_differences() {
        let model = arm();
        let q = DVec::from_vec(vec![0.3, 0.15, -0.8]);
        let local = Vec3::new(0.05, -0.1, -0.3);
        let kin = forward_kinematics(&model, &q);
        let p = kin.point_world(2, &local);
        let jac = point_jacobian(&model, &kin, 2, &p);

        let eps = 1e-6;
        for i in 0..3 {
            let mut qp = q.clone();
            qp[i] += eps;
            let mut qm = q.clone();
            qm[i] -= eps;
            let fd = (tip_world(&model, &qp, &local) - tip_world(&model, &qm, &local)) / (2.0 * eps);
            assert_relative_eq!(jac.column(i).into_owned(), DVec::from_column_slice(fd.as_slice()), epsilon = 1e-8);
        }
    }

    #[test]
    fn jacobian_derivative_matches_finite_differences() {
        let model = arm();
        let q = DVec::from_vec(vec![-0.4, 0.05, 1.1]);
        let local = Vec3::new(0.0, 0.2, -0.3);
        let d = Vec3::new(0.2, -0.5, 1.0);

        let projected = |q: &DVec| -> DVec {
            let kin = forward_kinematics(&model, q);
            let p = kin.point_world(2, &local);
            point_jacobian(&model, &kin, 2, &p).transpose() * DVec::from_column_slice(d.as_slice())
        };

        let kin = forward_kinematics(&model, &q);
        let p = kin.point_world(2, &local);
        let analytic = point_jacobian_derivative(&model, &kin, 2, &p, &d);

        let eps = 1e-6;
        let mut fd = DMat::zeros(3, 3);
        for m in 0..3 {
            let mut qp = q.clone();
            qp[m] += eps;
            let mut qm = q.clone();
            qm[m] -= eps;
            fd.set_column(m, &((projected(&qp) - projected(&qm)) / (2.0 * eps)));
        }
        assert_relative_eq!(analytic, fd, epsilon = 1e-7);
    }
}
