//! Recursive Newton-Euler Algorithm (RNEA) -- inverse dynamics.

use crate::forward_kinematics;
use nimbus_math::{DVec, SpatialVec, Vec3};
use nimbus_model::Model;

/// Generalized forces needed to produce accelerations `qdd` at `(q, v)`
/// under `gravity`: `M(q)·qdd + C(q, v)`.
pub fn rnea(model: &Model, q: &DVec, v: &DVec, qdd: &DVec, gravity: &Vec3) -> DVec {
    let nb = model.nbodies();
    let kin = forward_kinematics(model, q);
    let mut tau = DVec::zeros(model.ndof);

    let mut vel = vec![SpatialVec::zero(); nb];
    let mut acc = vec![SpatialVec::zero(); nb];

    // Gravity enters as a fictitious upward acceleration of the base.
    let a0 = SpatialVec::new(Vec3::zeros(), -gravity);

    for i in 0..nb {
        let body = &model.bodies[i];
        let s = model.joints[body.joint_idx].motion_subspace();
        let (v_joint, a_joint) = match model.body_dof(i) {
            Some(dof) => (s * v[dof], s * qdd[dof]),
            None => (SpatialVec::zero(), SpatialVec::zero()),
        };
        let x = &kin.tree[i];

        if body.parent < 0 {
            vel[i] = v_joint;
            acc[i] = x.apply_motion(&a0) + a_joint;
        } else {
            let pi = body.parent as usize;
            vel[i] = x.apply_motion(&vel[pi]) + v_joint;
            acc[i] = x.apply_motion(&acc[pi]) + vel[i].cross_motion(&v_joint) + a_joint;
        }
    }

    let mut forces: Vec<SpatialVec> = (0..nb)
        .map(|i| {
            let inertia = model.bodies[i].inertia.to_matrix();
            inertia.mul_vec(&acc[i]) + vel[i].cross_force(&inertia.mul_vec(&vel[i]))
        })
        .collect();

    for i in (0..nb).rev() {
        if let Some(dof) = model.body_dof(i) {
            let s = model.joints[model.bodies[i].joint_idx].motion_subspace();
            tau[dof] = s.dot(&forces[i]);
        }
        let parent = model.bodies[i].parent;
        if parent >= 0 {
            let to_parent = kin.tree[i].inv_apply_force(&forces[i]);
            forces[parent as usize] = forces[parent as usize] + to_parent;
        }
    }

    tau
}
