//! Composite Rigid Body Algorithm (CRBA) -- mass matrix computation.

use crate::forward_kinematics;
use nimbus_math::{DMat, DVec, SpatialMat};
use nimbus_model::Model;

/// Joint-space mass matrix M(q), `ndof × ndof`, symmetric positive
/// (semi-)definite.
pub fn crba(model: &Model, q: &DVec) -> DMat {
    let nb = model.nbodies();
    let kin = forward_kinematics(model, q);
    let mut mass_matrix = DMat::zeros(model.ndof, model.ndof);

    let mut i_c: Vec<SpatialMat> = model.bodies.iter().map(|b| b.inertia.to_matrix()).collect();
    for i in (0..nb).rev() {
        let parent = model.bodies[i].parent;
        if parent >= 0 {
            let in_parent = i_c[i].congruence(&kin.tree[i]);
            i_c[parent as usize] = i_c[parent as usize] + in_parent;
        }
    }

    for i in 0..nb {
        let Some(dof_i) = model.body_dof(i) else {
            continue;
        };
        let s_i = model.joints[model.bodies[i].joint_idx].motion_subspace();
        let f_i = i_c[i].mul_vec(&s_i);
        mass_matrix[(dof_i, dof_i)] = s_i.dot(&f_i);

        // Walk toward the root, carrying the force into each ancestor frame.
        let mut f = kin.tree[i].inv_apply_force(&f_i);
        let mut j = model.bodies[i].parent;
        while j >= 0 {
            let ju = j as usize;
            if let Some(dof_j) = model.body_dof(ju) {
                let s_j = model.joints[model.bodies[ju].joint_idx].motion_subspace();
                let m_ij = s_j.dot(&f);
                mass_matrix[(dof_i, dof_j)] = m_ij;
                mass_matrix[(dof_j, dof_i)] = m_ij;
            }
            f = kin.tree[ju].inv_apply_force(&f);
            j = model.bodies[ju].parent;
        }
    }

    mass_matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nimbus_math::{SpatialInertia, SpatialTransform, Vec3};
    use nimbus_model::ModelBuilder;

    #[test]
    fn point_pendulum_inertia() {
        let model = ModelBuilder::new("p")
            .add_revolute_body(
                "link",
                -1,
                SpatialTransform::identity(),
                Vec3::y(),
                SpatialInertia::point_mass(2.0, Vec3::new(0.0, 0.0, -1.5)),
            )
            .build()
            .unwrap();
        let m = crba(&model, &DVec::from_vec(vec![0.3]));
        assert_relative_eq!(m[(0, 0)], 2.0 * 1.5 * 1.5, epsilon = 1e-12);
    }

    #[test]
    fn translating_body_has_diagonal_mass() {
        let model = ModelBuilder::new("ball")
            .add_translating_body("ball", -1, Vec3::zeros(), SpatialInertia::point_mass(3.0, Vec3::zeros()))
            .build()
            .unwrap();
        let m = crba(&model, &DVec::zeros(3));
        assert_relative_eq!(m, DMat::identity(3, 3) * 3.0, epsilon = 1e-12);
    }

    #[test]
    fn double_pendulum_is_symmetric_and_coupled() {
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
                SpatialInertia::point_mass(1.0, Vec3::new(0.0, 0.0, -1.0)),
            )
            .build()
            .unwrap();
        let m = crba(&model, &DVec::from_vec(vec![0.2, 0.0]));
        // Straight double pendulum of unit point masses: [[5, 2], [2, 1]].
        assert_relative_eq!(m[(0, 0)], 5.0, epsilon = 1e-12);
        assert_relative_eq!(m[(0, 1)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(m[(1, 0)], m[(0, 1)], epsilon = 1e-12);
        assert_relative_eq!(m[(1, 1)], 1.0, epsilon = 1e-12);
    }
}
