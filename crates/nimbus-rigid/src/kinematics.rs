//! Forward kinematics: body transforms from joint positions.

use nimbus_math::{DVec, SpatialTransform, Vec3};
use nimbus_model::Model;

/// Body transforms for one configuration.
#[derive(Debug, Clone)]
pub struct Kinematics {
    /// Parent-to-body transform of each body.
    pub tree: Vec<SpatialTransform>,
    /// World-to-body transform of each body.
    pub world: Vec<SpatialTransform>,
}

impl Kinematics {
    /// World coordinates of a point fixed in `body`.
    pub fn point_world(&self, body: usize, local: &Vec3) -> Vec3 {
        self.world[body].point_to_parent(local)
    }

    /// World position of the origin of `body`.
    pub fn body_origin(&self, body: usize) -> Vec3 {
        self.world[body].pos
    }
}

/// Compute parent-to-body and world-to-body transforms.
pub fn forward_kinematics(model: &Model, q: &DVec) -> Kinematics {
    let nb = model.nbodies();
    let mut tree = Vec::with_capacity(nb);
    let mut world: Vec<SpatialTransform> = Vec::with_capacity(nb);

    for body in &model.bodies {
        let joint = &model.joints[body.joint_idx];
        let qj = if joint.ndof() == 1 {
            q[model.dof_offsets[body.joint_idx]]
        } else {
            0.0
        };
        let x_tree = joint.joint_transform(qj).compose(&joint.parent_to_joint);
        let x_world = if body.parent < 0 {
            x_tree
        } else {
            x_tree.compose(&world[body.parent as usize])
        };
        tree.push(x_tree);
        world.push(x_world);
    }

    Kinematics { tree, world }
}
