//! Joint types and their kinematics.

use nimbus_math::{SpatialTransform, SpatialVec, Vec3};

/// Supported joint types. Every moving joint has exactly one DOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointType {
    /// Rotation about `axis`.
    Revolute,
    /// Translation along `axis`.
    Prismatic,
    /// Rigid attachment.
    Fixed,
}

/// A joint connecting a body to its parent.
#[derive(Debug, Clone)]
pub struct Joint {
    pub joint_type: JointType,
    /// Transform from parent body frame to joint frame (constant).
    pub parent_to_joint: SpatialTransform,
    /// Unit axis in the joint frame.
    pub axis: Vec3,
    /// `[lower, upper]` on the joint coordinate (None = unlimited).
    pub position_limits: Option<[f64; 2]>,
    pub velocity_limits: Option<[f64; 2]>,
    pub force_limits: Option<[f64; 2]>,
}

impl Joint {
    fn with_type(joint_type: JointType, parent_to_joint: SpatialTransform, axis: Vec3) -> Self {
        Self {
            joint_type,
            parent_to_joint,
            axis,
            position_limits: None,
            velocity_limits: None,
            force_limits: None,
        }
    }

    pub fn revolute(parent_to_joint: SpatialTransform, axis: Vec3) -> Self {
        Self::with_type(JointType::Revolute, parent_to_joint, axis)
    }

    pub fn prismatic(parent_to_joint: SpatialTransform, axis: Vec3) -> Self {
        Self::with_type(JointType::Prismatic, parent_to_joint, axis)
    }

    pub fn fixed(parent_to_joint: SpatialTransform) -> Self {
        Self::with_type(JointType::Fixed, parent_to_joint, Vec3::zeros())
    }

    pub fn with_position_limits(mut self, lower: f64, upper: f64) -> Self {
        self.position_limits = Some([lower, upper]);
        self
    }

    pub fn with_velocity_limits(mut self, lower: f64, upper: f64) -> Self {
        self.velocity_limits = Some([lower, upper]);
        self
    }

    pub fn with_force_limits(mut self, lower: f64, upper: f64) -> Self {
        self.force_limits = Some([lower, upper]);
        self
    }

    pub fn ndof(&self) -> usize {
        match self.joint_type {
            JointType::Revolute | JointType::Prismatic => 1,
            JointType::Fixed => 0,
        }
    }

    /// Joint transform `X_J(q)` from the joint frame to the body frame.
    pub fn joint_transform(&self, q: f64) -> SpatialTransform {
        match self.joint_type {
            JointType::Revolute => SpatialTransform::rotation(&self.axis, q),
            JointType::Prismatic => SpatialTransform::translation(self.axis * q),
            JointType::Fixed => SpatialTransform::identity(),
        }
    }

    /// Motion subspace `S` (zero for fixed joints).
    pub fn motion_subspace(&self) -> SpatialVec {
        match self.joint_type {
            JointType::Revolute => SpatialVec::new(self.axis, Vec3::zeros()),
            JointType::Prismatic => SpatialVec::new(Vec3::zeros(), self.axis),
            JointType::Fixed => SpatialVec::zero(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn prismatic_transform_moves_origin() {
        let j = Joint::prismatic(SpatialTransform::identity(), Vec3::z());
        assert_relative_eq!(j.joint_transform(0.25).pos, Vec3::new(0.0, 0.0, 0.25));
    }

    #[test]
    fn revolute_keeps_axis() {
        let j = Joint::revolute(SpatialTransform::identity(), Vec3::y());
        let x = j.joint_transform(0.7);
        assert_relative_eq!(x.rot * Vec3::y(), Vec3::y(), epsilon = 1e-12);
    }

    #[test]
    fn fixed_has_no_dof() {
        let j = Joint::fixed(SpatialTransform::identity());
        assert_eq!(j.ndof(), 0);
        assert_eq!(j.motion_subspace(), SpatialVec::zero());
    }
}
