//! Rigid body definition.

use nimbus_math::{SpatialInertia, Vec3};

/// A level contact surface carried by a body.
///
/// The surface passes through the body-fixed `anchor` and always faces world
/// up; `half_extents` bound it in world x and y around the anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Platform {
    pub anchor: Vec3,
    pub half_extents: [f64; 2],
}

/// A rigid body in the kinematic tree.
#[derive(Debug, Clone)]
pub struct Body {
    pub name: String,
    /// Inertia in the body frame.
    pub inertia: SpatialInertia,
    /// Index of the parent body (-1 for the world).
    pub parent: i32,
    /// Index of the joint connecting this body to its parent.
    pub joint_idx: usize,
    /// Body-fixed points tested against platforms and the ground.
    pub contact_points: Vec<Vec3>,
    pub platform: Option<Platform>,
}
