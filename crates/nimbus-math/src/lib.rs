//! Math primitives for the nimbus differentiable simulator.
//!
//! Spatial vectors and Plücker transforms follow Featherstone's conventions
//! (angular part first). Dense linear algebra used by the differentiation
//! layer (pseudo-inverses, rank tests, column-stacking) lives in [`linalg`].

pub mod linalg;
pub mod spatial;

pub use linalg::{
    CENTRAL_STEP, central_column, central_difference, max_abs, pseudo_inverse, rank_deficiency, unvec_columns,
};
pub use spatial::{SpatialInertia, SpatialMat, SpatialTransform, SpatialVec};

use nalgebra as na;

/// 3D vector alias.
pub type Vec3 = na::Vector3<f64>;
/// 3x3 matrix alias.
pub type Mat3 = na::Matrix3<f64>;
/// 6D vector alias.
pub type Vec6 = na::Vector6<f64>;
/// 6x6 matrix alias.
pub type Mat6 = na::Matrix6<f64>;
/// Dynamic vector.
pub type DVec = na::DVector<f64>;
/// Dynamic matrix.
pub type DMat = na::DMatrix<f64>;

/// Cross-product matrix: [v]× such that [v]× w = v × w.
#[inline]
pub fn skew(v: &Vec3) -> Mat3 {
    Mat3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Rotation matrix for a right-handed rotation of `angle` about the unit `axis`.
#[inline]
pub fn axis_angle(axis: &Vec3, angle: f64) -> Mat3 {
    let (s, c) = angle.sin_cos();
    let k = skew(axis);
    Mat3::identity() + k * s + k * k * (1.0 - c)
}

/// Standard gravity (m/s²).
pub const GRAVITY: f64 = 9.81;
