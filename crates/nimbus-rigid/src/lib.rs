//! Rigid-body algorithms for single skeletons.
//!
//! - **CRBA**: joint-space mass matrix M(q)
//! - **RNEA**: inverse dynamics, used with zero acceleration for the bias
//!   vector C(q, v) (Coriolis, centrifugal and gravity terms)
//! - **Point Jacobians**: linear Jacobians of body-fixed points and their
//!   exact derivative with respect to q, consumed by contact constraints
//! - **Dynamics**: Minv products and the Jacobians of an unconstrained
//!   semi-implicit velocity update

pub mod crba;
pub mod dynamics;
pub mod jacobian;
pub mod kinematics;
pub mod rnea;

pub use crba::crba;
pub use dynamics::{
    UnconstrainedJacobians, bias_forces, inverse_mass_matrix, minv_multiply,
    unconstrained_jacobians, unconstrained_velocity,
};
pub use jacobian::{JointFrame, chain_frames, point_jacobian, point_jacobian_derivative};
pub use kinematics::{Kinematics, forward_kinematics};
pub use rnea::rnea;
