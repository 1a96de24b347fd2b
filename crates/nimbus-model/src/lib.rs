//! Skeleton model and state types.
//!
//! A [`Model`] is the static description of one kinematic tree (a
//! "skeleton"): bodies, single-DOF joints with box limits, and the contact
//! geometry carried by each body. [`State`] holds the mutable generalized
//! positions, velocities and applied forces.

pub mod body;
pub mod error;
pub mod joint;
pub mod model;
pub mod state;

pub use body::{Body, Platform};
pub use error::{ModelError, Result};
pub use joint::{Joint, JointType};
pub use model::{DofLimits, Model, ModelBuilder};
pub use state::State;
