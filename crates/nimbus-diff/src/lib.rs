//! Differentiation through nimbus simulation steps.
//!
//! A [`Snapshot`] records one step of a [`World`](nimbus_world::World) and
//! provides the step's Jacobians:
//!
//! | Jacobian   | Meaning  |
//! |------------|----------|
//! | `pos_pos`  | ∂q'/∂q   |
//! | `pos_vel`  | ∂v'/∂q   |
//! | `vel_pos`  | ∂q'/∂v   |
//! | `vel_vel`  | ∂v'/∂v   |
//! | `force_vel`| ∂v'/∂τ   |
//! | `mass_vel` | ∂v'/∂m   |
//!
//! Jacobians come from closed forms through the clamping contacts of the
//! step's LCP ([`JacobianEngine`]), or from finite differences of whole
//! steps ([`fd`]), which also validate the closed forms on request.
//! [`Snapshot::backprop`] turns a loss gradient on the step's outputs into
//! one on its inputs. [`WorldSpaceMap`] carries losses written on world
//! positions of bodies back into joint space.

pub mod assemble;
pub mod backprop;
pub mod bounce;
pub mod config;
pub mod engine;
pub mod fd;
pub mod loss;
pub mod mapping;
pub mod perf;
pub mod snapshot;
pub mod tree;
pub mod validate;
pub mod wrt;

pub use assemble::{assemble, assemble_blocks};
pub use backprop::clip_to_limits;
pub use bounce::bounce_approximation;
pub use config::{DiffConfig, Differencing};
pub use engine::{JacobianEngine, StepJacobians};
pub use loss::LossGradient;
pub use mapping::{
    MappedGradient, MappedSnapshot, MappingError, TrackedKind, TrackedPoint, WorldSpaceMap, mapped_forward_pass,
};
pub use perf::PerformanceLog;
pub use snapshot::{Snapshot, forward_pass};
pub use tree::TreeEval;
pub use validate::{Replication, equals_or_crash, mismatch};
pub use wrt::{JacobianKind, StepOutput, WithRespectTo};
