//! Multi-skeleton world for nimbus.
//!
//! A [`World`] steps any number of skeletons with semi-implicit Euler.
//! Skeletons coupled by contacts in a step form a [`ConstraintGroup`] whose
//! LCP is solved independently; the groups are kept after the step so the
//! differentiation layer can evaluate their constraint matrices at the
//! pre-step configuration. [`RestoreGuard`] gives scoped, restore-on-drop
//! access for code that has to perturb and re-step the world.

pub mod config;
pub mod error;
pub mod group;
pub mod guard;
pub mod layout;
pub mod skeleton;
pub mod world;

pub use config::WorldConfig;
pub use error::{Result, WorldError};
pub use group::{ConstraintGroup, ConstraintMatrices};
pub use guard::{RestoreGuard, WorldState};
pub use layout::{SkeletonSpan, WorldLayout};
pub use skeleton::Skeleton;
pub use world::{StepStats, World};
