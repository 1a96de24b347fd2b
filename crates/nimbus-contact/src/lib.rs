//! Contacts and their velocity-level constraints.
//!
//! Contacts pair a body-fixed point with a level platform (another body's
//! platform or the ground). Each contact yields a normal constraint and, with
//! friction, two tangential constraints. Constraint impulses come from a
//! boxed LCP solved by projected Gauss-Seidel and then standardized into
//! clamping / upper-bound / separating sets with an exact re-solve.

pub mod constraint;
pub mod detect;
pub mod lcp;
pub mod material;
pub mod scope;

pub use constraint::{Anchor, ConstraintKind, ContactConstraint};
pub use detect::{Contact, Ground, SkeletonGeometry, detect_contacts};
pub use lcp::{BoxedLcp, ConstraintClass, LcpSolution, PgsSettings};
pub use material::ContactMaterial;
pub use scope::{DofScope, SkeletonFrame};
