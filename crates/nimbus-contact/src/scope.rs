//! Kinematic views of a set of skeletons laid out in one DOF vector.

use nimbus_math::DVec;
use nimbus_model::Model;
use nimbus_rigid::{Kinematics, forward_kinematics};

/// One skeleton placed inside a scope.
#[derive(Debug, Clone)]
pub struct SkeletonFrame<'a> {
    pub model: &'a Model,
    pub kin: Kinematics,
    /// Offset of the skeleton's first DOF inside the scope vector.
    pub offset: usize,
}

/// The skeletons (by world index) that a constraint column is expressed over,
/// each with its kinematics at a fixed configuration.
///
/// A world-wide scope covers every skeleton; a constraint group's scope covers
/// only the skeletons the group spans.
#[derive(Debug, Clone)]
pub struct DofScope<'a> {
    frames: Vec<Option<SkeletonFrame<'a>>>,
    ndofs: usize,
}

impl<'a> DofScope<'a> {
    pub fn new(num_skeletons: usize) -> Self {
        Self {
            frames: vec![None; num_skeletons],
            ndofs: 0,
        }
    }

    /// Append skeleton `index` at configuration `q` after the DOFs already
    /// in the scope.
    pub fn push(&mut self, index: usize, model: &'a Model, q: &DVec) {
        assert!(self.frames[index].is_none(), "skeleton {index} added to a scope twice");
        let offset = self.ndofs;
        self.ndofs += model.ndof;
        self.frames[index] = Some(SkeletonFrame {
            model,
            kin: forward_kinematics(model, q),
            offset,
        });
    }

    pub fn ndofs(&self) -> usize {
        self.ndofs
    }

    pub fn contains(&self, index: usize) -> bool {
        self.frames.get(index).is_some_and(Option::is_some)
    }

    /// Frame of skeleton `index`. Asking for a skeleton outside the scope is
    /// a programming error.
    pub fn frame(&self, index: usize) -> &SkeletonFrame<'a> {
        self.frames[index]
            .as_ref()
            .unwrap_or_else(|| panic!("skeleton {index} is not part of this scope"))
    }
}
