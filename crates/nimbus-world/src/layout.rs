//! Placement of each skeleton inside the world's concatenated vectors.

use nimbus_math::DVec;
use std::ops::Range;

/// Index ranges of one skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkeletonSpan {
    pub dof_offset: usize,
    pub ndofs: usize,
    pub body_offset: usize,
    pub nbodies: usize,
}

impl SkeletonSpan {
    pub fn dofs(&self) -> Range<usize> {
        self.dof_offset..self.dof_offset + self.ndofs
    }

    pub fn bodies(&self) -> Range<usize> {
        self.body_offset..self.body_offset + self.nbodies
    }
}

/// Contiguous, non-overlapping DOF and body ranges for every skeleton, in
/// skeleton order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldLayout {
    spans: Vec<SkeletonSpan>,
    ndofs: usize,
    nbodies: usize,
}

impl WorldLayout {
    /// Layout for skeletons with the given `(ndofs, nbodies)` sizes.
    pub fn from_sizes(sizes: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let mut layout = WorldLayout::default();
        for (ndofs, nbodies) in sizes {
            layout.spans.push(SkeletonSpan {
                dof_offset: layout.ndofs,
                ndofs,
                body_offset: layout.nbodies,
                nbodies,
            });
            layout.ndofs += ndofs;
            layout.nbodies += nbodies;
        }
        layout
    }

    pub fn span(&self, skeleton: usize) -> &SkeletonSpan {
        &self.spans[skeleton]
    }

    pub fn spans(&self) -> &[SkeletonSpan] {
        &self.spans
    }

    pub fn num_skeletons(&self) -> usize {
        self.spans.len()
    }

    pub fn ndofs(&self) -> usize {
        self.ndofs
    }

    pub fn nbodies(&self) -> usize {
        self.nbodies
    }

    /// Concatenate the DOF segments of `skeletons` (in that order).
    pub fn gather_dofs(&self, skeletons: &[usize], world: &DVec) -> DVec {
        self.gather(skeletons, world, |s| s.dofs())
    }

    /// Write a gathered DOF vector back into world slots.
    pub fn scatter_dofs(&self, skeletons: &[usize], segment: &DVec, world: &mut DVec) {
        self.scatter(skeletons, segment, world, |s| s.dofs());
    }

    pub fn gather_bodies(&self, skeletons: &[usize], world: &DVec) -> DVec {
        self.gather(skeletons, world, |s| s.bodies())
    }

    pub fn scatter_bodies(&self, skeletons: &[usize], segment: &DVec, world: &mut DVec) {
        self.scatter(skeletons, segment, world, |s| s.bodies());
    }

    fn gather(&self, skeletons: &[usize], world: &DVec, range: impl Fn(&SkeletonSpan) -> Range<usize>) -> DVec {
        let values: Vec<f64> = skeletons
            .iter()
            .flat_map(|&s| world.as_slice()[range(&self.spans[s])].iter().copied())
            .collect();
        DVec::from_vec(values)
    }

    fn scatter(
        &self,
        skeletons: &[usize],
        segment: &DVec,
        world: &mut DVec,
        range: impl Fn(&SkeletonSpan) -> Range<usize>,
    ) {
        let mut cursor = 0;
        for &s in skeletons {
            let r = range(&self.spans[s]);
            let n = r.len();
            world.rows_mut(r.start, n).copy_from(&segment.rows(cursor, n));
            cursor += n;
        }
        assert_eq!(cursor, segment.len(), "segment does not match the skeletons it is scattered over");
    }
}
