//! Assembly of per-group constraint data into world-indexed matrices.

use nimbus_math::{DMat, DVec};
use nimbus_world::{ConstraintGroup, ConstraintMatrices, WorldLayout};

/// World-indexed constraint matrices of finalized `groups`.
///
/// Columns follow group order; rows follow the world DOF layout.
pub fn assemble(groups: &[ConstraintGroup], layout: &WorldLayout) -> ConstraintMatrices {
    let blocks: Vec<(&[usize], &ConstraintMatrices)> =
        groups.iter().map(|g| (g.skeletons(), g.matrices())).collect();
    assemble_blocks(&blocks, layout)
}

/// Assemble `(skeletons, matrices)` pairs, where each matrix's rows follow
/// the DOFs of its skeletons in the listed order.
pub fn assemble_blocks(blocks: &[(&[usize], &ConstraintMatrices)], layout: &WorldLayout) -> ConstraintMatrices {
    let n = layout.ndofs();
    let num_c: usize = blocks.iter().map(|(_, m)| m.num_clamping()).sum();
    let num_u: usize = blocks.iter().map(|(_, m)| m.num_upper_bound()).sum();
    let num_b: usize = blocks.iter().map(|(_, m)| m.num_bouncing()).sum();

    let mut out = ConstraintMatrices::empty(n);
    out.clamping = DMat::zeros(n, num_c);
    out.upper_bound = DMat::zeros(n, num_u);
    out.bouncing = DMat::zeros(n, num_b);
    out.upper_bound_map = DMat::zeros(num_u, num_c);

    let mut impulses = Vec::with_capacity(num_c);
    let mut offsets = Vec::with_capacity(num_c);
    let mut relative = Vec::with_capacity(num_c);
    let mut bounce = Vec::with_capacity(num_c);
    let mut restitution = Vec::with_capacity(num_b);

    let (mut col_c, mut col_u, mut col_b) = (0, 0, 0);
    for &(skeletons, m) in blocks {
        assert_eq!(
            m.ndofs(),
            skeletons.iter().map(|&s| layout.span(s).ndofs).sum::<usize>(),
            "group matrices do not match the DOFs of skeletons {skeletons:?}"
        );
        let mut local = 0;
        for &s in skeletons {
            let span = layout.span(s);
            let rows = span.ndofs;
            copy_rows(&mut out.clamping, &m.clamping, local, span.dof_offset, rows, col_c);
            copy_rows(&mut out.upper_bound, &m.upper_bound, local, span.dof_offset, rows, col_u);
            copy_rows(&mut out.bouncing, &m.bouncing, local, span.dof_offset, rows, col_b);
            out.velocity_change
                .rows_mut(span.dof_offset, rows)
                .copy_from(&m.velocity_change.rows(local, rows));
            local += rows;
        }
        out.upper_bound_map
            .view_mut((col_u, col_c), m.upper_bound_map.shape())
            .copy_from(&m.upper_bound_map);

        impulses.extend(m.clamping_impulses.iter());
        offsets.extend(m.clamping_offsets.iter());
        relative.extend(m.clamping_relative_velocities.iter());
        bounce.extend(m.bounce.iter());
        restitution.extend(m.restitution.iter());
        out.clamping_constraints.extend(m.clamping_constraints.iter().cloned());
        out.upper_bound_constraints.extend(m.upper_bound_constraints.iter().cloned());
        out.bouncing_constraints.extend(m.bouncing_constraints.iter().cloned());

        col_c += m.num_clamping();
        col_u += m.num_upper_bound();
        col_b += m.num_bouncing();
    }

    out.clamping_impulses = DVec::from_vec(impulses);
    out.clamping_offsets = DVec::from_vec(offsets);
    out.clamping_relative_velocities = DVec::from_vec(relative);
    out.bounce = DVec::from_vec(bounce);
    out.restitution = DVec::from_vec(restitution);
    out
}

fn copy_rows(dst: &mut DMat, src: &DMat, src_row: usize, dst_row: usize, rows: usize, col: usize) {
    let cols = src.ncols();
    if rows == 0 || cols == 0 {
        return;
    }
    dst.view_mut((dst_row, col), (rows, cols))
        .copy_from(&src.view((src_row, 0), (rows, cols)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn random_block(ndofs: usize, num_c: usize, num_u: usize, seed: f64) -> ConstraintMatrices {
        let value = |r: usize, c: usize| ((r * 7 + c * 3) as f64 + seed).sin();
        let mut m = ConstraintMatrices::empty(ndofs);
        m.clamping = DMat::from_fn(ndofs, num_c, value);
        m.upper_bound = DMat::from_fn(ndofs, num_u, |r, c| value(r + 11, c));
        m.upper_bound_map = DMat::from_fn(num_u, num_c, |r, c| value(r + 5, c + 2));
        m.bouncing = DMat::from_fn(ndofs, num_c.min(1), |r, c| value(r + 1, c + 9));
        m.clamping_impulses = DVec::from_fn(num_c, |i, _| seed + i as f64);
        m.clamping_offsets = DVec::from_fn(num_c, |i, _| -(seed + i as f64));
        m.clamping_relative_velocities = DVec::from_fn(num_c, |i, _| value(i, 4));
        m.bounce = DVec::from_element(num_c, 1.0);
        m.restitution = DVec::from_element(num_c.min(1), 0.5);
        m.velocity_change = DVec::from_fn(ndofs, |i, _| value(i, 0) + seed);
        m
    }

    #[test]
    fn no_groups_gives_empty_columns() {
        let layout = WorldLayout::from_sizes([(3, 3), (2, 2)]);
        let out = assemble_blocks(&[], &layout);
        assert_eq!(out.clamping.shape(), (5, 0));
        assert_eq!(out.upper_bound_map.shape(), (0, 0));
        assert_eq!(out.velocity_change, DVec::zeros(5));
    }

    #[test]
    fn group_rows_land_in_world_slots() {
        // Skeletons 0 and 2 in one group, listed out of world order.
        let layout = WorldLayout::from_sizes([(2, 1), (1, 1), (3, 1)]);
        let block = random_block(5, 2, 1, 0.3);
        let skeletons = [2usize, 0];
        let out = assemble_blocks(&[(&skeletons[..], &block)], &layout);
        // Local rows 0..3 belong to skeleton 2 (world rows 3..6).
        assert_relative_eq!(out.clamping.row(3), block.clamping.row(0));
        assert_relative_eq!(out.clamping.row(0), block.clamping.row(3));
        assert_eq!(out.clamping.row(2).amax(), 0.0);
        assert_relative_eq!(out.velocity_change[4], block.velocity_change[1]);
        assert_eq!(out.velocity_change[2], 0.0);
    }

    #[test]
    fn group_without_clamping_still_scatters_velocity_change() {
        let layout = WorldLayout::from_sizes([(2, 1), (1, 1)]);
        let block = random_block(1, 0, 0, 1.0);
        let out = assemble_blocks(&[(&[1usize][..], &block)], &layout);
        assert_eq!(out.num_clamping(), 0);
        assert_relative_eq!(out.velocity_change[2], block.velocity_change[0]);
    }

    proptest! {
        #[test]
        fn assembled_products_match_group_products(
            sizes in prop::collection::vec(1usize..4, 1..5),
            counts in prop::collection::vec((0usize..3, 0usize..2), 5),
            seed in -1.0f64..1.0,
        ) {
            let layout = WorldLayout::from_sizes(sizes.iter().map(|&n| (n, 1)));
            // One group per skeleton with an even index, skeleton pairs
            // otherwise: groups partition a subset of the skeletons.
            let mut groups: Vec<Vec<usize>> = Vec::new();
            let mut s = 0;
            while s < sizes.len() {
                if s + 1 < sizes.len() && s % 3 == 1 {
                    groups.push(vec![s + 1, s]);
                    s += 2;
                } else {
                    if s % 2 == 0 {
                        groups.push(vec![s]);
                    }
                    s += 1;
                }
            }
            let blocks: Vec<ConstraintMatrices> = groups
                .iter()
                .enumerate()
                .map(|(g, skel)| {
                    let ndofs = skel.iter().map(|&i| sizes[i]).sum();
                    let (c, u) = counts[g % counts.len()];
                    random_block(ndofs, c, if c == 0 { 0 } else { u }, seed + g as f64)
                })
                .collect();
            let pairs: Vec<(&[usize], &ConstraintMatrices)> =
                groups.iter().map(Vec::as_slice).zip(blocks.iter()).collect();
            let out = assemble_blocks(&pairs, &layout);

            let total_c: usize = blocks.iter().map(|b| b.num_clamping()).sum();
            prop_assert_eq!(out.num_clamping(), total_c);
            prop_assert_eq!(out.clamping_impulses.len(), total_c);
            prop_assert_eq!(
                out.num_upper_bound(),
                blocks.iter().map(|b| b.num_upper_bound()).sum::<usize>()
            );

            // A·f over the world equals the scattered per-group A·f.
            let world_af = &out.combined() * &out.clamping_impulses;
            let mut expected = DVec::zeros(layout.ndofs());
            for (skel, block) in groups.iter().zip(&blocks) {
                let local = block.combined() * &block.clamping_impulses;
                layout.scatter_dofs(skel, &local, &mut expected);
            }
            prop_assert!((world_af - expected).amax() < 1e-12);
        }
    }
}
