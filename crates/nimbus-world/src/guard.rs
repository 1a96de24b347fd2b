//! Scoped save/restore of the world's mutable state.

use crate::World;
use crate::world::StepRecord;
use nimbus_math::DVec;
use std::ops::{Deref, DerefMut};

/// Everything a differentiation routine may perturb.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldState {
    pub positions: DVec,
    pub velocities: DVec,
    pub forces: DVec,
    pub masses: DVec,
    pub lcp_cache: DVec,
    pub penetration_correction: bool,
    pub constraint_force_mixing: bool,
}

impl WorldState {
    pub fn capture(world: &World) -> Self {
        Self {
            positions: world.positions(),
            velocities: world.velocities(),
            forces: world.forces(),
            masses: world.masses(),
            lcp_cache: world.lcp_cache().clone(),
            penetration_correction: world.penetration_correction(),
            constraint_force_mixing: world.constraint_force_mixing(),
        }
    }

    pub fn apply(&self, world: &mut World) {
        world.set_positions(&self.positions);
        world.set_velocities(&self.velocities);
        world.set_forces(&self.forces);
        if world.masses() != self.masses {
            world.set_masses(&self.masses);
        }
        world.set_lcp_cache(self.lcp_cache.clone());
        world.set_penetration_correction(self.penetration_correction);
        world.set_constraint_force_mixing(self.constraint_force_mixing);
    }
}

/// Mutable borrow of a [`World`] that restores the state captured at
/// construction when dropped, including during unwinding.
///
/// The last step's constraint groups, statistics and clock are restored as
/// well; while the guard is alive the world reports no groups until it is
/// stepped.
pub struct RestoreGuard<'w> {
    world: &'w mut World,
    saved: WorldState,
    record: Option<StepRecord>,
}

impl<'w> RestoreGuard<'w> {
    pub fn new(world: &'w mut World) -> Self {
        let saved = WorldState::capture(world);
        let record = Some(world.take_step_record());
        Self { world, saved, record }
    }
}

impl Deref for RestoreGuard<'_> {
    type Target = World;

    fn deref(&self) -> &World {
        self.world
    }
}

impl DerefMut for RestoreGuard<'_> {
    fn deref_mut(&mut self) -> &mut World {
        self.world
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        self.saved.apply(self.world);
        if let Some(record) = self.record.take() {
            self.world.restore_step_record(record);
        }
    }
}
