//! nimbus: differentiable rigid-body simulation through contact.
//!
//! This is the umbrella crate. It re-exports the sub-crates, adds
//! multi-step [`Rollout`]s with gradient accumulation and their
//! serializable [`TrajectoryRecord`]s, and provides a few ready-made
//! [`scenes`].

pub use nimbus_contact::{self, ContactMaterial, Ground};
pub use nimbus_diff::{
    self, DiffConfig, Differencing, JacobianKind, LossGradient, MappedGradient, MappedSnapshot, PerformanceLog,
    Snapshot, StepJacobians, WithRespectTo, WorldSpaceMap, forward_pass, mapped_forward_pass,
};
pub use nimbus_math::{self, DMat, DVec, Vec3};
pub use nimbus_model::{self, Model, ModelBuilder, State};
pub use nimbus_rigid;
pub use nimbus_world::{self, RestoreGuard, World, WorldConfig, WorldError, WorldState};

pub mod record;
pub mod scenes;

pub use record::{JOINT_SPACE, MatrixRecord, RecordError, TrajectoryRecord};

use std::collections::BTreeMap;
use tracing::debug;

/// A recorded multi-step trajectory.
///
/// Besides the steps, a rollout carries named metadata matrices (targets,
/// costs, anything a caller wants to keep next to the trajectory); they
/// travel into its [`TrajectoryRecord`].
#[derive(Debug, Clone, Default)]
pub struct Rollout {
    snapshots: Vec<Snapshot>,
    metadata: BTreeMap<String, DMat>,
}

/// Loss gradient with respect to the start of a rollout.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutGradient {
    /// Gradient with respect to the initial positions, velocities and
    /// masses; its `force` entry is the gradient for the first step.
    pub initial: LossGradient,
    /// Gradient with respect to the applied force of each step.
    pub forces: Vec<DVec>,
}

impl Rollout {
    /// Step `world` `steps` times with its current forces held fixed.
    pub fn simulate(world: &mut World, steps: usize, config: &DiffConfig) -> Self {
        let snapshots = (0..steps).map(|_| forward_pass(world, config.clone())).collect();
        Self {
            snapshots,
            metadata: BTreeMap::new(),
        }
    }

    /// Step `world` once per entry of `forces`, applying that force first.
    pub fn with_forces(world: &mut World, forces: &[DVec], config: &DiffConfig) -> Self {
        let snapshots = forces
            .iter()
            .map(|tau| {
                world.set_forces(tau);
                forward_pass(world, config.clone())
            })
            .collect();
        Self {
            snapshots,
            metadata: BTreeMap::new(),
        }
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn initial_state(&self) -> Option<&WorldState> {
        self.snapshots.first().map(Snapshot::pre_state)
    }

    pub fn final_state(&self) -> Option<&WorldState> {
        self.snapshots.last().map(Snapshot::post_state)
    }

    /// The `len` steps starting at step `start`, with the metadata.
    ///
    /// Panics if the range runs past the end of the rollout.
    pub fn slice(&self, start: usize, len: usize) -> Rollout {
        assert!(
            start + len <= self.snapshots.len(),
            "slice {start}..{} of a {}-step rollout",
            start + len,
            self.snapshots.len()
        );
        Rollout {
            snapshots: self.snapshots[start..start + len].to_vec(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: DMat) {
        self.metadata.insert(key.into(), value);
    }

    pub fn metadata(&self, key: &str) -> Option<&DMat> {
        self.metadata.get(key)
    }

    pub fn metadata_map(&self) -> &BTreeMap<String, DMat> {
        &self.metadata
    }

    /// Joint positions, one column per state: the initial state and the
    /// state after every step.
    pub fn poses(&self) -> DMat {
        self.state_columns(|s| &s.positions)
    }

    /// Joint velocities, laid out like [`poses`](Rollout::poses).
    pub fn vels(&self) -> DMat {
        self.state_columns(|s| &s.velocities)
    }

    /// Applied forces, one column per step.
    pub fn forces(&self) -> DMat {
        if self.snapshots.is_empty() {
            return DMat::zeros(0, 0);
        }
        let columns: Vec<DVec> = self.snapshots.iter().map(|s| s.pre_state().forces.clone()).collect();
        DMat::from_columns(&columns)
    }

    fn state_columns(&self, pick: impl Fn(&WorldState) -> &DVec) -> DMat {
        let Some(first) = self.snapshots.first() else {
            return DMat::zeros(0, 0);
        };
        let columns: Vec<DVec> = std::iter::once(first.pre_state())
            .chain(self.snapshots.iter().map(Snapshot::post_state))
            .map(|s| pick(s).clone())
            .collect();
        DMat::from_columns(&columns)
    }

    /// Serializable copy of the trajectory in joint space and in world
    /// space under each of `maps`.
    pub fn record(&self, world: &World, maps: &[(&str, &WorldSpaceMap)]) -> TrajectoryRecord {
        TrajectoryRecord::from_rollout(self, world, maps)
    }

    /// Back-propagate `terminal`, the loss gradient with respect to the
    /// final state, to the start of the rollout. Mass gradients accumulate
    /// across steps.
    pub fn backprop(
        &self,
        world: &mut World,
        terminal: &LossGradient,
        perf: Option<&mut PerformanceLog>,
    ) -> RolloutGradient {
        let mut next = LossGradient {
            force: DVec::zeros(terminal.force.len()),
            ..terminal.clone()
        };
        let mut forces = vec![DVec::zeros(terminal.force.len()); self.snapshots.len()];
        let mut run = perf.map(|p| p.start_run("rollout_backprop"));
        for (i, snapshot) in self.snapshots.iter().enumerate().rev() {
            let grad = snapshot.backprop(world, &next, run.as_deref_mut());
            forces[i] = grad.force.clone();
            next = LossGradient {
                force: DVec::zeros(grad.force.len()),
                ..grad
            };
            if i == 0 {
                next.force = forces[0].clone();
            }
        }
        if let Some(run) = run {
            run.close();
        }
        debug!(steps = self.snapshots.len(), "rollout backprop");
        RolloutGradient { initial: next, forces }
    }
}
