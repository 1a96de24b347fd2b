//! A differentiable record of one simulation step.

use crate::assemble::assemble;
use crate::backprop::clip_to_limits;
use crate::bounce::bounce_approximation;
use crate::config::{DiffConfig, Differencing};
use crate::engine::{JacobianEngine, StepJacobians, pos_pos, vel_pos};
use crate::fd::step_jacobian;
use crate::loss::LossGradient;
use crate::perf::PerformanceLog;
use crate::tree::TreeEval;
use crate::validate::{Replication, equals_or_crash};
use crate::wrt::JacobianKind;
use nimbus_contact::ContactConstraint;
use nimbus_math::{DMat, DVec};
use nimbus_rigid::{inverse_mass_matrix, unconstrained_jacobians};
use nimbus_world::{
    ConstraintGroup, ConstraintMatrices, RestoreGuard, StepStats, World, WorldLayout, WorldState,
};
use std::cell::OnceCell;
use tracing::{debug, warn};

/// Everything needed to differentiate the step that was just taken.
///
/// Construct right after [`World::step`], while the world holds the
/// post-step state. The step's constraint groups move into the snapshot.
/// Jacobians are computed on first request and cached.
///
/// Jacobians always describe the step without penetration correction:
/// the clamping offsets drop the correction term even when the step used
/// it. Record through [`forward_pass`] for a step whose post state agrees
/// with them.
#[derive(Debug, Clone)]
pub struct Snapshot {
    config: DiffConfig,
    dt: f64,
    pre: WorldState,
    post: WorldState,
    stats: StepStats,
    layout: WorldLayout,
    groups: Vec<ConstraintGroup>,
    matrices: ConstraintMatrices,
    jacobians: [OnceCell<DMat>; 6],
    bounce: OnceCell<DMat>,
}

impl Snapshot {
    /// `pre` is the state captured before the step.
    pub fn new(world: &mut World, pre: WorldState, config: DiffConfig) -> Self {
        let post = WorldState::capture(world);
        let stats = world.last_step_stats();
        let mut groups = world.take_constraint_groups();
        {
            let mut guard = RestoreGuard::new(world);
            pre.apply(&mut guard);
            for group in &mut groups {
                group.finalize(&guard);
            }
        }
        let layout = world.layout().clone();
        let matrices = assemble(&groups, &layout);
        debug_assert_eq!(
            matrices.num_clamping(),
            groups.iter().map(|g| g.matrices().num_clamping()).sum::<usize>()
        );
        debug!(
            groups = groups.len(),
            clamping = matrices.num_clamping(),
            upper_bound = matrices.num_upper_bound(),
            bouncing = matrices.num_bouncing(),
            "snapshot"
        );
        Self {
            config,
            dt: world.dt(),
            pre,
            post,
            stats,
            layout,
            groups,
            matrices,
            jacobians: Default::default(),
            bounce: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn pre_state(&self) -> &WorldState {
        &self.pre
    }

    pub fn post_state(&self) -> &WorldState {
        &self.post
    }

    pub fn stats(&self) -> StepStats {
        self.stats
    }

    pub fn layout(&self) -> &WorldLayout {
        &self.layout
    }

    pub fn groups(&self) -> &[ConstraintGroup] {
        &self.groups
    }

    /// World-indexed constraint matrices of all groups.
    pub fn matrices(&self) -> &ConstraintMatrices {
        &self.matrices
    }

    pub fn num_clamping(&self) -> usize {
        self.matrices.num_clamping()
    }

    pub fn num_upper_bound(&self) -> usize {
        self.matrices.num_upper_bound()
    }

    pub fn num_bouncing(&self) -> usize {
        self.matrices.num_bouncing()
    }

    pub fn clamping_constraints(&self) -> &[ContactConstraint] {
        &self.matrices.clamping_constraints
    }

    pub fn upper_bound_constraints(&self) -> &[ContactConstraint] {
        &self.matrices.upper_bound_constraints
    }

    pub fn bouncing_constraints(&self) -> &[ContactConstraint] {
        &self.matrices.bouncing_constraints
    }

    /// Skeletons that belong to no constraint group, ascending.
    pub fn unconstrained_skeletons(&self) -> Vec<usize> {
        let mut claimed = vec![false; self.layout.num_skeletons()];
        for group in &self.groups {
            for &s in group.skeletons() {
                claimed[s] = true;
            }
        }
        (0..claimed.len()).filter(|&s| !claimed[s]).collect()
    }

    fn check_world(&self, world: &World) {
        assert_eq!(world.layout(), &self.layout, "snapshot used with a different world");
    }

    fn engine<'w>(&'w self, world: &'w World) -> JacobianEngine<'w> {
        let all: Vec<usize> = (0..world.num_skeletons()).collect();
        let tree = TreeEval::new(world, &self.pre, &all, self.config.tree);
        JacobianEngine::new(tree, &self.matrices, world.num_skeletons())
    }

    /// Velocity re-map through the bouncing contacts.
    pub fn bounce(&self) -> &DMat {
        self.bounce
            .get_or_init(|| bounce_approximation(&self.matrices.bouncing, &self.matrices.restitution))
    }

    /// Jacobian of `kind`, computed on first use.
    ///
    /// Sourced from finite differences when `use_fd_override` is set, and
    /// checked against them when `slow_debug_results_against_fd` is set.
    pub fn jacobian(&self, world: &mut World, kind: JacobianKind, perf: Option<&mut PerformanceLog>) -> &DMat {
        self.check_world(world);
        self.jacobians[kind.index()].get_or_init(|| self.compute(world, kind, perf))
    }

    fn compute(&self, world: &mut World, kind: JacobianKind, perf: Option<&mut PerformanceLog>) -> DMat {
        let mut run = perf.map(|p| p.start_run(kind.name()));
        let jac = if self.config.use_fd_override {
            self.finite_difference_jacobian(world, kind, self.config.oracle)
        } else {
            let jac = self.analytic(world, kind, run.as_deref_mut());
            if self.config.slow_debug_results_against_fd {
                self.check_against_fd(world, kind, &jac);
            }
            jac
        };
        if let Some(run) = run {
            run.end();
        }
        jac
    }

    fn analytic(&self, world: &mut World, kind: JacobianKind, perf: Option<&mut PerformanceLog>) -> DMat {
        match kind {
            JacobianKind::PosPos => pos_pos(self.jacobian(world, JacobianKind::PosVel, perf), self.bounce(), self.dt),
            JacobianKind::VelPos => vel_pos(self.jacobian(world, JacobianKind::VelVel, perf), self.bounce(), self.dt),
            JacobianKind::PosVel => self.engine(world).pos_vel(),
            JacobianKind::VelVel => self.engine(world).vel_vel(),
            JacobianKind::ForceVel => self.engine(world).force_vel(),
            JacobianKind::MassVel => self.engine(world).mass_vel(),
        }
    }

    fn check_against_fd(&self, world: &mut World, kind: JacobianKind, analytic: &DMat) {
        if matches!(kind, JacobianKind::PosPos | JacobianKind::VelPos) && self.num_bouncing() > 0 {
            warn!(
                jacobian = kind.name(),
                bouncing = self.num_bouncing(),
                "skipping finite-difference check through bouncing contacts"
            );
            return;
        }
        let numeric = self.finite_difference_jacobian(world, kind, self.config.oracle);
        equals_or_crash(
            analytic,
            &numeric,
            self.config.tolerance,
            kind.name(),
            &Replication::from_state(&self.pre),
        );
    }

    /// Jacobian of `kind` by differencing whole steps from the pre-step
    /// state. The world is restored afterwards.
    pub fn finite_difference_jacobian(&self, world: &mut World, kind: JacobianKind, differencing: Differencing) -> DMat {
        self.check_world(world);
        step_jacobian(world, &self.pre, kind, differencing)
    }

    pub fn pos_pos(&self, world: &mut World) -> &DMat {
        self.jacobian(world, JacobianKind::PosPos, None)
    }

    pub fn pos_vel(&self, world: &mut World) -> &DMat {
        self.jacobian(world, JacobianKind::PosVel, None)
    }

    pub fn vel_pos(&self, world: &mut World) -> &DMat {
        self.jacobian(world, JacobianKind::VelPos, None)
    }

    pub fn vel_vel(&self, world: &mut World) -> &DMat {
        self.jacobian(world, JacobianKind::VelVel, None)
    }

    pub fn force_vel(&self, world: &mut World) -> &DMat {
        self.jacobian(world, JacobianKind::ForceVel, None)
    }

    pub fn mass_vel(&self, world: &mut World) -> &DMat {
        self.jacobian(world, JacobianKind::MassVel, None)
    }

    /// All six Jacobians (cached ones are reused).
    pub fn step_jacobians(&self, world: &mut World, mut perf: Option<&mut PerformanceLog>) -> StepJacobians {
        let mut get = |kind| self.jacobian(world, kind, perf.as_deref_mut()).clone();
        StepJacobians {
            pos_pos: get(JacobianKind::PosPos),
            pos_vel: get(JacobianKind::PosVel),
            vel_pos: get(JacobianKind::VelPos),
            vel_vel: get(JacobianKind::VelVel),
            force_vel: get(JacobianKind::ForceVel),
            mass_vel: get(JacobianKind::MassVel),
        }
    }

    /// Loss gradient with respect to this step's inputs, given the gradient
    /// with respect to its outputs. Saturated box limits are clipped.
    pub fn backprop(&self, world: &mut World, next: &LossGradient, perf: Option<&mut PerformanceLog>) -> LossGradient {
        next.assert_dims(self.layout.ndofs(), self.layout.nbodies());
        let mut run = perf.map(|p| p.start_run("backprop"));
        let jacobians = self.step_jacobians(world, run.as_deref_mut());
        let mut grad = jacobians.backprop(self.dt, next);
        self.clip_gradient(world, &mut grad);
        if let Some(run) = run {
            run.close();
        }
        grad
    }

    /// [`backprop`](Snapshot::backprop) computed group by group, with the
    /// analytic engine restricted to each group's skeletons. Skeletons in no
    /// group use their unconstrained step Jacobians.
    pub fn backprop_per_group(&self, world: &World, next: &LossGradient, perf: Option<&mut PerformanceLog>) -> LossGradient {
        self.check_world(world);
        next.assert_dims(self.layout.ndofs(), self.layout.nbodies());
        let mut run = perf.map(|p| p.start_run("backprop_per_group"));
        let mut out = LossGradient::zeros(self.layout.ndofs(), self.layout.nbodies());
        let mut visited = vec![false; self.layout.num_skeletons()];

        for group in &self.groups {
            let skeletons = group.skeletons();
            for &s in skeletons {
                assert!(!visited[s], "skeleton {s} is claimed by two constraint groups");
                visited[s] = true;
            }
            let mut group_run = run.as_deref_mut().map(|p| p.start_run("group"));
            let tree = TreeEval::new(world, &self.pre, skeletons, self.config.tree);
            let engine = JacobianEngine::new(tree, group.matrices(), world.num_skeletons());
            let local = engine.jacobians().backprop(self.dt, &next.gather(&self.layout, skeletons));
            local.scatter_into(&self.layout, skeletons, &mut out);
            if let Some(group_run) = group_run.as_deref_mut() {
                group_run.end();
            }
        }

        for s in (0..visited.len()).filter(|&s| !visited[s]) {
            let one = [s];
            let local = self
                .unconstrained_step_jacobians(world, s)
                .backprop(self.dt, &next.gather(&self.layout, &one));
            local.scatter_into(&self.layout, &one, &mut out);
        }

        self.clip_gradient(world, &mut out);
        if let Some(run) = run {
            run.close();
        }
        out
    }

    /// Step Jacobians of skeleton `s` with no contacts acting on it.
    fn unconstrained_step_jacobians(&self, world: &World, s: usize) -> StepJacobians {
        let one = [s];
        let model = &world.skeleton(s).model;
        let q = self.layout.gather_dofs(&one, &self.pre.positions);
        let v = self.layout.gather_dofs(&one, &self.pre.velocities);
        let tau = self.layout.gather_dofs(&one, &self.pre.forces);
        let dt = self.dt;
        let minv = inverse_mass_matrix(model, &q);
        let tree = unconstrained_jacobians(model, &q, &v, &tau, &world.gravity(), dt);
        let identity = DMat::identity(model.ndof, model.ndof);
        let vel_vel = &identity - &minv * &tree.vel_c * dt;
        StepJacobians {
            pos_pos: &identity + &tree.pos_vel * dt,
            vel_pos: &vel_vel * dt,
            pos_vel: tree.pos_vel,
            vel_vel,
            force_vel: minv * dt,
            mass_vel: tree.mass_vel,
        }
    }

    /// Zero gradient entries that push a saturated pre-step position,
    /// velocity or force further past its limit.
    pub fn clip_gradient(&self, world: &World, grad: &mut LossGradient) {
        clip_to_limits(&mut grad.position, &self.pre.positions, &world.position_limits());
        clip_to_limits(&mut grad.velocity, &self.pre.velocities, &world.velocity_limits());
        clip_to_limits(&mut grad.force, &self.pre.forces, &world.force_limits());
    }

    /// `Aᵀ·v'` of the clamping constraints after the step.
    pub fn clamping_relative_velocities_after(&self) -> DVec {
        self.matrices.clamping.tr_mul(&self.post.velocities)
    }
}

/// Step `world` once with penetration correction and constraint force
/// mixing off, so that the step is a pure function of its inputs, and
/// record it. The toggles are restored afterwards.
pub fn forward_pass(world: &mut World, config: DiffConfig) -> Snapshot {
    let pre = WorldState::capture(world);
    world.set_penetration_correction(false);
    world.set_constraint_force_mixing(false);
    world.step();
    world.set_penetration_correction(pre.penetration_correction);
    world.set_constraint_force_mixing(pre.constraint_force_mixing);
    Snapshot::new(world, pre, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::mismatch;
    use approx::assert_relative_eq;
    use nimbus_contact::ContactMaterial;
    use nimbus_math::{SpatialInertia, SpatialTransform, Vec3};
    use nimbus_model::{Model, ModelBuilder};
    use nimbus_world::WorldConfig;

    fn ball(name: &str, mass: f64) -> Model {
        ModelBuilder::new(name)
            .add_translating_body(name, -1, Vec3::zeros(), SpatialInertia::point_mass(mass, Vec3::zeros()))
            .contact_points(&[Vec3::zeros()])
            .build()
            .unwrap()
    }

    fn pendulum() -> Model {
        ModelBuilder::new("pendulum")
            .add_revolute_body(
                "upper",
                -1,
                SpatialTransform::translation(Vec3::new(3.0, 0.0, 2.0)),
                Vec3::y(),
                SpatialInertia::point_mass(1.0, Vec3::new(0.0, 0.0, -0.5)),
            )
            .add_revolute_body(
                "lower",
                0,
                SpatialTransform::translation(Vec3::new(0.0, 0.0, -0.5)),
                Vec3::y(),
                SpatialInertia::point_mass(0.5, Vec3::new(0.0, 0.0, -0.5)),
            )
            .build()
            .unwrap()
    }

    fn sliding_ball_world() -> World {
        let mut world = World::new(WorldConfig::default()).unwrap();
        world.add_skeleton(ball("ball", 2.0), ContactMaterial::new(0.5, 0.0)).unwrap();
        world.set_velocities(&DVec::from_vec(vec![1.0, 0.0, 0.0]));
        world
    }

    #[test]
    fn free_point_mass_jacobians() {
        let model = ModelBuilder::new("drop")
            .add_prismatic_body("m", -1, SpatialTransform::identity(), Vec3::z(), SpatialInertia::point_mass(1.0, Vec3::zeros()))
            .build()
            .unwrap();
        let mut world = World::new(WorldConfig {
            ground: None,
            ..Default::default()
        })
        .unwrap();
        world.add_skeleton(model, ContactMaterial::default()).unwrap();
        let snapshot = forward_pass(&mut world, DiffConfig::default());
        assert_eq!(snapshot.num_clamping(), 0);
        assert_relative_eq!(snapshot.force_vel(&mut world)[(0, 0)], 0.01, epsilon = 1e-12);
        assert_relative_eq!(snapshot.vel_vel(&mut world)[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(snapshot.pos_pos(&mut world)[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(snapshot.vel_pos(&mut world)[(0, 0)], 0.01, epsilon = 1e-12);
    }

    #[test]
    fn sliding_ball_matches_finite_differences() {
        let mut world = sliding_ball_world();
        let snapshot = forward_pass(&mut world, DiffConfig::default());
        assert_eq!((snapshot.num_clamping(), snapshot.num_upper_bound()), (2, 1));
        for kind in JacobianKind::ALL {
            let analytic = snapshot.jacobian(&mut world, kind, None).clone();
            let numeric = snapshot.finite_difference_jacobian(&mut world, kind, Differencing::Central);
            assert_eq!(mismatch(&analytic, &numeric, 1e-5), None, "{} disagrees", kind.name());
        }
        // Friction couples normal approach speed into sliding speed.
        assert_relative_eq!(snapshot.vel_vel(&mut world)[(0, 2)], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn position_correction_does_not_leak_into_jacobians() {
        let penetrating = || {
            let mut world = sliding_ball_world();
            world.set_positions(&DVec::from_vec(vec![0.0, 0.0, -0.05]));
            world
        };
        let mut corrected = penetrating();
        let pre = WorldState::capture(&corrected);
        assert!(corrected.penetration_correction());
        corrected.step();
        let with_correction = Snapshot::new(&mut corrected, pre, DiffConfig::default());

        let mut plain = penetrating();
        let without_correction = forward_pass(&mut plain, DiffConfig::default());

        assert_eq!(with_correction.matrices().clamping_offsets, without_correction.matrices().clamping_offsets);
        assert!(with_correction.matrices().clamping_impulses[0] > without_correction.matrices().clamping_impulses[0]);
        for kind in JacobianKind::ALL {
            let a = with_correction.jacobian(&mut corrected, kind, None).clone();
            let b = without_correction.jacobian(&mut plain, kind, None).clone();
            assert_eq!(mismatch(&a, &b, 1e-9), None, "{} depends on position correction", kind.name());
        }
    }

    #[test]
    fn fd_override_uses_the_oracle() {
        let mut world = sliding_ball_world();
        let config = DiffConfig {
            use_fd_override: true,
            oracle: Differencing::Central,
            ..Default::default()
        };
        let snapshot = forward_pass(&mut world, config);
        let numeric = snapshot.vel_vel(&mut world).clone();
        assert_relative_eq!(numeric[(0, 2)], 0.5, epsilon = 1e-6);
        assert_relative_eq!(numeric[(2, 2)], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn snapshot_leaves_world_at_post_state() {
        let mut world = sliding_ball_world();
        world.set_penetration_correction(true);
        let snapshot = forward_pass(&mut world, DiffConfig::default());
        let post = WorldState::capture(&world);
        assert_eq!(&post, snapshot.post_state());
        assert!(world.penetration_correction());
        snapshot.finite_difference_jacobian(&mut world, JacobianKind::PosVel, Differencing::Ridders);
        let grad = LossGradient::for_world(&world);
        let _ = snapshot.backprop(&mut world, &grad, None);
        assert_eq!(WorldState::capture(&world), post);
    }

    #[test]
    fn chained_and_per_group_backprop_agree() {
        let mut world = sliding_ball_world();
        world.add_skeleton(pendulum(), ContactMaterial::default()).unwrap();
        world.set_positions(&DVec::from_vec(vec![0.0, 0.0, 0.0, 0.4, -0.3]));
        world.set_velocities(&DVec::from_vec(vec![1.0, 0.0, 0.0, 0.2, 0.1]));
        let snapshot = forward_pass(&mut world, DiffConfig::default());
        assert_eq!(snapshot.unconstrained_skeletons(), vec![1]);

        let next = LossGradient {
            position: DVec::from_vec(vec![0.3, -1.0, 2.0, 0.5, -0.7]),
            velocity: DVec::from_vec(vec![1.0, 0.2, -0.4, 0.1, 0.9]),
            force: DVec::zeros(5),
            mass: DVec::from_vec(vec![0.0, 0.0, 1.0, 0.5, -0.5]),
        };
        let chained = snapshot.backprop(&mut world, &next, None);
        let per_group = snapshot.backprop_per_group(&world, &next, None);
        assert_relative_eq!(chained.position, per_group.position, epsilon = 1e-6);
        assert_relative_eq!(chained.velocity, per_group.velocity, epsilon = 1e-6);
        assert_relative_eq!(chained.force, per_group.force, epsilon = 1e-6);
        assert_relative_eq!(chained.mass, per_group.mass, epsilon = 1e-6);
    }

    #[test]
    fn backprop_records_performance_runs() {
        let mut world = sliding_ball_world();
        let snapshot = forward_pass(&mut world, DiffConfig::default());
        let mut log = PerformanceLog::new("step");
        let grad = LossGradient::for_world(&world);
        snapshot.backprop(&mut world, &grad, Some(&mut log));
        log.end();
        let backprop = log.find("backprop").unwrap();
        assert!(backprop.is_finished());
        assert_eq!(backprop.depth(), 1);
        assert!(backprop.find("pos_vel").is_some());
        assert!(backprop.find("mass_vel").is_some());
    }

    #[test]
    #[should_panic(expected = "no consistent finite-difference sample")]
    fn discontinuous_step_is_rejected() {
        let mut world = World::new(WorldConfig {
            gravity: [0.0; 3],
            ..Default::default()
        })
        .unwrap();
        world.add_skeleton(ball("ball", 1.0), ContactMaterial::default()).unwrap();
        // Touching the ground at rest: any approach velocity clamps, any
        // separating velocity does not.
        let snapshot = forward_pass(&mut world, DiffConfig::default());
        snapshot.finite_difference_jacobian(&mut world, JacobianKind::VelVel, Differencing::Central);
    }
}
