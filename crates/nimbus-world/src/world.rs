//! The simulated world: skeletons, contacts and the time step.

use crate::{ConstraintGroup, Result, Skeleton, WorldConfig, WorldError, WorldLayout};
use nimbus_contact::{
    BoxedLcp, Contact, ContactConstraint, ContactMaterial, DofScope, PgsSettings, SkeletonGeometry,
    detect_contacts,
};
use nimbus_math::{DMat, DVec, Vec3};
use nimbus_model::{DofLimits, Model};
use nimbus_rigid::{Kinematics, forward_kinematics, inverse_mass_matrix, unconstrained_velocity};
use tracing::debug;

/// Counts describing the active set of the most recent step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStats {
    pub num_contacts: usize,
    pub num_groups: usize,
    pub num_clamping: usize,
    pub num_upper_bound: usize,
    pub num_bouncing: usize,
    /// Every group's LCP solution was standardized.
    pub standardized: bool,
}

impl StepStats {
    /// Same clamping / upper-bound partition and standardization.
    pub fn same_active_set(&self, other: &StepStats) -> bool {
        self.num_clamping == other.num_clamping
            && self.num_upper_bound == other.num_upper_bound
            && self.standardized == other.standardized
    }
}

/// Results of the last step that a restore must put back.
#[derive(Debug, Clone, Default)]
pub(crate) struct StepRecord {
    groups: Vec<ConstraintGroup>,
    stats: StepStats,
    time: f64,
}

pub struct World {
    config: WorldConfig,
    skeletons: Vec<Skeleton>,
    layout: WorldLayout,
    lcp_cache: DVec,
    penetration_correction: bool,
    constraint_force_mixing: bool,
    groups: Vec<ConstraintGroup>,
    last_stats: StepStats,
    time: f64,
}

impl World {
    pub fn new(config: WorldConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            skeletons: Vec::new(),
            layout: WorldLayout::default(),
            lcp_cache: DVec::zeros(0),
            penetration_correction: true,
            constraint_force_mixing: true,
            groups: Vec::new(),
            last_stats: StepStats::default(),
            time: 0.0,
        })
    }

    /// Add a skeleton at its default (zero) state and return its index.
    pub fn add_skeleton(&mut self, model: Model, material: ContactMaterial) -> Result<usize> {
        if self.skeleton_index(&model.name).is_some() {
            return Err(WorldError::DuplicateSkeleton(model.name));
        }
        self.skeletons.push(Skeleton::new(model, material));
        self.layout = WorldLayout::from_sizes(self.skeletons.iter().map(|s| (s.ndofs(), s.nbodies())));
        self.lcp_cache = DVec::zeros(0);
        Ok(self.skeletons.len() - 1)
    }

    pub fn skeleton_index(&self, name: &str) -> Option<usize> {
        self.skeletons.iter().position(|s| s.name() == name)
    }

    pub fn skeleton(&self, index: usize) -> &Skeleton {
        &self.skeletons[index]
    }

    pub fn skeletons(&self) -> &[Skeleton] {
        &self.skeletons
    }

    pub fn num_skeletons(&self) -> usize {
        self.skeletons.len()
    }

    pub fn layout(&self) -> &WorldLayout {
        &self.layout
    }

    pub fn ndofs(&self) -> usize {
        self.layout.ndofs()
    }

    pub fn nbodies(&self) -> usize {
        self.layout.nbodies()
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn dt(&self) -> f64 {
        self.config.dt
    }

    pub fn gravity(&self) -> Vec3 {
        self.config.gravity_vector()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    fn concat(&self, pick: impl Fn(&Skeleton) -> &DVec) -> DVec {
        let mut out = DVec::zeros(self.ndofs());
        for (s, span) in self.skeletons.iter().zip(self.layout.spans()) {
            out.rows_mut(span.dof_offset, span.ndofs).copy_from(pick(s));
        }
        out
    }

    fn distribute(&mut self, values: &DVec, pick: impl Fn(&mut Skeleton) -> &mut DVec) {
        assert_eq!(values.len(), self.ndofs(), "world vector has wrong length");
        for (s, span) in self.skeletons.iter_mut().zip(self.layout.spans()) {
            pick(s).copy_from(&values.rows(span.dof_offset, span.ndofs));
        }
    }

    pub fn positions(&self) -> DVec {
        self.concat(|s| &s.state.q)
    }

    pub fn set_positions(&mut self, q: &DVec) {
        self.distribute(q, |s| &mut s.state.q);
    }

    pub fn velocities(&self) -> DVec {
        self.concat(|s| &s.state.v)
    }

    pub fn set_velocities(&mut self, v: &DVec) {
        self.distribute(v, |s| &mut s.state.v);
    }

    pub fn forces(&self) -> DVec {
        self.concat(|s| &s.state.tau)
    }

    pub fn set_forces(&mut self, tau: &DVec) {
        self.distribute(tau, |s| &mut s.state.tau);
    }

    /// Per-body masses, skeleton by skeleton.
    pub fn masses(&self) -> DVec {
        let values: Vec<f64> = self
            .skeletons
            .iter()
            .flat_map(|s| s.model.body_masses().iter().copied().collect::<Vec<_>>())
            .collect();
        DVec::from_vec(values)
    }

    pub fn set_masses(&mut self, masses: &DVec) {
        assert_eq!(masses.len(), self.nbodies(), "mass vector has wrong length");
        for (s, span) in self.skeletons.iter_mut().zip(self.layout.spans()) {
            s.model.set_body_masses(&masses.rows(span.body_offset, span.nbodies).into_owned());
        }
    }

    /// Impulses of the last step, concatenated group by group; used to warm
    /// start the next solve when the constraint count is unchanged.
    pub fn lcp_cache(&self) -> &DVec {
        &self.lcp_cache
    }

    pub fn set_lcp_cache(&mut self, cache: DVec) {
        self.lcp_cache = cache;
    }

    fn limits(&self, pick: impl Fn(&Model) -> DofLimits) -> DofLimits {
        let mut lower = DVec::zeros(self.ndofs());
        let mut upper = DVec::zeros(self.ndofs());
        for (s, span) in self.skeletons.iter().zip(self.layout.spans()) {
            let limits = pick(&s.model);
            lower.rows_mut(span.dof_offset, span.ndofs).copy_from(&limits.lower);
            upper.rows_mut(span.dof_offset, span.ndofs).copy_from(&limits.upper);
        }
        DofLimits { lower, upper }
    }

    pub fn position_limits(&self) -> DofLimits {
        self.limits(Model::position_limits)
    }

    pub fn velocity_limits(&self) -> DofLimits {
        self.limits(Model::velocity_limits)
    }

    pub fn force_limits(&self) -> DofLimits {
        self.limits(Model::force_limits)
    }

    pub fn penetration_correction(&self) -> bool {
        self.penetration_correction
    }

    pub fn set_penetration_correction(&mut self, enabled: bool) {
        self.penetration_correction = enabled;
    }

    pub fn constraint_force_mixing(&self) -> bool {
        self.constraint_force_mixing
    }

    pub fn set_constraint_force_mixing(&mut self, enabled: bool) {
        self.constraint_force_mixing = enabled;
    }

    /// Kinematic scope over `skeletons` (in that DOF order) at the current
    /// positions.
    pub fn scope(&self, skeletons: &[usize]) -> DofScope<'_> {
        let mut scope = DofScope::new(self.skeletons.len());
        for &s in skeletons {
            let skel = &self.skeletons[s];
            scope.push(s, &skel.model, &skel.state.q);
        }
        scope
    }

    /// Block-diagonal inverse mass matrix over `skeletons` at the current
    /// positions.
    pub fn inverse_mass_matrix(&self, skeletons: &[usize]) -> DMat {
        let n: usize = skeletons.iter().map(|&s| self.skeletons[s].ndofs()).sum();
        let mut minv = DMat::zeros(n, n);
        let mut offset = 0;
        for &s in skeletons {
            let skel = &self.skeletons[s];
            let k = skel.ndofs();
            minv.view_mut((offset, offset), (k, k))
                .copy_from(&inverse_mass_matrix(&skel.model, &skel.state.q));
            offset += k;
        }
        minv
    }

    /// Constraint groups of the last step.
    pub fn constraint_groups(&self) -> &[ConstraintGroup] {
        &self.groups
    }

    /// Move the last step's constraint groups out of the world.
    pub fn take_constraint_groups(&mut self) -> Vec<ConstraintGroup> {
        std::mem::take(&mut self.groups)
    }

    pub fn last_step_stats(&self) -> StepStats {
        self.last_stats
    }

    pub(crate) fn take_step_record(&mut self) -> StepRecord {
        StepRecord {
            groups: std::mem::take(&mut self.groups),
            stats: self.last_stats,
            time: self.time,
        }
    }

    pub(crate) fn restore_step_record(&mut self, record: StepRecord) {
        self.groups = record.groups;
        self.last_stats = record.stats;
        self.time = record.time;
    }

    /// Advance one time step.
    ///
    /// ```text
    /// v_pre = v + dt·M⁻¹(τ − C)
    /// v'    = v_pre + M⁻¹·A·f      (f from each group's LCP)
    /// q'    = q + dt·v'
    /// ```
    pub fn step(&mut self) {
        let dt = self.config.dt;
        let gravity = self.config.gravity_vector();

        let v_pre: Vec<DVec> = self
            .skeletons
            .iter()
            .map(|s| unconstrained_velocity(&s.model, &s.state.q, &s.state.v, &s.state.tau, &gravity, dt))
            .collect();

        let contacts = self.detect();
        let partition = partition_contacts(self.skeletons.len(), &contacts);
        let pending: Vec<(Vec<usize>, Vec<ContactConstraint>)> = partition
            .into_iter()
            .map(|(skeletons, contact_ids)| {
                let group_contacts: Vec<Contact> = contact_ids.iter().map(|&i| contacts[i].clone()).collect();
                (skeletons, ContactConstraint::from_contacts(&group_contacts))
            })
            .collect();

        let total: usize = pending.iter().map(|(_, c)| c.len()).sum();
        let warm_start = self.lcp_cache.len() == total;
        let mut cursor = 0;
        let mut groups = Vec::with_capacity(pending.len());
        for (skeletons, constraints) in pending {
            let warm = warm_start.then(|| self.lcp_cache.rows(cursor, constraints.len()).into_owned());
            cursor += constraints.len();
            groups.push(self.solve_group(skeletons, constraints, &v_pre, warm.as_ref()));
        }

        let mut v_next = v_pre;
        for group in &groups {
            let v_group = group.pre_constraint_velocity() + group.velocity_change();
            let mut offset = 0;
            for &s in group.skeletons() {
                let n = self.skeletons[s].ndofs();
                v_next[s] = v_group.rows(offset, n).into_owned();
                offset += n;
            }
        }
        for (skel, v) in self.skeletons.iter_mut().zip(v_next) {
            skel.state.q += &v * dt;
            skel.state.v = v;
        }

        let cache: Vec<f64> = groups
            .iter()
            .flat_map(|g| g.solution().impulses.iter().copied().collect::<Vec<_>>())
            .collect();
        self.lcp_cache = DVec::from_vec(cache);
        self.last_stats = StepStats {
            num_contacts: contacts.len(),
            num_groups: groups.len(),
            num_clamping: groups.iter().map(ConstraintGroup::num_clamping).sum(),
            num_upper_bound: groups.iter().map(ConstraintGroup::num_upper_bound).sum(),
            num_bouncing: groups.iter().map(ConstraintGroup::num_bouncing).sum(),
            standardized: groups.iter().all(|g| g.solution().standardized),
        };
        self.groups = groups;
        self.time += dt;
        debug!(
            contacts = self.last_stats.num_contacts,
            groups = self.last_stats.num_groups,
            clamping = self.last_stats.num_clamping,
            upper_bound = self.last_stats.num_upper_bound,
            "world step"
        );
    }

    fn detect(&self) -> Vec<Contact> {
        let kins: Vec<Kinematics> = self
            .skeletons
            .iter()
            .map(|s| forward_kinematics(&s.model, &s.state.q))
            .collect();
        let geometry: Vec<SkeletonGeometry> = self
            .skeletons
            .iter()
            .zip(&kins)
            .enumerate()
            .map(|(index, (s, kin))| SkeletonGeometry {
                index,
                model: &s.model,
                kin,
                material: s.material,
            })
            .collect();
        detect_contacts(&geometry, self.config.ground.as_ref(), self.config.contact_margin)
    }

    fn solve_group(
        &self,
        skeletons: Vec<usize>,
        constraints: Vec<ContactConstraint>,
        v_pre: &[DVec],
        warm: Option<&DVec>,
    ) -> ConstraintGroup {
        let scope = self.scope(&skeletons);
        let mut a = DMat::zeros(scope.ndofs(), constraints.len());
        for (j, c) in constraints.iter().enumerate() {
            a.set_column(j, &c.column(&scope));
        }
        let minv_a = self.inverse_mass_matrix(&skeletons) * &a;
        let q = a.transpose() * &minv_a;

        let v_group = DVec::from_vec(
            skeletons
                .iter()
                .flat_map(|&s| v_pre[s].iter().copied().collect::<Vec<_>>())
                .collect(),
        );
        let relative = a.transpose() * &v_group;
        let mut b = DVec::from_iterator(
            constraints.len(),
            constraints.iter().zip(relative.iter()).map(|(c, rel)| -c.bounce() * rel),
        );
        if self.penetration_correction {
            for (i, c) in constraints.iter().enumerate() {
                if c.is_normal() {
                    b[i] += self.config.erp * (c.depth - self.config.slop).max(0.0) / self.config.dt;
                }
            }
        }

        let lcp = BoxedLcp::from_constraints(q, b, &constraints);
        let settings = PgsSettings {
            cfm: if self.constraint_force_mixing { self.config.cfm } else { 0.0 },
            ..self.config.pgs
        };
        let solution = lcp.solve(&settings, warm);
        let velocity_change = minv_a * &solution.impulses;
        ConstraintGroup::new(skeletons, constraints, lcp, solution, v_group, velocity_change)
    }
}

/// Union skeletons joined by contacts. Returns `(skeletons, contacts)` per
/// group; groups are ordered by their lowest skeleton index and list their
/// skeletons in ascending order.
fn partition_contacts(num_skeletons: usize, contacts: &[Contact]) -> Vec<(Vec<usize>, Vec<usize>)> {
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let mut parent: Vec<usize> = (0..num_skeletons).collect();
    let mut involved = vec![false; num_skeletons];
    for contact in contacts {
        let (a, b) = contact.skeletons();
        involved[a] = true;
        if let Some(b) = b {
            involved[b] = true;
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            if ra != rb {
                parent[ra.max(rb)] = ra.min(rb);
            }
        }
    }

    let mut group_of_root: Vec<Option<usize>> = vec![None; num_skeletons];
    let mut groups: Vec<(Vec<usize>, Vec<usize>)> = Vec::new();
    for s in (0..num_skeletons).filter(|&s| involved[s]) {
        let root = find(&mut parent, s);
        let idx = *group_of_root[root].get_or_insert_with(|| {
            groups.push((Vec::new(), Vec::new()));
            groups.len() - 1
        });
        groups[idx].0.push(s);
    }
    for (ci, contact) in contacts.iter().enumerate() {
        let root = find(&mut parent, contact.point.skeleton);
        if let Some(idx) = group_of_root[root] {
            groups[idx].1.push(ci);
        }
    }
    groups
}
