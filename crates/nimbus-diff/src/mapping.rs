//! World-space views of joint-space state.
//!
//! A [`WorldSpaceMap`] tracks a list of world points, each a weighted sum of
//! body-fixed points of one skeleton: a body origin, or a skeleton's center
//! of mass. Stacking the tracked points gives a map `x(q)` into world space
//! with linear Jacobian `J(q)`, so that
//!
//! ```text
//! x' = J(q)·v                    (world velocity)
//! ∂L/∂q = J(q)ᵀ·g_x + (∂(J(q)ᵀ·g_ẋ)/∂q)ᵀ·v
//! ∂L/∂v = J(q)ᵀ·g_ẋ
//! ```
//!
//! for world-space loss gradients `g_x` and `g_ẋ`.

use crate::config::DiffConfig;
use crate::loss::LossGradient;
use crate::perf::PerformanceLog;
use crate::snapshot::{Snapshot, forward_pass};
use nimbus_math::{DMat, DVec, Vec3};
use nimbus_rigid::{Kinematics, forward_kinematics, point_jacobian, point_jacobian_derivative};
use nimbus_world::World;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error("No skeleton named `{0}`")]
    UnknownSkeleton(String),

    #[error("Skeleton `{skeleton}` has no body named `{body}`")]
    UnknownBody { skeleton: String, body: String },

    #[error("Skeleton `{0}` has no mass")]
    Massless(String),
}

/// What a tracked point follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedKind {
    BodyOrigin { body: String },
    CenterOfMass,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WeightedPoint {
    body: usize,
    local: Vec3,
    weight: f64,
}

/// One tracked world point.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPoint {
    pub skeleton: usize,
    pub kind: TrackedKind,
    points: Vec<WeightedPoint>,
}

impl TrackedPoint {
    fn world_position(&self, kin: &Kinematics) -> Vec3 {
        self.points
            .iter()
            .fold(Vec3::zeros(), |acc, p| acc + kin.point_world(p.body, &p.local) * p.weight)
    }
}

/// Joint space to world space map over a list of tracked points.
///
/// Center-of-mass weights are fixed when the point is added, so mass
/// changes made later are not reflected in the map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldSpaceMap {
    points: Vec<TrackedPoint>,
}

impl WorldSpaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn skeleton_index(world: &World, skeleton: &str) -> Result<usize, MappingError> {
        world
            .skeleton_index(skeleton)
            .ok_or_else(|| MappingError::UnknownSkeleton(skeleton.to_string()))
    }

    /// Track the origin of `body` in `skeleton`.
    pub fn track_body(mut self, world: &World, skeleton: &str, body: &str) -> Result<Self, MappingError> {
        let s = Self::skeleton_index(world, skeleton)?;
        let index = world
            .skeleton(s)
            .model
            .bodies
            .iter()
            .position(|b| b.name == body)
            .ok_or_else(|| MappingError::UnknownBody {
                skeleton: skeleton.to_string(),
                body: body.to_string(),
            })?;
        self.points.push(TrackedPoint {
            skeleton: s,
            kind: TrackedKind::BodyOrigin { body: body.to_string() },
            points: vec![WeightedPoint {
                body: index,
                local: Vec3::zeros(),
                weight: 1.0,
            }],
        });
        Ok(self)
    }

    /// Track the center of mass of `skeleton` at its current masses.
    pub fn track_center_of_mass(mut self, world: &World, skeleton: &str) -> Result<Self, MappingError> {
        let s = Self::skeleton_index(world, skeleton)?;
        let bodies = &world.skeleton(s).model.bodies;
        let total: f64 = bodies.iter().map(|b| b.inertia.mass).sum();
        if total <= 0.0 {
            return Err(MappingError::Massless(skeleton.to_string()));
        }
        let points = bodies
            .iter()
            .enumerate()
            .filter(|(_, b)| b.inertia.mass > 0.0)
            .map(|(i, b)| WeightedPoint {
                body: i,
                local: b.inertia.com,
                weight: b.inertia.mass / total,
            })
            .collect();
        self.points.push(TrackedPoint {
            skeleton: s,
            kind: TrackedKind::CenterOfMass,
            points,
        });
        Ok(self)
    }

    pub fn points(&self) -> &[TrackedPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Length of a mapped vector: three coordinates per tracked point.
    pub fn dim(&self) -> usize {
        3 * self.points.len()
    }

    fn kinematics(world: &World, q: &DVec) -> Vec<Kinematics> {
        let layout = world.layout();
        (0..world.num_skeletons())
            .map(|s| forward_kinematics(&world.skeleton(s).model, &layout.gather_dofs(&[s], q)))
            .collect()
    }

    /// World positions of the tracked points at joint positions `q`. The
    /// world itself is not touched.
    pub fn positions(&self, world: &World, q: &DVec) -> DVec {
        let kins = Self::kinematics(world, q);
        let mut out = DVec::zeros(self.dim());
        for (t, point) in self.points.iter().enumerate() {
            out.fixed_rows_mut::<3>(3 * t)
                .copy_from(&point.world_position(&kins[point.skeleton]));
        }
        out
    }

    /// Linear Jacobian `∂x/∂q` (`dim × ndofs`) over the whole world.
    pub fn jacobian(&self, world: &World, q: &DVec) -> DMat {
        let kins = Self::kinematics(world, q);
        let mut jac = DMat::zeros(self.dim(), world.ndofs());
        for (t, point) in self.points.iter().enumerate() {
            let model = &world.skeleton(point.skeleton).model;
            let kin = &kins[point.skeleton];
            let offset = world.layout().span(point.skeleton).dofs().start;
            let mut block = jac.view_mut((3 * t, offset), (3, model.ndof));
            for p in &point.points {
                let x = kin.point_world(p.body, &p.local);
                block += point_jacobian(model, kin, p.body, &x) * p.weight;
            }
        }
        jac
    }

    /// World velocities `J(q)·v` of the tracked points.
    pub fn velocities(&self, world: &World, q: &DVec, v: &DVec) -> DVec {
        self.jacobian(world, q) * v
    }

    /// One column per time step: joint positions in, world positions out.
    pub fn convert_positions(&self, world: &World, poses: &DMat) -> DMat {
        let columns: Vec<DVec> = poses
            .column_iter()
            .map(|q| self.positions(world, &q.into_owned()))
            .collect();
        stack_columns(self.dim(), &columns)
    }

    /// One column per time step: world velocities at matching `poses` and
    /// `vels` columns.
    pub fn convert_velocities(&self, world: &World, poses: &DMat, vels: &DMat) -> DMat {
        assert_eq!(poses.shape(), vels.shape(), "pose and velocity trajectories differ in shape");
        let columns: Vec<DVec> = poses
            .column_iter()
            .zip(vels.column_iter())
            .map(|(q, v)| self.velocities(world, &q.into_owned(), &v.into_owned()))
            .collect();
        stack_columns(self.dim(), &columns)
    }

    /// `J(q)ᵀ·grad`: a world-position gradient as a joint-position gradient.
    pub fn backprop_positions(&self, world: &World, q: &DVec, grad: &DVec) -> DVec {
        assert_eq!(grad.len(), self.dim(), "world-space gradient has wrong length");
        self.jacobian(world, q).tr_mul(grad)
    }

    /// A world-velocity gradient as `(∂L/∂q, ∂L/∂v)`. World velocities
    /// depend on `q` through `J(q)`, so both parts are nonzero in general.
    pub fn backprop_velocities(&self, world: &World, q: &DVec, v: &DVec, grad: &DVec) -> (DVec, DVec) {
        assert_eq!(grad.len(), self.dim(), "world-space gradient has wrong length");
        let kins = Self::kinematics(world, q);
        let layout = world.layout();
        let mut position = DVec::zeros(world.ndofs());
        for (t, point) in self.points.iter().enumerate() {
            let model = &world.skeleton(point.skeleton).model;
            let kin = &kins[point.skeleton];
            let g = Vec3::new(grad[3 * t], grad[3 * t + 1], grad[3 * t + 2]);
            let v_s = layout.gather_dofs(&[point.skeleton], v);
            let dofs = layout.span(point.skeleton).dofs();
            let mut segment = position.rows_mut(dofs.start, dofs.len());
            for p in &point.points {
                let x = kin.point_world(p.body, &p.local);
                segment += point_jacobian_derivative(model, kin, p.body, &x, &g).tr_mul(&v_s) * p.weight;
            }
        }
        (position, self.jacobian(world, q).tr_mul(grad))
    }

    /// Joint-space loss gradient at `(q, v)` for world-space gradients on
    /// the tracked positions and velocities. Force and mass entries are
    /// zero.
    pub fn pull_back(&self, world: &World, q: &DVec, v: &DVec, grad: &MappedGradient) -> LossGradient {
        let (mut position, velocity) = self.backprop_velocities(world, q, v, &grad.velocity);
        position += self.backprop_positions(world, q, &grad.position);
        LossGradient {
            position,
            velocity,
            force: DVec::zeros(world.ndofs()),
            mass: DVec::zeros(world.nbodies()),
        }
    }
}

fn stack_columns(rows: usize, columns: &[DVec]) -> DMat {
    if columns.is_empty() {
        return DMat::zeros(rows, 0);
    }
    DMat::from_columns(columns)
}

/// Loss gradient with respect to the tracked world positions and
/// velocities after a step.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedGradient {
    pub position: DVec,
    pub velocity: DVec,
}

impl MappedGradient {
    pub fn zeros(map: &WorldSpaceMap) -> Self {
        Self {
            position: DVec::zeros(map.dim()),
            velocity: DVec::zeros(map.dim()),
        }
    }
}

/// A recorded step together with its state in world space.
#[derive(Debug, Clone)]
pub struct MappedSnapshot {
    snapshot: Snapshot,
    map: WorldSpaceMap,
    pre_positions: DVec,
    pre_velocities: DVec,
    post_positions: DVec,
    post_velocities: DVec,
}

impl MappedSnapshot {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn map(&self) -> &WorldSpaceMap {
        &self.map
    }

    pub fn pre_positions(&self) -> &DVec {
        &self.pre_positions
    }

    pub fn pre_velocities(&self) -> &DVec {
        &self.pre_velocities
    }

    pub fn post_positions(&self) -> &DVec {
        &self.post_positions
    }

    pub fn post_velocities(&self) -> &DVec {
        &self.post_velocities
    }

    /// Loss gradient with respect to the step's joint-space inputs, given
    /// a world-space gradient on the tracked points after the step and a
    /// joint-space gradient on the post state (for losses that read both).
    pub fn backprop(
        &self,
        world: &mut World,
        mapped: &MappedGradient,
        joint: &LossGradient,
        perf: Option<&mut PerformanceLog>,
    ) -> LossGradient {
        let post = self.snapshot.post_state();
        let mut next = self.map.pull_back(world, &post.positions, &post.velocities, mapped);
        next += joint;
        self.snapshot.backprop(world, &next, perf)
    }
}

/// [`forward_pass`] that also records the tracked points before and after
/// the step.
pub fn mapped_forward_pass(world: &mut World, map: &WorldSpaceMap, config: DiffConfig) -> MappedSnapshot {
    let (q, v) = (world.positions(), world.velocities());
    let pre_positions = map.positions(world, &q);
    let pre_velocities = map.velocities(world, &q, &v);
    let snapshot = forward_pass(world, config);
    let (q, v) = (world.positions(), world.velocities());
    MappedSnapshot {
        post_positions: map.positions(world, &q),
        post_velocities: map.velocities(world, &q, &v),
        snapshot,
        map: map.clone(),
        pre_positions,
        pre_velocities,
    }
}
