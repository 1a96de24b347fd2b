//! Differentiation variables and the Jacobian kinds built from them.

use nimbus_math::DVec;
use nimbus_world::World;

/// A quantity at the start of a step that Jacobians are taken with respect
/// to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WithRespectTo {
    Position,
    Velocity,
    Force,
    /// Per-body masses, skeleton by skeleton.
    Mass,
}

impl WithRespectTo {
    pub fn dim(self, world: &World) -> usize {
        match self {
            WithRespectTo::Mass => world.nbodies(),
            _ => world.ndofs(),
        }
    }

    pub fn get(self, world: &World) -> DVec {
        match self {
            WithRespectTo::Position => world.positions(),
            WithRespectTo::Velocity => world.velocities(),
            WithRespectTo::Force => world.forces(),
            WithRespectTo::Mass => world.masses(),
        }
    }

    pub fn set(self, world: &mut World, value: &DVec) {
        match self {
            WithRespectTo::Position => world.set_positions(value),
            WithRespectTo::Velocity => world.set_velocities(value),
            WithRespectTo::Force => world.set_forces(value),
            WithRespectTo::Mass => world.set_masses(value),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WithRespectTo::Position => "position",
            WithRespectTo::Velocity => "velocity",
            WithRespectTo::Force => "force",
            WithRespectTo::Mass => "mass",
        }
    }
}

/// State read after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutput {
    Position,
    Velocity,
}

impl StepOutput {
    pub fn get(self, world: &World) -> DVec {
        match self {
            StepOutput::Position => world.positions(),
            StepOutput::Velocity => world.velocities(),
        }
    }
}

/// The six Jacobians of one step, named `<input><Output>`: `PosVel` is
/// ∂v'/∂q and `VelPos` is ∂q'/∂v.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JacobianKind {
    PosPos,
    PosVel,
    VelPos,
    VelVel,
    ForceVel,
    MassVel,
}

impl JacobianKind {
    pub const ALL: [JacobianKind; 6] = [
        JacobianKind::PosPos,
        JacobianKind::PosVel,
        JacobianKind::VelPos,
        JacobianKind::VelVel,
        JacobianKind::ForceVel,
        JacobianKind::MassVel,
    ];

    pub fn wrt(self) -> WithRespectTo {
        match self {
            JacobianKind::PosPos | JacobianKind::PosVel => WithRespectTo::Position,
            JacobianKind::VelPos | JacobianKind::VelVel => WithRespectTo::Velocity,
            JacobianKind::ForceVel => WithRespectTo::Force,
            JacobianKind::MassVel => WithRespectTo::Mass,
        }
    }

    pub fn output(self) -> StepOutput {
        match self {
            JacobianKind::PosPos | JacobianKind::VelPos => StepOutput::Position,
            _ => StepOutput::Velocity,
        }
    }

    /// Position in [`JacobianKind::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            JacobianKind::PosPos => "pos_pos",
            JacobianKind::PosVel => "pos_vel",
            JacobianKind::VelPos => "vel_pos",
            JacobianKind::VelVel => "vel_vel",
            JacobianKind::ForceVel => "force_vel",
            JacobianKind::MassVel => "mass_vel",
        }
    }
}
