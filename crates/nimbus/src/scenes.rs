//! Small worlds used by the tests, benchmarks and demos.

use nimbus_contact::{ContactMaterial, Ground};
use nimbus_math::{DVec, GRAVITY, SpatialInertia, SpatialTransform, Vec3};
use nimbus_model::{Joint, Model, ModelBuilder};
use nimbus_world::{Result, World, WorldConfig};

/// A point-like body translating freely in x, y and z, touching with one
/// contact point at its origin.
pub fn ball_model(name: &str, mass: f64) -> Result<Model> {
    Ok(ModelBuilder::new(name)
        .add_translating_body(name, -1, Vec3::zeros(), SpatialInertia::point_mass(mass, Vec3::zeros()))
        .contact_points(&[Vec3::zeros()])
        .build()?)
}

/// A 1-DOF unit point mass falling along z with no ground.
pub fn point_mass(dt: f64) -> Result<World> {
    let model = ModelBuilder::new("point")
        .add_prismatic_body(
            "point",
            -1,
            SpatialTransform::identity(),
            Vec3::z(),
            SpatialInertia::point_mass(1.0, Vec3::zeros()),
        )
        .build()?;
    let mut world = World::new(WorldConfig {
        dt,
        ground: None,
        ..Default::default()
    })?;
    world.add_skeleton(model, ContactMaterial::default())?;
    Ok(world)
}

/// A unit slider along x with position limits `[lower, upper]` and a speed
/// limit of 10, starting at `q`. No ground.
pub fn limited_slider(lower: f64, upper: f64, q: f64) -> Result<World> {
    let joint = Joint::prismatic(SpatialTransform::identity(), Vec3::x())
        .with_position_limits(lower, upper)
        .with_velocity_limits(-10.0, 10.0);
    let model = ModelBuilder::new("slider")
        .add_body("slider", -1, joint, SpatialInertia::point_mass(1.0, Vec3::zeros()))
        .build()?;
    let mut world = World::new(WorldConfig {
        ground: None,
        ..Default::default()
    })?;
    world.add_skeleton(model, ContactMaterial::default())?;
    world.set_positions(&DVec::from_element(1, q));
    Ok(world)
}

/// A two-link pendulum hinged 3 above the ground, out of reach of it.
pub fn double_pendulum(q: [f64; 2], v: [f64; 2]) -> Result<World> {
    let model = ModelBuilder::new("pendulum")
        .add_revolute_body(
            "upper",
            -1,
            SpatialTransform::translation(Vec3::new(0.0, 0.0, 3.0)),
            Vec3::y(),
            SpatialInertia::point_mass(1.0, Vec3::new(0.0, 0.0, -1.0)),
        )
        .add_revolute_body(
            "lower",
            0,
            SpatialTransform::translation(Vec3::new(0.0, 0.0, -1.0)),
            Vec3::y(),
            SpatialInertia::point_mass(0.5, Vec3::new(0.0, 0.0, -0.8)),
        )
        .build()?;
    let mut world = World::new(WorldConfig::default())?;
    world.add_skeleton(model, ContactMaterial::default())?;
    world.set_positions(&DVec::from_vec(q.to_vec()));
    world.set_velocities(&DVec::from_vec(v.to_vec()));
    Ok(world)
}

/// A ball of mass 2 resting on the ground, moving along x at `vx`.
pub fn sliding_ball(friction: f64, vx: f64) -> Result<World> {
    let mut world = World::new(WorldConfig::default())?;
    world.add_skeleton(ball_model("ball", 2.0)?, ContactMaterial::new(friction, 0.0))?;
    world.set_velocities(&DVec::from_vec(vec![vx, 0.0, 0.0]));
    Ok(world)
}

/// A ball hitting an elastic ground at speed `speed`.
pub fn bouncing_ball(restitution: f64, speed: f64) -> Result<World> {
    let material = ContactMaterial::new(0.0, restitution);
    let mut world = World::new(WorldConfig {
        ground: Some(Ground { height: 0.0, material }),
        ..Default::default()
    })?;
    world.add_skeleton(ball_model("ball", 1.0)?, material)?;
    world.set_velocities(&DVec::from_vec(vec![0.3, 0.0, -speed]));
    Ok(world)
}

/// A unit ball dropping at speed 1 onto a free table of mass 3, in zero
/// gravity and without ground, next to a third body far away.
pub fn ball_on_table() -> Result<World> {
    let table = ModelBuilder::new("table")
        .add_translating_body("table", -1, Vec3::zeros(), SpatialInertia::point_mass(3.0, Vec3::zeros()))
        .platform(Vec3::zeros(), [1.0, 1.0])
        .build()?;
    let mut world = World::new(WorldConfig {
        gravity: [0.0; 3],
        ground: None,
        ..Default::default()
    })?;
    world.add_skeleton(ball_model("ball", 1.0)?, ContactMaterial::default())?;
    world.add_skeleton(table, ContactMaterial::default())?;
    world.add_skeleton(ball_model("far", 1.0)?, ContactMaterial::default())?;
    world.set_positions(&DVec::from_vec(vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 5.0, 5.0, 5.0]));
    world.set_velocities(&DVec::from_vec(vec![0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 0.5, 0.0]));
    Ok(world)
}

/// A level rod on a free base, pivoting about y, standing on two feet.
pub fn two_foot_rod() -> Result<World> {
    let rod = ModelBuilder::new("rod")
        .add_translating_body("base", -1, Vec3::zeros(), SpatialInertia::point_mass(1.0, Vec3::zeros()))
        .add_revolute_body(
            "rod",
            2,
            SpatialTransform::identity(),
            Vec3::y(),
            SpatialInertia::cuboid(0.5, Vec3::new(1.0, 0.1, 0.1)),
        )
        .contact_points(&[Vec3::new(0.5, 0.0, 0.0), Vec3::new(-0.5, 0.0, 0.0)])
        .build()?;
    let mut world = World::new(WorldConfig::default())?;
    world.add_skeleton(rod, ContactMaterial::default())?;
    world.set_velocities(&DVec::from_vec(vec![0.2, 0.0, 0.0, 0.0]));
    Ok(world)
}

fn leg_model(feet: &[Vec3]) -> Result<Model> {
    Ok(ModelBuilder::new("leg")
        .add_translating_body("hip", -1, Vec3::zeros(), SpatialInertia::point_mass(1.0, Vec3::zeros()))
        .add_revolute_body(
            "leg",
            2,
            SpatialTransform::identity(),
            Vec3::y(),
            SpatialInertia::point_mass(0.2, Vec3::new(0.0, 0.0, -0.5)),
        )
        .contact_points(feet)
        .build()?)
}

/// A hip mass on a leg tilted by `angle` about y, its foot on sticky
/// ground.
pub fn leg_on_base(angle: f64) -> Result<World> {
    let mut world = World::new(WorldConfig::default())?;
    world.add_skeleton(leg_model(&[Vec3::new(0.0, 0.0, -1.0)])?, ContactMaterial::sticky())?;
    world.set_positions(&DVec::from_vec(vec![0.0, 0.0, angle.cos(), angle]));
    Ok(world)
}

/// [`leg_on_base`] with two coincident frictionless feet, warm-started so
/// both clamp. The two contact columns are identical and turn with the
/// leg, so the clamping system is singular and depends on the leg angle.
pub fn leg_on_two_feet(angle: f64) -> Result<World> {
    let foot = Vec3::new(0.0, 0.0, -1.0);
    let mut world = World::new(WorldConfig::default())?;
    world.add_skeleton(leg_model(&[foot, foot])?, ContactMaterial::default())?;
    world.set_positions(&DVec::from_vec(vec![0.0, 0.0, angle.cos(), angle]));
    // Well below the impulse the foot needs, so neither foot starts the
    // sweep at zero.
    world.set_lcp_cache(DVec::from_element(2, 1e-3));
    Ok(world)
}

/// A box resting on four corner points, warm-started with an even split
/// of its weight so every corner clamps.
pub fn box_on_corners() -> Result<World> {
    let mass = 1.0;
    let corners = [
        Vec3::new(0.5, 0.5, 0.0),
        Vec3::new(-0.5, 0.5, 0.0),
        Vec3::new(-0.5, -0.5, 0.0),
        Vec3::new(0.5, -0.5, 0.0),
    ];
    let model = ModelBuilder::new("box")
        .add_translating_body("box", -1, Vec3::zeros(), SpatialInertia::point_mass(mass, Vec3::zeros()))
        .contact_points(&corners)
        .build()?;
    let mut world = World::new(WorldConfig::default())?;
    world.add_skeleton(model, ContactMaterial::default())?;
    let share = mass * GRAVITY * world.dt() / corners.len() as f64;
    world.set_lcp_cache(DVec::from_element(corners.len(), share));
    Ok(world)
}
