//! Criterion benchmarks comparing analytic and finite-difference step
//! Jacobians.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nimbus_contact::ContactMaterial;
use nimbus_diff::{DiffConfig, Differencing, JacobianKind, LossGradient, Snapshot, forward_pass};
use nimbus_math::{DVec, Mat3, SpatialInertia, SpatialTransform, Vec3};
use nimbus_model::{Model, ModelBuilder};
use nimbus_world::{World, WorldConfig};

// ---------------------------------------------------------------------------
// Scene builders
// ---------------------------------------------------------------------------

fn link_inertia(mass: f64, length: f64) -> SpatialInertia {
    SpatialInertia::new(
        mass,
        Vec3::new(0.0, 0.0, -length / 2.0),
        Mat3::from_diagonal(&Vec3::new(mass * length * length / 12.0, mass * length * length / 12.0, 0.0)),
    )
}

/// A chain of `n` revolute links hanging from a point `n + 1` above the
/// ground. The foot on the last link stays clear of it.
fn make_chain(n: usize) -> Model {
    let length = 1.0;
    let mut builder = ModelBuilder::new("chain");
    for i in 0..n {
        let parent = if i == 0 { -1 } else { (i - 1) as i32 };
        let xf = if i == 0 {
            SpatialTransform::translation(Vec3::new(0.0, 0.0, n as f64 + 1.0))
        } else {
            SpatialTransform::translation(Vec3::new(0.0, 0.0, -length))
        };
        builder = builder.add_revolute_body(&format!("link{}", i + 1), parent, xf, Vec3::y(), link_inertia(1.0, length));
    }
    builder
        .contact_points(&[Vec3::new(0.0, 0.0, -length)])
        .build()
        .expect("chain model")
}

fn chain_world(n: usize) -> World {
    let mut world = World::new(WorldConfig::default()).expect("world");
    world
        .add_skeleton(make_chain(n), ContactMaterial::default())
        .expect("chain");
    let q: Vec<f64> = (0..n).map(|i| 0.3 - 0.1 * i as f64).collect();
    world.set_positions(&DVec::from_vec(q));
    world
}

/// A ball sliding on the ground with friction.
fn sliding_ball_world() -> World {
    let model = ModelBuilder::new("ball")
        .add_translating_body("ball", -1, Vec3::zeros(), SpatialInertia::point_mass(1.0, Vec3::zeros()))
        .contact_points(&[Vec3::zeros()])
        .build()
        .expect("ball model");
    let mut world = World::new(WorldConfig::default()).expect("world");
    world
        .add_skeleton(model, ContactMaterial::new(0.5, 0.0))
        .expect("ball");
    world.set_velocities(&DVec::from_vec(vec![1.0, 0.0, 0.0]));
    world
}

// ---------------------------------------------------------------------------
// Benchmark 1: Contact step, analytic vs finite differences
// ---------------------------------------------------------------------------

fn bench_sliding_ball(c: &mut Criterion) {
    let mut group = c.benchmark_group("sliding_ball");
    let mut world = sliding_ball_world();
    let snapshot = forward_pass(&mut world, DiffConfig::default());

    for kind in [JacobianKind::PosVel, JacobianKind::VelVel, JacobianKind::MassVel] {
        group.bench_function(format!("analytic_{}", kind.name()), |b| {
            b.iter(|| {
                let fresh: Snapshot = snapshot.clone();
                fresh.jacobian(&mut world, kind, None).clone()
            });
        });
        group.bench_function(format!("central_{}", kind.name()), |b| {
            b.iter(|| snapshot.finite_difference_jacobian(&mut world, kind, Differencing::Central));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark 2: Chain scaling (n = 1, 2, 4, 8)
// ---------------------------------------------------------------------------

fn bench_chain_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_scaling");
    group.sample_size(20);

    for &n in &[1, 2, 4, 8] {
        let mut world = chain_world(n);
        let snapshot = forward_pass(&mut world, DiffConfig::default());

        group.bench_with_input(BenchmarkId::new("analytic_pos_vel", n), &n, |b, _| {
            b.iter(|| snapshot.clone().pos_vel(&mut world).clone());
        });

        group.bench_with_input(BenchmarkId::new("ridders_pos_vel", n), &n, |b, _| {
            b.iter(|| snapshot.finite_difference_jacobian(&mut world, JacobianKind::PosVel, Differencing::Ridders));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark 3: Backprop, chained vs per group
// ---------------------------------------------------------------------------

fn bench_backprop(c: &mut Criterion) {
    let mut group = c.benchmark_group("backprop");
    let mut world = chain_world(4);
    let snapshot = forward_pass(&mut world, DiffConfig::default());
    let mut next = LossGradient::for_world(&world);
    next.position.fill(1.0);

    group.bench_function("chained", |b| {
        b.iter(|| snapshot.clone().backprop(&mut world, &next, None));
    });
    group.bench_function("per_group", |b| {
        b.iter(|| snapshot.backprop_per_group(&world, &next, None));
    });

    group.finish();
}

criterion_group!(benches, bench_sliding_ball, bench_chain_scaling, bench_backprop);
criterion_main!(benches);
