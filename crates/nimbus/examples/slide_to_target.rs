//! Gradient descent through a contact-rich rollout.
//!
//! A ball slides on rough ground and friction slows it down every step. We
//! search for the launch speed that puts it at `TARGET` after `STEPS` steps,
//! using the analytic rollout gradient.

use nimbus::scenes;
use nimbus::{DiffConfig, LossGradient, PerformanceLog, Rollout};

const STEPS: usize = 50;
const TARGET: f64 = 0.8;
const FRICTION: f64 = 0.2;

fn main() {
    println!("=== Slide to target ===\n");
    println!("iter    v0        x_final    loss        dL/dv0");
    println!("────────────────────────────────────────────────────");

    let config = DiffConfig::default();
    let mut v0 = 1.5;
    let mut log = PerformanceLog::new("optimize");

    for iter in 0..30 {
        let mut world = scenes::sliding_ball(FRICTION, v0).expect("scene builds");
        let rollout = Rollout::simulate(&mut world, STEPS, &config);
        let x = world.positions()[0];
        let loss = (x - TARGET).powi(2);

        let mut terminal = LossGradient::for_world(&world);
        terminal.position[0] = 2.0 * (x - TARGET);
        let grad = rollout.backprop(&mut world, &terminal, Some(&mut log));
        let slope = grad.initial.velocity[0];

        println!("{iter:4}    {v0:.5}   {x:.6}   {loss:.3e}   {slope:+.4e}");
        if loss < 1e-12 {
            break;
        }
        v0 -= slope;
    }

    log.end();
    println!("\n{} backprop steps in {:?}", log.children().len(), log.elapsed());
}
