//! Simulated robot driven by the mechanism manager.
//!
//! A damped point mass stands in for the robot.  The control thread runs the
//! manager at a fixed period and applies the blended guidance force plus an
//! operator force set from the shell.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info};
use vmech_runtime::{CycleReport, MechanismManager};
use vmech_types::BlendMode;

/// Damped point mass integrated with semi-implicit Euler.
#[derive(Debug, Clone)]
pub struct PointMass {
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
    mass: f64,
    damping: f64,
}

impl PointMass {
    pub fn new(dim: usize, mass: f64, damping: f64) -> Self {
        Self {
            position: vec![0.0; dim],
            velocity: vec![0.0; dim],
            mass,
            damping,
        }
    }

    pub fn step(&mut self, force: &[f64], dt: f64) {
        for ((x, v), f) in self.position.iter_mut().zip(self.velocity.iter_mut()).zip(force) {
            let a = (f - self.damping * *v) / self.mass;
            *v += a * dt;
            *x += *v * dt;
        }
    }
}

/// State shared between the control thread and the shell.
pub struct Simulation {
    pub robot: Mutex<PointMass>,
    pub operator_force: Mutex<Vec<f64>>,
    pub mode: Mutex<BlendMode>,
    pub last_report: Mutex<CycleReport>,
}

impl Simulation {
    pub fn new(dim: usize, mode: BlendMode) -> Self {
        Self {
            robot: Mutex::new(PointMass::new(dim, 2.0, 8.0)),
            operator_force: Mutex::new(vec![0.0; dim]),
            mode: Mutex::new(mode),
            last_report: Mutex::new(CycleReport::default()),
        }
    }
}

/// Start the control thread.  It exits once `shutdown` is set or the manager
/// rejects a cycle.
pub fn spawn(
    manager: Arc<MechanismManager>,
    sim: Arc<Simulation>,
    shutdown: Arc<AtomicBool>,
    period: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("vmech-control".into())
        .spawn(move || control_loop(&manager, &sim, &shutdown, period))
}

fn control_loop(manager: &MechanismManager, sim: &Simulation, shutdown: &AtomicBool, period: Duration) {
    let dim = manager.position_dim();
    let dt = period.as_secs_f64();
    let mut position = vec![0.0; dim];
    let mut velocity = vec![0.0; dim];
    let mut guidance = vec![0.0; dim];
    let mut total = vec![0.0; dim];
    info!(dim, period_ms = period.as_millis() as u64, "control loop started");

    while !shutdown.load(Ordering::SeqCst) {
        {
            let robot = sim.robot.lock();
            position.copy_from_slice(&robot.position);
            velocity.copy_from_slice(&robot.velocity);
        }
        let mode = *sim.mode.lock();
        match manager.update(&position, &velocity, dt, mode, &mut guidance) {
            Ok(report) => *sim.last_report.lock() = report,
            Err(e) => {
                error!(error = %e, "control cycle rejected; stopping control loop");
                break;
            }
        }
        {
            let operator = sim.operator_force.lock();
            for ((t, g), o) in total.iter_mut().zip(&guidance).zip(operator.iter()) {
                *t = g + o;
            }
        }
        sim.robot.lock().step(&total, dt);
        thread::sleep(period);
    }
    info!("control loop stopped");
}
