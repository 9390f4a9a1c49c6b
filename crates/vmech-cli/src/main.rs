//! `vmech-cli` – operator shell for the virtual-mechanism manager
//!
//! This binary:
//!
//! 1. Loads `~/.vmech/config.toml` (defaults when absent).
//! 2. Starts a [`MechanismManager`] and a control thread that drives a
//!    simulated point-mass robot with the blended guidance force.
//! 3. Drops the operator into an **interactive REPL** with slash-commands
//!    for inserting, deleting, retraining, saving and clustering mechanisms.
//! 4. Intercepts **Ctrl-C** to stop the control loop and the lifecycle
//!    worker before exiting.

mod repl;
mod sim;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use vmech_runtime::{ManagerConfig, MechanismManager, config, init_tracing};

const CONTROL_PERIOD: Duration = Duration::from_millis(2);

fn main() -> ExitCode {
    let _telemetry = init_tracing("vmech");

    print_banner();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping control loop …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            println!(
                "  No config at {}; using defaults.",
                config::config_path().display().to_string().dimmed()
            );
            ManagerConfig::default()
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            ManagerConfig::default()
        }
    };

    let manager = match MechanismManager::new(cfg.clone()) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            eprintln!("{}: {}", "Cannot start mechanism manager".red(), e);
            return ExitCode::FAILURE;
        }
    };
    let sim = Arc::new(sim::Simulation::new(cfg.position_dim, cfg.blend_mode));
    let control = match sim::spawn(
        Arc::clone(&manager),
        Arc::clone(&sim),
        Arc::clone(&shutdown),
        CONTROL_PERIOD,
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{}: {}", "Cannot start control loop".red(), e);
            return ExitCode::FAILURE;
        }
    };

    println!(
        "  {}-dimensional robot, {} blending, control period {} ms",
        cfg.position_dim,
        cfg.blend_mode.to_string().bold(),
        CONTROL_PERIOD.as_millis()
    );
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(&manager, &sim, Arc::clone(&shutdown));

    shutdown.store(true, Ordering::SeqCst);
    if control.join().is_err() {
        warn!("control thread panicked");
    }
    manager.stop();
    ExitCode::SUCCESS
}

fn print_banner() {
    println!();
    println!("{}", r#"                        __  "#.bold().cyan());
    println!("{}", r#" _  ______ ___  ___ ___/ /  "#.bold().cyan());
    println!("{}", r#"| |/ / __ `__ \/ -_) __/ _ \ "#.bold().cyan());
    println!("{}", r#"|___/_/ /_/ /_/\__/\__/_//_/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "vmech".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Virtual-mechanism guidance shell");
    println!();
}
