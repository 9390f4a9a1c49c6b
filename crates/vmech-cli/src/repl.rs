//! REPL – operator shell for the live mechanism collection.
//!
//! Supported slash-commands:
//!   /help                         – show this list
//!   /list                         – status of every mechanism
//!   /insert <model.json>          – load a saved mechanism
//!   /fit <name> <demo.json>       – fit a new mechanism from a demonstration
//!   /delete <index|name>          – fade out and remove a mechanism
//!   /retrain <index> <demo.json>  – fold a demonstration into a mechanism
//!   /save <index> <model.json>    – write a mechanism to disk
//!   /cluster <name> <demo.json>   – merge or create from a demonstration
//!   /rename <index> <name>        – rename a mechanism
//!   /mode <hard|soft|potential>   – blending mode of the control loop
//!   /collision <on|off>           – collision override
//!   /push <f1> … <fD>             – constant operator force on the robot
//!   /where                        – robot state and last cycle
//!   /quit | /exit                 – stop and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use vmech_model::Demonstration;
use vmech_runtime::{ClusterOutcome, MechanismManager, PendingOp};
use vmech_types::{BlendMode, MechanismError};

use crate::sim::Simulation;

/// Mechanism designated by position or by name.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Index(usize),
    Name(String),
}

/// One parsed shell command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    List,
    Insert(PathBuf),
    Fit { name: String, demo: PathBuf },
    Delete(Target),
    Retrain { index: usize, demo: PathBuf },
    Save { index: usize, path: PathBuf },
    Cluster { name: String, demo: PathBuf },
    Rename { index: usize, name: String },
    Mode(BlendMode),
    Collision(bool),
    Push(Vec<f64>),
    Where,
    Quit,
}

/// Parse one input line.  The error is the message shown to the operator.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".into());
    };
    let args: Vec<&str> = words.collect();

    let arity = |n: usize, usage: &str| {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("usage: {head} {usage}"))
        }
    };
    let index = |raw: &str| {
        raw.parse::<usize>()
            .map_err(|_| format!("'{raw}' is not a mechanism index"))
    };

    match head {
        "/help" => Ok(Command::Help),
        "/list" => Ok(Command::List),
        "/where" => Ok(Command::Where),
        "/quit" | "/exit" => Ok(Command::Quit),
        "/insert" => {
            arity(1, "<model.json>")?;
            Ok(Command::Insert(args[0].into()))
        }
        "/fit" => {
            arity(2, "<name> <demo.json>")?;
            Ok(Command::Fit {
                name: args[0].to_string(),
                demo: args[1].into(),
            })
        }
        "/delete" => {
            arity(1, "<index|name>")?;
            Ok(Command::Delete(match args[0].parse::<usize>() {
                Ok(i) => Target::Index(i),
                Err(_) => Target::Name(args[0].to_string()),
            }))
        }
        "/retrain" => {
            arity(2, "<index> <demo.json>")?;
            Ok(Command::Retrain {
                index: index(args[0])?,
                demo: args[1].into(),
            })
        }
        "/save" => {
            arity(2, "<index> <model.json>")?;
            Ok(Command::Save {
                index: index(args[0])?,
                path: args[1].into(),
            })
        }
        "/cluster" => {
            arity(2, "<name> <demo.json>")?;
            Ok(Command::Cluster {
                name: args[0].to_string(),
                demo: args[1].into(),
            })
        }
        "/rename" => {
            arity(2, "<index> <name>")?;
            Ok(Command::Rename {
                index: index(args[0])?,
                name: args[1].to_string(),
            })
        }
        "/mode" => {
            arity(1, "<hard|soft|potential>")?;
            args[0].parse().map(Command::Mode).map_err(|e: MechanismError| e.to_string())
        }
        "/collision" => {
            arity(1, "<on|off>")?;
            match args[0] {
                "on" => Ok(Command::Collision(true)),
                "off" => Ok(Command::Collision(false)),
                other => Err(format!("expected on or off, got '{other}'")),
            }
        }
        "/push" => args
            .iter()
            .map(|a| a.parse::<f64>().map_err(|_| format!("'{a}' is not a number")))
            .collect::<Result<Vec<_>, _>>()
            .map(Command::Push),
        other => Err(format!("unknown command '{other}'")),
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(manager: &MechanismManager, sim: &Simulation, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "vmech>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(cmd) => execute(cmd, manager, sim),
            Err(msg) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                msg,
                "/help".bold()
            ),
        }
    }
}

fn execute(cmd: Command, manager: &MechanismManager, sim: &Simulation) {
    match cmd {
        Command::Help => cmd_help(),
        Command::List => cmd_list(manager),
        Command::Where => cmd_where(manager, sim),
        Command::Insert(path) => report(manager.insert_from_file(path), |h| format!("inserted as {h}")),
        Command::Fit { name, demo } => {
            if let Some(demo) = load_demo(&demo) {
                report(manager.insert_from_data(&name, demo), |h| format!("fitted '{name}' as {h}"));
            }
        }
        Command::Delete(target) => {
            let op = match &target {
                Target::Index(i) => manager.delete(*i),
                Target::Name(n) => manager.delete_by_name(n),
            };
            report(op, |()| "removed".to_string());
        }
        Command::Retrain { index, demo } => {
            if let Some(demo) = load_demo(&demo) {
                report(manager.retrain(index, demo), |()| format!("mechanism {index} retrained"));
            }
        }
        Command::Save { index, path } => {
            report(manager.save(index, path), |p| format!("saved to {}", p.display()));
        }
        Command::Cluster { name, demo } => {
            if let Some(demo) = load_demo(&demo) {
                report(manager.cluster(&name, demo), |outcome| match outcome {
                    ClusterOutcome::Merged { handle, responsibility } => {
                        format!("merged into {handle} (responsibility {responsibility:.3})")
                    }
                    ClusterOutcome::Created { handle, best_responsibility } => format!(
                        "created '{name}' as {handle} (best responsibility {best_responsibility:.3})"
                    ),
                });
            }
        }
        Command::Rename { index, name } => {
            report(manager.rename(index, &name), |()| format!("mechanism {index} is now '{name}'"));
        }
        Command::Mode(mode) => {
            *sim.mode.lock() = mode;
            println!("  Blending mode: {}", mode.to_string().bold());
        }
        Command::Collision(active) => {
            manager.set_collision(active);
            let state = if active { "asserted".red() } else { "released".green() };
            println!("  Collision override {state}");
        }
        Command::Push(force) => {
            let dim = manager.position_dim();
            if force.len() != dim {
                println!("{} expected {} force components", "Error:".red(), dim);
                return;
            }
            *sim.operator_force.lock() = force;
            println!("  Operator force set");
        }
        Command::Quit => {}
    }
}

/// Block on a lifecycle operation and print its outcome.
fn report<T>(submitted: Result<PendingOp<T>, MechanismError>, describe: impl FnOnce(T) -> String) {
    let outcome = submitted.and_then(|op| {
        print!("  {} … ", op.kind().dimmed());
        io::stdout().flush().ok();
        op.wait()
    });
    match outcome {
        Ok(value) => println!("{} {}", "✓".green().bold(), describe(value)),
        Err(e) => println!("{} {}", "✗".red().bold(), e),
    }
}

fn load_demo(path: &Path) -> Option<Demonstration> {
    match Demonstration::load(path) {
        Ok(demo) => Some(demo),
        Err(e) => {
            println!("{}: {}", "Cannot read demonstration".red(), e);
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "vmech Commands".bold().underline());
    let rows = [
        ("/list", "status of every mechanism"),
        ("/insert <model.json>", "load a saved mechanism"),
        ("/fit <name> <demo.json>", "fit a mechanism from a demonstration"),
        ("/delete <index|name>", "fade out and remove a mechanism"),
        ("/retrain <index> <demo.json>", "fold a demonstration into a mechanism"),
        ("/save <index> <model.json>", "write a mechanism to disk"),
        ("/cluster <name> <demo.json>", "merge into the best match or create"),
        ("/rename <index> <name>", "rename a mechanism"),
        ("/mode <hard|soft|potential>", "blending mode"),
        ("/collision <on|off>", "collision override"),
        ("/push <f1> … <fD>", "operator force on the simulated robot"),
        ("/where", "robot state and last cycle"),
        ("/quit  /exit", "exit the shell"),
    ];
    for (cmd, what) in rows {
        println!("  {:<30} – {}", cmd.bold().cyan(), what);
    }
    println!();
}

fn cmd_list(manager: &MechanismManager) {
    let snapshot = manager.snapshot();
    if snapshot.is_empty() {
        println!("  No mechanisms loaded.");
        return;
    }
    println!(
        "  {:>3}  {:<16} {:>8} {:>8} {:>6} {:>6}  {}",
        "#", "name", "phase", "scale", "resp", "fade", "state"
    );
    for s in snapshot {
        let state = if s.retiring {
            "retiring".yellow()
        } else if s.on_guide {
            "on guide".green()
        } else {
            "manual".dimmed()
        };
        println!(
            "  {:>3}  {:<16} {:>8.3} {:>8.3} {:>6.2} {:>6.2}  {}",
            s.index,
            s.name.bold(),
            s.phase,
            s.scale,
            s.responsibility,
            s.fade,
            state
        );
    }
}

fn cmd_where(manager: &MechanismManager, sim: &Simulation) {
    let robot = sim.robot.lock().clone();
    let report = *sim.last_report.lock();
    println!("  Position   : {}", fmt_vec(&robot.position));
    println!("  Velocity   : {}", fmt_vec(&robot.velocity));
    println!("  Guidance   : {}", fmt_vec(&manager.previous_force()));
    println!(
        "  Mechanisms : {} ({} on guide, {} stale cycles)",
        report.mechanisms,
        report.on_guide,
        manager.stale_cycles()
    );
    if manager.collision() {
        println!("  {}", "Collision override asserted".red());
    }
}

fn fmt_vec(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{v:.3}")).collect();
    format!("[{}]", parts.join(", "))
}
