//! switchboard CLI: run a simulated call-center shift.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use switchboard::config::Config;
use switchboard::roster::Roster;
use switchboard::telemetry::init_telemetry;
use switchboard::{Dispatcher, EventKind, SimulatedHandler};

#[derive(Parser)]
#[command(name = "switchboard", about = "Call-center dispatch simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch a batch of simulated calls and print the audit log
    Run {
        /// Number of calls to submit
        #[arg(long, default_value_t = 100)]
        calls: usize,
        /// TOML roster of workers (defaults to one director, one supervisor, two operators)
        #[arg(long)]
        roster: Option<PathBuf>,
        /// Fraction of simulated calls that fail and are retried
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,
        /// Print every event as a JSON line instead of "<worker>, <call>" completions
        #[arg(long)]
        json: bool,
    },
    /// Validate a roster file and list its workers
    Roster {
        /// Path to the roster TOML file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            calls,
            roster,
            failure_rate,
            json,
        } => cmd_run(calls, roster, failure_rate, json).await,
        Command::Roster { path } => cmd_roster(path),
    }
}

async fn cmd_run(
    calls: usize,
    roster: Option<PathBuf>,
    failure_rate: f64,
    json: bool,
) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let guard = init_telemetry(config.telemetry_config("switchboard"))?;

    let roster = match roster {
        Some(path) => Roster::load(&path)?,
        None => Roster::reference(),
    };
    if roster.is_empty() {
        anyhow::bail!("roster has no workers; calls would never be dispatched");
    }

    let handler = SimulatedHandler::new(config.handle_min, config.handle_max)
        .failure_rate(failure_rate);
    let dispatcher = Dispatcher::new(config.dispatch_config(), Arc::new(handler));
    roster.register(&dispatcher)?;

    dispatcher.submit_batch(calls).await?;

    for event in dispatcher.snapshot_events() {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else if event.kind == EventKind::Completed {
            println!("{}, {}", event.worker.id, event.call);
        }
    }

    guard.force_flush();
    Ok(())
}

fn cmd_roster(path: PathBuf) -> anyhow::Result<()> {
    let roster = Roster::load(&path)?;

    if roster.is_empty() {
        println!("No workers in {}.", path.display());
        return Ok(());
    }

    println!("{:<8}  {:<12}  PRIORITY", "ID", "ROLE");
    println!("{}", "-".repeat(32));
    for worker in roster.workers() {
        println!(
            "{:<8}  {:<12}  {}",
            worker.id,
            worker.role,
            worker.priority_class()
        );
    }
    println!("\n{} worker(s)", roster.workers().len());
    Ok(())
}
