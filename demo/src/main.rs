//! Tripwire agent guard: reference scenario CLI
//!
//! Runs one or all of the reference scenarios. Each scenario wires a real
//! supervisor (breakers, loop detector, governor, idempotency and checkpoint
//! stores) to a simulated executor and prints the decisions it makes.
//!
//! Usage:
//!   cargo run -p tripwire-demo -- run-all
//!   cargo run -p tripwire-demo -- crash-loop
//!   cargo run -p tripwire-demo -- --config tripwire.toml flaky-dependency

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tripwire_contracts::error::TripwireResult;
use tripwire_supervisor::{
    scenarios::{self, budget, crash_loop, delegation, flaky_dependency},
    TripwireConfig,
};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Tripwire: resilience and loop prevention for autonomous agents.
#[derive(Parser)]
#[command(
    name = "tripwire-demo",
    about = "Tripwire agent guard reference scenarios",
    long_about = "Runs tripwire reference scenarios showing loop halts, circuit breaking,\n\
                  admission control, and delegation cycle detection."
)]
struct Cli {
    /// TOML configuration file. Defaults apply to anything it leaves out.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every scenario in sequence.
    RunAll,
    /// Scenario 1: a restart that never converges is halted.
    CrashLoop,
    /// Scenario 2: a failing dependency opens, probes, and closes its breaker.
    FlakyDependency,
    /// Scenario 3: request cap, input flooding, unauthorized kinds.
    Budget,
    /// Scenario 4: circular and too-deep agent delegation.
    Delegation,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Set RUST_LOG=debug to see every pipeline step.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    print_banner();

    let result = run(cli.command, &config).await;

    match result {
        Ok(()) => {
            println!("All selected scenarios completed.");
        }
        Err(e) => {
            eprintln!("Demo error [{}]: {e}", e.code());
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> TripwireResult<TripwireConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            TripwireConfig::from_file(path)
        }
        None => Ok(TripwireConfig::default()),
    }
}

// ── Scenario dispatch ─────────────────────────────────────────────────────────

async fn run(command: Command, config: &TripwireConfig) -> TripwireResult<()> {
    match command {
        Command::RunAll => scenarios::run_all(config).await,
        Command::CrashLoop => crash_loop::run_scenario(config).await.map(|_| ()),
        Command::FlakyDependency => flaky_dependency::run_scenario(config).await.map(|_| ()),
        Command::Budget => budget::run_scenario(config).await.map(|_| ()),
        Command::Delegation => delegation::run_scenario(config).await.map(|_| ()),
    }
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Tripwire: Agent Resilience and Loop Prevention");
    println!("Reference Scenarios");
    println!("===============================================");
    println!();
    println!("Pipeline per action:");
    println!("  [1] Gates: suspended autonomy, halted / cancelled / busy workflow");
    println!("  [2] Fingerprint the action (kind, target, canonical parameters)");
    println!("  [3] Governor: validation, allow-list, request and cost budgets");
    println!("  [4] Idempotency: completed fingerprints replay their result");
    println!("  [5] Approval gate for approval-required kinds");
    println!("  [6] Iteration budget, then the dependency's circuit breaker");
    println!("  [7] Execute with a timeout; record history, checkpoint on success");
    println!("  [8] Repetition and state-revisit checks; halt and escalate on a loop");
    println!();
}
