//! Ensemble CLI - runs task graph workflows against a pool of LLM backends.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use commands::{backends, run};

/// Ensemble - resilient multi-backend task orchestration
#[derive(Parser, Debug)]
#[command(name = "ensemble", author, version, about = "Ensemble - resilient multi-backend task orchestration")]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a workflow file
    ///
    /// Builds the router, memory, agents and task graph described by the
    /// file, executes every task and prints each task's outcome.
    Run {
        /// Path to the workflow TOML file
        workflow: PathBuf,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        /// Stop scheduling tasks after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Maximum number of tasks in flight (overrides the file)
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Stream task status changes to stderr while running
        #[arg(long)]
        progress: bool,
    },

    /// List backends discovered from environment credentials
    Backends {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so JSON output on stdout stays clean.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&args.log_level))
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    match args.command {
        Command::Run { workflow, json, fail_fast, max_parallel, progress } => {
            let all_succeeded = run::execute(&workflow, json, fail_fast, max_parallel, progress).await?;
            if !all_succeeded {
                std::process::exit(1);
            }
        }
        Command::Backends { json } => backends::execute(json)?,
    }

    Ok(())
}
