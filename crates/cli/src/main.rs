//! Ratchet CLI, the main entry point.
//!
//! Commands:
//! - `serve`          Run the task dispatcher, gate reaper and HTTP gateway
//! - `run-task <id>`  Run one task to completion and print its outcome

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ratchet_core::CancellationToken;
use tracing::info;

mod runtime;

#[derive(Parser, Debug)]
#[command(name = "ratchet", about = "Ratchet agent execution runtime", version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Config file (defaults to ~/.ratchet/config.toml)
    #[arg(short, long, global = true, env = "RATCHET_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the dispatcher and gateway
    Serve {
        /// Maximum number of tasks running at once
        #[arg(long, default_value_t = 4)]
        max_concurrent: usize,
    },

    /// Run a single task by id
    RunTask {
        /// Task id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    let config = runtime::load_config(cli.config.as_deref())?;
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Serve { max_concurrent } => {
            let runtime = runtime::Runtime::build(config, max_concurrent).await?;
            runtime.serve(cancel).await?;
        }
        Commands::RunTask { id } => {
            let runtime = runtime::Runtime::build(config, 1).await?;
            let outcome = runtime.run_task(&id, &cancel).await?;
            let report = serde_json::json!({
                "task_id": id,
                "status": outcome.status.as_str(),
                "result": outcome.result,
                "error": outcome.error,
                "iterations": outcome.iterations,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
