//! Workload profiler CLI
//!
//! Submits profile runs and follows their state and logs through the
//! profiler's HTTP ingress.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{runs, submit};
use std::path::PathBuf;

/// Workload profiler CLI
#[derive(Parser)]
#[command(name = "profilerctl")]
#[command(author, version, about = "CLI for the workload profiler", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via PROFILER_API_URL env var)
    #[arg(long, env = "PROFILER_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a profile run for an application
    Submit {
        /// Application name
        app: String,

        /// Kind of run
        #[arg(long = "type", value_enum)]
        kind: submit::RunType,

        /// JSON file with extra request fields (step, benchmarks, loadTime, ...)
        #[arg(long)]
        body: Option<PathBuf>,
    },

    /// Show the status of a run
    Status {
        /// Run ID
        run_id: String,
    },

    /// Show the log of a run
    Logs {
        /// Run ID
        run_id: String,
    },

    /// List runs
    List {
        /// Filter by state (queued, reserving, running, finished, failed)
        #[arg(long)]
        state: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let format = cli.format.or(config.default_format).unwrap_or_default();

    // Initialize client
    let client = client::ApiClient::new(&config.api_url(cli.api_url))?;

    // Execute command
    match cli.command {
        Commands::Submit { app, kind, body } => {
            submit::submit_run(&client, &app, kind, body.as_deref(), format).await?;
        }
        Commands::Status { run_id } => {
            runs::show_status(&client, &run_id, format).await?;
        }
        Commands::Logs { run_id } => {
            runs::show_logs(&client, &run_id, format).await?;
        }
        Commands::List { state } => {
            runs::list_runs(&client, state.as_deref(), format).await?;
        }
    }

    Ok(())
}
