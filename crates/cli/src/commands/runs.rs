//! Run status, logs and listing

use anyhow::Result;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use crate::client::{ApiClient, RunSummary};
use crate::output::{
    color_log_line, color_state, format_timestamp, print_error, print_json, print_warning,
    OutputFormat,
};

/// Row for the runs table
#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "Run ID")]
    run_id: String,
    #[tabled(rename = "App")]
    app: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Deployment")]
    deployment: String,
}

impl From<&RunSummary> for RunRow {
    fn from(run: &RunSummary) -> Self {
        Self {
            run_id: run.run_id.clone(),
            app: run.app_name.clone(),
            kind: run.kind.clone(),
            state: color_state(&run.state),
            created: format_timestamp(&run.created),
            deployment: run.deployment_id.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Show the status of one run
pub async fn show_status(client: &ApiClient, run_id: &str, format: OutputFormat) -> Result<()> {
    let run = client.get_run(run_id).await?;

    match format {
        OutputFormat::Json => print_json(&run)?,
        OutputFormat::Table => {
            println!("{}", "Profile Run".bold());
            println!("{}", "=".repeat(50));
            println!("Run ID:      {}", run.run_id.cyan());
            println!("App:         {}", run.app_name);
            println!("Type:        {}", run.kind);
            println!("State:       {}", color_state(&run.state));
            println!("Created:     {}", format_timestamp(&run.created));
            if let Some(deployment) = &run.deployment_id {
                println!("Deployment:  {}", deployment);
            }
            if let Some(error) = &run.error {
                println!();
                print_error(error);
            }
        }
    }

    Ok(())
}

/// Show the log lines of one run
pub async fn show_logs(client: &ApiClient, run_id: &str, format: OutputFormat) -> Result<()> {
    let logs = client.get_logs(run_id).await?;

    match format {
        OutputFormat::Json => print_json(&logs)?,
        OutputFormat::Table => {
            println!(
                "{} {} ({})",
                "Run".bold(),
                run_id.cyan(),
                color_state(&logs.state)
            );
            if let Some(deployment) = &logs.deployment {
                println!("Deployment: {}", deployment);
            }
            println!("{}", "-".repeat(50));

            if logs.data.is_empty() {
                print_warning("No log lines yet");
            }
            for line in &logs.data {
                println!("{}", color_log_line(line));
            }
            if logs.error {
                print_error("Run failed");
            }
        }
    }

    Ok(())
}

/// List runs, optionally filtered by state
pub async fn list_runs(
    client: &ApiClient,
    state: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let runs = client.list_runs(state).await?;

    match format {
        OutputFormat::Json => print_json(&runs)?,
        OutputFormat::Table => {
            if runs.is_empty() {
                print_warning("No runs found");
                return Ok(());
            }

            let rows: Vec<RunRow> = runs.iter().map(RunRow::from).collect();
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
            println!("\nTotal: {} runs", runs.len());
        }
    }

    Ok(())
}
