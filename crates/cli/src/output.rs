//! Output formatting utilities

use chrono::{DateTime, Local};
use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a job state
pub fn color_state(state: &str) -> String {
    match state.to_uppercase().as_str() {
        "QUEUED" | "RESERVING" => state.yellow().to_string(),
        "RUNNING" => state.blue().to_string(),
        "FINISHED" => state.green().to_string(),
        "FAILED" => state.red().to_string(),
        _ => state.to_string(),
    }
}

/// Color a run log line by its level prefix
pub fn color_log_line(line: &str) -> String {
    if line.starts_with("ERROR") {
        line.red().to_string()
    } else if line.starts_with("WARN") {
        line.yellow().to_string()
    } else {
        line.to_string()
    }
}

/// Format an RFC 3339 timestamp in local time
pub fn format_timestamp(ts: &str) -> String {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|_| ts.to_string())
}
