//! Run submission

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use serde_json::{Map, Value};
use std::path::Path;

use crate::client::ApiClient;
use crate::output::{print_info, print_json, print_success, OutputFormat};

/// Kind of profile run to submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunType {
    /// Find the application's capacity under its SLO
    Calibration,
    /// Sweep interference benchmarks against each service
    Benchmark,
    /// Drive load while the cluster is observed
    Capture,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Calibration => "calibration",
            RunType::Benchmark => "benchmark",
            RunType::Capture => "capture",
        }
    }
}

/// Build the request body: the optional JSON file's fields plus `type`
pub fn build_request(kind: RunType, body: Option<&Path>) -> Result<Value> {
    let mut fields = match body {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match serde_json::from_str::<Value>(&content)
                .with_context(|| format!("{} is not valid JSON", path.display()))?
            {
                Value::Object(fields) => fields,
                _ => bail!("{} must contain a JSON object", path.display()),
            }
        }
        None => Map::new(),
    };

    fields.insert("type".to_string(), Value::String(kind.as_str().to_string()));
    Ok(Value::Object(fields))
}

/// Submit a profile run and print its id
pub async fn submit_run(
    client: &ApiClient,
    app: &str,
    kind: RunType,
    body: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let request = build_request(kind, body)?;
    let response = client.submit_run(app, &request).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Submitted {} run for {}: {}",
                kind.as_str(),
                app.cyan(),
                response.run_id.bold()
            ));
            print_info(&format!("Follow it with: profilerctl logs {}", response.run_id));
        }
    }

    Ok(())
}
