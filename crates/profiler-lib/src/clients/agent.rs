//! Client for the per-node benchmark agents

use super::http::{endpoint, HttpClient};
use super::poll::{poll_until, PollConfig, PollStatus};
use super::BenchmarkAgent;
use crate::error::{ClientError, ClientResult};
use crate::models::{Benchmark, BenchmarkAgentConfig};
use crate::runlog::RunLog;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status reported by an agent while the benchmark container starts
const STATUS_CREATING: &str = "CREATING";

#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    pub creation: PollConfig,
    /// Retries of a delete after a transport error
    pub delete_retries: u32,
    pub delete_retry_delay: Duration,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            creation: PollConfig::from_secs(10, 15 * 60),
            delete_retries: 5,
            delete_retry_delay: Duration::from_secs(3),
        }
    }
}

/// Body posted to an agent to start a benchmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkRequest {
    pub name: String,
    pub image: String,
    pub intensity: f64,
    pub resource_type: String,
    pub intensity_metric: String,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub host_config: serde_json::Value,
}

impl BenchmarkRequest {
    pub fn new(
        name: impl Into<String>,
        benchmark: &Benchmark,
        config: &BenchmarkAgentConfig,
        intensity: f64,
    ) -> Self {
        Self {
            name: name.into(),
            image: benchmark.image.clone(),
            intensity,
            resource_type: benchmark.resource_type.clone(),
            intensity_metric: benchmark.intensity_metric.clone(),
            args: config.args.clone(),
            host_config: config.host_config.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AgentStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: bool,
    #[serde(default)]
    data: Option<String>,
}

/// HTTP client for benchmark agents; agent urls come from the deployer
pub struct BenchmarkAgentClient {
    config: AgentClientConfig,
    http: HttpClient,
}

impl BenchmarkAgentClient {
    pub fn new(config: AgentClientConfig, http: HttpClient) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl BenchmarkAgent for BenchmarkAgentClient {
    async fn create_benchmark(
        &self,
        agent_url: &str,
        request: &BenchmarkRequest,
        log: &RunLog,
    ) -> ClientResult<()> {
        log.info(format!(
            "Starting benchmark {} at intensity {} on {}",
            request.name, request.intensity, agent_url
        ));
        self.http
            .submit(
                Method::POST,
                endpoint(agent_url, "/benchmarks")?,
                Some(request),
            )
            .await?;

        let http = &self.http;
        let url = endpoint(agent_url, &format!("/benchmarks/{}", request.name))?;
        let what = format!("benchmark {}", request.name);
        let status = poll_until("benchmark_agent", &what, self.config.creation, move || {
            let url = url.clone();
            async move {
                let status: AgentStatus = http.poll_json(url).await?;
                if status.error {
                    return Err(ClientError::Remote(
                        status
                            .data
                            .unwrap_or_else(|| "benchmark failed to start".to_string()),
                    ));
                }
                if status.status == STATUS_CREATING {
                    Ok(PollStatus::Pending)
                } else {
                    Ok(PollStatus::Done(status.status))
                }
            }
        })
        .await?;

        log.info(format!("Benchmark {} is {}", request.name, status));
        Ok(())
    }

    async fn delete_benchmark(&self, agent_url: &str, name: &str, log: &RunLog) -> ClientResult<()> {
        let url = endpoint(agent_url, &format!("/benchmarks/{}", name))?;
        let mut retries = 0;

        loop {
            match self.http.send(Method::DELETE, url.clone()).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || status == StatusCode::NOT_FOUND {
                        log.info(format!("Deleted benchmark {} on {}", name, agent_url));
                        return Ok(());
                    }
                    return Err(super::http::unexpected_status(url.to_string(), response).await);
                }
                Err(e) if retries < self.config.delete_retries => {
                    retries += 1;
                    log.warn(format!(
                        "Unable to delete benchmark {} ({}), retry {} of {}",
                        name, e, retries, self.config.delete_retries
                    ));
                    tokio::time::sleep(self.config.delete_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
