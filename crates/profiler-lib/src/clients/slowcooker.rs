//! Client for the slow-cooker load generator

use super::http::{endpoint, HttpClient};
use super::poll::{poll_until, PollConfig, PollStatus};
use super::SlowCooker;
use crate::error::{ClientError, ClientResult};
use crate::models::{Percentile, SlowCookerAppLoad, SlowCookerCalibrate, Slo};
use crate::runlog::RunLog;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

const STATE_RUNNING: &str = "running";

/// Latency percentiles of one slow-cooker run, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    #[serde(default)]
    pub p50: f64,
    #[serde(default)]
    pub p95: f64,
    #[serde(default)]
    pub p99: f64,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
}

impl LatencyPercentiles {
    pub fn get(&self, percentile: Percentile) -> f64 {
        match percentile {
            Percentile::P50 => self.p50,
            Percentile::P95 => self.p95,
            Percentile::P99 => self.p99,
            Percentile::Min => self.min,
            Percentile::Max => self.max,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowCookerRun {
    #[serde(default)]
    pub concurrency: f64,
    #[serde(default)]
    pub qps: f64,
    #[serde(default)]
    pub failures: f64,
    #[serde(default)]
    pub latency: LatencyPercentiles,
}

/// Status document of a slow-cooker calibration or benchmark
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowCookerResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub results: Vec<SlowCookerRun>,
    #[serde(default)]
    pub final_concurrency: Option<f64>,
    #[serde(default)]
    pub final_latency_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowCookerCalibrationRequest {
    pub app_load: SlowCookerAppLoad,
    pub calibrate: SlowCookerCalibrate,
    pub slo: Slo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowCookerBenchmarkRequest {
    pub app_load: SlowCookerAppLoad,
    pub app_intensity: f64,
    pub benchmark_intensity: f64,
    pub load_time: String,
}

#[derive(Debug, Clone)]
pub struct SlowCookerClientConfig {
    pub poll: PollConfig,
}

impl Default for SlowCookerClientConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::from_secs(30, 90 * 60),
        }
    }
}

pub struct SlowCookerClient {
    config: SlowCookerClientConfig,
    http: HttpClient,
}

impl SlowCookerClient {
    pub fn new(config: SlowCookerClientConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    async fn run_stage<B: Serialize + Sync>(
        &self,
        url: &str,
        path: &str,
        body: &B,
        log: &RunLog,
    ) -> ClientResult<SlowCookerResponse> {
        let stage_url = endpoint(url, path)?;
        self.http
            .submit(Method::POST, stage_url.clone(), Some(body))
            .await?;
        log.info(format!("Submitted slow-cooker stage {}", stage_url));

        let http = &self.http;
        let response = poll_until("slow_cooker", path, self.config.poll, move || {
            let stage_url = stage_url.clone();
            async move {
                let response: SlowCookerResponse = http.poll_json(stage_url).await?;
                if !response.error.is_empty() {
                    return Err(ClientError::Remote(response.error));
                }
                if response.state == STATE_RUNNING {
                    Ok(PollStatus::Pending)
                } else {
                    Ok(PollStatus::Done(response))
                }
            }
        })
        .await?;

        log.info(format!(
            "Slow-cooker stage {} finished with {} runs",
            response.id,
            response.results.len()
        ));
        Ok(response)
    }
}

#[async_trait]
impl SlowCooker for SlowCookerClient {
    async fn run_calibration(
        &self,
        url: &str,
        run_id: &str,
        request: &SlowCookerCalibrationRequest,
        log: &RunLog,
    ) -> ClientResult<SlowCookerResponse> {
        self.run_stage(url, &format!("/slowcooker/calibrate/{}", run_id), request, log)
            .await
    }

    async fn run_benchmark(
        &self,
        url: &str,
        run_id: &str,
        request: &SlowCookerBenchmarkRequest,
        log: &RunLog,
    ) -> ClientResult<SlowCookerResponse> {
        self.run_stage(url, &format!("/slowcooker/benchmark/{}", run_id), request, log)
            .await
    }
}
