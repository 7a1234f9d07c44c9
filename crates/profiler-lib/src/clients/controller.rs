//! Client for the benchmark controller load generator

use super::http::{endpoint, HttpClient};
use super::poll::{poll_until, PollConfig, PollStatus};
use super::BenchmarkController;
use crate::error::{ClientError, ClientResult};
use crate::models::{IntensityArg, Slo};
use crate::runlog::RunLog;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status reported while a controller stage is still executing
const STATUS_RUNNING: &str = "running";

#[derive(Debug, Clone)]
pub struct ControllerClientConfig {
    pub calibration: PollConfig,
    pub benchmark: PollConfig,
}

impl Default for ControllerClientConfig {
    fn default() -> Self {
        Self {
            calibration: PollConfig::from_secs(30, 240 * 60),
            benchmark: PollConfig::from_secs(60, 360 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerCalibrationRequest {
    pub stage_id: String,
    pub app_name: String,
    pub load_tester_name: String,
    pub command: String,
    pub args: Vec<String>,
    pub intensity_args: Vec<IntensityArg>,
    pub slo: Slo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerBenchmarkRequest {
    pub stage_id: String,
    pub app_name: String,
    pub load_tester_name: String,
    pub command: String,
    pub args: Vec<String>,
    pub intensity_args: Vec<IntensityArg>,
    pub app_intensity: f64,
    pub benchmark: String,
    pub benchmark_intensity: f64,
    pub slo: Slo,
}

/// One load run executed by the controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerRun {
    /// Intensity arguments the run was executed with, by argument name
    #[serde(default)]
    pub intensity_args: HashMap<String, f64>,
    #[serde(default)]
    pub qos_value: f64,
    #[serde(default)]
    pub failures: f64,
}

/// Status document of a calibration or benchmark stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub results: Vec<ControllerRun>,
    #[serde(default)]
    pub final_result: Option<ControllerRun>,
}

/// HTTP client for benchmark controllers; the url is the load tester's service url
pub struct BenchmarkControllerClient {
    config: ControllerClientConfig,
    http: HttpClient,
}

impl BenchmarkControllerClient {
    pub fn new(config: ControllerClientConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    async fn run_stage<B: Serialize + Sync>(
        &self,
        url: &str,
        path: &str,
        stage_id: &str,
        body: &B,
        poll: PollConfig,
        log: &RunLog,
    ) -> ClientResult<ControllerResponse> {
        self.http
            .submit(Method::POST, endpoint(url, path)?, Some(body))
            .await?;
        log.info(format!("Submitted controller stage {} to {}", stage_id, url));

        let http = &self.http;
        let status_url = endpoint(url, &format!("{}/{}", path, stage_id))?;
        let what = format!("controller stage {}", stage_id);
        let response = poll_until("benchmark_controller", &what, poll, move || {
            let status_url = status_url.clone();
            async move {
                let response: ControllerResponse = http.poll_json(status_url).await?;
                if !response.error.is_empty() {
                    return Err(ClientError::Remote(response.error));
                }
                if response.status == STATUS_RUNNING {
                    Ok(PollStatus::Pending)
                } else {
                    Ok(PollStatus::Done(response))
                }
            }
        })
        .await?;

        log.info(format!(
            "Controller stage {} finished with status {} and {} runs",
            stage_id,
            response.status,
            response.results.len()
        ));
        Ok(response)
    }
}

#[async_trait]
impl BenchmarkController for BenchmarkControllerClient {
    async fn run_calibration(
        &self,
        url: &str,
        request: &ControllerCalibrationRequest,
        log: &RunLog,
    ) -> ClientResult<ControllerResponse> {
        self.run_stage(
            url,
            "/api/calibrate",
            &request.stage_id,
            request,
            self.config.calibration,
            log,
        )
        .await
    }

    async fn run_benchmark(
        &self,
        url: &str,
        request: &ControllerBenchmarkRequest,
        log: &RunLog,
    ) -> ClientResult<ControllerResponse> {
        self.run_stage(
            url,
            "/api/benchmarks",
            &request.stage_id,
            request,
            self.config.benchmark,
            log,
        )
        .await
    }
}
