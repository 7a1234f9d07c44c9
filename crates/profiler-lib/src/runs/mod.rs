//! Profile runs
//!
//! A run is the work a job performs once it holds a cluster: a calibration
//! of the application's capacity, an interference sweep against that
//! capacity, or a single capture load test. Runs are built from a
//! [`ProfileRequest`] by the [`RunFactory`] and executed by a worker with a
//! [`RunContext`] holding every collaborator.

pub mod benchmark;
pub mod calibration;
pub mod capture;

pub use benchmark::BenchmarkRun;
pub use calibration::CalibrationRun;
pub use capture::CaptureRun;

use crate::clients::{
    BenchmarkAgent, BenchmarkController, ControllerBenchmarkRequest, Deployer, DemoUi, SlowCooker,
    SlowCookerBenchmarkRequest,
};
use crate::error::{ClientError, RunError, StoreError};
use crate::models::{
    ApplicationConfig, BenchmarkControllerSpec, BenchmarkSample, LoadTester, NodeShape,
    SlowCookerSpec,
};
use crate::runlog::RunLog;
use crate::store::{ConfigStore, MetricKind, MetricsStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Prefix of the benchmark agent services in a deployment
pub const BENCHMARK_AGENT_PREFIX: &str = "benchmark-agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Calibration,
    Benchmark,
    Capture,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Calibration => "calibration",
            RunKind::Benchmark => "benchmark",
            RunKind::Capture => "capture",
        }
    }
}

/// Work executed against a reserved deployment
#[async_trait]
pub trait ProfileRun: Send + Sync {
    fn kind(&self) -> RunKind;

    /// Run against `deployment_id`; the run id is `log.run_id()`
    async fn run(&self, ctx: &RunContext, deployment_id: &str, log: &RunLog)
        -> Result<(), RunError>;
}

/// Collaborators shared by every run
pub struct RunContext {
    pub deployer: Arc<dyn Deployer>,
    pub agent: Arc<dyn BenchmarkAgent>,
    pub controller: Arc<dyn BenchmarkController>,
    pub slow_cooker: Arc<dyn SlowCooker>,
    pub demo_ui: Arc<dyn DemoUi>,
    pub metrics: Arc<dyn MetricsStore>,
    /// When false, result documents are logged but not stored
    pub write_results: bool,
}

impl RunContext {
    /// Store a result document unless writes are disabled
    pub async fn write_result<T: Serialize + Sync>(
        &self,
        kind: MetricKind,
        document: &T,
        log: &RunLog,
    ) -> Result<(), RunError> {
        let document = serde_json::to_value(document).map_err(StoreError::from)?;
        if !self.write_results {
            log.info(format!("Result writes are disabled, skipping {} document", kind));
            return Ok(());
        }
        self.metrics.write_metrics(kind, document).await?;
        log.info(format!("Stored {} document", kind));
        Ok(())
    }
}

/// Run submission body, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProfileRequest {
    Calibration(CalibrationRequest),
    Benchmark(SweepRequest),
    Capture(CaptureRequest),
}

impl ProfileRequest {
    pub fn kind(&self) -> RunKind {
        match self {
            ProfileRequest::Calibration(_) => RunKind::Calibration,
            ProfileRequest::Benchmark(_) => RunKind::Benchmark,
            ProfileRequest::Capture(_) => RunKind::Capture,
        }
    }

    pub fn node_shape(&self) -> &NodeShape {
        match self {
            ProfileRequest::Calibration(r) => &r.node_shape,
            ProfileRequest::Benchmark(r) => &r.node_shape,
            ProfileRequest::Capture(r) => &r.node_shape,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationRequest {
    #[serde(default)]
    pub node_shape: NodeShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepRequest {
    #[serde(default)]
    pub node_shape: NodeShape,
    #[serde(default = "default_starting_intensity")]
    pub starting_intensity: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default)]
    pub slo_tolerance: f64,
    /// Benchmarks to run by name; every stored benchmark when empty
    #[serde(default)]
    pub benchmarks: Vec<String>,
}

fn default_starting_intensity() -> f64 {
    10.0
}

fn default_step() -> f64 {
    10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureGenerator {
    SlowCooker,
    DemoUi,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    #[serde(default)]
    pub node_shape: NodeShape,
    /// Defaults to slow-cooker for slow-cooker apps and the demo UI otherwise
    #[serde(default)]
    pub load_generator: Option<CaptureGenerator>,
    #[serde(default)]
    pub load_time: Option<String>,
}

/// A run ready to be admitted as a job
pub struct PreparedRun {
    pub app: ApplicationConfig,
    pub node_shape: NodeShape,
    pub run: Arc<dyn ProfileRun>,
}

/// Builds runs from submissions using the config store
pub struct RunFactory {
    configs: Arc<dyn ConfigStore>,
}

impl RunFactory {
    pub fn new(configs: Arc<dyn ConfigStore>) -> Self {
        Self { configs }
    }

    pub async fn build(
        &self,
        app_name: &str,
        request: ProfileRequest,
    ) -> Result<PreparedRun, RunError> {
        let app = self.configs.get_application_config(app_name).await?;
        let node_shape = request.node_shape().clone();

        let run: Arc<dyn ProfileRun> = match request {
            ProfileRequest::Calibration(_) => Arc::new(CalibrationRun::new(app.clone())),
            ProfileRequest::Benchmark(sweep) => {
                let mut benchmarks = self.configs.get_benchmarks().await?;
                if !sweep.benchmarks.is_empty() {
                    benchmarks.retain(|b| sweep.benchmarks.contains(&b.name));
                }
                Arc::new(BenchmarkRun::new(
                    app.clone(),
                    benchmarks,
                    sweep.starting_intensity,
                    sweep.step,
                    sweep.slo_tolerance,
                )?)
            }
            ProfileRequest::Capture(capture) => Arc::new(CaptureRun::new(
                app.clone(),
                capture.load_generator,
                capture.load_time,
            )),
        };

        Ok(PreparedRun {
            app,
            node_shape,
            run,
        })
    }
}

/// Load generator of an application, resolved against a deployment
pub(crate) enum LoadDriver<'a> {
    Controller {
        url: String,
        spec: &'a BenchmarkControllerSpec,
        /// Controller arguments with the service addresses prepended
        args: Vec<String>,
    },
    SlowCooker {
        url: String,
        spec: &'a SlowCookerSpec,
    },
}

impl<'a> LoadDriver<'a> {
    pub(crate) async fn resolve(
        ctx: &RunContext,
        app: &'a ApplicationConfig,
        deployment_id: &str,
        log: &RunLog,
    ) -> Result<LoadDriver<'a>, RunError> {
        match &app.load_tester {
            LoadTester::Locust(_) => Err(RunError::NotImplemented("locust")),
            LoadTester::BenchmarkController(spec) => {
                let url = ctx.deployer.get_service_url(deployment_id, &spec.name).await?;
                let mut args = Vec::new();
                for service in &spec.service_configs {
                    let address = ctx
                        .deployer
                        .get_service_address(deployment_id, &service.name)
                        .await?;
                    args.push(service.host_arg.clone());
                    args.push(address.host);
                    args.push(service.port_arg.clone());
                    args.push(address.port.to_string());
                }
                args.extend(spec.args.iter().cloned());
                log.info(format!("Benchmark controller at {} with args {:?}", url, args));
                Ok(LoadDriver::Controller { url, spec, args })
            }
            LoadTester::SlowCooker(spec) => {
                let url = ctx.deployer.get_service_url(deployment_id, &spec.name).await?;
                log.info(format!("Slow-cooker at {}", url));
                Ok(LoadDriver::SlowCooker { url, spec })
            }
        }
    }

    /// One load test at `app_intensity` alongside a benchmark at `benchmark_intensity`
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn load_test(
        &self,
        ctx: &RunContext,
        app: &ApplicationConfig,
        stage_id: &str,
        benchmark: &str,
        app_intensity: f64,
        benchmark_intensity: f64,
        log: &RunLog,
    ) -> Result<Vec<BenchmarkSample>, RunError> {
        match self {
            LoadDriver::Controller { url, spec, args } => {
                let request = ControllerBenchmarkRequest {
                    stage_id: stage_id.to_string(),
                    app_name: app.name.clone(),
                    load_tester_name: spec.name.clone(),
                    command: spec.command.clone(),
                    args: args.clone(),
                    intensity_args: spec.intensity_args.clone(),
                    app_intensity,
                    benchmark: benchmark.to_string(),
                    benchmark_intensity,
                    slo: app.slo.clone(),
                };
                let response = ctx.controller.run_benchmark(url, &request, log).await?;
                Ok(response
                    .results
                    .iter()
                    .map(|run| BenchmarkSample {
                        benchmark: benchmark.to_string(),
                        benchmark_intensity,
                        qos_value: run.qos_value,
                        failures: run.failures,
                    })
                    .collect())
            }
            LoadDriver::SlowCooker { url, spec } => {
                let request = SlowCookerBenchmarkRequest {
                    app_load: spec.app_load.clone(),
                    app_intensity,
                    benchmark_intensity,
                    load_time: spec.app_load.load_time.clone(),
                };
                let response = ctx
                    .slow_cooker
                    .run_benchmark(url, stage_id, &request, log)
                    .await?;
                let percentile = app.slo.percentile();
                Ok(response
                    .results
                    .iter()
                    .map(|run| BenchmarkSample {
                        benchmark: benchmark.to_string(),
                        benchmark_intensity,
                        qos_value: run.latency.get(percentile),
                        failures: run.failures,
                    })
                    .collect())
            }
        }
    }
}

pub(crate) fn missing_final_result(what: &str) -> RunError {
    RunError::Client(ClientError::Decode(format!(
        "{} finished without a final result",
        what
    )))
}
