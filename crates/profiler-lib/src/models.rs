//! Core data models for the profiler
//!
//! Application configs and benchmarks are read from the config store,
//! calibration and profiling results are written to the metrics store.
//! Every document uses camelCase keys on the wire.

use serde::{Deserialize, Serialize};

/// Definition of an application that can be profiled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfig {
    pub name: String,
    #[serde(default)]
    pub service_names: Vec<String>,
    pub deployment_template: String,
    pub load_tester: LoadTester,
    pub slo: Slo,
    #[serde(default)]
    pub task_definitions: Vec<TaskDefinition>,
}

/// Load generator driving an application; exactly one variant is configured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadTester {
    BenchmarkController(BenchmarkControllerSpec),
    Locust(LocustSpec),
    SlowCooker(SlowCookerSpec),
}

impl LoadTester {
    /// Name of the load tester service inside the deployment
    pub fn name(&self) -> &str {
        match self {
            LoadTester::BenchmarkController(spec) => &spec.name,
            LoadTester::Locust(spec) => &spec.name,
            LoadTester::SlowCooker(spec) => &spec.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkControllerSpec {
    #[serde(default = "default_controller_name")]
    pub name: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub intensity_args: Vec<IntensityArg>,
    /// Services whose address is injected into the controller arguments
    #[serde(default)]
    pub service_configs: Vec<ServiceArgConfig>,
}

fn default_controller_name() -> String {
    "benchmark-controller".to_string()
}

/// Argument of the benchmark controller that carries load intensity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntensityArg {
    pub name: String,
    #[serde(default)]
    pub starting_value: f64,
    #[serde(default)]
    pub max_value: f64,
    #[serde(default)]
    pub step: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceArgConfig {
    pub name: String,
    pub host_arg: String,
    pub port_arg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocustSpec {
    #[serde(default = "default_locust_name")]
    pub name: String,
    #[serde(default)]
    pub file: String,
}

fn default_locust_name() -> String {
    "locust".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowCookerSpec {
    #[serde(default = "default_slow_cooker_name")]
    pub name: String,
    pub app_load: SlowCookerAppLoad,
    #[serde(default)]
    pub calibrate: SlowCookerCalibrate,
}

fn default_slow_cooker_name() -> String {
    "slow-cooker".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowCookerAppLoad {
    /// Target url inside the cluster, e.g. `http://frontend:8080/`
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub qps: u32,
    #[serde(default)]
    pub concurrency: u32,
    #[serde(default = "default_load_time")]
    pub load_time: String,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_load_time() -> String {
    "60s".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowCookerCalibrate {
    pub initial_concurrency: u32,
    pub step: u32,
    pub run_duration: String,
}

impl Default for SlowCookerCalibrate {
    fn default() -> Self {
        Self {
            initial_concurrency: 5,
            step: 5,
            run_duration: "30s".to_string(),
        }
    }
}

/// Service level objective the profiled application must meet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slo {
    /// Measured metric, e.g. `latency`
    pub metric: String,
    pub value: f64,
    /// Aggregation of the metric, e.g. `99` for the 99th percentile
    #[serde(rename = "type")]
    pub kind: String,
}

impl Slo {
    /// Latency percentile selected by the SLO type
    pub fn percentile(&self) -> Percentile {
        Percentile::parse(&self.kind).unwrap_or(Percentile::P99)
    }
}

/// Latency aggregate reported by slow-cooker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Percentile {
    P50,
    P95,
    P99,
    Min,
    Max,
}

impl Percentile {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().trim_start_matches(['p', 'P']) {
            "50" => Some(Percentile::P50),
            "95" => Some(Percentile::P95),
            "99" => Some(Percentile::P99),
            "min" | "MIN" => Some(Percentile::Min),
            "max" | "MAX" => Some(Percentile::Max),
            _ => None,
        }
    }
}

/// Task placed on a node of the deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub node_mapping: NodeMapping,
    /// Container spec, passed through to the deployer unchanged
    #[serde(default)]
    pub task: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMapping {
    pub task: String,
    pub id: String,
}

/// Cluster sizing hints submitted along with a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeShape {
    #[serde(default)]
    pub nodes: Vec<NodeHint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHint {
    pub id: String,
    pub instance_type: String,
}

/// Deployment body sent to the deployer for a new or extended cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    pub app_name: String,
    pub nodes: Vec<NodeHint>,
    pub tasks: Vec<TaskDefinition>,
}

impl DeploymentSpec {
    pub fn for_app(app: &ApplicationConfig, shape: &NodeShape) -> Self {
        Self {
            app_name: app.name.clone(),
            nodes: shape.nodes.clone(),
            tasks: app.task_definitions.clone(),
        }
    }
}

/// Noisy-neighbor workload injected onto cluster nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Benchmark {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub intensity_metric: String,
    #[serde(default)]
    pub configs: Vec<BenchmarkAgentConfig>,
}

/// Where a benchmark agent config must run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementHost {
    /// Next to the load tester
    Loadtester,
    /// Next to the service under test
    Service,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkAgentConfig {
    pub placement_host: PlacementHost,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub host_config: serde_json::Value,
}

/// One `(loadIntensity, qosValue)` observation of a calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationSample {
    pub load_intensity: f64,
    pub qos_value: f64,
}

/// Calibration document; `final_result.load_intensity` is the app capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationResults {
    pub test_id: String,
    pub app_name: String,
    pub load_tester: String,
    pub qos_metrics: Vec<String>,
    pub test_results: Vec<CalibrationSample>,
    pub final_result: CalibrationSample,
}

/// One `(benchmark × intensity)` observation of an interference sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSample {
    pub benchmark: String,
    pub benchmark_intensity: f64,
    pub qos_value: f64,
    pub failures: f64,
}

/// Profiling document for one service of an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkRunResults {
    pub test_id: String,
    pub app_name: String,
    pub service_in_test: String,
    pub app_capacity: f64,
    pub slo_tolerance: f64,
    pub slo: Slo,
    pub benchmarks: Vec<String>,
    pub test_result: Vec<BenchmarkSample>,
}
