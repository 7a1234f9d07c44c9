//! Adapters over the remote collaborators driven by profile runs
//!
//! Every collaborator sits behind an async trait so the lease manager and the
//! runs can be exercised against in-process fakes.

pub mod agent;
pub mod controller;
pub mod demo_ui;
pub mod deployer;
pub mod http;
pub mod poll;
pub mod slowcooker;

pub use agent::{AgentClientConfig, BenchmarkAgentClient, BenchmarkRequest};
pub use controller::{
    BenchmarkControllerClient, ControllerBenchmarkRequest, ControllerCalibrationRequest,
    ControllerClientConfig, ControllerResponse, ControllerRun,
};
pub use demo_ui::{DemoUiClient, DemoUiLoadTest};
pub use deployer::{DeployerClient, DeployerConfig, ServiceMapping};
pub use http::HttpClient;
pub use poll::{poll_until, PollConfig, PollStatus};
pub use slowcooker::{
    LatencyPercentiles, SlowCookerBenchmarkRequest, SlowCookerCalibrationRequest,
    SlowCookerClient, SlowCookerClientConfig, SlowCookerResponse, SlowCookerRun,
};

use crate::error::ClientResult;
use crate::models::DeploymentSpec;
use crate::runlog::RunLog;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Network address of a service inside a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
}

/// Cluster orchestration service
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Create a deployment and wait until it is available
    async fn create_deployment(
        &self,
        template: &str,
        deployment: &DeploymentSpec,
        load_tester: &str,
        log: &RunLog,
    ) -> ClientResult<String>;

    /// Layer the app's tasks onto an existing deployment
    async fn deploy_extensions(
        &self,
        template: &str,
        deployment_id: &str,
        deployment: &DeploymentSpec,
        load_tester: &str,
        log: &RunLog,
    ) -> ClientResult<()>;

    async fn delete_deployment(&self, deployment_id: &str, log: &RunLog) -> ClientResult<()>;

    async fn is_deployment_ready(&self, deployment_id: &str) -> ClientResult<bool>;

    async fn get_service_url(&self, deployment_id: &str, service: &str) -> ClientResult<String>;

    async fn get_colocated_service_url(
        &self,
        deployment_id: &str,
        colocated_service: &str,
        service_prefix: &str,
    ) -> ClientResult<String>;

    async fn get_service_address(
        &self,
        deployment_id: &str,
        service: &str,
    ) -> ClientResult<ServiceAddress>;
}

/// Per-node service that runs interference benchmarks
#[async_trait]
pub trait BenchmarkAgent: Send + Sync {
    async fn create_benchmark(
        &self,
        agent_url: &str,
        request: &BenchmarkRequest,
        log: &RunLog,
    ) -> ClientResult<()>;

    async fn delete_benchmark(&self, agent_url: &str, name: &str, log: &RunLog) -> ClientResult<()>;
}

#[async_trait]
pub trait BenchmarkController: Send + Sync {
    async fn run_calibration(
        &self,
        url: &str,
        request: &ControllerCalibrationRequest,
        log: &RunLog,
    ) -> ClientResult<ControllerResponse>;

    async fn run_benchmark(
        &self,
        url: &str,
        request: &ControllerBenchmarkRequest,
        log: &RunLog,
    ) -> ClientResult<ControllerResponse>;
}

#[async_trait]
pub trait SlowCooker: Send + Sync {
    async fn run_calibration(
        &self,
        url: &str,
        run_id: &str,
        request: &SlowCookerCalibrationRequest,
        log: &RunLog,
    ) -> ClientResult<SlowCookerResponse>;

    async fn run_benchmark(
        &self,
        url: &str,
        run_id: &str,
        request: &SlowCookerBenchmarkRequest,
        log: &RunLog,
    ) -> ClientResult<SlowCookerResponse>;
}

#[async_trait]
pub trait DemoUi: Send + Sync {
    async fn run_load_test(
        &self,
        url: &str,
        stage_id: &str,
        request: &DemoUiLoadTest,
        log: &RunLog,
    ) -> ClientResult<SlowCookerResponse>;
}
