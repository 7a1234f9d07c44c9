//! Workload profiler
//!
//! Accepts profile run submissions, leases clusters from the deployer and
//! drives calibration, interference sweep and capture runs against them.

use anyhow::{Context, Result};
use profiler::{api, config::ProfilerConfig};
use profiler_lib::{
    clients::{
        AgentClientConfig, BenchmarkAgentClient, BenchmarkControllerClient,
        ControllerClientConfig, DemoUiClient, DeployerClient, DeployerConfig, HttpClient,
        SlowCookerClient, SlowCookerClientConfig,
    },
    cluster::ClusterManager,
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    runs::{RunContext, RunFactory},
    store::{FileDocumentStore, FileSnapshotStore},
    worker::{Dispatcher, JobQueue, JobRegistry, WorkerPool, WorkerPoolConfig},
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PROFILER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = ProfilerConfig::load()?;
    info!(
        port = config.port,
        deployer = %config.deployer_url,
        store = %config.database.root().display(),
        "Profiler configured"
    );
    if config.deployments.s3.is_some() {
        warn!("deployments.s3 is ignored; lease snapshots are kept in the snapshot path");
    }

    let instance = std::env::var("HOSTNAME").unwrap_or_else(|_| "profiler".to_string());
    let logger = StructuredLogger::new(instance);
    logger.log_startup(PROFILER_VERSION, config.worker_count, config.max_clusters);

    let health = HealthRegistry::new();
    health.set_healthy(components::STORE).await;
    health.set_healthy(components::WORKER_POOL).await;

    tokio::fs::create_dir_all(&config.files_path)
        .await
        .with_context(|| format!("Unable to create {}", config.files_path.display()))?;

    // Stores
    let documents = Arc::new(FileDocumentStore::with_collections(
        config.database.root(),
        config.database.collections(),
    ));
    let snapshots = Arc::new(FileSnapshotStore::new(config.snapshot_path()));

    // Remote collaborators
    let http = HttpClient::with_default_timeout().context("Unable to build HTTP client")?;
    let deployer = Arc::new(DeployerClient::new(
        DeployerConfig::new(&config.deployer_url),
        http.clone(),
    ));
    let context = Arc::new(RunContext {
        deployer: deployer.clone(),
        agent: Arc::new(BenchmarkAgentClient::new(
            AgentClientConfig::default(),
            http.clone(),
        )),
        controller: Arc::new(BenchmarkControllerClient::new(
            ControllerClientConfig::default(),
            http.clone(),
        )),
        slow_cooker: Arc::new(SlowCookerClient::new(
            SlowCookerClientConfig::default(),
            http.clone(),
        )),
        demo_ui: Arc::new(DemoUiClient::new(http)),
        metrics: documents.clone(),
        write_results: config.write_results,
    });

    // Recover leases before accepting work
    let clusters =
        ClusterManager::with_logger(deployer, snapshots, config.max_clusters, logger.clone());
    let report = clusters
        .recover()
        .await
        .context("Unable to recover cluster leases")?;
    health.mark_recovered(&report).await;
    for cleanup in report.cleanups {
        tokio::spawn(async move {
            match cleanup.await {
                Ok(Ok(run_id)) => info!(run_id = %run_id, "Stale lease released"),
                Ok(Err(e)) => error!(error = %e, "Unable to release stale lease"),
                Err(_) => warn!("Stale lease cleanup was dropped"),
            }
        });
    }

    // Queue and workers
    let queue = JobQueue::default();
    let pool = Arc::new(
        WorkerPool::new(
            WorkerPoolConfig {
                workers: config.worker_count,
                ..Default::default()
            },
            queue.clone(),
            clusters,
            context,
            logger.clone(),
        )
        .with_health(health.clone()),
    );
    let workers = pool.spawn();

    let dispatcher = Dispatcher::new(
        JobRegistry::new(),
        queue.clone(),
        Some(config.files_path.clone()),
        logger.clone(),
    );
    let state = Arc::new(api::AppState::new(
        dispatcher,
        Arc::new(RunFactory::new(documents)),
        health,
    ));

    let mut api_handle = tokio::spawn(api::serve(config.port, state));

    tokio::select! {
        result = &mut api_handle => {
            for worker in &workers {
                worker.abort();
            }
            result.context("API server task failed")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
            info!("Shutting down");
            api_handle.abort();
            for worker in &workers {
                worker.abort();
            }
            queue.close().await;
        }
    }

    Ok(())
}
