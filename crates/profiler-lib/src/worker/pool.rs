//! Worker loop: reserve, run, release

use super::backoff::ReserveBackoff;
use super::job::{Job, JobState};
use super::queue::JobQueue;
use crate::cluster::ClusterManager;
use crate::error::{ClusterError, RunError};
use crate::health::{components, HealthRegistry};
use crate::observability::{ProfilerMetrics, StructuredLogger};
use crate::runs::RunContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_WORKER_COUNT: usize = 2;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of jobs driven in parallel
    pub workers: usize,
    /// First delay after a failed reservation
    pub initial_backoff: Duration,
    /// Upper bound of the reservation delay
    pub max_backoff: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKER_COUNT,
            initial_backoff: super::backoff::DEFAULT_INITIAL_BACKOFF,
            max_backoff: super::backoff::DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Fixed set of workers draining the job queue
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: JobQueue,
    clusters: ClusterManager,
    context: Arc<RunContext>,
    metrics: ProfilerMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        queue: JobQueue,
        clusters: ClusterManager,
        context: Arc<RunContext>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            config,
            queue,
            clusters,
            context,
            metrics: ProfilerMetrics::new(),
            logger,
            health: HealthRegistry::new(),
        }
    }

    /// Report reservation backoff to `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Spawn the workers; each runs until its task is aborted
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.max(1))
            .map(|worker| {
                let pool = self.clone();
                tokio::spawn(async move { pool.work(worker).await })
            })
            .collect()
    }

    async fn work(&self, worker: usize) {
        info!(worker, "Worker started");
        while let Some(job) = self.queue.next().await {
            debug!(worker, run_id = %job.id, "Worker picked up job");
            self.process(&job).await;
        }
        info!(worker, "Worker stopped");
    }

    /// Drive one job through reserve, run and release
    pub async fn process(&self, job: &Arc<Job>) {
        job.set_state(JobState::Reserving).await;
        if let Err(e) = job.log.open() {
            warn!(run_id = %job.id, error = %e, "Unable to open run log file");
        }
        job.log.info(format!(
            "Starting {} run of {}",
            job.kind().as_str(),
            job.app.name
        ));

        let deployment_id = self.reserve(job).await;
        job.set_deployment(&deployment_id).await;
        job.log.info(format!("Running on deployment {}", deployment_id));

        let result = self.run(job, &deployment_id).await;
        let state = match &result {
            Ok(()) => {
                job.set_state(JobState::Finished).await;
                job.log.info("Run finished");
                JobState::Finished
            }
            Err(e) => {
                job.fail(e.to_string()).await;
                job.log.error(format!("Run failed: {}", e));
                JobState::Failed
            }
        };
        self.metrics.inc_jobs_completed(state.as_str());
        let error = result.as_ref().err().map(|e| e.to_string());
        self.logger
            .log_run_finished(&job.id, job.kind().as_str(), state.as_str(), error.as_deref());

        self.release(job).await;
    }

    /// Reserve a cluster, backing off between failed attempts until one succeeds
    async fn reserve(&self, job: &Arc<Job>) -> String {
        let mut backoff = ReserveBackoff::new(self.config.initial_backoff, self.config.max_backoff);

        loop {
            let attempt = match self
                .clusters
                .reserve(&job.app, &job.node_shape, &job.id, job.log.clone())
                .await
            {
                Ok(pending) => pending.await.unwrap_or(Err(ClusterError::Dropped)),
                Err(e) => Err(e),
            };

            match attempt {
                Ok(deployment_id) => {
                    self.health.set_healthy(components::WORKER_POOL).await;
                    return deployment_id;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    job.log.warn(format!(
                        "Unable to reserve cluster: {}; retrying in {}s",
                        e,
                        delay.as_secs()
                    ));
                    self.logger
                        .log_reserve_backoff(&job.id, &e.to_string(), delay.as_secs());
                    self.metrics.inc_reserve_retries();
                    self.health
                        .set_degraded(
                            components::WORKER_POOL,
                            format!("Run {} waiting for a cluster: {}", job.id, e),
                        )
                        .await;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Run the job in its own task so a panic is recorded as a failure
    async fn run(&self, job: &Arc<Job>, deployment_id: &str) -> Result<(), RunError> {
        let run = job.run.clone();
        let context = self.context.clone();
        let log = job.log.clone();
        let deployment_id = deployment_id.to_string();

        match tokio::spawn(async move { run.run(&context, &deployment_id, &log).await }).await {
            Ok(result) => result,
            Err(e) => Err(RunError::Aborted(e.to_string())),
        }
    }

    async fn release(&self, job: &Arc<Job>) {
        let released = self
            .clusters
            .unreserve(&job.id, job.log.clone())
            .await
            .await
            .unwrap_or(Err(ClusterError::Dropped));

        match released {
            Ok(_) => job.log.info("Cluster released"),
            Err(e) => job.log.error(format!("Unable to release cluster: {}", e)),
        }
    }
}
