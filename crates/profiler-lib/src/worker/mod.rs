//! Job queue and worker pool
//!
//! Admitted jobs wait in a bounded FIFO. Each worker takes the next job,
//! reserves a cluster for it (retrying with exponential backoff), runs it and
//! always releases the cluster afterwards.

pub mod backoff;
pub mod job;
pub mod pool;
pub mod queue;

pub use backoff::ReserveBackoff;
pub use job::{Job, JobRegistry, JobState, JobSummary};
pub use pool::{WorkerPool, WorkerPoolConfig, DEFAULT_WORKER_COUNT};
pub use queue::{JobQueue, DEFAULT_QUEUE_CAPACITY};

use crate::error::QueueError;
use crate::models::{ApplicationConfig, NodeShape};
use crate::observability::{ProfilerMetrics, StructuredLogger};
use crate::runs::ProfileRun;
use std::path::PathBuf;
use std::sync::Arc;

/// Admission point shared by the ingress: registers and enqueues jobs
#[derive(Clone)]
pub struct Dispatcher {
    registry: JobRegistry,
    queue: JobQueue,
    files_path: Option<PathBuf>,
    metrics: ProfilerMetrics,
    logger: StructuredLogger,
}

impl Dispatcher {
    pub fn new(
        registry: JobRegistry,
        queue: JobQueue,
        files_path: Option<PathBuf>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            registry,
            queue,
            files_path,
            metrics: ProfilerMetrics::new(),
            logger,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Register a job for `run` and queue it; returns once it is enqueued
    pub async fn admit(
        &self,
        app: ApplicationConfig,
        node_shape: NodeShape,
        run: Arc<dyn ProfileRun>,
    ) -> Result<Arc<Job>, QueueError> {
        let job = Arc::new(Job::new(app, node_shape, run, self.files_path.as_deref()));
        self.queue.submit(job.clone()).await?;
        self.registry.insert(job.clone());

        let kind = job.kind();
        self.metrics.inc_jobs_admitted(kind.as_str());
        self.logger
            .log_job_admitted(&job.id, &job.app.name, kind.as_str());
        Ok(job)
    }
}

#[cfg(test)]
mod tests;
