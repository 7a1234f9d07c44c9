//! Bounded FIFO of admitted jobs

use super::job::Job;
use crate::error::QueueError;
use crate::observability::ProfilerMetrics;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Multi-consumer job queue
///
/// Workers share the single receiver behind a fair mutex, so jobs are handed
/// out in submission order.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Arc<Job>>,
    rx: Arc<Mutex<mpsc::Receiver<Arc<Job>>>>,
    metrics: ProfilerMetrics,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            metrics: ProfilerMetrics::new(),
        }
    }

    /// Enqueue a job, waiting while the queue is full
    pub async fn submit(&self, job: Arc<Job>) -> Result<(), QueueError> {
        self.tx.send(job).await.map_err(|_| QueueError::Closed)?;
        self.metrics.inc_queue_depth();
        Ok(())
    }

    /// Next job in submission order
    pub async fn next(&self) -> Option<Arc<Job>> {
        let job = self.rx.lock().await.recv().await;
        if job.is_some() {
            self.metrics.dec_queue_depth();
        }
        job
    }

    /// Refuse further submissions; jobs already queued can still be taken
    ///
    /// An idle worker holds the receiver while it waits, so workers must be
    /// stopped before the queue is closed.
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }

    /// Jobs currently waiting
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
