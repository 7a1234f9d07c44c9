//! Observability infrastructure for the profiler
//!
//! Provides:
//! - Prometheus metrics (lease pool, queue depth, job outcomes, poll durations)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Poll loops run from seconds up to several hours
const POLL_DURATION_BUCKETS: &[f64] = &[
    1.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0, 14400.0, 21600.0,
];

static GLOBAL_METRICS: OnceLock<ProfilerMetricsInner> = OnceLock::new();

struct ProfilerMetricsInner {
    leases: IntGauge,
    queue_depth: IntGauge,
    jobs_admitted: IntCounterVec,
    jobs_completed: IntCounterVec,
    reserve_retries: IntCounter,
    poll_duration_seconds: HistogramVec,
}

impl ProfilerMetricsInner {
    fn new() -> Self {
        Self {
            leases: register_int_gauge!(
                "profiler_cluster_leases",
                "Number of cluster leases currently held by the manager"
            )
            .expect("Failed to register cluster_leases"),

            queue_depth: register_int_gauge!(
                "profiler_queue_depth",
                "Number of jobs waiting for a worker"
            )
            .expect("Failed to register queue_depth"),

            jobs_admitted: register_int_counter_vec!(
                "profiler_jobs_admitted_total",
                "Jobs accepted by the ingress, by run kind",
                &["kind"]
            )
            .expect("Failed to register jobs_admitted"),

            jobs_completed: register_int_counter_vec!(
                "profiler_jobs_completed_total",
                "Jobs that reached a terminal state",
                &["state"]
            )
            .expect("Failed to register jobs_completed"),

            reserve_retries: register_int_counter!(
                "profiler_reserve_retries_total",
                "Cluster reservations retried after a backoff"
            )
            .expect("Failed to register reserve_retries"),

            poll_duration_seconds: register_histogram_vec!(
                "profiler_poll_duration_seconds",
                "Time spent polling a remote stage until it finished",
                &["client"],
                POLL_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register poll_duration_seconds"),
        }
    }
}

/// Handle to the process-wide profiler metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct ProfilerMetrics {
    _private: (),
}

impl Default for ProfilerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfilerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ProfilerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ProfilerMetricsInner {
        GLOBAL_METRICS.get_or_init(ProfilerMetricsInner::new)
    }

    pub fn set_leases(&self, count: usize) {
        self.inner().leases.set(count as i64);
    }

    pub fn inc_queue_depth(&self) {
        self.inner().queue_depth.inc();
    }

    pub fn dec_queue_depth(&self) {
        self.inner().queue_depth.dec();
    }

    pub fn inc_jobs_admitted(&self, kind: &str) {
        self.inner().jobs_admitted.with_label_values(&[kind]).inc();
    }

    pub fn inc_jobs_completed(&self, state: &str) {
        self.inner().jobs_completed.with_label_values(&[state]).inc();
    }

    pub fn inc_reserve_retries(&self) {
        self.inner().reserve_retries.inc();
    }

    pub fn observe_poll_duration(&self, client: &str, duration_secs: f64) {
        self.inner()
            .poll_duration_seconds
            .with_label_values(&[client])
            .observe(duration_secs);
    }
}

/// Structured logger for profiler lifecycle events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, workers: usize, max_clusters: usize) {
        info!(
            event = "profiler_started",
            instance = %self.instance,
            version = %version,
            workers = workers,
            max_clusters = max_clusters,
            "Profiler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "profiler_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Profiler shutting down"
        );
    }

    pub fn log_job_admitted(&self, run_id: &str, app_name: &str, kind: &str) {
        info!(
            event = "job_admitted",
            instance = %self.instance,
            run_id = %run_id,
            app_name = %app_name,
            kind = %kind,
            "Profile run queued"
        );
    }

    pub fn log_lease_reserved(&self, run_id: &str, deployment_id: &str, reused: bool) {
        info!(
            event = "lease_reserved",
            instance = %self.instance,
            run_id = %run_id,
            deployment_id = %deployment_id,
            reused = reused,
            "Cluster reserved"
        );
    }

    pub fn log_lease_released(&self, run_id: &str, deployment_id: &str, error: Option<&str>) {
        match error {
            None => info!(
                event = "lease_released",
                instance = %self.instance,
                run_id = %run_id,
                deployment_id = %deployment_id,
                "Cluster released"
            ),
            Some(error) => warn!(
                event = "lease_release_failed",
                instance = %self.instance,
                run_id = %run_id,
                deployment_id = %deployment_id,
                error = %error,
                "Cluster release failed, lease kept for retry"
            ),
        }
    }

    pub fn log_reserve_backoff(&self, run_id: &str, error: &str, backoff_secs: u64) {
        warn!(
            event = "reserve_backoff",
            instance = %self.instance,
            run_id = %run_id,
            error = %error,
            backoff_secs = backoff_secs,
            "Unable to reserve cluster, retrying after backoff"
        );
    }

    pub fn log_run_finished(&self, run_id: &str, kind: &str, state: &str, error: Option<&str>) {
        match error {
            None => info!(
                event = "run_finished",
                instance = %self.instance,
                run_id = %run_id,
                kind = %kind,
                state = %state,
                "Profile run finished"
            ),
            Some(error) => warn!(
                event = "run_finished",
                instance = %self.instance,
                run_id = %run_id,
                kind = %kind,
                state = %state,
                error = %error,
                "Profile run failed"
            ),
        }
    }

    pub fn log_recovery(&self, restored: usize, discarded: usize, skipped: usize) {
        info!(
            event = "leases_recovered",
            instance = %self.instance,
            restored = restored,
            discarded = discarded,
            skipped = skipped,
            "Cluster leases recovered from snapshots"
        );
    }
}
