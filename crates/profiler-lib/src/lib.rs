//! Core library of the workload profiler
//!
//! This crate provides the core functionality for:
//! - Clients for the deployer, benchmark agents and load generators
//! - Config, metrics and lease snapshot stores
//! - Cluster lease management with restart recovery
//! - A bounded job queue drained by a worker pool
//! - Calibration, interference sweep and capture runs
//! - Health checks and observability

pub mod clients;
pub mod cluster;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod runlog;
pub mod runs;
pub mod store;
pub mod worker;

pub use cluster::{ClusterManager, RecoveryReport};
pub use error::{ClientError, ClusterError, QueueError, RunError, StoreError};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{ProfilerMetrics, StructuredLogger};
pub use runs::{ProfileRequest, RunContext, RunFactory, RunKind};
pub use worker::{Dispatcher, JobRegistry, JobState, JobSummary, WorkerPool, WorkerPoolConfig};
