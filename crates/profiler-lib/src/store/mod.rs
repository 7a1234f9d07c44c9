//! Document and snapshot stores
//!
//! The core reads application configs and benchmarks from a [`ConfigStore`],
//! writes result documents to a [`MetricsStore`] and persists lease snapshots
//! through a [`SnapshotStore`]. Documents cross these traits as JSON values so
//! that the stores never depend on the shape of what they hold.

pub mod file;
pub mod memory;

pub use file::{FileDocumentStore, FileSnapshotStore};
pub use memory::{MemoryDocumentStore, MemorySnapshotStore};

use crate::error::{StoreError, StoreResult};
use crate::models::{ApplicationConfig, Benchmark};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field every metrics document is looked up by
pub const APP_NAME_FIELD: &str = "appName";

/// Kinds of result documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Calibration,
    Profiling,
    Sizing,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Calibration => "calibration",
            MetricKind::Profiling => "profiling",
            MetricKind::Sizing => "sizing",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collection names used by the document stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collections {
    pub applications: String,
    pub benchmarks: String,
    pub calibration: String,
    pub profiling: String,
    pub sizing: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            applications: "applications".to_string(),
            benchmarks: "benchmarks".to_string(),
            calibration: "calibration".to_string(),
            profiling: "profiling".to_string(),
            sizing: "sizing".to_string(),
        }
    }
}

impl Collections {
    pub fn metrics(&self, kind: MetricKind) -> &str {
        match kind {
            MetricKind::Calibration => &self.calibration,
            MetricKind::Profiling => &self.profiling,
            MetricKind::Sizing => &self.sizing,
        }
    }
}

/// Read-only application configs and benchmark definitions
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_application_config(&self, name: &str) -> StoreResult<ApplicationConfig>;

    async fn get_benchmarks(&self) -> StoreResult<Vec<Benchmark>>;
}

/// Append-only result documents
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn write_metrics(&self, kind: MetricKind, document: serde_json::Value)
        -> StoreResult<()>;

    /// Most recently written document of `kind` for `app_name`
    async fn get_metric(&self, kind: MetricKind, app_name: &str) -> StoreResult<serde_json::Value>;
}

/// Opaque blobs keyed by run id, used for lease snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn store(&self, key: &str, snapshot: serde_json::Value) -> StoreResult<()>;

    async fn load_all(&self) -> StoreResult<Vec<serde_json::Value>>;

    async fn delete(&self, key: &str) -> StoreResult<()>;
}

pub(crate) fn document_app_name(document: &serde_json::Value) -> Option<&str> {
    document.get(APP_NAME_FIELD).and_then(|v| v.as_str())
}

/// Keys become file names, so they must be a single path component
pub(crate) fn validate_key(key: &str) -> StoreResult<()> {
    let valid = !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
