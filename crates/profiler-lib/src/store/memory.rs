//! In-memory stores for tests and ephemeral deployments

use super::{
    document_app_name, ConfigStore, MetricKind, MetricsStore, SnapshotStore,
};
use crate::error::{StoreError, StoreResult};
use crate::models::{ApplicationConfig, Benchmark};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Config and metrics documents held in process memory
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    applications: RwLock<HashMap<String, ApplicationConfig>>,
    benchmarks: RwLock<Vec<Benchmark>>,
    metrics: RwLock<HashMap<MetricKind, Vec<serde_json::Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_application(mut self, app: ApplicationConfig) -> Self {
        self.applications.get_mut().insert(app.name.clone(), app);
        self
    }

    pub fn with_benchmark(mut self, benchmark: Benchmark) -> Self {
        self.benchmarks.get_mut().push(benchmark);
        self
    }

    pub fn with_metric(mut self, kind: MetricKind, document: serde_json::Value) -> Self {
        self.metrics.get_mut().entry(kind).or_default().push(document);
        self
    }

    /// Every document of `kind` in write order
    pub async fn metrics(&self, kind: MetricKind) -> Vec<serde_json::Value> {
        self.metrics
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConfigStore for MemoryDocumentStore {
    async fn get_application_config(&self, name: &str) -> StoreResult<ApplicationConfig> {
        self.applications
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                collection: "applications".to_string(),
                key: name.to_string(),
            })
    }

    async fn get_benchmarks(&self) -> StoreResult<Vec<Benchmark>> {
        Ok(self.benchmarks.read().await.clone())
    }
}

#[async_trait]
impl MetricsStore for MemoryDocumentStore {
    async fn write_metrics(
        &self,
        kind: MetricKind,
        document: serde_json::Value,
    ) -> StoreResult<()> {
        self.metrics
            .write()
            .await
            .entry(kind)
            .or_default()
            .push(document);
        Ok(())
    }

    async fn get_metric(&self, kind: MetricKind, app_name: &str) -> StoreResult<serde_json::Value> {
        let metrics = self.metrics.read().await;
        metrics
            .get(&kind)
            .and_then(|docs| {
                docs.iter()
                    .rev()
                    .find(|doc| document_app_name(doc) == Some(app_name))
            })
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                collection: kind.to_string(),
                key: app_name.to_string(),
            })
    }
}

/// Lease snapshots held in process memory
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<BTreeMap<String, serde_json::Value>>,
    deleted: RwLock<Vec<String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.snapshots.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.snapshots.read().await.keys().cloned().collect()
    }

    /// Keys passed to successful deletes, in order
    pub async fn deleted_keys(&self) -> Vec<String> {
        self.deleted.read().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn store(&self, key: &str, snapshot: serde_json::Value) -> StoreResult<()> {
        self.snapshots
            .write()
            .await
            .insert(key.to_string(), snapshot);
        Ok(())
    }

    async fn load_all(&self) -> StoreResult<Vec<serde_json::Value>> {
        Ok(self.snapshots.read().await.values().cloned().collect())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        if self.snapshots.write().await.remove(key).is_none() {
            return Err(StoreError::NotFound {
                collection: "snapshots".to_string(),
                key: key.to_string(),
            });
        }
        self.deleted.write().await.push(key.to_string());
        Ok(())
    }
}
