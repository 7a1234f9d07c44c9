//! File-backed stores
//!
//! One JSON document per file, one directory per collection:
//!
//! ```text
//! {root}/applications/{name}.json
//! {root}/benchmarks/{name}.json
//! {root}/calibration/{writeNanos}-{testId}.json
//! {snapshots}/{runId}.json
//! ```
//!
//! Writes go to a temp file that is synced and renamed over the target.

use super::{
    document_app_name, validate_key, Collections, ConfigStore, MetricKind, MetricsStore,
    SnapshotStore,
};
use crate::error::{StoreError, StoreResult};
use crate::models::{ApplicationConfig, Benchmark};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const EXTENSION: &str = "json";

/// Config and metrics documents under a root directory
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    root: PathBuf,
    collections: Collections,
}

impl FileDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_collections(root, Collections::default())
    }

    pub fn with_collections(root: impl Into<PathBuf>, collections: Collections) -> Self {
        Self {
            root: root.into(),
            collections,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Write an application config, replacing any previous one with that name
    pub async fn put_application(&self, app: &ApplicationConfig) -> StoreResult<()> {
        validate_key(&app.name)?;
        let path = document_path(&self.collection(&self.collections.applications), &app.name);
        write_atomic(&path, &serde_json::to_vec_pretty(app)?).await
    }

    pub async fn put_benchmark(&self, benchmark: &Benchmark) -> StoreResult<()> {
        validate_key(&benchmark.name)?;
        let path = document_path(&self.collection(&self.collections.benchmarks), &benchmark.name);
        write_atomic(&path, &serde_json::to_vec_pretty(benchmark)?).await
    }
}

#[async_trait]
impl ConfigStore for FileDocumentStore {
    async fn get_application_config(&self, name: &str) -> StoreResult<ApplicationConfig> {
        validate_key(name)?;
        let collection = &self.collections.applications;
        let path = document_path(&self.collection(collection), name);
        match read_document(&path).await {
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                collection: collection.clone(),
                key: name.to_string(),
            }),
            other => other,
        }
    }

    async fn get_benchmarks(&self) -> StoreResult<Vec<Benchmark>> {
        let dir = self.collection(&self.collections.benchmarks);
        let mut benchmarks = Vec::new();
        for path in list_documents(&dir).await? {
            benchmarks.push(read_document(&path).await?);
        }
        Ok(benchmarks)
    }
}

#[async_trait]
impl MetricsStore for FileDocumentStore {
    async fn write_metrics(
        &self,
        kind: MetricKind,
        document: serde_json::Value,
    ) -> StoreResult<()> {
        let test_id = document
            .get("testId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        validate_key(&test_id)?;

        // Zero-padded write time keeps lexical order equal to write order
        let written = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let name = format!("{:020}-{}", written, test_id);
        let path = document_path(&self.collection(self.collections.metrics(kind)), &name);

        write_atomic(&path, &serde_json::to_vec_pretty(&document)?).await?;
        debug!(kind = %kind, test_id = %test_id, path = %path.display(), "Wrote metrics document");
        Ok(())
    }

    async fn get_metric(&self, kind: MetricKind, app_name: &str) -> StoreResult<serde_json::Value> {
        let collection = self.collections.metrics(kind);
        let paths = list_documents(&self.collection(collection)).await?;

        for path in paths.iter().rev() {
            let document: serde_json::Value = read_document(path).await?;
            if document_app_name(&document) == Some(app_name) {
                return Ok(document);
            }
        }

        Err(StoreError::NotFound {
            collection: collection.to_string(),
            key: app_name.to_string(),
        })
    }
}

/// Lease snapshots, one file per run id
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn store(&self, key: &str, snapshot: serde_json::Value) -> StoreResult<()> {
        validate_key(key)?;
        write_atomic(&document_path(&self.dir, key), &serde_json::to_vec(&snapshot)?).await
    }

    async fn load_all(&self) -> StoreResult<Vec<serde_json::Value>> {
        let mut snapshots = Vec::new();
        for path in list_documents(&self.dir).await? {
            match read_document(&path).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(StoreError::Serde(e)) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(snapshots)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        match tokio::fs::remove_file(document_path(&self.dir, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                collection: "snapshots".to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

fn document_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.{}", key, EXTENSION))
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&temp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

async fn read_document<T: DeserializeOwned>(path: &Path) -> StoreResult<T> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Sorted `*.json` files of a collection; a missing directory is empty
async fn list_documents(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LoadTester, LocustSpec, Slo};
    use serde_json::json;
    use tempfile::TempDir;

    fn app(name: &str) -> ApplicationConfig {
        ApplicationConfig {
            name: name.to_string(),
            service_names: vec!["web".to_string()],
            deployment_template: "small".to_string(),
            load_tester: LoadTester::Locust(LocustSpec {
                name: "locust".to_string(),
                file: "load.py".to_string(),
            }),
            slo: Slo {
                metric: "latency".to_string(),
                value: 50.0,
                kind: "95".to_string(),
            },
            task_definitions: vec![],
        }
    }

    #[tokio::test]
    async fn test_application_roundtrip_and_missing() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::new(dir.path());
        store.put_application(&app("shop")).await.unwrap();

        let loaded = store.get_application_config("shop").await.unwrap();
        assert_eq!(loaded, app("shop"));

        let err = store.get_application_config("blog").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_benchmarks_empty_without_directory() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::new(dir.path());
        assert!(store.get_benchmarks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_metric_returns_most_recent() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::new(dir.path());

        for (test_id, app) in [("a", "shop"), ("b", "shop"), ("c", "blog")] {
            store
                .write_metrics(
                    MetricKind::Calibration,
                    json!({"testId": test_id, "appName": app}),
                )
                .await
                .unwrap();
        }

        let doc = store
            .get_metric(MetricKind::Calibration, "shop")
            .await
            .unwrap();
        assert_eq!(doc["testId"], "b");
        assert!(dir.path().join("calibration").is_dir());
    }

    #[tokio::test]
    async fn test_snapshot_store_atomic_files() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("snapshots"));

        store.store("run-1", json!({"RunId": "run-1"})).await.unwrap();
        store.store("run-1", json!({"RunId": "run-1", "State": "RESERVED"})).await.unwrap();
        store.store("run-2", json!({"RunId": "run-2"})).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["State"], "RESERVED");
        assert!(!dir.path().join("snapshots/run-1.tmp").exists());

        store.delete("run-1").await.unwrap();
        assert!(matches!(
            store.delete("run-1").await,
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_key_must_be_file_name() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let err = store.store("../escape", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }
}
