//! Profiler configuration
//!
//! Values come from an optional file (`PROFILER_CONFIG`, or `profiler.toml`,
//! `profiler.yaml` or `profiler.json` in the working directory) overlaid by
//! `PROFILER_*` environment variables, with `__` separating nested keys:
//! `PROFILER_DATABASE__URL=/var/lib/profiler` sets `database.url`.

use anyhow::{bail, Context, Result};
use profiler_lib::store::Collections;
use serde::Deserialize;
use std::path::PathBuf;

pub const CONFIG_ENV: &str = "PROFILER_CONFIG";
const ENV_PREFIX: &str = "PROFILER";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_worker_count", alias = "workercount")]
    pub worker_count: usize,

    #[serde(default = "default_max_clusters", alias = "maxclusters")]
    pub max_clusters: usize,

    #[serde(default, alias = "deployerurl")]
    pub deployer_url: String,

    /// Informational; agent urls are resolved through the deployer
    #[serde(default, alias = "benchmarkagenturl")]
    pub benchmark_agent_url: Option<String>,

    /// Informational; no analyzer calls are made
    #[serde(default, alias = "analyzerurl")]
    pub analyzer_url: Option<String>,

    /// Directory of run log files
    #[serde(default = "default_files_path", alias = "filespath")]
    pub files_path: PathBuf,

    #[serde(default = "default_write_results", alias = "writeresults")]
    pub write_results: bool,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub deployments: DeploymentsConfig,
}

/// Location and collection names of the document store
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Root directory of the document store; a `file://` url is accepted
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_config_database", alias = "configdatabase")]
    pub config_database: String,
    #[serde(default = "default_metric_database", alias = "metricdatabase")]
    pub metric_database: String,
    #[serde(default = "default_application_collection", alias = "applicationcollection")]
    pub application_collection: String,
    #[serde(default = "default_benchmark_collection", alias = "benchmarkcollection")]
    pub benchmark_collection: String,
    #[serde(default = "default_calibration_collection", alias = "calibrationcollection")]
    pub calibration_collection: String,
    #[serde(default = "default_profiling_collection", alias = "profilingcollection")]
    pub profiling_collection: String,
    #[serde(default = "default_sizing_collection", alias = "sizingcollection")]
    pub sizing_collection: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentsConfig {
    /// Directory of cluster lease snapshots
    #[serde(default, alias = "snapshotpath")]
    pub snapshot_path: Option<PathBuf>,
    /// Accepted for compatibility; snapshots are kept on the local filesystem
    #[serde(default)]
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub bucketname: String,
    #[serde(default)]
    pub awsid: String,
    #[serde(default)]
    pub awssecret: String,
    #[serde(default)]
    pub region: String,
}

fn default_port() -> u16 {
    7779
}

fn default_worker_count() -> usize {
    profiler_lib::worker::DEFAULT_WORKER_COUNT
}

fn default_max_clusters() -> usize {
    profiler_lib::cluster::DEFAULT_MAX_CLUSTERS
}

fn default_files_path() -> PathBuf {
    PathBuf::from("/tmp/profiler")
}

fn default_write_results() -> bool {
    true
}

fn default_database_url() -> String {
    "/var/lib/profiler".to_string()
}

fn default_config_database() -> String {
    "configdb".to_string()
}

fn default_metric_database() -> String {
    "metricdb".to_string()
}

fn default_application_collection() -> String {
    "applications".to_string()
}

fn default_benchmark_collection() -> String {
    "benchmarks".to_string()
}

fn default_calibration_collection() -> String {
    "calibration".to_string()
}

fn default_profiling_collection() -> String {
    "profiling".to_string()
}

fn default_sizing_collection() -> String {
    "sizing".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            user: None,
            password: None,
            config_database: default_config_database(),
            metric_database: default_metric_database(),
            application_collection: default_application_collection(),
            benchmark_collection: default_benchmark_collection(),
            calibration_collection: default_calibration_collection(),
            profiling_collection: default_profiling_collection(),
            sizing_collection: default_sizing_collection(),
        }
    }
}

impl DatabaseConfig {
    /// Filesystem root of the document store
    pub fn root(&self) -> PathBuf {
        match url::Url::parse(&self.url) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .unwrap_or_else(|_| PathBuf::from(url.path())),
            _ => PathBuf::from(&self.url),
        }
    }

    pub fn collections(&self) -> Collections {
        Collections {
            applications: format!("{}/{}", self.config_database, self.application_collection),
            benchmarks: format!("{}/{}", self.config_database, self.benchmark_collection),
            calibration: format!("{}/{}", self.metric_database, self.calibration_collection),
            profiling: format!("{}/{}", self.metric_database, self.profiling_collection),
            sizing: format!("{}/{}", self.metric_database, self.sizing_collection),
        }
    }
}

impl ProfilerConfig {
    /// Load from the config file and environment, then validate
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        builder = match std::env::var(CONFIG_ENV) {
            Ok(path) => builder.add_source(config::File::with_name(&path)),
            Err(_) => builder.add_source(config::File::with_name("profiler").required(false)),
        };
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Unable to read profiler configuration")?;

        let config: ProfilerConfig = settings
            .try_deserialize()
            .context("Invalid profiler configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.deployer_url.is_empty() {
            bail!("deployerUrl is required");
        }
        url::Url::parse(&self.deployer_url)
            .with_context(|| format!("deployerUrl {:?} is not a valid url", self.deployer_url))?;
        if self.worker_count < 1 {
            bail!("workerCount must be at least 1");
        }
        if self.max_clusters < 1 {
            bail!("maxClusters must be at least 1");
        }
        Ok(())
    }

    /// Lease snapshot directory, defaulting under the document store root
    pub fn snapshot_path(&self) -> PathBuf {
        self.deployments
            .snapshot_path
            .clone()
            .unwrap_or_else(|| self.database.root().join("deployments"))
    }
}
