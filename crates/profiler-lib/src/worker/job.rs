//! Jobs and the registry that serves their status

use crate::models::{ApplicationConfig, NodeShape};
use crate::runlog::RunLog;
use crate::runs::{ProfileRun, RunKind};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Reserving,
    Running,
    Finished,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Reserving => "RESERVING",
            JobState::Running => "RUNNING",
            JobState::Finished => "FINISHED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(JobState::Queued),
            "RESERVING" => Ok(JobState::Reserving),
            "RUNNING" => Ok(JobState::Running),
            "FINISHED" => Ok(JobState::Finished),
            "FAILED" => Ok(JobState::Failed),
            other => Err(format!("unknown job state {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
struct JobStatus {
    state: JobState,
    deployment_id: Option<String>,
    error: Option<String>,
}

/// Status view of a job as served by the ingress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub run_id: String,
    pub app_name: String,
    pub kind: RunKind,
    pub state: JobState,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One admitted profile run; its id is also the run id
pub struct Job {
    pub id: String,
    pub created: DateTime<Utc>,
    pub app: ApplicationConfig,
    pub node_shape: NodeShape,
    pub run: Arc<dyn ProfileRun>,
    pub log: Arc<RunLog>,
    status: RwLock<JobStatus>,
}

impl Job {
    /// Create a queued job; its log lives under `files_path` when given
    pub fn new(
        app: ApplicationConfig,
        node_shape: NodeShape,
        run: Arc<dyn ProfileRun>,
        files_path: Option<&Path>,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let log = match files_path {
            Some(dir) => RunLog::new(dir, &id),
            None => RunLog::detached(&id),
        };
        Self {
            id,
            created: Utc::now(),
            app,
            node_shape,
            run,
            log: Arc::new(log),
            status: RwLock::new(JobStatus {
                state: JobState::Queued,
                deployment_id: None,
                error: None,
            }),
        }
    }

    pub fn kind(&self) -> RunKind {
        self.run.kind()
    }

    pub async fn state(&self) -> JobState {
        self.status.read().await.state
    }

    pub async fn deployment_id(&self) -> Option<String> {
        self.status.read().await.deployment_id.clone()
    }

    pub async fn error(&self) -> Option<String> {
        self.status.read().await.error.clone()
    }

    pub(crate) async fn set_state(&self, state: JobState) {
        self.status.write().await.state = state;
    }

    pub(crate) async fn set_deployment(&self, deployment_id: &str) {
        let mut status = self.status.write().await;
        status.deployment_id = Some(deployment_id.to_string());
        status.state = JobState::Running;
    }

    pub(crate) async fn fail(&self, error: impl Into<String>) {
        let mut status = self.status.write().await;
        status.state = JobState::Failed;
        status.error = Some(error.into());
    }

    pub async fn summary(&self) -> JobSummary {
        let status = self.status.read().await.clone();
        JobSummary {
            run_id: self.id.clone(),
            app_name: self.app.name.clone(),
            kind: self.kind(),
            state: status.state,
            created: self.created,
            deployment_id: status.deployment_id,
            error: status.error,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("app", &self.app.name)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Every job admitted since startup, by run id
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Arc<Job>) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn get(&self, run_id: &str) -> Option<Arc<Job>> {
        self.jobs.get(run_id).map(|job| job.value().clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Summaries of all jobs, optionally filtered by state, oldest first
    pub async fn list(&self, state: Option<JobState>) -> Vec<JobSummary> {
        // Collect first so no shard lock is held across an await
        let jobs: Vec<Arc<Job>> = self.jobs.iter().map(|e| e.value().clone()).collect();

        let mut summaries = Vec::with_capacity(jobs.len());
        for job in jobs {
            let summary = job.summary().await;
            if state.map_or(true, |s| s == summary.state) {
                summaries.push(summary);
            }
        }
        summaries.sort_by(|a, b| a.created.cmp(&b.created));
        summaries
    }
}
