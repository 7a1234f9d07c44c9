//! Liveness and readiness of the profiler
//!
//! The process becomes ready once cluster lease recovery has completed.
//! Components report degradations (a worker backing off, a lease that could
//! not be checked) so that `/health` explains why work is not progressing.

use crate::cluster::RecoveryReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names reported by `/health`
pub mod components {
    pub const CLUSTER_MANAGER: &str = "cluster_manager";
    pub const WORKER_POOL: &str = "worker_pool";
    pub const STORE: &str = "store";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Operational, but some work is stalled
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub since: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Shared health state, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    recovered: Arc<AtomicBool>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_healthy(&self, name: &str) {
        let mut components = self.components.write().await;
        // Keep the original timestamp while nothing changes
        if components.get(name).map(|c| c.status) != Some(ComponentStatus::Healthy) {
            components.insert(
                name.to_string(),
                ComponentHealth::new(ComponentStatus::Healthy, None),
            );
        }
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.components.write().await.insert(
            name.to_string(),
            ComponentHealth::new(ComponentStatus::Degraded, Some(message.into())),
        );
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.components.write().await.insert(
            name.to_string(),
            ComponentHealth::new(ComponentStatus::Unhealthy, Some(message.into())),
        );
    }

    /// Record the outcome of lease recovery and mark the process ready
    pub async fn mark_recovered(&self, report: &RecoveryReport) {
        if !report.skipped.is_empty() {
            self.set_degraded(
                components::CLUSTER_MANAGER,
                format!(
                    "{} recovered leases could not be checked: {}",
                    report.skipped.len(),
                    report.skipped.join(", ")
                ),
            )
            .await;
        } else {
            self.set_healthy(components::CLUSTER_MANAGER).await;
        }
        self.recovered.store(true, Ordering::SeqCst);
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered.load(Ordering::SeqCst)
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = components
            .values()
            .map(|c| c.status)
            .max_by_key(|status| match status {
                ComponentStatus::Healthy => 0,
                ComponentStatus::Degraded => 1,
                ComponentStatus::Unhealthy => 2,
            })
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        if !self.is_recovered() {
            return ReadinessResponse {
                ready: false,
                reason: Some("Cluster leases not yet recovered".to_string()),
            };
        }
        let unhealthy = self
            .components
            .read()
            .await
            .iter()
            .find(|(_, c)| c.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.clone());
        match unhealthy {
            Some(name) => ReadinessResponse {
                ready: false,
                reason: Some(format!("{} is unhealthy", name)),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}
