//! Bounded pool of leased clusters
//!
//! All lease mutations happen under a single async mutex. Remote calls to the
//! deployer and the snapshot store are made by spawned tasks after the lock
//! has been released; each task reports its outcome on a oneshot channel.

use super::lease::{ClusterLease, LeaseState};
use crate::clients::Deployer;
use crate::error::ClusterError;
use crate::models::{ApplicationConfig, DeploymentSpec, NodeShape};
use crate::observability::{ProfilerMetrics, StructuredLogger};
use crate::runlog::RunLog;
use crate::store::SnapshotStore;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, warn};

/// Resolves to the deployment id of the reserved cluster
pub type ReserveReceiver = oneshot::Receiver<Result<String, ClusterError>>;

/// Resolves to the run id whose cluster was released
pub type UnreserveReceiver = oneshot::Receiver<Result<String, ClusterError>>;

pub const DEFAULT_MAX_CLUSTERS: usize = 5;

/// Outcome of loading lease snapshots at startup
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Run ids of leases put back into the pool
    pub restored: Vec<String>,
    /// Run ids whose deployment was gone; their snapshots were deleted
    pub discarded: Vec<String>,
    /// Run ids whose readiness could not be determined; left untouched
    pub skipped: Vec<String>,
    /// Pending teardowns of stale leases
    pub cleanups: Vec<UnreserveReceiver>,
}

struct Inner {
    deployer: Arc<dyn Deployer>,
    snapshots: Arc<dyn SnapshotStore>,
    max_clusters: usize,
    leases: Mutex<Vec<ClusterLease>>,
    metrics: ProfilerMetrics,
    logger: StructuredLogger,
}

/// Handle to the lease pool; clones share the same pool
#[derive(Clone)]
pub struct ClusterManager {
    inner: Arc<Inner>,
}

impl ClusterManager {
    pub fn new(
        deployer: Arc<dyn Deployer>,
        snapshots: Arc<dyn SnapshotStore>,
        max_clusters: usize,
    ) -> Self {
        Self::with_logger(deployer, snapshots, max_clusters, StructuredLogger::new("profiler"))
    }

    pub fn with_logger(
        deployer: Arc<dyn Deployer>,
        snapshots: Arc<dyn SnapshotStore>,
        max_clusters: usize,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                deployer,
                snapshots,
                max_clusters,
                leases: Mutex::new(Vec::new()),
                metrics: ProfilerMetrics::new(),
                logger,
            }),
        }
    }

    pub fn max_clusters(&self) -> usize {
        self.inner.max_clusters
    }

    /// Copy of every lease currently in the pool
    pub async fn leases(&self) -> Vec<ClusterLease> {
        self.inner.leases.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.leases.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn lease(&self, run_id: &str) -> Option<ClusterLease> {
        self.inner
            .leases
            .lock()
            .await
            .iter()
            .find(|l| l.run_id == run_id)
            .cloned()
    }

    /// Reserve a cluster for `run_id`
    ///
    /// A matching AVAILABLE lease is reused when one exists; otherwise a new
    /// deployment is created if the pool has room. Pool exhaustion and a run
    /// that already owns a lease fail immediately; deployment outcomes arrive
    /// on the returned channel.
    pub async fn reserve(
        &self,
        app: &ApplicationConfig,
        shape: &NodeShape,
        run_id: &str,
        log: Arc<RunLog>,
    ) -> Result<ReserveReceiver, ClusterError> {
        let request = DeployRequest {
            template: app.deployment_template.clone(),
            deployment: DeploymentSpec::for_app(app, shape),
            load_tester: app.load_tester.name().to_string(),
            run_id: run_id.to_string(),
        };
        let (tx, rx) = oneshot::channel();

        let mut leases = self.inner.leases.lock().await;
        if leases.iter().any(|l| l.run_id == run_id) {
            return Err(ClusterError::AlreadyReserved(run_id.to_string()));
        }

        let reusable = leases
            .iter_mut()
            .filter(|l| {
                l.state == LeaseState::Available && l.deployment_template == request.template
            })
            .min_by_key(|l| l.created);

        if let Some(lease) = reusable {
            let previous_run_id = std::mem::replace(&mut lease.run_id, run_id.to_string());
            lease.state = LeaseState::Reserved;
            let deployment_id = lease.deployment_id.clone();
            drop(leases);

            log.info(format!(
                "Reusing cluster {} previously leased by {}",
                deployment_id, previous_run_id
            ));
            let manager = self.clone();
            tokio::spawn(async move {
                let result = manager
                    .extend(request, deployment_id, previous_run_id, log)
                    .await;
                let _ = tx.send(result);
            });
            return Ok(rx);
        }

        if leases.len() >= self.inner.max_clusters {
            return Err(ClusterError::MaxClusters);
        }

        leases.push(ClusterLease::deploying(&request.template, run_id));
        self.inner.metrics.set_leases(leases.len());
        drop(leases);

        let manager = self.clone();
        tokio::spawn(async move {
            let result = manager.deploy(request, log).await;
            let _ = tx.send(result);
        });
        Ok(rx)
    }

    /// Tear down the cluster leased by `run_id`
    pub async fn unreserve(&self, run_id: &str, log: Arc<RunLog>) -> UnreserveReceiver {
        self.release(run_id, log, false).await
    }

    /// Load snapshots, drop leases whose deployment is gone and schedule
    /// teardown of leases whose owner did not survive the restart
    pub async fn recover(&self) -> Result<RecoveryReport, ClusterError> {
        let snapshots = self
            .inner
            .snapshots
            .load_all()
            .await
            .map_err(|e| ClusterError::Snapshot(e.to_string()))?;

        let mut report = RecoveryReport::default();
        let mut restored = Vec::new();

        for snapshot in snapshots {
            let lease = match ClusterLease::from_snapshot(snapshot) {
                Ok(lease) => lease,
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed lease snapshot");
                    continue;
                }
            };

            if lease.state == LeaseState::Deploying || lease.deployment_id.is_empty() {
                self.discard(&lease, &mut report).await;
                continue;
            }

            match self
                .inner
                .deployer
                .is_deployment_ready(&lease.deployment_id)
                .await
            {
                Ok(true) => restored.push(lease),
                Ok(false) => self.discard(&lease, &mut report).await,
                Err(e) => {
                    warn!(
                        run_id = %lease.run_id,
                        deployment_id = %lease.deployment_id,
                        error = %e,
                        "Unable to check recovered deployment, leaving snapshot for next start"
                    );
                    report.skipped.push(lease.run_id);
                }
            }
        }

        let stale: Vec<String> = restored
            .iter()
            .filter(|l| l.state.is_stale_after_restart())
            .map(|l| l.run_id.clone())
            .collect();

        {
            let mut leases = self.inner.leases.lock().await;
            for lease in restored {
                if leases.iter().any(|l| l.run_id == lease.run_id) {
                    continue;
                }
                report.restored.push(lease.run_id.clone());
                leases.push(lease);
            }
            if leases.len() > self.inner.max_clusters {
                warn!(
                    leases = leases.len(),
                    max_clusters = self.inner.max_clusters,
                    "Recovered more leases than the pool allows"
                );
            }
            self.inner.metrics.set_leases(leases.len());
        }

        for run_id in stale {
            let log = Arc::new(RunLog::detached(run_id.clone()));
            report.cleanups.push(self.release(&run_id, log, true).await);
        }

        self.inner.logger.log_recovery(
            report.restored.len(),
            report.discarded.len(),
            report.skipped.len(),
        );
        Ok(report)
    }

    async fn discard(&self, lease: &ClusterLease, report: &mut RecoveryReport) {
        debug!(run_id = %lease.run_id, deployment_id = %lease.deployment_id, "Discarding lease snapshot");
        if let Err(e) = self.inner.snapshots.delete(&lease.run_id).await {
            warn!(run_id = %lease.run_id, error = %e, "Unable to delete lease snapshot");
        }
        report.discarded.push(lease.run_id.clone());
    }

    async fn deploy(&self, request: DeployRequest, log: Arc<RunLog>) -> Result<String, ClusterError> {
        let created = self
            .inner
            .deployer
            .create_deployment(
                &request.template,
                &request.deployment,
                &request.load_tester,
                &log,
            )
            .await;

        let deployment_id = match created {
            Ok(id) => id,
            Err(e) => {
                let mut leases = self.inner.leases.lock().await;
                leases.retain(|l| l.run_id != request.run_id);
                self.inner.metrics.set_leases(leases.len());
                drop(leases);

                log.error(format!("Unable to deploy cluster: {}", e));
                return Err(ClusterError::Deploy(e.to_string()));
            }
        };

        let snapshot = self
            .transition(&request.run_id, |lease| {
                lease.deployment_id = deployment_id.clone();
                lease.state = LeaseState::Reserved;
            })
            .await?;
        self.persist(&snapshot, &log).await;

        self.inner
            .logger
            .log_lease_reserved(&request.run_id, &deployment_id, false);
        Ok(deployment_id)
    }

    async fn extend(
        &self,
        request: DeployRequest,
        deployment_id: String,
        previous_run_id: String,
        log: Arc<RunLog>,
    ) -> Result<String, ClusterError> {
        let extended = self
            .inner
            .deployer
            .deploy_extensions(
                &request.template,
                &deployment_id,
                &request.deployment,
                &request.load_tester,
                &log,
            )
            .await;

        if let Err(e) = extended {
            let reason = e.to_string();
            // The failed lease goes back to its previous owner so this run can
            // reserve again even if the teardown below fails
            let snapshot = self
                .transition(&request.run_id, |lease| {
                    lease.run_id = previous_run_id.clone();
                    lease.state = LeaseState::Failed;
                    lease.failure = Some(reason.clone());
                })
                .await?;
            self.persist(&snapshot, &log).await;
            log.error(format!("Unable to extend cluster {}: {}", deployment_id, reason));

            let pending = self.release(&previous_run_id, log.clone(), false).await;
            tokio::spawn(async move {
                if let Ok(Err(e)) = pending.await {
                    error!(error = %e, "Unable to release failed cluster");
                }
            });
            return Err(ClusterError::Deploy(reason));
        }

        let snapshot = self.transition(&request.run_id, |_| {}).await?;
        self.rekey(&previous_run_id, &snapshot, &log).await;

        self.inner
            .logger
            .log_lease_reserved(&request.run_id, &deployment_id, true);
        Ok(deployment_id)
    }

    /// Begin tearing down a lease; `retry` lets recovery restart an
    /// interrupted UNRESERVING
    async fn release(&self, run_id: &str, log: Arc<RunLog>, retry: bool) -> UnreserveReceiver {
        let (tx, rx) = oneshot::channel();

        let snapshot = {
            let mut leases = self.inner.leases.lock().await;
            let Some(lease) = leases.iter_mut().find(|l| l.run_id == run_id) else {
                let _ = tx.send(Err(ClusterError::UnknownRun(run_id.to_string())));
                return rx;
            };

            match lease.state {
                LeaseState::Unreserving if !retry => {
                    let _ = tx.send(Err(ClusterError::AlreadyUnreserved(run_id.to_string())));
                    return rx;
                }
                LeaseState::Deploying => {
                    let _ = tx.send(Err(ClusterError::InvalidState {
                        run_id: run_id.to_string(),
                        state: lease.state.to_string(),
                    }));
                    return rx;
                }
                _ => {}
            }

            lease.state = LeaseState::Unreserving;
            lease.clone()
        };
        self.persist(&snapshot, &log).await;

        let manager = self.clone();
        tokio::spawn(async move {
            let result = manager.teardown(snapshot, log).await;
            let _ = tx.send(result);
        });
        rx
    }

    async fn teardown(&self, lease: ClusterLease, log: Arc<RunLog>) -> Result<String, ClusterError> {
        let run_id = lease.run_id.clone();
        let deleted = self
            .inner
            .deployer
            .delete_deployment(&lease.deployment_id, &log)
            .await;

        if let Err(e) = deleted {
            let reason = e.to_string();
            let snapshot = self
                .transition(&run_id, |l| l.failure = Some(reason.clone()))
                .await?;
            self.persist(&snapshot, &log).await;

            log.error(format!(
                "Unable to delete cluster {}: {}",
                lease.deployment_id, reason
            ));
            self.inner
                .logger
                .log_lease_released(&run_id, &lease.deployment_id, Some(&reason));
            return Err(ClusterError::Teardown {
                deployment_id: lease.deployment_id,
                reason,
            });
        }

        if let Err(e) = self.inner.snapshots.delete(&run_id).await {
            log.warn(format!("Unable to delete cluster snapshot: {}", e));
        }
        {
            let mut leases = self.inner.leases.lock().await;
            leases.retain(|l| l.run_id != run_id);
            self.inner.metrics.set_leases(leases.len());
        }

        self.inner
            .logger
            .log_lease_released(&run_id, &lease.deployment_id, None);
        Ok(run_id)
    }

    /// Apply `update` to the lease owned by `run_id` and return a copy
    async fn transition<F>(&self, run_id: &str, update: F) -> Result<ClusterLease, ClusterError>
    where
        F: FnOnce(&mut ClusterLease),
    {
        let mut leases = self.inner.leases.lock().await;
        let lease = leases
            .iter_mut()
            .find(|l| l.run_id == run_id)
            .ok_or_else(|| ClusterError::UnknownRun(run_id.to_string()))?;
        update(lease);
        Ok(lease.clone())
    }

    /// Write the snapshot of `lease` under its run id
    async fn persist(&self, lease: &ClusterLease, log: &RunLog) {
        let stored = match lease.to_snapshot() {
            Ok(snapshot) => self.inner.snapshots.store(&lease.run_id, snapshot).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = stored {
            log.error(format!("Unable to persist cluster snapshot: {}", e));
        }
    }

    /// Move a reused lease's snapshot from its previous owner to the new one
    async fn rekey(&self, previous_run_id: &str, lease: &ClusterLease, log: &RunLog) {
        if previous_run_id != lease.run_id {
            if let Err(e) = self.inner.snapshots.delete(previous_run_id).await {
                log.warn(format!(
                    "Unable to delete snapshot of previous owner {}: {}",
                    previous_run_id, e
                ));
            }
        }
        self.persist(lease, log).await;
    }
}

struct DeployRequest {
    template: String,
    deployment: DeploymentSpec,
    load_tester: String,
    run_id: String,
}
