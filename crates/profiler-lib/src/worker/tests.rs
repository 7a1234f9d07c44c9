//! Tests for the job queue, dispatcher and worker loop

use super::*;
use crate::clients::{
    AgentClientConfig, BenchmarkAgentClient, BenchmarkControllerClient, ControllerClientConfig,
    DemoUiClient, Deployer, HttpClient, ServiceAddress, SlowCookerClient, SlowCookerClientConfig,
};
use crate::cluster::ClusterManager;
use crate::error::{ClientResult, RunError};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{DeploymentSpec, LoadTester, LocustSpec, Slo};
use crate::runlog::RunLog;
use crate::runs::{RunContext, RunKind};
use crate::store::{MemoryDocumentStore, MemorySnapshotStore};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct CountingDeployer {
    creates: AtomicUsize,
    deletes: AtomicUsize,
}

#[async_trait]
impl Deployer for CountingDeployer {
    async fn create_deployment(
        &self,
        _template: &str,
        _deployment: &DeploymentSpec,
        _load_tester: &str,
        _log: &RunLog,
    ) -> ClientResult<String> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(format!("dep-{}", n))
    }

    async fn deploy_extensions(
        &self,
        _template: &str,
        _deployment_id: &str,
        _deployment: &DeploymentSpec,
        _load_tester: &str,
        _log: &RunLog,
    ) -> ClientResult<()> {
        Ok(())
    }

    async fn delete_deployment(&self, _deployment_id: &str, _log: &RunLog) -> ClientResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_deployment_ready(&self, _deployment_id: &str) -> ClientResult<bool> {
        Ok(true)
    }

    async fn get_service_url(&self, _deployment_id: &str, service: &str) -> ClientResult<String> {
        Ok(format!("http://{}", service))
    }

    async fn get_colocated_service_url(
        &self,
        _deployment_id: &str,
        _colocated_service: &str,
        service_prefix: &str,
    ) -> ClientResult<String> {
        Ok(format!("http://{}", service_prefix))
    }

    async fn get_service_address(
        &self,
        _deployment_id: &str,
        service: &str,
    ) -> ClientResult<ServiceAddress> {
        Ok(ServiceAddress {
            host: service.to_string(),
            port: 80,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Succeed,
    Fail,
    Panic,
}

struct ScriptedRun {
    outcome: Outcome,
    deployments: Mutex<Vec<String>>,
}

impl ScriptedRun {
    fn new(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            deployments: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ProfileRun for ScriptedRun {
    fn kind(&self) -> RunKind {
        RunKind::Calibration
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        deployment_id: &str,
        log: &RunLog,
    ) -> Result<(), RunError> {
        self.deployments
            .lock()
            .unwrap()
            .push(deployment_id.to_string());
        log.info("scripted run");
        match self.outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Fail => Err(RunError::Invalid("scripted failure".to_string())),
            Outcome::Panic => panic!("scripted panic"),
        }
    }
}

fn app() -> ApplicationConfig {
    ApplicationConfig {
        name: "shop".to_string(),
        service_names: vec!["web".to_string()],
        deployment_template: "small".to_string(),
        load_tester: LoadTester::Locust(LocustSpec {
            name: "locust".to_string(),
            file: "load.py".to_string(),
        }),
        slo: Slo {
            metric: "latency".to_string(),
            value: 100.0,
            kind: "99".to_string(),
        },
        task_definitions: vec![],
    }
}

fn context(deployer: Arc<CountingDeployer>) -> Arc<RunContext> {
    let http = HttpClient::with_default_timeout().unwrap();
    Arc::new(RunContext {
        deployer,
        agent: Arc::new(BenchmarkAgentClient::new(
            AgentClientConfig::default(),
            http.clone(),
        )),
        controller: Arc::new(BenchmarkControllerClient::new(
            ControllerClientConfig::default(),
            http.clone(),
        )),
        slow_cooker: Arc::new(SlowCookerClient::new(
            SlowCookerClientConfig::default(),
            http.clone(),
        )),
        demo_ui: Arc::new(DemoUiClient::new(http)),
        metrics: Arc::new(MemoryDocumentStore::new()),
        write_results: true,
    })
}

struct Harness {
    pool: Arc<WorkerPool>,
    clusters: ClusterManager,
    deployer: Arc<CountingDeployer>,
    dispatcher: Dispatcher,
    health: HealthRegistry,
}

fn harness(max_clusters: usize, workers: usize) -> Harness {
    let deployer = Arc::new(CountingDeployer::default());
    let clusters = ClusterManager::new(
        deployer.clone(),
        Arc::new(MemorySnapshotStore::new()),
        max_clusters,
    );
    let queue = JobQueue::default();
    let logger = StructuredLogger::new("test");
    let health = HealthRegistry::new();
    let pool = Arc::new(
        WorkerPool::new(
            WorkerPoolConfig {
                workers,
                ..Default::default()
            },
            queue.clone(),
            clusters.clone(),
            context(deployer.clone()),
            logger.clone(),
        )
        .with_health(health.clone()),
    );
    let dispatcher = Dispatcher::new(JobRegistry::new(), queue, None, logger);
    Harness {
        pool,
        clusters,
        deployer,
        dispatcher,
        health,
    }
}

fn job(run: Arc<dyn ProfileRun>) -> Arc<Job> {
    Arc::new(Job::new(app(), NodeShape::default(), run, None))
}

#[tokio::test]
async fn test_successful_run_finishes_and_releases_cluster() {
    let h = harness(5, 1);
    let run = ScriptedRun::new(Outcome::Succeed);
    let job = job(run.clone());

    h.pool.process(&job).await;

    assert_eq!(job.state().await, JobState::Finished);
    assert_eq!(job.deployment_id().await.as_deref(), Some("dep-0"));
    assert_eq!(run.deployments.lock().unwrap().clone(), vec!["dep-0"]);
    assert!(job.error().await.is_none());
    assert!(h.clusters.is_empty().await);
    assert_eq!(h.deployer.deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_run_records_error_and_releases_cluster() {
    let h = harness(5, 1);
    let job = job(ScriptedRun::new(Outcome::Fail));

    h.pool.process(&job).await;

    assert_eq!(job.state().await, JobState::Failed);
    assert!(job.error().await.unwrap().contains("scripted failure"));
    assert!(h.clusters.is_empty().await);
    assert_eq!(h.deployer.deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panicking_run_is_recorded_as_failure() {
    let h = harness(5, 1);
    let job = job(ScriptedRun::new(Outcome::Panic));

    h.pool.process(&job).await;

    assert_eq!(job.state().await, JobState::Failed);
    assert!(job.error().await.unwrap().starts_with("run task aborted"));
    assert!(h.clusters.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_reservation_backs_off_until_a_cluster_frees_up() {
    let h = harness(1, 1);
    let blocker_log = Arc::new(RunLog::detached("blocker"));
    let blocker = h
        .clusters
        .reserve(&app(), &NodeShape::default(), "blocker", blocker_log.clone())
        .await
        .unwrap()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blocker, "dep-0");

    let run = ScriptedRun::new(Outcome::Succeed);
    let job = job(run.clone());
    let pool = h.pool.clone();
    let waiting = job.clone();
    let handle = tokio::spawn(async move { pool.process(&waiting).await });

    // Attempts at 0s and 60s both hit the cluster limit
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(job.state().await, JobState::Reserving);
    assert!(run.deployments.lock().unwrap().is_empty());
    let health = h.health.health().await;
    assert_eq!(
        health.components[components::WORKER_POOL].status,
        ComponentStatus::Degraded
    );

    h.clusters
        .unreserve("blocker", blocker_log)
        .await
        .await
        .unwrap()
        .unwrap();

    handle.await.unwrap();
    assert_eq!(job.state().await, JobState::Finished);
    assert_eq!(job.deployment_id().await.as_deref(), Some("dep-1"));
    assert!(h.clusters.is_empty().await);
    let health = h.health.health().await;
    assert_eq!(
        health.components[components::WORKER_POOL].status,
        ComponentStatus::Healthy
    );
}

#[tokio::test]
async fn test_dispatcher_registers_and_queues_job() {
    let h = harness(5, 1);

    let job = h
        .dispatcher
        .admit(app(), NodeShape::default(), ScriptedRun::new(Outcome::Succeed))
        .await
        .unwrap();

    assert_eq!(job.state().await, JobState::Queued);
    assert_eq!(job.kind(), RunKind::Calibration);
    assert!(h.dispatcher.registry().get(&job.id).is_some());

    let summaries = h.dispatcher.registry().list(Some(JobState::Queued)).await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].run_id, job.id);
    assert!(h
        .dispatcher
        .registry()
        .list(Some(JobState::Running))
        .await
        .is_empty());
}

#[tokio::test]
async fn test_dispatcher_leaves_no_job_behind_when_queue_is_closed() {
    let queue = JobQueue::default();
    let dispatcher = Dispatcher::new(
        JobRegistry::new(),
        queue.clone(),
        None,
        StructuredLogger::new("test"),
    );
    queue.close().await;

    let result = dispatcher
        .admit(app(), NodeShape::default(), ScriptedRun::new(Outcome::Succeed))
        .await;

    assert!(matches!(result, Err(QueueError::Closed)));
    assert!(dispatcher.registry().is_empty());
    assert!(dispatcher.registry().list(None).await.is_empty());
}

#[tokio::test]
async fn test_queue_hands_out_jobs_in_submission_order() {
    let queue = JobQueue::new(10);
    let jobs: Vec<Arc<Job>> = (0..3)
        .map(|_| job(ScriptedRun::new(Outcome::Succeed)))
        .collect();

    for job in &jobs {
        queue.submit(job.clone()).await.unwrap();
    }
    assert_eq!(queue.depth(), 3);

    for expected in &jobs {
        let next = queue.next().await.unwrap();
        assert_eq!(next.id, expected.id);
    }
    assert_eq!(queue.depth(), 0);
}

#[tokio::test]
async fn test_spawned_workers_drain_the_queue() {
    let h = harness(5, 2);
    let handles = h.pool.clone().spawn();
    assert_eq!(handles.len(), 2);

    let mut jobs = Vec::new();
    for _ in 0..3 {
        jobs.push(
            h.dispatcher
                .admit(app(), NodeShape::default(), ScriptedRun::new(Outcome::Succeed))
                .await
                .unwrap(),
        );
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let finished = h.dispatcher.registry().list(Some(JobState::Finished)).await;
            if finished.len() == jobs.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(h.deployer.creates.load(Ordering::SeqCst), 3);
    assert!(h.clusters.is_empty().await);
    for handle in handles {
        handle.abort();
    }
}
