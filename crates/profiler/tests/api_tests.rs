//! Integration tests for the profiler API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use profiler::api::{create_router, AppState, LogsResponse, SubmitResponse};
use profiler_lib::{
    cluster::RecoveryReport,
    health::{components, HealthRegistry},
    models::{
        ApplicationConfig, LoadTester, Slo, SlowCookerAppLoad, SlowCookerCalibrate, SlowCookerSpec,
    },
    observability::{ProfilerMetrics, StructuredLogger},
    runs::RunFactory,
    store::MemoryDocumentStore,
    worker::{Dispatcher, JobQueue, JobRegistry, JobState, JobSummary},
};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn app() -> ApplicationConfig {
    ApplicationConfig {
        name: "shop".to_string(),
        service_names: vec!["web".to_string()],
        deployment_template: "small".to_string(),
        load_tester: LoadTester::SlowCooker(SlowCookerSpec {
            name: "slow-cooker".to_string(),
            app_load: SlowCookerAppLoad {
                url: "http://web:8080/".to_string(),
                method: "GET".to_string(),
                body: None,
                qps: 10,
                concurrency: 4,
                load_time: "60s".to_string(),
            },
            calibrate: SlowCookerCalibrate::default(),
        }),
        slo: Slo {
            metric: "latency".to_string(),
            value: 100.0,
            kind: "99".to_string(),
        },
        task_definitions: vec![],
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    _logs: TempDir,
}

fn setup_test_app() -> TestApp {
    let logs = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(
        JobRegistry::new(),
        JobQueue::default(),
        Some(logs.path().to_path_buf()),
        StructuredLogger::new("test"),
    );
    let factory = RunFactory::new(Arc::new(MemoryDocumentStore::new().with_application(app())));
    let state = Arc::new(AppState::new(
        dispatcher,
        Arc::new(factory),
        HealthRegistry::new(),
    ));
    TestApp {
        router: create_router(state.clone()),
        state,
        _logs: logs,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn submit(app: &TestApp, body: &str) -> String {
    let response = app
        .router
        .clone()
        .oneshot(post("/profilers/deployments/shop", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    body_json::<SubmitResponse>(response).await.run_id
}

#[tokio::test]
async fn test_submit_returns_run_id_and_queues_job() {
    let app = setup_test_app();

    let run_id = submit(&app, r#"{"type": "calibration"}"#).await;

    let job = app.state.dispatcher.registry().get(&run_id).unwrap();
    assert_eq!(job.state().await, JobState::Queued);
    assert_eq!(job.app.name, "shop");
}

#[tokio::test]
async fn test_submit_rejects_unparseable_body() {
    let app = setup_test_app();

    for body in ["not json", r#"{"type": "sizing"}"#, r#"{"step": 5}"#] {
        let response = app
            .router
            .clone()
            .oneshot(post("/profilers/deployments/shop", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {}", body);
    }
    assert!(app.state.dispatcher.registry().is_empty());
}

#[tokio::test]
async fn test_submit_rejects_invalid_sweep() {
    let app = setup_test_app();

    let response = app
        .router
        .clone()
        .oneshot(post(
            "/profilers/deployments/shop",
            r#"{"type": "benchmark", "step": 0}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("step"));
}

#[tokio::test]
async fn test_submit_for_unknown_app_is_a_server_error() {
    let app = setup_test_app();

    let response = app
        .router
        .clone()
        .oneshot(post("/profilers/deployments/missing", r#"{"type": "capture"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_run_status_and_listing() {
    let app = setup_test_app();
    let first = submit(&app, r#"{"type": "calibration"}"#).await;
    let second = submit(&app, r#"{"type": "capture", "loadTime": "2m"}"#).await;

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/profilers/runs/{}", second)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary: JobSummary = body_json(response).await;
    assert_eq!(summary.run_id, second);
    assert_eq!(summary.state, JobState::Queued);

    let response = app
        .router
        .clone()
        .oneshot(get("/profilers/runs?state=queued"))
        .await
        .unwrap();
    let runs: Vec<JobSummary> = body_json(response).await;
    let ids: Vec<&str> = runs.iter().map(|r| r.run_id.as_str()).collect();
    assert_eq!(ids, vec![first.as_str(), second.as_str()]);

    let response = app
        .router
        .clone()
        .oneshot(get("/profilers/runs?state=RUNNING"))
        .await
        .unwrap();
    let runs: Vec<JobSummary> = body_json(response).await;
    assert!(runs.is_empty());

    let response = app
        .router
        .clone()
        .oneshot(get("/profilers/runs?state=sleeping"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let app = setup_test_app();

    for uri in ["/profilers/runs/nope", "/profilers/runs/nope/logs"] {
        let response = app.router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn test_run_logs_return_lines_and_state() {
    let app = setup_test_app();
    let run_id = submit(&app, r#"{"type": "calibration"}"#).await;
    let job = app.state.dispatcher.registry().get(&run_id).unwrap();
    job.log.open().unwrap();
    job.log.info("Calibrating shop");
    job.log.warn("Slow response");

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/profilers/runs/{}/logs", run_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let logs: LogsResponse = body_json(response).await;
    assert!(!logs.error);
    assert_eq!(logs.state, JobState::Queued);
    assert_eq!(logs.deployment, None);
    assert_eq!(logs.data.len(), 2);
    assert!(logs.data[0].contains("Calibrating shop"));
    assert!(logs.data[1].contains("Slow response"));
}

#[tokio::test]
async fn test_readyz_follows_recovery() {
    let app = setup_test_app();

    let response = app.router.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    app.state.health.mark_recovered(&RecoveryReport::default()).await;

    let response = app.router.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let readiness: serde_json::Value = body_json(response).await;
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_healthz_reports_components() {
    let app = setup_test_app();
    app.state
        .health
        .set_degraded(components::WORKER_POOL, "Run waiting for a cluster")
        .await;

    let response = app.router.clone().oneshot(get("/healthz")).await.unwrap();
    // Degraded still returns 200 (operational)
    assert_eq!(response.status(), StatusCode::OK);
    let health: serde_json::Value = body_json(response).await;
    assert_eq!(health["status"], "degraded");
    assert!(health["components"]["worker_pool"].is_object());

    app.state
        .health
        .set_unhealthy(components::STORE, "Document store unreachable")
        .await;
    let response = app.router.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let app = setup_test_app();
    submit(&app, r#"{"type": "calibration"}"#).await;
    ProfilerMetrics::new().observe_poll_duration("deployer", 0.5);

    let response = app.router.clone().oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();
    assert!(metrics_text.contains("profiler_jobs_admitted_total"));
    assert!(metrics_text.contains("profiler_queue_depth"));
    assert!(metrics_text.contains("profiler_poll_duration_seconds_bucket"));
}
