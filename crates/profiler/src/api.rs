//! HTTP ingress: run submission, job status and logs, health checks and metrics

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use profiler_lib::{
    health::{ComponentStatus, HealthRegistry},
    runs::{ProfileRequest, RunFactory},
    worker::{Dispatcher, JobState, JobSummary},
    QueueError, RunError, StoreError,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub factory: Arc<RunFactory>,
    pub health: HealthRegistry,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, factory: Arc<RunFactory>, health: HealthRegistry) -> Self {
        Self {
            dispatcher,
            factory,
            health,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<RunError> for ApiError {
    fn from(e: RunError) -> Self {
        match e {
            RunError::Invalid(_) | RunError::NotImplemented(_) => ApiError::BadRequest(e.to_string()),
            RunError::Store(StoreError::InvalidKey(_)) => ApiError::BadRequest(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        ApiError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub run_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub state: Option<String>,
}

/// Body of a log query
#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub error: bool,
    pub data: Vec<String>,
    pub state: JobState,
    #[serde(default)]
    pub deployment: Option<String>,
}

async fn submit_run(
    State(state): State<Arc<AppState>>,
    Path(app_name): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let request: ProfileRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Unable to parse profile request: {}", e)))?;
    let kind = request.kind();

    let prepared = state.factory.build(&app_name, request).await.map_err(|e| {
        warn!(app = %app_name, kind = kind.as_str(), error = %e, "Unable to build run");
        ApiError::from(e)
    })?;
    let job = state
        .dispatcher
        .admit(prepared.app, prepared.node_shape, prepared.run)
        .await?;

    info!(run_id = %job.id, app = %app_name, kind = kind.as_str(), "Run admitted");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            run_id: job.id.clone(),
        }),
    ))
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<JobSummary>>, ApiError> {
    let filter = query
        .state
        .as_deref()
        .map(str::parse::<JobState>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    Ok(Json(state.dispatcher.registry().list(filter).await))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<JobSummary>, ApiError> {
    let job = state
        .dispatcher
        .registry()
        .get(&run_id)
        .ok_or_else(|| ApiError::NotFound(format!("Unable to find run {}", run_id)))?;
    Ok(Json(job.summary().await))
}

async fn get_run_logs(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<LogsResponse>, ApiError> {
    let job = state
        .dispatcher
        .registry()
        .get(&run_id)
        .ok_or_else(|| ApiError::NotFound(format!("Unable to find run {}", run_id)))?;
    let lines = job
        .log
        .lines()
        .map_err(|e| ApiError::Internal(format!("Unable to read log of run {}: {}", run_id, e)))?;
    let summary = job.summary().await;

    Ok(Json(LogsResponse {
        error: summary.state == JobState::Failed,
        data: lines,
        state: summary.state,
        deployment: summary.deployment_id,
    }))
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once leases are recovered
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return ApiError::Internal(format!("Unable to encode metrics: {}", e)).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/profilers/deployments/:app_name", post(submit_run))
        .route("/profilers/runs", get(list_runs))
        .route("/profilers/runs/:run_id", get(get_run))
        .route("/profilers/runs/:run_id/logs", get(get_run_logs))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
