//! The HTTP surface: the ingress webhook (spec.md §6, `POST /webhook/ci`)
//! and the administrative surface (`/admin/...`), served from the one
//! `axum::Router`, matching the teacher's `gator-cli::serve_cmd` shape
//! (a `build_router(pool)` function plus a `run_serve` entry point).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use patchwright_core::ingress;
use patchwright_core::PipelineConfig;
use patchwright_db::models::{Build, BuildStatus, StageKind, Task, TaskStatus};
use patchwright_db::queries::{builds, tasks};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<PipelineConfig>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/ci", post(webhook_ci))
        .route("/admin/status", get(admin_status))
        .route("/admin/tasks", get(admin_list_tasks))
        .route("/admin/tasks/{id}", get(admin_get_task))
        .route("/admin/tasks/{id}/retry", post(admin_retry_task))
        .route("/admin/builds", get(admin_list_builds))
        .route("/admin/builds/{id}", get(admin_get_build))
        .route("/admin/builds/{id}/tasks", get(admin_get_build_tasks))
        .route("/admin/builds/{id}/retry", post(admin_retry_build))
        .route("/admin/queue/stats", get(admin_queue_stats))
        .route("/admin/health", get(admin_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_serve(pool: PgPool, config: PipelineConfig, bind: &str, port: u16) -> Result<()> {
    let state = AppState {
        pool,
        config: Arc::new(config),
    };
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("patchwright serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("patchwright serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Ingress webhook
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    job: String,
    build_number: i64,
    branch: String,
    repo_url: String,
    commit_sha: String,
    #[serde(default)]
    build_logs: Option<String>,
}

#[derive(Debug, Serialize)]
struct WebhookAccepted {
    build_id: i64,
}

/// `POST /webhook/ci` (spec.md §6): validates the payload, verifies the
/// optional HMAC signature and replay-window timestamp, and inserts a
/// `Build` plus its first (`plan`) task.
async fn webhook_ci(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> axum::response::Response {
    if state.config.signature_required {
        match verify_signature(&state.config, &headers, &body) {
            Ok(()) => {}
            Err(resp) => return resp,
        }
    }

    if let Some(resp) = verify_timestamp(&state.config, &headers) {
        return resp;
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            return AppError::new(StatusCode::BAD_REQUEST, format!("malformed JSON body: {e}"))
                .into_response();
        }
    };

    if let Err(e) = validate_payload(&payload, state.config.max_log_bytes) {
        return AppError::new(StatusCode::BAD_REQUEST, e).into_response();
    }

    let ingestion_payload = serde_json::json!({
        "job": payload.job,
        "build_number": payload.build_number,
        "branch": payload.branch,
        "repo_url": payload.repo_url,
        "commit_sha": payload.commit_sha,
    });

    let inserted = builds::insert(
        &state.pool,
        &payload.job,
        payload.build_number,
        &payload.branch,
        &payload.repo_url,
        &payload.commit_sha,
        &ingestion_payload,
    )
    .await;

    let build = match inserted {
        Ok(Some(build)) => build,
        Ok(None) => {
            return AppError::new(
                StatusCode::CONFLICT,
                format!(
                    "build already ingested for job={} build_number={}",
                    payload.job, payload.build_number
                ),
            )
            .into_response();
        }
        Err(e) => return AppError::internal(e).into_response(),
    };

    let task_payload = serde_json::json!({
        "repo_url": payload.repo_url,
        "branch": payload.branch,
        "commit_sha": payload.commit_sha,
        "build_logs": payload.build_logs.unwrap_or_default(),
    });

    if let Err(e) = tasks::enqueue(
        &state.pool,
        build.id,
        StageKind::Plan,
        &task_payload,
        state.config.default_max_attempts,
    )
    .await
    {
        return AppError::internal(e).into_response();
    }

    (StatusCode::OK, Json(WebhookAccepted { build_id: build.id })).into_response()
}

fn validate_payload(payload: &WebhookPayload, max_log_bytes: usize) -> Result<(), String> {
    ingress::validate_job(&payload.job).map_err(|e| e.to_string())?;
    ingress::validate_build_number(payload.build_number).map_err(|e| e.to_string())?;
    ingress::validate_branch(&payload.branch).map_err(|e| e.to_string())?;
    ingress::validate_repo_url(&payload.repo_url).map_err(|e| e.to_string())?;
    ingress::validate_commit_sha(&payload.commit_sha).map_err(|e| e.to_string())?;
    ingress::validate_build_logs(payload.build_logs.as_deref(), max_log_bytes)
        .map_err(|e| e.to_string())?;
    Ok(())
}

fn verify_signature(
    config: &PipelineConfig,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), axum::response::Response> {
    let header_value = headers
        .get("X-CI-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::new(StatusCode::UNAUTHORIZED, "missing X-CI-Signature header")
                .into_response()
        })?;

    let (algorithm, signature) = ingress::parse_signature_header(header_value).ok_or_else(|| {
        AppError::new(
            StatusCode::UNAUTHORIZED,
            "X-CI-Signature header is not in a recognized sha256=/sha1= format",
        )
        .into_response()
    })?;

    let secret = config.signature_secret.as_bytes();
    if !ingress::verify_signature(secret, body, &algorithm, &signature) {
        return Err(
            AppError::new(StatusCode::UNAUTHORIZED, "signature verification failed")
                .into_response(),
        );
    }

    Ok(())
}

fn verify_timestamp(config: &PipelineConfig, headers: &HeaderMap) -> Option<axum::response::Response> {
    let Some(header_value) = headers.get("X-CI-Timestamp").and_then(|v| v.to_str().ok()) else {
        return None;
    };

    let Ok(timestamp) = header_value.parse::<i64>() else {
        return Some(
            AppError::new(StatusCode::BAD_REQUEST, "X-CI-Timestamp header is not a unix timestamp")
                .into_response(),
        );
    };

    let Some(timestamp) = DateTime::<Utc>::from_timestamp(timestamp, 0) else {
        return Some(
            AppError::new(StatusCode::BAD_REQUEST, "X-CI-Timestamp header is out of range")
                .into_response(),
        );
    };

    if !ingress::validate_timestamp(timestamp, Utc::now(), config.signature_max_skew_seconds) {
        return Some(
            AppError::new(StatusCode::BAD_REQUEST, "X-CI-Timestamp header is outside the allowed skew")
                .into_response(),
        );
    }

    None
}

// ---------------------------------------------------------------------------
// Admin surface
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    page: i64,
    #[serde(default = "default_page_size")]
    size: i64,
    status: Option<String>,
}

fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    tasks_by_status: tasks::TaskStatusCounts,
    tasks_by_kind: Vec<(StageKind, i64)>,
    builds_by_status: builds::BuildStatusCounts,
    pool_size: u32,
    pool_idle: usize,
    timestamp: DateTime<Utc>,
}

/// `GET /admin/status` (spec.md §6): queue counts by status and by stage
/// kind, build counts by state, connection-pool statistics, timestamp.
async fn admin_status(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let tasks_by_status = tasks::count_by_status(&state.pool).await.map_err(AppError::internal)?;
    let tasks_by_kind = tasks::count_by_kind(&state.pool).await.map_err(AppError::internal)?;
    let builds_by_status = builds::count_by_status(&state.pool).await.map_err(AppError::internal)?;

    Ok(Json(StatusResponse {
        tasks_by_status,
        tasks_by_kind,
        builds_by_status,
        pool_size: state.pool.size(),
        pool_idle: state.pool.num_idle(),
        timestamp: Utc::now(),
    })
    .into_response())
}

async fn admin_list_tasks(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<axum::response::Response, AppError> {
    let status = q
        .status
        .as_deref()
        .map(|s| s.parse::<TaskStatus>())
        .transpose()
        .map_err(|e| AppError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    let result: Vec<Task> = tasks::list(&state.pool, status, q.page, q.size)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(result).into_response())
}

async fn admin_get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<axum::response::Response, AppError> {
    let task = tasks::find(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    Ok(Json(task).into_response())
}

#[derive(Debug, Serialize)]
struct RetryResponse {
    retried: bool,
}

/// `POST /admin/tasks/{id}/retry` (spec.md §6, §4.2's sanctioned manual
/// override): resets a terminally `failed` task to `pending`, attempt 0.
async fn admin_retry_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<axum::response::Response, AppError> {
    let retried = tasks::retry_failed_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(RetryResponse { retried }).into_response())
}

async fn admin_list_builds(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<axum::response::Response, AppError> {
    let status = q
        .status
        .as_deref()
        .map(|s| s.parse::<BuildStatus>())
        .transpose()
        .map_err(|e| AppError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    let result: Vec<Build> = builds::list(&state.pool, status, q.page, q.size)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(result).into_response())
}

async fn admin_get_build(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<axum::response::Response, AppError> {
    let build = builds::find(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("build {id} not found")))?;

    Ok(Json(build).into_response())
}

async fn admin_get_build_tasks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<axum::response::Response, AppError> {
    builds::find(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("build {id} not found")))?;

    let result = tasks::list_for_build(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(result).into_response())
}

#[derive(Debug, Serialize)]
struct BuildRetryResponse {
    requeued: u64,
}

/// `POST /admin/builds/{id}/retry` (spec.md §6): requeues all `failed`
/// tasks of the build and reopens it to `processing` if it had terminally
/// failed.
async fn admin_retry_build(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<axum::response::Response, AppError> {
    builds::find(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("build {id} not found")))?;

    let requeued = tasks::retry_all_failed_for_build(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    if requeued > 0 {
        builds::reopen(&state.pool, id).await.map_err(AppError::internal)?;
    }

    Ok(Json(BuildRetryResponse { requeued }).into_response())
}

async fn admin_queue_stats(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let tasks_by_status = tasks::count_by_status(&state.pool).await.map_err(AppError::internal)?;
    let tasks_by_kind = tasks::count_by_kind(&state.pool).await.map_err(AppError::internal)?;

    Ok(Json(serde_json::json!({
        "by_status": tasks_by_status,
        "by_kind": tasks_by_kind,
    }))
    .into_response())
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum HealthStatus {
    Up,
    Degraded,
    Down,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: HealthStatus,
    database: bool,
    pending_tasks: i64,
}

/// `GET /admin/health` (spec.md §6): composite health -- database up,
/// pending tasks below threshold -> `up`, else `degraded` or `down`.
async fn admin_health(State(state): State<AppState>) -> axum::response::Response {
    let counts = tasks::count_by_status(&state.pool).await;

    let (database, pending, status) = match counts {
        Ok(counts) => {
            let pending = counts.pending;
            let status = if pending < 100 {
                HealthStatus::Up
            } else {
                HealthStatus::Degraded
            };
            (true, pending, status)
        }
        Err(e) => {
            warn!(error = %e, "health check failed to query database");
            (false, 0, HealthStatus::Down)
        }
    };

    let http_status = match status {
        HealthStatus::Up => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        http_status,
        Json(HealthResponse {
            status,
            database,
            pending_tasks: pending,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use patchwright_test_utils::{create_test_db, drop_test_db};

    use super::*;

    async fn state(pool: PgPool) -> AppState {
        AppState {
            pool,
            config: Arc::new(PipelineConfig::default()),
        }
    }

    #[tokio::test]
    async fn webhook_rejects_malformed_commit_sha() {
        let (pool, db_name) = create_test_db().await;
        let app = build_router(state(pool.clone()).await);

        let body = serde_json::json!({
            "job": "svc-api",
            "build_number": 1,
            "branch": "main",
            "repo_url": "https://git.example.com/x/svc.git",
            "commit_sha": "abc",
        });

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/ci")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn webhook_rejects_ssrf_host() {
        let (pool, db_name) = create_test_db().await;
        let app = build_router(state(pool.clone()).await);

        let body = serde_json::json!({
            "job": "svc-api",
            "build_number": 1,
            "branch": "main",
            "repo_url": "https://127.0.0.1/x/svc.git",
            "commit_sha": "abc1234",
        });

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/ci")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn webhook_accepts_valid_payload_and_enqueues_plan_task() {
        let (pool, db_name) = create_test_db().await;
        let app = build_router(state(pool.clone()).await);

        let body = serde_json::json!({
            "job": "svc-api",
            "build_number": 42,
            "branch": "main",
            "repo_url": "https://git.example.com/x/svc.git",
            "commit_sha": "abc1234",
        });

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/ci")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);

        let plan_tasks = tasks::list(&pool, None, 0, 10).await.unwrap();
        assert_eq!(plan_tasks.len(), 1);
        assert_eq!(plan_tasks[0].kind, StageKind::Plan);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn webhook_rejects_duplicate_build_with_409() {
        let (pool, db_name) = create_test_db().await;
        let app = build_router(state(pool.clone()).await);

        let body = serde_json::json!({
            "job": "svc-api",
            "build_number": 42,
            "branch": "main",
            "repo_url": "https://git.example.com/x/svc.git",
            "commit_sha": "abc1234",
        });

        for expected in [StatusCode::OK, StatusCode::CONFLICT] {
            let resp = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/webhook/ci")
                        .header("content-type", "application/json")
                        .body(Body::from(body.to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), expected);
        }

        let build_count = builds::list(&pool, None, 0, 10).await.unwrap().len();
        assert_eq!(build_count, 1);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn webhook_requires_signature_when_configured() {
        let (pool, db_name) = create_test_db().await;
        let mut config = PipelineConfig::default();
        config.signature_required = true;
        config.signature_secret = "shhh".to_string();
        let app = build_router(AppState {
            pool: pool.clone(),
            config: Arc::new(config),
        });

        let body = serde_json::json!({
            "job": "svc-api",
            "build_number": 1,
            "branch": "main",
            "repo_url": "https://git.example.com/x/svc.git",
            "commit_sha": "abc1234",
        });

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/ci")
                    .header("content-type", "application/json")
                    .header("X-CI-Signature", "sha256=deadbeef")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn admin_health_reports_up_when_queue_is_small() {
        let (pool, db_name) = create_test_db().await;
        let app = build_router(state(pool.clone()).await);

        let resp = app
            .oneshot(Request::builder().uri("/admin/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn admin_get_task_not_found() {
        let (pool, db_name) = create_test_db().await;
        let app = build_router(state(pool.clone()).await);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/admin/tasks/999999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
