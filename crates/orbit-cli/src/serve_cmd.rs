//! `orbit serve`: the orchestrator's HTTP API plus its background loops
//! (queue drainer, health monitor, stale-agent reaper).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use orbit_core::balancer::LoadBalancer;
use orbit_core::dispatch::HttpDispatchClient;
use orbit_core::metrics::MetricsCollector;
use orbit_core::orchestrator::{Orchestrator, OrchestratorConfig};
use orbit_db::models::LoadBalancingStrategy;
use orbit_db::queries::agents as agent_db;

use crate::config::OrbitConfig;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl From<orbit_core::error::TaskError> for AppError {
    fn from(err: orbit_core::error::TaskError) -> Self {
        use orbit_core::error::TaskError;
        let status = match &err {
            TaskError::UnknownTaskType(_) | TaskError::ValidationError(_) => {
                StatusCode::BAD_REQUEST
            }
            TaskError::StateStoreError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::CONFLICT,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    task_id: Option<String>,
    task_type: String,
    #[serde(default)]
    input: serde_json::Value,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_max_retries")]
    max_retries: i32,
}

fn default_max_retries() -> i32 {
    3
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    task_id: String,
    status: String,
    estimated_completion_ms: i64,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/tasks", post(submit))
        .route("/api/tasks/{id}", get(get_status))
        .route("/api/tasks/{id}/cancel", post(cancel))
        .route("/api/agents", get(list_agents))
        .layer(CorsLayer::permissive())
        .with_state(orchestrator)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, bind: &str, port: u16, config: &OrbitConfig) -> Result<()> {
    let orchestrator = Arc::new(Orchestrator::new(
        pool,
        Arc::new(HttpDispatchClient::new()),
        Arc::new(LoadBalancer::new(LoadBalancingStrategy::LeastLoaded)),
        Arc::new(MetricsCollector::new()),
        OrchestratorConfig {
            max_concurrent_tasks: config.max_workers,
            ..OrchestratorConfig::default()
        },
    ));

    let cancel = CancellationToken::new();
    let background = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        tokio::spawn(async move { orchestrator.run(cancel).await })
    };

    let app = build_router(Arc::clone(&orchestrator));
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("orbit serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = background.await;
    tracing::info!("orbit serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let sla = orchestrator.metrics().check_sla_compliance();
    Json(serde_json::json!({
        "status": if sla.is_compliant() { "ok" } else { "degraded" },
        "sla": {
            "latency_p95_under_500ms": sla.latency_p95_under_500ms,
            "error_rate_under_1_percent": sla.error_rate_under_1_percent,
            "success_rate_above_99_percent": sla.success_rate_above_99_percent,
        },
    }))
}

async fn metrics(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        orchestrator.metrics().export_prometheus_text(),
    )
}

async fn submit(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, AppError> {
    let task_id = req
        .task_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let outcome = orchestrator
        .submit(
            &task_id,
            &req.task_type,
            req.input,
            req.priority,
            req.max_retries,
        )
        .await?;

    Ok(Json(SubmitResponse {
        task_id: outcome.task.task_id,
        status: outcome.task.status.to_string(),
        estimated_completion_ms: outcome.estimated_completion_ms,
    }))
}

async fn get_status(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let task = orchestrator
        .status(&id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    Ok(Json(task).into_response())
}

async fn cancel(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let cancelled = orchestrator.cancel(&id).await.map_err(AppError::internal)?;
    if !cancelled {
        return Err(AppError::bad_request(format!(
            "task {id} was already terminal or does not exist"
        )));
    }
    Ok(Json(serde_json::json!({ "task_id": id, "cancelled": true })).into_response())
}

async fn list_agents(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> Result<axum::response::Response, AppError> {
    let agents = agent_db::list_agents(orchestrator.pool())
        .await
        .map_err(AppError::internal)?;
    Ok(Json(agents).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    use orbit_test_utils::{create_test_db, drop_test_db};

    use super::*;

    fn make_orchestrator(pool: PgPool) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            pool,
            Arc::new(HttpDispatchClient::new()),
            Arc::new(LoadBalancer::new(LoadBalancingStrategy::LeastLoaded)),
            Arc::new(MetricsCollector::new()),
            OrchestratorConfig::default(),
        ))
    }

    async fn send_json(
        orchestrator: Arc<Orchestrator>,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> axum::response::Response {
        use tower::ServiceExt;
        let app = super::build_router(orchestrator);
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_health_returns_ok() {
        let (pool, db_name) = create_test_db().await;
        let orchestrator = make_orchestrator(pool);

        let resp = send_json(orchestrator, "GET", "/health", serde_json::json!({})).await;
        assert_eq!(resp.status(), StatusCode::OK);

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_health_reports_degraded_sla_with_no_completed_tasks() {
        let (pool, db_name) = create_test_db().await;
        let orchestrator = make_orchestrator(pool);

        let resp = send_json(orchestrator, "GET", "/health", serde_json::json!({})).await;
        let bytes = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["sla"]["success_rate_above_99_percent"], false);

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_submit_then_status() {
        let (pool, db_name) = create_test_db().await;
        let orchestrator = make_orchestrator(pool);

        let resp = send_json(
            Arc::clone(&orchestrator),
            "POST",
            "/api/tasks",
            serde_json::json!({"task_type": "content_summarization", "input": {}}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let task_id = json["task_id"].as_str().unwrap().to_string();

        let resp = send_json(
            orchestrator,
            "GET",
            &format!("/api/tasks/{task_id}"),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_submit_unknown_task_type_is_bad_request() {
        let (pool, db_name) = create_test_db().await;
        let orchestrator = make_orchestrator(pool);

        let resp = send_json(
            orchestrator,
            "POST",
            "/api/tasks",
            serde_json::json!({"task_type": "nonexistent_workflow"}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_bad_request() {
        let (pool, db_name) = create_test_db().await;
        let orchestrator = make_orchestrator(pool);

        let resp = send_json(
            orchestrator,
            "POST",
            "/api/tasks/does-not-exist/cancel",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        drop_test_db(&db_name).await;
    }
}
