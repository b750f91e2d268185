//! The worker's HTTP invocation server: `POST /execute`, `GET /health`,
//! `GET /capabilities`, matching the orchestrator's dispatch client.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use orbit_core::dispatch::WorkerRequest;
use tower_http::cors::CorsLayer;

use crate::base::AgentRuntime;

pub fn build_router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/health", get(health))
        .route("/capabilities", get(capabilities))
        .layer(CorsLayer::permissive())
        .with_state(runtime)
}

pub async fn run_server(runtime: Arc<AgentRuntime>, bind: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(runtime);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("worker listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn execute(
    State(runtime): State<Arc<AgentRuntime>>,
    Json(req): Json<WorkerRequest>,
) -> impl IntoResponse {
    let response = runtime.execute(&req.task_id, req.inputs, req.parameters).await;
    Json(response)
}

async fn health(State(runtime): State<Arc<AgentRuntime>>) -> impl IntoResponse {
    Json(runtime.health())
}

async fn capabilities(State(runtime): State<Arc<AgentRuntime>>) -> impl IntoResponse {
    Json(runtime.capabilities())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::base::{Agent, TaskInput, TaskOutput};

    use super::*;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn capability(&self) -> &str {
            "echo"
        }

        async fn process(
            &self,
            inputs: &[TaskInput],
            _parameters: &serde_json::Value,
        ) -> anyhow::Result<TaskOutput> {
            Ok(TaskOutput {
                output_type: "echo".to_string(),
                data: inputs[0].data.clone(),
                metadata: serde_json::json!({}),
                processing_time_ms: 0,
            })
        }
    }

    fn runtime() -> Arc<AgentRuntime> {
        Arc::new(AgentRuntime::new("a1", Box::new(EchoAgent), 4))
    }

    #[tokio::test]
    async fn health_route_reports_capability() {
        let app = build_router(runtime());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["capability"], "echo");
        assert_eq!(json["healthy"], true);
    }

    #[tokio::test]
    async fn capabilities_route_lists_primary_capability() {
        let app = build_router(runtime());
        let resp = app
            .oneshot(Request::builder().uri("/capabilities").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json, serde_json::json!(["echo"]));
    }

    #[tokio::test]
    async fn execute_route_runs_the_agent() {
        let app = build_router(runtime());
        let body = serde_json::json!({
            "task_id": "t1",
            "capability": "echo",
            "inputs": [{"input_id": "i1", "input_type": "text", "data": "hi"}],
            "parameters": {}
        });
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "success");
    }
}
