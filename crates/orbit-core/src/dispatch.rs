//! The worker invocation contract -- how the orchestrator calls out to a
//! registered agent to run one capability of a task.
//!
//! # Architecture
//!
//! ```text
//! ExecutionEngine
//!     |
//!     v
//! dyn AgentDispatchClient --dispatch(endpoint, request)--> worker HTTP server
//!     |                                                         |
//!     |   WorkerRequest { task_id, capability, inputs, params }  |
//!     |   ------------------------------------------------------>
//!     |   <------------------------------------------------------
//!     |   WorkerResponse { status, output, duration_ms, error }
//! ```
//!
//! [`AgentDispatchClient`] is object-safe so it can be swapped for a fake in
//! tests without touching the engine or orchestrator.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The request body sent to a worker's `/execute` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task_id: String,
    pub capability: String,
    pub inputs: serde_json::Value,
    pub parameters: serde_json::Value,
}

/// The outcome a worker reports back for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerOutcome {
    Success,
    Failure,
}

/// A worker-side failure: the captured exception message plus a coarse
/// kind, distinct from the task-level `{code, message, retryable}` envelope
/// the orchestrator attaches once a failure is attributed to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl WorkerError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    pub fn worker(message: impl Into<String>) -> Self {
        Self::new("worker_error", message)
    }
}

/// The response body a worker's `/execute` endpoint returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub status: WorkerOutcome,
    pub output: Option<serde_json::Value>,
    pub execution_time_ms: i64,
    pub error: Option<WorkerError>,
}

/// Whether a dispatch failure was a timeout rather than a worker-side or
/// connection error, so callers can attribute `ErrorCode::Timeout` instead
/// of `ErrorCode::WorkerFailure`.
pub fn is_timeout_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>()
        .map(|e| e.is_timeout())
        .unwrap_or(false)
}

/// Adapter interface for invoking a worker agent over the network.
///
/// # Object Safety
///
/// Every method returns a concrete future-bearing type via `#[async_trait]`,
/// so `Box<dyn AgentDispatchClient>` can be stored and swapped freely (a
/// fake implementation drives execution-engine and orchestrator tests
/// without a real HTTP round trip).
#[async_trait]
pub trait AgentDispatchClient: Send + Sync {
    /// Call a worker's invocation endpoint, bounded by `timeout`.
    async fn dispatch(
        &self,
        endpoint: &str,
        request: WorkerRequest,
        timeout: Duration,
    ) -> Result<WorkerResponse>;
}

// Compile-time assertion: AgentDispatchClient must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn AgentDispatchClient) {}
};

/// Dispatches worker invocations as JSON over HTTP via `reqwest`.
pub struct HttpDispatchClient {
    client: reqwest::Client,
}

impl HttpDispatchClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpDispatchClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentDispatchClient for HttpDispatchClient {
    async fn dispatch(
        &self,
        endpoint: &str,
        request: WorkerRequest,
        timeout: Duration,
    ) -> Result<WorkerResponse> {
        let url = format!("{}/execute", endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<WorkerResponse>()
            .await?;

        Ok(response)
    }
}
