//! The worker agent framework: a uniform `execute`/`getHealth`/
//! `getCapabilities`/`shutdown` contract wrapped around a concrete
//! capability implementation.
//!
//! Generalized from the teacher's `Harness` trait (one interface, several
//! concrete adapters registered by name) to the worker side of the
//! invocation envelope instead of a coding-agent adapter.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use orbit_core::dispatch::{WorkerError, WorkerOutcome, WorkerResponse};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

/// One item of a task's input envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskInput {
    #[serde(default)]
    pub input_id: String,
    pub input_type: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One item of a worker's output envelope.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutput {
    pub output_type: String,
    pub data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub processing_time_ms: i64,
}

/// The capability a concrete worker implements. `process` is the only
/// method an implementer provides; `execute` (below, on [`AgentRuntime`])
/// supplies the semaphore, validation, timing, and error capture around it.
#[async_trait]
pub trait Agent: Send + Sync {
    fn capability(&self) -> &str;

    async fn process(
        &self,
        inputs: &[TaskInput],
        parameters: &serde_json::Value,
    ) -> anyhow::Result<TaskOutput>;
}

// Compile-time assertion: Agent must be object-safe, mirroring the
// dispatch client's own assertion.
const _: () = {
    fn _assert_object_safe(_: &dyn Agent) {}
};

/// Health snapshot returned by `getHealth`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub capability: String,
    pub healthy: bool,
    pub current_tasks: i64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub uptime_secs: u64,
    pub success_rate: f64,
}

/// Wraps a concrete [`Agent`] with the bounded-concurrency execution
/// wrapper, health bookkeeping, and drain-on-shutdown lifecycle spec.md
/// documents for the worker framework.
pub struct AgentRuntime {
    agent_id: String,
    agent: Box<dyn Agent>,
    semaphore: Semaphore,
    healthy: AtomicBool,
    current_tasks: AtomicI64,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
    started_at: Instant,
}

impl AgentRuntime {
    pub fn new(agent_id: impl Into<String>, agent: Box<dyn Agent>, max_concurrent_tasks: usize) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent,
            semaphore: Semaphore::new(max_concurrent_tasks),
            healthy: AtomicBool::new(true),
            current_tasks: AtomicI64::new(0),
            total_completed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn capability(&self) -> &str {
        self.agent.capability()
    }

    /// `getCapabilities()`: the primary capability name, as a single-item
    /// list (a worker hosts exactly one capability in this framework).
    pub fn capabilities(&self) -> Vec<String> {
        vec![self.agent.capability().to_string()]
    }

    fn validate_inputs(inputs: &[TaskInput]) -> anyhow::Result<()> {
        if inputs.is_empty() {
            anyhow::bail!("inputs must be non-empty");
        }
        for input in inputs {
            if input.input_type.is_empty() {
                anyhow::bail!("input_type must be non-empty");
            }
            if input.data.is_null() {
                anyhow::bail!("input data must not be null");
            }
        }
        Ok(())
    }

    /// `execute(task_id, inputs, parameters)`. Refuses new work once
    /// [`Self::shutdown`] has been called (`healthy == false`).
    pub async fn execute(
        &self,
        _task_id: &str,
        inputs: serde_json::Value,
        parameters: serde_json::Value,
    ) -> WorkerResponse {
        let started = Instant::now();

        if !self.healthy.load(Ordering::SeqCst) {
            return WorkerResponse {
                status: WorkerOutcome::Failure,
                output: None,
                execution_time_ms: 0,
                error: Some(WorkerError::validation("worker is draining, not accepting new tasks")),
            };
        }

        let parsed: Result<Vec<TaskInput>, _> = serde_json::from_value(inputs);
        let inputs = match parsed {
            Ok(inputs) => inputs,
            Err(e) => {
                return WorkerResponse {
                    status: WorkerOutcome::Failure,
                    output: None,
                    execution_time_ms: started.elapsed().as_millis() as i64,
                    error: Some(WorkerError::validation(format!("malformed inputs: {e}"))),
                };
            }
        };

        if let Err(e) = Self::validate_inputs(&inputs) {
            return WorkerResponse {
                status: WorkerOutcome::Failure,
                output: None,
                execution_time_ms: started.elapsed().as_millis() as i64,
                error: Some(WorkerError::validation(e.to_string())),
            };
        }

        let _permit = self.semaphore.acquire().await.expect("semaphore closed");
        self.current_tasks.fetch_add(1, Ordering::SeqCst);

        let result = self.agent.process(&inputs, &parameters).await;

        self.current_tasks.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(output) => {
                self.total_completed.fetch_add(1, Ordering::SeqCst);
                WorkerResponse {
                    status: WorkerOutcome::Success,
                    output: Some(serde_json::to_value(output).expect("TaskOutput always serializes")),
                    execution_time_ms: started.elapsed().as_millis() as i64,
                    error: None,
                }
            }
            Err(e) => {
                self.total_failed.fetch_add(1, Ordering::SeqCst);
                WorkerResponse {
                    status: WorkerOutcome::Failure,
                    output: None,
                    execution_time_ms: started.elapsed().as_millis() as i64,
                    error: Some(WorkerError::worker(e.to_string())),
                }
            }
        }
    }

    pub fn health(&self) -> AgentHealth {
        let completed = self.total_completed.load(Ordering::SeqCst);
        let failed = self.total_failed.load(Ordering::SeqCst);
        let total = completed + failed;
        let success_rate = if total == 0 { 1.0 } else { completed as f64 / total as f64 };

        AgentHealth {
            agent_id: self.agent_id.clone(),
            capability: self.agent.capability().to_string(),
            healthy: self.healthy.load(Ordering::SeqCst),
            current_tasks: self.current_tasks.load(Ordering::SeqCst),
            total_completed: completed,
            total_failed: failed,
            uptime_secs: self.started_at.elapsed().as_secs(),
            success_rate,
        }
    }

    /// Marks the worker unhealthy (no new tasks admitted) then blocks,
    /// polling, until in-flight work drains.
    pub async fn shutdown(&self) {
        self.healthy.store(false, Ordering::SeqCst);
        while self.current_tasks.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
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

    struct FailingAgent;

    #[async_trait]
    impl Agent for FailingAgent {
        fn capability(&self) -> &str {
            "failing"
        }

        async fn process(
            &self,
            _inputs: &[TaskInput],
            _parameters: &serde_json::Value,
        ) -> anyhow::Result<TaskOutput> {
            anyhow::bail!("boom")
        }
    }

    fn valid_inputs() -> serde_json::Value {
        serde_json::json!([{"input_id": "i1", "input_type": "text", "data": "hello"}])
    }

    #[tokio::test]
    async fn execute_rejects_empty_inputs() {
        let runtime = AgentRuntime::new("a1", Box::new(EchoAgent), 4);
        let resp = runtime.execute("t1", serde_json::json!([]), serde_json::json!({})).await;
        assert_eq!(resp.status, WorkerOutcome::Failure);
        assert!(resp.error.unwrap().message.contains("non-empty"));
    }

    #[tokio::test]
    async fn execute_rejects_null_data() {
        let runtime = AgentRuntime::new("a1", Box::new(EchoAgent), 4);
        let bad = serde_json::json!([{"input_id": "i1", "input_type": "text", "data": null}]);
        let resp = runtime.execute("t1", bad, serde_json::json!({})).await;
        assert_eq!(resp.status, WorkerOutcome::Failure);
        assert!(resp.error.unwrap().message.contains("null"));
    }

    #[tokio::test]
    async fn execute_succeeds_and_updates_health() {
        let runtime = AgentRuntime::new("a1", Box::new(EchoAgent), 4);
        let resp = runtime.execute("t1", valid_inputs(), serde_json::json!({})).await;
        assert_eq!(resp.status, WorkerOutcome::Success);

        let health = runtime.health();
        assert_eq!(health.total_completed, 1);
        assert_eq!(health.total_failed, 0);
        assert_eq!(health.current_tasks, 0);
    }

    #[tokio::test]
    async fn execute_captures_process_errors() {
        let runtime = AgentRuntime::new("a1", Box::new(FailingAgent), 4);
        let resp = runtime.execute("t1", valid_inputs(), serde_json::json!({})).await;
        assert_eq!(resp.status, WorkerOutcome::Failure);
        assert_eq!(resp.error.unwrap().message, "boom");

        let health = runtime.health();
        assert_eq!(health.total_failed, 1);
    }

    #[tokio::test]
    async fn shutdown_drains_then_marks_unhealthy() {
        let runtime = AgentRuntime::new("a1", Box::new(EchoAgent), 4);
        runtime.shutdown().await;
        assert!(!runtime.health().healthy);

        let resp = runtime.execute("t1", valid_inputs(), serde_json::json!({})).await;
        assert_eq!(resp.status, WorkerOutcome::Failure);
        assert!(resp.error.unwrap().message.contains("draining"));
    }
}
