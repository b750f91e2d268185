//! Execution engine: runs the capability stages of a workflow against the
//! agents chosen by the load balancer.
//!
//! Grounded on `original_source/core/execution_engine.py` for the three
//! execution modes and the hybrid split point; the per-stage dispatch
//! timeout and the pattern of collecting a `Vec<AgentExecution>` as stages
//! complete follow the teacher's `lifecycle/mod.rs` bookkeeping style.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use orbit_db::models::{AgentExecution, ExecutionMode};

use crate::dispatch::{
    is_timeout_error, AgentDispatchClient, WorkerError, WorkerOutcome, WorkerRequest,
    WorkerResponse,
};

/// Default wall-clock budget for a single capability dispatch.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// One capability stage to run, already bound to the agent that will run it.
#[derive(Debug, Clone)]
pub struct Stage {
    pub capability: String,
    pub agent_id: String,
    pub endpoint: String,
}

/// The engine's verdict for one task run: either every stage succeeded, or
/// the first failure encountered (sequential/hybrid stop at the first
/// failure; parallel runs every stage and reports the first failure found
/// afterward).
pub enum EngineOutcome {
    Success {
        output: Option<serde_json::Value>,
        executions: Vec<AgentExecution>,
    },
    Failure {
        error: String,
        is_timeout: bool,
        executions: Vec<AgentExecution>,
    },
}

/// Drives one task's stages to completion under a given [`ExecutionMode`].
pub struct ExecutionEngine {
    dispatch_client: Arc<dyn AgentDispatchClient>,
    stage_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(dispatch_client: Arc<dyn AgentDispatchClient>) -> Self {
        Self {
            dispatch_client,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Run `stages` against `task_id` under `mode`, threading `inputs`
    /// forward: each stage's output becomes the next stage's input, and the
    /// final stage's output is the task's output.
    pub async fn run(
        &self,
        task_id: &str,
        mode: ExecutionMode,
        stages: &[Stage],
        inputs: serde_json::Value,
    ) -> EngineOutcome {
        match mode {
            ExecutionMode::Sequential => self.run_sequential(task_id, stages, inputs).await,
            ExecutionMode::Parallel => self.run_parallel(task_id, stages, inputs).await,
            ExecutionMode::Hybrid => self.run_hybrid(task_id, stages, inputs).await,
        }
    }

    async fn run_sequential(
        &self,
        task_id: &str,
        stages: &[Stage],
        inputs: serde_json::Value,
    ) -> EngineOutcome {
        let mut current_input = inputs;
        let mut executions = Vec::new();

        for stage in stages {
            let (execution, response) =
                self.dispatch_one(task_id, stage, current_input.clone()).await;
            executions.push(execution);

            match response {
                Ok(resp) if resp.status == WorkerOutcome::Success => {
                    current_input = resp.output.clone().unwrap_or(current_input);
                }
                Ok(resp) => {
                    return EngineOutcome::Failure {
                        error: worker_error_message(&resp.error),
                        is_timeout: false,
                        executions,
                    };
                }
                Err(e) => {
                    return EngineOutcome::Failure {
                        is_timeout: is_timeout_error(&e),
                        error: e.to_string(),
                        executions,
                    };
                }
            }
        }

        EngineOutcome::Success {
            output: Some(current_input),
            executions,
        }
    }

    async fn run_parallel(
        &self,
        task_id: &str,
        stages: &[Stage],
        inputs: serde_json::Value,
    ) -> EngineOutcome {
        let futures = stages
            .iter()
            .map(|stage| self.dispatch_one(task_id, stage, inputs.clone()));
        let results = join_all(futures).await;

        self.collect_parallel_outcome(results)
    }

    /// Runs the first half of the stages in parallel, then feeds their
    /// combined output into the remaining half run sequentially. The split
    /// point is the midpoint, `n / 2`, rounded down, except a single-stage
    /// workflow runs its one stage through the parallel phase rather than
    /// splitting into an empty parallel half.
    async fn run_hybrid(
        &self,
        task_id: &str,
        stages: &[Stage],
        inputs: serde_json::Value,
    ) -> EngineOutcome {
        let split = if stages.len() > 1 { stages.len() / 2 } else { stages.len() };
        let (parallel_stages, sequential_stages) = stages.split_at(split);

        let futures = parallel_stages
            .iter()
            .map(|stage| self.dispatch_one(task_id, stage, inputs.clone()));
        let results = join_all(futures).await;

        let (parallel_output, mut executions) = match self.collect_parallel_outcome(results) {
            EngineOutcome::Success { output, executions } => (output.unwrap_or(serde_json::json!({})), executions),
            failure @ EngineOutcome::Failure { .. } => return failure,
        };

        if sequential_stages.is_empty() {
            return EngineOutcome::Success {
                output: Some(parallel_output),
                executions,
            };
        }

        match self
            .run_sequential(task_id, sequential_stages, parallel_output)
            .await
        {
            EngineOutcome::Success {
                output,
                executions: sequential_executions,
            } => {
                executions.extend(sequential_executions);
                EngineOutcome::Success { output, executions }
            }
            EngineOutcome::Failure {
                error,
                is_timeout,
                executions: sequential_executions,
            } => {
                executions.extend(sequential_executions);
                EngineOutcome::Failure {
                    error,
                    is_timeout,
                    executions,
                }
            }
        }
    }

    /// A parallel stage batch succeeds as soon as one stage succeeds;
    /// failed siblings are recorded but non-fatal. The whole batch fails
    /// only when every stage failed.
    fn collect_parallel_outcome(
        &self,
        results: Vec<(AgentExecution, anyhow::Result<WorkerResponse>)>,
    ) -> EngineOutcome {
        let mut executions = Vec::with_capacity(results.len());
        let mut outputs = Vec::new();
        let mut first_error: Option<(String, bool)> = None;

        for (execution, response) in results {
            executions.push(execution);
            match response {
                Ok(resp) if resp.status == WorkerOutcome::Success => {
                    if let Some(out) = resp.output {
                        outputs.push(out);
                    }
                }
                Ok(resp) => {
                    first_error.get_or_insert((worker_error_message(&resp.error), false));
                }
                Err(e) => {
                    first_error.get_or_insert((e.to_string(), is_timeout_error(&e)));
                }
            }
        }

        if outputs.is_empty() {
            let (error, is_timeout) = first_error
                .unwrap_or_else(|| ("all stages failed".to_string(), false));
            EngineOutcome::Failure {
                error,
                is_timeout,
                executions,
            }
        } else {
            EngineOutcome::Success {
                output: Some(serde_json::Value::Array(outputs)),
                executions,
            }
        }
    }

    async fn dispatch_one(
        &self,
        task_id: &str,
        stage: &Stage,
        input: serde_json::Value,
    ) -> (AgentExecution, anyhow::Result<WorkerResponse>) {
        let started_at = Utc::now();
        let started = Instant::now();

        let request = WorkerRequest {
            task_id: task_id.to_string(),
            capability: stage.capability.clone(),
            inputs: input,
            parameters: serde_json::json!({}),
        };

        let result = self
            .dispatch_client
            .dispatch(&stage.endpoint, request, self.stage_timeout)
            .await;

        let duration_ms = started.elapsed().as_millis() as i64;

        let execution = match &result {
            Ok(resp) => AgentExecution {
                agent_id: stage.agent_id.clone(),
                capability: stage.capability.clone(),
                status: format!("{:?}", resp.status).to_lowercase(),
                started_at,
                completed_at: Some(Utc::now()),
                duration_ms: Some(duration_ms),
                error: resp.error.as_ref().map(|e| e.message.clone()),
            },
            Err(e) => AgentExecution {
                agent_id: stage.agent_id.clone(),
                capability: stage.capability.clone(),
                status: "failed".to_string(),
                started_at,
                completed_at: Some(Utc::now()),
                duration_ms: Some(duration_ms),
                error: Some(e.to_string()),
            },
        };

        (execution, result)
    }
}

/// The message half of a worker's `{message, type}` error envelope, with a
/// fallback for a worker that reported failure without one.
fn worker_error_message(error: &Option<WorkerError>) -> String {
    error
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| "worker reported failure".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDispatchClient;

    fn stage(capability: &str) -> Stage {
        Stage {
            capability: capability.to_string(),
            agent_id: format!("{capability}-agent"),
            endpoint: "http://localhost:9000".to_string(),
        }
    }

    fn success(output: serde_json::Value) -> WorkerResponse {
        WorkerResponse {
            status: WorkerOutcome::Success,
            output: Some(output),
            execution_time_ms: 5,
            error: None,
        }
    }

    fn failure(error: &str) -> WorkerResponse {
        WorkerResponse {
            status: WorkerOutcome::Failure,
            output: None,
            execution_time_ms: 5,
            error: Some(WorkerError::worker(error)),
        }
    }

    #[tokio::test]
    async fn sequential_threads_output_forward() {
        let fake = Arc::new(FakeDispatchClient::new(vec![
            success(serde_json::json!({"stage": 1})),
            success(serde_json::json!({"stage": 2})),
        ]));
        let engine = ExecutionEngine::new(fake);
        let stages = vec![stage("ingest"), stage("analyze")];

        let outcome = engine
            .run("t1", ExecutionMode::Sequential, &stages, serde_json::json!({}))
            .await;

        match outcome {
            EngineOutcome::Success { output, executions } => {
                assert_eq!(output, Some(serde_json::json!({"stage": 2})));
                assert_eq!(executions.len(), 2);
            }
            EngineOutcome::Failure { error, .. } => panic!("unexpected failure: {error}"),
        }
    }

    #[tokio::test]
    async fn sequential_stops_at_first_failure() {
        let fake = Arc::new(FakeDispatchClient::new(vec![
            failure("ingest blew up"),
            success(serde_json::json!({"stage": 2})),
        ]));
        let engine = ExecutionEngine::new(fake);
        let stages = vec![stage("ingest"), stage("analyze")];

        let outcome = engine
            .run("t1", ExecutionMode::Sequential, &stages, serde_json::json!({}))
            .await;

        match outcome {
            EngineOutcome::Failure {
                error,
                is_timeout,
                executions,
            } => {
                assert_eq!(error, "ingest blew up");
                assert!(!is_timeout);
                assert_eq!(executions.len(), 1);
            }
            EngineOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn parallel_succeeds_if_at_least_one_stage_succeeds() {
        let fake = Arc::new(FakeDispatchClient::new(vec![
            failure("video_detection down"),
            success(serde_json::json!({"alert": "sent"})),
        ]));
        let engine = ExecutionEngine::new(fake);
        let stages = vec![stage("video_detection"), stage("alerting")];

        let outcome = engine
            .run("t1", ExecutionMode::Parallel, &stages, serde_json::json!({}))
            .await;

        match outcome {
            EngineOutcome::Success { executions, output } => {
                assert_eq!(executions.len(), 2);
                assert_eq!(output, Some(serde_json::json!([{"alert": "sent"}])));
            }
            EngineOutcome::Failure { error, .. } => panic!("unexpected failure: {error}"),
        }
    }

    #[tokio::test]
    async fn parallel_fails_only_when_every_stage_fails() {
        let fake = Arc::new(FakeDispatchClient::new(vec![
            failure("video_detection down"),
            failure("alerting down"),
        ]));
        let engine = ExecutionEngine::new(fake);
        let stages = vec![stage("video_detection"), stage("alerting")];

        let outcome = engine
            .run("t1", ExecutionMode::Parallel, &stages, serde_json::json!({}))
            .await;

        match outcome {
            EngineOutcome::Failure { executions, .. } => assert_eq!(executions.len(), 2),
            EngineOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn hybrid_with_two_stages_splits_one_parallel_one_sequential() {
        let fake = Arc::new(FakeDispatchClient::new(vec![
            success(serde_json::json!({"stage": 1})),
            success(serde_json::json!({"stage": 2})),
        ]));
        let engine = ExecutionEngine::new(fake);
        let stages = vec![stage("ingest"), stage("analyze")];

        let outcome = engine
            .run("t1", ExecutionMode::Hybrid, &stages, serde_json::json!({}))
            .await;

        match outcome {
            EngineOutcome::Success { executions, .. } => assert_eq!(executions.len(), 2),
            EngineOutcome::Failure { error, .. } => panic!("unexpected failure: {error}"),
        }
    }

    #[tokio::test]
    async fn hybrid_with_one_stage_runs_through_parallel_phase() {
        let fake = Arc::new(FakeDispatchClient::new(vec![success(
            serde_json::json!({"stage": 1}),
        )]));
        let engine = ExecutionEngine::new(fake);
        let stages = vec![stage("ingest")];

        let outcome = engine
            .run("t1", ExecutionMode::Hybrid, &stages, serde_json::json!({}))
            .await;

        match outcome {
            EngineOutcome::Success { executions, output } => {
                assert_eq!(executions.len(), 1);
                assert_eq!(output, Some(serde_json::json!({"stage": 1})));
            }
            EngineOutcome::Failure { error, .. } => panic!("unexpected failure: {error}"),
        }
    }

    struct TimeoutDispatchClient;

    #[async_trait::async_trait]
    impl AgentDispatchClient for TimeoutDispatchClient {
        async fn dispatch(
            &self,
            endpoint: &str,
            request: WorkerRequest,
            timeout: Duration,
        ) -> anyhow::Result<WorkerResponse> {
            crate::dispatch::HttpDispatchClient::new()
                .dispatch(endpoint, request, timeout)
                .await
        }
    }

    #[tokio::test]
    async fn dispatch_timeout_is_tagged_as_timeout_not_worker_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
            std::future::pending::<()>().await;
        });

        let engine = ExecutionEngine::new(Arc::new(TimeoutDispatchClient))
            .with_stage_timeout(Duration::from_millis(50));
        let stages = vec![Stage {
            capability: "ingest".to_string(),
            agent_id: "ingest-agent".to_string(),
            endpoint: format!("http://{addr}"),
        }];

        let outcome = engine
            .run("t1", ExecutionMode::Sequential, &stages, serde_json::json!({}))
            .await;

        match outcome {
            EngineOutcome::Failure { is_timeout, .. } => assert!(is_timeout),
            EngineOutcome::Success { .. } => panic!("expected timeout failure"),
        }
    }

    #[tokio::test]
    async fn hybrid_splits_at_midpoint_for_four_stages() {
        let fake = Arc::new(FakeDispatchClient::new(vec![
            success(serde_json::json!({"stage": 1})),
            success(serde_json::json!({"stage": 2})),
            success(serde_json::json!({"stage": 3})),
            success(serde_json::json!({"stage": 4})),
        ]));
        let engine = ExecutionEngine::new(fake);
        let stages = vec![
            stage("a"),
            stage("b"),
            stage("c"),
            stage("d"),
        ];

        let outcome = engine
            .run("t1", ExecutionMode::Hybrid, &stages, serde_json::json!({}))
            .await;

        match outcome {
            EngineOutcome::Success { executions, .. } => assert_eq!(executions.len(), 4),
            EngineOutcome::Failure { error, .. } => panic!("unexpected failure: {error}"),
        }
    }
}
