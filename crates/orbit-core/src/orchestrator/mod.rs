//! Priority-queue orchestrator: polls `task_queue` per task type, dispatches
//! each task's workflow to registered agents, and retries or escalates
//! failures.
//!
//! Generalized from the teacher's DAG-aware orchestrator: instead of
//! walking a plan's dependency graph, each tick pops the next-highest
//! priority task per known task type and runs its fixed capability pipeline
//! through the [`crate::engine::ExecutionEngine`]. The semaphore-bounded
//! spawn loop and the cancellation-aware `select!` shape follow the
//! teacher's `run_orchestrator` closely.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use orbit_db::models::{ErrorCode, Task, TaskErrorInfo, TaskStatus};
use orbit_db::pubsub;
use orbit_db::queries::{agents as agent_db, queue as queue_db, tasks as task_db};
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::balancer::LoadBalancer;
use crate::dispatch::AgentDispatchClient;
use crate::engine::{EngineOutcome, ExecutionEngine, Stage};
use crate::error::TaskError;
use crate::metrics::MetricsCollector;
use crate::workflow;

/// `retry_count` never exceeds this; a task never leaves RETRYING past it.
pub const MAX_RETRIES: i32 = 3;

/// Tunables for the orchestrator's background loops.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on tasks executing concurrently across all task types.
    pub max_concurrent_tasks: usize,
    /// How often the queue drainer polls when nothing was dispatched.
    pub queue_poll_interval: Duration,
    /// How often task/queue gauges are refreshed.
    pub health_check_interval: Duration,
    /// How often agents with a stale heartbeat are marked unhealthy.
    pub stale_agent_interval: Duration,
    /// Heartbeat age past which an agent is considered stale.
    pub stale_agent_max_age: chrono::Duration,
}

/// The result of a successful `submit` call: the persisted task plus an
/// advisory, purely informational completion estimate.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub task: Task,
    pub estimated_completion_ms: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 100,
            queue_poll_interval: Duration::from_millis(100),
            health_check_interval: Duration::from_secs(10),
            stale_agent_interval: Duration::from_secs(30),
            stale_agent_max_age: chrono::Duration::seconds(60),
        }
    }
}

/// Owns the state store, the dispatch client, and the load balancer; exposes
/// the public submit/status/cancel API plus the background loops that drive
/// tasks to completion.
pub struct Orchestrator {
    pool: PgPool,
    dispatch_client: Arc<dyn AgentDispatchClient>,
    balancer: Arc<LoadBalancer>,
    metrics: Arc<MetricsCollector>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        pool: PgPool,
        dispatch_client: Arc<dyn AgentDispatchClient>,
        balancer: Arc<LoadBalancer>,
        metrics: Arc<MetricsCollector>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            pool,
            dispatch_client,
            balancer,
            metrics,
            config,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Expose the underlying pool for read-only queries (e.g. listing
    /// agents) that don't belong on the orchestrator's own API surface.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Submit a new task. Rejects unknown task types before touching the
    /// database, matching the `UNKNOWN_TASK_TYPE` contract. `max_retries` is
    /// clamped to [`MAX_RETRIES`] so a caller can only ever tighten the
    /// retry ceiling, never raise it past the invariant that a task never
    /// leaves RETRYING with `retry_count > 3`.
    pub async fn submit(
        &self,
        task_id: &str,
        task_type: &str,
        input_data: serde_json::Value,
        priority: i32,
        max_retries: i32,
    ) -> std::result::Result<SubmitOutcome, TaskError> {
        let Some(estimated_completion_ms) = workflow::estimate_completion_ms(task_type) else {
            return Err(TaskError::UnknownTaskType(task_type.to_string()));
        };

        let max_retries = max_retries.clamp(0, MAX_RETRIES);

        let task = task_db::create_task(
            &self.pool,
            task_id,
            task_type,
            priority,
            max_retries,
            input_data,
        )
        .await
        .map_err(TaskError::StateStoreError)?;

        // create_task is idempotent and returns the existing row on replay,
        // so only transition pending -> queued the first time through.
        if task.status == TaskStatus::Pending {
            task_db::transition_status(
                &self.pool,
                task_id,
                TaskStatus::Pending,
                TaskStatus::Queued,
                None,
                None,
            )
            .await
            .map_err(TaskError::StateStoreError)?;
            queue_db::enqueue(&self.pool, task_type, task_id, priority)
                .await
                .map_err(TaskError::StateStoreError)?;
            let _ = pubsub::publish(&self.pool, task_id, "queued").await;
        }

        self.metrics.increment("tasks_submitted_total", 1);
        self.metrics
            .increment(&format!("tasks_submitted_{task_type}"), 1);
        Ok(SubmitOutcome {
            task,
            estimated_completion_ms,
        })
    }

    pub async fn status(&self, task_id: &str) -> Result<Option<Task>> {
        task_db::get_task(&self.pool, task_id).await
    }

    pub async fn cancel(&self, task_id: &str) -> Result<bool> {
        let cancelled = task_db::cancel_task(&self.pool, task_id).await?;
        if cancelled {
            let _ = pubsub::publish(&self.pool, task_id, "cancelled").await;
        }
        Ok(cancelled)
    }

    /// Run every background loop until `cancel` fires. Recovers orphaned
    /// tasks (left `running` by a prior crashed process) before starting.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if let Err(e) = self.recover_orphaned_tasks().await {
            error!(error = %e, "failed to recover orphaned tasks at startup");
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_tasks));

        let queue_drainer = {
            let this = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tokio::spawn(async move { this.run_queue_drainer(semaphore, cancel).await })
        };
        let health_monitor = {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move { this.run_health_monitor(cancel).await })
        };
        let stale_reaper = {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move { this.run_stale_agent_reaper(cancel).await })
        };

        let _ = tokio::join!(queue_drainer, health_monitor, stale_reaper);
    }

    async fn recover_orphaned_tasks(&self) -> Result<()> {
        let orphaned = task_db::reset_orphaned_tasks(&self.pool).await?;
        for task in &orphaned {
            warn!(task_id = %task.task_id, "reset orphaned running task to retrying");
            queue_db::enqueue(&self.pool, &task.task_type, &task.task_id, task.priority).await?;
        }
        Ok(())
    }

    async fn run_queue_drainer(
        self: Arc<Self>,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let mut dispatched_any = false;
            for task_type in workflow::known_task_types() {
                let popped = match queue_db::pop_next(&self.pool, task_type).await {
                    Ok(popped) => popped,
                    Err(e) => {
                        warn!(error = %e, task_type, "failed to poll task queue");
                        continue;
                    }
                };

                let Some(task_id) = popped else { continue };
                dispatched_any = true;

                let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        // At capacity: put the task back so it is not lost.
                        if let Ok(Some(task)) = task_db::get_task(&self.pool, &task_id).await {
                            let _ =
                                queue_db::enqueue(&self.pool, task_type, &task_id, task.priority)
                                    .await;
                        }
                        continue;
                    }
                };

                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.execute_task(&task_id).await;
                    drop(permit);
                });
            }

            if !dispatched_any {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.queue_poll_interval) => {}
                    _ = cancel.cancelled() => return,
                }
            }
        }
    }

    async fn execute_task(&self, task_id: &str) {
        if let Err(e) = self.execute_task_inner(task_id).await {
            error!(task_id, error = %e, "task execution failed unexpectedly");
        }
    }

    async fn execute_task_inner(&self, task_id: &str) -> Result<()> {
        let task = task_db::get_task(&self.pool, task_id)
            .await?
            .with_context(|| format!("task {task_id} vanished from queue"))?;

        if task.status.is_terminal() {
            return Ok(());
        }

        let workflow = workflow::lookup(&task.task_type)
            .with_context(|| format!("task {task_id} has unknown task type {}", task.task_type))?;

        let from_status = task.status;
        let transitioned = task_db::transition_status(
            &self.pool,
            task_id,
            from_status,
            TaskStatus::Running,
            Some(chrono::Utc::now()),
            None,
        )
        .await?;
        if transitioned == 0 {
            // Raced with a cancellation or concurrent dispatch; drop it.
            return Ok(());
        }
        let _ = pubsub::publish(&self.pool, task_id, "running").await;

        let mut stages = Vec::with_capacity(workflow.capabilities.len());
        for capability in &workflow.capabilities {
            let candidates = agent_db::get_agents_by_capability(&self.pool, capability).await?;
            let Some(agent) = self.balancer.select(&candidates, capability) else {
                let info = TaskErrorInfo::new(
                    ErrorCode::NoAgentsAvailable,
                    format!("no healthy agent advertises capability '{capability}'"),
                );
                self.fail_task(task_id, info).await?;
                return Ok(());
            };
            agent_db::adjust_current_tasks(&self.pool, &agent.agent_id, 1).await?;
            stages.push(Stage {
                capability: capability.clone(),
                agent_id: agent.agent_id.clone(),
                endpoint: agent.endpoint.clone(),
            });
        }

        let run_started = std::time::Instant::now();
        let engine = ExecutionEngine::new(Arc::clone(&self.dispatch_client));
        let outcome = engine
            .run(task_id, workflow.mode, &stages, task.input_data.clone())
            .await;
        let run_elapsed_ms = run_started.elapsed().as_millis() as f64;

        for stage in &stages {
            agent_db::adjust_current_tasks(&self.pool, &stage.agent_id, -1).await?;
        }

        match outcome {
            EngineOutcome::Success { output, executions } => {
                for execution in &executions {
                    task_db::add_agent_execution(&self.pool, task_id, execution).await?;
                    self.balancer
                        .report_success(&self.pool, &execution.agent_id)
                        .await?;
                }
                task_db::complete_task(&self.pool, task_id, output.unwrap_or(serde_json::json!({})))
                    .await?;
                self.metrics.increment("tasks_completed_total", 1);
                self.metrics.record("task_execution_time_ms", run_elapsed_ms);
                if run_elapsed_ms < 500.0 {
                    self.metrics.increment("tasks_under_500ms", 1);
                }
                let _ = pubsub::publish(&self.pool, task_id, "completed").await;
                info!(task_id, "task completed");
            }
            EngineOutcome::Failure {
                error,
                is_timeout,
                executions,
            } => {
                for execution in &executions {
                    task_db::add_agent_execution(&self.pool, task_id, execution).await?;
                    if execution.error.is_some() {
                        self.balancer
                            .report_failure(&self.pool, &execution.agent_id)
                            .await?;
                    }
                }
                let code = if is_timeout {
                    ErrorCode::Timeout
                } else {
                    ErrorCode::WorkerFailure
                };
                let info = TaskErrorInfo::new(code, error);
                self.retry_or_fail(task_id, &task, info).await?;
            }
        }

        Ok(())
    }

    /// Retries a retryable failure if attempts remain, otherwise fails the
    /// task terminally. Backoff doubles per attempt, capped at 2^3 = 8s.
    async fn retry_or_fail(&self, task_id: &str, task: &Task, info: TaskErrorInfo) -> Result<()> {
        if info.retryable && task.retry_count < task.max_retries {
            let retry_count = task_db::record_retry(&self.pool, task_id).await?;
            self.metrics.increment("tasks_retried_total", 1);
            let _ = pubsub::publish(&self.pool, task_id, "retrying").await;

            let backoff_exponent = (retry_count as u32).min(3);
            let backoff = Duration::from_secs(2u64.pow(backoff_exponent));

            let pool = self.pool.clone();
            let task_type = task.task_type.clone();
            let task_id = task_id.to_string();
            let priority = task.priority;
            tokio::spawn(async move {
                tokio::time::sleep(backoff).await;
                if let Err(e) = queue_db::enqueue(&pool, &task_type, &task_id, priority).await {
                    error!(task_id, error = %e, "failed to re-enqueue task after retry backoff");
                }
            });
        } else {
            self.fail_task(task_id, info).await?;
        }
        Ok(())
    }

    async fn fail_task(&self, task_id: &str, info: TaskErrorInfo) -> Result<()> {
        let encoded = serde_json::to_value(&info).context("failed to encode task error info")?;
        task_db::fail_task(&self.pool, task_id, encoded).await?;
        self.metrics.increment("tasks_failed_total", 1);
        let _ = pubsub::publish(&self.pool, task_id, "failed").await;
        warn!(task_id, code = %info.code, message = %info.message, "task failed");
        Ok(())
    }

    async fn run_health_monitor(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            match task_db::status_counts(&self.pool).await {
                Ok(counts) => {
                    self.metrics.set_gauge("tasks_pending", counts.pending as f64);
                    self.metrics.set_gauge("tasks_queued", counts.queued as f64);
                    self.metrics.set_gauge("tasks_running", counts.running as f64);
                    self.metrics.set_gauge("tasks_retrying", counts.retrying as f64);
                    self.metrics.set_gauge("tasks_completed", counts.completed as f64);
                    self.metrics.set_gauge("tasks_failed", counts.failed as f64);
                    self.metrics.set_gauge("tasks_cancelled", counts.cancelled as f64);
                }
                Err(e) => warn!(error = %e, "failed to refresh task status counts"),
            }

            match queue_db::queue_depths(&self.pool).await {
                Ok(depths) => {
                    for (task_type, depth) in depths {
                        self.metrics
                            .set_gauge(&format!("queue_depth_{task_type}"), depth as f64);
                    }
                }
                Err(e) => warn!(error = %e, "failed to refresh queue depths"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.health_check_interval) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn run_stale_agent_reaper(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            match agent_db::reap_stale_agents(&self.pool, self.config.stale_agent_max_age).await {
                Ok(reaped) => {
                    for agent in &reaped {
                        warn!(agent_id = %agent.agent_id, "marked agent unhealthy: stale heartbeat");
                    }
                }
                Err(e) => warn!(error = %e, "failed to reap stale agents"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.stale_agent_interval) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{WorkerOutcome, WorkerResponse};
    use crate::testing::FakeDispatchClient;
    use orbit_db::models::LoadBalancingStrategy;
    use orbit_test_utils::{create_test_db, drop_test_db};

    fn make_orchestrator(pool: PgPool, responses: Vec<WorkerResponse>) -> Arc<Orchestrator> {
        let dispatch_client: Arc<dyn AgentDispatchClient> =
            Arc::new(FakeDispatchClient::new(responses));
        let balancer = Arc::new(LoadBalancer::new(LoadBalancingStrategy::LeastLoaded));
        let metrics = Arc::new(MetricsCollector::new());
        Arc::new(Orchestrator::new(
            pool,
            dispatch_client,
            balancer,
            metrics,
            OrchestratorConfig::default(),
        ))
    }

    #[tokio::test]
    async fn submit_rejects_unknown_task_type() {
        let (pool, db_name) = create_test_db().await;
        let orchestrator = make_orchestrator(pool, vec![]);

        let err = orchestrator
            .submit("t1", "not_a_real_workflow", serde_json::json!({}), 5, 3)
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::UnknownTaskType(_)));
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn submit_is_idempotent_and_enqueues_once() {
        let (pool, db_name) = create_test_db().await;
        let orchestrator = make_orchestrator(pool.clone(), vec![]);

        orchestrator
            .submit("t2", "content_summarization", serde_json::json!({"x": 1}), 5, 3)
            .await
            .unwrap();
        orchestrator
            .submit("t2", "content_summarization", serde_json::json!({"x": 1}), 5, 3)
            .await
            .unwrap();

        let depth = orbit_db::queries::queue::queue_length(&pool, "content_summarization")
            .await
            .unwrap();
        assert_eq!(depth, 1);

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn execute_task_fails_when_no_agent_registered() {
        let (pool, db_name) = create_test_db().await;
        let orchestrator = make_orchestrator(pool.clone(), vec![]);

        orchestrator
            .submit("t3", "content_summarization", serde_json::json!({}), 5, 0)
            .await
            .unwrap();

        orchestrator.execute_task("t3").await;

        let task = orchestrator.status("t3").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_info().unwrap().code, ErrorCode::NoAgentsAvailable);

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn execute_task_completes_with_registered_agent() {
        let (pool, db_name) = create_test_db().await;
        let orchestrator = make_orchestrator(
            pool.clone(),
            vec![WorkerResponse {
                status: WorkerOutcome::Success,
                output: Some(serde_json::json!({"summary": "ok"})),
                execution_time_ms: 8,
                error: None,
            }],
        );

        agent_db::register_agent(
            &pool,
            "summary-agent-1",
            "summary_worker",
            "http://localhost:9100",
            &["summary".to_string()],
            5,
        )
        .await
        .unwrap();

        orchestrator
            .submit("t4", "content_summarization", serde_json::json!({}), 5, 0)
            .await
            .unwrap();

        orchestrator.execute_task("t4").await;

        let task = orchestrator.status("t4").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.output_data, Some(serde_json::json!({"summary": "ok"})));

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn submit_clamps_max_retries_to_the_invariant_cap() {
        let (pool, db_name) = create_test_db().await;
        let orchestrator = make_orchestrator(pool.clone(), vec![]);

        let outcome = orchestrator
            .submit("t5", "content_summarization", serde_json::json!({}), 5, 100)
            .await
            .unwrap();

        assert_eq!(outcome.task.max_retries, MAX_RETRIES);

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn submit_returns_an_advisory_completion_estimate() {
        let (pool, db_name) = create_test_db().await;
        let orchestrator = make_orchestrator(pool, vec![]);

        let outcome = orchestrator
            .submit("t6", "content_summarization", serde_json::json!({}), 5, 0)
            .await
            .unwrap();

        assert!(outcome.estimated_completion_ms > 0);
        assert_eq!(
            orchestrator.metrics().get_counter("tasks_submitted_content_summarization"),
            1
        );

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn cancel_prevents_a_queued_task_from_running() {
        let (pool, db_name) = create_test_db().await;
        let orchestrator = make_orchestrator(pool.clone(), vec![]);

        orchestrator
            .submit("t5", "content_summarization", serde_json::json!({}), 5, 0)
            .await
            .unwrap();

        assert!(orchestrator.cancel("t5").await.unwrap());

        orchestrator.execute_task("t5").await;

        let task = orchestrator.status("t5").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);

        drop_test_db(&db_name).await;
    }
}
