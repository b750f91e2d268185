//! Database query functions for the `tasks` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{AgentExecution, Task, TaskStatus};

/// Insert a new task row and enqueue it in the same logical call.
///
/// Idempotent on `task_id`: a duplicate submission with an identical
/// `task_id` is a no-op and returns the existing row, matching the
/// at-least-once submission contract.
pub async fn create_task(
    pool: &PgPool,
    task_id: &str,
    task_type: &str,
    priority: i32,
    max_retries: i32,
    input_data: serde_json::Value,
) -> Result<Task> {
    let existing = get_task(pool, task_id).await?;
    if let Some(task) = existing {
        return Ok(task);
    }

    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (task_id, task_type, priority, max_retries, input_data) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (task_id) DO NOTHING \
         RETURNING *",
    )
    .bind(task_id)
    .bind(task_type)
    .bind(priority)
    .bind(max_retries)
    .bind(input_data)
    .fetch_optional(pool)
    .await
    .context("failed to insert task")?;

    match task {
        Some(task) => Ok(task),
        None => get_task(pool, task_id)
            .await?
            .context("task vanished after conflicting insert"),
    }
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, task_id: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE task_id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Atomically transition a task from one status to another.
///
/// Uses optimistic locking: the `WHERE` clause includes `status = $from`, so
/// the row only updates if the current status still matches. Returns the
/// number of rows affected (0 means the expected `from` status had already
/// changed underneath the caller).
pub async fn transition_status(
    pool: &PgPool,
    task_id: &str,
    from: TaskStatus,
    to: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = $1, updated_at = now(), \
             started_at = COALESCE($2, started_at), \
             completed_at = COALESCE($3, completed_at) \
         WHERE task_id = $4 AND status = $5",
    )
    .bind(to)
    .bind(started_at)
    .bind(completed_at)
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

/// Record a task's final output and mark it completed.
pub async fn complete_task(pool: &PgPool, task_id: &str, output: serde_json::Value) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'completed', output_data = $1, updated_at = now(), completed_at = now() \
         WHERE task_id = $2 AND status != 'completed'",
    )
    .bind(output)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to complete task")?;

    Ok(result.rows_affected())
}

/// Record a task's terminal failure, storing the `{code, message,
/// retryable}` error envelope.
pub async fn fail_task(pool: &PgPool, task_id: &str, error: serde_json::Value) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'failed', error = $1, updated_at = now(), completed_at = now() \
         WHERE task_id = $2",
    )
    .bind(error)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to fail task")?;

    Ok(result.rows_affected())
}

/// Increment the retry counter and move the task back to `retrying`,
/// staging it for re-enqueue. Non-transactional read-modify-write: safe
/// because the orchestrator serializes all writes to a given task id.
pub async fn record_retry(pool: &PgPool, task_id: &str) -> Result<i32> {
    let row: (i32,) = sqlx::query_as(
        "UPDATE tasks \
         SET status = 'retrying', retry_count = retry_count + 1, updated_at = now() \
         WHERE task_id = $1 \
         RETURNING retry_count",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .context("failed to record retry")?;

    Ok(row.0)
}

/// Append one stage's dispatch record to `agent_executions`.
///
/// Read-modify-write on the JSONB column: spec-documented as safe without a
/// transaction because the orchestrator owns a task's writes exclusively
/// while it is in flight.
pub async fn add_agent_execution(
    pool: &PgPool,
    task_id: &str,
    execution: &AgentExecution,
) -> Result<()> {
    let task = get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    let mut executions = task.executions();
    executions.push(execution.clone());
    let encoded = serde_json::to_value(&executions).context("failed to encode agent executions")?;

    sqlx::query("UPDATE tasks SET agent_executions = $1, updated_at = now() WHERE task_id = $2")
        .bind(encoded)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to append agent execution")?;

    Ok(())
}

/// Status counts across all tasks, used for health reporting.
#[derive(Debug, Clone, Default)]
pub struct TaskStatusCounts {
    pub pending: i64,
    pub queued: i64,
    pub running: i64,
    pub retrying: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

pub async fn status_counts(pool: &PgPool) -> Result<TaskStatusCounts> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status::text, COUNT(*) FROM tasks GROUP BY status")
            .fetch_all(pool)
            .await
            .context("failed to count tasks by status")?;

    let mut counts = TaskStatusCounts::default();
    for (status, count) in rows {
        match status.as_str() {
            "pending" => counts.pending = count,
            "queued" => counts.queued = count,
            "running" => counts.running = count,
            "retrying" => counts.retrying = count,
            "completed" => counts.completed = count,
            "failed" => counts.failed = count,
            "cancelled" => counts.cancelled = count,
            _ => {}
        }
    }
    Ok(counts)
}

/// Cancel a task, unless it has already reached a terminal status.
/// Returns `true` if the cancellation took effect.
pub async fn cancel_task(pool: &PgPool, task_id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'cancelled', updated_at = now(), completed_at = now() \
         WHERE task_id = $1 \
           AND status NOT IN ('completed', 'failed', 'cancelled')",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to cancel task")?;

    Ok(result.rows_affected() > 0)
}

/// Reset tasks stuck in `running` back to `retrying` so a restarted
/// orchestrator can pick them back up. Used for restart recovery.
pub async fn reset_orphaned_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'retrying', updated_at = now() \
         WHERE status = 'running' \
         RETURNING *",
    )
    .fetch_all(pool)
    .await
    .context("failed to reset orphaned tasks")?;

    Ok(tasks)
}
