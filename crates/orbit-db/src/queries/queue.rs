//! Database query functions for the `task_queue` table.
//!
//! `task_queue` plays the role of the sorted-set priority queue in the
//! original design (one set per task type, scored by priority). Popping is
//! implemented with `FOR UPDATE SKIP LOCKED` so two concurrent pollers never
//! pop the same task twice, the same atomicity guarantee a `ZPOPMIN` gives.

use anyhow::{Context, Result};
use sqlx::PgPool;

/// Enqueue a task for dispatch. Idempotent: re-enqueuing a task id already
/// present for the same task type is a no-op.
pub async fn enqueue(pool: &PgPool, task_type: &str, task_id: &str, priority: i32) -> Result<()> {
    let already_queued: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM task_queue WHERE task_type = $1 AND task_id = $2)",
    )
    .bind(task_type)
    .bind(task_id)
    .fetch_one(pool)
    .await
    .context("failed to check existing queue entry")?;

    if already_queued {
        return Ok(());
    }

    sqlx::query("INSERT INTO task_queue (task_type, task_id, priority) VALUES ($1, $2, $3)")
        .bind(task_type)
        .bind(task_id)
        .bind(priority)
        .execute(pool)
        .await
        .context("failed to enqueue task")?;

    Ok(())
}

/// Atomically pop the highest-priority (lowest `priority` value), oldest
/// task for a given task type. Returns `None` if the queue is empty.
pub async fn pop_next(pool: &PgPool, task_type: &str) -> Result<Option<String>> {
    let task_id: Option<(String,)> = sqlx::query_as(
        "DELETE FROM task_queue \
         WHERE enqueued_seq = ( \
             SELECT enqueued_seq FROM task_queue \
             WHERE task_type = $1 \
             ORDER BY priority ASC, enqueued_seq ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING task_id",
    )
    .bind(task_type)
    .fetch_optional(pool)
    .await
    .context("failed to pop next task")?;

    Ok(task_id.map(|(id,)| id))
}

/// Number of tasks currently queued for a given task type.
pub async fn queue_length(pool: &PgPool, task_type: &str) -> Result<i64> {
    let count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM task_queue WHERE task_type = $1")
            .bind(task_type)
            .fetch_one(pool)
            .await
            .context("failed to get queue length")?;

    Ok(count.0)
}

/// All distinct task types currently holding queued work, with their depth.
pub async fn queue_depths(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT task_type, COUNT(*) FROM task_queue GROUP BY task_type ORDER BY task_type",
    )
    .fetch_all(pool)
    .await
    .context("failed to get queue depths")?;

    Ok(rows)
}
