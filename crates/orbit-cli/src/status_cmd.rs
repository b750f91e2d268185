//! `orbit status` command: show a single task's status, or queue depths
//! across all task types when no task ID is given.

use anyhow::{Context, Result};
use sqlx::PgPool;

use orbit_db::queries::queue as queue_db;
use orbit_db::queries::tasks as task_db;

/// Run the status command.
///
/// When `task_id` is `Some`, shows detailed status for that task.
/// When `None`, lists queue depths per task type.
pub async fn run_status(pool: &PgPool, task_id: Option<&str>) -> Result<()> {
    match task_id {
        Some(id) => run_task_status(pool, id).await,
        None => run_queue_status(pool).await,
    }
}

async fn run_task_status(pool: &PgPool, task_id: &str) -> Result<()> {
    let task = task_db::get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    println!("Task: {} ({})", task.task_id, task.task_type);
    println!("Status: {}", task.status);
    println!("Priority: {}", task.priority);
    println!("Retry count: {}/{}", task.retry_count, task.max_retries);
    if let Some(started_at) = task.started_at {
        println!("Started: {}", started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(completed_at) = task.completed_at {
        println!("Completed: {}", completed_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    for execution in task.executions() {
        println!(
            "  [{}] {} ({}ms)",
            execution.status,
            execution.capability,
            execution.duration_ms.unwrap_or_default(),
        );
    }

    if let Some(error) = task.error_info() {
        println!("Error: {} ({})", error.message, error.code);
    }

    Ok(())
}

async fn run_queue_status(pool: &PgPool) -> Result<()> {
    let depths = queue_db::queue_depths(pool).await?;

    if depths.is_empty() {
        println!("No queued tasks.");
        return Ok(());
    }

    println!("Queue depths:");
    for (task_type, depth) in &depths {
        println!("  {task_type}: {depth}");
    }

    Ok(())
}
