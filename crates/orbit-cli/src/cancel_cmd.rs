//! `orbit cancel` command: cancel a pending or running task.

use anyhow::Result;
use sqlx::PgPool;

use orbit_db::pubsub;
use orbit_db::queries::tasks as task_db;

pub async fn run_cancel(pool: &PgPool, task_id: &str) -> Result<()> {
    let cancelled = task_db::cancel_task(pool, task_id).await?;

    if cancelled {
        let _ = pubsub::publish(pool, task_id, "cancelled").await;
        println!("Task {task_id} cancelled.");
    } else {
        println!("Task {task_id} was already terminal or does not exist.");
    }

    Ok(())
}
