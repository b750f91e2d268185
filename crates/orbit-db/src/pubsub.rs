//! Task update notifications via Postgres `LISTEN`/`NOTIFY`.
//!
//! Every task writer fires a best-effort `pg_notify` on the shared
//! `task_updates` channel after its write commits. Postgres channel
//! identifiers are capped at 63 bytes, too short to mint one channel per
//! task id, so subscribers filter the shared stream by `task_id` client
//! side instead (see DESIGN.md Open Question 5).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;

const CHANNEL: &str = "task_updates";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: String,
    pub status: String,
}

/// Publish a task status change. Failure to notify is logged and swallowed
/// by the caller's tracing context, never treated as a write failure -- the
/// row write is the source of truth, the notification is a side channel.
pub async fn publish(pool: &PgPool, task_id: &str, status: &str) -> Result<()> {
    let payload = serde_json::to_string(&TaskUpdate {
        task_id: task_id.to_owned(),
        status: status.to_owned(),
    })
    .context("failed to encode task update payload")?;

    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(CHANNEL)
        .bind(&payload)
        .execute(pool)
        .await
        .context("failed to publish task update")?;

    Ok(())
}

/// Subscribe to updates for a single task. The returned listener yields raw
/// [`TaskUpdate`]s for *every* task on the shared channel; callers filter by
/// `task_id`.
pub async fn subscribe(pool: &PgPool) -> Result<PgListener> {
    let mut listener = PgListener::connect_with(pool)
        .await
        .context("failed to open task update listener")?;
    listener
        .listen(CHANNEL)
        .await
        .context("failed to listen on task_updates channel")?;
    Ok(listener)
}

/// Decode a notification payload received from a [`PgListener`].
pub fn decode(payload: &str) -> Result<TaskUpdate> {
    serde_json::from_str(payload).context("failed to decode task update payload")
}
