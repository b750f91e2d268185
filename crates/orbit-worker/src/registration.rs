//! Registration and heartbeat loop for the Worker Process Entrypoint (C7).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use orbit_db::queries::agents as agent_db;

use crate::base::AgentRuntime;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Register the worker with the state store under `endpoint`, recording its
/// single capability and concurrency limit.
pub async fn register(
    pool: &PgPool,
    runtime: &AgentRuntime,
    endpoint: &str,
    max_concurrent_tasks: i32,
) -> Result<()> {
    agent_db::register_agent(
        pool,
        runtime.agent_id(),
        runtime.capability(),
        endpoint,
        &runtime.capabilities(),
        max_concurrent_tasks,
    )
    .await
    .with_context(|| format!("failed to register agent {}", runtime.agent_id()))?;

    Ok(())
}

/// Run the heartbeat loop until `cancel` fires. Matches the orchestrator's
/// stale-agent reaper cadence expectations (heartbeats refresh well inside
/// the 60s staleness window).
pub async fn run_heartbeat_loop(pool: PgPool, agent_id: String, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(agent_id = %agent_id, "heartbeat loop stopping");
                return;
            }
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                if let Err(e) = agent_db::update_heartbeat(&pool, &agent_id).await {
                    tracing::warn!(agent_id = %agent_id, error = %e, "heartbeat update failed");
                }
            }
        }
    }
}

/// Wait for a shutdown signal, then cancel the heartbeat loop and drain the
/// runtime before returning.
pub async fn run_until_shutdown(runtime: Arc<AgentRuntime>, heartbeat_cancel: CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");

    tracing::info!(agent_id = %runtime.agent_id(), "shutdown signal received, draining");
    heartbeat_cancel.cancel();
    runtime.shutdown().await;
    tracing::info!(agent_id = %runtime.agent_id(), "drained, exiting");
}
