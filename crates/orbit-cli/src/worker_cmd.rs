//! `orbit worker`: the Worker Process Entrypoint (C7). Instantiates a
//! demonstration agent by capability, registers it with the state store,
//! keeps its heartbeat alive, and drains on shutdown signal.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use orbit_worker::AgentRuntime;
use orbit_worker::{registration, server};

pub async fn run_worker(
    pool: PgPool,
    capability: &str,
    bind: &str,
    port: u16,
    worker_id: Option<&str>,
    max_concurrent_tasks: i32,
) -> Result<()> {
    let agent = orbit_demos::build_agent(capability)
        .with_context(|| format!("unknown capability: {capability}"))?;

    let agent_id = worker_id
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{capability}-{}", uuid::Uuid::new_v4()));

    let runtime = Arc::new(AgentRuntime::new(
        agent_id.clone(),
        agent,
        max_concurrent_tasks.max(1) as usize,
    ));

    let endpoint = format!("http://{bind}:{port}");
    registration::register(&pool, &runtime, &endpoint, max_concurrent_tasks).await?;
    println!("Worker {agent_id} registered for capability '{capability}' at {endpoint}");

    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_task = {
        let pool = pool.clone();
        let agent_id = agent_id.clone();
        let cancel = heartbeat_cancel.clone();
        tokio::spawn(registration::run_heartbeat_loop(pool, agent_id, cancel))
    };

    // The server runs until the process is killed; the shutdown watcher
    // drains in-flight tasks on Ctrl+C. Whichever finishes first ends the
    // worker, since a drained-but-still-listening server serves no purpose.
    let shutdown_runtime = Arc::clone(&runtime);
    let shutdown_cancel = heartbeat_cancel.clone();
    tokio::select! {
        result = server::run_server(Arc::clone(&runtime), bind, port) => {
            heartbeat_cancel.cancel();
            let _ = heartbeat_task.await;
            result
        }
        _ = registration::run_until_shutdown(shutdown_runtime, shutdown_cancel) => {
            let _ = heartbeat_task.await;
            Ok(())
        }
    }
}
