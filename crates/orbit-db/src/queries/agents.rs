//! Database query functions for the `agents` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::models::Agent;

/// Register (or re-register) a worker agent. Idempotent: a worker that
/// restarts with the same `agent_id` simply refreshes its row.
pub async fn register_agent(
    pool: &PgPool,
    agent_id: &str,
    agent_type: &str,
    endpoint: &str,
    capabilities: &[String],
    max_concurrent_tasks: i32,
) -> Result<Agent> {
    let agent = sqlx::query_as::<_, Agent>(
        "INSERT INTO agents (agent_id, agent_type, endpoint, capabilities, max_concurrent_tasks) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (agent_id) DO UPDATE SET \
             agent_type = EXCLUDED.agent_type, \
             endpoint = EXCLUDED.endpoint, \
             capabilities = EXCLUDED.capabilities, \
             max_concurrent_tasks = EXCLUDED.max_concurrent_tasks, \
             healthy = true, \
             last_heartbeat = now() \
         RETURNING *",
    )
    .bind(agent_id)
    .bind(agent_type)
    .bind(endpoint)
    .bind(capabilities)
    .bind(max_concurrent_tasks)
    .fetch_one(pool)
    .await
    .context("failed to register agent")?;

    Ok(agent)
}

pub async fn get_agent(pool: &PgPool, agent_id: &str) -> Result<Option<Agent>> {
    let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE agent_id = $1")
        .bind(agent_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch agent")?;

    Ok(agent)
}

/// All healthy agents advertising the given capability.
pub async fn get_agents_by_capability(pool: &PgPool, capability: &str) -> Result<Vec<Agent>> {
    let agents = sqlx::query_as::<_, Agent>(
        "SELECT * FROM agents WHERE $1 = ANY(capabilities) AND healthy = true",
    )
    .bind(capability)
    .fetch_all(pool)
    .await
    .context("failed to list agents by capability")?;

    Ok(agents)
}

pub async fn list_agents(pool: &PgPool) -> Result<Vec<Agent>> {
    let agents = sqlx::query_as::<_, Agent>("SELECT * FROM agents ORDER BY agent_id")
        .fetch_all(pool)
        .await
        .context("failed to list agents")?;

    Ok(agents)
}

pub async fn update_heartbeat(pool: &PgPool, agent_id: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE agents SET last_heartbeat = now() WHERE agent_id = $1")
        .bind(agent_id)
        .execute(pool)
        .await
        .context("failed to update agent heartbeat")?;

    Ok(result.rows_affected())
}

/// Adjust `current_tasks` by `delta` (positive on dispatch, negative on
/// completion), clamped at zero from below.
pub async fn adjust_current_tasks(pool: &PgPool, agent_id: &str, delta: i32) -> Result<()> {
    sqlx::query(
        "UPDATE agents SET current_tasks = GREATEST(current_tasks + $1, 0) WHERE agent_id = $2",
    )
    .bind(delta)
    .bind(agent_id)
    .execute(pool)
    .await
    .context("failed to adjust agent task count")?;

    Ok(())
}

/// Record a successful dispatch: decays `consecutive_failures` and bumps the
/// completed counter.
pub async fn record_success(pool: &PgPool, agent_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE agents SET \
             total_tasks_completed = total_tasks_completed + 1, \
             consecutive_failures = GREATEST(consecutive_failures - 1, 0), \
             healthy = true \
         WHERE agent_id = $1",
    )
    .bind(agent_id)
    .execute(pool)
    .await
    .context("failed to record agent success")?;

    Ok(())
}

/// Record a failed dispatch, marking the agent unhealthy after three
/// consecutive failures.
pub async fn record_failure(pool: &PgPool, agent_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE agents SET \
             total_tasks_failed = total_tasks_failed + 1, \
             consecutive_failures = consecutive_failures + 1, \
             healthy = (consecutive_failures + 1) < 3 \
         WHERE agent_id = $1",
    )
    .bind(agent_id)
    .execute(pool)
    .await
    .context("failed to record agent failure")?;

    Ok(())
}

/// Mark every agent whose heartbeat is older than `max_age` as unhealthy.
/// Returns the agents that were newly flagged, for logging.
pub async fn reap_stale_agents(pool: &PgPool, max_age: Duration) -> Result<Vec<Agent>> {
    let cutoff: DateTime<Utc> = Utc::now() - max_age;

    let agents = sqlx::query_as::<_, Agent>(
        "UPDATE agents SET healthy = false \
         WHERE last_heartbeat < $1 AND healthy = true \
         RETURNING *",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .context("failed to reap stale agents")?;

    Ok(agents)
}
