//! `orbit agents` command: list registered agents and their health.

use anyhow::Result;
use sqlx::PgPool;

use orbit_db::queries::agents as agent_db;

pub async fn run_agents(pool: &PgPool) -> Result<()> {
    let agents = agent_db::list_agents(pool).await?;

    if agents.is_empty() {
        println!("No agents registered.");
        return Ok(());
    }

    for agent in &agents {
        let health = if agent.healthy { "healthy" } else { "unhealthy" };
        println!(
            "{} [{}] {} ({}/{} tasks, {:.0}% utilization)",
            agent.agent_id,
            health,
            agent.capabilities.join(","),
            agent.current_tasks,
            agent.max_concurrent_tasks,
            agent.utilization() * 100.0,
        );
        println!(
            "  completed={} failed={} last_heartbeat={}",
            agent.total_tasks_completed,
            agent.total_tasks_failed,
            agent.last_heartbeat.format("%Y-%m-%d %H:%M:%S UTC"),
        );
    }

    Ok(())
}
