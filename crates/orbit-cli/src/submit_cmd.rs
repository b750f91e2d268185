//! `orbit submit`: submit a task to the orchestrator and print its ID,
//! status, and advisory completion estimate.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;

use orbit_core::balancer::LoadBalancer;
use orbit_core::dispatch::HttpDispatchClient;
use orbit_core::metrics::MetricsCollector;
use orbit_core::orchestrator::{Orchestrator, OrchestratorConfig};
use orbit_db::models::LoadBalancingStrategy;

pub async fn run_submit(
    pool: &PgPool,
    task_id: Option<&str>,
    task_type: &str,
    input: &str,
    priority: i32,
    max_retries: i32,
) -> Result<()> {
    let input_data: serde_json::Value =
        serde_json::from_str(input).context("--input must be valid JSON")?;
    let task_id = task_id
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let orchestrator = Orchestrator::new(
        pool.clone(),
        Arc::new(HttpDispatchClient::new()),
        Arc::new(LoadBalancer::new(LoadBalancingStrategy::LeastLoaded)),
        Arc::new(MetricsCollector::new()),
        OrchestratorConfig::default(),
    );

    let outcome = orchestrator
        .submit(&task_id, task_type, input_data, priority, max_retries)
        .await?;

    println!("task_id: {}", outcome.task.task_id);
    println!("status: {}", outcome.task.status);
    println!("estimated_completion_ms: {}", outcome.estimated_completion_ms);

    Ok(())
}
