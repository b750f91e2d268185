//! Load balancer: picks which registered agent should run one capability of
//! a task.
//!
//! Selection formulas (weighted score, capacity filtering) are grounded on
//! `original_source/core/load_balancer.py`; the Rust struct/method shape
//! (an owned struct holding its own mutable state, constructed once in
//! `main` rather than a global) follows `orbit-core`'s general style of
//! explicit owned values rather than singletons.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use chrono::Utc;
use orbit_db::models::{Agent, LoadBalancingStrategy};
use orbit_db::queries::agents as agent_db;
use sqlx::PgPool;

/// An agent heartbeat older than this is treated as stale by selection,
/// even if its row is still marked `healthy` (the reaper has a slower,
/// eventually-consistent 30s/60s cadence of its own).
const HEARTBEAT_FRESHNESS: chrono::Duration = chrono::Duration::seconds(30);

/// Picks an agent among capability-eligible candidates using a configurable
/// strategy, and tracks round-robin state per capability.
pub struct LoadBalancer {
    strategy: LoadBalancingStrategy,
    round_robin_counters: Mutex<HashMap<String, usize>>,
}

impl LoadBalancer {
    pub fn new(strategy: LoadBalancingStrategy) -> Self {
        Self {
            strategy,
            round_robin_counters: Mutex::new(HashMap::new()),
        }
    }

    /// Five-step selection pipeline:
    /// 1. Filter to agents advertising `capability`.
    /// 2. Filter to healthy agents.
    /// 3. Filter to agents with spare capacity.
    /// 4. Apply the configured strategy to rank the survivors.
    /// 5. Return the winner, or `None` if no agent survives filtering.
    pub fn select<'a>(&self, agents: &'a [Agent], capability: &str) -> Option<&'a Agent> {
        let now = Utc::now();
        let eligible: Vec<&Agent> = agents
            .iter()
            .filter(|a| a.capabilities.iter().any(|c| c == capability))
            .filter(|a| a.healthy)
            .filter(|a| now - a.last_heartbeat <= HEARTBEAT_FRESHNESS)
            .filter(|a| a.available_capacity() > 0)
            .collect();

        if eligible.is_empty() {
            return None;
        }

        match self.strategy {
            LoadBalancingStrategy::LeastLoaded => {
                eligible.into_iter().min_by_key(|a| a.current_tasks)
            }
            LoadBalancingStrategy::RoundRobin => {
                let mut counters = self.round_robin_counters.lock().unwrap();
                let counter = counters.entry(capability.to_string()).or_insert(0);
                let chosen = eligible[*counter % eligible.len()];
                *counter = counter.wrapping_add(1);
                Some(chosen)
            }
            LoadBalancingStrategy::Weighted => eligible.into_iter().max_by(|a, b| {
                weighted_score(a)
                    .partial_cmp(&weighted_score(b))
                    .unwrap()
            }),
            LoadBalancingStrategy::Random => {
                use rand::Rng;
                let idx = rand::rng().random_range(0..eligible.len());
                Some(eligible[idx])
            }
        }
    }

    /// Record a successful dispatch, persisted via `orbit-db`.
    pub async fn report_success(&self, pool: &PgPool, agent_id: &str) -> Result<()> {
        agent_db::record_success(pool, agent_id).await
    }

    /// Record a failed dispatch, persisted via `orbit-db`. After three
    /// consecutive failures the agent is marked unhealthy and dropped from
    /// future selection until it recovers.
    pub async fn report_failure(&self, pool: &PgPool, agent_id: &str) -> Result<()> {
        agent_db::record_failure(pool, agent_id).await
    }

    /// Summary stats for observability: per-capability eligible/healthy
    /// counts among the given agent snapshot.
    pub fn stats(&self, agents: &[Agent]) -> BalancerStats {
        let mut per_capability: HashMap<String, CapabilityStats> = HashMap::new();
        for agent in agents {
            for capability in &agent.capabilities {
                let entry = per_capability.entry(capability.clone()).or_default();
                entry.total_agents += 1;
                if agent.healthy {
                    entry.healthy_agents += 1;
                }
                if agent.healthy && agent.available_capacity() > 0 {
                    entry.available_agents += 1;
                }
            }
        }
        BalancerStats { per_capability }
    }
}

/// `available_capacity * (1.0 - utilization)`: rewards agents that are both
/// lightly loaded and have more absolute headroom.
fn weighted_score(agent: &Agent) -> f64 {
    agent.available_capacity() as f64 * (1.0 - agent.utilization())
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityStats {
    pub total_agents: usize,
    pub healthy_agents: usize,
    pub available_agents: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BalancerStats {
    pub per_capability: HashMap<String, CapabilityStats>,
}
