//! The static `task_type -> [capability, ...]` workflow table.
//!
//! Embedded at compile time from `workflows.toml`, the same pattern the
//! teacher uses for its embedded preset tables: a constant loaded once via
//! `include_str!` plus `toml::from_str`, not a database table, because the
//! spec treats the workflow graph as fixed rather than dynamically
//! configurable (see spec.md's Non-goals: no dynamic workflow graphs).

use std::collections::HashMap;
use std::sync::LazyLock;

use orbit_db::models::ExecutionMode;
use serde::Deserialize;

const WORKFLOWS_TOML: &str = include_str!("workflows.toml");

#[derive(Debug, Deserialize)]
struct WorkflowFile {
    workflow: HashMap<String, WorkflowEntry>,
}

#[derive(Debug, Deserialize)]
struct WorkflowEntry {
    capabilities: Vec<String>,
    #[serde(default)]
    mode: Option<String>,
}

/// A resolved workflow: the ordered capabilities a task of this type walks
/// through, and the execution mode they're run under.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub task_type: String,
    pub capabilities: Vec<String>,
    pub mode: ExecutionMode,
}

static WORKFLOWS: LazyLock<HashMap<String, Workflow>> = LazyLock::new(|| {
    let file: WorkflowFile =
        toml::from_str(WORKFLOWS_TOML).expect("workflows.toml must be valid at compile time");

    file.workflow
        .into_iter()
        .map(|(task_type, entry)| {
            let mode = entry
                .mode
                .as_deref()
                .map(|m| m.parse().expect("workflows.toml has an invalid mode"))
                .unwrap_or(ExecutionMode::Sequential);
            let workflow = Workflow {
                task_type: task_type.clone(),
                capabilities: entry.capabilities,
                mode,
            };
            (task_type, workflow)
        })
        .collect()
});

/// Look up the workflow for a task type. Returns `None` for an unknown type,
/// which the orchestrator surfaces as `UNKNOWN_TASK_TYPE`.
pub fn lookup(task_type: &str) -> Option<&'static Workflow> {
    WORKFLOWS.get(task_type)
}

/// All known task types, for diagnostics and the CLI's `agents` listing.
pub fn known_task_types() -> Vec<&'static str> {
    WORKFLOWS.keys().map(|s| s.as_str()).collect()
}

/// Per-stage baseline latency used to produce `submit`'s advisory
/// `estimated_completion_ms`. Purely informational, never consulted by
/// scheduling or retry logic.
const BASELINE_STAGE_MS: i64 = 2_000;

/// A small per-task-type multiplier applied to the baseline estimate.
/// Unlisted task types default to 1.0.
fn type_multiplier(task_type: &str) -> f64 {
    match task_type {
        "real_time_monitoring" => 0.5,
        "report_generation" => 1.5,
        "podcast_intelligence" | "document_intelligence" => 2.0,
        _ => 1.0,
    }
}

/// Advisory estimate: `baseline_per_stage * stage_count * type_multiplier`.
/// Returns `None` for an unknown task type.
pub fn estimate_completion_ms(task_type: &str) -> Option<i64> {
    let workflow = lookup(task_type)?;
    let stages = workflow.capabilities.len().max(1) as i64;
    let base = BASELINE_STAGE_MS * stages;
    Some((base as f64 * type_multiplier(task_type)) as i64)
}
