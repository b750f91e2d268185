use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a task as it moves through the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "retrying" => Ok(Self::Retrying),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// How a multi-stage workflow's agent executions are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Parallel,
    Sequential,
    Hybrid,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parallel => "parallel",
            Self::Sequential => "sequential",
            Self::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionMode {
    type Err = ExecutionModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parallel" => Ok(Self::Parallel),
            "sequential" => Ok(Self::Sequential),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(ExecutionModeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ExecutionMode`] string.
#[derive(Debug, Clone)]
pub struct ExecutionModeParseError(pub String);

impl fmt::Display for ExecutionModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid execution mode: {:?}", self.0)
    }
}

impl std::error::Error for ExecutionModeParseError {}

// ---------------------------------------------------------------------------

/// Strategy the load balancer uses to pick an agent among eligible
/// candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    LeastLoaded,
    RoundRobin,
    Weighted,
    Random,
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LeastLoaded => "least_loaded",
            Self::RoundRobin => "round_robin",
            Self::Weighted => "weighted",
            Self::Random => "random",
        };
        f.write_str(s)
    }
}

impl FromStr for LoadBalancingStrategy {
    type Err = LoadBalancingStrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "least_loaded" => Ok(Self::LeastLoaded),
            "round_robin" => Ok(Self::RoundRobin),
            "weighted" => Ok(Self::Weighted),
            "random" => Ok(Self::Random),
            other => Err(LoadBalancingStrategyParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`LoadBalancingStrategy`] string.
#[derive(Debug, Clone)]
pub struct LoadBalancingStrategyParseError(pub String);

impl fmt::Display for LoadBalancingStrategyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid load balancing strategy: {:?}", self.0)
    }
}

impl std::error::Error for LoadBalancingStrategyParseError {}

// ---------------------------------------------------------------------------

/// Stable error codes returned to task submitters, carried inside a task's
/// `error` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UnknownTaskType,
    NoAgentsAvailable,
    WorkerFailure,
    Timeout,
    StateStoreError,
    Cancelled,
    ValidationError,
}

impl ErrorCode {
    /// Whether a failure with this code is eligible for automatic retry.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::WorkerFailure | Self::Timeout | Self::StateStoreError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnknownTaskType => "UNKNOWN_TASK_TYPE",
            Self::NoAgentsAvailable => "NO_AGENTS_AVAILABLE",
            Self::WorkerFailure => "WORKER_FAILURE",
            Self::Timeout => "TIMEOUT",
            Self::StateStoreError => "STATE_STORE_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::ValidationError => "VALIDATION_ERROR",
        };
        f.write_str(s)
    }
}

/// The `{code, message, retryable}` error envelope stored alongside a failed
/// task and returned from the public status API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl TaskErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            retryable: code.is_retryable(),
            code,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// One stage's dispatch record within a task's execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub agent_id: String,
    pub capability: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

/// A task -- the unit of work submitted to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub task_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub priority: i32,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub agent_executions: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Decode the `error` column into a [`TaskErrorInfo`], if present.
    pub fn error_info(&self) -> Option<TaskErrorInfo> {
        self.error
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Decode the `agent_executions` column into a list of
    /// [`AgentExecution`] records.
    pub fn executions(&self) -> Vec<AgentExecution> {
        serde_json::from_value(self.agent_executions.clone()).unwrap_or_default()
    }
}

/// A registered worker agent.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub agent_id: String,
    pub agent_type: String,
    pub endpoint: String,
    pub capabilities: Vec<String>,
    pub max_concurrent_tasks: i32,
    pub current_tasks: i32,
    pub healthy: bool,
    pub total_tasks_completed: i64,
    pub total_tasks_failed: i64,
    pub consecutive_failures: i32,
    pub metadata: serde_json::Value,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Agent {
    /// Fraction of capacity currently in use, in `[0.0, 1.0]`.
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent_tasks <= 0 {
            return 1.0;
        }
        (self.current_tasks as f64 / self.max_concurrent_tasks as f64).min(1.0)
    }

    /// Remaining task slots.
    pub fn available_capacity(&self) -> i32 {
        (self.max_concurrent_tasks - self.current_tasks).max(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Retrying,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn execution_mode_display_roundtrip() {
        let variants = [
            ExecutionMode::Parallel,
            ExecutionMode::Sequential,
            ExecutionMode::Hybrid,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: ExecutionMode = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn execution_mode_invalid() {
        assert!("concurrent".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn load_balancing_strategy_display_roundtrip() {
        let variants = [
            LoadBalancingStrategy::LeastLoaded,
            LoadBalancingStrategy::RoundRobin,
            LoadBalancingStrategy::Weighted,
            LoadBalancingStrategy::Random,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: LoadBalancingStrategy = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn load_balancing_strategy_invalid() {
        assert!("fastest".parse::<LoadBalancingStrategy>().is_err());
    }

    #[test]
    fn error_code_retryable_flags() {
        assert!(ErrorCode::WorkerFailure.is_retryable());
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::StateStoreError.is_retryable());
        assert!(!ErrorCode::ValidationError.is_retryable());
        assert!(!ErrorCode::UnknownTaskType.is_retryable());
        assert!(!ErrorCode::NoAgentsAvailable.is_retryable());
        assert!(!ErrorCode::Cancelled.is_retryable());
    }

    #[test]
    fn agent_utilization_and_capacity() {
        let agent = Agent {
            agent_id: "a1".into(),
            agent_type: "ingest".into(),
            endpoint: "http://localhost:9000".into(),
            capabilities: vec!["ingest".into()],
            max_concurrent_tasks: 4,
            current_tasks: 1,
            healthy: true,
            total_tasks_completed: 0,
            total_tasks_failed: 0,
            consecutive_failures: 0,
            metadata: serde_json::json!({}),
            registered_at: Utc::now(),
            last_heartbeat: Utc::now(),
        };
        assert_eq!(agent.available_capacity(), 3);
        assert!((agent.utilization() - 0.25).abs() < f64::EPSILON);
    }
}
