//! Domain model for tasks, results, workers, and checkpoints.
//!
//! These types mirror the tables described in the persisted state layout:
//! `tasks`, `task_results`, `workers`, `checkpoints`. They are store-agnostic;
//! `relay-store` maps rows to and from these shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
pub const DEFAULT_LEASE_SECONDS: i64 = 120;
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(crate::Error::msg(format!("unknown task status {other:?}"))),
        }
    }
}

/// A unit of dispatchable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub task_type: String,
    pub payload: Value,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A task whose attempts are exhausted but which never reached a
    /// terminal status: never reclaimable again, not auto-promoted to a
    /// distinct dead-letter status (see SPEC_FULL.md's Open Question
    /// disposition). Surfaced so operators can see the condition in stats.
    pub fn is_dead_lettered(&self) -> bool {
        !self.status.is_terminal() && self.attempts >= self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
}

impl ResultStatus {
    pub fn as_task_status(&self) -> TaskStatus {
        match self {
            ResultStatus::Completed => TaskStatus::Completed,
            ResultStatus::Failed => TaskStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Completed => "completed",
            ResultStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ResultStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(ResultStatus::Completed),
            "failed" => Ok(ResultStatus::Failed),
            other => Err(crate::Error::msg(format!(
                "status must be 'completed' or 'failed', got {other:?}"
            ))),
        }
    }
}

/// The outcome record for a task, opaque beyond its terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: i64,
    pub task_id: i64,
    pub worker_id: String,
    pub result_body: Value,
    pub status: ResultStatus,
    pub computation_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerLiveness {
    Alive,
    Dead,
}

impl WorkerLiveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerLiveness::Alive => "alive",
            WorkerLiveness::Dead => "dead",
        }
    }
}

impl std::str::FromStr for WorkerLiveness {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alive" => Ok(WorkerLiveness::Alive),
            "dead" => Ok(WorkerLiveness::Dead),
            other => Err(crate::Error::msg(format!("unknown liveness {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    pub last_heartbeat: DateTime<Utc>,
    pub liveness: WorkerLiveness,
    pub metadata: Option<Value>,
}

/// A resumable snapshot of an in-progress task's application-level progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: i64,
    pub last_cursor: i64,
    pub partial_output: Value,
    pub elapsed_ms: i64,
    pub method: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate counts backing `/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub pending_tasks: i64,
    pub in_progress_tasks: i64,
    pub dead_lettered_tasks: i64,
    pub active_workers: i64,
    pub workers: Vec<Worker>,
}
