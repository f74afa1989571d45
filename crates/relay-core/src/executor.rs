//! The task executor seam.
//!
//! Replaces the dynamic `importlib.import_module(f"tasks.{task_type}_task")`
//! dispatch of the original implementation with an explicit registry: a
//! worker registers one `Arc<dyn TaskExecutor>` per task type at startup, and
//! an unrecognized type yields a structured failure rather than a runtime
//! import error.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything an executor needs to run one attempt of a task, including the
/// means to checkpoint its own progress.
pub struct ExecutionContext {
    pub task_id: i64,
    pub attempt: i32,
    pub payload: Value,
    pub checkpoints: Arc<dyn CheckpointSink>,
}

/// The checkpoint side-channel an executor writes through. Kept as a trait
/// (rather than a concrete store handle) so executors don't need to know
/// about Postgres, and so tests can exercise checkpoint resume with an
/// in-memory fake.
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn save(
        &self,
        task_id: i64,
        last_cursor: i64,
        partial_output: Value,
        elapsed_ms: i64,
        method: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn load(&self, task_id: i64) -> anyhow::Result<Option<crate::model::Checkpoint>>;

    async fn delete(&self, task_id: i64) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ExecutorOutcome {
    pub status: crate::model::ResultStatus,
    pub body: Value,
    pub computation_time_ms: i64,
}

impl ExecutorOutcome {
    pub fn completed(body: Value, computation_time_ms: i64) -> Self {
        Self {
            status: crate::model::ResultStatus::Completed,
            body,
            computation_time_ms,
        }
    }

    pub fn failed(error: impl Into<String>, computation_time_ms: i64) -> Self {
        Self {
            status: crate::model::ResultStatus::Failed,
            body: serde_json::json!({ "error": error.into() }),
            computation_time_ms,
        }
    }
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one attempt of the task to completion (or failure). Must not
    /// panic on malformed payloads — return `ExecutorOutcome::failed` so the
    /// dispatcher can commit a terminal `failed` result instead of the
    /// worker crashing mid-task.
    async fn execute(&self, ctx: ExecutionContext) -> anyhow::Result<ExecutorOutcome>;
}

/// Maps a task's `task_type` tag to the executor that knows how to run it.
#[derive(Clone, Default)]
pub struct TaskExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl TaskExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(task_type.into(), executor);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(task_type).cloned()
    }
}
