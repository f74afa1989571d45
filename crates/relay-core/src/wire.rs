//! HTTP wire shapes for the dispatcher surface described in SPEC_FULL.md §6.
//!
//! Kept in `relay-core` (rather than duplicated in `relay-dispatcher` and
//! `relay-worker`) so the dispatcher and its clients can't drift on field
//! names — the mistake the original Python implementation was vulnerable to
//! with its hand-assembled `jsonify(...)` dicts on one side and raw
//! `response.json()[...]` indexing on the other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub task_type: String,
    #[serde(default = "default_task_data")]
    pub task_data: Value,
}

fn default_task_data() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub status: String,
    pub data: SubmitTaskData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskData {
    pub task_id: i64,
    pub task_type: String,
    pub status: String,
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskRequest {
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskEnvelope {
    pub task_id: Option<i64>,
    pub task_type: Option<String>,
    pub payload: Option<Value>,
    pub attempt: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatResponse {
    pub status: &'static str,
    pub data: HeartbeatData,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatData {
    pub worker_id: String,
    pub status: String,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResultRequest {
    pub task_id: i64,
    pub worker_id: String,
    pub status: String,
    #[serde(default = "default_task_data")]
    pub result_body: Value,
    #[serde(default)]
    pub computation_time_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResultResponse {
    pub status: &'static str,
    pub data: SubmitResultData,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResultData {
    pub task_id: i64,
    pub status: String,
    pub saved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: i64,
    pub task_type: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computation_time_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub pending_tasks: i64,
    pub in_progress_tasks: i64,
    pub dead_lettered_tasks: i64,
    pub active_workers: i64,
    pub workers: Vec<WorkerView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerView {
    pub worker_id: String,
    pub status: String,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolStatsResponse {
    pub known_workers: usize,
    pub workers: Vec<WorkerPoolEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolEntry {
    pub worker_id: String,
    pub status: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}
