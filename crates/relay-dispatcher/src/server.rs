//! The dispatcher HTTP surface (SPEC_FULL.md §4.B, §6).
//!
//! Stateless beyond the store plus the ephemeral `WorkerPool`: restarting the
//! dispatcher loses no authoritative state, since every correctness-bearing
//! fact lives in Postgres.

use crate::config::DispatcherConfig;
use crate::monitor::{self, MonitorConfig};
use crate::worker_pool::WorkerPool;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use relay_core::model::{ResultStatus, WorkerLiveness};
use relay_core::wire::{
    GetTaskRequest, HealthResponse, HeartbeatData, HeartbeatRequest, HeartbeatResponse,
    StatsResponse, SubmitResultData, SubmitResultRequest, SubmitResultResponse,
    SubmitTaskData, SubmitTaskRequest, SubmitTaskResponse, TaskEnvelope, TaskView, WorkerPoolEntry as WirePoolEntry,
    WorkerPoolStatsResponse, WorkerView,
};
use relay_store::PgStore;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};

struct AppState {
    store: PgStore,
    cfg: DispatcherConfig,
    worker_pool: WorkerPool,
}

pub struct DispatcherServer {
    pub addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<anyhow::Result<()>>,
}

impl DispatcherServer {
    pub async fn start(
        store: PgStore,
        cfg: DispatcherConfig,
        bind: SocketAddr,
        enable_monitor: bool,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("bind dispatcher to {bind}"))?;
        let addr = listener.local_addr().context("dispatcher local_addr")?;

        let state = Arc::new(AppState {
            store: store.clone(),
            cfg: cfg.clone(),
            worker_pool: WorkerPool::new(),
        });
        let app = build_router(state);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(run_server(
            listener,
            app,
            store,
            cfg,
            shutdown_rx,
            enable_monitor,
        ));

        Ok(Self {
            addr,
            shutdown_tx,
            join,
        })
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        use anyhow::Context;
        let _ = self.shutdown_tx.send(true);
        self.join.await.context("join dispatcher task")??;
        Ok(())
    }
}

async fn run_server(
    listener: TcpListener,
    app: Router,
    store: PgStore,
    cfg: DispatcherConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    enable_monitor: bool,
) -> anyhow::Result<()> {
    use anyhow::Context;

    let monitor_handle = enable_monitor.then(|| {
        tokio::spawn(monitor::run(
            store,
            MonitorConfig {
                interval: Duration::from_secs(cfg.heartbeat_monitor_interval_secs),
                heartbeat_timeout_secs: cfg.default_heartbeat_timeout_secs,
            },
            shutdown_rx.clone(),
        ))
    });

    let mut server_shutdown = shutdown_rx.clone();
    let server =
        axum::serve(listener, app.into_make_service()).with_graceful_shutdown(async move {
            while !*server_shutdown.borrow() {
                if server_shutdown.changed().await.is_err() {
                    break;
                }
            }
        });

    tokio::select! {
        res = server => { res.context("dispatcher serve")?; }
        _ = wait_shutdown(&mut shutdown_rx) => {}
    }

    if let Some(handle) = monitor_handle {
        let _ = handle.await;
    }

    Ok(())
}

async fn wait_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/submit-task", post(submit_task))
        .route("/get-task", post(get_task))
        .route("/heartbeat", post(heartbeat))
        .route("/submit-result", post(submit_result))
        .route("/task/:id", get(task_view))
        .route("/stats", get(stats))
        .route("/worker-pool/stats", get(worker_pool_stats))
        .route("/health", get(health))
        .with_state(state)
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal<E: std::fmt::Display>(err: E) -> Self {
        tracing::error!(error = %err, "dispatcher internal error");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(serde_json::json!({ "status": "error", "message": self.message }));
        (self.status, body).into_response()
    }
}

async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitTaskRequest>,
) -> ApiResult<(StatusCode, Json<SubmitTaskResponse>)> {
    if req.task_type.trim().is_empty() {
        return Err(ApiError::bad_request("task_type is required"));
    }

    let max_attempts = state.cfg.default_max_attempts;
    let task_id = state
        .store
        .insert(&req.task_type, req.task_data, max_attempts)
        .await
        .map_err(ApiError::internal)?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitTaskResponse {
            status: "success".to_string(),
            data: SubmitTaskData {
                task_id,
                task_type: req.task_type,
                status: "pending".to_string(),
                max_attempts,
            },
        }),
    ))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GetTaskRequest>,
) -> ApiResult<Json<TaskEnvelope>> {
    if req.worker_id.trim().is_empty() {
        return Err(ApiError::bad_request("worker_id is required"));
    }

    let claimed = state
        .store
        .claim(&req.worker_id, state.cfg.default_lease_duration_secs)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(match claimed {
        Some(task) => TaskEnvelope {
            task_id: Some(task.id),
            task_type: Some(task.task_type),
            payload: Some(task.payload),
            attempt: Some(task.attempts),
        },
        None => TaskEnvelope::default(),
    }))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<Json<HeartbeatResponse>> {
    if req.worker_id.trim().is_empty() {
        return Err(ApiError::bad_request("worker_id is required"));
    }

    let status_str = req.status.unwrap_or_else(|| "alive".to_string());
    let liveness: WorkerLiveness = status_str
        .parse()
        .map_err(|_| ApiError::bad_request("status must be 'alive' or 'dead'"))?;

    let worker = state
        .store
        .heartbeat(&req.worker_id, liveness, req.metadata)
        .await
        .map_err(ApiError::internal)?;

    // Advisory bookkeeping only; never consulted for correctness (SPEC_FULL.md §5).
    state
        .worker_pool
        .record_heartbeat(&req.worker_id, worker.liveness.as_str());

    Ok(Json(HeartbeatResponse {
        status: "success",
        data: HeartbeatData {
            worker_id: worker.worker_id,
            status: worker.liveness.as_str().to_string(),
            last_heartbeat: worker.last_heartbeat,
        },
    }))
}

async fn submit_result(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitResultRequest>,
) -> ApiResult<Json<SubmitResultResponse>> {
    let status: ResultStatus = req
        .status
        .parse()
        .map_err(|_| ApiError::bad_request("status must be 'completed' or 'failed'"))?;

    let outcome = state
        .store
        .save_result(
            req.task_id,
            &req.worker_id,
            req.result_body,
            status,
            req.computation_time_ms,
        )
        .await
        .map_err(ApiError::internal)?;

    let Some(outcome) = outcome else {
        return Err(ApiError::not_found("task not found"));
    };

    Ok(Json(SubmitResultResponse {
        status: "success",
        data: SubmitResultData {
            task_id: req.task_id,
            status: outcome.status.as_str().to_string(),
            saved: outcome.saved,
        },
    }))
}

async fn task_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<TaskView>> {
    let found = state.store.get_task(id).await.map_err(ApiError::internal)?;
    let Some((task, result)) = found else {
        return Err(ApiError::not_found("task not found"));
    };

    Ok(Json(TaskView {
        task_id: task.id,
        task_type: task.task_type,
        status: task.status.as_str().to_string(),
        attempts: task.attempts,
        max_attempts: task.max_attempts,
        assigned_to: task.assigned_to,
        result_body: result.as_ref().map(|r| r.result_body.clone()),
        computation_time_ms: result.and_then(|r| r.computation_time_ms),
    }))
}

async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatsResponse>> {
    let stats = state
        .store
        .stats(state.cfg.default_heartbeat_timeout_secs)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(StatsResponse {
        pending_tasks: stats.pending_tasks,
        in_progress_tasks: stats.in_progress_tasks,
        dead_lettered_tasks: stats.dead_lettered_tasks,
        active_workers: stats.active_workers,
        workers: stats
            .workers
            .into_iter()
            .map(|w| WorkerView {
                worker_id: w.worker_id,
                status: w.liveness.as_str().to_string(),
                last_heartbeat: w.last_heartbeat,
            })
            .collect(),
    }))
}

async fn worker_pool_stats(State(state): State<Arc<AppState>>) -> Json<WorkerPoolStatsResponse> {
    let snapshot = state.worker_pool.snapshot();
    Json(WorkerPoolStatsResponse {
        known_workers: snapshot.len(),
        workers: snapshot
            .into_iter()
            .map(|(worker_id, entry)| WirePoolEntry {
                worker_id,
                status: entry.status,
                last_seen: entry.last_seen,
            })
            .collect(),
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "dispatcher",
    })
}
