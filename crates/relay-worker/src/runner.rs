//! The worker's three independent loops (SPEC_FULL.md §4.D, §5): task
//! processing, heartbeating, and outbound cache replay. Each only shares the
//! shutdown signal with the others — a stall in one never blocks the rest,
//! mirroring the teacher's separately-spawned loop tasks.

use crate::config::WorkerConfig;
use crate::dispatcher_client::DispatcherClient;
use crate::executors::default_registry;
use crate::outbound_cache::{CachedResult, OutboundCache};
use crate::subprocess::SubprocessExecutor;
use anyhow::Context;
use chrono::Utc;
use relay_core::executor::{CheckpointSink, ExecutionContext, TaskExecutor, TaskExecutorRegistry};
use relay_core::wire::SubmitResultRequest;
use relay_store::{PgStore, StoreCheckpointSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub async fn run(cfg: WorkerConfig) -> anyhow::Result<()> {
    let client = DispatcherClient::new(cfg.dispatcher_url.clone());
    let cache = Arc::new(
        OutboundCache::new(cfg.cache_dir.join(&cfg.worker_id))
            .await
            .context("init outbound cache")?,
    );

    let store = PgStore::connect(&cfg.db_path, 5)
        .await
        .context("connect to state database")?;
    let checkpoints: Arc<dyn CheckpointSink> = Arc::new(StoreCheckpointSink::new(store));
    let registry = Arc::new(default_registry(cfg.primes_max_limit, cfg.checkpoint_interval));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat = tokio::spawn(heartbeat_loop(
        client.clone(),
        cfg.worker_id.clone(),
        Duration::from_secs(cfg.heartbeat_interval_secs),
        shutdown_rx.clone(),
    ));
    let cache_retry = tokio::spawn(cache_retry_loop(
        client.clone(),
        cache.clone(),
        cfg.cache_ttl_secs,
        Duration::from_secs(cfg.cache_retry_interval_secs),
        shutdown_rx.clone(),
    ));
    let task_loop = tokio::spawn(task_loop(
        client,
        cfg.clone(),
        registry,
        checkpoints,
        cache,
        shutdown_rx.clone(),
    ));

    tokio::signal::ctrl_c().await.context("wait for shutdown signal")?;
    tracing::info!(event = "worker_shutdown", worker_id = %cfg.worker_id, "shutting down worker");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(heartbeat, cache_retry, task_loop);
    Ok(())
}

fn should_stop(shutdown_rx: &watch::Receiver<bool>) -> bool {
    *shutdown_rx.borrow()
}

async fn heartbeat_loop(
    client: DispatcherClient,
    worker_id: String,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    while !should_stop(&shutdown_rx) {
        let metadata = serde_json::json!({ "timestamp": Utc::now().to_rfc3339() });
        if let Err(err) = client.heartbeat(&worker_id, metadata).await {
            tracing::warn!(error = %err, "heartbeat failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
}

async fn cache_retry_loop(
    client: DispatcherClient,
    cache: Arc<OutboundCache>,
    ttl_secs: i64,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    while !should_stop(&shutdown_rx) {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => { continue; }
        }

        match cache.list_replayable(ttl_secs).await {
            Ok(entries) => {
                for entry in entries {
                    if replay_cached(&client, &cache, &entry).await {
                        tracing::info!(task_id = entry.task_id, "replayed cached result");
                    }
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to list outbound cache"),
        }
    }
}

async fn replay_cached(client: &DispatcherClient, cache: &OutboundCache, entry: &CachedResult) -> bool {
    let req = SubmitResultRequest {
        task_id: entry.task_id,
        worker_id: entry.worker_id.clone(),
        status: entry.status.as_str().to_string(),
        result_body: entry.result_body.clone(),
        computation_time_ms: entry.computation_time_ms,
    };

    match client.submit_result(&req).await {
        Ok(_) => {
            if let Err(err) = cache.remove(entry.task_id).await {
                tracing::warn!(error = %err, task_id = entry.task_id, "failed to remove replayed cache entry");
            }
            true
        }
        Err(err) => {
            tracing::warn!(error = %err, task_id = entry.task_id, "cached result still unreachable");
            false
        }
    }
}

async fn task_loop(
    client: DispatcherClient,
    cfg: WorkerConfig,
    registry: Arc<TaskExecutorRegistry>,
    checkpoints: Arc<dyn CheckpointSink>,
    cache: Arc<OutboundCache>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let poll_interval = Duration::from_secs(cfg.poll_interval_secs);

    while !should_stop(&shutdown_rx) {
        let envelope = match client.get_task(&cfg.worker_id).await {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, "failed to poll for task");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
                continue;
            }
        };

        let (Some(task_id), Some(task_type), Some(payload), Some(attempt)) =
            (envelope.task_id, envelope.task_type, envelope.payload, envelope.attempt)
        else {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
            continue;
        };

        tracing::info!(event = "task_received", task_id, %task_type, attempt, "task received");

        let outcome = execute_task(
            &cfg,
            &registry,
            &checkpoints,
            task_id,
            attempt,
            &task_type,
            payload,
        )
        .await;

        let req = SubmitResultRequest {
            task_id,
            worker_id: cfg.worker_id.clone(),
            status: outcome.status.as_str().to_string(),
            result_body: outcome.body.clone(),
            computation_time_ms: Some(outcome.computation_time_ms),
        };

        match client.submit_result(&req).await {
            Ok(resp) => {
                tracing::info!(event = "task_result_submitted", task_id, saved = resp.data.saved, "result submitted");
            }
            Err(err) => {
                tracing::warn!(error = %err, task_id, "dispatcher unreachable, caching result for later retry");
                let cached = CachedResult {
                    task_id,
                    worker_id: cfg.worker_id.clone(),
                    status: outcome.status,
                    result_body: outcome.body,
                    computation_time_ms: Some(outcome.computation_time_ms),
                    cached_at: Utc::now(),
                };
                if let Err(err) = cache.put(&cached).await {
                    tracing::error!(error = %err, task_id, "failed to cache unsent result");
                }
            }
        }
    }
}

async fn execute_task(
    cfg: &WorkerConfig,
    registry: &TaskExecutorRegistry,
    checkpoints: &Arc<dyn CheckpointSink>,
    task_id: i64,
    attempt: i32,
    task_type: &str,
    payload: serde_json::Value,
) -> relay_core::executor::ExecutorOutcome {
    use relay_core::executor::ExecutorOutcome;

    let result = if cfg.use_fork_execution {
        let binary_path = cfg
            .executor_proc_path
            .clone()
            .unwrap_or_else(default_executor_proc_path);
        let executor = SubprocessExecutor::new(task_type, binary_path, cfg.db_path.clone());
        #[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
        let executor = if cfg.checkpoint_enabled {
            let checkpointer = std::sync::Arc::new(crate::checkpoint_process::ProcessCheckpointer::new(
                cfg.checkpoint_dir.clone(),
            ));
            executor.with_process_checkpoint(
                checkpointer,
                std::time::Duration::from_secs(cfg.process_checkpoint_interval_secs),
            )
        } else {
            executor
        };
        executor
            .execute(ExecutionContext {
                task_id,
                attempt,
                payload,
                checkpoints: checkpoints.clone(),
            })
            .await
    } else {
        match registry.get(task_type) {
            Some(executor) => {
                executor
                    .execute(ExecutionContext {
                        task_id,
                        attempt,
                        payload,
                        checkpoints: checkpoints.clone(),
                    })
                    .await
            }
            None => Ok(ExecutorOutcome::failed(
                format!("task type {task_type:?} is not registered with this worker"),
                0,
            )),
        }
    };

    result.unwrap_or_else(|err| {
        tracing::error!(error = %err, task_id, "task execution error");
        ExecutorOutcome::failed(err.to_string(), 0)
    })
}

fn default_executor_proc_path() -> std::path::PathBuf {
    let mut path = std::env::current_exe().unwrap_or_else(|_| "relay-worker".into());
    path.set_file_name("relay-executor-proc");
    path
}
