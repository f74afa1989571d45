//! Companion binary for isolated task execution.
//!
//! Reads one task envelope from stdin, runs it through the same executor
//! registry the in-process worker uses, and writes the outcome as one line
//! of JSON to stdout. Talks to the state database directly for checkpoint
//! persistence — see `relay_worker::subprocess`.

use anyhow::Context;
use relay_core::executor::{ExecutionContext, TaskExecutor};
use relay_store::{PgStore, StoreCheckpointSink};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ProcEnvelopeIn {
    task_type: String,
    task_id: i64,
    attempt: i32,
    payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ProcEnvelopeOut {
    status: String,
    body: serde_json::Value,
    computation_time_ms: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("read task envelope from stdin")?;
    let envelope: ProcEnvelopeIn =
        serde_json::from_str(&input).context("parse task envelope")?;

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let primes_max_limit: i64 = std::env::var("PRIMES_MAX_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1_000_000);
    let checkpoint_interval: i64 = std::env::var("CHECKPOINT_INTERVAL")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100_000);

    let store = PgStore::connect(&database_url, 2)
        .await
        .context("connect to state database")?;
    let registry = relay_worker::executors::default_registry(primes_max_limit, checkpoint_interval);

    let Some(executor) = registry.get(&envelope.task_type) else {
        let out = ProcEnvelopeOut {
            status: "failed".to_string(),
            body: serde_json::json!({ "error": format!("unknown task type {:?}", envelope.task_type) }),
            computation_time_ms: 0,
        };
        println!("{}", serde_json::to_string(&out)?);
        return Ok(());
    };

    let ctx = ExecutionContext {
        task_id: envelope.task_id,
        attempt: envelope.attempt,
        payload: envelope.payload,
        checkpoints: Arc::new(StoreCheckpointSink::new(store)),
    };

    let outcome = executor.execute(ctx).await?;
    let out = ProcEnvelopeOut {
        status: outcome.status.as_str().to_string(),
        body: outcome.body,
        computation_time_ms: outcome.computation_time_ms,
    };
    let encoded = serde_json::to_string(&out)?;

    #[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
    write_shared_result(envelope.task_id, &encoded).await;

    println!("{encoded}");
    Ok(())
}

/// Mirrors the result to `CHECKPOINT_DIR/task_{id}/result.json` so a worker
/// that restores this process after a CRIU dump (and so has no live stdout
/// pipe to it anymore) can still observe how the task ended.
#[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
async fn write_shared_result(task_id: i64, encoded: &str) {
    if std::env::var("CHECKPOINT_ENABLED").as_deref() != Ok("true") {
        return;
    }
    let checkpoint_dir =
        std::env::var("CHECKPOINT_DIR").unwrap_or_else(|_| "checkpoints".to_string());
    let checkpointer = relay_worker::checkpoint_process::ProcessCheckpointer::new(checkpoint_dir);
    let path = checkpointer.result_path(task_id);
    if let Some(parent) = path.parent() {
        if let Err(err) = tokio::fs::create_dir_all(parent).await {
            tracing::warn!(task_id, error = %err, "failed to create shared result dir");
            return;
        }
    }
    if let Err(err) = tokio::fs::write(&path, encoded).await {
        tracing::warn!(task_id, error = %err, "failed to write shared result file");
    }
}
