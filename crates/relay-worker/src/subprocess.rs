//! Isolated-subprocess execution (SPEC_FULL.md §4.D).
//!
//! Runs a task in a fresh `relay-executor-proc` child rather than in this
//! worker's own process. The child talks to the state database directly to
//! persist its own checkpoints, the same way the in-process path does —
//! only the process boundary differs. This isolation is what makes
//! OS-level checkpointing (`process-checkpoint`) possible: a CRIU dump
//! needs a dedicated process, not a task running inline in the worker.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use relay_core::executor::{ExecutionContext, ExecutorOutcome, TaskExecutor};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, process::Stdio, time::Duration};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

#[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
use crate::checkpoint_process::ProcessCheckpointer;
#[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
use std::sync::Arc;

const EXECUTE_TIMEOUT: Duration = Duration::from_secs(300);
/// Bounded wait for a CRIU-restored process to finish, mirroring the
/// original worker's own 300s polling timeout.
#[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
const RESTORE_WAIT_TIMEOUT: Duration = Duration::from_secs(300);
#[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
const RESTORE_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct ProcEnvelopeIn {
    task_type: String,
    task_id: i64,
    attempt: i32,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ProcEnvelopeOut {
    status: String,
    body: serde_json::Value,
    computation_time_ms: i64,
}

pub struct SubprocessExecutor {
    task_type: String,
    binary_path: PathBuf,
    database_url: String,
    #[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
    process_checkpoint: Option<(Arc<ProcessCheckpointer>, Duration)>,
}

impl SubprocessExecutor {
    pub fn new(task_type: impl Into<String>, binary_path: PathBuf, database_url: String) -> Self {
        Self {
            task_type: task_type.into(),
            binary_path,
            database_url,
            #[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
            process_checkpoint: None,
        }
    }

    /// Enable OS-level checkpointing of the spawned child: `interval`-spaced
    /// `criu dump --leave-running` while it runs, and a `criu restore` check
    /// before spawning fresh, if an earlier attempt left a snapshot behind.
    #[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
    pub fn with_process_checkpoint(mut self, checkpointer: Arc<ProcessCheckpointer>, interval: Duration) -> Self {
        self.process_checkpoint = Some((checkpointer, interval));
        self
    }
}

#[async_trait]
impl TaskExecutor for SubprocessExecutor {
    async fn execute(&self, ctx: ExecutionContext) -> anyhow::Result<ExecutorOutcome> {
        #[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
        if let Some((checkpointer, _)) = &self.process_checkpoint {
            if let Some(restored) = try_restore(checkpointer, ctx.task_id).await {
                return Ok(restored);
            }
        }

        let envelope = ProcEnvelopeIn {
            task_type: self.task_type.clone(),
            task_id: ctx.task_id,
            attempt: ctx.attempt,
            payload: ctx.payload,
        };
        let input = serde_json::to_vec(&envelope).context("encode executor-proc envelope")?;

        let mut child = Command::new(&self.binary_path)
            .env("DATABASE_URL", &self.database_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {}", self.binary_path.display()))?;

        let mut stdin = child.stdin.take().context("take executor-proc stdin")?;
        stdin
            .write_all(&input)
            .await
            .context("write task envelope to executor-proc")?;
        stdin.shutdown().await.context("close executor-proc stdin")?;
        drop(stdin);

        #[allow(unused_variables)]
        let pid = child.id();
        let mut stdout = child.stdout.take().context("take executor-proc stdout")?;
        let mut stderr = child.stderr.take().context("take executor-proc stderr")?;

        let wait = async {
            let mut out = Vec::new();
            stdout.read_to_end(&mut out).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((out, status))
        };

        #[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
        let periodic = self
            .process_checkpoint
            .as_ref()
            .zip(pid)
            .map(|((checkpointer, interval), pid)| (checkpointer.clone(), *interval, pid));

        #[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
        let (stdout_bytes, status) = match periodic {
            Some((checkpointer, interval, pid)) => {
                match tokio::time::timeout(
                    EXECUTE_TIMEOUT,
                    wait_with_periodic_dump(wait, checkpointer, pid, ctx.task_id, interval),
                )
                .await
                {
                    Ok(res) => res.context("wait for executor-proc")?,
                    Err(_) => {
                        let _ = child.kill().await;
                        return Err(anyhow!("executor-proc timed out after {EXECUTE_TIMEOUT:?}"));
                    }
                }
            }
            None => match tokio::time::timeout(EXECUTE_TIMEOUT, wait).await {
                Ok(res) => res.context("wait for executor-proc")?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(anyhow!("executor-proc timed out after {EXECUTE_TIMEOUT:?}"));
                }
            },
        };

        #[cfg(not(all(feature = "process-checkpoint", target_os = "linux")))]
        let (stdout_bytes, status) = match tokio::time::timeout(EXECUTE_TIMEOUT, wait).await {
            Ok(res) => res.context("wait for executor-proc")?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(anyhow!("executor-proc timed out after {EXECUTE_TIMEOUT:?}"));
            }
        };

        if !status.success() {
            let mut err_bytes = Vec::new();
            let _ = stderr.read_to_end(&mut err_bytes).await;
            return Err(anyhow!(
                "executor-proc exited with {status}: {}",
                String::from_utf8_lossy(&err_bytes)
            ));
        }

        let last_line = stdout_bytes
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .next_back()
            .ok_or_else(|| anyhow!("executor-proc produced no output"))?;

        let parsed: ProcEnvelopeOut =
            serde_json::from_slice(last_line).context("parse executor-proc output")?;

        let status: relay_core::model::ResultStatus = parsed.status.parse()?;
        Ok(ExecutorOutcome {
            status,
            body: parsed.body,
            computation_time_ms: parsed.computation_time_ms,
        })
    }
}

/// Races the child's completion against a periodic CRIU dump of its pid, so
/// the dump can never block or delay the result once it's ready.
#[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
async fn wait_with_periodic_dump(
    wait: impl std::future::Future<Output = std::io::Result<(Vec<u8>, std::process::ExitStatus)>>,
    checkpointer: Arc<ProcessCheckpointer>,
    pid: u32,
    task_id: i64,
    interval: Duration,
) -> std::io::Result<(Vec<u8>, std::process::ExitStatus)> {
    tokio::pin!(wait);
    loop {
        tokio::select! {
            res = &mut wait => return res,
            _ = tokio::time::sleep(interval) => {
                match checkpointer.checkpoint(pid, task_id).await {
                    Ok(dir) => tracing::info!(task_id, pid, dir = %dir.display(), "process checkpoint dumped"),
                    Err(err) => tracing::warn!(task_id, pid, error = %err, "process checkpoint dump failed"),
                }
            }
        }
    }
}

/// Checks for a snapshot left by an earlier attempt and, if found, restores
/// it and waits for the resumed process to report a result through the
/// shared result file (its stdout pipe to this worker no longer exists).
/// Falls back to a fresh execution on any failure, cleaning up the stale
/// snapshot so the next attempt doesn't trip over it again.
#[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
async fn try_restore(checkpointer: &ProcessCheckpointer, task_id: i64) -> Option<ExecutorOutcome> {
    let dir = checkpointer.dir_for(task_id);
    if !dir.exists() {
        return None;
    }

    tracing::info!(task_id, "found process-level checkpoint, attempting restore");
    if let Err(err) = checkpointer.restore(task_id).await {
        tracing::warn!(task_id, error = %err, "criu restore failed, falling back to fresh execution");
        let _ = checkpointer.cleanup(task_id).await;
        return None;
    }

    let result_path = checkpointer.result_path(task_id);
    let deadline = tokio::time::Instant::now() + RESTORE_WAIT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if let Ok(bytes) = tokio::fs::read(&result_path).await {
            if let Ok(parsed) = serde_json::from_slice::<ProcEnvelopeOut>(&bytes) {
                if let Ok(status) = parsed.status.parse::<relay_core::model::ResultStatus>() {
                    let _ = checkpointer.cleanup(task_id).await;
                    tracing::info!(task_id, "restored process reported a result");
                    return Some(ExecutorOutcome {
                        status,
                        body: parsed.body,
                        computation_time_ms: parsed.computation_time_ms,
                    });
                }
            }
        }
        tokio::time::sleep(RESTORE_POLL_INTERVAL).await;
    }

    tracing::warn!(task_id, "timed out waiting for restored process, falling back to fresh execution");
    let _ = checkpointer.cleanup(task_id).await;
    None
}
