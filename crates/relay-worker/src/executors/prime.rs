//! Reference executor: count (and optionally checkpoint through) primes up
//! to a limit, using one of two methods.
//!
//! Grounded directly on the bundled task this service was distilled from: a
//! sieve of Eratosthenes for the default path, and an incrementally
//! checkpointable trial-division path for when a task needs to survive a
//! worker restart mid-computation. The sieve has no natural resume point, so
//! (matching the source behavior) a checkpoint found under `sieve` is
//! discarded and the computation restarts from scratch.

use async_trait::async_trait;
use relay_core::executor::{ExecutionContext, ExecutorOutcome, TaskExecutor};
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;
use tokio::task::JoinHandle;

pub struct PrimeExecutor {
    max_limit: i64,
    checkpoint_interval: i64,
}

impl PrimeExecutor {
    pub fn new(max_limit: i64, checkpoint_interval: i64) -> Self {
        Self {
            max_limit,
            checkpoint_interval,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PrimePayload {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default = "default_method")]
    method: String,
}

fn default_limit() -> i64 {
    100_000
}

fn default_method() -> String {
    "sieve".to_string()
}

#[async_trait]
impl TaskExecutor for PrimeExecutor {
    async fn execute(&self, ctx: ExecutionContext) -> anyhow::Result<ExecutorOutcome> {
        let payload: PrimePayload = match serde_json::from_value(ctx.payload.clone()) {
            Ok(p) => p,
            Err(err) => return Ok(ExecutorOutcome::failed(format!("invalid payload: {err}"), 0)),
        };

        let requested_limit = payload.limit;
        let limit = requested_limit.min(self.max_limit);
        let start = Instant::now();

        let result = match payload.method.as_str() {
            "trial_division" => {
                run_trial_division(&ctx, limit, self.checkpoint_interval, start).await
            }
            _ => run_sieve(&ctx, limit, start).await,
        };

        let (mut primes, was_resumed, checkpoint_elapsed_ms, checkpoint_writes) = match result {
            Ok(v) => v,
            Err(err) => {
                let elapsed_ms = start.elapsed().as_millis() as i64;
                return Ok(ExecutorOutcome::failed(err.to_string(), elapsed_ms));
            }
        };
        primes.sort_unstable();

        // The checkpoint saves below ran on their own spawned tasks so they
        // never serialized against the compute loop; wait for every one of
        // them to land before reporting a terminal outcome, so no checkpoint
        // write can still be in flight (or arrive) after the final commit.
        for handle in checkpoint_writes {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(task_id = ctx.task_id, error = %err, "checkpoint write failed");
                }
                Err(err) => {
                    tracing::warn!(task_id = ctx.task_id, error = %err, "checkpoint write task panicked");
                }
            }
        }

        let _ = ctx.checkpoints.delete(ctx.task_id).await;

        let total_elapsed_ms = start.elapsed().as_millis() as i64 + checkpoint_elapsed_ms;
        let mut body = serde_json::json!({
            "primes_count": primes.len(),
            "primes": primes,
            "method": payload.method,
            "was_resumed": was_resumed,
            "elapsed_ms": total_elapsed_ms,
        });
        if requested_limit > self.max_limit {
            body["warning"] = Value::String(format!(
                "requested limit {requested_limit} was capped to {}",
                self.max_limit
            ));
            body["requested_limit"] = Value::from(requested_limit);
        }

        Ok(ExecutorOutcome::completed(body, total_elapsed_ms))
    }
}

type CheckpointHandle = JoinHandle<anyhow::Result<()>>;

async fn run_sieve(
    ctx: &ExecutionContext,
    limit: i64,
    _start: Instant,
) -> anyhow::Result<(Vec<i64>, bool, i64, Vec<CheckpointHandle>)> {
    if ctx.checkpoints.load(ctx.task_id).await?.is_some() {
        tracing::warn!(
            task_id = ctx.task_id,
            "sieve method does not support resume; discarding checkpoint and recomputing"
        );
    }

    if limit < 2 {
        return Ok((Vec::new(), false, 0, Vec::new()));
    }

    let limit = limit as usize;
    let mut is_prime = vec![true; limit + 1];
    is_prime[0] = false;
    is_prime[1] = false;

    let mut p = 2usize;
    while p * p <= limit {
        if is_prime[p] {
            let mut multiple = p * p;
            while multiple <= limit {
                is_prime[multiple] = false;
                multiple += p;
            }
        }
        p += 1;
        if p % 4096 == 0 {
            tokio::task::yield_now().await;
        }
    }

    let primes = (2..=limit)
        .filter(|&n| is_prime[n])
        .map(|n| n as i64)
        .collect();
    Ok((primes, false, 0, Vec::new()))
}

async fn run_trial_division(
    ctx: &ExecutionContext,
    limit: i64,
    checkpoint_interval: i64,
    start: Instant,
) -> anyhow::Result<(Vec<i64>, bool, i64, Vec<CheckpointHandle>)> {
    let checkpoint = ctx.checkpoints.load(ctx.task_id).await?;

    let (mut primes, resume_from, was_resumed, checkpoint_elapsed_ms) = match checkpoint {
        Some(cp) if cp.method.as_deref() == Some("trial_division") => {
            let primes: Vec<i64> = serde_json::from_value(cp.partial_output)
                .unwrap_or_default();
            tracing::info!(
                task_id = ctx.task_id,
                last_cursor = cp.last_cursor,
                primes_found = primes.len(),
                "resuming trial division from checkpoint"
            );
            (primes, cp.last_cursor + 1, true, cp.elapsed_ms)
        }
        _ => (Vec::new(), 2, false, 0),
    };

    let mut checkpoint_writes = Vec::new();

    for n in resume_from..=limit.max(1) {
        if n < 2 {
            continue;
        }
        if is_prime_trial(n) {
            primes.push(n);
        }

        if n % checkpoint_interval == 0 {
            let elapsed_ms = start.elapsed().as_millis() as i64 + checkpoint_elapsed_ms;
            let sink = ctx.checkpoints.clone();
            let task_id = ctx.task_id;
            let partial = serde_json::to_value(&primes)?;
            checkpoint_writes.push(tokio::spawn(async move {
                sink.save(task_id, n, partial, elapsed_ms, Some("trial_division"))
                    .await
            }));
            tokio::task::yield_now().await;
        }
    }

    Ok((primes, was_resumed, checkpoint_elapsed_ms, checkpoint_writes))
}

fn is_prime_trial(n: i64) -> bool {
    if n < 2 {
        return false;
    }
    let mut i = 2i64;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 1;
    }
    true
}
