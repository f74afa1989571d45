use async_trait::async_trait;
use relay_core::executor::{CheckpointSink, ExecutionContext, TaskExecutor};
use relay_core::model::{Checkpoint, ResultStatus};
use relay_worker::executors::prime::PrimeExecutor;
use serde_json::Value;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeCheckpointSink {
    stored: Mutex<Option<Checkpoint>>,
}

#[async_trait]
impl CheckpointSink for FakeCheckpointSink {
    async fn save(
        &self,
        task_id: i64,
        last_cursor: i64,
        partial_output: Value,
        elapsed_ms: i64,
        method: Option<&str>,
    ) -> anyhow::Result<()> {
        *self.stored.lock().unwrap() = Some(Checkpoint {
            task_id,
            last_cursor,
            partial_output,
            elapsed_ms,
            method: method.map(str::to_string),
            updated_at: chrono::Utc::now(),
        });
        Ok(())
    }

    async fn load(&self, _task_id: i64) -> anyhow::Result<Option<Checkpoint>> {
        Ok(self.stored.lock().unwrap().clone())
    }

    async fn delete(&self, _task_id: i64) -> anyhow::Result<()> {
        *self.stored.lock().unwrap() = None;
        Ok(())
    }
}

#[tokio::test]
async fn sieve_counts_primes_under_a_hundred() -> anyhow::Result<()> {
    let executor = PrimeExecutor::new(1_000_000, 100_000);
    let ctx = ExecutionContext {
        task_id: 1,
        attempt: 1,
        payload: serde_json::json!({"limit": 100, "method": "sieve"}),
        checkpoints: Arc::new(FakeCheckpointSink::default()),
    };

    let outcome = executor.execute(ctx).await?;
    assert_eq!(outcome.status, ResultStatus::Completed);
    assert_eq!(outcome.body["primes_count"], serde_json::json!(25));
    Ok(())
}

#[tokio::test]
async fn trial_division_counts_primes_under_a_hundred() -> anyhow::Result<()> {
    let executor = PrimeExecutor::new(1_000_000, 100_000);
    let ctx = ExecutionContext {
        task_id: 2,
        attempt: 1,
        payload: serde_json::json!({"limit": 100, "method": "trial_division"}),
        checkpoints: Arc::new(FakeCheckpointSink::default()),
    };

    let outcome = executor.execute(ctx).await?;
    assert_eq!(outcome.status, ResultStatus::Completed);
    assert_eq!(outcome.body["primes_count"], serde_json::json!(25));
    assert_eq!(outcome.body["was_resumed"], serde_json::json!(false));
    Ok(())
}

#[tokio::test]
async fn trial_division_resumes_from_a_checkpoint() -> anyhow::Result<()> {
    let sink = Arc::new(FakeCheckpointSink::default());

    // Plant a checkpoint as if the computation had already reached 50.
    let primes_so_far: Vec<i64> = (2..=50).filter(|&n| is_prime(n)).collect();
    sink.save(
        3,
        50,
        serde_json::to_value(&primes_so_far)?,
        10,
        Some("trial_division"),
    )
    .await?;

    let executor = PrimeExecutor::new(1_000_000, 100_000);
    let ctx = ExecutionContext {
        task_id: 3,
        attempt: 2,
        payload: serde_json::json!({"limit": 100, "method": "trial_division"}),
        checkpoints: sink,
    };

    let outcome = executor.execute(ctx).await?;
    assert_eq!(outcome.status, ResultStatus::Completed);
    assert_eq!(outcome.body["primes_count"], serde_json::json!(25));
    assert_eq!(outcome.body["was_resumed"], serde_json::json!(true));
    Ok(())
}

#[tokio::test]
async fn limit_above_the_cap_is_capped_and_flagged() -> anyhow::Result<()> {
    let executor = PrimeExecutor::new(1_000, 100_000);
    let ctx = ExecutionContext {
        task_id: 4,
        attempt: 1,
        payload: serde_json::json!({"limit": 5_000, "method": "sieve"}),
        checkpoints: Arc::new(FakeCheckpointSink::default()),
    };

    let outcome = executor.execute(ctx).await?;
    assert_eq!(outcome.status, ResultStatus::Completed);
    assert_eq!(outcome.body["requested_limit"], serde_json::json!(5_000));
    assert!(outcome.body["warning"].is_string());
    Ok(())
}

#[tokio::test]
async fn malformed_payload_fails_without_panicking() -> anyhow::Result<()> {
    let executor = PrimeExecutor::new(1_000_000, 100_000);
    let ctx = ExecutionContext {
        task_id: 5,
        attempt: 1,
        payload: serde_json::json!({"limit": "not a number"}),
        checkpoints: Arc::new(FakeCheckpointSink::default()),
    };

    let outcome = executor.execute(ctx).await?;
    assert_eq!(outcome.status, ResultStatus::Failed);
    Ok(())
}

fn is_prime(n: i64) -> bool {
    if n < 2 {
        return false;
    }
    let mut i = 2;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 1;
    }
    true
}
