//! The persistent task store: a thin, strictly-serializable layer over
//! Postgres implementing the operations in SPEC_FULL.md §4.A.
//!
//! Every operation here is either a single atomic `UPDATE ... RETURNING`
//! (relying on Postgres row locks for serializability) or a short
//! `pool.begin()` transaction using `SELECT ... FOR UPDATE`. No operation
//! spans more than one round trip's worth of business logic, so contention
//! shows up as lock wait time rather than as application-level retry loops.

use anyhow::Context;
use chrono::{DateTime, Utc};
use relay_core::model::{
    Checkpoint, ResultStatus, StoreStats, Task, TaskResult, TaskStatus, Worker, WorkerLiveness,
};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Outcome of `SaveResult`: whether this call's write actually applied.
/// A `saved: false` response means the task was already terminal — the
/// caller (the dispatcher's `/submit-result` handler) reports this as a
/// benign success so retried submissions are idempotent.
#[derive(Debug, Clone)]
pub struct SaveResultOutcome {
    pub saved: bool,
    pub status: TaskStatus,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connect to state database")?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run state database migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `Insert(type, payload, cap) -> id`.
    pub async fn insert(
        &self,
        task_type: &str,
        payload: Value,
        max_attempts: i32,
    ) -> anyhow::Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO tasks (task_type, payload, status, max_attempts)
            VALUES ($1, $2, 'pending', $3)
            RETURNING id
            "#,
        )
        .bind(task_type)
        .bind(&payload)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await
        .context("insert task")?;

        row.try_get::<i64, _>("id").context("read inserted id")
    }

    /// `Claim(worker, lease_seconds) -> Task | none`.
    ///
    /// The `WHERE id = (subquery ... FOR UPDATE SKIP LOCKED)` form makes the
    /// row selection and the claiming update one atomic statement: two
    /// concurrent claimants racing on the same row can never both win, and
    /// a claimant never blocks behind another claimant's unrelated row.
    pub async fn claim(&self, worker_id: &str, lease_seconds: i64) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'in_progress',
                assigned_to = $1,
                claimed_at = now(),
                lease_expires_at = now() + ($2 * interval '1 second'),
                attempts = attempts + 1,
                updated_at = now()
            WHERE id = (
                SELECT id FROM tasks
                WHERE (status = 'pending'
                       OR (status = 'in_progress' AND lease_expires_at < now()))
                  AND attempts < max_attempts
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, task_type, payload, status, assigned_to, claimed_at,
                      lease_expires_at, attempts, max_attempts, created_at, updated_at
            "#,
        )
        .bind(worker_id)
        .bind(lease_seconds as f64)
        .fetch_optional(&self.pool)
        .await
        .context("claim task")?;

        row.map(task_from_row).transpose()
    }

    /// `Heartbeat(worker, status, metadata)`.
    pub async fn heartbeat(
        &self,
        worker_id: &str,
        status: WorkerLiveness,
        metadata: Option<Value>,
    ) -> anyhow::Result<Worker> {
        let row = sqlx::query(
            r#"
            INSERT INTO workers (worker_id, last_heartbeat, status, metadata)
            VALUES ($1, now(), $2, $3)
            ON CONFLICT (worker_id) DO UPDATE SET
                last_heartbeat = now(),
                status = excluded.status,
                metadata = excluded.metadata
            RETURNING worker_id, last_heartbeat, status, metadata
            "#,
        )
        .bind(worker_id)
        .bind(status.as_str())
        .bind(&metadata)
        .fetch_one(&self.pool)
        .await
        .context("upsert worker heartbeat")?;

        worker_from_row(row)
    }

    /// `SaveResult(task, worker, body, status)`.
    ///
    /// Anchors idempotency: a task that is already terminal (completed or
    /// failed) never accepts a second write. This is the single
    /// check-then-insert transaction that resolves late, duplicate
    /// submissions from a reclaimed worker racing a replacement worker's
    /// commit — see SPEC_FULL.md §9.
    pub async fn save_result(
        &self,
        task_id: i64,
        worker_id: &str,
        body: Value,
        status: ResultStatus,
        computation_time_ms: Option<i64>,
    ) -> anyhow::Result<Option<SaveResultOutcome>> {
        let mut tx = self.pool.begin().await.context("begin save_result tx")?;

        let row = sqlx::query("SELECT status FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await
            .context("read task status")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let current: String = row.try_get("status").context("read status column")?;
        let current: TaskStatus = current.parse()?;

        if current.is_terminal() {
            tx.commit().await.context("commit save_result (no-op)")?;
            return Ok(Some(SaveResultOutcome {
                saved: false,
                status: current,
            }));
        }

        sqlx::query(
            r#"
            INSERT INTO task_results (task_id, worker_id, result_body, status, computation_time_ms)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(&body)
        .bind(status.as_str())
        .bind(computation_time_ms)
        .execute(&mut *tx)
        .await
        .context("insert task result")?;

        sqlx::query("UPDATE tasks SET status = $2, updated_at = now() WHERE id = $1")
            .bind(task_id)
            .bind(status.as_task_status().as_str())
            .execute(&mut *tx)
            .await
            .context("update task status")?;

        tx.commit().await.context("commit save_result")?;

        Ok(Some(SaveResultOutcome {
            saved: true,
            status: status.as_task_status(),
        }))
    }

    /// `GetTask(task)`: task plus any committed result.
    pub async fn get_task(&self, task_id: i64) -> anyhow::Result<Option<(Task, Option<TaskResult>)>> {
        let task_row = sqlx::query(
            r#"
            SELECT id, task_type, payload, status, assigned_to, claimed_at,
                   lease_expires_at, attempts, max_attempts, created_at, updated_at
            FROM tasks WHERE id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("read task")?;

        let Some(task_row) = task_row else {
            return Ok(None);
        };
        let task = task_from_row(task_row)?;

        let result_row = sqlx::query(
            r#"
            SELECT id, task_id, worker_id, result_body, status, computation_time_ms, created_at
            FROM task_results WHERE task_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("read task result")?;

        let result = result_row.map(result_from_row).transpose()?;
        Ok(Some((task, result)))
    }

    /// `ReclaimExpired() -> count`: lease-expiry repair path.
    pub async fn reclaim_expired(&self) -> anyhow::Result<u64> {
        let rows = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending',
                assigned_to = NULL,
                claimed_at = NULL,
                lease_expires_at = NULL,
                updated_at = now()
            WHERE status = 'in_progress'
              AND lease_expires_at < now()
              AND attempts < max_attempts
            RETURNING id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("reclaim expired leases")?;

        Ok(rows.len() as u64)
    }

    /// `MarkDead(threshold_seconds) -> count`.
    pub async fn mark_dead(&self, threshold_seconds: i64) -> anyhow::Result<u64> {
        let rows = sqlx::query(
            r#"
            UPDATE workers
            SET status = 'dead'
            WHERE last_heartbeat < now() - ($1 * interval '1 second')
              AND status <> 'dead'
            RETURNING worker_id
            "#,
        )
        .bind(threshold_seconds as f64)
        .fetch_all(&self.pool)
        .await
        .context("mark dead workers")?;

        Ok(rows.len() as u64)
    }

    /// `ReclaimFromDead() -> count`: dead-worker sweep repair path.
    pub async fn reclaim_from_dead(&self) -> anyhow::Result<u64> {
        let rows = sqlx::query(
            r#"
            UPDATE tasks t
            SET status = 'pending',
                assigned_to = NULL,
                claimed_at = NULL,
                lease_expires_at = NULL,
                updated_at = now()
            FROM workers w
            WHERE t.assigned_to = w.worker_id
              AND w.status = 'dead'
              AND t.status = 'in_progress'
              AND t.attempts < t.max_attempts
            RETURNING t.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("reclaim tasks from dead workers")?;

        Ok(rows.len() as u64)
    }

    pub async fn save_checkpoint(
        &self,
        task_id: i64,
        last_cursor: i64,
        partial_output: Value,
        elapsed_ms: i64,
        method: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (task_id, last_cursor, partial_output, elapsed_ms, method, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (task_id) DO UPDATE SET
                last_cursor = excluded.last_cursor,
                partial_output = excluded.partial_output,
                elapsed_ms = excluded.elapsed_ms,
                method = excluded.method,
                updated_at = now()
            "#,
        )
        .bind(task_id)
        .bind(last_cursor)
        .bind(&partial_output)
        .bind(elapsed_ms)
        .bind(method)
        .execute(&self.pool)
        .await
        .context("save checkpoint")?;

        Ok(())
    }

    pub async fn load_checkpoint(&self, task_id: i64) -> anyhow::Result<Option<Checkpoint>> {
        let row = sqlx::query(
            r#"
            SELECT task_id, last_cursor, partial_output, elapsed_ms, method, updated_at
            FROM checkpoints WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("load checkpoint")?;

        row.map(checkpoint_from_row).transpose()
    }

    pub async fn delete_checkpoint(&self, task_id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .context("delete checkpoint")?;
        Ok(())
    }

    pub async fn stats(&self, heartbeat_timeout_seconds: i64) -> anyhow::Result<StoreStats> {
        let counts = sqlx::query(
            r#"
            SELECT
                count(*) FILTER (WHERE status = 'pending') AS pending,
                count(*) FILTER (WHERE status = 'in_progress') AS in_progress,
                count(*) FILTER (
                    WHERE status NOT IN ('completed', 'failed') AND attempts >= max_attempts
                ) AS dead_lettered
            FROM tasks
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("count tasks for stats")?;

        let worker_rows = sqlx::query(
            r#"
            SELECT worker_id, last_heartbeat, status, metadata
            FROM workers
            WHERE last_heartbeat > now() - ($1 * interval '1 second')
              AND status = 'alive'
            ORDER BY worker_id
            "#,
        )
        .bind(heartbeat_timeout_seconds as f64)
        .fetch_all(&self.pool)
        .await
        .context("list active workers for stats")?;

        let workers = worker_rows
            .into_iter()
            .map(worker_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(StoreStats {
            pending_tasks: counts.try_get("pending").context("read pending count")?,
            in_progress_tasks: counts
                .try_get("in_progress")
                .context("read in_progress count")?,
            dead_lettered_tasks: counts
                .try_get("dead_lettered")
                .context("read dead_lettered count")?,
            active_workers: workers.len() as i64,
            workers,
        })
    }
}

fn task_from_row(row: sqlx::postgres::PgRow) -> anyhow::Result<Task> {
    let status: String = row.try_get("status").context("read task.status")?;
    Ok(Task {
        id: row.try_get("id").context("read task.id")?,
        task_type: row.try_get("task_type").context("read task.task_type")?,
        payload: row.try_get("payload").context("read task.payload")?,
        status: status.parse()?,
        assigned_to: row
            .try_get("assigned_to")
            .context("read task.assigned_to")?,
        claimed_at: row.try_get("claimed_at").context("read task.claimed_at")?,
        lease_expires_at: row
            .try_get("lease_expires_at")
            .context("read task.lease_expires_at")?,
        attempts: row.try_get("attempts").context("read task.attempts")?,
        max_attempts: row
            .try_get("max_attempts")
            .context("read task.max_attempts")?,
        created_at: row.try_get("created_at").context("read task.created_at")?,
        updated_at: row.try_get("updated_at").context("read task.updated_at")?,
    })
}

fn result_from_row(row: sqlx::postgres::PgRow) -> anyhow::Result<TaskResult> {
    let status: String = row.try_get("status").context("read result.status")?;
    Ok(TaskResult {
        id: row.try_get("id").context("read result.id")?,
        task_id: row.try_get("task_id").context("read result.task_id")?,
        worker_id: row.try_get("worker_id").context("read result.worker_id")?,
        result_body: row
            .try_get("result_body")
            .context("read result.result_body")?,
        status: status.parse()?,
        computation_time_ms: row
            .try_get("computation_time_ms")
            .context("read result.computation_time_ms")?,
        created_at: row
            .try_get("created_at")
            .context("read result.created_at")?,
    })
}

fn worker_from_row(row: sqlx::postgres::PgRow) -> anyhow::Result<Worker> {
    let status: String = row.try_get("status").context("read worker.status")?;
    Ok(Worker {
        worker_id: row.try_get("worker_id").context("read worker.worker_id")?,
        last_heartbeat: row
            .try_get("last_heartbeat")
            .context("read worker.last_heartbeat")?,
        liveness: status.parse()?,
        metadata: row.try_get("metadata").context("read worker.metadata")?,
    })
}

fn checkpoint_from_row(row: sqlx::postgres::PgRow) -> anyhow::Result<Checkpoint> {
    Ok(Checkpoint {
        task_id: row.try_get("task_id").context("read checkpoint.task_id")?,
        last_cursor: row
            .try_get("last_cursor")
            .context("read checkpoint.last_cursor")?,
        partial_output: row
            .try_get("partial_output")
            .context("read checkpoint.partial_output")?,
        elapsed_ms: row
            .try_get("elapsed_ms")
            .context("read checkpoint.elapsed_ms")?,
        method: row.try_get("method").context("read checkpoint.method")?,
        updated_at: row
            .try_get("updated_at")
            .context("read checkpoint.updated_at")?,
    })
}

/// A `CheckpointSink` backed directly by this store, handed to executors
/// through `ExecutionContext` so they don't need to know about Postgres.
pub struct StoreCheckpointSink {
    store: PgStore,
}

impl StoreCheckpointSink {
    pub fn new(store: PgStore) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl relay_core::executor::CheckpointSink for StoreCheckpointSink {
    async fn save(
        &self,
        task_id: i64,
        last_cursor: i64,
        partial_output: Value,
        elapsed_ms: i64,
        method: Option<&str>,
    ) -> anyhow::Result<()> {
        self.store
            .save_checkpoint(task_id, last_cursor, partial_output, elapsed_ms, method)
            .await
    }

    async fn load(&self, task_id: i64) -> anyhow::Result<Option<Checkpoint>> {
        self.store.load_checkpoint(task_id).await
    }

    async fn delete(&self, task_id: i64) -> anyhow::Result<()> {
        self.store.delete_checkpoint(task_id).await
    }
}

