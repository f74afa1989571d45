//! The liveness & reclamation monitor (SPEC_FULL.md §4.C).
//!
//! One background task, started alongside the HTTP server and stopped with
//! the same shutdown signal, ticking `MarkDead` -> `ReclaimFromDead` ->
//! `ReclaimExpired` in order on every cadence. Errors are logged and
//! swallowed — a transient store hiccup should never take the loop down,
//! since there is no one else who will run this repair pass.

use relay_store::PgStore;
use std::time::Duration;
use tokio::sync::watch;

pub struct MonitorConfig {
    pub interval: Duration,
    pub heartbeat_timeout_secs: i64,
}

pub async fn run(store: PgStore, cfg: MonitorConfig, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        if let Err(err) = tick(&store, cfg.heartbeat_timeout_secs).await {
            tracing::warn!(error = %err, "liveness monitor tick failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(cfg.interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
}

async fn tick(store: &PgStore, heartbeat_timeout_secs: i64) -> anyhow::Result<()> {
    let dead = store.mark_dead(heartbeat_timeout_secs).await?;
    if dead > 0 {
        tracing::info!(count = dead, "marked workers dead");
    }

    let reclaimed_from_dead = store.reclaim_from_dead().await?;
    if reclaimed_from_dead > 0 {
        tracing::info!(count = reclaimed_from_dead, "reclaimed tasks from dead workers");
    }

    let reclaimed_from_lease = store.reclaim_expired().await?;
    if reclaimed_from_lease > 0 {
        tracing::info!(count = reclaimed_from_lease, "reclaimed tasks with expired leases");
    }

    Ok(())
}
