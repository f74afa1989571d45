use anyhow::Context;
use relay_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = WorkerConfig::from_env().context("load worker config")?;
    tracing::info!(
        event = "worker_started",
        worker_id = %cfg.worker_id,
        dispatcher = %cfg.dispatcher_url,
        "worker started"
    );

    relay_worker::runner::run(cfg).await
}
