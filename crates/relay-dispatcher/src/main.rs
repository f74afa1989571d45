use anyhow::Context;
use relay_dispatcher::{DispatcherConfig, DispatcherServer};
use relay_store::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = DispatcherConfig::from_env().context("load dispatcher config")?;
    let bind = cfg.bind_addr()?;

    let store = PgStore::connect(&cfg.db_path, 10)
        .await
        .context("connect to state database")?;
    store.migrate().await.context("run state database migrations")?;

    let server = DispatcherServer::start(store, cfg, bind, true)
        .await
        .context("start dispatcher server")?;
    tracing::info!(addr = %server.addr, event = "dispatcher_listening", "dispatcher listening");

    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;
    tracing::info!(event = "dispatcher_shutdown", "shutting down dispatcher");

    server.shutdown().await.context("shut down dispatcher")?;
    Ok(())
}
