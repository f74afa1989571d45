//! Manual-testing companion for the dispatcher HTTP surface.
//!
//! Exists purely to make manual testing ergonomic (SPEC_FULL.md §4.G):
//! submit a task, check aggregate stats, or watch one task to completion
//! without reaching for curl.

use anyhow::Context;
use clap::{Parser, Subcommand};
use relay_core::wire::{StatsResponse, SubmitTaskRequest, SubmitTaskResponse, TaskView};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay-cli")]
#[command(about = "Submit and inspect tasks on a relay dispatcher", long_about = None)]
struct Cli {
    #[arg(long, env = "DISPATCHER_URL", default_value = "http://localhost:8080", global = true)]
    dispatcher_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a new task.
    Submit {
        /// The task_type tag (e.g. "compute").
        task_type: String,

        /// Task payload as a JSON object literal. Defaults to `{}`.
        #[arg(long)]
        data: Option<String>,
    },

    /// Print aggregate queue and worker stats.
    Stats,

    /// Poll a task until it reaches a terminal or dead-lettered state.
    Watch {
        task_id: i64,

        #[arg(long, default_value_t = 2)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Command::Submit { task_type, data } => submit(&client, &cli.dispatcher_url, task_type, data).await,
        Command::Stats => stats(&client, &cli.dispatcher_url).await,
        Command::Watch { task_id, interval_secs } => {
            watch(&client, &cli.dispatcher_url, task_id, Duration::from_secs(interval_secs)).await
        }
    }
}

async fn submit(
    client: &reqwest::Client,
    base_url: &str,
    task_type: String,
    data: Option<String>,
) -> anyhow::Result<()> {
    let task_data = match data {
        Some(raw) => serde_json::from_str(&raw).context("--data must be a JSON object")?,
        None => serde_json::json!({}),
    };

    let resp: SubmitTaskResponse = client
        .post(format!("{base_url}/submit-task"))
        .json(&SubmitTaskRequest { task_type, task_data })
        .send()
        .await
        .context("POST /submit-task")?
        .error_for_status()
        .context("submit-task status")?
        .json()
        .await
        .context("decode submit-task response")?;

    println!(
        "submitted task_id={} task_type={} status={}",
        resp.data.task_id, resp.data.task_type, resp.data.status
    );
    Ok(())
}

async fn stats(client: &reqwest::Client, base_url: &str) -> anyhow::Result<()> {
    let resp: StatsResponse = client
        .get(format!("{base_url}/stats"))
        .send()
        .await
        .context("GET /stats")?
        .error_for_status()
        .context("stats status")?
        .json()
        .await
        .context("decode stats response")?;

    println!("pending:       {}", resp.pending_tasks);
    println!("in_progress:   {}", resp.in_progress_tasks);
    println!("dead_lettered: {}", resp.dead_lettered_tasks);
    println!("active_workers:{}", resp.active_workers);
    for worker in resp.workers {
        println!("  worker {} last_heartbeat={}", worker.worker_id, worker.last_heartbeat);
    }
    Ok(())
}

async fn watch(
    client: &reqwest::Client,
    base_url: &str,
    task_id: i64,
    interval: Duration,
) -> anyhow::Result<()> {
    loop {
        let resp = client
            .get(format!("{base_url}/task/{task_id}"))
            .send()
            .await
            .context("GET /task/{task_id}")?
            .error_for_status()
            .context("task status")?;

        let view: TaskView = resp.json().await.context("decode task response")?;
        println!(
            "task_id={} status={} attempts={}/{}",
            view.task_id, view.status, view.attempts, view.max_attempts
        );

        if view.status == "completed" || view.status == "failed" {
            if let Some(body) = view.result_body {
                println!("result: {body}");
            }
            return Ok(());
        }

        if view.attempts >= view.max_attempts {
            println!("task exhausted its attempts without reaching a terminal status (dead-lettered)");
            return Ok(());
        }

        tokio::time::sleep(interval).await;
    }
}
