//! Filesystem-backed outbound result cache (SPEC_FULL.md §4.E).
//!
//! When `/submit-result` can't be reached, the worker writes the result here
//! instead of losing it. The cache-retry loop replays every entry on its own
//! cadence, independent of the task loop, and drops entries once they're
//! older than the configured TTL.

use anyhow::Context;
use chrono::{DateTime, Utc};
use relay_core::model::ResultStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResult {
    pub task_id: i64,
    pub worker_id: String,
    pub status: ResultStatus,
    pub result_body: Value,
    pub computation_time_ms: Option<i64>,
    pub cached_at: DateTime<Utc>,
}

pub struct OutboundCache {
    dir: PathBuf,
}

impl OutboundCache {
    pub async fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create cache dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub async fn put(&self, entry: &CachedResult) -> anyhow::Result<()> {
        let path = self.entry_path(entry.task_id);
        let bytes = serde_json::to_vec_pretty(entry).context("encode cached result")?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("write cache entry {}", path.display()))?;
        Ok(())
    }

    pub async fn remove(&self, task_id: i64) -> anyhow::Result<()> {
        let path = self.entry_path(task_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove cache entry {}", path.display())),
        }
    }

    /// Entries not yet past `ttl_secs`, oldest first.
    pub async fn list_replayable(&self, ttl_secs: i64) -> anyhow::Result<Vec<CachedResult>> {
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("read cache dir {}", self.dir.display()))?;

        while let Some(dir_entry) = read_dir.next_entry().await.context("walk cache dir")? {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(error = %err, path = %path.display(), "failed to read cache entry");
                    continue;
                }
            };

            let cached: CachedResult = match serde_json::from_slice(&bytes) {
                Ok(cached) => cached,
                Err(err) => {
                    tracing::warn!(error = %err, path = %path.display(), "failed to parse cache entry");
                    continue;
                }
            };

            let age_secs = (Utc::now() - cached.cached_at).num_seconds();
            if age_secs > ttl_secs {
                tracing::info!(task_id = cached.task_id, age_secs, "cache entry expired, dropping");
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }

            entries.push(cached);
        }

        entries.sort_by_key(|e| e.cached_at);
        Ok(entries)
    }

    fn entry_path(&self, task_id: i64) -> PathBuf {
        self.dir.join(format!("task_{task_id}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
