//! OS-level process checkpointing via CRIU (SPEC_FULL.md §4.F).
//!
//! Linux-only, and strictly an optimization layered on top of the
//! application-level checkpoint: if a CRIU dump or restore fails for any
//! reason, the caller falls back to the checkpoint store and runs the task
//! fresh. Nothing here is on the correctness path.

use anyhow::{anyhow, Context};
use std::path::PathBuf;
use tokio::process::Command;

pub struct ProcessCheckpointer {
    checkpoint_dir: PathBuf,
}

impl ProcessCheckpointer {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    fn task_dir(&self, task_id: i64) -> PathBuf {
        self.checkpoint_dir.join(format!("task_{task_id}"))
    }

    /// Dump the given pid with `--leave-running` so the task keeps going
    /// after the snapshot is taken.
    pub async fn checkpoint(&self, pid: u32, task_id: i64) -> anyhow::Result<PathBuf> {
        let dir = self.task_dir(task_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create checkpoint dir {}", dir.display()))?;

        let log_file = dir.join("dump.log");
        let status = Command::new("criu")
            .arg("dump")
            .arg("-t")
            .arg(pid.to_string())
            .arg("--images-dir")
            .arg(&dir)
            .arg("--shell-job")
            .arg("--leave-running")
            .arg("--log-file")
            .arg(&log_file)
            .status()
            .await
            .context("spawn criu dump")?;

        if !status.success() {
            return Err(anyhow!("criu dump failed for pid {pid}, see {}", log_file.display()));
        }

        Ok(dir)
    }

    pub async fn restore(&self, task_id: i64) -> anyhow::Result<()> {
        let dir = self.task_dir(task_id);
        if !dir.exists() {
            return Err(anyhow!("no checkpoint directory for task {task_id}"));
        }

        let log_file = dir.join("restore.log");
        let status = Command::new("criu")
            .arg("restore")
            .arg("--images-dir")
            .arg(&dir)
            .arg("--shell-job")
            .arg("-d")
            .arg("--log-file")
            .arg(&log_file)
            .status()
            .await
            .context("spawn criu restore")?;

        if !status.success() {
            return Err(anyhow!("criu restore failed for task {task_id}, see {}", log_file.display()));
        }

        Ok(())
    }

    pub async fn cleanup(&self, task_id: i64) -> anyhow::Result<()> {
        let dir = self.task_dir(task_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove checkpoint dir {}", dir.display())),
        }
    }

    pub fn dir_for(&self, task_id: i64) -> PathBuf {
        self.task_dir(task_id)
    }

    /// Where a restored (or about-to-be-checkpointed) child writes its result
    /// once it finishes, since a restored process's original stdout pipe to
    /// this worker is long gone — this file is the only channel left.
    pub fn result_path(&self, task_id: i64) -> PathBuf {
        self.task_dir(task_id).join("result.json")
    }
}
