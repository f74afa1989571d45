//! The dispatcher's in-memory worker bookkeeping view.
//!
//! This is advisory only (SPEC_FULL.md §5): it exists to answer
//! `/worker-pool/stats` cheaply without a round trip to the store, and it is
//! never consulted by `Claim`, `SaveResult`, or any other correctness path.
//! Losing it on a dispatcher restart loses nothing but a few seconds of
//! freshness in that one read endpoint.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
pub struct WorkerPoolEntry {
    pub status: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Default)]
pub struct WorkerPool {
    workers: DashMap<String, WorkerPoolEntry>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_heartbeat(&self, worker_id: &str, status: &str) {
        self.workers.insert(
            worker_id.to_string(),
            WorkerPoolEntry {
                status: status.to_string(),
                last_seen: Utc::now(),
            },
        );
    }

    pub fn snapshot(&self) -> Vec<(String, WorkerPoolEntry)> {
        self.workers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
