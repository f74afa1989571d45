//! HTTP client for the worker's three outbound calls to the dispatcher.
//!
//! Mirrors the teacher's `DispatcherClient` shape: a thin `reqwest::Client`
//! wrapper, one method per endpoint, short timeouts per call rather than one
//! global client timeout.

use anyhow::Context;
use relay_core::wire::{GetTaskRequest, HeartbeatRequest, SubmitResultRequest, SubmitResultResponse, TaskEnvelope};
use serde_json::Value;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct DispatcherClient {
    base_url: String,
    http: reqwest::Client,
}

impl DispatcherClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub async fn get_task(&self, worker_id: &str) -> anyhow::Result<TaskEnvelope> {
        let resp = self
            .http
            .post(format!("{}/get-task", self.base_url))
            .json(&GetTaskRequest {
                worker_id: worker_id.to_string(),
            })
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("POST /get-task")?
            .error_for_status()
            .context("get-task status")?;

        resp.json::<TaskEnvelope>().await.context("decode get-task")
    }

    pub async fn heartbeat(&self, worker_id: &str, metadata: Value) -> anyhow::Result<()> {
        self.http
            .post(format!("{}/heartbeat", self.base_url))
            .json(&HeartbeatRequest {
                worker_id: worker_id.to_string(),
                status: Some("alive".to_string()),
                metadata: Some(metadata),
            })
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("POST /heartbeat")?
            .error_for_status()
            .context("heartbeat status")?;
        Ok(())
    }

    pub async fn submit_result(
        &self,
        req: &SubmitResultRequest,
    ) -> anyhow::Result<SubmitResultResponse> {
        let resp = self
            .http
            .post(format!("{}/submit-result", self.base_url))
            .json(req)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("POST /submit-result")?
            .error_for_status()
            .context("submit-result status")?;

        resp.json::<SubmitResultResponse>()
            .await
            .context("decode submit-result")
    }
}
