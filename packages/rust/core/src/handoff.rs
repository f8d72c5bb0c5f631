//! Downstream delivery of a completed job's page records.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use intelgraph_shared::{IntelError, ProcessBatch, Result};

/// Receives one [`ProcessBatch`] per completed job.
#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, batch: &ProcessBatch) -> Result<()>;
}

/// Posts batches as JSON to `{base_url}/api/v1/process`.
#[derive(Debug, Clone)]
pub struct HttpResultSink {
    client: Client,
    endpoint: String,
}

impl HttpResultSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = base_url.trim().trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(IntelError::config(format!(
                "handoff url must be http(s): {base_url}"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntelError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{base}/api/v1/process"),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ResultSink for HttpResultSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, batch: &ProcessBatch) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(batch)
            .send()
            .await
            .map_err(|e| IntelError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        tracing::info!(
            job_id = %batch.job_id,
            pages = batch.results.len(),
            %status,
            "sent batch to intel service"
        );
        if !status.is_success() {
            return Err(IntelError::Network(format!(
                "{}: HTTP {status}",
                self.endpoint
            )));
        }
        Ok(())
    }
}
