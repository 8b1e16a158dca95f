//! HTTP client used by the `ask`, `result` and `status` subcommands.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{RcaError, Result};
use crate::gateway::Health;
use crate::state_machine::{Filters, Job, JobStatus};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub job_id: String,
    pub query: String,
    pub status: JobStatus,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct GatewayClient {
    base_url: String,
    http: Client,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn ask(&self, query: &str, filters: &Filters) -> Result<Accepted> {
        let mut body = serde_json::to_value(filters)?;
        body["query"] = serde_json::Value::String(query.to_string());
        let response = self
            .http
            .post(format!("{}/ask", self.base_url))
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn result(&self, job_id: &str) -> Result<Job> {
        let response = self
            .http
            .get(format!("{}/result/{job_id}", self.base_url))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn health(&self) -> Result<Health> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        decode(response).await
    }

    /// Poll `/result/{id}` until the job is terminal. `on_update` sees every
    /// intermediate record.
    pub async fn wait(
        &self,
        job_id: &str,
        interval: Duration,
        mut on_update: impl FnMut(&Job),
    ) -> Result<Job> {
        loop {
            let job = self.result(job_id).await?;
            if job.is_terminal() {
                return Ok(job);
            }
            on_update(&job);
            tokio::time::sleep(interval).await;
        }
    }
}

/// Map gateway error bodies back onto the error taxonomy.
async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .map(|b| b.error)
        .unwrap_or_else(|_| status.to_string());
    Err(match status {
        StatusCode::BAD_REQUEST => RcaError::InvalidInput(message),
        StatusCode::NOT_FOUND => RcaError::NotFound(message),
        StatusCode::SERVICE_UNAVAILABLE => RcaError::QueueUnavailable(message),
        _ => RcaError::Io(std::io::Error::other(format!(
            "gateway returned {}: {message}",
            status.as_u16()
        ))),
    })
}
