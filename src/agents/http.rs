use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Capability, Evidence, RetrievalAgent};
use crate::error::{RcaError, Result};
use crate::state_machine::Filters;

/// Remote collaborator reached over HTTP.
///
/// Request: `POST {endpoint}` with `{"capability", "query", "filters"}`.
/// Response: `{"evidence": [{"text": ..., "source"?, "score"?, "metadata"?}]}`.
pub struct HttpAgent {
    capability: Capability,
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    capability: Capability,
    query: &'a str,
    filters: &'a Filters,
}

#[derive(Deserialize)]
struct RetrieveReply {
    #[serde(default)]
    evidence: Vec<Evidence>,
}

impl HttpAgent {
    pub fn new(capability: Capability, endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            capability,
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl RetrievalAgent for HttpAgent {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn retrieve(&self, query: &str, filters: &Filters) -> Result<Vec<Evidence>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RetrieveRequest {
                capability: self.capability,
                query,
                filters,
            })
            .send()
            .await
            .map_err(|e| RcaError::capability(self.capability.name(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RcaError::capability(
                self.capability.name(),
                format!("endpoint returned {}: {}", status.as_u16(), body.trim()),
            ));
        }

        let reply: RetrieveReply = response
            .json()
            .await
            .map_err(|e| RcaError::capability(self.capability.name(), format!("bad reply: {e}")))?;

        let mut evidence = reply.evidence;
        evidence.truncate(filters.top_k());
        Ok(evidence)
    }
}
