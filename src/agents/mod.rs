//! Retrieval collaborators.
//!
//! Each [`Capability`] is answered by one [`RetrievalAgent`] registered in an
//! [`AgentRegistry`]. Invocation always yields an [`AgentResponse`]: errors and
//! timeouts are captured on the response, never propagated.

mod dataset;
mod http;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RcaError, Result};
use crate::state_machine::Filters;

pub use dataset::DatasetAgent;
pub use http::HttpAgent;

/// An evidence domain a retrieval collaborator can answer from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Sensor,
    Operator,
    Maintenance,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::Sensor,
        Capability::Operator,
        Capability::Maintenance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::Sensor => "sensor",
            Capability::Operator => "operator",
            Capability::Maintenance => "maintenance",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Capability::Sensor => "Sensor Data Agent",
            Capability::Operator => "Operator Agent",
            Capability::Maintenance => "Maintenance Agent",
        }
    }

    /// Domain description used by classifiers and `GET /agents`.
    pub fn description(self) -> &'static str {
        match self {
            Capability::Sensor => {
                "Analyzes time-series sensor data (temperature, vibration, pressure) to find anomalies and trends"
            }
            Capability::Operator => {
                "Searches operator incident reports for observations, severity levels and initial actions taken"
            }
            Capability::Maintenance => {
                "Reviews maintenance history, repairs, component failures and technician actions"
            }
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One retrieved item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl Evidence {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            source: None,
            text: text.into(),
            score: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Outcome of invoking one capability. `error` is set iff `success` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub capability: Capability,
    pub success: bool,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl AgentResponse {
    pub fn succeeded(capability: Capability, evidence: Vec<Evidence>, elapsed: Duration) -> Self {
        Self {
            capability,
            success: true,
            evidence,
            error: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failed(capability: Capability, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            capability,
            success: false,
            evidence: Vec::new(),
            error: Some(error.into()),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// An external unit answering queries from one evidence domain.
#[async_trait]
pub trait RetrievalAgent: Send + Sync {
    fn capability(&self) -> Capability;

    async fn retrieve(&self, query: &str, filters: &Filters) -> Result<Vec<Evidence>>;
}

/// Capability -> collaborator lookup.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<Capability, Arc<dyn RetrievalAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under the capability it reports, replacing any
    /// previous registration.
    pub fn register(&mut self, agent: Arc<dyn RetrievalAgent>) {
        self.agents.insert(agent.capability(), agent);
    }

    pub fn get(&self, capability: Capability) -> Option<Arc<dyn RetrievalAgent>> {
        self.agents.get(&capability).cloned()
    }

    pub fn registered(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.agents.contains_key(c))
            .collect()
    }

    /// Invoke one capability, bounded by `timeout`. Never fails: every error
    /// becomes an unsuccessful response.
    pub async fn invoke(
        &self,
        capability: Capability,
        query: &str,
        filters: &Filters,
        timeout: Duration,
    ) -> AgentResponse {
        let started = Instant::now();

        let Some(agent) = self.get(capability) else {
            let err = RcaError::capability(capability.name(), "no collaborator registered");
            warn!(%capability, "{err}");
            return AgentResponse::failed(capability, err.to_string(), started.elapsed());
        };

        let outcome = tokio::time::timeout(timeout, agent.retrieve(query, filters)).await;
        let elapsed = started.elapsed();
        match outcome {
            Ok(Ok(evidence)) => {
                info!(
                    %capability,
                    items = evidence.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "capability completed"
                );
                AgentResponse::succeeded(capability, evidence, elapsed)
            }
            Ok(Err(e)) => {
                warn!(%capability, error = %e, "capability failed");
                AgentResponse::failed(capability, e.to_string(), elapsed)
            }
            Err(_) => {
                let err = RcaError::capability(
                    capability.name(),
                    format!("timed out after {}s", timeout.as_secs_f64()),
                );
                warn!(%capability, "{err}");
                AgentResponse::failed(capability, err.to_string(), elapsed)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Scripted agent for pipeline tests.
    pub(crate) struct StubAgent {
        pub capability: Capability,
        pub reply: std::result::Result<Vec<Evidence>, String>,
        pub delay: Duration,
        pub calls: std::sync::atomic::AtomicUsize,
    }

    impl StubAgent {
        pub fn ok(capability: Capability, texts: &[&str]) -> Self {
            Self {
                capability,
                reply: Ok(texts.iter().map(|t| Evidence::text(*t)).collect()),
                delay: Duration::ZERO,
                calls: Default::default(),
            }
        }

        pub fn err(capability: Capability, message: &str) -> Self {
            Self {
                capability,
                reply: Err(message.to_string()),
                delay: Duration::ZERO,
                calls: Default::default(),
            }
        }

        pub fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RetrievalAgent for StubAgent {
        fn capability(&self) -> Capability {
            self.capability
        }

        async fn retrieve(&self, _query: &str, _filters: &Filters) -> Result<Vec<Evidence>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.reply {
                Ok(evidence) => Ok(evidence.clone()),
                Err(message) => Err(RcaError::capability(self.capability.name(), message.clone())),
            }
        }
    }

    #[test]
    fn capability_names_round_trip() {
        for c in Capability::ALL {
            assert_eq!(Capability::parse(c.name()), Some(c));
        }
        assert_eq!(Capability::parse(" Sensor "), Some(Capability::Sensor));
        assert_eq!(Capability::parse("weather"), None);
        assert_eq!(
            serde_json::to_value(Capability::Maintenance).unwrap(),
            "maintenance"
        );
    }

    #[tokio::test]
    async fn invoke_success_captures_evidence() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(StubAgent::ok(Capability::Sensor, &["temp 97C at 02:10"])));

        let resp = registry
            .invoke(Capability::Sensor, "spike?", &Filters::default(), Duration::from_secs(1))
            .await;
        assert!(resp.success);
        assert!(resp.error.is_none());
        assert_eq!(resp.evidence, vec![Evidence::text("temp 97C at 02:10")]);
    }

    #[tokio::test]
    async fn invoke_error_is_captured() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(StubAgent::err(Capability::Operator, "index offline")));

        let resp = registry
            .invoke(Capability::Operator, "q", &Filters::default(), Duration::from_secs(1))
            .await;
        assert!(!resp.success);
        assert!(resp.evidence.is_empty());
        assert_eq!(
            resp.error.as_deref(),
            Some("operator agent failed: index offline")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invoke_times_out() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(
            StubAgent::ok(Capability::Maintenance, &["late"]).slow(Duration::from_secs(60)),
        ));

        let resp = registry
            .invoke(Capability::Maintenance, "q", &Filters::default(), Duration::from_secs(2))
            .await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("timed out after 2s"));
    }

    #[tokio::test]
    async fn invoke_unregistered_capability_fails() {
        let registry = AgentRegistry::new();
        let resp = registry
            .invoke(Capability::Sensor, "q", &Filters::default(), Duration::from_secs(1))
            .await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("no collaborator registered"));
    }

    #[test]
    fn registry_lists_registered_in_order() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(StubAgent::ok(Capability::Maintenance, &[])));
        registry.register(Arc::new(StubAgent::ok(Capability::Sensor, &[])));
        assert_eq!(
            registry.registered(),
            vec![Capability::Sensor, Capability::Maintenance]
        );
    }
}
