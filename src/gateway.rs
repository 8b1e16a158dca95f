//! Submission gateway: creates jobs, hands them to the queue, serves reads.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RcaError, Result};
use crate::queue::JobQueue;
use crate::state_machine::{Filters, Job, JobSummary};
use crate::store::ResultStore;

/// Alert pushed by a monitoring system, turned into an RCA query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub alert_description: String,
    #[serde(default)]
    pub alert_id: Option<String>,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub alert_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

impl Alert {
    /// Query text asking for a full analysis of the alert.
    pub fn compose_query(&self) -> String {
        let mut lines = Vec::new();
        if let Some(id) = &self.alert_id {
            lines.push(format!("Alert ID: {id}"));
        }
        if let Some(kind) = &self.alert_type {
            lines.push(format!("Alert Type: {kind}"));
        }
        if let Some(machine) = &self.machine_id {
            lines.push(format!("Machine: {machine}"));
        }
        if let Some(severity) = &self.severity {
            lines.push(format!("Severity: {severity}"));
        }
        lines.push(format!("Issue Description: {}", self.alert_description.trim()));
        lines.extend(
            [
                "Please provide a detailed root cause analysis with:",
                "1. Analysis of sensor data and anomalies",
                "2. Review of operator reports and observations",
                "3. Examination of maintenance history",
                "4. Identified root causes",
                "5. Recommended mitigation and preventive actions",
            ]
            .map(String::from),
        );
        lines.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: String,
    pub queue_connected: bool,
    pub store_connected: bool,
    pub pending_count: usize,
}

#[derive(Clone)]
pub struct Gateway {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ResultStore>,
}

impl Gateway {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn ResultStore>) -> Self {
        Self { queue, store }
    }

    /// Create a `queued` job and enqueue it. Returns without waiting on any
    /// worker.
    ///
    /// The record is written before the entry is pushed so a worker never
    /// dequeues an id it cannot load. If the push fails the record is removed
    /// again; when even that fails, the stale sweep re-enqueues the orphan.
    pub async fn submit(&self, query: &str, filters: Filters) -> Result<Job> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RcaError::InvalidInput("query must not be empty".into()));
        }

        let job = Job::new(query.to_string(), filters);
        self.store.put(&job, None).await?;
        if let Err(e) = self.queue.enqueue(job.queue_entry()).await {
            if let Err(cleanup) = self.store.remove(&job.id).await {
                warn!(job_id = %job.id, error = %cleanup, "could not remove unqueued record");
            }
            return Err(e);
        }
        info!(job_id = %job.id, status = %job.status, "job created");
        Ok(job)
    }

    pub async fn submit_alert(&self, alert: &Alert) -> Result<Job> {
        if alert.alert_description.trim().is_empty() {
            return Err(RcaError::InvalidInput(
                "alertDescription must not be empty".into(),
            ));
        }
        let filters = Filters {
            machine_id: alert.machine_id.clone(),
            ..Default::default()
        };
        self.submit(&alert.compose_query(), filters).await
    }

    pub async fn lookup(&self, job_id: &str) -> Result<Job> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| RcaError::NotFound(job_id.to_string()))
    }

    /// Point-in-time snapshot, oldest first.
    pub async fn list_all(&self) -> Result<Vec<JobSummary>> {
        Ok(self.store.list().await?.iter().map(Job::summary).collect())
    }

    /// Reachability of the queue and store. Says nothing about job outcomes.
    pub async fn health(&self) -> Health {
        let queue_connected = self.queue.ping().await.is_ok();
        let store_connected = self.store.ping().await.is_ok();
        let pending_count = self.queue.len().await.unwrap_or(0);
        let status = if queue_connected && store_connected {
            "healthy"
        } else {
            "degraded"
        };
        Health {
            status: status.to_string(),
            queue_connected,
            store_connected,
            pending_count,
        }
    }
}
