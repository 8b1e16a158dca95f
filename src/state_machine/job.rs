use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::AgentResponse;
use crate::router::RoutingDecision;

const DEFAULT_TOP_K: usize = 5;

/// Lifecycle status of a submitted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional narrowing hints forwarded to every retrieval collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Maximum evidence items a collaborator should return.
    pub fn top_k(&self) -> usize {
        self.top_k.filter(|k| *k > 0).unwrap_or(DEFAULT_TOP_K)
    }
}

/// The persisted record of one submitted query.
///
/// Field names on the wire are stable: `id`, `query`, `status`, `result`,
/// `error`, `createdAt`, `startedAt`, `completedAt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub query: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Filters::is_empty")]
    pub filters: Filters,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Lease of the delivery currently working the job, re-stamped by every
    /// start or resume. The stale sweep measures abandonment from here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_responses: Vec<AgentResponse>,
    /// Number of times the recovery sweep has put this job back on the queue.
    #[serde(default)]
    pub redeliveries: u32,
}

impl Job {
    pub fn new(query: String, filters: Filters) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query,
            status: JobStatus::Queued,
            filters,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            claimed_at: None,
            result: None,
            error: None,
            routing: None,
            agent_responses: Vec::new(),
            redeliveries: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// When the current holder took the job. Falls back to `startedAt` for
    /// records written before leases were stamped.
    pub fn lease_started(&self) -> Option<DateTime<Utc>> {
        self.claimed_at.or(self.started_at)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id.clone(),
            query: self.query.clone(),
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    /// Entry to push for this job's next delivery.
    pub fn queue_entry(&self) -> QueueEntry {
        QueueEntry {
            job_id: self.id.clone(),
            query: self.query.clone(),
            filters: self.filters.clone(),
            attempt: self.redeliveries,
            enqueued_at: Utc::now(),
        }
    }
}

/// Compact listing row for `GET /results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub query: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Payload carried on the job queue. The query travels inline so a worker
/// does not need a store round trip before routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub job_id: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Filters::is_empty")]
    pub filters: Filters,
    /// 0 for the first delivery, incremented by every redelivery.
    #[serde(default)]
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}
