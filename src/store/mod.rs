//! Result store: job records keyed by id, with per-record expiry.
//!
//! Records are replaced wholesale on every write. Only terminal records carry
//! a TTL; queued and processing records live until they reach a terminal
//! state.

mod memory;
mod sqlite;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::state_machine::Job;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Atomically replace the record for `job.id`. `ttl` of `None` never expires.
    async fn put(&self, job: &Job, ttl: Option<Duration>) -> Result<()>;

    /// Like [`put`](Self::put), but leaves a live completed or failed record
    /// untouched. The check and the write are one atomic step. Returns whether
    /// the record was written.
    async fn put_if_not_terminal(&self, job: &Job, ttl: Option<Duration>) -> Result<bool>;

    /// `None` when the id was never written or its record has expired.
    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// Snapshot of every live record, oldest first.
    async fn list(&self) -> Result<Vec<Job>>;

    /// Delete a record. Returns whether one existed.
    async fn remove(&self, job_id: &str) -> Result<bool>;

    /// Physically drop expired records. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;

    async fn ping(&self) -> Result<()>;
}

/// TTL to apply when writing `job`: terminal records expire, others do not.
pub fn retention(job: &Job, ttl: Duration) -> Option<Duration> {
    job.is_terminal().then_some(ttl)
}

/// Project-scoped key layout, `{namespace}:result:{job_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn key(&self, job_id: &str) -> String {
        format!("{}:result:{job_id}", self.0)
    }

    pub fn prefix(&self) -> String {
        format!("{}:result:", self.0)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new("rca_copilot")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{Filters, StateMachine, Transition};

    #[test]
    fn namespace_keys() {
        let ns = Namespace::new("pa_hackathon");
        assert_eq!(ns.key("J1"), "pa_hackathon:result:J1");
        assert!(ns.key("J1").starts_with(&ns.prefix()));
        assert_eq!(Namespace::default().key("x"), "rca_copilot:result:x");
    }

    #[test]
    fn only_terminal_records_expire() {
        let ttl = Duration::from_secs(3600);
        let mut job = Job::new("q".into(), Filters::default());
        assert_eq!(retention(&job, ttl), None);

        StateMachine::apply(&mut job, Transition::Start).unwrap();
        assert_eq!(retention(&job, ttl), None);

        StateMachine::apply(
            &mut job,
            Transition::Fail {
                reason: "boom".into(),
                responses: Vec::new(),
            },
        )
        .unwrap();
        assert_eq!(retention(&job, ttl), Some(ttl));
    }
}
