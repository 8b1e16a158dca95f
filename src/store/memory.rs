use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{Namespace, ResultStore};
use crate::error::Result;
use crate::state_machine::Job;

struct Slot {
    job: Job,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

/// Process-local store. Expiry uses the tokio clock, so paused-time tests can
/// step over a TTL deterministically.
pub struct MemoryStore {
    namespace: Namespace,
    slots: RwLock<HashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            slots: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Namespace::default())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn put(&self, job: &Job, ttl: Option<Duration>) -> Result<()> {
        let slot = Slot {
            job: job.clone(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.slots
            .write()
            .await
            .insert(self.namespace.key(&job.id), slot);
        Ok(())
    }

    async fn put_if_not_terminal(&self, job: &Job, ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        let key = self.namespace.key(&job.id);
        let mut slots = self.slots.write().await;
        if slots
            .get(&key)
            .is_some_and(|s| s.is_live(now) && s.job.is_terminal())
        {
            return Ok(false);
        }
        slots.insert(
            key,
            Slot {
                job: job.clone(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    async fn remove(&self, job_id: &str) -> Result<bool> {
        let now = Instant::now();
        let removed = self
            .slots
            .write()
            .await
            .remove(&self.namespace.key(job_id));
        Ok(removed.is_some_and(|s| s.is_live(now)))
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let now = Instant::now();
        let slots = self.slots.read().await;
        Ok(slots
            .get(&self.namespace.key(job_id))
            .filter(|s| s.is_live(now))
            .map(|s| s.job.clone()))
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let now = Instant::now();
        let slots = self.slots.read().await;
        let mut jobs: Vec<Job> = slots
            .values()
            .filter(|s| s.is_live(now))
            .map(|s| s.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, s| s.is_live(now));
        Ok(before - slots.len())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
