//! SQLite-backed result store. Survives process restarts, which the recovery
//! sweep relies on to find jobs that were in flight when a worker died.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

use super::{Namespace, ResultStore};
use crate::error::Result;
use crate::state_machine::Job;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS job_records (
    key         TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL,
    status      TEXT NOT NULL,
    record      TEXT NOT NULL,
    expires_at  INTEGER
);
CREATE INDEX IF NOT EXISTS job_records_created ON job_records (created_at);
";

pub struct SqliteStore {
    namespace: Namespace,
    db: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, namespace: Namespace) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn, namespace)
    }

    pub fn in_memory(namespace: Namespace) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, namespace)
    }

    fn with_connection(conn: Connection, namespace: Namespace) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            namespace,
            db: Mutex::new(conn),
        })
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn put(&self, job: &Job, ttl: Option<Duration>) -> Result<()> {
        let record = serde_json::to_string(job)?;
        let expires_at = ttl.map(|ttl| now_millis().saturating_add(ttl.as_millis() as i64));
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO job_records (key, created_at, status, record, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.namespace.key(&job.id),
                job.created_at.to_rfc3339(),
                job.status.as_str(),
                record,
                expires_at,
            ],
        )?;
        Ok(())
    }

    async fn put_if_not_terminal(&self, job: &Job, ttl: Option<Duration>) -> Result<bool> {
        let record = serde_json::to_string(job)?;
        let now = now_millis();
        let expires_at = ttl.map(|ttl| now.saturating_add(ttl.as_millis() as i64));
        let db = self.db.lock().await;
        let written = db.execute(
            "INSERT INTO job_records (key, created_at, status, record, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                 status = excluded.status,
                 record = excluded.record,
                 expires_at = excluded.expires_at
             WHERE job_records.status NOT IN ('completed', 'failed')
                OR (job_records.expires_at IS NOT NULL AND job_records.expires_at <= ?6)",
            params![
                self.namespace.key(&job.id),
                job.created_at.to_rfc3339(),
                job.status.as_str(),
                record,
                expires_at,
                now,
            ],
        )?;
        Ok(written > 0)
    }

    async fn remove(&self, job_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let removed = db.execute(
            "DELETE FROM job_records
             WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            params![self.namespace.key(job_id), now_millis()],
        )?;
        Ok(removed > 0)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let db = self.db.lock().await;
        let record: Option<String> = db
            .query_row(
                "SELECT record FROM job_records
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![self.namespace.key(job_id), now_millis()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(record.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT record FROM job_records
             WHERE substr(key, 1, ?1) = ?2 AND (expires_at IS NULL OR expires_at > ?3)
             ORDER BY created_at, key",
        )?;
        let prefix = self.namespace.prefix();
        let rows = stmt.query_map(
            params![prefix.len() as i64, prefix, now_millis()],
            |row| row.get::<_, String>(0),
        )?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(serde_json::from_str(&row?)?);
        }
        Ok(jobs)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let removed = db.execute(
            "DELETE FROM job_records WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now_millis()],
        )?;
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{Filters, JobStatus, StateMachine, Transition};

    fn failed_job() -> Job {
        let mut job = Job::new("q".into(), Filters::default());
        StateMachine::apply(
            &mut job,
            Transition::Fail {
                reason: "all agents failed".into(),
                responses: Vec::new(),
            },
        )
        .unwrap();
        job
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.db");
        let job = Job::new("spindle overheating".into(), Filters::default());

        {
            let store = SqliteStore::open(&path, Namespace::default()).unwrap();
            store.put(&job, None).await.unwrap();
        }

        let store = SqliteStore::open(&path, Namespace::default()).unwrap();
        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored, job);
        assert_eq!(stored.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn expired_records_are_invisible_and_purged() {
        let store = SqliteStore::in_memory(Namespace::default()).unwrap();
        let gone = failed_job();
        let kept = failed_job();
        store.put(&gone, Some(Duration::ZERO)).await.unwrap();
        store.put(&kept, Some(Duration::from_secs(3600))).await.unwrap();

        assert!(store.get(&gone.id).await.unwrap().is_none());
        assert!(store.get(&kept.id).await.unwrap().is_some());
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn namespaces_do_not_leak() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let a = SqliteStore::open(&path, Namespace::new("plant_a")).unwrap();
        let job = Job::new("q".into(), Filters::default());
        a.put(&job, None).await.unwrap();

        let b = SqliteStore::open(&path, Namespace::new("plant_b")).unwrap();
        assert!(b.get(&job.id).await.unwrap().is_none());
        assert!(b.list().await.unwrap().is_empty());
        assert_eq!(a.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conditional_put_keeps_the_first_terminal_record() {
        let store = SqliteStore::in_memory(Namespace::default()).unwrap();
        let mut job = Job::new("q".into(), Filters::default());
        assert!(store.put_if_not_terminal(&job, None).await.unwrap());
        StateMachine::apply(&mut job, Transition::Start).unwrap();
        let running = job.clone();
        assert!(store.put_if_not_terminal(&job, None).await.unwrap());

        StateMachine::apply(
            &mut job,
            Transition::Fail {
                reason: "abandoned after 2 redeliveries".into(),
                responses: Vec::new(),
            },
        )
        .unwrap();
        assert!(store.put_if_not_terminal(&job, None).await.unwrap());

        let mut late = running;
        StateMachine::apply(
            &mut late,
            Transition::Complete {
                report: "late report".into(),
                responses: Vec::new(),
            },
        )
        .unwrap();
        assert!(!store.put_if_not_terminal(&late, None).await.unwrap());

        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored, job);
        assert_eq!(stored.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn remove_deletes_only_the_named_record() {
        let store = SqliteStore::in_memory(Namespace::default()).unwrap();
        let gone = Job::new("gone".into(), Filters::default());
        let kept = Job::new("kept".into(), Filters::default());
        store.put(&gone, None).await.unwrap();
        store.put(&kept, None).await.unwrap();

        assert!(store.remove(&gone.id).await.unwrap());
        assert!(!store.remove(&gone.id).await.unwrap());
        assert_eq!(store.list().await.unwrap(), vec![kept]);
    }

    #[tokio::test]
    async fn put_overwrites_previous_record() {
        let store = SqliteStore::in_memory(Namespace::default()).unwrap();
        let mut job = Job::new("q".into(), Filters::default());
        store.put(&job, None).await.unwrap();
        StateMachine::apply(&mut job, Transition::Start).unwrap();
        store.put(&job, None).await.unwrap();

        let jobs = store.list().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Processing);
        store.ping().await.unwrap();
    }
}
