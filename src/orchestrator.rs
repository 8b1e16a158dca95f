use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::agents::{AgentRegistry, AgentResponse};
use crate::config::{RcaConfig, RetryConfig};
use crate::error::Result;
use crate::queue::JobQueue;
use crate::report::ReportGenerator;
use crate::router::{self, RoutingStrategy};
use crate::state_machine::{Admission, Job, JobStatus, QueueEntry, StateMachine, Transition};
use crate::store::{self, ResultStore};

/// Timing and retry knobs for the worker pipeline.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub capability_timeout: Duration,
    pub job_deadline: Duration,
    pub result_ttl: Duration,
    pub visibility_timeout: Duration,
    pub max_redeliveries: u32,
    pub retry: RetryConfig,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&RcaConfig::default())
    }
}

impl From<&RcaConfig> for WorkerSettings {
    fn from(config: &RcaConfig) -> Self {
        Self {
            capability_timeout: config.capability_timeout(),
            job_deadline: config.job_deadline(),
            result_ttl: config.result_ttl(),
            visibility_timeout: config.visibility_timeout(),
            max_redeliveries: config.max_redeliveries,
            retry: config.retry_config(),
        }
    }
}

/// Which non-terminal jobs a recovery sweep hands back to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    /// Every queued or processing job. Run once before workers start.
    Startup,
    /// Processing jobs whose lease is older than the visibility timeout, and
    /// queued jobs created longer ago than that which never left the queue.
    Stale,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub abandoned: usize,
}

/// Result of the pipeline body, decided before the terminal write.
enum Verdict {
    Finish(Transition),
    /// Another delivery already wrote a terminal record.
    Superseded,
}

/// Drives queued jobs to a terminal state. Cheap to clone; every worker task
/// holds its own handle onto the shared queue and store.
#[derive(Clone)]
pub struct Orchestrator {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ResultStore>,
    router: Arc<dyn RoutingStrategy>,
    agents: AgentRegistry,
    reporter: Arc<dyn ReportGenerator>,
    settings: WorkerSettings,
}

impl Orchestrator {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ResultStore>,
        router: Arc<dyn RoutingStrategy>,
        agents: AgentRegistry,
        reporter: Arc<dyn ReportGenerator>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            store,
            router,
            agents,
            reporter,
            settings,
        }
    }

    /// Consume the queue until `shutdown` flips. A failing queue is retried
    /// with exponential backoff; the in-flight job is never re-queued from here.
    pub async fn run(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker, "worker started");
        let mut failures = 0u32;

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }
            let next = tokio::select! {
                _ = shutdown.changed() => break,
                next = self.queue.dequeue() => next,
            };

            match next {
                Ok(entry) => {
                    failures = 0;
                    let job_id = entry.job_id.clone();
                    if let Err(e) = self.process(entry).await {
                        error!(worker, %job_id, error = %e, "job left for redelivery");
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.settings.retry.delay_for_attempt(failures);
                    warn!(
                        worker,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "queue unavailable, backing off"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }

        info!(worker, "worker stopped");
    }

    /// Process one delivery. Returns the terminal status written, or `None`
    /// when the delivery was skipped or another delivery finished first.
    /// Errors are infrastructure failures; the record keeps its last written
    /// state and the stale sweep picks it up once it ages out.
    pub async fn process(&self, entry: QueueEntry) -> Result<Option<JobStatus>> {
        let Some(mut job) = self.store.get(&entry.job_id).await? else {
            warn!(job_id = %entry.job_id, "no record for queue entry, dropping");
            return Ok(None);
        };

        match StateMachine::admit(&job, &entry) {
            Admission::Skip(reason) => {
                info!(job_id = %job.id, attempt = entry.attempt, %reason, "skipping delivery");
                return Ok(None);
            }
            Admission::Start => {
                StateMachine::apply(&mut job, Transition::Start)?;
                if !self.persist(&job).await? {
                    info!(job_id = %job.id, "record became terminal before start");
                    return Ok(None);
                }
                info!(job_id = %job.id, status = %job.status, "job dequeued");
            }
            Admission::Resume => {
                StateMachine::apply(&mut job, Transition::Reclaim)?;
                if !self.persist(&job).await? {
                    info!(job_id = %job.id, "record became terminal before resume");
                    return Ok(None);
                }
                info!(job_id = %job.id, attempt = entry.attempt, "resuming redelivered job");
            }
        }

        let deadline = self.settings.job_deadline;
        let verdict = match tokio::time::timeout(deadline, self.pipeline(&mut job)).await {
            Ok(verdict) => verdict?,
            Err(_) => Verdict::Finish(Transition::Fail {
                reason: format!("job exceeded deadline of {}s", deadline.as_secs()),
                responses: Vec::new(),
            }),
        };

        let transition = match verdict {
            Verdict::Finish(t) => t,
            Verdict::Superseded => {
                info!(job_id = %job.id, "record became terminal mid-pipeline, skipping report");
                return Ok(None);
            }
        };

        StateMachine::apply(&mut job, transition)?;
        if !self.persist(&job).await? {
            info!(job_id = %job.id, "another delivery finished first, discarding outcome");
            return Ok(None);
        }

        match job.status {
            JobStatus::Completed => info!(job_id = %job.id, status = %job.status, "job terminal"),
            _ => warn!(
                job_id = %job.id,
                status = %job.status,
                error = job.error.as_deref().unwrap_or_default(),
                "job terminal"
            ),
        }
        Ok(Some(job.status))
    }

    async fn pipeline(&self, job: &mut Job) -> Result<Verdict> {
        let decision = router::decide(self.router.as_ref(), &job.query).await;
        StateMachine::apply(job, Transition::Route(decision))?;
        debug!(job_id = %job.id, routing = %decision, "capabilities selected");

        let calls = decision.selected().into_iter().map(|capability| {
            self.agents.invoke(
                capability,
                &job.query,
                &job.filters,
                self.settings.capability_timeout,
            )
        });
        let responses: Vec<AgentResponse> = join_all(calls).await;

        if responses.iter().all(|r| !r.success) {
            let reason = combined_error(&responses);
            return Ok(Verdict::Finish(Transition::Fail { reason, responses }));
        }

        if self
            .store
            .get(&job.id)
            .await?
            .is_some_and(|current| current.is_terminal())
        {
            return Ok(Verdict::Superseded);
        }

        let evidence: Vec<AgentResponse> =
            responses.iter().filter(|r| r.success).cloned().collect();
        let transition = match self.reporter.generate(&job.query, &evidence).await {
            Ok(report) => Transition::Complete { report, responses },
            Err(e) => Transition::Fail {
                reason: e.to_string(),
                responses,
            },
        };
        Ok(Verdict::Finish(transition))
    }

    /// Whole-record write with TTL for terminal records, retried with backoff
    /// while the store is unreachable. Never replaces a terminal record;
    /// returns `false` when one was already there.
    async fn persist(&self, job: &Job) -> Result<bool> {
        let ttl = store::retention(job, self.settings.result_ttl);
        let retry = self.settings.retry;
        let mut attempt = 0;
        loop {
            match self.store.put_if_not_terminal(job, ttl).await {
                Ok(written) => return Ok(written),
                Err(e) if e.is_infrastructure() && attempt < retry.max_retries => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        job_id = %job.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "store write failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Re-enqueue abandoned jobs. Each redelivery bumps the job's counter; a
    /// job past `max_redeliveries` is failed instead.
    pub async fn recover(&self, sweep: Sweep) -> Result<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        for mut job in self.store.list().await? {
            let eligible = match sweep {
                Sweep::Startup => !job.is_terminal(),
                Sweep::Stale => match job.status {
                    JobStatus::Processing => job.lease_started(),
                    JobStatus::Queued => Some(job.created_at),
                    JobStatus::Completed | JobStatus::Failed => None,
                }
                .is_some_and(|since| self.lease_expired(now, since)),
            };
            if !eligible {
                continue;
            }

            job.redeliveries += 1;
            if job.redeliveries > self.settings.max_redeliveries {
                let reason = format!(
                    "abandoned after {} redeliveries",
                    self.settings.max_redeliveries
                );
                let responses = std::mem::take(&mut job.agent_responses);
                StateMachine::apply(&mut job, Transition::Fail { reason, responses })?;
                if self.persist(&job).await? {
                    warn!(job_id = %job.id, status = %job.status, "job terminal");
                    report.abandoned += 1;
                }
                continue;
            }

            if !self.persist(&job).await? {
                continue;
            }
            self.queue.enqueue(job.queue_entry()).await?;
            info!(job_id = %job.id, attempt = job.redeliveries, ?sweep, "job redelivered");
            report.requeued += 1;
        }

        Ok(report)
    }

    fn lease_expired(&self, now: DateTime<Utc>, since: DateTime<Utc>) -> bool {
        (now - since)
            .to_std()
            .is_ok_and(|age| age > self.settings.visibility_timeout)
    }

    /// Periodic stale sweep plus expired-record purge, every half visibility
    /// timeout.
    pub async fn run_sweeper(&self, mut shutdown: watch::Receiver<bool>) {
        let period = (self.settings.visibility_timeout / 2).max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            match self.recover(Sweep::Stale).await {
                Ok(r) if r.requeued + r.abandoned > 0 => {
                    info!(requeued = r.requeued, abandoned = r.abandoned, "stale sweep finished");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "stale sweep failed"),
            }
            match self.store.purge_expired().await {
                Ok(0) => {}
                Ok(n) => debug!(removed = n, "purged expired records"),
                Err(e) => warn!(error = %e, "purge failed"),
            }
        }
    }
}

fn combined_error(responses: &[AgentResponse]) -> String {
    let details: Vec<String> = responses
        .iter()
        .map(|r| {
            format!(
                "{}: {}",
                r.capability,
                r.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();
    format!("all agents failed ({})", details.join("; "))
}
