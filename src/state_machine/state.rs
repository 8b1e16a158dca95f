use chrono::Utc;
use thiserror::Error;

use super::job::{Job, JobStatus, QueueEntry};
use crate::agents::AgentResponse;
use crate::router::RoutingDecision;

/// A requested change to a job record. Only the orchestrator applies these.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// queued -> processing, stamping `startedAt` and the lease.
    Start,
    /// processing -> processing for a redelivered job. Only the lease moves.
    Reclaim,
    /// Record the routing decision computed for a processing job.
    Route(RoutingDecision),
    /// processing -> completed with the generated report.
    Complete {
        report: String,
        responses: Vec<AgentResponse>,
    },
    /// queued | processing -> failed with a human-readable reason.
    Fail {
        reason: String,
        responses: Vec<AgentResponse>,
    },
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Reclaim => "reclaim",
            Transition::Route(_) => "route",
            Transition::Complete { .. } => "complete",
            Transition::Fail { .. } => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {transition} job {job_id} in status {from}")]
pub struct InvalidTransition {
    pub job_id: String,
    pub from: JobStatus,
    pub transition: &'static str,
}

/// What a worker should do with a dequeued entry given the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Fresh job: transition to processing and run.
    Start,
    /// Redelivered job that a crashed worker left in processing.
    Resume,
    /// Nothing to do: terminal already, or another worker holds it.
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Terminal,
    InFlight,
    /// A later redelivery of the same job is already on the queue.
    Superseded,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Terminal => write!(f, "already terminal"),
            SkipReason::InFlight => write!(f, "already processing"),
            SkipReason::Superseded => write!(f, "superseded by a newer delivery"),
        }
    }
}

/// Enforces the job lifecycle:
///
/// ```text
/// queued --start--> processing --complete--> completed
///                   processing --fail------> failed
/// ```
///
/// Terminal records never change again. `startedAt` and `completedAt` are
/// written exactly once, at the transition that owns them.
pub struct StateMachine;

impl StateMachine {
    /// Idempotence guard for at-least-once delivery. Only the entry carrying
    /// the record's current redelivery count may run the job.
    pub fn admit(job: &Job, entry: &QueueEntry) -> Admission {
        match job.status {
            JobStatus::Completed | JobStatus::Failed => Admission::Skip(SkipReason::Terminal),
            _ if entry.attempt < job.redeliveries => Admission::Skip(SkipReason::Superseded),
            JobStatus::Queued => Admission::Start,
            JobStatus::Processing if entry.attempt > 0 => Admission::Resume,
            JobStatus::Processing => Admission::Skip(SkipReason::InFlight),
        }
    }

    pub fn apply(job: &mut Job, transition: Transition) -> Result<(), InvalidTransition> {
        let invalid = |job: &Job, t: &Transition| InvalidTransition {
            job_id: job.id.clone(),
            from: job.status,
            transition: t.name(),
        };

        match (job.status, transition) {
            (JobStatus::Queued, Transition::Start) => {
                let now = Utc::now();
                job.status = JobStatus::Processing;
                if job.started_at.is_none() {
                    job.started_at = Some(now);
                }
                job.claimed_at = Some(now);
            }
            (JobStatus::Processing, Transition::Reclaim) => {
                job.claimed_at = Some(Utc::now());
            }
            (JobStatus::Processing, Transition::Route(decision)) => {
                job.routing = Some(decision);
            }
            (JobStatus::Processing, Transition::Complete { report, responses }) => {
                job.status = JobStatus::Completed;
                job.result = Some(report);
                job.error = None;
                job.agent_responses = responses;
                job.completed_at = Some(Utc::now());
            }
            (JobStatus::Queued | JobStatus::Processing, Transition::Fail { reason, responses }) => {
                job.status = JobStatus::Failed;
                job.error = Some(reason);
                job.result = None;
                job.agent_responses = responses;
                job.completed_at = Some(Utc::now());
            }
            (_, t) => return Err(invalid(job, &t)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::job::Filters;

    fn make_job() -> Job {
        Job::new("What caused the temperature spike?".into(), Filters::default())
    }

    #[test]
    fn happy_path_walks_all_states() {
        let mut job = make_job();

        StateMachine::apply(&mut job, Transition::Start).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        let started = job.started_at.unwrap();

        StateMachine::apply(&mut job, Transition::Route(RoutingDecision::all())).unwrap();
        assert_eq!(job.routing, Some(RoutingDecision::all()));

        StateMachine::apply(
            &mut job,
            Transition::Complete {
                report: "Bearing wear on MCH_003".into(),
                responses: Vec::new(),
            },
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some("Bearing wear on MCH_003"));
        assert!(job.error.is_none());
        assert_eq!(job.started_at, Some(started));
        assert!(job.completed_at.unwrap() >= started);
    }

    #[test]
    fn failure_sets_error_only() {
        let mut job = make_job();
        StateMachine::apply(&mut job, Transition::Start).unwrap();
        StateMachine::apply(
            &mut job,
            Transition::Fail {
                reason: "all agents failed".into(),
                responses: Vec::new(),
            },
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("all agents failed"));
        assert!(job.result.is_none());
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        let mut job = make_job();
        StateMachine::apply(&mut job, Transition::Start).unwrap();
        StateMachine::apply(
            &mut job,
            Transition::Complete {
                report: "done".into(),
                responses: Vec::new(),
            },
        )
        .unwrap();
        let snapshot = job.clone();

        for t in [
            Transition::Start,
            Transition::Reclaim,
            Transition::Route(RoutingDecision::all()),
            Transition::Complete {
                report: "again".into(),
                responses: Vec::new(),
            },
            Transition::Fail {
                reason: "late".into(),
                responses: Vec::new(),
            },
        ] {
            let err = StateMachine::apply(&mut job, t).unwrap_err();
            assert_eq!(err.from, JobStatus::Completed);
        }
        assert_eq!(job, snapshot);
    }

    #[test]
    fn cannot_complete_without_starting() {
        let mut job = make_job();
        let err = StateMachine::apply(
            &mut job,
            Transition::Complete {
                report: "skipped ahead".into(),
                responses: Vec::new(),
            },
        )
        .unwrap_err();
        assert_eq!(err.transition, "complete");
        assert_eq!(
            err.to_string(),
            format!("cannot complete job {} in status queued", job.id)
        );
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn queued_job_can_fail_directly() {
        let mut job = make_job();
        StateMachine::apply(
            &mut job,
            Transition::Fail {
                reason: "redelivery limit reached".into(),
                responses: Vec::new(),
            },
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn reclaim_moves_only_the_lease() {
        let mut job = make_job();
        assert!(StateMachine::apply(&mut job, Transition::Reclaim).is_err());

        StateMachine::apply(&mut job, Transition::Start).unwrap();
        assert_eq!(job.claimed_at, job.started_at);
        let started = job.started_at;
        job.claimed_at = Some(Utc::now() - chrono::Duration::hours(1));

        StateMachine::apply(&mut job, Transition::Reclaim).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.started_at, started);
        assert!(job.claimed_at >= started);
        assert_eq!(job.lease_started(), job.claimed_at);
    }

    #[test]
    fn stale_queued_entry_is_superseded_by_redelivery() {
        let mut job = make_job();
        let original = job.queue_entry();
        job.redeliveries = 1;
        assert_eq!(
            StateMachine::admit(&job, &original),
            Admission::Skip(SkipReason::Superseded)
        );
        assert_eq!(StateMachine::admit(&job, &job.queue_entry()), Admission::Start);
    }

    #[test]
    fn admission_guard() {
        let mut job = make_job();
        let first = job.queue_entry();
        assert_eq!(StateMachine::admit(&job, &first), Admission::Start);

        StateMachine::apply(&mut job, Transition::Start).unwrap();
        assert_eq!(
            StateMachine::admit(&job, &first),
            Admission::Skip(SkipReason::InFlight)
        );

        job.redeliveries = 1;
        let redelivered = job.queue_entry();
        assert_eq!(StateMachine::admit(&job, &redelivered), Admission::Resume);
        assert_eq!(
            StateMachine::admit(&job, &first),
            Admission::Skip(SkipReason::Superseded)
        );

        StateMachine::apply(
            &mut job,
            Transition::Fail {
                reason: "x".into(),
                responses: Vec::new(),
            },
        )
        .unwrap();
        assert_eq!(
            StateMachine::admit(&job, &redelivered),
            Admission::Skip(SkipReason::Terminal)
        );
    }
}
