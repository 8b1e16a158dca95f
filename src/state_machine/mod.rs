mod job;
mod state;

pub use job::{Filters, Job, JobStatus, JobSummary, QueueEntry};
pub use state::{Admission, InvalidTransition, SkipReason, StateMachine, Transition};
