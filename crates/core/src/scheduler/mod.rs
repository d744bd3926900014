//! Job scheduler: accepts download requests, leases a tunnel per job and
//! sequences fetch and transcode, retrying through an explicit state machine.

mod config;
mod error;
mod runner;
mod throttle;
mod types;

pub use config::{AccessConfig, SchedulerConfig};
pub use error::SubmitError;
pub use runner::{JobScheduler, SchedulerStatus};
pub use throttle::SubmitThrottle;
pub use types::{
    JobErrorKind, JobFailure, JobId, JobProgress, JobRequest, JobResult, JobSnapshot, JobStatus,
    JobUpdate, StatusChange,
};
