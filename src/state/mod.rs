//! State module for jobs and URLs
//!
//! # Components
//!
//! - `JobStatus`: lifecycle of a crawl job (pending, running, cooloff, ...)
//! - `RetryStatus`: fetch state of a single URL
//! - `RetryPolicy`: the pure transition logic applied after every fetch attempt

mod job_status;
mod retry_status;

use thiserror::Error;

pub use job_status::JobStatus;
pub use retry_status::{
    Attempt, RetryPolicy, RetryStatus, Transition, BLOCK_THRESHOLD, RETRY_FAILURE_THRESHOLD,
};

/// Errors raised by illegal URL state transitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("URL is in terminal state '{0}' and needs a reset before it can be fetched")]
    Terminal(RetryStatus),

    #[error("URL in state '{0}' must be scheduled for retry before it is fetched")]
    NotScheduled(RetryStatus),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: RetryStatus, to: RetryStatus },
}
