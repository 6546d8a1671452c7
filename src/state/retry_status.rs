//! Per-URL fetch state and the transitions between states
//!
//! The transition logic here is pure: it takes the URL's current status and
//! consecutive-miss counter plus the classified result of one attempt, and
//! returns the next status, the next counter and whether the attempt confirms
//! that the proxy was blocked. Persisting the result is the worker's job.

use crate::state::StateError;
use std::fmt;

/// Consecutive non-success attempts that confirm a proxy block
pub const BLOCK_THRESHOLD: u32 = 3;

/// Cumulative misses at which a retry-pass URL is given up on
pub const RETRY_FAILURE_THRESHOLD: u32 = 2;

/// Fetch state of a single URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryStatus {
    /// Waiting for a first-pass fetch (or a repeat after a soft miss)
    Pending,

    /// Content stored; terminal
    Success,

    /// Navigation timed out; waiting to be scheduled for the retry pass
    Timeout,

    /// Scheduled for the retry pass with the extended timeout
    RetryPending,

    /// Given up; terminal
    Failed,
}

impl RetryStatus {
    /// Returns true for states no fetch may leave without an explicit reset
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Returns true for states a worker may dispatch directly
    pub fn is_fetchable(&self) -> bool {
        matches!(self, Self::Pending | Self::RetryPending)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::RetryPending => "retry_pending",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "timeout" => Some(Self::Timeout),
            "retry_pending" => Some(Self::RetryPending),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Success,
            Self::Timeout,
            Self::RetryPending,
            Self::Failed,
        ]
    }
}

impl fmt::Display for RetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Classified result of one fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Page rendered and its fingerprint differs from the stored one
    Fresh,

    /// Page rendered but served the same fingerprint as the previous attempt
    SameFingerprint,

    /// Navigation timed out
    Timeout,

    /// Any other navigation failure
    Failure,
}

/// Result of applying an attempt to a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: RetryStatus,
    pub retry_count: u32,
    /// The attempt was the third (or later) consecutive miss
    pub confirmed_block: bool,
}

/// The URL retry state machine
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Misses after which a first-pass URL becomes `Failed`
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Applies one attempt to a URL in `status` with `retry_count` misses
    ///
    /// # Errors
    ///
    /// * `StateError::Terminal` - the URL is `Success` or `Failed`
    /// * `StateError::NotScheduled` - the URL is `Timeout` and was never
    ///   moved to `RetryPending`
    pub fn apply(
        &self,
        status: RetryStatus,
        retry_count: u32,
        attempt: Attempt,
    ) -> Result<Transition, StateError> {
        match status {
            RetryStatus::Success | RetryStatus::Failed => return Err(StateError::Terminal(status)),
            RetryStatus::Timeout => return Err(StateError::NotScheduled(status)),
            RetryStatus::Pending | RetryStatus::RetryPending => {}
        }

        if attempt == Attempt::Fresh {
            return Ok(Transition {
                status: RetryStatus::Success,
                retry_count: 0,
                confirmed_block: false,
            });
        }

        let retry_count = retry_count.saturating_add(1);
        let confirmed_block = retry_count >= BLOCK_THRESHOLD;

        let next = match (status, attempt) {
            (RetryStatus::RetryPending, _) if retry_count >= RETRY_FAILURE_THRESHOLD => {
                RetryStatus::Failed
            }
            (_, _) if status == RetryStatus::Pending && retry_count >= self.max_attempts => {
                RetryStatus::Failed
            }
            (_, Attempt::Timeout) => RetryStatus::Timeout,
            (current, _) => current,
        };

        Ok(Transition {
            status: next,
            retry_count,
            confirmed_block,
        })
    }

    /// Moves a timed-out URL into the retry pass
    pub fn schedule_retry(status: RetryStatus) -> Result<RetryStatus, StateError> {
        match status {
            RetryStatus::Timeout | RetryStatus::RetryPending => Ok(RetryStatus::RetryPending),
            other => Err(StateError::InvalidTransition {
                from: other,
                to: RetryStatus::RetryPending,
            }),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5)
    }

    #[test]
    fn test_fresh_content_succeeds_and_clears_counter() {
        let t = policy()
            .apply(RetryStatus::Pending, 2, Attempt::Fresh)
            .unwrap();
        assert_eq!(t.status, RetryStatus::Success);
        assert_eq!(t.retry_count, 0);
        assert!(!t.confirmed_block);

        let t = policy()
            .apply(RetryStatus::RetryPending, 1, Attempt::Fresh)
            .unwrap();
        assert_eq!(t.status, RetryStatus::Success);
    }

    #[test]
    fn test_same_fingerprint_is_never_success() {
        let t = policy()
            .apply(RetryStatus::Pending, 0, Attempt::SameFingerprint)
            .unwrap();
        assert_eq!(t.status, RetryStatus::Pending);
        assert_eq!(t.retry_count, 1);
        assert!(!t.confirmed_block);
    }

    #[test]
    fn test_third_miss_confirms_block() {
        let t = policy()
            .apply(RetryStatus::Pending, 2, Attempt::SameFingerprint)
            .unwrap();
        assert_eq!(t.status, RetryStatus::Pending);
        assert_eq!(t.retry_count, 3);
        assert!(t.confirmed_block);

        let t = policy()
            .apply(RetryStatus::Pending, 2, Attempt::Failure)
            .unwrap();
        assert!(t.confirmed_block);
    }

    #[test]
    fn test_first_pass_timeout() {
        let t = policy()
            .apply(RetryStatus::Pending, 0, Attempt::Timeout)
            .unwrap();
        assert_eq!(t.status, RetryStatus::Timeout);
        assert_eq!(t.retry_count, 1);
    }

    #[test]
    fn test_retry_pass_miss_fails() {
        for attempt in [Attempt::Timeout, Attempt::Failure, Attempt::SameFingerprint] {
            let t = policy()
                .apply(RetryStatus::RetryPending, 1, attempt)
                .unwrap();
            assert_eq!(t.status, RetryStatus::Failed, "attempt {:?}", attempt);
            assert_eq!(t.retry_count, 2);
        }
    }

    #[test]
    fn test_attempt_budget_exhausted() {
        let t = policy()
            .apply(RetryStatus::Pending, 4, Attempt::Failure)
            .unwrap();
        assert_eq!(t.status, RetryStatus::Failed);
        assert_eq!(t.retry_count, 5);
    }

    #[test]
    fn test_terminal_states_reject_attempts() {
        for status in [RetryStatus::Success, RetryStatus::Failed] {
            for attempt in [
                Attempt::Fresh,
                Attempt::SameFingerprint,
                Attempt::Timeout,
                Attempt::Failure,
            ] {
                assert_eq!(
                    policy().apply(status, 0, attempt),
                    Err(StateError::Terminal(status))
                );
            }
        }
    }

    #[test]
    fn test_timeout_must_be_scheduled_first() {
        assert_eq!(
            policy().apply(RetryStatus::Timeout, 1, Attempt::Fresh),
            Err(StateError::NotScheduled(RetryStatus::Timeout))
        );
        assert_eq!(
            RetryPolicy::schedule_retry(RetryStatus::Timeout),
            Ok(RetryStatus::RetryPending)
        );
    }

    #[test]
    fn test_schedule_retry_rejects_other_states() {
        for status in [RetryStatus::Pending, RetryStatus::Success, RetryStatus::Failed] {
            assert!(RetryPolicy::schedule_retry(status).is_err());
        }
    }

    #[test]
    fn test_roundtrip_db_string() {
        for status in RetryStatus::all_states() {
            assert_eq!(RetryStatus::from_db_string(status.to_db_string()), Some(status));
        }
        assert_eq!(RetryStatus::from_db_string("queued"), None);
    }
}
