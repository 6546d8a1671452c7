//! Job lifecycle states

use std::fmt;

/// Status of a crawl job
///
/// A job is created `Pending`, moves to `Running` when started, may bounce
/// through `Cooloff` while the proxy pool is exhausted, and ends in one of
/// `Completed`, `Failed` or `Killed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Submitted, never started (or reset)
    Pending,

    /// Workers are fetching
    Running,

    /// Paused until `cooloff_until` because no proxy was available
    Cooloff,

    /// Every URL was processed
    Completed,

    /// The run ended without processing every URL, or hit a job-level fault
    Failed,

    /// Stopped by an operator
    Killed,
}

impl JobStatus {
    /// Returns true while the engine owns the job
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Cooloff)
    }

    /// Returns true once a run has ended
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Killed)
    }

    /// Kill is only accepted while the job is running or cooling off
    pub fn can_kill(&self) -> bool {
        self.is_active()
    }

    /// Reset is refused while the engine owns the job
    pub fn can_reset(&self) -> bool {
        !self.is_active()
    }

    /// Resume continues a run that was stopped early
    pub fn can_resume(&self) -> bool {
        matches!(self, Self::Killed | Self::Failed)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Cooloff => "cooloff",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Killed => "killed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "cooloff" => Some(Self::Cooloff),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "killed" => Some(Self::Killed),
            _ => None,
        }
    }

    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Running,
            Self::Cooloff,
            Self::Completed,
            Self::Failed,
            Self::Killed,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
