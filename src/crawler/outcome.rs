//! Classified result of one fetch attempt

use std::fmt;

/// What a fetch attempt came to, after it was persisted
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Fresh content stored; the URL is `success`
    Success {
        status_code: u16,
        /// Seconds from navigation start to extracted content
        response_time: f64,
        proxy: String,
    },

    /// The body repeated the previous attempt's fingerprint
    SuspectedBlock {
        retry_count: u32,
        confirmed: bool,
        proxy: String,
    },

    /// Navigation exceeded its timeout
    Timeout {
        retry_count: u32,
        confirmed: bool,
        proxy: String,
    },

    /// Any other navigation error
    Failure {
        message: String,
        retry_count: u32,
        confirmed: bool,
        proxy: String,
    },

    /// No proxy was available; the job went into cooloff and the URL is untouched
    ProxyExhausted,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// True when the attempt confirmed a proxy block
    pub fn is_confirmed_block(&self) -> bool {
        match self {
            Self::SuspectedBlock { confirmed, .. }
            | Self::Timeout { confirmed, .. }
            | Self::Failure { confirmed, .. } => *confirmed,
            _ => false,
        }
    }

    /// True when the attempt consumed the URL's turn (everything but proxy exhaustion)
    pub fn attempted(&self) -> bool {
        !matches!(self, Self::ProxyExhausted)
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success {
                status_code,
                response_time,
                proxy,
            } => write!(
                f,
                "success ({} in {:.2}s via {})",
                status_code, response_time, proxy
            ),
            Self::SuspectedBlock {
                retry_count, proxy, ..
            } => write!(f, "suspected block (miss {} via {})", retry_count, proxy),
            Self::Timeout {
                retry_count, proxy, ..
            } => write!(f, "timeout (miss {} via {})", retry_count, proxy),
            Self::Failure {
                message,
                retry_count,
                proxy,
                ..
            } => write!(f, "failure (miss {} via {}): {}", retry_count, proxy, message),
            Self::ProxyExhausted => write!(f, "no proxy available"),
        }
    }
}
