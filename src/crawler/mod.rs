//! Crawler module: the crawl orchestration engine
//!
//! This module contains the core crawling logic, including:
//! - Content fingerprinting and block detection
//! - Adaptive, job-scoped rate control
//! - Page rendering through a proxy and structured extraction
//! - Fetch workers, the claim board and job scheduling
//! - Job control (submit, start, resume, kill, reset)

mod block_detector;
mod claims;
mod control;
mod extract;
mod outcome;
mod rate;
mod renderer;
mod scheduler;
mod worker;

pub use block_detector::{fingerprint, is_suspected_block};
pub use claims::{Claim, ClaimBoard};
pub use control::{JobHandle, JobSubmission, RelayEngine, MAX_WORKERS};
pub use extract::{extract_structured, ImageInfo, LinkInfo, StructuredContent};
pub use outcome::FetchOutcome;
pub use rate::{retry_rate_for, RateController};
pub use renderer::{HttpRenderer, PageRenderer, ProxyConfig, RenderError, RenderedPage};
pub use scheduler::run_job;
pub use worker::{FetchWorker, JobContext};
