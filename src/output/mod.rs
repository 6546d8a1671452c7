//! Output module for job reports and content export
//!
//! This module handles:
//! - The live status report a monitor polls
//! - Exporting crawled content as JSON, buffered or streamed
//! - Export progress

mod export;
mod status;

pub use export::{export_job, export_progress, export_url, ExportMode, ExportProgress, RawRecord};
pub use status::{job_status, job_status_at, percent, print_status, JobStatusReport};
