//! Live job status for monitoring
//!
//! Builds the report a dashboard polls while a job runs.

use crate::state::{JobStatus, RetryStatus};
use crate::storage::{format_timestamp, lock_store, SharedStore, StorageResult};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of one job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub id: i64,
    pub status: String,
    pub urls_total: u64,
    pub urls_processed: u64,
    pub progress_percent: f64,
    pub current_rate: f64,
    pub rate_limit_hits: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time: f64,
    pub cooloff_remaining_seconds: i64,
    pub current_proxy: Option<String>,
    /// Proxies of the most recent fetches; multi-worker jobs only
    pub active_proxies: Vec<String>,
    pub timeout_url_count: u64,
    pub retry_pending_count: u64,
    pub failed_count: u64,
    pub debug_mode: bool,
    pub worker_count: u32,
    /// Blocked proxies across the whole pool
    pub blocked_proxies_count: u64,
    pub last_updated: Option<String>,
    pub error_message: Option<String>,
}

/// Loads the monitoring report for a job
pub fn job_status(store: &SharedStore, job_id: i64) -> StorageResult<JobStatusReport> {
    job_status_at(store, job_id, Utc::now())
}

/// [`job_status`] with an explicit clock
pub fn job_status_at(
    store: &SharedStore,
    job_id: i64,
    now: DateTime<Utc>,
) -> StorageResult<JobStatusReport> {
    let mut store = lock_store(store)?;
    let job = store.get_job(job_id)?;
    let stats = store.get_or_create_stats(job_id)?;

    let cooloff_remaining_seconds = match (job.status, job.cooloff_until) {
        (JobStatus::Cooloff, Some(until)) => (until - now).num_seconds().max(0),
        _ => 0,
    };

    let active_proxies = if job.worker_count > 1 {
        store.recent_proxies(job_id, job.worker_count)?
    } else {
        Vec::new()
    };

    Ok(JobStatusReport {
        id: job.id,
        status: job.status.to_string(),
        urls_total: job.urls_total,
        urls_processed: job.urls_processed,
        progress_percent: percent(job.urls_processed, job.urls_total),
        current_rate: job.current_rate,
        rate_limit_hits: job.rate_limit_hits,
        successful_requests: stats.successful_requests,
        failed_requests: stats.failed_requests,
        avg_response_time: stats.avg_response_time,
        cooloff_remaining_seconds,
        current_proxy: stats.current_proxy,
        active_proxies,
        timeout_url_count: store.count_urls_by_status(job_id, RetryStatus::Timeout)?,
        retry_pending_count: store.count_urls_by_status(job_id, RetryStatus::RetryPending)?,
        failed_count: store.count_urls_by_status(job_id, RetryStatus::Failed)?,
        debug_mode: job.debug_mode,
        worker_count: job.worker_count,
        blocked_proxies_count: store.count_blocked_proxies()?,
        last_updated: stats.last_request_time.as_ref().map(format_timestamp),
        error_message: job.error_message,
    })
}

/// Share of `part` in `total` as a percentage, 0 for an empty total
pub fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

/// Prints a status report to stdout
pub fn print_status(report: &JobStatusReport) {
    println!("=== Job {} ===\n", report.id);

    println!("Status: {}", report.status);
    if let Some(message) = &report.error_message {
        println!("  Error: {}", message);
    }
    if report.cooloff_remaining_seconds > 0 {
        println!("  Cooloff ends in {}s", report.cooloff_remaining_seconds);
    }
    println!(
        "Progress: {} / {} ({:.1}%)",
        report.urls_processed, report.urls_total, report.progress_percent
    );
    println!();

    println!("Requests:");
    println!("  Successful: {}", report.successful_requests);
    println!("  Failed: {}", report.failed_requests);
    println!("  Avg response time: {:.2}s", report.avg_response_time);
    println!("  Current rate: {:.2} req/s", report.current_rate);
    println!("  Rate limit hits: {}", report.rate_limit_hits);
    println!();

    println!("URLs:");
    println!("  Timed out: {}", report.timeout_url_count);
    println!("  Retry pending: {}", report.retry_pending_count);
    println!("  Failed: {}", report.failed_count);
    println!();

    println!("Proxies:");
    println!(
        "  Current: {}",
        report.current_proxy.as_deref().unwrap_or("-")
    );
    for proxy in &report.active_proxies {
        println!("  - {}", proxy);
    }
    println!("  Blocked (pool): {}", report.blocked_proxies_count);
}
