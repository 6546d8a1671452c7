//! Storage traits and error types
//!
//! This module defines the trait interface for job stores and the
//! associated error types.

use crate::state::{JobStatus, RetryStatus};
use crate::storage::{
    JobRecord, JobUpdate, NewJob, NewProxy, ProxyRecord, ProxyUpdate, StatsRecord, StatsUpdate,
    UrlRecord, UrlUpdate,
};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("URL not found: {0}")]
    UrlNotFound(i64),

    #[error("Proxy not found: {0}")]
    ProxyNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for job store implementations
///
/// Every method is a single atomic operation against the backing store.
/// Check-then-update sequences that span several calls must be made while
/// holding the shared store lock (see [`crate::storage::SharedStore`]).
pub trait JobStore: Send {
    // ===== Job Management =====

    /// Creates a job together with its URLs (all `pending`) and its stats row
    ///
    /// # Arguments
    ///
    /// * `job` - Job settings
    /// * `urls` - URLs to crawl, in submission order
    ///
    /// # Returns
    ///
    /// The ID of the newly created job
    fn create_job(&mut self, job: &NewJob, urls: &[String]) -> StorageResult<i64>;

    /// Gets a job by ID
    fn get_job(&self, job_id: i64) -> StorageResult<JobRecord>;

    /// Lists all jobs, newest first
    fn list_jobs(&self) -> StorageResult<Vec<JobRecord>>;

    /// Writes the fields set in `update`
    fn save_job(&mut self, job_id: i64, update: &JobUpdate) -> StorageResult<()>;

    /// Moves a job to `to` only if its current status is one of `from`
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The status was changed
    /// * `Ok(false)` - The job was in some other status and was left alone
    fn transition_job(
        &mut self,
        job_id: i64,
        from: &[JobStatus],
        to: JobStatus,
    ) -> StorageResult<bool>;

    /// Increments `urls_processed`, never past `urls_total`
    ///
    /// # Returns
    ///
    /// The new value of `urls_processed`
    fn increment_urls_processed(&mut self, job_id: i64) -> StorageResult<u64>;

    /// Clears every URL's fetch state, the stats and the job counters
    ///
    /// Leaves the job `pending` with `current_rate = initial_rate`.
    fn reset_job(&mut self, job_id: i64, initial_rate: f64) -> StorageResult<()>;

    // ===== URL Management =====

    /// Gets a URL by ID
    fn get_url(&self, url_id: i64) -> StorageResult<UrlRecord>;

    /// Gets all URLs of a job in one status, ascending by ID
    fn list_urls_by_status(&self, job_id: i64, status: RetryStatus)
        -> StorageResult<Vec<UrlRecord>>;

    /// Gets the job's URLs waiting for a first-pass fetch
    fn list_pending_urls(&self, job_id: i64) -> StorageResult<Vec<UrlRecord>> {
        self.list_urls_by_status(job_id, RetryStatus::Pending)
    }

    /// Gets the job's URLs that timed out and wait for the retry pass
    fn list_timeout_urls(&self, job_id: i64) -> StorageResult<Vec<UrlRecord>> {
        self.list_urls_by_status(job_id, RetryStatus::Timeout)
    }

    /// Gets one page of a job's URLs, ascending by ID
    fn list_urls(&self, job_id: i64, offset: u64, limit: u64) -> StorageResult<Vec<UrlRecord>>;

    /// Counts all URLs of a job
    fn count_urls(&self, job_id: i64) -> StorageResult<u64>;

    /// Counts a job's URLs in one status
    fn count_urls_by_status(&self, job_id: i64, status: RetryStatus) -> StorageResult<u64>;

    /// Counts a job's URLs that carry content (raw) or structured content
    fn count_urls_with_content(&self, job_id: i64, structured: bool) -> StorageResult<u64>;

    /// Writes the fields set in `update`
    fn update_url(&mut self, url_id: i64, update: &UrlUpdate) -> StorageResult<()>;

    /// Distinct proxies used by the job's most recently crawled URLs
    ///
    /// # Arguments
    ///
    /// * `job_id` - The job
    /// * `limit` - Maximum number of proxies returned
    fn recent_proxies(&self, job_id: i64, limit: u32) -> StorageResult<Vec<String>>;

    // ===== Statistics =====

    /// Gets the job's stats, creating a zeroed row on first use
    fn get_or_create_stats(&mut self, job_id: i64) -> StorageResult<StatsRecord>;

    /// Writes the fields set in `update`
    fn update_stats(&mut self, job_id: i64, update: &StatsUpdate) -> StorageResult<()>;

    // ===== Proxy Management =====

    /// Gets all proxies, most recently used first
    fn list_proxies(&self) -> StorageResult<Vec<ProxyRecord>>;

    /// Gets a proxy by ID
    fn get_proxy(&self, proxy_id: i64) -> StorageResult<ProxyRecord>;

    /// Writes the fields set in `update`
    fn update_proxy(&mut self, proxy_id: i64, update: &ProxyUpdate) -> StorageResult<()>;

    /// Inserts a proxy, or refreshes credentials and country of the one
    /// already stored under the same (host, port)
    ///
    /// # Returns
    ///
    /// The proxy ID
    fn upsert_proxy(&mut self, proxy: &NewProxy) -> StorageResult<i64>;

    /// Counts proxies currently marked blocked
    fn count_blocked_proxies(&self) -> StorageResult<u64>;

    /// Distinct non-empty country codes among unblocked proxies, sorted
    fn list_proxy_countries(&self) -> StorageResult<Vec<String>>;
}
