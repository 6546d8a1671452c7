//! Storage module for persisting jobs, URLs, stats and proxies
//!
//! This module handles all database operations for the engine, including:
//! - SQLite database initialization and schema management
//! - Job records and their lifecycle status
//! - Per-URL fetch state and extracted content
//! - Per-job statistics
//! - The shared proxy inventory

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteJobStore;
pub use traits::{JobStore, StorageError, StorageResult};

use crate::state::{JobStatus, RetryStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Store handle shared by every task of the process
pub type SharedStore = Arc<Mutex<dyn JobStore>>;

/// Opens (or creates) the SQLite store and wraps it for sharing
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_store(path: &Path) -> StorageResult<SharedStore> {
    let store = SqliteJobStore::new(path)?;
    Ok(Arc::new(Mutex::new(store)))
}

/// Wraps an existing store for sharing
pub fn share<S: JobStore + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Locks the shared store
///
/// The guard must be dropped before the caller awaits anything.
pub fn lock_store(store: &SharedStore) -> StorageResult<MutexGuard<'_, dyn JobStore + 'static>> {
    store.lock().map_err(|_| StorageError::Poisoned)
}

/// Formats a timestamp the way it is stored (fixed width, so text order is time order)
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Settings of a job to be created
#[derive(Debug, Clone)]
pub struct NewJob {
    pub debug_mode: bool,
    pub worker_count: u32,
    pub proxy_countries: Vec<String>,
    pub reshuffle_proxies: bool,
    pub initial_rate: f64,
}

/// Represents a crawl job in the database
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub urls_total: u64,
    pub urls_processed: u64,
    pub rate_limit_hits: u64,
    pub current_rate: f64,
    pub cooloff_until: Option<DateTime<Utc>>,
    pub debug_mode: bool,
    pub worker_count: u32,
    pub proxy_countries: Vec<String>,
    pub reshuffle_proxies: bool,
    pub error_message: Option<String>,
}

impl JobRecord {
    /// Country filter for proxy selection, `None` when any country will do
    pub fn country_filter(&self) -> Option<&[String]> {
        if self.proxy_countries.is_empty() {
            None
        } else {
            Some(&self.proxy_countries)
        }
    }
}

/// Field-level update of a job; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub current_rate: Option<f64>,
    pub rate_limit_hits: Option<u64>,
    pub cooloff_until: Option<Option<DateTime<Utc>>>,
    pub error_message: Option<Option<String>>,
}

/// Represents a crawled URL in the database
#[derive(Debug, Clone)]
pub struct UrlRecord {
    pub id: i64,
    pub job_id: i64,
    pub url: String,
    pub content: Option<String>,
    pub content_hash: Option<String>,
    pub status_code: Option<u16>,
    pub crawled_at: Option<DateTime<Utc>>,
    /// `host:port` of the proxy used by the latest attempt
    pub proxy_used: Option<String>,
    pub retry_count: u32,
    pub retry_status: RetryStatus,
    pub screenshot_path: Option<String>,
    /// Extracted content as a JSON document
    pub structured_content: Option<String>,
}

/// Field-level update of a URL; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct UrlUpdate {
    pub retry_status: Option<RetryStatus>,
    pub retry_count: Option<u32>,
    pub content: Option<String>,
    pub content_hash: Option<String>,
    pub status_code: Option<u16>,
    pub crawled_at: Option<DateTime<Utc>>,
    pub proxy_used: Option<String>,
    pub screenshot_path: Option<String>,
    pub structured_content: Option<String>,
}

/// Per-job aggregate statistics
#[derive(Debug, Clone, Default)]
pub struct StatsRecord {
    pub job_id: i64,
    pub current_proxy: Option<String>,
    pub blocked_proxies_count: u64,
    pub avg_response_time: f64,
    pub last_request_time: Option<DateTime<Utc>>,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

impl StatsRecord {
    /// Folds one response time into the running mean
    ///
    /// The first sample replaces the mean; later samples average with it.
    pub fn next_avg_response_time(&self, response_time: f64) -> f64 {
        if self.avg_response_time == 0.0 {
            response_time
        } else {
            (self.avg_response_time + response_time) / 2.0
        }
    }
}

/// Field-level update of a job's stats; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct StatsUpdate {
    pub current_proxy: Option<Option<String>>,
    pub blocked_proxies_count: Option<u64>,
    pub avg_response_time: Option<f64>,
    pub last_request_time: Option<DateTime<Utc>>,
    pub successful_requests: Option<u64>,
    pub failed_requests: Option<u64>,
}

/// Represents an egress proxy in the database
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRecord {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub country_code: Option<String>,
    pub is_blocked: bool,
    pub blocked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ProxyRecord {
    /// `host:port`, as recorded on URLs and stats
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Proxy server URL handed to renderers
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Field-level update of a proxy; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct ProxyUpdate {
    pub is_blocked: Option<bool>,
    pub blocked_at: Option<Option<DateTime<Utc>>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A proxy delivered by the proxy provider
#[derive(Debug, Clone, PartialEq)]
pub struct NewProxy {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub country_code: Option<String>,
}
