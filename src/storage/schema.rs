//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Sumi-Relay database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Crawl jobs
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    urls_total INTEGER NOT NULL DEFAULT 0,
    urls_processed INTEGER NOT NULL DEFAULT 0,
    rate_limit_hits INTEGER NOT NULL DEFAULT 0,
    current_rate REAL NOT NULL DEFAULT 1.0,
    cooloff_until TEXT,
    debug_mode INTEGER NOT NULL DEFAULT 0,
    worker_count INTEGER NOT NULL DEFAULT 1,
    proxy_countries TEXT NOT NULL DEFAULT '',
    reshuffle_proxies INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

-- URLs of a job and their fetch state
CREATE TABLE IF NOT EXISTS crawled_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    content TEXT,
    content_hash TEXT,
    status_code INTEGER,
    crawled_at TEXT,
    proxy_used TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    retry_status TEXT NOT NULL DEFAULT 'pending',
    screenshot_path TEXT,
    structured_content TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawled_urls_job_status ON crawled_urls(job_id, retry_status);
CREATE INDEX IF NOT EXISTS idx_crawled_urls_crawled_at ON crawled_urls(job_id, crawled_at);

-- Egress proxy inventory, shared by all jobs
CREATE TABLE IF NOT EXISTS proxies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    username TEXT NOT NULL DEFAULT '',
    password TEXT NOT NULL DEFAULT '',
    country_code TEXT,
    is_blocked INTEGER NOT NULL DEFAULT 0,
    blocked_at TEXT,
    last_used_at TEXT,
    UNIQUE(host, port)
);

CREATE INDEX IF NOT EXISTS idx_proxies_blocked ON proxies(is_blocked);

-- Per-job aggregate statistics
CREATE TABLE IF NOT EXISTS crawl_stats (
    job_id INTEGER PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
    current_proxy TEXT,
    blocked_proxies_count INTEGER NOT NULL DEFAULT 0,
    avg_response_time REAL NOT NULL DEFAULT 0,
    last_request_time TEXT,
    successful_requests INTEGER NOT NULL DEFAULT 0,
    failed_requests INTEGER NOT NULL DEFAULT 0
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
