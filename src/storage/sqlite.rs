//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the JobStore trait.

use crate::state::{JobStatus, RetryStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{JobStore, StorageError, StorageResult};
use crate::storage::{
    format_timestamp, JobRecord, JobUpdate, NewJob, NewProxy, ProxyRecord, ProxyUpdate,
    StatsRecord, StatsUpdate, UrlRecord, UrlUpdate,
};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

const JOB_COLUMNS: &str = "id, status, created_at, urls_total, urls_processed, rate_limit_hits,
     current_rate, cooloff_until, debug_mode, worker_count, proxy_countries,
     reshuffle_proxies, error_message";

const URL_COLUMNS: &str = "id, job_id, url, content, content_hash, status_code, crawled_at,
     proxy_used, retry_count, retry_status, screenshot_path, structured_content";

const PROXY_COLUMNS: &str =
    "id, host, port, username, password, country_code, is_blocked, blocked_at, last_used_at";

const STATS_COLUMNS: &str = "job_id, current_proxy, blocked_proxies_count, avg_response_time,
     last_request_time, successful_requests, failed_requests";

/// SQLite job store
pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    /// Creates a new SqliteJobStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteJobStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Runs `UPDATE table SET ... WHERE key = id` for the given columns
    fn apply_update(
        &self,
        table: &str,
        key: &str,
        id: i64,
        sets: Vec<(&'static str, Value)>,
    ) -> StorageResult<usize> {
        if sets.is_empty() {
            return Ok(0);
        }

        let assignments: Vec<String> = sets
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} = ?{}", column, i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            table,
            assignments.join(", "),
            key,
            sets.len() + 1
        );

        let mut values: Vec<Value> = sets.into_iter().map(|(_, value)| value).collect();
        values.push(Value::Integer(id));

        Ok(self.conn.execute(&sql, params_from_iter(values.iter()))?)
    }
}

fn ts_value(ts: &DateTime<Utc>) -> Value {
    Value::Text(format_timestamp(ts))
}

fn opt_ts_value(ts: &Option<DateTime<Utc>>) -> Value {
    ts.as_ref().map(ts_value).unwrap_or(Value::Null)
}

fn opt_text_value(text: &Option<String>) -> Value {
    text.clone().map(Value::Text).unwrap_or(Value::Null)
}

fn read_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn read_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    read_opt_ts(row, idx)?.ok_or(rusqlite::Error::InvalidColumnType(
        idx,
        "timestamp".to_string(),
        Type::Null,
    ))
}

fn split_countries(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        status: JobStatus::from_db_string(&row.get::<_, String>(1)?).unwrap_or(JobStatus::Failed),
        created_at: read_ts(row, 2)?,
        urls_total: row.get::<_, i64>(3)? as u64,
        urls_processed: row.get::<_, i64>(4)? as u64,
        rate_limit_hits: row.get::<_, i64>(5)? as u64,
        current_rate: row.get(6)?,
        cooloff_until: read_opt_ts(row, 7)?,
        debug_mode: row.get(8)?,
        worker_count: row.get(9)?,
        proxy_countries: split_countries(&row.get::<_, String>(10)?),
        reshuffle_proxies: row.get(11)?,
        error_message: row.get(12)?,
    })
}

fn row_to_url(row: &Row<'_>) -> rusqlite::Result<UrlRecord> {
    Ok(UrlRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        url: row.get(2)?,
        content: row.get(3)?,
        content_hash: row.get(4)?,
        status_code: row.get(5)?,
        crawled_at: read_opt_ts(row, 6)?,
        proxy_used: row.get(7)?,
        retry_count: row.get(8)?,
        retry_status: RetryStatus::from_db_string(&row.get::<_, String>(9)?)
            .unwrap_or(RetryStatus::Failed),
        screenshot_path: row.get(10)?,
        structured_content: row.get(11)?,
    })
}

fn row_to_proxy(row: &Row<'_>) -> rusqlite::Result<ProxyRecord> {
    Ok(ProxyRecord {
        id: row.get(0)?,
        host: row.get(1)?,
        port: row.get(2)?,
        username: row.get(3)?,
        password: row.get(4)?,
        country_code: row.get(5)?,
        is_blocked: row.get(6)?,
        blocked_at: read_opt_ts(row, 7)?,
        last_used_at: read_opt_ts(row, 8)?,
    })
}

fn row_to_stats(row: &Row<'_>) -> rusqlite::Result<StatsRecord> {
    Ok(StatsRecord {
        job_id: row.get(0)?,
        current_proxy: row.get(1)?,
        blocked_proxies_count: row.get::<_, i64>(2)? as u64,
        avg_response_time: row.get(3)?,
        last_request_time: read_opt_ts(row, 4)?,
        successful_requests: row.get::<_, i64>(5)? as u64,
        failed_requests: row.get::<_, i64>(6)? as u64,
    })
}

impl JobStore for SqliteJobStore {
    // ===== Job Management =====

    fn create_job(&mut self, job: &NewJob, urls: &[String]) -> StorageResult<i64> {
        let now = format_timestamp(&Utc::now());
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO jobs (status, created_at, urls_total, current_rate, debug_mode,
             worker_count, proxy_countries, reshuffle_proxies)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                JobStatus::Pending.to_db_string(),
                now,
                urls.len() as i64,
                job.initial_rate,
                job.debug_mode,
                job.worker_count,
                job.proxy_countries.join(","),
                job.reshuffle_proxies,
            ],
        )?;
        let job_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO crawled_urls (job_id, url, retry_status) VALUES (?1, ?2, ?3)",
            )?;
            for url in urls {
                stmt.execute(params![job_id, url, RetryStatus::Pending.to_db_string()])?;
            }
        }

        tx.execute(
            "INSERT INTO crawl_stats (job_id) VALUES (?1)",
            params![job_id],
        )?;

        tx.commit()?;
        Ok(job_id)
    }

    fn get_job(&self, job_id: i64) -> StorageResult<JobRecord> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        self.conn
            .query_row(&sql, params![job_id], row_to_job)
            .optional()?
            .ok_or(StorageError::JobNotFound(job_id))
    }

    fn list_jobs(&self) -> StorageResult<Vec<JobRecord>> {
        let sql = format!("SELECT {} FROM jobs ORDER BY id DESC", JOB_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn save_job(&mut self, job_id: i64, update: &JobUpdate) -> StorageResult<()> {
        let mut sets = Vec::new();
        if let Some(rate) = update.current_rate {
            sets.push(("current_rate", Value::Real(rate)));
        }
        if let Some(hits) = update.rate_limit_hits {
            sets.push(("rate_limit_hits", Value::Integer(hits as i64)));
        }
        if let Some(until) = &update.cooloff_until {
            sets.push(("cooloff_until", opt_ts_value(until)));
        }
        if let Some(message) = &update.error_message {
            sets.push(("error_message", opt_text_value(message)));
        }

        if self.apply_update("jobs", "id", job_id, sets)? == 0 && self.get_job(job_id).is_err() {
            return Err(StorageError::JobNotFound(job_id));
        }
        Ok(())
    }

    fn transition_job(
        &mut self,
        job_id: i64,
        from: &[JobStatus],
        to: JobStatus,
    ) -> StorageResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        let placeholders: Vec<String> = (0..from.len()).map(|i| format!("?{}", i + 3)).collect();
        let sql = format!(
            "UPDATE jobs SET status = ?1 WHERE id = ?2 AND status IN ({})",
            placeholders.join(", ")
        );

        let mut values = vec![
            Value::Text(to.to_db_string().to_string()),
            Value::Integer(job_id),
        ];
        values.extend(
            from.iter()
                .map(|status| Value::Text(status.to_db_string().to_string())),
        );

        let changed = self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(changed > 0)
    }

    fn increment_urls_processed(&mut self, job_id: i64) -> StorageResult<u64> {
        self.conn.execute(
            "UPDATE jobs SET urls_processed = MIN(urls_processed + 1, urls_total) WHERE id = ?1",
            params![job_id],
        )?;

        let processed: Option<i64> = self
            .conn
            .query_row(
                "SELECT urls_processed FROM jobs WHERE id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;

        processed
            .map(|p| p as u64)
            .ok_or(StorageError::JobNotFound(job_id))
    }

    fn reset_job(&mut self, job_id: i64, initial_rate: f64) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        let changed = tx.execute(
            "UPDATE jobs SET status = ?1, urls_processed = 0, rate_limit_hits = 0,
             current_rate = ?2, cooloff_until = NULL, error_message = NULL
             WHERE id = ?3",
            params![JobStatus::Pending.to_db_string(), initial_rate, job_id],
        )?;
        if changed == 0 {
            return Err(StorageError::JobNotFound(job_id));
        }

        tx.execute(
            "UPDATE crawled_urls SET content = NULL, content_hash = NULL, status_code = NULL,
             crawled_at = NULL, proxy_used = NULL, retry_count = 0, retry_status = ?1,
             screenshot_path = NULL, structured_content = NULL
             WHERE job_id = ?2",
            params![RetryStatus::Pending.to_db_string(), job_id],
        )?;

        tx.execute(
            "INSERT OR IGNORE INTO crawl_stats (job_id) VALUES (?1)",
            params![job_id],
        )?;
        tx.execute(
            "UPDATE crawl_stats SET current_proxy = NULL, blocked_proxies_count = 0,
             avg_response_time = 0, last_request_time = NULL, successful_requests = 0,
             failed_requests = 0
             WHERE job_id = ?1",
            params![job_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    // ===== URL Management =====

    fn get_url(&self, url_id: i64) -> StorageResult<UrlRecord> {
        let sql = format!("SELECT {} FROM crawled_urls WHERE id = ?1", URL_COLUMNS);
        self.conn
            .query_row(&sql, params![url_id], row_to_url)
            .optional()?
            .ok_or(StorageError::UrlNotFound(url_id))
    }

    fn list_urls_by_status(
        &self,
        job_id: i64,
        status: RetryStatus,
    ) -> StorageResult<Vec<UrlRecord>> {
        let sql = format!(
            "SELECT {} FROM crawled_urls WHERE job_id = ?1 AND retry_status = ?2 ORDER BY id",
            URL_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let urls = stmt
            .query_map(params![job_id, status.to_db_string()], row_to_url)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(urls)
    }

    fn list_urls(&self, job_id: i64, offset: u64, limit: u64) -> StorageResult<Vec<UrlRecord>> {
        let sql = format!(
            "SELECT {} FROM crawled_urls WHERE job_id = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
            URL_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let urls = stmt
            .query_map(params![job_id, limit as i64, offset as i64], row_to_url)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(urls)
    }

    fn count_urls(&self, job_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM crawled_urls WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_urls_by_status(&self, job_id: i64, status: RetryStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM crawled_urls WHERE job_id = ?1 AND retry_status = ?2",
            params![job_id, status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_urls_with_content(&self, job_id: i64, structured: bool) -> StorageResult<u64> {
        let sql = if structured {
            "SELECT COUNT(*) FROM crawled_urls WHERE job_id = ?1 AND structured_content IS NOT NULL"
        } else {
            "SELECT COUNT(*) FROM crawled_urls WHERE job_id = ?1 AND content IS NOT NULL"
        };
        let count: i64 = self.conn.query_row(sql, params![job_id], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn update_url(&mut self, url_id: i64, update: &UrlUpdate) -> StorageResult<()> {
        let mut sets = Vec::new();
        if let Some(status) = update.retry_status {
            sets.push((
                "retry_status",
                Value::Text(status.to_db_string().to_string()),
            ));
        }
        if let Some(count) = update.retry_count {
            sets.push(("retry_count", Value::Integer(count as i64)));
        }
        if let Some(content) = &update.content {
            sets.push(("content", Value::Text(content.clone())));
        }
        if let Some(hash) = &update.content_hash {
            sets.push(("content_hash", Value::Text(hash.clone())));
        }
        if let Some(code) = update.status_code {
            sets.push(("status_code", Value::Integer(code as i64)));
        }
        if let Some(at) = &update.crawled_at {
            sets.push(("crawled_at", ts_value(at)));
        }
        if let Some(proxy) = &update.proxy_used {
            sets.push(("proxy_used", Value::Text(proxy.clone())));
        }
        if let Some(path) = &update.screenshot_path {
            sets.push(("screenshot_path", Value::Text(path.clone())));
        }
        if let Some(structured) = &update.structured_content {
            sets.push(("structured_content", Value::Text(structured.clone())));
        }

        if self.apply_update("crawled_urls", "id", url_id, sets)? == 0
            && self.get_url(url_id).is_err()
        {
            return Err(StorageError::UrlNotFound(url_id));
        }
        Ok(())
    }

    fn recent_proxies(&self, job_id: i64, limit: u32) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT proxy_used FROM crawled_urls
             WHERE job_id = ?1 AND proxy_used IS NOT NULL AND crawled_at IS NOT NULL
             GROUP BY proxy_used
             ORDER BY MAX(crawled_at) DESC
             LIMIT ?2",
        )?;
        let proxies = stmt
            .query_map(params![job_id, limit], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(proxies)
    }

    // ===== Statistics =====

    fn get_or_create_stats(&mut self, job_id: i64) -> StorageResult<StatsRecord> {
        if self.get_job(job_id).is_err() {
            return Err(StorageError::JobNotFound(job_id));
        }

        self.conn.execute(
            "INSERT OR IGNORE INTO crawl_stats (job_id) VALUES (?1)",
            params![job_id],
        )?;

        let sql = format!("SELECT {} FROM crawl_stats WHERE job_id = ?1", STATS_COLUMNS);
        Ok(self.conn.query_row(&sql, params![job_id], row_to_stats)?)
    }

    fn update_stats(&mut self, job_id: i64, update: &StatsUpdate) -> StorageResult<()> {
        self.get_or_create_stats(job_id)?;

        let mut sets = Vec::new();
        if let Some(proxy) = &update.current_proxy {
            sets.push(("current_proxy", opt_text_value(proxy)));
        }
        if let Some(count) = update.blocked_proxies_count {
            sets.push(("blocked_proxies_count", Value::Integer(count as i64)));
        }
        if let Some(avg) = update.avg_response_time {
            sets.push(("avg_response_time", Value::Real(avg)));
        }
        if let Some(at) = &update.last_request_time {
            sets.push(("last_request_time", ts_value(at)));
        }
        if let Some(count) = update.successful_requests {
            sets.push(("successful_requests", Value::Integer(count as i64)));
        }
        if let Some(count) = update.failed_requests {
            sets.push(("failed_requests", Value::Integer(count as i64)));
        }

        self.apply_update("crawl_stats", "job_id", job_id, sets)?;
        Ok(())
    }

    // ===== Proxy Management =====

    fn list_proxies(&self) -> StorageResult<Vec<ProxyRecord>> {
        let sql = format!(
            "SELECT {} FROM proxies ORDER BY last_used_at DESC NULLS LAST, id",
            PROXY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let proxies = stmt
            .query_map([], row_to_proxy)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(proxies)
    }

    fn get_proxy(&self, proxy_id: i64) -> StorageResult<ProxyRecord> {
        let sql = format!("SELECT {} FROM proxies WHERE id = ?1", PROXY_COLUMNS);
        self.conn
            .query_row(&sql, params![proxy_id], row_to_proxy)
            .optional()?
            .ok_or(StorageError::ProxyNotFound(proxy_id))
    }

    fn update_proxy(&mut self, proxy_id: i64, update: &ProxyUpdate) -> StorageResult<()> {
        let mut sets = Vec::new();
        if let Some(blocked) = update.is_blocked {
            sets.push(("is_blocked", Value::Integer(blocked as i64)));
        }
        if let Some(at) = &update.blocked_at {
            sets.push(("blocked_at", opt_ts_value(at)));
        }
        if let Some(at) = &update.last_used_at {
            sets.push(("last_used_at", ts_value(at)));
        }

        if self.apply_update("proxies", "id", proxy_id, sets)? == 0
            && self.get_proxy(proxy_id).is_err()
        {
            return Err(StorageError::ProxyNotFound(proxy_id));
        }
        Ok(())
    }

    fn upsert_proxy(&mut self, proxy: &NewProxy) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO proxies (host, port, username, password, country_code)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(host, port) DO UPDATE SET
                 username = excluded.username,
                 password = excluded.password,
                 country_code = excluded.country_code",
            params![
                proxy.host,
                proxy.port,
                proxy.username,
                proxy.password,
                proxy.country_code,
            ],
        )?;

        let id: i64 = self.conn.query_row(
            "SELECT id FROM proxies WHERE host = ?1 AND port = ?2",
            params![proxy.host, proxy.port],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn count_blocked_proxies(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM proxies WHERE is_blocked = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn list_proxy_countries(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT country_code FROM proxies
             WHERE is_blocked = 0 AND country_code IS NOT NULL AND country_code != ''
             ORDER BY country_code",
        )?;
        let countries = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(countries)
    }
}
