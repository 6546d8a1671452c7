//! Content export
//!
//! Jobs export as one JSON array. Small jobs are built in memory and written
//! in one go; jobs with more URLs than the stream threshold are written
//! page by page so the whole job never sits in memory.

use crate::output::status::percent;
use crate::storage::{format_timestamp, lock_store, SharedStore, StorageResult, UrlRecord};
use crate::{RelayError, Result};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use tracing::{debug, warn};

/// URLs loaded per page while streaming
const EXPORT_PAGE_SIZE: u64 = 100;

/// What an export contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Extracted content of URLs that have it
    Structured,
    /// Raw record of every URL
    Raw,
}

impl FromStr for ExportMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "structured" => Ok(Self::Structured),
            "raw" => Ok(Self::Raw),
            other => Err(format!("unknown export mode '{}'", other)),
        }
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured => write!(f, "structured"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// Raw export entry for one URL
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub url: String,
    pub status_code: Option<u16>,
    pub crawled_at: Option<String>,
    pub content: Option<String>,
    pub content_hash: Option<String>,
}

impl From<&UrlRecord> for RawRecord {
    fn from(url: &UrlRecord) -> Self {
        Self {
            url: url.url.clone(),
            status_code: url.status_code,
            crawled_at: url.crawled_at.as_ref().map(format_timestamp),
            content: url.content.clone(),
            content_hash: url.content_hash.clone(),
        }
    }
}

/// How far a job's content is exportable
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    pub total: u64,
    pub processed: u64,
    /// Rounded to one decimal
    pub progress_percent: f64,
}

/// Export entry for one URL, `None` when the mode has nothing for it
fn entry(url: &UrlRecord, mode: ExportMode) -> Result<Option<Value>> {
    match mode {
        ExportMode::Raw => Ok(Some(serde_json::to_value(RawRecord::from(url))?)),
        ExportMode::Structured => match url.structured_content.as_deref() {
            Some(json) => match serde_json::from_str(json) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!("Skipping unreadable structured content of URL {}: {}", url.id, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        },
    }
}

/// Writes a job's content as a JSON array
///
/// # Arguments
///
/// * `store` - The shared store
/// * `job_id` - The job to export
/// * `mode` - Structured or raw content
/// * `stream_threshold` - Jobs with more URLs than this are streamed
/// * `writer` - Destination of the JSON array
///
/// # Returns
///
/// The number of entries written
pub fn export_job<W: Write>(
    store: &SharedStore,
    job_id: i64,
    mode: ExportMode,
    stream_threshold: u64,
    mut writer: W,
) -> Result<u64> {
    let total = {
        let store = lock_store(store)?;
        store.get_job(job_id)?;
        store.count_urls(job_id)?
    };

    if total <= stream_threshold {
        let urls = lock_store(store)?.list_urls(job_id, 0, total.max(1))?;
        let mut entries = Vec::with_capacity(urls.len());
        for url in &urls {
            if let Some(value) = entry(url, mode)? {
                entries.push(value);
            }
        }
        serde_json::to_writer(&mut writer, &entries)?;
        writer.flush()?;
        debug!("Exported {} {} entries of job {}", entries.len(), mode, job_id);
        return Ok(entries.len() as u64);
    }

    writer.write_all(b"[")?;
    let mut written = 0u64;
    let mut offset = 0u64;
    loop {
        let page = lock_store(store)?.list_urls(job_id, offset, EXPORT_PAGE_SIZE)?;
        if page.is_empty() {
            break;
        }
        offset += page.len() as u64;

        for url in &page {
            let Some(value) = entry(url, mode)? else {
                continue;
            };
            if written > 0 {
                writer.write_all(b",")?;
                if written % 10 == 0 {
                    writer.write_all(b"\n")?;
                }
            }
            serde_json::to_writer(&mut writer, &value)?;
            written += 1;
        }
    }
    writer.write_all(b"]")?;
    writer.flush()?;

    debug!("Streamed {} {} entries of job {}", written, mode, job_id);
    Ok(written)
}

/// Exports one URL: its structured content if any, else its raw record
pub fn export_url(store: &SharedStore, url_id: i64) -> Result<Value> {
    let url = lock_store(store)?.get_url(url_id)?;
    if let Some(value) = entry(&url, ExportMode::Structured)? {
        return Ok(value);
    }
    serde_json::to_value(RawRecord::from(&url)).map_err(RelayError::from)
}

/// Export progress of a job for the given mode
///
/// Structured mode counts URLs with extracted content, raw mode URLs with
/// any content.
pub fn export_progress(
    store: &SharedStore,
    job_id: i64,
    mode: ExportMode,
) -> StorageResult<ExportProgress> {
    let store = lock_store(store)?;
    store.get_job(job_id)?;
    let total = store.count_urls(job_id)?;
    let processed = store.count_urls_with_content(job_id, mode == ExportMode::Structured)?;

    Ok(ExportProgress {
        total,
        processed,
        progress_percent: (percent(processed, total) * 10.0).round() / 10.0,
    })
}
