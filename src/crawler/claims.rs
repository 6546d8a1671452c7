//! Claim board for multi-worker jobs
//!
//! Workers of one job pull URLs from here. A URL ID is handed to at most one
//! worker at a time, and a `timeout` URL is promoted to `retry_pending` in
//! the same critical section that claims it. Lock order is always the store
//! first, then the board.

use crate::state::RetryStatus;
use crate::storage::{lock_store, SharedStore, StorageResult, UrlUpdate};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A URL handed to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub url_id: i64,
    /// Fetch with the retry-pass timeout and pacing
    pub is_retry: bool,
}

#[derive(Debug, Default)]
struct Claims {
    claimed: HashSet<i64>,
    retry_queue: VecDeque<i64>,
}

/// In-flight URL claims of one job
#[derive(Debug, Default)]
pub struct ClaimBoard {
    inner: Mutex<Claims>,
}

impl ClaimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn claims(&self) -> MutexGuard<'_, Claims> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claims the next URL for a worker
    ///
    /// Pending URLs come first in ascending ID order, then URLs queued by the
    /// retry sweep, then one `timeout` URL which is moved to `retry_pending`.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(claim))` - The worker owns this URL until it calls `release`
    /// * `Ok(None)` - Nothing is claimable right now
    pub fn claim_next(&self, store: &SharedStore, job_id: i64) -> StorageResult<Option<Claim>> {
        let mut store = lock_store(store)?;
        let mut claims = self.claims();

        let pending = store.list_pending_urls(job_id)?;
        if let Some(url) = pending.iter().find(|u| !claims.claimed.contains(&u.id)) {
            claims.claimed.insert(url.id);
            return Ok(Some(Claim {
                url_id: url.id,
                is_retry: false,
            }));
        }

        while let Some(url_id) = claims.retry_queue.pop_front() {
            if claims.claimed.contains(&url_id) {
                continue;
            }
            if store.get_url(url_id)?.retry_status == RetryStatus::RetryPending {
                claims.claimed.insert(url_id);
                return Ok(Some(Claim {
                    url_id,
                    is_retry: true,
                }));
            }
        }

        let timeouts = store.list_timeout_urls(job_id)?;
        if let Some(url) = timeouts.iter().find(|u| !claims.claimed.contains(&u.id)) {
            store.update_url(
                url.id,
                &UrlUpdate {
                    retry_status: Some(RetryStatus::RetryPending),
                    ..Default::default()
                },
            )?;
            claims.claimed.insert(url.id);
            debug!("Promoted timed-out URL {} to retry", url.url);
            return Ok(Some(Claim {
                url_id: url.id,
                is_retry: true,
            }));
        }

        Ok(None)
    }

    /// Gives a URL back once its attempt has been recorded
    pub fn release(&self, url_id: i64) {
        self.claims().claimed.remove(&url_id);
    }

    /// Queues every unclaimed `retry_pending` URL for the next idle worker
    ///
    /// # Returns
    ///
    /// The number of URLs newly queued
    pub fn sweep(&self, store: &SharedStore, job_id: i64) -> StorageResult<usize> {
        let store = lock_store(store)?;
        let mut claims = self.claims();

        let mut queued = 0;
        for url in store.list_urls_by_status(job_id, RetryStatus::RetryPending)? {
            if claims.claimed.contains(&url.id) || claims.retry_queue.contains(&url.id) {
                continue;
            }
            claims.retry_queue.push_back(url.id);
            queued += 1;
        }

        Ok(queued)
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.claims().claimed.len()
    }

    /// True when a worker with nothing to claim may exit
    ///
    /// That is when every URL has been processed, or when no URL is left in a
    /// non-terminal state and no other worker is mid-fetch.
    pub fn is_drained(&self, store: &SharedStore, job_id: i64) -> StorageResult<bool> {
        let store = lock_store(store)?;
        let job = store.get_job(job_id)?;
        if job.urls_processed >= job.urls_total {
            return Ok(true);
        }

        let mut open = 0;
        for status in [
            RetryStatus::Pending,
            RetryStatus::Timeout,
            RetryStatus::RetryPending,
        ] {
            open += store.count_urls_by_status(job_id, status)?;
        }

        Ok(open == 0 && self.claims().claimed.is_empty())
    }
}
