//! Job scheduling: single-worker passes and the multi-worker pool
//!
//! This module handles:
//! - The sequential first pass and retry pass of single-worker jobs
//! - Spawning workers and the retry sweep for multi-worker jobs
//! - Cooperative kill and cooloff checks between fetches
//! - The final status of a run

use crate::crawler::claims::ClaimBoard;
use crate::crawler::outcome::FetchOutcome;
use crate::crawler::worker::{FetchWorker, JobContext};
use crate::state::{JobStatus, RetryPolicy, RetryStatus};
use crate::storage::{lock_store, JobUpdate, StorageResult, UrlUpdate};
use crate::{RelayError, Result};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Runs a job to the end of its run and returns the status it ended in
///
/// The job must already be `running`. Job-level faults are caught here and
/// leave the job `failed` with the error text; a kill is never overwritten.
pub async fn run_job(ctx: Arc<JobContext>) -> Result<JobStatus> {
    info!(
        "Job {} started with {} worker(s)",
        ctx.job_id, ctx.worker_count
    );

    let result = if ctx.worker_count > 1 {
        run_pool(ctx.clone()).await
    } else {
        run_sequential(&ctx).await
    };

    let status = match result {
        Ok(()) => finish(&ctx)?,
        Err(e) => {
            error!("Job {} aborted: {}", ctx.job_id, e);
            fail(&ctx, &e.to_string())?
        }
    };

    info!("Job {} finished as {}", ctx.job_id, status);
    Ok(status)
}

/// Waits out a cooloff if needed and reports whether fetching may go on
async fn checkpoint(ctx: &JobContext) -> StorageResult<bool> {
    match ctx.status()? {
        JobStatus::Running => Ok(true),
        JobStatus::Cooloff => ctx.wait_out_cooloff().await,
        other => {
            info!("Job {} is {}, stopping", ctx.job_id, other);
            Ok(false)
        }
    }
}

/// Waits for a start slot, then checks again that the job may still fetch
///
/// A kill that lands during the pacing sleep stops the fetch from starting.
async fn paced_turn(ctx: &JobContext, is_retry: bool) -> StorageResult<bool> {
    if !checkpoint(ctx).await? {
        return Ok(false);
    }
    ctx.rate.wait_turn(is_retry).await;
    checkpoint(ctx).await
}

async fn run_sequential(ctx: &Arc<JobContext>) -> Result<()> {
    let mut worker = FetchWorker::new(ctx.clone(), 0);

    // First pass; URLs left pending by a block or a cooloff are picked up again
    'first: loop {
        let pending = lock_store(&ctx.store)?.list_pending_urls(ctx.job_id)?;
        if pending.is_empty() {
            break;
        }

        for url in pending {
            if !paced_turn(ctx, false).await? {
                return Ok(());
            }
            let outcome = worker.fetch(url.id, false).await?;
            if matches!(outcome, FetchOutcome::ProxyExhausted) {
                continue 'first;
            }
        }
    }

    loop {
        let scheduled = schedule_retries(ctx)?;
        let queue = lock_store(&ctx.store)?
            .list_urls_by_status(ctx.job_id, RetryStatus::RetryPending)?;
        if queue.is_empty() {
            break;
        }
        info!(
            "Job {} retry pass over {} URL(s) ({} newly timed out)",
            ctx.job_id,
            queue.len(),
            scheduled
        );

        for url in queue {
            if !paced_turn(ctx, true).await? {
                return Ok(());
            }
            let outcome = worker.fetch(url.id, true).await?;
            if matches!(outcome, FetchOutcome::ProxyExhausted) {
                break;
            }
        }
    }

    Ok(())
}

/// Moves every `timeout` URL of the job to `retry_pending`
fn schedule_retries(ctx: &JobContext) -> Result<usize> {
    let mut store = lock_store(&ctx.store)?;
    let timeouts = store.list_timeout_urls(ctx.job_id)?;
    for url in &timeouts {
        store.update_url(
            url.id,
            &UrlUpdate {
                retry_status: Some(RetryPolicy::schedule_retry(url.retry_status)?),
                ..Default::default()
            },
        )?;
    }
    Ok(timeouts.len())
}

async fn run_pool(ctx: Arc<JobContext>) -> Result<()> {
    let board = Arc::new(ClaimBoard::new());

    let mut workers = JoinSet::new();
    for worker_id in 0..ctx.worker_count as usize {
        workers.spawn(worker_loop(ctx.clone(), board.clone(), worker_id));
    }
    let sweeper = tokio::spawn(sweep_loop(ctx.clone(), board.clone()));

    let mut first_error: Option<RelayError> = None;
    while let Some(joined) = workers.join_next().await {
        let result = joined.map_err(RelayError::from).and_then(|r| r);
        if let Err(e) = result {
            warn!("Worker of job {} failed: {}", ctx.job_id, e);
            first_error.get_or_insert(e);
        }
    }
    sweeper.abort();

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn worker_loop(ctx: Arc<JobContext>, board: Arc<ClaimBoard>, worker_id: usize) -> Result<()> {
    let mut worker = FetchWorker::new(ctx.clone(), worker_id);
    debug!("Worker {} of job {} started", worker_id, ctx.job_id);

    loop {
        if !checkpoint(&ctx).await? {
            break;
        }

        let Some(claim) = board.claim_next(&ctx.store, ctx.job_id)? else {
            if board.is_drained(&ctx.store, ctx.job_id)? {
                break;
            }
            tokio::time::sleep(ctx.idle_poll).await;
            continue;
        };

        let proceed = paced_turn(&ctx, claim.is_retry).await;
        if !matches!(proceed, Ok(true)) {
            board.release(claim.url_id);
            proceed?;
            break;
        }
        let result = worker.fetch(claim.url_id, claim.is_retry).await;
        board.release(claim.url_id);

        match result {
            Ok(_) => {}
            // Finished by another path between claim and fetch
            Err(RelayError::State(e)) => debug!("Skipping URL {}: {}", claim.url_id, e),
            Err(e) => return Err(e),
        }
    }

    debug!("Worker {} of job {} exiting", worker.worker_id(), ctx.job_id);
    Ok(())
}

async fn sweep_loop(ctx: Arc<JobContext>, board: Arc<ClaimBoard>) {
    let mut ticker = tokio::time::interval(ctx.retry_sweep);
    loop {
        ticker.tick().await;
        match board.sweep(&ctx.store, ctx.job_id) {
            Ok(0) => {}
            Ok(n) => debug!("Retry sweep queued {} URL(s) for job {}", n, ctx.job_id),
            Err(e) => warn!("Retry sweep for job {} failed: {}", ctx.job_id, e),
        }
    }
}

/// Settles the final status once every worker has stopped
fn finish(ctx: &JobContext) -> StorageResult<JobStatus> {
    let mut store = lock_store(&ctx.store)?;
    let job = store.get_job(ctx.job_id)?;

    let (to, message) = if job.urls_processed >= job.urls_total {
        (JobStatus::Completed, None)
    } else {
        (
            JobStatus::Failed,
            Some(format!(
                "{} of {} URLs could not be fetched",
                job.urls_total - job.urls_processed,
                job.urls_total
            )),
        )
    };

    if store.transition_job(ctx.job_id, &[JobStatus::Running, JobStatus::Cooloff], to)? {
        store.save_job(
            ctx.job_id,
            &JobUpdate {
                cooloff_until: Some(None),
                error_message: Some(message),
                ..Default::default()
            },
        )?;
        return Ok(to);
    }

    Ok(store.get_job(ctx.job_id)?.status)
}

fn fail(ctx: &JobContext, message: &str) -> Result<JobStatus> {
    let mut store = lock_store(&ctx.store)?;
    if store.transition_job(
        ctx.job_id,
        &[JobStatus::Running, JobStatus::Cooloff],
        JobStatus::Failed,
    )? {
        store.save_job(
            ctx.job_id,
            &JobUpdate {
                cooloff_until: Some(None),
                error_message: Some(Some(message.to_string())),
                ..Default::default()
            },
        )?;
        return Ok(JobStatus::Failed);
    }

    Ok(store.get_job(ctx.job_id)?.status)
}
