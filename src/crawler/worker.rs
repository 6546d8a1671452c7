//! Fetch worker: one attempt at one URL
//!
//! Each attempt acquires a fresh proxy, renders the page, extracts content,
//! classifies the result against the URL's stored fingerprint, applies the
//! retry state machine and writes everything back to the store.

use crate::config::Config;
use crate::crawler::block_detector::{fingerprint, is_suspected_block};
use crate::crawler::outcome::FetchOutcome;
use crate::crawler::rate::RateController;
use crate::crawler::renderer::{PageRenderer, ProxyConfig, RenderError, RenderedPage};
use crate::proxy::{strategy_for, ProxyPool, SelectionStrategy};
use crate::state::{Attempt, JobStatus, RetryPolicy, StateError};
use crate::storage::{
    lock_store, JobRecord, JobUpdate, ProxyRecord, SharedStore, StatsUpdate,
    StorageResult, UrlRecord, UrlUpdate,
};
use crate::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Everything the workers of one job share
pub struct JobContext {
    pub job_id: i64,
    pub store: SharedStore,
    pub pool: ProxyPool,
    pub rate: RateController,
    pub renderer: Arc<dyn PageRenderer>,
    pub policy: RetryPolicy,
    pub page_timeout: Duration,
    pub retry_timeout: Duration,
    pub cooloff: Duration,
    pub idle_poll: Duration,
    pub retry_sweep: Duration,
    pub screenshot_dir: PathBuf,
    pub debug_mode: bool,
    pub reshuffle_proxies: bool,
    pub country_filter: Option<Vec<String>>,
    pub worker_count: u32,
    cooloff_deadline: Mutex<Option<Instant>>,
}

impl JobContext {
    /// Builds the context for a job about to run
    pub fn new(
        job: &JobRecord,
        store: SharedStore,
        renderer: Arc<dyn PageRenderer>,
        config: &Config,
    ) -> Self {
        let engine = &config.engine;
        Self {
            job_id: job.id,
            pool: ProxyPool::new(
                store.clone(),
                Duration::from_secs(engine.proxy_cooldown_secs),
            ),
            rate: RateController::new(job.id, store.clone(), job.current_rate, engine),
            store,
            renderer,
            policy: RetryPolicy::new(engine.max_attempts),
            page_timeout: Duration::from_secs(engine.page_timeout_secs),
            retry_timeout: Duration::from_secs(engine.retry_timeout_secs),
            cooloff: Duration::from_secs(engine.cooloff_secs),
            idle_poll: Duration::from_millis(engine.idle_poll_millis),
            retry_sweep: Duration::from_secs(engine.retry_sweep_secs),
            screenshot_dir: PathBuf::from(&config.renderer.screenshot_dir),
            debug_mode: job.debug_mode,
            reshuffle_proxies: job.reshuffle_proxies,
            country_filter: job.country_filter().map(|f| f.to_vec()),
            worker_count: job.worker_count.max(1),
            cooloff_deadline: Mutex::new(None),
        }
    }

    /// Current status of the job in the store
    pub fn status(&self) -> StorageResult<JobStatus> {
        Ok(lock_store(&self.store)?.get_job(self.job_id)?.status)
    }

    /// Render timeout for a first-pass or retry-pass attempt
    pub fn timeout_for(&self, is_retry: bool) -> Duration {
        if is_retry {
            self.retry_timeout
        } else {
            self.page_timeout
        }
    }

    /// Puts a running job into cooloff
    ///
    /// A job that is already cooling off keeps its deadline; a killed job is
    /// left alone.
    pub fn enter_cooloff(&self) -> StorageResult<()> {
        let mut store = lock_store(&self.store)?;
        if !store.transition_job(self.job_id, &[JobStatus::Running], JobStatus::Cooloff)? {
            return Ok(());
        }

        let until = Utc::now()
            + chrono::Duration::from_std(self.cooloff)
                .unwrap_or_else(|_| chrono::Duration::minutes(5));
        store.save_job(
            self.job_id,
            &JobUpdate {
                cooloff_until: Some(Some(until)),
                ..Default::default()
            },
        )?;
        // Set under the store lock so no waiter sees cooloff without a deadline
        *self.deadline() = Some(Instant::now() + self.cooloff);
        drop(store);

        warn!(
            "Job {} entering cooloff until {} (no proxy available)",
            self.job_id,
            until.to_rfc3339()
        );
        Ok(())
    }

    /// Waits out a cooloff, polling for a kill every second
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The job is running again
    /// * `Ok(false)` - The job was killed (or otherwise left cooloff for a final state)
    pub async fn wait_out_cooloff(&self) -> StorageResult<bool> {
        loop {
            match self.status()? {
                JobStatus::Cooloff => {}
                JobStatus::Running => return Ok(true),
                other => {
                    debug!("Job {} left cooloff as {}", self.job_id, other);
                    return Ok(false);
                }
            }

            let now = Instant::now();
            let deadline = *self.deadline().get_or_insert(now + self.cooloff);
            if now >= deadline {
                self.end_cooloff()?;
                continue;
            }

            tokio::time::sleep((deadline - now).min(Duration::from_secs(1))).await;
        }
    }

    fn end_cooloff(&self) -> StorageResult<()> {
        let mut store = lock_store(&self.store)?;
        if store.transition_job(self.job_id, &[JobStatus::Cooloff], JobStatus::Running)? {
            store.save_job(
                self.job_id,
                &JobUpdate {
                    cooloff_until: Some(None),
                    ..Default::default()
                },
            )?;
            *self.deadline() = None;
            info!("Job {} cooloff over, resuming", self.job_id);
        }
        Ok(())
    }

    fn deadline(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.cooloff_deadline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// Executes fetch attempts for one worker of a job
pub struct FetchWorker {
    ctx: Arc<JobContext>,
    worker_id: usize,
    strategy: Box<dyn SelectionStrategy>,
}

impl FetchWorker {
    pub fn new(ctx: Arc<JobContext>, worker_id: usize) -> Self {
        let strategy = strategy_for(ctx.reshuffle_proxies);
        Self {
            ctx,
            worker_id,
            strategy,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Makes one attempt at a URL and persists the result
    ///
    /// # Arguments
    ///
    /// * `url_id` - The URL to fetch; must be `pending` or `retry_pending`
    /// * `is_retry` - Retry-pass attempt (extended timeout)
    ///
    /// # Returns
    ///
    /// * `Ok(FetchOutcome)` - The classified attempt; per-URL failures land here
    /// * `Err(RelayError)` - The URL was not fetchable, or the store failed
    pub async fn fetch(&mut self, url_id: i64, is_retry: bool) -> Result<FetchOutcome> {
        let url = lock_store(&self.ctx.store)?.get_url(url_id)?;
        if !url.retry_status.is_fetchable() {
            let err = if url.retry_status.is_terminal() {
                StateError::Terminal(url.retry_status)
            } else {
                StateError::NotScheduled(url.retry_status)
            };
            return Err(err.into());
        }

        let filter = self.ctx.country_filter.as_deref();
        let Some(proxy) = self.ctx.pool.acquire(filter, self.strategy.as_mut())? else {
            self.ctx.enter_cooloff()?;
            return Ok(FetchOutcome::ProxyExhausted);
        };

        let timeout = self.ctx.timeout_for(is_retry);
        debug!(
            "Worker {} fetching {} via {} (timeout {:?})",
            self.worker_id,
            url.url,
            proxy.address(),
            timeout
        );

        let started = Instant::now();
        let rendered = self
            .ctx
            .renderer
            .render(&url.url, timeout, &ProxyConfig::from(&proxy))
            .await;

        let outcome = match rendered {
            Ok(page) => self.handle_page(&url, &proxy, page, started).await?,
            Err(e) => self.handle_error(&url, &proxy, e)?,
        };

        debug!("Worker {} {}: {}", self.worker_id, url.url, outcome);
        Ok(outcome)
    }

    async fn handle_page(
        &mut self,
        url: &UrlRecord,
        proxy: &ProxyRecord,
        page: RenderedPage,
        started: Instant,
    ) -> Result<FetchOutcome> {
        let screenshot_path = if self.ctx.debug_mode {
            self.save_screenshot(url.id, &page).await
        } else {
            None
        };

        let structured = self.ctx.renderer.extract_structured(&page);
        let response_time = started.elapsed().as_secs_f64();
        let hash = fingerprint(&page.body);
        let suspected = is_suspected_block(url.content_hash.as_deref(), &hash);
        let attempt = if suspected {
            Attempt::SameFingerprint
        } else {
            Attempt::Fresh
        };
        let transition = self
            .ctx
            .policy
            .apply(url.retry_status, url.retry_count, attempt)?;
        let address = proxy.address();
        let job_id = self.ctx.job_id;

        if !suspected {
            let structured_json = serde_json::to_string(&structured)?;
            let successful = {
                let mut store = lock_store(&self.ctx.store)?;
                let now = Utc::now();
                store.update_url(
                    url.id,
                    &UrlUpdate {
                        retry_status: Some(transition.status),
                        retry_count: Some(transition.retry_count),
                        content: Some(page.body),
                        content_hash: Some(hash),
                        status_code: Some(page.status_code),
                        crawled_at: Some(now),
                        proxy_used: Some(address.clone()),
                        screenshot_path,
                        structured_content: Some(structured_json),
                    },
                )?;
                store.increment_urls_processed(job_id)?;

                let stats = store.get_or_create_stats(job_id)?;
                let successful = stats.successful_requests + 1;
                store.update_stats(
                    job_id,
                    &StatsUpdate {
                        successful_requests: Some(successful),
                        avg_response_time: Some(stats.next_avg_response_time(response_time)),
                        current_proxy: Some(Some(address.clone())),
                        last_request_time: Some(now),
                        ..Default::default()
                    },
                )?;
                successful
            };

            self.ctx.rate.on_success(successful)?;
            info!("Crawled {} ({})", url.url, page.status_code);

            return Ok(FetchOutcome::Success {
                status_code: page.status_code,
                response_time,
                proxy: address,
            });
        }

        self.record_miss(
            url.id,
            UrlUpdate {
                retry_status: Some(transition.status),
                retry_count: Some(transition.retry_count),
                content_hash: Some(hash),
                status_code: Some(page.status_code),
                proxy_used: Some(address.clone()),
                screenshot_path,
                ..Default::default()
            },
        )?;
        warn!(
            "Same content as previous attempt for {} (miss {}), possible block via {}",
            url.url, transition.retry_count, address
        );

        if transition.confirmed_block {
            self.confirm_block(proxy)?;
        }

        Ok(FetchOutcome::SuspectedBlock {
            retry_count: transition.retry_count,
            confirmed: transition.confirmed_block,
            proxy: address,
        })
    }

    fn handle_error(
        &mut self,
        url: &UrlRecord,
        proxy: &ProxyRecord,
        error: RenderError,
    ) -> Result<FetchOutcome> {
        let timed_out = error.is_timeout();
        let attempt = if timed_out {
            Attempt::Timeout
        } else {
            Attempt::Failure
        };
        let transition = self
            .ctx
            .policy
            .apply(url.retry_status, url.retry_count, attempt)?;
        let address = proxy.address();

        self.record_miss(
            url.id,
            UrlUpdate {
                retry_status: Some(transition.status),
                retry_count: Some(transition.retry_count),
                proxy_used: Some(address.clone()),
                ..Default::default()
            },
        )?;

        if timed_out {
            warn!("Timeout for {} via {}: {}", url.url, address, error);
        } else {
            warn!("Error crawling {} via {}: {}", url.url, address, error);
        }

        if transition.confirmed_block {
            self.confirm_block(proxy)?;
        } else if error.is_rate_limit_like() {
            self.ctx.rate.on_soft_block()?;
        }

        let retry_count = transition.retry_count;
        let confirmed = transition.confirmed_block;
        Ok(if timed_out {
            FetchOutcome::Timeout {
                retry_count,
                confirmed,
                proxy: address,
            }
        } else {
            FetchOutcome::Failure {
                message: error.to_string(),
                retry_count,
                confirmed,
                proxy: address,
            }
        })
    }

    /// Persists a non-success attempt and counts it as a failed request
    fn record_miss(&self, url_id: i64, update: UrlUpdate) -> StorageResult<()> {
        let job_id = self.ctx.job_id;
        let mut store = lock_store(&self.ctx.store)?;
        store.update_url(url_id, &update)?;

        let stats = store.get_or_create_stats(job_id)?;
        store.update_stats(
            job_id,
            &StatsUpdate {
                failed_requests: Some(stats.failed_requests + 1),
                last_request_time: Some(Utc::now()),
                ..Default::default()
            },
        )
    }

    /// Takes a proxy out of rotation after a third consecutive miss
    fn confirm_block(&self, proxy: &ProxyRecord) -> StorageResult<()> {
        let job_id = self.ctx.job_id;
        if self.ctx.pool.mark_blocked(proxy.id, job_id)? {
            self.ctx.rate.on_confirmed_block()?;
        }

        lock_store(&self.ctx.store)?.update_stats(
            job_id,
            &StatsUpdate {
                current_proxy: Some(None),
                ..Default::default()
            },
        )
    }

    /// Writes a debug screenshot; failures are logged and never fail the fetch
    async fn save_screenshot(&self, url_id: i64, page: &RenderedPage) -> Option<String> {
        let bytes = match self.ctx.renderer.screenshot(page).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Screenshot failed for URL {}: {}", url_id, e);
                return None;
            }
        };

        let file_name = format!("screenshot_{}_{}.png", url_id, Utc::now().timestamp());
        let path = self.ctx.screenshot_dir.join(file_name);

        let written = async {
            tokio::fs::create_dir_all(&self.ctx.screenshot_dir).await?;
            tokio::fs::write(&path, &bytes).await
        }
        .await;

        match written {
            Ok(()) => {
                debug!("Saved screenshot {}", path.display());
                Some(path.to_string_lossy().into_owned())
            }
            Err(e) => {
                warn!("Could not save screenshot {}: {}", path.display(), e);
                None
            }
        }
    }
}
