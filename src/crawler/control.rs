//! Job control: submit, start, resume, kill and reset
//!
//! `RelayEngine` is the entry point the CLI (and any embedding service)
//! drives. Runs execute on spawned tokio tasks; kill is cooperative and only
//! flips the job status, which the running workers observe between fetches.

use crate::config::Config;
use crate::crawler::renderer::{HttpRenderer, PageRenderer};
use crate::crawler::scheduler::run_job;
use crate::crawler::worker::JobContext;
use crate::output::{self, ExportMode, ExportProgress, JobStatusReport};
use crate::proxy::ProxyPool;
use crate::state::JobStatus;
use crate::storage::{lock_store, open_store, JobUpdate, NewJob, SharedStore};
use crate::{RelayError, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

/// Upper bound on workers per job
pub const MAX_WORKERS: u32 = 20;

/// A batch of URLs to crawl and its job options
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub urls: Vec<String>,
    pub worker_count: u32,
    /// Allowed proxy countries; empty for any
    pub proxy_countries: Vec<String>,
    /// Round-robin proxy selection instead of least-recently-used
    pub reshuffle_proxies: bool,
    /// Capture screenshots
    pub debug_mode: bool,
}

impl JobSubmission {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            worker_count: 1,
            proxy_countries: Vec::new(),
            reshuffle_proxies: false,
            debug_mode: false,
        }
    }
}

/// A running job
pub struct JobHandle {
    job_id: i64,
    task: JoinHandle<Result<JobStatus>>,
}

impl JobHandle {
    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    /// Waits for the run to end and returns the job's final status
    pub async fn wait(self) -> Result<JobStatus> {
        self.task.await?
    }
}

/// The crawl engine
pub struct RelayEngine {
    config: Arc<Config>,
    store: SharedStore,
    renderer: Arc<dyn PageRenderer>,
}

impl RelayEngine {
    pub fn new(config: Config, store: SharedStore, renderer: Arc<dyn PageRenderer>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            renderer,
        }
    }

    /// Opens the configured database and uses the bundled HTTP renderer
    pub fn from_config(config: Config) -> Result<Self> {
        let store = open_store(Path::new(&config.storage.database_path))?;
        let renderer = Arc::new(HttpRenderer::new(config.renderer.user_agent.clone()));
        Ok(Self::new(config, store, renderer))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// The shared proxy pool
    pub fn proxy_pool(&self) -> ProxyPool {
        ProxyPool::new(
            self.store.clone(),
            Duration::from_secs(self.config.engine.proxy_cooldown_secs),
        )
    }

    /// Validates a submission and creates the job in `pending`
    ///
    /// # Returns
    ///
    /// * `Ok(i64)` - The new job's ID
    /// * `Err(RelayError::InvalidSubmission)` - No URLs, or a URL is not absolute http(s)
    pub fn submit_job(&self, submission: JobSubmission) -> Result<i64> {
        let urls = normalize_urls(&submission.urls)?;
        let job = NewJob {
            debug_mode: submission.debug_mode,
            worker_count: submission.worker_count.clamp(1, MAX_WORKERS),
            proxy_countries: normalize_countries(&submission.proxy_countries),
            reshuffle_proxies: submission.reshuffle_proxies,
            initial_rate: self.config.engine.initial_rate,
        };

        let job_id = lock_store(&self.store)?.create_job(&job, &urls)?;
        info!(
            "Submitted job {} with {} URL(s), {} worker(s)",
            job_id,
            urls.len(),
            job.worker_count
        );
        Ok(job_id)
    }

    /// Starts a `pending` job
    pub fn start(&self, job_id: i64) -> Result<JobHandle> {
        self.launch(job_id, &[JobStatus::Pending], "start")
    }

    /// Continues a `killed` or `failed` job from its stored URL states
    pub fn resume(&self, job_id: i64) -> Result<JobHandle> {
        self.launch(job_id, &[JobStatus::Killed, JobStatus::Failed], "resume")
    }

    fn launch(&self, job_id: i64, from: &[JobStatus], action: &'static str) -> Result<JobHandle> {
        let job = {
            let mut store = lock_store(&self.store)?;
            let job = store.get_job(job_id)?;
            if !store.transition_job(job_id, from, JobStatus::Running)? {
                return Err(RelayError::InvalidJobTransition {
                    job_id,
                    status: job.status,
                    action,
                });
            }
            store.save_job(
                job_id,
                &JobUpdate {
                    cooloff_until: Some(None),
                    error_message: Some(None),
                    ..Default::default()
                },
            )?;
            job
        };

        let ctx = Arc::new(JobContext::new(
            &job,
            self.store.clone(),
            self.renderer.clone(),
            &self.config,
        ));
        let task = tokio::spawn(run_job(ctx));
        Ok(JobHandle { job_id, task })
    }

    /// Kills a `running` or `cooloff` job
    ///
    /// In-flight fetches finish and are recorded; no new fetch starts.
    pub fn kill(&self, job_id: i64) -> Result<()> {
        let mut store = lock_store(&self.store)?;
        if store.transition_job(
            job_id,
            &[JobStatus::Running, JobStatus::Cooloff],
            JobStatus::Killed,
        )? {
            warn!("Job {} killed", job_id);
            return Ok(());
        }

        let status = store.get_job(job_id)?.status;
        Err(RelayError::InvalidJobTransition {
            job_id,
            status,
            action: "kill",
        })
    }

    /// Clears every URL's fetch state and the job's counters
    pub fn reset(&self, job_id: i64) -> Result<()> {
        let mut store = lock_store(&self.store)?;
        let status = store.get_job(job_id)?.status;
        if !status.can_reset() {
            return Err(RelayError::InvalidJobTransition {
                job_id,
                status,
                action: "reset",
            });
        }

        store.reset_job(job_id, self.config.engine.initial_rate)?;
        info!("Job {} reset", job_id);
        Ok(())
    }

    /// Live monitoring report for a job
    pub fn status(&self, job_id: i64) -> Result<JobStatusReport> {
        Ok(output::job_status(&self.store, job_id)?)
    }

    /// Writes a job's crawled content as a JSON array
    pub fn export<W: Write>(&self, job_id: i64, mode: ExportMode, writer: W) -> Result<u64> {
        output::export_job(
            &self.store,
            job_id,
            mode,
            self.config.export.stream_threshold,
            writer,
        )
    }

    pub fn export_progress(&self, job_id: i64, mode: ExportMode) -> Result<ExportProgress> {
        Ok(output::export_progress(&self.store, job_id, mode)?)
    }

    pub fn export_url(&self, url_id: i64) -> Result<serde_json::Value> {
        output::export_url(&self.store, url_id)
    }
}

fn normalize_urls(raw: &[String]) -> Result<Vec<String>> {
    let mut urls = Vec::with_capacity(raw.len());
    for candidate in raw {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }

        let parsed = Url::parse(candidate)
            .map_err(|e| RelayError::InvalidSubmission(format!("{}: {}", candidate, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RelayError::InvalidSubmission(format!(
                "{}: only http and https URLs can be crawled",
                candidate
            )));
        }
        urls.push(candidate.to_string());
    }

    if urls.is_empty() {
        return Err(RelayError::InvalidSubmission(
            "no URLs to crawl".to_string(),
        ));
    }
    Ok(urls)
}

fn normalize_countries(raw: &[String]) -> Vec<String> {
    let mut countries: Vec<String> = Vec::new();
    for code in raw {
        let code = code.trim().to_uppercase();
        if !code.is_empty() && !countries.contains(&code) {
            countries.push(code);
        }
    }
    countries
}
