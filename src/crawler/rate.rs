//! Job-scoped adaptive rate control
//!
//! One `RateController` is shared by all workers of a job. It holds the
//! job's current rate, paces fetch starts across every worker, and persists
//! each rate change to the job record.

use crate::config::EngineConfig;
use crate::storage::{lock_store, JobUpdate, SharedStore, StorageResult};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Successes between two rate increases
pub const SUCCESS_STREAK: u64 = 10;

/// Multiplier applied after every success streak
pub const SPEED_UP: f64 = 1.1;

/// Multiplier for rate-limit-like failures and suspected blocks
pub const SOFT_SLOW_DOWN: f64 = 0.8;

/// Multiplier for a confirmed proxy block
pub const HARD_SLOW_DOWN: f64 = 0.5;

/// Floor of the rate used by retry-pass fetches
pub const RETRY_RATE_FLOOR: f64 = 0.5;

#[derive(Debug)]
struct RateState {
    rate: f64,
    /// Earliest instant the next fetch may start
    next_slot: Option<Instant>,
}

/// Adaptive request rate shared by the workers of one job
pub struct RateController {
    job_id: i64,
    store: SharedStore,
    min_rate: f64,
    max_rate: f64,
    state: Mutex<RateState>,
}

impl RateController {
    /// Creates a controller starting from the job's persisted rate
    pub fn new(job_id: i64, store: SharedStore, initial_rate: f64, config: &EngineConfig) -> Self {
        Self {
            job_id,
            store,
            min_rate: config.min_rate,
            max_rate: config.max_rate,
            state: Mutex::new(RateState {
                rate: initial_rate.clamp(config.min_rate, config.max_rate),
                next_slot: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RateState> {
        // Plain numbers: a panic elsewhere cannot leave them half-written
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current rate in requests per second
    pub fn current_rate(&self) -> f64 {
        self.state().rate
    }

    /// Rate used by retry-pass fetches
    pub fn retry_rate(&self) -> f64 {
        retry_rate_for(self.current_rate())
    }

    /// Delay between two fetch starts
    pub fn interval(&self, is_retry: bool) -> Duration {
        let rate = if is_retry {
            self.retry_rate()
        } else {
            self.current_rate()
        };
        Duration::from_secs_f64(1.0 / rate)
    }

    /// Waits for this worker's turn under the job's shared rate budget
    ///
    /// Slots are handed out `interval` apart across all callers; the first
    /// caller starts immediately.
    pub async fn wait_turn(&self, is_retry: bool) {
        let interval = self.interval(is_retry);
        let slot = {
            let mut state = self.state();
            let now = Instant::now();
            let slot = match state.next_slot {
                Some(next) if next > now => next,
                _ => now,
            };
            state.next_slot = Some(slot + interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    /// Records a success; speeds up on every `SUCCESS_STREAK`th one
    ///
    /// # Arguments
    ///
    /// * `successful_requests` - The job's success count including this one
    pub fn on_success(&self, successful_requests: u64) -> StorageResult<f64> {
        if successful_requests > 0 && successful_requests % SUCCESS_STREAK == 0 {
            self.adjust(SPEED_UP, "success streak")
        } else {
            Ok(self.current_rate())
        }
    }

    /// Slows down after a suspected block or a rate-limit-like failure
    pub fn on_soft_block(&self) -> StorageResult<f64> {
        self.adjust(SOFT_SLOW_DOWN, "suspected blocking")
    }

    /// Slows down hard after a confirmed proxy block
    pub fn on_confirmed_block(&self) -> StorageResult<f64> {
        self.adjust(HARD_SLOW_DOWN, "confirmed block")
    }

    fn adjust(&self, factor: f64, reason: &str) -> StorageResult<f64> {
        // The rate lock is held while persisting so writes land in order
        let mut state = self.state();
        let old = state.rate;
        let new = (old * factor).clamp(self.min_rate, self.max_rate);
        state.rate = new;

        if (new - old).abs() > f64::EPSILON {
            lock_store(&self.store)?.save_job(
                self.job_id,
                &JobUpdate {
                    current_rate: Some(new),
                    ..Default::default()
                },
            )?;
            info!(
                "Job {} rate {:.2} -> {:.2} req/s ({})",
                self.job_id, old, new, reason
            );
        } else {
            debug!(
                "Job {} rate stays at {:.2} req/s ({})",
                self.job_id, new, reason
            );
        }

        Ok(new)
    }
}

/// Retry-pass rate for a given main rate
pub fn retry_rate_for(rate: f64) -> f64 {
    (rate * 0.5).max(RETRY_RATE_FLOOR)
}
