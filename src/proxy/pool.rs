//! Shared proxy inventory
//!
//! Selection and blocking are check-then-update sequences; each one runs
//! inside a single store lock so concurrent workers never pick the same
//! least-recently-used proxy or double-count a block.

use crate::proxy::strategy::SelectionStrategy;
use crate::storage::{
    lock_store, JobStore, JobUpdate, ProxyRecord, ProxyUpdate, SharedStore, StatsUpdate,
    StorageResult,
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Proxy pool backed by the shared store
#[derive(Clone)]
pub struct ProxyPool {
    store: SharedStore,
    cooldown: chrono::Duration,
}

impl ProxyPool {
    /// Creates a pool whose blocked proxies come back after `cooldown`
    pub fn new(store: SharedStore, cooldown: Duration) -> Self {
        Self {
            store,
            cooldown: chrono::Duration::from_std(cooldown)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        }
    }

    /// Picks a proxy and stamps its `last_used_at`
    ///
    /// # Arguments
    ///
    /// * `filter` - Allowed country codes, or `None` for any country
    /// * `strategy` - The job's selection strategy
    ///
    /// # Returns
    ///
    /// * `Ok(Some(proxy))` - The selected proxy
    /// * `Ok(None)` - No proxy is eligible, even after expired blocks were lifted
    pub fn acquire(
        &self,
        filter: Option<&[String]>,
        strategy: &mut dyn SelectionStrategy,
    ) -> StorageResult<Option<ProxyRecord>> {
        self.acquire_at(filter, strategy, Utc::now())
    }

    /// [`ProxyPool::acquire`] with an explicit clock
    pub fn acquire_at(
        &self,
        filter: Option<&[String]>,
        strategy: &mut dyn SelectionStrategy,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<ProxyRecord>> {
        let mut store = lock_store(&self.store)?;

        let mut candidates = eligible(&*store, filter)?;
        if candidates.is_empty() {
            let lifted = self.unblock_expired(&mut *store, filter, now)?;
            if lifted > 0 {
                info!("Returned {} cooled-down proxies to rotation", lifted);
                candidates = eligible(&*store, filter)?;
            }
        }

        let Some(index) = strategy.select(&candidates) else {
            warn!(
                "No proxy available (countries: {})",
                filter.map(|f| f.join(",")).unwrap_or_else(|| "any".to_string())
            );
            return Ok(None);
        };

        let mut proxy = candidates.swap_remove(index);
        store.update_proxy(
            proxy.id,
            &ProxyUpdate {
                last_used_at: Some(now),
                ..Default::default()
            },
        )?;
        proxy.last_used_at = Some(now);

        debug!("Selected proxy {} ({})", proxy.address(), strategy.name());
        Ok(Some(proxy))
    }

    /// Marks a proxy blocked and charges the block to a job
    ///
    /// Only the call that actually flips the proxy to blocked increments the
    /// job's `rate_limit_hits` and its stats' `blocked_proxies_count`.
    ///
    /// # Returns
    ///
    /// `true` if the proxy was newly blocked, `false` if it already was
    pub fn mark_blocked(&self, proxy_id: i64, job_id: i64) -> StorageResult<bool> {
        self.mark_blocked_at(proxy_id, job_id, Utc::now())
    }

    /// [`ProxyPool::mark_blocked`] with an explicit clock
    pub fn mark_blocked_at(
        &self,
        proxy_id: i64,
        job_id: i64,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut store = lock_store(&self.store)?;

        let proxy = store.get_proxy(proxy_id)?;
        if proxy.is_blocked {
            debug!("Proxy {} already blocked", proxy.address());
            return Ok(false);
        }

        store.update_proxy(
            proxy_id,
            &ProxyUpdate {
                is_blocked: Some(true),
                blocked_at: Some(Some(now)),
                ..Default::default()
            },
        )?;

        let job = store.get_job(job_id)?;
        store.save_job(
            job_id,
            &JobUpdate {
                rate_limit_hits: Some(job.rate_limit_hits + 1),
                ..Default::default()
            },
        )?;

        let stats = store.get_or_create_stats(job_id)?;
        store.update_stats(
            job_id,
            &StatsUpdate {
                blocked_proxies_count: Some(stats.blocked_proxies_count + 1),
                ..Default::default()
            },
        )?;

        warn!("Proxy {} blocked for job {}", proxy.address(), job_id);
        Ok(true)
    }

    /// Lifts blocks older than the cooldown, limited to `filter`'s countries
    fn unblock_expired(
        &self,
        store: &mut dyn JobStore,
        filter: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let cutoff = now - self.cooldown;
        let mut lifted = 0;

        for proxy in store.list_proxies()? {
            let expired = proxy.is_blocked
                && proxy.blocked_at.map(|at| at <= cutoff).unwrap_or(true)
                && matches_filter(&proxy, filter);
            if !expired {
                continue;
            }

            store.update_proxy(
                proxy.id,
                &ProxyUpdate {
                    is_blocked: Some(false),
                    blocked_at: Some(None),
                    ..Default::default()
                },
            )?;
            lifted += 1;
        }

        Ok(lifted)
    }

    /// Country codes with at least one unblocked proxy
    pub fn available_countries(&self) -> StorageResult<Vec<String>> {
        lock_store(&self.store)?.list_proxy_countries()
    }

    /// Every proxy, most recently used first
    pub fn list(&self) -> StorageResult<Vec<ProxyRecord>> {
        lock_store(&self.store)?.list_proxies()
    }
}

fn matches_filter(proxy: &ProxyRecord, filter: Option<&[String]>) -> bool {
    match filter {
        None => true,
        Some(countries) if countries.is_empty() => true,
        Some(countries) => proxy
            .country_code
            .as_deref()
            .map(|code| countries.iter().any(|c| c.eq_ignore_ascii_case(code)))
            .unwrap_or(false),
    }
}

fn eligible(store: &dyn JobStore, filter: Option<&[String]>) -> StorageResult<Vec<ProxyRecord>> {
    Ok(store
        .list_proxies()?
        .into_iter()
        .filter(|p| !p.is_blocked && matches_filter(p, filter))
        .collect())
}
