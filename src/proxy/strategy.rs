//! Proxy selection strategies
//!
//! A job picks one strategy when it starts: least-recently-used by default,
//! or randomised round-robin when the job asks for proxies to be reshuffled.

use crate::storage::ProxyRecord;
use std::collections::HashSet;

/// Picks one proxy out of a non-empty candidate set
pub trait SelectionStrategy: Send + Sync {
    /// Returns the index of the chosen candidate, `None` only when `candidates` is empty
    fn select(&mut self, candidates: &[ProxyRecord]) -> Option<usize>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Returns the strategy for a job's `reshuffle_proxies` flag
pub fn strategy_for(reshuffle: bool) -> Box<dyn SelectionStrategy> {
    if reshuffle {
        Box::new(RoundRobin::new())
    } else {
        Box::new(LeastRecentlyUsed)
    }
}

/// Picks the proxy that has gone unused the longest (never-used first)
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastRecentlyUsed;

impl SelectionStrategy for LeastRecentlyUsed {
    fn select(&mut self, candidates: &[ProxyRecord]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| (p.last_used_at, p.id))
            .map(|(i, _)| i)
    }

    fn name(&self) -> &'static str {
        "least-recently-used"
    }
}

/// Picks uniformly at random among proxies this job has not used yet
///
/// Once every candidate has been used the used-set starts over.
#[derive(Debug, Default, Clone)]
pub struct RoundRobin {
    used: HashSet<i64>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobin {
    fn select(&mut self, candidates: &[ProxyRecord]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let mut fresh: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, p)| !self.used.contains(&p.id))
            .map(|(i, _)| i)
            .collect();

        if fresh.is_empty() {
            self.used.clear();
            fresh = (0..candidates.len()).collect();
        }

        let pick = fresh[rand::random_range(0..fresh.len())];
        self.used.insert(candidates[pick].id);
        Some(pick)
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}
