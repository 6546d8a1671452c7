//! Proxy module
//!
//! - `ProxyPool`: atomic selection, blocking and cooldown recovery over the shared store
//! - `SelectionStrategy`: least-recently-used or round-robin choice among candidates
//! - `ProxyProvider`: upstream list API the inventory is synced from

mod pool;
mod provider;
mod strategy;

pub use pool::ProxyPool;
pub use provider::{sync_proxies, ProviderError, ProxyProvider, WebshareProvider};
pub use strategy::{strategy_for, LeastRecentlyUsed, RoundRobin, SelectionStrategy};
