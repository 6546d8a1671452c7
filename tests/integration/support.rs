//! Shared fixtures: a scripted renderer and an in-memory engine

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_relay::config::{Config, StorageConfig};
use sumi_relay::crawler::{PageRenderer, ProxyConfig, RenderError, RenderedPage};
use sumi_relay::storage::{lock_store, share, NewProxy, SharedStore, SqliteJobStore};
use sumi_relay::RelayEngine;

/// What the renderer does for one call
#[derive(Debug, Clone)]
pub enum Step {
    /// Returns this body
    Page(String),
    /// Waits out the whole timeout, then reports it
    Timeout,
    /// Fails with a navigation error
    Fail(String),
    /// Waits, then returns this body
    Slow(Duration, String),
}

/// One recorded render call
#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    pub timeout: Duration,
    pub proxy: String,
}

/// Renderer that plays back per-URL scripts
///
/// URLs without a script (or whose script ran out) get a body unique to the
/// URL and the call, so they always succeed.
#[derive(Default)]
pub struct ScriptedRenderer {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<Call>>,
    screenshots: bool,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_screenshots() -> Self {
        Self {
            screenshots: true,
            ..Self::default()
        }
    }

    pub fn script(&self, url: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, url: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.url == url).collect()
    }
}

fn page(url: &str, body: String) -> RenderedPage {
    RenderedPage {
        status_code: 200,
        body,
        final_url: url.to_string(),
    }
}

#[async_trait]
impl PageRenderer for ScriptedRenderer {
    async fn render(
        &self,
        url: &str,
        timeout: Duration,
        proxy: &ProxyConfig,
    ) -> Result<RenderedPage, RenderError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                url: url.to_string(),
                timeout,
                proxy: proxy.server.clone(),
            });
            calls.len()
        };

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|steps| steps.pop_front());

        match step {
            Some(Step::Page(body)) => Ok(page(url, body)),
            Some(Step::Timeout) => {
                tokio::time::sleep(timeout).await;
                Err(RenderError::Timeout(timeout))
            }
            Some(Step::Fail(message)) => Err(RenderError::Navigation(message)),
            Some(Step::Slow(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(page(url, body))
            }
            None => Ok(page(
                url,
                format!(
                    "<html><head><title>{url}</title></head><body><p>call {call_number}</p></body></html>"
                ),
            )),
        }
    }

    async fn screenshot(&self, _page: &RenderedPage) -> Result<Option<Vec<u8>>, RenderError> {
        if self.screenshots {
            Ok(Some(b"\x89PNG\r\n\x1a\n".to_vec()))
        } else {
            Ok(None)
        }
    }
}

pub fn test_config() -> Config {
    Config {
        engine: Default::default(),
        storage: StorageConfig {
            database_path: ":memory:".to_string(),
        },
        renderer: Default::default(),
        export: Default::default(),
        proxy_provider: None,
    }
}

pub fn test_store() -> SharedStore {
    share(SqliteJobStore::new_in_memory().unwrap())
}

/// Adds proxies `10.0.0.<n>:8080` in the given countries
pub fn seed_proxies(store: &SharedStore, countries: &[&str]) {
    for (i, country) in countries.iter().enumerate() {
        add_proxy(store, &format!("10.0.0.{}", i + 1), country);
    }
}

pub fn add_proxy(store: &SharedStore, host: &str, country: &str) -> i64 {
    lock_store(store)
        .unwrap()
        .upsert_proxy(&NewProxy {
            host: host.to_string(),
            port: 8080,
            username: "user".to_string(),
            password: "pass".to_string(),
            country_code: Some(country.to_string()),
        })
        .unwrap()
}

pub fn test_engine(renderer: Arc<ScriptedRenderer>, store: &SharedStore) -> RelayEngine {
    RelayEngine::new(test_config(), store.clone(), renderer)
}

pub fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|u| u.to_string()).collect()
}
