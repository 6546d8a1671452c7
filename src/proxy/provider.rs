//! Upstream proxy list synchronisation
//!
//! Proxies are pulled from a Webshare-style list API and upserted into the
//! store keyed by (host, port). The engine itself only ever reads the pool.

use crate::config::ProxyProviderConfig;
use crate::storage::{lock_store, NewProxy, SharedStore, StorageError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors raised while talking to the proxy provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {0}")]
    Status(u16),

    #[error("Invalid proxy record: {0}")]
    InvalidRecord(String),
}

/// Source of proxy records
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    /// Fetches the provider's current proxy list
    async fn fetch_proxies(&self) -> Result<Vec<NewProxy>, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct ProxyListPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<ProxyListEntry>,
}

#[derive(Debug, Deserialize)]
struct ProxyListEntry {
    proxy_address: Option<String>,
    port: Option<u16>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

impl TryFrom<ProxyListEntry> for NewProxy {
    type Error = ProviderError;

    fn try_from(entry: ProxyListEntry) -> Result<Self, Self::Error> {
        let host = entry
            .proxy_address
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProviderError::InvalidRecord("missing proxy_address".to_string()))?;
        let port = entry
            .port
            .ok_or_else(|| ProviderError::InvalidRecord(format!("{} has no port", host)))?;

        Ok(NewProxy {
            host,
            port,
            username: entry.username.unwrap_or_default(),
            password: entry.password.unwrap_or_default(),
            country_code: entry
                .country_code
                .filter(|c| !c.is_empty())
                .map(|c| c.to_uppercase()),
        })
    }
}

/// Webshare-style proxy list client
pub struct WebshareProvider {
    client: Client,
    config: ProxyProviderConfig,
}

impl WebshareProvider {
    pub fn new(config: ProxyProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    fn page_url(&self, page: u32) -> String {
        let mut url = format!(
            "{}?mode=direct&page={}&page_size={}",
            self.config.api_url, page, self.config.page_size
        );
        if !self.config.countries.is_empty() {
            url.push_str("&country_code=");
            url.push_str(&self.config.countries.join(","));
        }
        url
    }
}

#[async_trait]
impl ProxyProvider for WebshareProvider {
    async fn fetch_proxies(&self) -> Result<Vec<NewProxy>, ProviderError> {
        let mut proxies = Vec::new();
        let mut page = 1;

        loop {
            let url = self.page_url(page);
            debug!("Fetching proxy list page {}", page);

            let response = self
                .client
                .get(&url)
                .header("Authorization", format!("Token {}", self.config.api_key))
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(ProviderError::Status(response.status().as_u16()));
            }

            let body: ProxyListPage = response.json().await?;
            let fetched = body.results.len();
            for entry in body.results {
                match NewProxy::try_from(entry) {
                    Ok(proxy) => proxies.push(proxy),
                    Err(e) => debug!("Skipping proxy record: {}", e),
                }
            }

            if body.next.is_none() || fetched == 0 {
                break;
            }
            page += 1;
        }

        Ok(proxies)
    }
}

/// Pulls the provider's list and upserts it into the store
///
/// A failed fetch is logged and counts as zero proxies.
///
/// # Returns
///
/// The number of proxy records written
pub async fn sync_proxies(
    provider: &dyn ProxyProvider,
    store: &SharedStore,
) -> Result<usize, StorageError> {
    let proxies = match provider.fetch_proxies().await {
        Ok(proxies) => proxies,
        Err(e) => {
            error!("Error fetching proxies: {}", e);
            return Ok(0);
        }
    };

    let mut guard = lock_store(store)?;
    for proxy in &proxies {
        guard.upsert_proxy(proxy)?;
    }

    info!("Synced {} proxies", proxies.len());
    Ok(proxies.len())
}
