//! Page rendering capability
//!
//! The engine drives any `PageRenderer`; a headless browser lives behind this
//! trait outside the crate. `HttpRenderer` is the bundled implementation: a
//! plain HTTP fetch through the proxy, with extraction done on the returned
//! HTML.

use crate::crawler::extract::{extract_structured, StructuredContent};
use crate::storage::ProxyRecord;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// Errors a renderer can report for one navigation
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Navigation timeout of {}ms exceeded", .0.as_millis())]
    Timeout(Duration),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Renderer error: {0}")]
    Other(String),
}

impl RenderError {
    /// Text reported by the renderer, without the variant prefix
    fn detail(&self) -> Option<String> {
        match self {
            Self::Timeout(_) => None,
            Self::Navigation(msg) | Self::Other(msg) => Some(msg.to_lowercase()),
        }
    }

    /// True when the error is (or reports) a navigation timeout
    pub fn is_timeout(&self) -> bool {
        self.detail().map_or(true, |msg| msg.contains("timeout"))
    }

    /// True for errors that usually mean the target is throttling us
    ///
    /// Only timeouts and messages that themselves report a failed navigation
    /// count; connection resets and DNS errors do not.
    pub fn is_rate_limit_like(&self) -> bool {
        self.detail()
            .map_or(true, |msg| msg.contains("timeout") || msg.contains("navigation failed"))
    }
}

/// Proxy settings handed to the renderer for one call
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    /// Proxy server URL, e.g. `http://10.0.0.1:8080`
    pub server: String,
    pub username: String,
    pub password: String,
}

impl From<&ProxyRecord> for ProxyConfig {
    fn from(proxy: &ProxyRecord) -> Self {
        Self {
            server: proxy.server_url(),
            username: proxy.username.clone(),
            password: proxy.password.clone(),
        }
    }
}

/// A rendered page
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub status_code: u16,
    pub body: String,
    /// URL after redirects
    pub final_url: String,
}

/// Something that can load a URL through a proxy and hand back its content
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Loads `url` through `proxy`, giving up after `timeout`
    async fn render(
        &self,
        url: &str,
        timeout: Duration,
        proxy: &ProxyConfig,
    ) -> Result<RenderedPage, RenderError>;

    /// Captures a PNG of the rendered page, `None` when the renderer cannot
    async fn screenshot(&self, _page: &RenderedPage) -> Result<Option<Vec<u8>>, RenderError> {
        Ok(None)
    }

    /// Extracts the fixed content schema from the rendered page
    fn extract_structured(&self, page: &RenderedPage) -> StructuredContent {
        extract_structured(&page.body, &page.final_url)
    }
}

/// Renderer that fetches pages over plain HTTP
pub struct HttpRenderer {
    user_agent: String,
}

impl HttpRenderer {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    /// Builds a one-shot client routed through `proxy`
    fn build_client(&self, timeout: Duration, proxy: &ProxyConfig) -> Result<Client, RenderError> {
        let mut route = reqwest::Proxy::all(&proxy.server)
            .map_err(|e| RenderError::Other(format!("Invalid proxy {}: {}", proxy.server, e)))?;
        if !proxy.username.is_empty() {
            route = route.basic_auth(&proxy.username, &proxy.password);
        }

        Client::builder()
            .user_agent(&self.user_agent)
            .proxy(route)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| RenderError::Other(e.to_string()))
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(
        &self,
        url: &str,
        timeout: Duration,
        proxy: &ProxyConfig,
    ) -> Result<RenderedPage, RenderError> {
        let client = self.build_client(timeout, proxy)?;

        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                RenderError::Timeout(timeout)
            } else {
                RenderError::Navigation(e.to_string())
            }
        };

        let response = client.get(url).send().await.map_err(classify)?;
        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(classify)?;

        Ok(RenderedPage {
            status_code,
            body,
            final_url,
        })
    }
}
