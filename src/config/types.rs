use serde::Deserialize;

/// Main configuration structure for Sumi-Relay
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(rename = "proxy-provider")]
    pub proxy_provider: Option<ProxyProviderConfig>,
}

/// Crawl engine tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EngineConfig {
    /// Requests per second a fresh or reset job starts at
    pub initial_rate: f64,

    /// Lower bound for the adaptive rate
    pub min_rate: f64,

    /// Upper bound for the adaptive rate
    pub max_rate: f64,

    /// Render timeout for first-pass fetches
    pub page_timeout_secs: u64,

    /// Render timeout for retry-pass fetches
    pub retry_timeout_secs: u64,

    /// How long a blocked proxy stays out of rotation
    pub proxy_cooldown_secs: u64,

    /// How long a job pauses when no proxy is available
    pub cooloff_secs: u64,

    /// Interval of the multi-worker retry sweep
    pub retry_sweep_secs: u64,

    /// Back-off for a worker that found nothing to claim
    pub idle_poll_millis: u64,

    /// Non-success attempts after which a pending URL is given up on
    pub max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_rate: 1.0,
            min_rate: 0.2,
            max_rate: 5.0,
            page_timeout_secs: 30,
            retry_timeout_secs: 120,
            proxy_cooldown_secs: 300,
            cooloff_secs: 300,
            retry_sweep_secs: 5,
            idle_poll_millis: 1000,
            max_attempts: 5,
        }
    }
}

/// Record store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Page renderer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RendererConfig {
    /// User-Agent header sent by the HTTP renderer
    pub user_agent: String,

    /// Directory debug screenshots are written to
    pub screenshot_dir: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string(),
            screenshot_dir: "./screenshots".to_string(),
        }
    }
}

/// Export configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExportConfig {
    /// Jobs with more URLs than this are streamed instead of buffered
    pub stream_threshold: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            stream_threshold: 50,
        }
    }
}

/// Upstream proxy list API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyProviderConfig {
    pub api_url: String,

    /// May be left out when `SUMI_RELAY_API_KEY` is set
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Only sync proxies in these countries (empty means all)
    #[serde(default)]
    pub countries: Vec<String>,
}

fn default_page_size() -> u32 {
    100
}
