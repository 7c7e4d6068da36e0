//! Runtime configuration: environment loading with clamped values, and
//! proxy configuration whose credentials never reach logs.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::stealth::StealthConfig;
use crate::utils::clamp;

/// Execution environment. In `ci`, missing critical inputs are fatal at
/// startup instead of being degraded around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunEnv {
    Local,
    Ci,
    Colab,
}

impl RunEnv {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "ci" => RunEnv::Ci,
            "colab" => RunEnv::Colab,
            _ => RunEnv::Local,
        }
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, RunEnv::Ci)
    }
}

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HTTP_MAX_CONCURRENCY: usize = 32;
pub const DEFAULT_BROWSER_MAX_CONCURRENCY: usize = 2;
pub const DEFAULT_BROWSER_NAV_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SHARD_SIZE: usize = 500;
/// Bodies above this are discarded and recorded as `too_large`.
pub const DEFAULT_MAX_CONTENT_BYTES: u64 = 1024 * 1024;
/// Successful bodies below this escalate to the browser.
pub const DEFAULT_MIN_CONTENT_BYTES: u64 = 1024;
pub const DEFAULT_RESULT_BUFFER_SIZE: usize = 100;
/// The browser handle is relaunched after this many contexts.
pub const DEFAULT_BROWSER_RECYCLE_AFTER: usize = 50;

/// Runtime configuration for the scraping pipeline.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub env: RunEnv,
    pub urls_path: PathBuf,
    pub data_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub http_max_concurrency: usize,
    pub browser_headless: bool,
    pub browser_max_concurrency: usize,
    pub browser_nav_timeout_secs: u64,
    /// Best-effort content selector the browser waits for after load.
    pub browser_wait_selector: Option<String>,
    pub shard_size: usize,
    pub max_content_bytes: u64,
    pub min_content_bytes: u64,
    pub result_buffer_size: usize,
    pub browser_recycle_after: usize,
    /// Uniform jitter in seconds applied after slot acquisition.
    pub jitter_range: Option<(f64, f64)>,
    pub proxy_config_path: Option<PathBuf>,
    pub stealth: StealthConfig,
    pub session_id: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            env: RunEnv::Local,
            urls_path: data_dir.join("urls.txt"),
            data_dir,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            http_max_concurrency: DEFAULT_HTTP_MAX_CONCURRENCY,
            browser_headless: true,
            browser_max_concurrency: DEFAULT_BROWSER_MAX_CONCURRENCY,
            browser_nav_timeout_secs: DEFAULT_BROWSER_NAV_TIMEOUT_SECS,
            browser_wait_selector: None,
            shard_size: DEFAULT_SHARD_SIZE,
            max_content_bytes: DEFAULT_MAX_CONTENT_BYTES,
            min_content_bytes: DEFAULT_MIN_CONTENT_BYTES,
            result_buffer_size: DEFAULT_RESULT_BUFFER_SIZE,
            browser_recycle_after: DEFAULT_BROWSER_RECYCLE_AFTER,
            jitter_range: None,
            proxy_config_path: None,
            stealth: StealthConfig::default(),
            session_id: None,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(default)
}

impl RunConfig {
    /// Load configuration from environment variables, clamping every
    /// numeric knob to a range that cannot stall or overload a host.
    pub fn from_env() -> Self {
        let env = RunEnv::parse(&std::env::var("TRAWLER_ENV").unwrap_or_default());
        let data_dir = PathBuf::from(
            std::env::var("TRAWLER_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
        );
        let urls_path = data_dir.join("urls.txt");

        let http_timeout_secs = clamp(
            env_u64("HTTPX_TIMEOUT_SECONDS", DEFAULT_HTTP_TIMEOUT_SECS),
            5,
            30,
        );
        let http_max_concurrency = clamp(
            env_u64("HTTPX_MAX_CONCURRENCY", DEFAULT_HTTP_MAX_CONCURRENCY as u64),
            8,
            64,
        ) as usize;
        let browser_max_concurrency = clamp(
            env_u64(
                "BROWSER_MAX_CONCURRENCY",
                DEFAULT_BROWSER_MAX_CONCURRENCY as u64,
            ),
            1,
            4,
        ) as usize;
        let browser_nav_timeout_secs = clamp(
            env_u64(
                "BROWSER_NAV_TIMEOUT_SECONDS",
                DEFAULT_BROWSER_NAV_TIMEOUT_SECS,
            ),
            10,
            45,
        );
        let shard_size = clamp(env_u64("SHARD_SIZE", DEFAULT_SHARD_SIZE as u64), 50, 5000) as usize;

        let proxy_config_path = std::env::var("PROXY_CONFIG_PATH")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Self {
            env,
            urls_path,
            data_dir,
            http_timeout_secs,
            http_max_concurrency,
            browser_headless: env_bool("BROWSER_HEADLESS", true),
            browser_max_concurrency,
            browser_nav_timeout_secs,
            shard_size,
            proxy_config_path,
            ..Self::default()
        }
    }

    pub fn records_path(&self) -> PathBuf {
        self.data_dir.join("stats.jsonl")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.data_dir.join("run_summary.json")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }
}

/// Proxy server configuration with one port per protocol.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub http_port: u16,
    pub https_port: u16,
    pub socks5_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

// Credentials are redacted from debug output so they cannot leak through
// logs or error chains.
impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("host", &self.host)
            .field("http_port", &self.http_port)
            .field("https_port", &self.https_port)
            .field("socks5_port", &self.socks5_port)
            .field("username", &self.username.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Load proxy configuration from its JSON file.
///
/// Expected shape:
/// `{"proxy": {"hostname": "p.example.com", "port": {"http": 8080,
/// "https": 8443, "socks5": 1080}, "username": "u", "password": "p"}}`
pub fn load_proxy_config(path: &Path) -> anyhow::Result<ProxyConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading proxy config at {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).context("proxy config is not valid JSON")?;
    let proxy = value
        .get("proxy")
        .context("proxy config missing 'proxy' object")?;

    let hostname = proxy
        .get("hostname")
        .and_then(|v| v.as_str())
        .context("proxy config missing 'hostname'")?;
    // Hostname may carry a port suffix; only the host matters here.
    let host = hostname.split(':').next().unwrap_or(hostname).to_string();

    let ports: HashMap<String, u16> = serde_json::from_value(
        proxy
            .get("port")
            .cloned()
            .context("proxy config missing 'port' map")?,
    )
    .context("proxy 'port' map has non-numeric entries")?;

    let port_for = |name: &str| -> anyhow::Result<u16> {
        ports
            .get(name)
            .copied()
            .with_context(|| format!("proxy 'port' map missing '{name}'"))
    };

    Ok(ProxyConfig {
        host,
        http_port: port_for("http")?,
        https_port: port_for("https")?,
        socks5_port: port_for("socks5")?,
        username: proxy
            .get("username")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        password: proxy
            .get("password")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

/// Formats the proxy configuration for the two clients that consume it.
#[derive(Debug, Clone)]
pub struct ProxyManager {
    config: ProxyConfig,
}

impl ProxyManager {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    /// SOCKS5 URL for the HTTP transport, with inline credentials when
    /// present. Never logged.
    pub fn transport_proxy_url(&self) -> String {
        let ProxyConfig {
            host, socks5_port, ..
        } = &self.config;
        match (&self.config.username, &self.config.password) {
            (Some(user), Some(pass)) => {
                format!("socks5://{user}:{pass}@{host}:{socks5_port}")
            }
            _ => format!("socks5://{host}:{socks5_port}"),
        }
    }

    /// HTTP proxy server argument for the browser launch flags.
    /// Credentials are not embedded; Chromium takes them separately.
    pub fn browser_proxy_server(&self) -> String {
        format!("http://{}:{}", self.config.host, self.config.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_within_clamps() {
        let config = RunConfig::default();
        assert!(config.http_timeout_secs >= 5 && config.http_timeout_secs <= 30);
        assert!(config.http_max_concurrency >= 8 && config.http_max_concurrency <= 64);
        assert!(config.browser_max_concurrency >= 1 && config.browser_max_concurrency <= 4);
        assert!(config.browser_nav_timeout_secs >= 10 && config.browser_nav_timeout_secs <= 45);
    }

    #[test]
    fn test_run_env_parsing() {
        assert_eq!(RunEnv::parse("ci"), RunEnv::Ci);
        assert_eq!(RunEnv::parse("COLAB"), RunEnv::Colab);
        assert_eq!(RunEnv::parse("anything"), RunEnv::Local);
        assert!(RunEnv::Ci.is_strict());
        assert!(!RunEnv::Local.is_strict());
    }

    #[test]
    fn test_proxy_config_debug_redacts_credentials() {
        let config = ProxyConfig {
            host: "proxy.example.com".to_string(),
            http_port: 8080,
            https_port: 8443,
            socks5_port: 1080,
            username: Some("alice".to_string()),
            password: Some("hunter2".to_string()),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_load_proxy_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"proxy": {{"hostname": "proxy.example.com:9999",
                "port": {{"http": 8080, "https": 8443, "socks5": 1080}},
                "username": "u", "password": "p"}}}}"#
        )
        .unwrap();

        let config = load_proxy_config(file.path()).unwrap();
        assert_eq!(config.host, "proxy.example.com");
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.socks5_port, 1080);
        assert_eq!(config.username.as_deref(), Some("u"));
    }

    #[test]
    fn test_load_proxy_config_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"proxy": {{"hostname": "h"}}}}"#).unwrap();
        assert!(load_proxy_config(file.path()).is_err());
    }

    #[test]
    fn test_proxy_manager_urls() {
        let manager = ProxyManager::new(ProxyConfig {
            host: "p.example.com".to_string(),
            http_port: 8080,
            https_port: 8443,
            socks5_port: 1080,
            username: None,
            password: None,
        });
        assert_eq!(manager.transport_proxy_url(), "socks5://p.example.com:1080");
        assert_eq!(manager.browser_proxy_server(), "http://p.example.com:8080");
    }
}
