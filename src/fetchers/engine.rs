//! Browser engine seam and the chromiumoxide (CDP) implementation.
//!
//! The pipeline consumes [`BrowserEngine`]: navigate one URL in an
//! isolated context configured from a device profile, with init scripts
//! guaranteed to run before any page script, and return a snapshot.
//! Tests substitute scripted engines; production uses [`ChromiumEngine`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EmulateNetworkConditionsParams, SetBlockedUrLsParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::stealth::network::NetworkConditions;
use crate::stealth::session::{CookieRecord, OriginStorage, StorageItem, StorageState};
use crate::stealth::DeviceProfile;
use crate::utils::truncate_message;

/// Everything the engine needs to serve one URL in a fresh context.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub url: String,
    pub profile: DeviceProfile,
    /// Viewport after jitter; may differ slightly from the profile.
    pub viewport: (u32, u32),
    /// Scripts that must execute before any site code.
    pub init_scripts: Vec<String>,
    /// Optional humanized interaction script run after navigation.
    pub behavior_script: Option<String>,
    /// Network throttling, when aggressive stealth is on.
    pub network: Option<NetworkConditions>,
    pub block_assets: bool,
    pub block_stylesheets: bool,
    pub nav_timeout: Duration,
    /// Best-effort content selector with a short secondary timeout.
    pub wait_selector: Option<String>,
    /// Session storage to restore before navigation.
    pub storage_state: Option<StorageState>,
    /// Capture cookies and web storage into the snapshot.
    pub capture_storage: bool,
}

/// Result of one browser navigation.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub final_url: String,
    pub http_status: Option<u16>,
    pub content: String,
    pub storage: Option<StorageState>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(Duration),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("protocol failure: {0}")]
    Protocol(String),
}

impl EngineError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::NavigationTimeout(_))
    }

    /// Class name persisted as `error_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Launch(_) => "BrowserLaunch",
            EngineError::NavigationTimeout(_) => "NavigationTimeout",
            EngineError::Navigation(_) => "Navigation",
            EngineError::Protocol(_) => "Protocol",
        }
    }
}

/// One isolated navigation in a disposable context.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<PageSnapshot, EngineError>;

    /// Close and forget the underlying browser so the next fetch
    /// relaunches it. Bounds memory over long runs.
    async fn recycle(&self);

    /// Tear the browser down at end of shard.
    async fn shutdown(&self);
}

/// Launch configuration for the local Chromium.
#[derive(Debug, Clone)]
pub struct ChromiumEngineConfig {
    pub headless: bool,
    pub proxy: Option<String>,
    pub chrome_args: Vec<String>,
    /// Settle wait after the document is ready, approximating
    /// network-idle for late XHR-driven pages.
    pub settle_ms: u64,
}

impl Default for ChromiumEngineConfig {
    fn default() -> Self {
        Self {
            headless: true,
            proxy: None,
            chrome_args: Vec::new(),
            settle_ms: 500,
        }
    }
}

const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/google/chrome/google-chrome",
];

const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// Status code of the main document via the Navigation Timing API.
const NAV_STATUS_SCRIPT: &str =
    "(performance.getEntriesByType('navigation')[0] || {}).responseStatus || 0";

const LOCAL_STORAGE_DUMP_SCRIPT: &str = r#"
(() => {
    const items = [];
    try {
        for (let i = 0; i < localStorage.length; i++) {
            const key = localStorage.key(i);
            items.push({ name: key, value: localStorage.getItem(key) });
        }
    } catch (e) {}
    return { origin: location.origin, items };
})()
"#;

const ASSET_BLOCK_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.svg", "*.webp", "*.ico", "*.woff", "*.woff2",
    "*.ttf", "*.otf", "*.mp4", "*.webm", "*.mp3", "*.avi",
];

/// Chromium-backed engine. The browser handle is launched lazily and
/// shared across contexts until recycled.
pub struct ChromiumEngine {
    config: ChromiumEngineConfig,
    browser: Mutex<Option<Arc<Browser>>>,
}

impl ChromiumEngine {
    pub fn new(config: ChromiumEngineConfig) -> Self {
        Self {
            config,
            browser: Mutex::new(None),
        }
    }

    fn find_chrome() -> Result<std::path::PathBuf, EngineError> {
        for path in CHROME_PATHS {
            let candidate = std::path::Path::new(path);
            if candidate.exists() {
                return Ok(candidate.to_path_buf());
            }
        }
        for command in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
            if let Ok(output) = std::process::Command::new("which").arg(command).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        return Ok(std::path::PathBuf::from(path));
                    }
                }
            }
        }
        Err(EngineError::Launch(
            "Chrome/Chromium executable not found".to_string(),
        ))
    }

    async fn ensure_browser(&self) -> Result<Arc<Browser>, EngineError> {
        let mut guard = self.browser.lock().await;
        if let Some(browser) = guard.as_ref() {
            return Ok(browser.clone());
        }

        info!(headless = self.config.headless, "launching browser");
        let chrome_path = Self::find_chrome()?;

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(proxy) = &self.config.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--metrics-recording-only")
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| EngineError::Launch(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| EngineError::Launch(truncate_message(&e.to_string(), 200)))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let browser = Arc::new(browser);
        *guard = Some(browser.clone());
        Ok(browser)
    }

    async fn configure_context(&self, page: &Page, request: &PageRequest) -> Result<(), EngineError> {
        let protocol = |e: chromiumoxide::error::CdpError| {
            EngineError::Protocol(truncate_message(&e.to_string(), 200))
        };

        page.execute(SetUserAgentOverrideParams::new(
            request.profile.user_agent.clone(),
        ))
        .await
        .map_err(protocol)?;

        let (width, height) = request.viewport;
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(width as i64)
            .height(height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(EngineError::Protocol)?;
        page.execute(metrics).await.map_err(protocol)?;

        page.execute(SetTimezoneOverrideParams::new(
            request.profile.timezone_id.clone(),
        ))
        .await
        .map_err(protocol)?;

        let locale = SetLocaleOverrideParams::builder()
            .locale(request.profile.locale.clone())
            .build();
        page.execute(locale).await.map_err(protocol)?;

        // Init scripts must land before any site code runs.
        for script in &request.init_scripts {
            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(script.clone()))
                .await
                .map_err(protocol)?;
        }

        if request.block_assets {
            let mut patterns: Vec<String> = ASSET_BLOCK_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect();
            if request.block_stylesheets {
                patterns.push("*.css".to_string());
            }
            page.execute(SetBlockedUrLsParams::new(patterns))
                .await
                .map_err(protocol)?;
        }

        if let Some(conditions) = &request.network {
            let throttle = EmulateNetworkConditionsParams::builder()
                .offline(false)
                .latency(conditions.latency_ms as f64)
                .download_throughput(conditions.download_bps as f64)
                .upload_throughput(conditions.upload_bps as f64)
                .build()
                .map_err(EngineError::Protocol)?;
            page.execute(throttle).await.map_err(protocol)?;
        }

        if let Some(state) = &request.storage_state {
            for cookie in &state.cookies {
                let param = CookieParam::builder()
                    .name(cookie.name.clone())
                    .value(cookie.value.clone())
                    .domain(cookie.domain.clone())
                    .path(cookie.path.clone())
                    .secure(cookie.secure)
                    .http_only(cookie.http_only)
                    .build();
                match param {
                    Ok(param) => {
                        if let Err(e) = page.set_cookie(param).await {
                            debug!("cookie restore skipped: {e}");
                        }
                    }
                    Err(e) => debug!("cookie build skipped: {e}"),
                }
            }
        }

        Ok(())
    }

    async fn navigate(&self, page: &Page, request: &PageRequest) -> Result<(), EngineError> {
        let params = NavigateParams::builder()
            .url(request.url.clone())
            .build()
            .map_err(EngineError::Navigation)?;

        tokio::time::timeout(request.nav_timeout, page.execute(params))
            .await
            .map_err(|_| EngineError::NavigationTimeout(request.nav_timeout))?
            .map_err(|e| EngineError::Navigation(truncate_message(&e.to_string(), 200)))?;

        // Wait for the document, then let late requests settle; this
        // approximates a network-idle wait.
        let ready_timeout = request.nav_timeout.min(Duration::from_secs(10));
        match tokio::time::timeout(
            ready_timeout,
            page.evaluate(WAIT_FOR_READY_SCRIPT.to_string()),
        )
        .await
        {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!(state = %state, "document ready");
            }
            Ok(Err(e)) => debug!("ready-state check failed: {e}"),
            Err(_) => warn!("timed out waiting for document ready state"),
        }
        tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;

        if let Some(selector) = &request.wait_selector {
            let selector_timeout = Duration::from_secs(3);
            match tokio::time::timeout(selector_timeout, page.find_element(selector.clone())).await
            {
                Ok(Ok(_)) => debug!(selector = %selector, "content selector found"),
                Ok(Err(e)) => debug!(selector = %selector, "content selector not found: {e}"),
                Err(_) => debug!(selector = %selector, "content selector wait timed out"),
            }
        }

        Ok(())
    }

    async fn capture_storage(&self, page: &Page) -> StorageState {
        let cookies = match page.get_cookies().await {
            Ok(cookies) => cookies
                .into_iter()
                .map(|c| CookieRecord {
                    name: c.name,
                    value: c.value,
                    domain: c.domain,
                    path: c.path,
                    secure: c.secure,
                    http_only: c.http_only,
                    expires: Some(c.expires),
                })
                .collect(),
            Err(e) => {
                debug!("cookie capture failed: {e}");
                Vec::new()
            }
        };

        let origins = match page.evaluate(LOCAL_STORAGE_DUMP_SCRIPT.to_string()).await {
            Ok(result) => match result.into_value::<serde_json::Value>() {
                Ok(value) => {
                    let origin = value
                        .get("origin")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let items = value
                        .get("items")
                        .and_then(|v| v.as_array())
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(|item| {
                                    Some(StorageItem {
                                        name: item.get("name")?.as_str()?.to_string(),
                                        value: item.get("value")?.as_str()?.to_string(),
                                    })
                                })
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default();
                    if origin.is_empty() && items.is_empty() {
                        Vec::new()
                    } else {
                        vec![OriginStorage {
                            origin,
                            local_storage: items,
                        }]
                    }
                }
                Err(_) => Vec::new(),
            },
            Err(e) => {
                debug!("web storage capture failed: {e}");
                Vec::new()
            }
        };

        StorageState { cookies, origins }
    }
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn fetch_page(&self, request: &PageRequest) -> Result<PageSnapshot, EngineError> {
        let browser = self.ensure_browser().await?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| EngineError::Protocol(truncate_message(&e.to_string(), 200)))?;

        let result = async {
            self.configure_context(&page, request).await?;
            self.navigate(&page, request).await?;

            if let Some(script) = &request.behavior_script {
                if let Err(e) = page.evaluate(script.clone()).await {
                    debug!("behavior script skipped: {e}");
                }
            }

            let http_status: Option<u16> = match page.evaluate(NAV_STATUS_SCRIPT.to_string()).await {
                Ok(result) => result
                    .into_value::<i64>()
                    .ok()
                    .filter(|s| *s > 0)
                    .map(|s| s as u16),
                Err(_) => None,
            };

            let final_url = page
                .url()
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| request.url.clone());

            let content = page
                .content()
                .await
                .map_err(|e| EngineError::Protocol(truncate_message(&e.to_string(), 200)))?;

            let storage = if request.capture_storage {
                Some(self.capture_storage(&page).await)
            } else {
                None
            };

            Ok(PageSnapshot {
                final_url,
                http_status,
                content,
                storage,
            })
        }
        .await;

        // The context is per-URL; always close it.
        let _ = page.close().await;
        result
    }

    async fn recycle(&self) {
        let mut guard = self.browser.lock().await;
        if guard.take().is_some() {
            info!("browser handle recycled");
        }
    }

    async fn shutdown(&self) {
        let mut guard = self.browser.lock().await;
        guard.take();
    }
}
