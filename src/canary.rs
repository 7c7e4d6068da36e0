//! Canary check: drive one stealth browser context against a bot
//! detection page and report which evasions hold up.
//!
//! Cheap smoke test before a large stealth run. The verdict comes from
//! the rendered page content, so it works with any [`BrowserEngine`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::config::RunConfig;
use crate::fetchers::engine::{BrowserEngine, PageRequest};
use crate::stealth::{self, profiles};

/// Default probe target; renders a table of automation giveaways.
pub const DEFAULT_CANARY_URL: &str = "https://bot.sannysoft.com/";

/// Outcome of a canary probe.
#[derive(Debug, Clone, Serialize)]
pub struct CanaryReport {
    pub url: String,
    pub fetched: bool,
    /// No "webdriver present" failure rendered on the page.
    pub webdriver_hidden: bool,
    /// The page did not flag a missing `window.chrome`.
    pub chrome_object_present: bool,
    /// No failed rows at all on the checker table.
    pub clean: bool,
    pub content_length: u64,
}

fn analyze(url: &str, content: &str) -> CanaryReport {
    let lower = content.to_lowercase();
    // Checker pages render "(failed)" / "missing" markers per probe row.
    let webdriver_hidden =
        !lower.contains("webdriver present (failed)") && !lower.contains("webdriver: present");
    let chrome_object_present = !lower.contains("chrome missing");
    let clean = !lower.contains("(failed)");

    CanaryReport {
        url: url.to_string(),
        fetched: true,
        webdriver_hidden,
        chrome_object_present,
        clean,
        content_length: content.len() as u64,
    }
}

/// Run the canary probe with a stealth-configured context.
pub async fn run_canary(
    config: &RunConfig,
    engine: Arc<dyn BrowserEngine>,
    url: Option<&str>,
) -> anyhow::Result<CanaryReport> {
    let url = url.unwrap_or(DEFAULT_CANARY_URL);

    let mut stealth_config = config.stealth.clone();
    stealth_config.enabled = true;

    let profile = profiles::choose_profile(stealth_config.target_region);
    let viewport = profiles::jittered_viewport(&profile, &stealth_config);
    let seed: u64 = rand::random();

    let request = PageRequest {
        url: url.to_string(),
        init_scripts: stealth::build_init_scripts(&stealth_config, &profile, seed),
        profile,
        viewport,
        behavior_script: None,
        network: None,
        // The checker needs its stylesheets and scripts to render rows.
        block_assets: false,
        block_stylesheets: false,
        nav_timeout: Duration::from_secs(config.browser_nav_timeout_secs),
        wait_selector: None,
        storage_state: None,
        capture_storage: false,
    };

    info!(url, "running canary probe");
    let snapshot = engine.fetch_page(&request).await?;
    engine.shutdown().await;

    Ok(analyze(url, &snapshot.content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_page_passes() {
        let report = analyze(
            DEFAULT_CANARY_URL,
            "<table><tr><td>WebDriver</td><td>missing (passed)</td></tr></table>",
        );
        assert!(report.webdriver_hidden);
        assert!(report.chrome_object_present);
        assert!(report.clean);
    }

    #[test]
    fn test_webdriver_failure_is_flagged() {
        let report = analyze(
            DEFAULT_CANARY_URL,
            "<td>WebDriver present (failed)</td>",
        );
        assert!(!report.webdriver_hidden);
        assert!(!report.clean);
    }

    #[test]
    fn test_missing_chrome_object_is_flagged() {
        let report = analyze(DEFAULT_CANARY_URL, "<td>Chrome missing</td>");
        assert!(!report.chrome_object_present);
    }
}
