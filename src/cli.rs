//! Command-line entry point: one batch command that reads environment
//! plus flags, runs the pipeline, and prints the summary JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use crate::canary;
use crate::config::{load_proxy_config, ProxyManager, RunConfig};
use crate::fetchers::engine::{ChromiumEngine, ChromiumEngineConfig};
use crate::fetchers::transport::ReqwestTransport;
use crate::pipeline::{run_batch, BatchOptions};
use crate::report;
use crate::stealth::StealthMode;
use crate::store;

#[derive(Parser, Debug)]
#[command(name = "trawler")]
#[command(about = "Large-batch hybrid web scraping engine")]
#[command(version)]
pub struct Cli {
    /// Input URLs file (line-delimited text or single-column CSV).
    /// Defaults to {data_dir}/urls.txt.
    #[arg(long, env = "TRAWLER_URLS_PATH")]
    urls: Option<PathBuf>,

    /// Single URL to scrape instead of the input file.
    #[arg(long)]
    url: Option<String>,

    /// Base directory for inputs and outputs.
    #[arg(long, env = "TRAWLER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Run identity for checkpoints; reuse an id to resume.
    #[arg(long)]
    run_id: Option<String>,

    /// Cap the number of URLs attempted.
    #[arg(long)]
    max_urls: Option<usize>,

    /// Stop after this many successful fetches.
    #[arg(long)]
    target_success: Option<usize>,

    /// Disable the browser fallback stage.
    #[arg(long)]
    no_browser: bool,

    /// Enable stealth mode for browser contexts.
    #[arg(long)]
    stealth: bool,

    /// Stealth intensity.
    #[arg(long, value_enum, default_value_t = StealthMode::Moderate)]
    stealth_mode: StealthMode,

    /// Session id for persistent browser identity (cookies, storage,
    /// device profile).
    #[arg(long)]
    session_id: Option<String>,

    /// Run the browser headful (debugging).
    #[arg(long)]
    no_headless: bool,

    /// Probe a bot-detection page with a stealth context and print the
    /// verdict instead of running a batch.
    #[arg(long)]
    canary: bool,

    /// Override the canary probe URL.
    #[arg(long, requires = "canary")]
    canary_url: Option<String>,

    /// After the batch, write every non-success URL to this CSV for a
    /// targeted re-run.
    #[arg(long)]
    collect_failed: Option<PathBuf>,

    /// Compare the run summary against a previous summary JSON and print
    /// the delta table.
    #[arg(long)]
    compare_with: Option<PathBuf>,

    /// Verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Early check for verbose mode, before the parser runs.
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Resolve the input URL list from flags and config.
fn load_inputs(cli: &Cli, config: &RunConfig) -> anyhow::Result<Vec<String>> {
    if let Some(url) = &cli.url {
        return Ok(vec![url.clone()]);
    }

    let path = cli.urls.clone().unwrap_or_else(|| config.urls_path.clone());

    // CSV input is canonicalized to a line-delimited file next to it.
    let path = if path.extension().and_then(|e| e.to_str()) == Some("csv") {
        let canonical = path.with_extension("txt");
        store::ensure_canonical_urls_file(&path, &canonical)?
    } else {
        path
    };

    if config.env.is_strict() && !path.exists() {
        anyhow::bail!("URLs file missing at {} (fatal in ci)", path.display());
    }

    let urls = store::load_urls_from_txt(&path);
    if urls.is_empty() {
        anyhow::bail!("no URLs found at {}", path.display());
    }
    Ok(urls)
}

/// Run the batch CLI. Prints the summary JSON on success; any error here
/// becomes a non-zero exit in `main`.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = RunConfig::from_env();
    if let Some(data_dir) = &cli.data_dir {
        config.urls_path = data_dir.join("urls.txt");
        config.data_dir = data_dir.clone();
    }
    if cli.stealth {
        config.stealth.enabled = true;
        config.stealth.mode = cli.stealth_mode;
        tracing::info!(mode = ?cli.stealth_mode, "stealth enabled");
    }
    if cli.no_headless {
        config.browser_headless = false;
    }
    config.session_id = cli.session_id.clone();

    // Proxy config is optional locally but fatal-if-broken in ci.
    let proxy = match &config.proxy_config_path {
        Some(path) => match load_proxy_config(path) {
            Ok(proxy) => Some(ProxyManager::new(proxy)),
            Err(error) if config.env.is_strict() => {
                return Err(error.context("proxy config unreadable (fatal in ci)"));
            }
            Err(error) => {
                tracing::warn!("proxy config ignored: {error:#}");
                None
            }
        },
        None => None,
    };

    if cli.canary {
        let engine = Arc::new(ChromiumEngine::new(ChromiumEngineConfig {
            headless: config.browser_headless,
            ..Default::default()
        }));
        let report = canary::run_canary(&config, engine, cli.canary_url.as_deref()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let urls = load_inputs(&cli, &config)?;

    let config = Arc::new(config);
    let transport = Arc::new(
        ReqwestTransport::new(&config, proxy.as_ref()).context("building HTTP transport")?,
    );

    let options = BatchOptions {
        run_id: cli.run_id.clone(),
        max_urls: cli.max_urls,
        target_success: cli.target_success,
        use_browser: !cli.no_browser,
    };

    let summary = run_batch(urls, config.clone(), options, transport, None).await?;

    if let Some(path) = &cli.collect_failed {
        let records = store::read_records(&config.records_path());
        let count = report::write_failed_urls_csv(&records, path)?;
        tracing::info!(count, path = %path.display(), "failed URLs collected");
    }

    if let Some(path) = &cli.compare_with {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading baseline summary at {}", path.display()))?;
        let baseline: crate::models::RunSummary =
            serde_json::from_str(&raw).context("baseline summary is not valid JSON")?;
        println!("{}", report::format_comparison(&baseline, &summary));
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
