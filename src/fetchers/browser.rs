//! Browser fallback path: pooled access to the engine with periodic
//! recycling, plus the per-URL fetch that mirrors the HTTP stage's
//! status taxonomy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::captcha;
use crate::models::{BlockType, FetchRecord, Method, Stage, Status, UrlJob};
use crate::pipeline::RunnerContext;
use crate::stealth::{self, behavior, profiles};
use crate::utils::{host_of, safe_display_url, truncate_message};

use super::engine::{BrowserEngine, EngineError, PageRequest, PageSnapshot};
use super::FetchFailure;

/// Navigation failures retry once in a fresh context.
pub const MAX_BROWSER_RETRIES: u32 = 1;

const BACKOFF_BASE_SECS: f64 = 1.0;

/// Shared browser access for one shard: a concurrency clamp plus
/// relaunch-every-N-contexts recycling to bound memory.
pub struct BrowserPool {
    engine: Arc<dyn BrowserEngine>,
    permits: Semaphore,
    served: AtomicUsize,
    recycle_after: usize,
}

impl BrowserPool {
    pub fn new(engine: Arc<dyn BrowserEngine>, max_concurrency: usize, recycle_after: usize) -> Self {
        Self {
            engine,
            permits: Semaphore::new(max_concurrency.clamp(1, 4)),
            served: AtomicUsize::new(0),
            recycle_after: recycle_after.max(1),
        }
    }

    /// Contexts served so far (testing and logs).
    pub fn contexts_served(&self) -> usize {
        self.served.load(Ordering::Relaxed)
    }

    pub async fn fetch_page(&self, request: &PageRequest) -> Result<PageSnapshot, EngineError> {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Err(EngineError::Launch("pool closed".to_string())),
        };

        let served = self.served.fetch_add(1, Ordering::SeqCst);
        if served > 0 && served % self.recycle_after == 0 {
            info!(contexts = served, "recycling browser handle");
            self.engine.recycle().await;
        }

        self.engine.fetch_page(request).await
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}

/// Build the engine request for one URL from the run's stealth settings.
fn build_page_request(job: &UrlJob, ctx: &RunnerContext) -> PageRequest {
    let stealth = &ctx.config.stealth;
    let profile = ctx.profile.clone();
    let viewport = profiles::jittered_viewport(&profile, stealth);

    let behavior_script = if stealth.behavior_active() {
        let mut rng = rand::thread_rng();
        let plan = behavior::plan_for(
            &mut rng,
            stealth.behavior_profile,
            viewport.0,
            viewport.1,
        );
        Some(behavior::render_script(&plan))
    } else {
        None
    };

    let network = if stealth.network_emulation_active() {
        let mut rng = rand::thread_rng();
        Some(stealth.network_profile.conditions(&mut rng))
    } else {
        None
    };

    let storage_state = ctx.session_storage.try_lock().ok().and_then(|s| s.clone());

    PageRequest {
        url: job.url.clone(),
        init_scripts: stealth::build_init_scripts(stealth, &profile, ctx.session_seed),
        profile,
        viewport,
        behavior_script,
        network,
        block_assets: !stealth.enabled || stealth.block_resources,
        block_stylesheets: stealth.block_stylesheets,
        nav_timeout: Duration::from_secs(ctx.config.browser_nav_timeout_secs),
        wait_selector: ctx.config.browser_wait_selector.clone(),
        storage_state,
        capture_storage: ctx.config.session_id.is_some(),
    }
}

/// Fetch one URL through the browser. Same status taxonomy as the HTTP
/// stage; engine-level launch failures surface as `Err` for the router.
pub async fn fetch_one(
    job: &UrlJob,
    ctx: &RunnerContext,
    pool: &BrowserPool,
) -> Result<FetchRecord, FetchFailure> {
    let mut record = FetchRecord::initial(job, Method::Browser, Stage::Fallback);
    let url = job.url.clone();
    let host = host_of(&url);
    record.host = host.clone();

    if !ctx.robots.allowed(&url, None).await {
        record.status = Status::RobotsBlocked;
        record.robots_disallowed = true;
        record.block_type = Some(BlockType::Robots);
        return Ok(record);
    }

    let mut attempt: u32 = 0;

    loop {
        // Fresh context (and fresh jitter/behavior) on every attempt.
        let request = build_page_request(job, ctx);

        ctx.scheduler.acquire(&host).await;
        let start = Instant::now();
        let outcome = pool.fetch_page(&request).await;
        record.latency_ms = Some(start.elapsed().as_millis() as i64);

        match outcome {
            Ok(snapshot) => {
                record.http_status = snapshot.http_status;
                record.status = match snapshot.http_status {
                    Some(code) if (200..400).contains(&code) => Status::Success,
                    Some(_) => Status::HttpError,
                    // No observable status; trust the rendered content.
                    None => Status::Success,
                };
                record.content_length = snapshot.content.len() as u64;
                record.encoding = Some("utf-8".to_string());

                if record.content_length > ctx.config.max_content_bytes {
                    record.status = Status::TooLarge;
                    record.body = None;
                    ctx.scheduler.release(&host).await;
                    return Ok(record);
                }

                let verdict = captcha::classify(
                    record.http_status.unwrap_or(0),
                    &snapshot.final_url,
                    &std::collections::HashMap::new(),
                    Some(&snapshot.content),
                );
                if verdict.present {
                    record.captcha_detected = true;
                    record.status = Status::CaptchaDetected;
                    record.block_type = Some(BlockType::Captcha);
                    record.block_vendor = verdict.vendor.map(|v| v.as_str().to_string());
                    ctx.scheduler.record_captcha(&host).await;
                    ctx.scheduler.release(&host).await;
                    return Ok(record);
                }

                record.body = Some(snapshot.content);

                if let Some(storage) = snapshot.storage {
                    if let Ok(mut slot) = ctx.session_storage.try_lock() {
                        *slot = Some(storage);
                    }
                }

                if record.status == Status::HttpError {
                    ctx.scheduler.record_error(&host).await;
                }
                ctx.scheduler.release(&host).await;
                return Ok(record);
            }
            Err(error) => {
                ctx.scheduler.release(&host).await;

                if matches!(error, EngineError::Launch(_)) {
                    // Nothing below the router can recover a dead browser.
                    return Err(FetchFailure::Engine(truncate_message(
                        &error.to_string(),
                        200,
                    )));
                }

                record.status = if error.is_timeout() {
                    Status::Timeout
                } else {
                    Status::HttpError
                };
                record.error_kind = Some(error.kind().to_string());
                record.error_message = Some(truncate_message(&error.to_string(), 200));

                if attempt < MAX_BROWSER_RETRIES {
                    attempt += 1;
                    record.retries = attempt;
                    debug!(
                        url = %safe_display_url(&url),
                        attempt,
                        "retrying navigation in a fresh context"
                    );
                    tokio::time::sleep(Duration::from_secs_f64(
                        BACKOFF_BASE_SECS * 2f64.powi(attempt.saturating_sub(1) as i32),
                    ))
                    .await;
                    continue;
                }

                ctx.scheduler.record_error(&host).await;
                return Ok(record);
            }
        }
    }
}
