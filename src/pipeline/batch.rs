//! Batch runner: split the input into shards, run them in order with a
//! per-shard browser pool, apply the failure-rate guardrail, and write
//! the run summary. A summary is present and well-formed at every
//! termination path, aborted runs included.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::fetchers::engine::{BrowserEngine, ChromiumEngine, ChromiumEngineConfig};
use crate::fetchers::transport::HttpTransport;
use crate::fetchers::BrowserPool;
use crate::metrics;
use crate::models::RunSummary;
use crate::robots::RobotsCache;
use crate::scheduler::{DomainScheduler, SchedulerConfig};
use crate::stealth::session::seed_for_session;
use crate::stealth::{profiles, SessionState, SessionStore, StorageState};
use crate::store::{self, ResultStore};
use crate::utils::atomic_write_json;

use super::{shard, RunnerContext};

/// Combined captcha + error + timeout rate above which the guardrail
/// reacts: first trip halves global concurrency, a second consecutive
/// trip aborts the run.
const GUARDRAIL_BAD_RATE: f64 = 0.4;

/// Builds the browser engine for one shard. The pool (and therefore the
/// browser handle) is recreated per shard to bound its lifetime.
pub type EngineFactory = Arc<dyn Fn(usize) -> Arc<dyn BrowserEngine> + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Stable identity for checkpoints; re-running with the same id
    /// resumes. Generated when absent.
    pub run_id: Option<String>,
    /// Cap on the number of URLs attempted.
    pub max_urls: Option<usize>,
    /// Stop launching new shards once this many successes accumulate.
    pub target_success: Option<usize>,
    pub use_browser: bool,
}

fn generated_run_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &id[..8])
}

fn has_checkpoints_for(checkpoints_dir: &Path, run_id: &str) -> bool {
    let prefix = format!("{run_id}_shard_");
    std::fs::read_dir(checkpoints_dir)
        .map(|entries| {
            entries
                .flatten()
                .any(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        })
        .unwrap_or(false)
}

/// Resolve the stealth identity: session-sticky when a session id is in
/// use, freshly chosen otherwise.
fn resolve_identity(
    config: &RunConfig,
) -> (
    profiles::DeviceProfile,
    u64,
    Option<StorageState>,
    Option<SessionStore>,
) {
    match &config.session_id {
        Some(session_id) => {
            let store = SessionStore::new(config.sessions_dir());
            let seed = seed_for_session(session_id);
            match store.load(session_id) {
                Some(state) => (state.profile, seed, Some(state.storage), Some(store)),
                None => {
                    let profile = profiles::choose_profile(config.stealth.target_region);
                    // Persist immediately so a second run sees the same
                    // fingerprint even if this one dies early.
                    let state = SessionState {
                        profile: profile.clone(),
                        storage: StorageState::default(),
                    };
                    if let Err(error) = store.save(session_id, &state) {
                        warn!("initial session save failed: {error}");
                    }
                    (profile, seed, None, Some(store))
                }
            }
        }
        None => {
            let profile = profiles::choose_profile(config.stealth.target_region);
            (profile, rand::random(), None, None)
        }
    }
}

/// Run a batch over `urls`. Shards run in order; records for shard `k`
/// are durable before shard `k+1` starts.
pub async fn run_batch(
    urls: Vec<String>,
    config: Arc<RunConfig>,
    options: BatchOptions,
    transport: Arc<dyn HttpTransport>,
    engine_factory: Option<EngineFactory>,
) -> anyhow::Result<RunSummary> {
    let mut urls = urls;
    if let Some(max) = options.max_urls {
        urls.truncate(max);
    }

    let jobs = store::make_url_jobs(&urls);
    let shards = store::make_shards(jobs, config.shard_size);
    let run_id = options.run_id.clone().unwrap_or_else(generated_run_id);

    let checkpoints_dir = config.checkpoints_dir();
    std::fs::create_dir_all(&checkpoints_dir)?;
    let resuming = has_checkpoints_for(&checkpoints_dir, &run_id);

    info!(
        run_id = %run_id,
        urls = urls.len(),
        shards = shards.len(),
        resuming,
        "starting batch"
    );

    // Shared collaborators for the whole batch.
    let scheduler_config = SchedulerConfig::new(config.http_max_concurrency)
        .with_host_limit("www.google.com", 1)
        .with_host_limit("www.bing.com", 1)
        .with_jitter(config.jitter_range);
    let scheduler = Arc::new(DomainScheduler::new(scheduler_config));
    let robots = Arc::new(RobotsCache::new(transport.clone(), "trawler"));

    let mut result_store = ResultStore::new(config.records_path(), config.result_buffer_size)?;
    if !resuming {
        result_store.truncate()?;
    }
    let result_store = Mutex::new(result_store);

    let (profile, session_seed, restored_storage, session_store) = resolve_identity(&config);

    let ctx = RunnerContext {
        config: config.clone(),
        scheduler: scheduler.clone(),
        robots,
        transport,
        profile: profile.clone(),
        session_seed,
        session_storage: Arc::new(Mutex::new(restored_storage)),
    };

    let engine_factory: Option<EngineFactory> = if options.use_browser {
        Some(engine_factory.unwrap_or_else(|| {
            let engine_config = ChromiumEngineConfig {
                headless: config.browser_headless,
                ..Default::default()
            };
            Arc::new(move |_shard_id: usize| {
                Arc::new(ChromiumEngine::new(engine_config.clone())) as Arc<dyn BrowserEngine>
            })
        }))
    } else {
        None
    };

    let mut consecutive_trips = 0u32;
    let mut successes = 0usize;
    let mut aborted_reason: Option<String> = None;

    for (shard_id, shard_jobs) in shards.iter().enumerate() {
        let checkpoint_path = store::checkpoint_path(&checkpoints_dir, &run_id, shard_id);

        // The browser handle is owned by the shard: created here,
        // shut down before the next shard starts.
        let pool = engine_factory
            .as_ref()
            .map(|factory| BrowserPool::new(factory(shard_id), config.browser_max_concurrency, config.browser_recycle_after));

        let outcome = shard::run_shard(
            &run_id,
            shard_id,
            shard_jobs,
            &ctx,
            &checkpoint_path,
            &result_store,
            pool.as_ref(),
        )
        .await;

        if let Some(pool) = &pool {
            pool.shutdown().await;
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(shard_id, "shard failed: {error}");
                aborted_reason = Some(format!("shard {shard_id} failed: {error}"));
                break;
            }
        };

        successes += outcome.success;
        if let Some(target) = options.target_success {
            if successes >= target {
                info!(successes, target, "target reached, stopping early");
                break;
            }
        }

        // Guardrail over completed shards that actually processed work.
        if outcome.processed > 0 {
            if outcome.bad_rate() > GUARDRAIL_BAD_RATE {
                consecutive_trips += 1;
                if consecutive_trips == 1 {
                    let half = scheduler.global_limit() / 2;
                    warn!(
                        shard_id,
                        bad_rate = outcome.bad_rate(),
                        "guardrail tripped, halving global concurrency"
                    );
                    scheduler.reduce_global(half).await;
                } else {
                    aborted_reason = Some(format!(
                        "guardrail tripped on consecutive shards (bad rate {:.2} in shard {shard_id})",
                        outcome.bad_rate()
                    ));
                    warn!(shard_id, "guardrail tripped again, aborting run");
                    break;
                }
            } else {
                consecutive_trips = 0;
            }
        }
    }

    result_store.lock().await.close()?;

    // Persist the session identity and its latest storage snapshot.
    if let (Some(session_store), Some(session_id)) = (&session_store, &config.session_id) {
        let storage = ctx
            .session_storage
            .lock()
            .await
            .clone()
            .unwrap_or_default();
        let state = SessionState {
            profile: profile.clone(),
            storage,
        };
        if let Err(error) = session_store.save(session_id, &state) {
            warn!("session save failed: {error}");
        }
    }

    // The summary reflects every record in the store at aggregation time.
    let records = store::read_records(&config.records_path());
    let mut summary = metrics::compute_run_summary(&records);
    if let Some(reason) = aborted_reason {
        summary.aborted = true;
        summary.aborted_reason = Some(reason);
    }

    atomic_write_json(&config.summary_path(), &summary)?;
    info!(
        total = summary.total_urls,
        success_rate = summary.success_rate,
        aborted = summary.aborted,
        "batch finished"
    );

    Ok(summary)
}
