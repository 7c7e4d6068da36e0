//! Shard runner: bounded-concurrency fan-out over one shard with a
//! checkpoint journal. An interrupted shard resumes by skipping URLs
//! already present in the records file.

use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info};

use crate::fetchers::BrowserPool;
use crate::models::{CheckpointStatus, ShardCheckpoint, Status, UrlJob};
use crate::store::{self, ResultStore};

use super::{router, RunnerContext};

/// Counts the batch runner needs for guardrails and early stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardOutcome {
    pub processed: usize,
    pub skipped: usize,
    pub success: usize,
    /// captcha + http_error + timeout, the guardrail numerator.
    pub bad: usize,
}

impl ShardOutcome {
    pub fn bad_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.bad as f64 / self.processed as f64
    }
}

/// Run one shard to completion. Record emission order follows completion
/// order, not input order. The store is shared across shards but writes
/// are serialized through the mutex held here.
pub async fn run_shard(
    run_id: &str,
    shard_id: usize,
    jobs: &[UrlJob],
    ctx: &RunnerContext,
    checkpoint_path: &Path,
    store: &Mutex<ResultStore>,
    pool: Option<&BrowserPool>,
) -> anyhow::Result<ShardOutcome> {
    let existing = store::load_checkpoint(checkpoint_path);
    if let Some(checkpoint) = &existing {
        if checkpoint.status == CheckpointStatus::Completed {
            info!(shard_id, "shard already completed, skipping");
            return Ok(ShardOutcome::default());
        }
    }

    // Resuming a half-written shard: URLs already recorded are done.
    let already_done = if existing.is_some() {
        let path = store.lock().await.path().to_path_buf();
        store::recorded_urls_for_shard(&path, shard_id)
    } else {
        Default::default()
    };

    let mut checkpoint = ShardCheckpoint::new(run_id, shard_id, jobs.len());
    checkpoint.status = CheckpointStatus::InProgress;
    checkpoint.urls_done = already_done.len();
    checkpoint.touch();
    store::save_checkpoint(&checkpoint, checkpoint_path)?;

    let checkpoint = Mutex::new(checkpoint);
    let outcome = Mutex::new(ShardOutcome {
        skipped: already_done.len(),
        ..Default::default()
    });
    let limiter = Arc::new(Semaphore::new(ctx.config.http_max_concurrency));

    let tasks = jobs.iter().map(|job| {
        let limiter = limiter.clone();
        let already_done = &already_done;
        let checkpoint = &checkpoint;
        let outcome = &outcome;
        async move {
            if already_done.contains(&job.url) {
                debug!(shard_id, position = job.position_in_shard, "already recorded, skipping");
                return;
            }
            let _permit = match limiter.acquire().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let record = router::route_and_fetch(job, ctx, pool).await;
            let status = record.status;

            // Append the record, then journal progress. Serialized so the
            // store's buffer and the checkpoint never race.
            {
                let mut store = store.lock().await;
                if let Err(error) = store.write(record) {
                    tracing::warn!(shard_id, "record write failed: {error}");
                }
            }
            {
                let mut outcome = outcome.lock().await;
                outcome.processed += 1;
                if status == Status::Success {
                    outcome.success += 1;
                }
                if matches!(
                    status,
                    Status::CaptchaDetected | Status::HttpError | Status::Timeout
                ) {
                    outcome.bad += 1;
                }
            }
            {
                let mut checkpoint = checkpoint.lock().await;
                checkpoint.urls_done += 1;
                checkpoint.touch();
                if let Err(error) = store::save_checkpoint(&checkpoint, checkpoint_path) {
                    tracing::warn!(shard_id, "checkpoint write failed: {error}");
                }
            }
        }
    });

    join_all(tasks).await;

    let mut final_checkpoint = checkpoint.into_inner();
    final_checkpoint.status = CheckpointStatus::Completed;
    final_checkpoint.touch();
    store::save_checkpoint(&final_checkpoint, checkpoint_path)?;

    // Make the shard's records durable before the batch moves on.
    store.lock().await.flush()?;

    let outcome = outcome.into_inner();
    info!(
        shard_id,
        processed = outcome.processed,
        skipped = outcome.skipped,
        success = outcome.success,
        "shard completed"
    );
    Ok(outcome)
}
