//! Strategy router: HTTP first, browser only when it would plausibly
//! improve the outcome. Produces exactly one record per job and never
//! propagates a failure.

use tracing::{debug, info};

use crate::captcha;
use crate::fetchers::{browser, http, BrowserPool};
use crate::models::{FetchRecord, Method, Stage, Status, UrlJob, UrlRecord};
use crate::utils::{host_of, safe_display_url};

use super::RunnerContext;

/// Whether an HTTP result warrants the (expensive) browser fallback.
///
/// Escalate on transport-level failure, and on success that looks
/// incomplete: tiny bodies, soft-block phrasing, or JS-required markers.
/// Robots blocks and CAPTCHAs never escalate; the browser would see the
/// same wall.
pub fn needs_browser(record: &FetchRecord, min_content_bytes: u64) -> bool {
    match record.status {
        Status::HttpError | Status::Timeout => true,
        Status::Success => {
            if record.content_length < min_content_bytes {
                return true;
            }
            record
                .body
                .as_deref()
                .map(captcha::body_suggests_block_or_js)
                .unwrap_or(false)
        }
        _ => false,
    }
}

fn failure_record(
    job: &UrlJob,
    method: Method,
    stage: Stage,
    kind: &str,
    message: String,
) -> FetchRecord {
    let mut record = FetchRecord::initial(job, method, stage);
    record.host = host_of(&job.url);
    record.status = Status::OtherError;
    record.error_kind = Some(kind.to_string());
    record.error_message = Some(crate::utils::truncate_message(&message, 200));
    record
}

/// Route one job through the two-stage strategy and produce its record.
///
/// Per-URL isolation is absolute: every failure path ends in a record,
/// so no single URL can take down a shard.
pub async fn route_and_fetch(
    job: &UrlJob,
    ctx: &RunnerContext,
    pool: Option<&BrowserPool>,
) -> UrlRecord {
    // Structural validation: no network for garbage input.
    if !crate::models::is_valid_url(&job.url) {
        let mut record = FetchRecord::initial(job, Method::Http, Stage::Primary);
        record.status = Status::InvalidUrl;
        record.error_kind = Some("InvalidUrl".to_string());
        debug!(url = %safe_display_url(&job.url), "rejected invalid URL");
        return record.into_url_record();
    }

    // Primary HTTP attempt. An escaping failure becomes a record.
    let mut record = match http::fetch_one(job, ctx).await {
        Ok(record) => record,
        Err(failure) => {
            return failure_record(
                job,
                Method::Http,
                Stage::Primary,
                failure.kind(),
                failure.to_string(),
            )
            .into_url_record();
        }
    };

    // Robots blocks and CAPTCHAs are final: escalation would be wasted.
    if matches!(
        record.status,
        Status::RobotsBlocked | Status::CaptchaDetected
    ) {
        return record.into_url_record();
    }

    if needs_browser(&record, ctx.config.min_content_bytes) {
        match pool {
            Some(pool) => {
                info!(
                    url = %safe_display_url(&job.url),
                    http_status = ?record.status,
                    "escalating to browser"
                );
                record = match browser::fetch_one(job, ctx, pool).await {
                    Ok(browser_record) => browser_record,
                    Err(failure) => failure_record(
                        job,
                        Method::Browser,
                        Stage::Fallback,
                        failure.kind(),
                        failure.to_string(),
                    ),
                };
            }
            None => {
                debug!(
                    url = %safe_display_url(&job.url),
                    http_status = ?record.status,
                    "browser needed but not available"
                );
            }
        }
    }

    record.into_url_record()
}
