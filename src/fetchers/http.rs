//! Primary HTTP fetch path.
//!
//! One GET through the shared transport with rotated headers, robots
//! compliance, scheduler slots, CAPTCHA classification, a body-size cap,
//! and bounded retries with exponential backoff for transient failures.

use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tracing::debug;

use crate::captcha;
use crate::models::{BlockType, FetchRecord, Method, Stage, Status, UrlJob};
use crate::pipeline::RunnerContext;
use crate::utils::{host_of, safe_display_url, truncate_message};

use super::FetchFailure;

/// Realistic desktop user agents rotated per request. Major browsers
/// across operating systems so the pool does not fingerprint trivially.
pub const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) \
     Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

pub const ACCEPT_LANGUAGES: [&str; 2] = ["en-US,en;q=0.9", "en-GB,en;q=0.9"];

/// Retries for transient failures (timeouts, 429/5xx).
pub const MAX_HTTP_RETRIES: u32 = 2;

/// Statuses worth retrying: rate limits and upstream hiccups.
const TRANSIENT_STATUSES: [u16; 4] = [429, 502, 503, 504];

const BACKOFF_BASE_SECS: f64 = 0.5;

/// Randomized per-request headers.
pub fn build_headers() -> Vec<(String, String)> {
    let mut rng = rand::thread_rng();
    vec![
        (
            "User-Agent".to_string(),
            USER_AGENTS
                .choose(&mut rng)
                .copied()
                .unwrap_or(USER_AGENTS[0])
                .to_string(),
        ),
        (
            "Accept-Language".to_string(),
            ACCEPT_LANGUAGES
                .choose(&mut rng)
                .copied()
                .unwrap_or(ACCEPT_LANGUAGES[0])
                .to_string(),
        ),
    ]
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs_f64(BACKOFF_BASE_SECS * 2f64.powi(attempt.saturating_sub(1) as i32))
}

/// Fetch one URL over HTTP. Expected failures are encoded in the record;
/// the `Err` arm is reserved for failures the stage cannot express.
pub async fn fetch_one(job: &UrlJob, ctx: &RunnerContext) -> Result<FetchRecord, FetchFailure> {
    let mut record = FetchRecord::initial(job, Method::Http, Stage::Primary);
    let url = job.url.clone();
    let host = host_of(&url);
    record.host = host.clone();

    // Robots first: a disallowed URL costs no slot and no request.
    if !ctx.robots.allowed(&url, Some(USER_AGENTS[0])).await {
        record.status = Status::RobotsBlocked;
        record.robots_disallowed = true;
        record.block_type = Some(BlockType::Robots);
        return Ok(record);
    }

    let timeout = Duration::from_secs(ctx.config.http_timeout_secs);
    let mut attempt: u32 = 0;

    loop {
        ctx.scheduler.acquire(&host).await;
        let start = Instant::now();

        let response = ctx.transport.get(&url, &build_headers(), timeout).await;
        let elapsed_ms = start.elapsed().as_millis() as i64;
        record.latency_ms = Some(elapsed_ms);

        match response {
            Err(error) if error.is_timeout() => {
                record.status = Status::Timeout;
                record.error_kind = Some(error.kind().to_string());
                record.error_message = Some(truncate_message(&error.to_string(), 200));

                if attempt < MAX_HTTP_RETRIES {
                    attempt += 1;
                    record.retries = attempt;
                    ctx.scheduler.release(&host).await;
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    continue;
                }

                ctx.scheduler.record_error(&host).await;
                ctx.scheduler.release(&host).await;
                return Ok(record);
            }
            Err(error) => {
                record.status = Status::HttpError;
                record.error_kind = Some(error.kind().to_string());
                record.error_message = Some(truncate_message(&error.to_string(), 200));

                ctx.scheduler.record_error(&host).await;
                ctx.scheduler.release(&host).await;
                return Ok(record);
            }
            Ok(response) => {
                record.http_status = Some(response.status);
                record.status = if (200..400).contains(&response.status) {
                    Status::Success
                } else {
                    Status::HttpError
                };
                record.encoding = response.encoding.clone();
                record.content_length = response.body.len() as u64;

                if record.content_length > ctx.config.max_content_bytes {
                    record.status = Status::TooLarge;
                    record.body = None;
                    ctx.scheduler.release(&host).await;
                    return Ok(record);
                }

                if response.is_html() {
                    let verdict = captcha::classify(
                        response.status,
                        &response.final_url,
                        &response.headers,
                        Some(&response.body),
                    );

                    if verdict.present {
                        record.captcha_detected = true;
                        record.status = Status::CaptchaDetected;
                        record.block_type = Some(BlockType::Captcha);
                        record.block_vendor =
                            verdict.vendor.map(|v| v.as_str().to_string());
                        ctx.scheduler.record_captcha(&host).await;
                        ctx.scheduler.release(&host).await;
                        return Ok(record);
                    }
                    if verdict.is_suspected() {
                        debug!(
                            url = %safe_display_url(&url),
                            reason = %verdict.reason,
                            "suspected block signal"
                        );
                    }

                    // The body is kept only for HTML; the router's
                    // completeness check needs it.
                    record.body = Some(response.body);
                } else {
                    record.body = None;
                }

                let transient = record
                    .http_status
                    .map(|s| TRANSIENT_STATUSES.contains(&s))
                    .unwrap_or(false);
                if record.status == Status::HttpError && transient && attempt < MAX_HTTP_RETRIES {
                    attempt += 1;
                    record.retries = attempt;
                    ctx.scheduler.release(&host).await;
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    continue;
                }

                if record.status == Status::HttpError {
                    ctx.scheduler.record_error(&host).await;
                }
                ctx.scheduler.release(&host).await;
                return Ok(record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_come_from_the_pools() {
        for _ in 0..20 {
            let headers = build_headers();
            let ua = headers
                .iter()
                .find(|(n, _)| n == "User-Agent")
                .map(|(_, v)| v.clone())
                .unwrap();
            let lang = headers
                .iter()
                .find(|(n, _)| n == "Accept-Language")
                .map(|(_, v)| v.clone())
                .unwrap();
            assert!(USER_AGENTS.contains(&ua.as_str()));
            assert!(ACCEPT_LANGUAGES.contains(&lang.as_str()));
        }
    }

    #[test]
    fn test_backoff_is_exponential() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3), Duration::from_millis(2000));
    }
}
