//! Core data model: jobs, per-URL records, run summary, shard checkpoints.
//!
//! `FetchRecord` is the in-memory result of one stage attempt and may carry
//! the page body. `UrlRecord` is the persisted form: the body is stripped
//! and the finish time becomes the record timestamp. Every attempted job
//! produces exactly one `UrlRecord`.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::utils;

/// Fetch method used for a stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Http,
    Browser,
}

/// Processing stage: the initial HTTP attempt or the browser fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Primary,
    Fallback,
}

/// Outcome status of one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    CaptchaDetected,
    RobotsBlocked,
    HttpError,
    Timeout,
    InvalidUrl,
    TooLarge,
    OtherError,
}

/// Coarse blocking category recorded alongside the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    None,
    Captcha,
    RateLimit,
    Robots,
    Other,
}

/// One URL to be processed, enriched with shard coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlJob {
    pub url: String,
    pub shard_index: usize,
    pub position_in_shard: usize,
    /// Optional loader hint that the URL is known to require JavaScript.
    pub hint_dynamic: Option<bool>,
}

/// In-memory result of one stage attempt. Never persisted as-is.
#[derive(Debug, Clone)]
pub struct FetchRecord {
    pub url: String,
    pub host: String,
    pub method: Method,
    pub stage: Stage,
    pub status: Status,
    pub http_status: Option<u16>,
    pub latency_ms: Option<i64>,
    pub content_length: u64,
    pub encoding: Option<String>,
    pub retries: u32,
    pub captcha_detected: bool,
    pub robots_disallowed: bool,
    pub block_type: Option<BlockType>,
    pub block_vendor: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub started_at: String,
    pub finished_at: String,
    pub shard_index: usize,
    /// Full page body. In-memory only; stripped before persistence.
    pub body: Option<String>,
}

impl FetchRecord {
    /// Initial record for a stage attempt. Status starts pessimistic and is
    /// updated as the attempt progresses.
    pub fn initial(job: &UrlJob, method: Method, stage: Stage) -> Self {
        let started_at = utils::utc_now_iso();
        Self {
            url: job.url.clone(),
            host: String::new(),
            method,
            stage,
            status: Status::OtherError,
            http_status: None,
            latency_ms: None,
            content_length: 0,
            encoding: None,
            retries: 0,
            captcha_detected: false,
            robots_disallowed: false,
            block_type: None,
            block_vendor: None,
            error_kind: None,
            error_message: None,
            finished_at: started_at.clone(),
            started_at,
            shard_index: job.shard_index,
            body: None,
        }
    }

    /// Convert into the persisted form, dropping the body and stamping the
    /// finish time.
    pub fn into_url_record(mut self) -> UrlRecord {
        self.finished_at = utils::utc_now_iso();
        UrlRecord {
            url: self.url,
            host: self.host,
            method: self.method,
            stage: self.stage,
            status: self.status,
            http_status: self.http_status,
            latency_ms: self.latency_ms,
            content_length: self.content_length,
            encoding: self.encoding,
            retries: self.retries,
            captcha_detected: self.captcha_detected,
            robots_disallowed: self.robots_disallowed,
            block_type: self.block_type,
            block_vendor: self.block_vendor,
            error_kind: self.error_kind,
            error_message: self.error_message,
            timestamp: self.finished_at,
            shard_index: self.shard_index,
        }
    }
}

/// Persisted per-URL outcome, one JSON line in the records file.
///
/// Readers must tolerate unknown fields; this struct therefore derives a
/// plain `Deserialize` without `deny_unknown_fields`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub host: String,
    pub method: Method,
    pub stage: Stage,
    pub status: Status,
    pub http_status: Option<u16>,
    pub latency_ms: Option<i64>,
    pub content_length: u64,
    pub encoding: Option<String>,
    pub retries: u32,
    pub captcha_detected: bool,
    pub robots_disallowed: bool,
    pub block_type: Option<BlockType>,
    pub block_vendor: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub timestamp: String,
    pub shard_index: usize,
}

/// Aggregate statistics for an entire run.
///
/// The schema is append-only: fields may be added but never renamed or
/// removed, so downstream consumers keep working across versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_urls: usize,
    pub record_rows: usize,
    pub success_rate: f64,
    pub http_error_rate: f64,
    pub timeout_rate: f64,
    pub captcha_rate: f64,
    pub robots_block_rate: f64,
    pub http_share: f64,
    pub browser_share: f64,
    pub p50_latency_http_ms: Option<i64>,
    pub p95_latency_http_ms: Option<i64>,
    pub p50_latency_browser_ms: Option<i64>,
    pub p95_latency_browser_ms: Option<i64>,
    pub avg_content_len_http: Option<u64>,
    pub avg_content_len_browser: Option<u64>,
    pub aborted: bool,
    pub aborted_reason: Option<String>,
}

/// Shard processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Per-shard progress journal, persisted after each completed URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardCheckpoint {
    pub run_id: String,
    pub shard_id: usize,
    pub urls_total: usize,
    pub urls_done: usize,
    pub last_updated_at: String,
    pub status: CheckpointStatus,
}

impl ShardCheckpoint {
    pub fn new(run_id: &str, shard_id: usize, urls_total: usize) -> Self {
        Self {
            run_id: run_id.to_string(),
            shard_id,
            urls_total,
            urls_done: 0,
            last_updated_at: utils::utc_now_iso(),
            status: CheckpointStatus::Pending,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated_at = utils::utc_now_iso();
    }
}

/// Structural URL validation: absolute http(s) URL with a host.
///
/// Jobs failing this check are recorded as `invalid_url` without any
/// network activity.
pub fn is_valid_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some(),
        Err(_) => false,
    }
}
