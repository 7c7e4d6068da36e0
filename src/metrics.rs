//! Run summary aggregation: rates over all records, method shares, and
//! per-method latency percentiles and content-length means.

use crate::models::{Method, RunSummary, Status, UrlRecord};

/// Nearest-rank percentile over the sorted sample:
/// `index = round(p/100 * (n-1))`, clamped to `[0, n-1]`.
pub fn percentile(values: &[i64], p: f64) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let raw = (p / 100.0 * (sorted.len() - 1) as f64).round() as i64;
    let index = raw.clamp(0, sorted.len() as i64 - 1) as usize;
    Some(sorted[index])
}

fn mean_u64(values: &[u64]) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<u64>() / values.len() as u64)
}

/// Aggregate every record into the run summary. Rates are fractions of
/// `total_urls`; latency percentiles and length means are per method and
/// `null` when the method has no qualifying rows.
pub fn compute_run_summary(records: &[UrlRecord]) -> RunSummary {
    let total = records.len();
    if total == 0 {
        return RunSummary {
            total_urls: 0,
            record_rows: 0,
            success_rate: 0.0,
            http_error_rate: 0.0,
            timeout_rate: 0.0,
            captcha_rate: 0.0,
            robots_block_rate: 0.0,
            http_share: 0.0,
            browser_share: 0.0,
            p50_latency_http_ms: None,
            p95_latency_http_ms: None,
            p50_latency_browser_ms: None,
            p95_latency_browser_ms: None,
            avg_content_len_http: None,
            avg_content_len_browser: None,
            aborted: false,
            aborted_reason: None,
        };
    }

    let count_status =
        |status: Status| records.iter().filter(|r| r.status == status).count() as f64;

    // Records with no network attempt (invalid URLs) still carry the
    // primary method tag; shares count only rows that reached a fetcher.
    let attempted = |r: &&UrlRecord| r.status != Status::InvalidUrl;
    let http_count = records
        .iter()
        .filter(attempted)
        .filter(|r| r.method == Method::Http)
        .count() as f64;
    let browser_count = records
        .iter()
        .filter(attempted)
        .filter(|r| r.method == Method::Browser)
        .count() as f64;

    let latencies = |method: Method| -> Vec<i64> {
        records
            .iter()
            .filter(|r| r.method == method)
            .filter_map(|r| r.latency_ms)
            .filter(|ms| *ms > 0)
            .collect()
    };
    let content_lens = |method: Method| -> Vec<u64> {
        records
            .iter()
            .filter(|r| r.method == method && r.content_length > 0)
            .map(|r| r.content_length)
            .collect()
    };

    let http_latencies = latencies(Method::Http);
    let browser_latencies = latencies(Method::Browser);
    let total_f = total as f64;

    RunSummary {
        total_urls: total,
        record_rows: total,
        success_rate: count_status(Status::Success) / total_f,
        http_error_rate: count_status(Status::HttpError) / total_f,
        timeout_rate: count_status(Status::Timeout) / total_f,
        captcha_rate: count_status(Status::CaptchaDetected) / total_f,
        robots_block_rate: count_status(Status::RobotsBlocked) / total_f,
        http_share: http_count / total_f,
        browser_share: browser_count / total_f,
        p50_latency_http_ms: percentile(&http_latencies, 50.0),
        p95_latency_http_ms: percentile(&http_latencies, 95.0),
        p50_latency_browser_ms: percentile(&browser_latencies, 50.0),
        p95_latency_browser_ms: percentile(&browser_latencies, 95.0),
        avg_content_len_http: mean_u64(&content_lens(Method::Http)),
        avg_content_len_browser: mean_u64(&content_lens(Method::Browser)),
        aborted: false,
        aborted_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stage;

    fn record(method: Method, status: Status, latency: Option<i64>, len: u64) -> UrlRecord {
        UrlRecord {
            url: "https://example.com".to_string(),
            host: "example.com".to_string(),
            method,
            stage: Stage::Primary,
            status,
            http_status: Some(200),
            latency_ms: latency,
            content_length: len,
            encoding: None,
            retries: 0,
            captcha_detected: status == Status::CaptchaDetected,
            robots_disallowed: status == Status::RobotsBlocked,
            block_type: None,
            block_vendor: None,
            error_kind: None,
            error_message: None,
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            shard_index: 0,
        }
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values = vec![1, 2, 3, 4, 5];
        assert_eq!(percentile(&values, 50.0), Some(3));
        assert_eq!(percentile(&values, 95.0), Some(5));
        assert_eq!(percentile(&values, 0.0), Some(1));
        assert_eq!(percentile(&values, 100.0), Some(5));
    }

    #[test]
    fn test_percentile_empty_and_single() {
        assert_eq!(percentile(&[], 50.0), None);
        assert_eq!(percentile(&[42], 50.0), Some(42));
        assert_eq!(percentile(&[42], 95.0), Some(42));
    }

    #[test]
    fn test_percentile_unsorted_input() {
        let values = vec![5, 1, 4, 2, 3];
        assert_eq!(percentile(&values, 50.0), Some(3));
    }

    #[test]
    fn test_empty_summary_is_zero_filled() {
        let summary = compute_run_summary(&[]);
        assert_eq!(summary.total_urls, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.p50_latency_http_ms, None);
        assert!(!summary.aborted);
    }

    #[test]
    fn test_rates_sum_within_bounds() {
        let records = vec![
            record(Method::Http, Status::Success, Some(10), 2048),
            record(Method::Http, Status::HttpError, Some(20), 0),
            record(Method::Browser, Status::Timeout, Some(5000), 0),
            record(Method::Http, Status::CaptchaDetected, Some(15), 512),
            record(Method::Http, Status::RobotsBlocked, None, 0),
            record(Method::Http, Status::InvalidUrl, None, 0),
        ];
        let summary = compute_run_summary(&records);
        let rate_sum = summary.success_rate
            + summary.http_error_rate
            + summary.timeout_rate
            + summary.captcha_rate
            + summary.robots_block_rate;
        assert!(rate_sum >= 0.0 && rate_sum <= 1.0);
        assert!(summary.http_share + summary.browser_share <= 1.0);
        // The invalid URL row is in the denominator but not the shares.
        assert_eq!(summary.total_urls, 6);
        assert!((summary.http_share - 4.0 / 6.0).abs() < 1e-9);
        assert!((summary.browser_share - 1.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_per_method_latency_percentiles() {
        let records = vec![
            record(Method::Http, Status::Success, Some(10), 1000),
            record(Method::Http, Status::Success, Some(20), 1000),
            record(Method::Http, Status::Success, Some(30), 1000),
            record(Method::Browser, Status::Success, Some(4000), 50_000),
        ];
        let summary = compute_run_summary(&records);
        assert_eq!(summary.p50_latency_http_ms, Some(20));
        assert_eq!(summary.p50_latency_browser_ms, Some(4000));
        assert_eq!(summary.p95_latency_browser_ms, Some(4000));
    }

    #[test]
    fn test_latency_null_when_method_has_no_rows() {
        let records = vec![record(Method::Http, Status::Success, Some(10), 1000)];
        let summary = compute_run_summary(&records);
        assert_eq!(summary.p50_latency_browser_ms, None);
        assert_eq!(summary.avg_content_len_browser, None);
    }

    #[test]
    fn test_mean_content_length_over_positive_rows() {
        let records = vec![
            record(Method::Http, Status::Success, Some(10), 1000),
            record(Method::Http, Status::Success, Some(10), 3000),
            record(Method::Http, Status::HttpError, Some(10), 0),
        ];
        let summary = compute_run_summary(&records);
        assert_eq!(summary.avg_content_len_http, Some(2000));
    }

    #[test]
    fn test_happy_path_summary_shape() {
        let records = vec![record(Method::Http, Status::Success, Some(12), 2048)];
        let summary = compute_run_summary(&records);
        assert_eq!(summary.success_rate, 1.0);
        assert_eq!(summary.http_share, 1.0);
        assert_eq!(summary.browser_share, 0.0);
    }
}
