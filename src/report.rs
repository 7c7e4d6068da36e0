//! Post-run reporting: failed-URL collection for targeted re-runs and
//! baseline-vs-stealth summary comparison.

use std::path::Path;

use crate::models::{RunSummary, Status, UrlRecord};

/// URLs whose final status was anything but success, in record order.
/// These are the candidates for a targeted browser/stealth re-run.
pub fn failed_urls(records: &[UrlRecord]) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.status != Status::Success)
        .map(|r| r.url.clone())
        .collect()
}

/// Write the failed URLs as a single-column CSV (with `url` header), the
/// same shape the input loader accepts.
pub fn write_failed_urls_csv(records: &[UrlRecord], path: &Path) -> anyhow::Result<usize> {
    let failed = failed_urls(records);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = String::from("url\n");
    for url in &failed {
        out.push_str(url);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(failed.len())
}

/// One compared metric between two runs.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDelta {
    pub label: &'static str,
    pub baseline: f64,
    pub other: f64,
}

impl MetricDelta {
    pub fn delta(&self) -> f64 {
        self.other - self.baseline
    }
}

/// Compare the headline rates of two summaries (typically a no-stealth
/// baseline against a stealth run).
pub fn compare_summaries(baseline: &RunSummary, other: &RunSummary) -> Vec<MetricDelta> {
    vec![
        MetricDelta {
            label: "Success rate",
            baseline: baseline.success_rate,
            other: other.success_rate,
        },
        MetricDelta {
            label: "HTTP errors",
            baseline: baseline.http_error_rate,
            other: other.http_error_rate,
        },
        MetricDelta {
            label: "CAPTCHA rate",
            baseline: baseline.captcha_rate,
            other: other.captcha_rate,
        },
        MetricDelta {
            label: "Robots blocks",
            baseline: baseline.robots_block_rate,
            other: other.robots_block_rate,
        },
        MetricDelta {
            label: "Browser share",
            baseline: baseline.browser_share,
            other: other.browser_share,
        },
    ]
}

fn format_pct(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

/// Render the comparison as an aligned text table.
pub fn format_comparison(baseline: &RunSummary, other: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<25} {:>12} {:>12} {:>12}\n",
        "Metric", "Baseline", "Stealth", "Delta"
    ));
    for metric in compare_summaries(baseline, other) {
        out.push_str(&format!(
            "{:<25} {:>12} {:>12} {:>12}\n",
            metric.label,
            format_pct(metric.baseline),
            format_pct(metric.other),
            format_pct(metric.delta()),
        ));
    }

    let baseline_success = (baseline.total_urls as f64 * baseline.success_rate) as i64;
    let other_success = (other.total_urls as f64 * other.success_rate) as i64;
    out.push_str(&format!(
        "Successful URLs: baseline={baseline_success}, stealth={other_success}, delta={}\n",
        other_success - baseline_success
    ));
    out
}
