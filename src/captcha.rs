//! Block and CAPTCHA classification shared by the HTTP and browser stages.
//!
//! A pure function over `(status, final URL, headers, body prefix)`. The
//! rule ladder goes from vendor-specific widget signatures (high
//! confidence) down to generic verification phrasing that only counts
//! when paired with a blocking status code. A single weak signal is
//! reported with low confidence but does not mark the page as blocked.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identified blocking vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockVendor {
    Recaptcha,
    Hcaptcha,
    Turnstile,
    CloudflareBlock,
    GenericBlock,
}

impl BlockVendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockVendor::Recaptcha => "recaptcha",
            BlockVendor::Hcaptcha => "hcaptcha",
            BlockVendor::Turnstile => "turnstile",
            BlockVendor::CloudflareBlock => "cloudflare_block",
            BlockVendor::GenericBlock => "generic_block",
        }
    }
}

/// Classification verdict with confidence and a human-readable reason.
#[derive(Debug, Clone)]
pub struct BlockVerdict {
    pub present: bool,
    pub vendor: Option<BlockVendor>,
    pub confidence: f64,
    pub reason: String,
}

impl BlockVerdict {
    fn absent() -> Self {
        Self {
            present: false,
            vendor: None,
            confidence: 0.0,
            reason: String::new(),
        }
    }

    /// A weak signal was seen but was not enough to call the page blocked.
    pub fn is_suspected(&self) -> bool {
        !self.present && self.confidence > 0.0
    }
}

/// Only this much of the body is scanned. Enough for any challenge page;
/// bounds work on pathological responses.
const BODY_SCAN_BYTES: usize = 200_000;

/// Status codes that typically accompany an active block.
const BLOCKING_STATUSES: [u16; 3] = [403, 429, 503];

const GENERIC_PHRASES: [&str; 4] = [
    "please verify you are a human",
    "are you a robot",
    "access has been denied",
    "automation tools to browse the website",
];

const CHALLENGE_URL_PATTERNS: [&str; 5] = [
    "captcha",
    "challenge",
    "robot",
    "verify-human",
    "challenges.cloudflare.com",
];

fn body_prefix(body: &str) -> &str {
    if body.len() <= BODY_SCAN_BYTES {
        return body;
    }
    let mut end = BODY_SCAN_BYTES;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Classify an HTTP response or rendered page as blocked / CAPTCHA-gated.
///
/// Called on every HTML body the HTTP fetcher sees and on every browser
/// page snapshot. First matching vendor rule wins; the highest confidence
/// seen is kept.
pub fn classify(
    status_code: u16,
    final_url: &str,
    headers: &HashMap<String, String>,
    body: Option<&str>,
) -> BlockVerdict {
    let Some(body) = body else {
        return BlockVerdict::absent();
    };
    if body.is_empty() {
        return BlockVerdict::absent();
    }

    let body_lc = body_prefix(body).to_lowercase();
    let mut vendor: Option<BlockVendor> = None;
    let mut confidence: f64 = 0.0;
    let mut reasons: Vec<String> = Vec::new();

    // Weak supporting signals first; a vendor match below overrides them.
    let url_lc = final_url.to_lowercase();
    if CHALLENGE_URL_PATTERNS.iter().any(|p| url_lc.contains(p)) {
        confidence = confidence.max(0.5);
        reasons.push("challenge pattern in URL".to_string());
    }

    let server = headers
        .get("server")
        .map(|s| s.to_lowercase())
        .unwrap_or_default();
    let served_by_cloudflare = server.contains("cloudflare") || headers.contains_key("cf-ray");

    // Vendor widget / script signatures.
    if body_lc.contains("g-recaptcha") || body_lc.contains("recaptcha/api.js") {
        vendor = Some(BlockVendor::Recaptcha);
        confidence = 0.95;
        reasons.push("recaptcha widget/script".to_string());
    } else if body_lc.contains("h-captcha") || body_lc.contains("hcaptcha.com/1/api.js") {
        vendor = Some(BlockVendor::Hcaptcha);
        confidence = 0.95;
        reasons.push("hcaptcha widget/script".to_string());
    } else if body_lc.contains("cf-turnstile")
        || body_lc.contains("cf-turnstile-response")
        || body_lc.contains("challenges.cloudflare.com/turnstile")
    {
        vendor = Some(BlockVendor::Turnstile);
        confidence = 0.95;
        reasons.push("turnstile widget".to_string());
    }

    // Cloudflare interstitial: the browser-check phrase, or a Cloudflare
    // edge answering with a blocking status.
    if body_lc.contains("checking your browser before accessing") {
        vendor = vendor.or(Some(BlockVendor::CloudflareBlock));
        confidence = confidence.max(0.9);
        reasons.push("cloudflare browser check".to_string());
    } else if served_by_cloudflare && BLOCKING_STATUSES.contains(&status_code) {
        vendor = vendor.or(Some(BlockVendor::CloudflareBlock));
        confidence = confidence.max(0.9);
        reasons.push(format!("cloudflare edge + status {status_code}"));
    }

    // Generic verification text needs at least two phrase hits plus a
    // blocking status before it counts as a block.
    let generic_hits = GENERIC_PHRASES
        .iter()
        .filter(|p| body_lc.contains(*p))
        .count();
    if generic_hits >= 2 && BLOCKING_STATUSES.contains(&status_code) {
        vendor = vendor.or(Some(BlockVendor::GenericBlock));
        confidence = confidence.max(0.8);
        reasons.push(format!(
            "generic verification text ({generic_hits} hits) + {status_code}"
        ));
    } else if generic_hits == 1 {
        confidence = confidence.max(0.5);
        reasons.push("single generic verification phrase".to_string());
    }

    match vendor {
        Some(v) => BlockVerdict {
            present: true,
            vendor: Some(v),
            confidence,
            reason: reasons.join("; "),
        },
        None => BlockVerdict {
            present: false,
            vendor: None,
            confidence,
            reason: reasons.join("; "),
        },
    }
}

/// Markers in a successful body suggesting the page needs a JS runtime or
/// is a soft block. Used by the router's escalation predicate.
pub fn body_suggests_block_or_js(body: &str) -> bool {
    let lower = body_prefix(body).to_lowercase();
    if lower.contains("enable javascript")
        || lower.contains("please turn on javascript")
        || lower.contains("javascript is required")
    {
        return true;
    }
    GENERIC_PHRASES.iter().any(|p| lower.contains(p))
}
