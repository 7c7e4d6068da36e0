//! Small shared helpers: log-safe URLs, atomic file writes, timestamps.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use url::Url;

/// Current UTC time as an ISO-8601 string with millisecond precision.
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Host portion of a URL, or an empty string when the URL has none.
pub fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

/// Strip query and fragment from a URL and truncate it for logging.
///
/// Query strings routinely carry tokens and search terms; they must never
/// reach the logs.
pub fn safe_display_url(raw: &str) -> String {
    let stripped = match Url::parse(raw) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => raw.to_string(),
    };
    stripped.chars().take(80).collect()
}

/// Truncate an error message to a length that is safe to persist and log.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    message.chars().take(max_chars).collect()
}

/// Write a file atomically via write-then-rename.
///
/// A crashed process never leaves a partially written file at `path`.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Serialize a value as pretty JSON and write it atomically.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())?;
    Ok(())
}

/// Clamp an integer to a safe range.
pub fn clamp<T: Ord>(value: T, lower: T, upper: T) -> T {
    value.max(lower).min(upper)
}
