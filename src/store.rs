//! Input loading, the buffered JSONL result store, and checkpoint IO.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use crate::models::{ShardCheckpoint, UrlJob, UrlRecord};
use crate::utils::atomic_write_json;

// ---- input loading ----

/// Load URLs from a line-delimited text file. Blank lines are skipped;
/// a missing file yields an empty list.
pub fn load_urls_from_txt(path: &Path) -> Vec<String> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load URLs from a single-column CSV. The column is found by header
/// name (default `url`); a headerless single-column file also works.
pub fn load_urls_from_csv(path: &Path, column: &str) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading CSV at {}", path.display()))?;
    let mut lines = raw.lines();

    let header = lines.next().unwrap_or_default();
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let index = columns.iter().position(|c| *c == column);

    let mut urls = Vec::new();
    // Headerless single-column file: the first line is data.
    if index.is_none() {
        let first = header.trim();
        if !first.is_empty() && !first.contains(',') {
            urls.push(first.to_string());
        } else {
            anyhow::bail!("CSV at {} has no '{column}' column", path.display());
        }
    }
    let index = index.unwrap_or(0);

    for line in lines {
        let value = line.split(',').nth(index).unwrap_or("").trim();
        if !value.is_empty() {
            urls.push(value.to_string());
        }
    }
    Ok(urls)
}

/// Derive the canonical line-delimited URLs file from a CSV source if it
/// does not already exist.
pub fn ensure_canonical_urls_file(raw_csv: &Path, canonical_txt: &Path) -> anyhow::Result<PathBuf> {
    if canonical_txt.exists() {
        return Ok(canonical_txt.to_path_buf());
    }
    let urls = load_urls_from_csv(raw_csv, "url")?;
    if let Some(parent) = canonical_txt.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(canonical_txt, urls.join("\n"))?;
    Ok(canonical_txt.to_path_buf())
}

// ---- jobs and shards ----

/// Build jobs from raw URLs. Validation happens in the router so that
/// invalid entries still produce exactly one record each.
pub fn make_url_jobs(urls: &[String]) -> Vec<UrlJob> {
    urls.iter()
        .enumerate()
        .map(|(index, url)| UrlJob {
            url: url.clone(),
            shard_index: 0,
            position_in_shard: index,
            hint_dynamic: None,
        })
        .collect()
}

/// Split jobs into shards of `shard_size`, assigning shard coordinates.
pub fn make_shards(jobs: Vec<UrlJob>, shard_size: usize) -> Vec<Vec<UrlJob>> {
    let shard_size = shard_size.max(1);
    let mut shards: Vec<Vec<UrlJob>> = Vec::new();
    for (index, mut job) in jobs.into_iter().enumerate() {
        let shard_index = index / shard_size;
        job.shard_index = shard_index;
        job.position_in_shard = index % shard_size;
        if shards.len() <= shard_index {
            shards.push(Vec::new());
        }
        shards[shard_index].push(job);
    }
    shards
}

// ---- result store ----

/// Buffered appender for the records file. Line-delimited JSON, UTF-8,
/// non-ASCII preserved. Not safe for concurrent writers: the shard
/// runner serializes access through one instance.
pub struct ResultStore {
    path: PathBuf,
    buffer: Vec<UrlRecord>,
    buffer_size: usize,
}

impl ResultStore {
    pub fn new(path: PathBuf, buffer_size: usize) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            buffer: Vec::new(),
            buffer_size: buffer_size.max(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove any existing records file; used when a fresh run id starts.
    pub fn truncate(&mut self) -> anyhow::Result<()> {
        self.buffer.clear();
        if self.path.exists() {
            std::fs::write(&self.path, "")?;
        }
        Ok(())
    }

    /// Buffer one record, flushing when the buffer fills.
    pub fn write(&mut self, record: UrlRecord) -> anyhow::Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Append all buffered records to disk.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for record in &self.buffer {
            let line = serde_json::to_string(record)?;
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        debug!(count = self.buffer.len(), "records flushed");
        self.buffer.clear();
        Ok(())
    }

    /// Flush the tail. Call when the run finishes.
    pub fn close(&mut self) -> anyhow::Result<()> {
        self.flush()
    }
}

impl Drop for ResultStore {
    fn drop(&mut self) {
        if let Err(error) = self.flush() {
            warn!("result store flush on drop failed: {error}");
        }
    }
}

/// Read all records back. Unknown fields are ignored; unparsable lines
/// are skipped with a warning rather than failing the aggregation.
pub fn read_records(path: &Path) -> Vec<UrlRecord> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut records = Vec::new();
    for (number, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<UrlRecord>(line) {
            Ok(record) => records.push(record),
            Err(error) => warn!(line = number + 1, "skipping bad record line: {error}"),
        }
    }
    records
}

/// URLs already recorded for one shard; lets an interrupted shard resume
/// without duplicating records.
pub fn recorded_urls_for_shard(path: &Path, shard_index: usize) -> HashSet<String> {
    read_records(path)
        .into_iter()
        .filter(|r| r.shard_index == shard_index)
        .map(|r| r.url)
        .collect()
}

// ---- checkpoints ----

pub fn checkpoint_path(checkpoints_dir: &Path, run_id: &str, shard_id: usize) -> PathBuf {
    checkpoints_dir.join(format!("{run_id}_shard_{shard_id}.json"))
}

/// Atomic write-then-rename; a crashed run never leaves partial JSON.
pub fn save_checkpoint(checkpoint: &ShardCheckpoint, path: &Path) -> anyhow::Result<()> {
    atomic_write_json(path, checkpoint)
}

pub fn load_checkpoint(path: &Path) -> Option<ShardCheckpoint> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(checkpoint) => Some(checkpoint),
        Err(error) => {
            warn!(path = %path.display(), "unreadable checkpoint ignored: {error}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckpointStatus, Method, Stage, Status};

    fn record(url: &str, shard_index: usize) -> UrlRecord {
        UrlRecord {
            url: url.to_string(),
            host: "example.com".to_string(),
            method: Method::Http,
            stage: Stage::Primary,
            status: Status::Success,
            http_status: Some(200),
            latency_ms: Some(10),
            content_length: 2048,
            encoding: Some("utf-8".to_string()),
            retries: 0,
            captcha_detected: false,
            robots_disallowed: false,
            block_type: None,
            block_vendor: None,
            error_kind: None,
            error_message: None,
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            shard_index,
        }
    }

    #[test]
    fn test_load_urls_from_txt_skips_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(&path, "https://a.test\n\n  \nhttps://b.test\n").unwrap();
        assert_eq!(
            load_urls_from_txt(&path),
            vec!["https://a.test", "https://b.test"]
        );
    }

    #[test]
    fn test_load_urls_missing_file_is_empty() {
        assert!(load_urls_from_txt(Path::new("/nonexistent/urls.txt")).is_empty());
    }

    #[test]
    fn test_load_urls_from_csv_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.csv");
        std::fs::write(&path, "id,url\n1,https://a.test\n2,https://b.test\n").unwrap();
        assert_eq!(
            load_urls_from_csv(&path, "url").unwrap(),
            vec!["https://a.test", "https://b.test"]
        );
    }

    #[test]
    fn test_load_urls_from_headerless_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.csv");
        std::fs::write(&path, "https://a.test\nhttps://b.test\n").unwrap();
        assert_eq!(
            load_urls_from_csv(&path, "url").unwrap(),
            vec!["https://a.test", "https://b.test"]
        );
    }

    #[test]
    fn test_ensure_canonical_urls_file() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("raw.csv");
        let txt = dir.path().join("urls.txt");
        std::fs::write(&csv, "url\nhttps://a.test\n").unwrap();

        ensure_canonical_urls_file(&csv, &txt).unwrap();
        assert_eq!(load_urls_from_txt(&txt), vec!["https://a.test"]);

        // Second call leaves the existing canonical file alone.
        std::fs::write(&csv, "url\nhttps://changed.test\n").unwrap();
        ensure_canonical_urls_file(&csv, &txt).unwrap();
        assert_eq!(load_urls_from_txt(&txt), vec!["https://a.test"]);
    }

    #[test]
    fn test_make_shards_assigns_coordinates() {
        let urls: Vec<String> = (0..5).map(|i| format!("https://s{i}.test")).collect();
        let shards = make_shards(make_url_jobs(&urls), 2);
        assert_eq!(shards.len(), 3);
        assert_eq!(shards[0].len(), 2);
        assert_eq!(shards[2].len(), 1);
        assert_eq!(shards[1][1].shard_index, 1);
        assert_eq!(shards[1][1].position_in_shard, 1);
        assert_eq!(shards[2][0].shard_index, 2);
        assert_eq!(shards[2][0].position_in_shard, 0);
    }

    #[test]
    fn test_result_store_buffers_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        let mut store = ResultStore::new(path.clone(), 3).unwrap();

        store.write(record("https://a.test", 0)).unwrap();
        store.write(record("https://b.test", 0)).unwrap();
        // Below the buffer size: nothing on disk yet.
        assert!(read_records(&path).is_empty());

        store.write(record("https://c.test", 0)).unwrap();
        assert_eq!(read_records(&path).len(), 3);

        store.write(record("https://d.test", 0)).unwrap();
        store.close().unwrap();
        assert_eq!(read_records(&path).len(), 4);
    }

    #[test]
    fn test_result_store_preserves_non_ascii() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        let mut store = ResultStore::new(path.clone(), 1).unwrap();
        store.write(record("https://ünïcode.test/страница", 0)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("страница"));
        assert_eq!(read_records(&path)[0].url, "https://ünïcode.test/страница");
    }

    #[test]
    fn test_read_records_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        let good = serde_json::to_string(&record("https://a.test", 0)).unwrap();
        std::fs::write(&path, format!("{good}\nnot json\n\n{good}\n")).unwrap();
        assert_eq!(read_records(&path).len(), 2);
    }

    #[test]
    fn test_recorded_urls_for_shard_filters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        let mut store = ResultStore::new(path.clone(), 1).unwrap();
        store.write(record("https://a.test", 0)).unwrap();
        store.write(record("https://b.test", 1)).unwrap();

        let shard0 = recorded_urls_for_shard(&path, 0);
        assert!(shard0.contains("https://a.test"));
        assert!(!shard0.contains("https://b.test"));
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), "run-1", 2);
        assert!(load_checkpoint(&path).is_none());

        let mut checkpoint = ShardCheckpoint::new("run-1", 2, 10);
        checkpoint.status = CheckpointStatus::InProgress;
        checkpoint.urls_done = 4;
        save_checkpoint(&checkpoint, &path).unwrap();

        let loaded = load_checkpoint(&path).unwrap();
        assert_eq!(loaded.run_id, "run-1");
        assert_eq!(loaded.shard_id, 2);
        assert_eq!(loaded.urls_done, 4);
        assert_eq!(loaded.status, CheckpointStatus::InProgress);
    }

    #[test]
    fn test_corrupt_checkpoint_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{truncated").unwrap();
        assert!(load_checkpoint(&path).is_none());
    }

    #[test]
    fn test_truncate_clears_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        let mut store = ResultStore::new(path.clone(), 1).unwrap();
        store.write(record("https://a.test", 0)).unwrap();
        assert_eq!(read_records(&path).len(), 1);

        store.truncate().unwrap();
        assert!(read_records(&path).is_empty());
    }
}
