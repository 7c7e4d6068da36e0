//! Robots.txt compliance with per-host caching.
//!
//! One fetch per host per process: concurrent misses for the same host
//! coalesce onto a single request. Unreachable or error responses cache
//! an empty ruleset (allow all) with one warning per host. Evaluation is
//! fail-open so a parser hiccup never blocks legitimate work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use robotstxt::DefaultMatcher;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};
use url::Url;

use crate::fetchers::transport::HttpTransport;

/// Timeout for robots.txt fetches, kept well below the page timeout.
const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Cached rules for one host. `None` content means "allow all".
#[derive(Debug, Clone)]
struct RobotsEntry {
    content: Option<String>,
}

impl RobotsEntry {
    fn allow_all() -> Self {
        Self { content: None }
    }

    fn allowed(&self, url: &str, user_agent: &str) -> bool {
        match &self.content {
            None => true,
            Some(content) if content.is_empty() => true,
            Some(content) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(content, user_agent, url)
            }
        }
    }
}

/// Process-lifetime robots.txt cache riding the shared transport.
pub struct RobotsCache {
    transport: Arc<dyn HttpTransport>,
    user_agent: String,
    entries: Mutex<HashMap<String, Arc<OnceCell<RobotsEntry>>>>,
}

impl RobotsCache {
    pub fn new(transport: Arc<dyn HttpTransport>, user_agent: &str) -> Self {
        Self {
            transport,
            user_agent: user_agent.to_string(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `url` may be fetched for `user_agent` (instance default
    /// when `None`). Any failure resolves to `true`.
    pub async fn allowed(&self, url: &str, user_agent: Option<&str>) -> bool {
        let parsed = match Url::parse(url) {
            Ok(p) => p,
            Err(_) => return true,
        };
        let host = match parsed.host_str() {
            Some(h) => h.to_string(),
            None => return true,
        };
        let scheme = parsed.scheme().to_string();

        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(host.clone()).or_default().clone()
        };

        let entry = cell
            .get_or_init(|| self.fetch_rules(scheme, host))
            .await;

        entry.allowed(url, user_agent.unwrap_or(&self.user_agent))
    }

    async fn fetch_rules(&self, scheme: String, host: String) -> RobotsEntry {
        let robots_url = format!("{scheme}://{host}/robots.txt");

        match self
            .transport
            .get(&robots_url, &[], ROBOTS_FETCH_TIMEOUT)
            .await
        {
            Ok(response) if response.status < 400 => {
                debug!(host = %host, "robots.txt cached");
                RobotsEntry {
                    content: Some(response.body),
                }
            }
            Ok(response) => {
                warn!(
                    host = %host,
                    status = response.status,
                    "robots.txt returned an error status, allowing all"
                );
                RobotsEntry::allow_all()
            }
            Err(error) => {
                warn!(
                    host = %host,
                    kind = error.kind(),
                    "robots.txt unreachable, allowing all"
                );
                RobotsEntry::allow_all()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetchers::transport::{TransportError, TransportResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubTransport {
        body: Option<String>,
        status: u16,
        fail: bool,
        fetches: AtomicUsize,
    }

    impl StubTransport {
        fn serving(body: &str) -> Self {
            Self {
                body: Some(body.to_string()),
                status: 200,
                fail: false,
                fetches: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                body: None,
                status: 0,
                fail: true,
                fetches: AtomicUsize::new(0),
            }
        }

        fn with_status(status: u16) -> Self {
            Self {
                body: Some(String::new()),
                status,
                fail: false,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for StubTransport {
        async fn get(
            &self,
            url: &str,
            _headers: &[(String, String)],
            _timeout: Duration,
        ) -> Result<TransportResponse, TransportError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransportError::Connect("refused".to_string()));
            }
            Ok(TransportResponse {
                status: self.status,
                final_url: url.to_string(),
                headers: HashMap::new(),
                body: self.body.clone().unwrap_or_default(),
                encoding: None,
            })
        }
    }

    const RULES: &str = "User-agent: *\nDisallow: /private\n";

    #[tokio::test]
    async fn test_disallowed_path_is_blocked() {
        let cache = RobotsCache::new(Arc::new(StubTransport::serving(RULES)), "TrawlerBot");
        assert!(!cache.allowed("https://x.test/private/page", None).await);
        assert!(cache.allowed("https://x.test/public", None).await);
    }

    #[tokio::test]
    async fn test_unreachable_robots_allows_all() {
        let cache = RobotsCache::new(Arc::new(StubTransport::failing()), "TrawlerBot");
        assert!(cache.allowed("https://down.test/anything", None).await);
    }

    #[tokio::test]
    async fn test_error_status_allows_all() {
        let cache = RobotsCache::new(Arc::new(StubTransport::with_status(404)), "TrawlerBot");
        assert!(cache.allowed("https://x.test/private", None).await);
    }

    #[tokio::test]
    async fn test_invalid_url_allows() {
        let cache = RobotsCache::new(Arc::new(StubTransport::serving(RULES)), "TrawlerBot");
        assert!(cache.allowed("not a url", None).await);
    }

    #[tokio::test]
    async fn test_single_fetch_per_host_under_concurrency() {
        let transport = Arc::new(StubTransport::serving(RULES));
        let cache = Arc::new(RobotsCache::new(transport.clone(), "TrawlerBot"));

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .allowed(&format!("https://x.test/page/{i}"), None)
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_hosts_fetch_separately() {
        let transport = Arc::new(StubTransport::serving(RULES));
        let cache = RobotsCache::new(transport.clone(), "TrawlerBot");
        cache.allowed("https://a.test/", None).await;
        cache.allowed("https://b.test/", None).await;
        cache.allowed("https://a.test/again", None).await;
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_user_agent_specific_rules() {
        let rules = "User-agent: BadBot\nDisallow: /\n\nUser-agent: *\nAllow: /\n";
        let cache = RobotsCache::new(Arc::new(StubTransport::serving(rules)), "TrawlerBot");
        assert!(cache.allowed("https://x.test/page", None).await);
        assert!(!cache.allowed("https://x.test/page", Some("BadBot")).await);
    }
}
