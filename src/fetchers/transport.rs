//! HTTP transport seam: the one-GET interface the pipeline consumes,
//! plus the shared reqwest implementation.
//!
//! The pipeline never talks to reqwest directly; everything goes through
//! [`HttpTransport`] so tests can substitute scripted responses and the
//! robots cache rides the same client and proxy as page fetches.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ProxyManager, RunConfig};

/// Decoded response handed back to the pipeline.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    pub headers: HashMap<String, String>,
    /// Body decoded to text using the declared charset, falling back to
    /// UTF-8 with replacement.
    pub body: String,
    /// Declared charset, when the response carried one.
    pub encoding: Option<String>,
}

impl TransportResponse {
    pub fn content_type(&self) -> &str {
        self.headers
            .get("content-type")
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn is_html(&self) -> bool {
        let ct = self.content_type();
        ct.contains("text/html") || ct.contains("application/xhtml+xml")
    }
}

/// Transport failure classes. `kind()` is persisted as `error_kind`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("redirect policy violated: {0}")]
    Redirect(String),
    #[error("body decode failed: {0}")]
    Decode(String),
    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "Timeout",
            TransportError::Connect(_) => "Connect",
            TransportError::Redirect(_) => "Redirect",
            TransportError::Decode(_) => "Decode",
            TransportError::Other(_) => "Transport",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

/// One HTTP GET. Implementations follow redirects, negotiate HTTP/2 where
/// available, and must tolerate concurrent calls.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// Shared reqwest-backed transport used for page fetches and robots.txt.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the shared client: compression, bounded redirects, optional
    /// SOCKS5 proxy. Per-request timeouts come in through [`HttpTransport::get`].
    pub fn new(config: &RunConfig, proxy: Option<&ProxyManager>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(Duration::from_secs(config.http_timeout_secs.min(10)))
            .pool_max_idle_per_host(config.http_max_concurrency);

        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.transport_proxy_url())?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    fn map_error(error: reqwest::Error) -> TransportError {
        let message = crate::utils::truncate_message(&error.to_string(), 200);
        if error.is_timeout() {
            TransportError::Timeout(message)
        } else if error.is_connect() {
            TransportError::Connect(message)
        } else if error.is_redirect() {
            TransportError::Redirect(message)
        } else if error.is_decode() {
            TransportError::Decode(message)
        } else {
            TransportError::Other(message)
        }
    }
}

fn charset_of(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .find_map(|part| part.trim().strip_prefix("charset="))
        .map(|cs| cs.trim_matches('"').to_lowercase())
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(Self::map_error)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        let mut header_map = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                header_map.insert(name.as_str().to_lowercase(), v.to_string());
            }
        }
        let encoding = header_map
            .get("content-type")
            .and_then(|ct| charset_of(ct));

        // `text()` decodes with the declared charset and falls back to
        // UTF-8 with replacement.
        let body = response.text().await.map_err(Self::map_error)?;

        Ok(TransportResponse {
            status,
            final_url,
            headers: header_map,
            body,
            encoding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charset_extraction() {
        assert_eq!(
            charset_of("text/html; charset=UTF-8"),
            Some("utf-8".to_string())
        );
        assert_eq!(
            charset_of("text/html; charset=\"iso-8859-1\""),
            Some("iso-8859-1".to_string())
        );
        assert_eq!(charset_of("text/html"), None);
    }

    #[test]
    fn test_is_html_detection() {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "text/html; charset=utf-8".to_string(),
        );
        let response = TransportResponse {
            status: 200,
            final_url: "https://example.com".to_string(),
            headers,
            body: String::new(),
            encoding: None,
        };
        assert!(response.is_html());

        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/pdf".to_string());
        let response = TransportResponse {
            headers,
            ..response
        };
        assert!(!response.is_html());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(TransportError::Timeout("t".into()).kind(), "Timeout");
        assert_eq!(TransportError::Connect("c".into()).kind(), "Connect");
        assert_eq!(TransportError::Other("o".into()).kind(), "Transport");
        assert!(TransportError::Timeout("t".into()).is_timeout());
        assert!(!TransportError::Connect("c".into()).is_timeout());
    }
}
