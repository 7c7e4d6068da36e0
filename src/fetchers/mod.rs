//! Fetch stages: the primary HTTP path and the browser fallback, plus the
//! transport and engine seams they run on.

pub mod browser;
pub mod engine;
pub mod http;
pub mod transport;

pub use browser::BrowserPool;
pub use engine::{BrowserEngine, ChromiumEngine, EngineError, PageRequest, PageSnapshot};
pub use transport::{HttpTransport, ReqwestTransport, TransportError, TransportResponse};

use thiserror::Error;

/// Unexpected failure escaping a fetch stage. Expected outcomes (errors,
/// timeouts, blocks) are encoded in the `FetchRecord` itself; this type
/// only carries failures the stage could not convert, and the router
/// turns it into an `other_error` record. Nothing propagates past the
/// router.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("browser engine failure: {0}")]
    Engine(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

impl FetchFailure {
    /// Class name persisted as `error_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchFailure::Engine(_) => "EngineFailure",
            FetchFailure::Internal(_) => "Internal",
        }
    }
}
