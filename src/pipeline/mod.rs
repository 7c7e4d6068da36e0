//! Pipeline orchestration: the per-URL router, the shard runner, and the
//! batch runner that composes them.

pub mod batch;
pub mod router;
pub mod shard;

pub use batch::{run_batch, BatchOptions, EngineFactory};
pub use router::{needs_browser, route_and_fetch};
pub use shard::{run_shard, ShardOutcome};

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::RunConfig;
use crate::fetchers::transport::HttpTransport;
use crate::robots::RobotsCache;
use crate::scheduler::DomainScheduler;
use crate::stealth::{DeviceProfile, StorageState};

/// Shared collaborators for the lifetime of a batch: configuration, the
/// scheduler, the robots cache, the HTTP transport, and the stealth
/// identity in use. The browser pool is deliberately absent; it is owned
/// per shard.
#[derive(Clone)]
pub struct RunnerContext {
    pub config: Arc<RunConfig>,
    pub scheduler: Arc<DomainScheduler>,
    pub robots: Arc<RobotsCache>,
    pub transport: Arc<dyn HttpTransport>,
    /// Device profile for this run (session-sticky when a session is used).
    pub profile: DeviceProfile,
    /// Seed for session-stable fingerprint perturbations.
    pub session_seed: u64,
    /// Latest storage snapshot; persisted to the session store at batch end.
    pub session_storage: Arc<Mutex<Option<StorageState>>>,
}
