//! Domain-aware scheduler: global and per-host concurrency slots with
//! optional jitter and an adaptive clamp.
//!
//! Invariants: in-flight requests to host `h` never exceed the host limit
//! at acquisition time, and the global in-flight count never exceeds the
//! global limit. When a host accumulates enough errors and CAPTCHAs its
//! limit drops to 1 for the rest of the run; holders already past
//! acquisition are unaffected, only new acquisitions wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::{debug, info, warn};

/// Default per-host slot count when a host has no explicit entry.
pub const DEFAULT_HOST_LIMIT: usize = 4;

/// Combined error + CAPTCHA count at which a host is clamped to 1 slot.
pub const DEFAULT_CLAMP_THRESHOLD: u32 = 5;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub global_limit: usize,
    pub default_host_limit: usize,
    /// Hosts with tighter limits, e.g. search engines at 1.
    pub host_limits: HashMap<String, usize>,
    /// Uniform jitter in seconds applied after slot acquisition.
    pub jitter_range: Option<(f64, f64)>,
    pub clamp_threshold: u32,
}

impl SchedulerConfig {
    pub fn new(global_limit: usize) -> Self {
        Self {
            global_limit,
            default_host_limit: DEFAULT_HOST_LIMIT,
            host_limits: HashMap::new(),
            jitter_range: None,
            clamp_threshold: DEFAULT_CLAMP_THRESHOLD,
        }
    }

    pub fn with_host_limit(mut self, host: &str, limit: usize) -> Self {
        self.host_limits.insert(host.to_string(), limit);
        self
    }

    pub fn with_jitter(mut self, range: Option<(f64, f64)>) -> Self {
        self.jitter_range = range;
        self
    }
}

#[derive(Debug)]
struct HostState {
    limit: usize,
    in_flight: usize,
    errors: u32,
    captchas: u32,
    clamped: bool,
}

#[derive(Debug)]
struct HostSlots {
    state: Mutex<HostState>,
    freed: Notify,
}

/// Global + per-host concurrency limiter with adaptive clamping.
#[derive(Debug)]
pub struct DomainScheduler {
    global: Arc<Semaphore>,
    global_limit: AtomicUsize,
    hosts: Mutex<HashMap<String, Arc<HostSlots>>>,
    config: SchedulerConfig,
}

impl DomainScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            global: Arc::new(Semaphore::new(config.global_limit)),
            global_limit: AtomicUsize::new(config.global_limit),
            hosts: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Current global slot count (after any guardrail reductions).
    pub fn global_limit(&self) -> usize {
        self.global_limit.load(Ordering::Relaxed)
    }

    async fn host_slots(&self, host: &str) -> Arc<HostSlots> {
        let mut hosts = self.hosts.lock().await;
        hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                let limit = self
                    .config
                    .host_limits
                    .get(host)
                    .copied()
                    .unwrap_or(self.config.default_host_limit);
                Arc::new(HostSlots {
                    state: Mutex::new(HostState {
                        limit,
                        in_flight: 0,
                        errors: 0,
                        captchas: 0,
                        clamped: false,
                    }),
                    freed: Notify::new(),
                })
            })
            .clone()
    }

    /// Block until both a global slot and a host slot are free, then sleep
    /// the configured jitter. Always pair with [`DomainScheduler::release`].
    pub async fn acquire(&self, host: &str) {
        match self.global.acquire().await {
            Ok(permit) => permit.forget(),
            // The semaphore is never closed while the scheduler lives.
            Err(_) => return,
        }

        let slots = self.host_slots(host).await;
        loop {
            {
                let mut state = slots.state.lock().await;
                if state.in_flight < state.limit {
                    state.in_flight += 1;
                    break;
                }
            }
            slots.freed.notified().await;
        }

        if let Some((low, high)) = self.config.jitter_range {
            let delay = {
                let mut rng = rand::thread_rng();
                rand::Rng::gen_range(&mut rng, low..=high)
            };
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }
    }

    /// Release both slots acquired for `host`.
    pub async fn release(&self, host: &str) {
        self.global.add_permits(1);

        let slots = self.host_slots(host).await;
        let mut state = slots.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        slots.freed.notify_one();
    }

    /// Record an HTTP error for a host; may trigger the adaptive clamp.
    pub async fn record_error(&self, host: &str) {
        let slots = self.host_slots(host).await;
        let mut state = slots.state.lock().await;
        state.errors += 1;
        Self::maybe_clamp(host, &mut state, self.config.clamp_threshold);
    }

    /// Record a CAPTCHA detection for a host; may trigger the clamp.
    pub async fn record_captcha(&self, host: &str) {
        let slots = self.host_slots(host).await;
        let mut state = slots.state.lock().await;
        state.captchas += 1;
        Self::maybe_clamp(host, &mut state, self.config.clamp_threshold);
    }

    fn maybe_clamp(host: &str, state: &mut HostState, threshold: u32) {
        if state.clamped {
            return;
        }
        if state.errors + state.captchas >= threshold {
            state.clamped = true;
            state.limit = 1;
            info!(
                host,
                errors = state.errors,
                captchas = state.captchas,
                "host clamped to one slot for the rest of the run"
            );
        }
    }

    /// Permanently remove `count` global slots. Used by the batch guardrail
    /// to halve concurrency; waits until the slots are free so in-flight
    /// work is never interrupted.
    pub async fn reduce_global(&self, count: usize) {
        if count == 0 {
            return;
        }
        match self.global.acquire_many(count as u32).await {
            Ok(permits) => {
                permits.forget();
                let new_limit = self
                    .global_limit
                    .fetch_sub(count, Ordering::Relaxed)
                    .saturating_sub(count);
                warn!(removed = count, new_limit, "global concurrency reduced");
            }
            Err(_) => debug!("global semaphore closed during reduction"),
        }
    }

    /// Snapshot of error/CAPTCHA counters for a host (testing and logs).
    pub async fn host_counters(&self, host: &str) -> (u32, u32) {
        let slots = self.host_slots(host).await;
        let state = slots.state.lock().await;
        (state.errors, state.captchas)
    }

    /// Current limit for a host (testing and logs).
    pub async fn host_limit(&self, host: &str) -> usize {
        let slots = self.host_slots(host).await;
        let state = slots.state.lock().await;
        state.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn scheduler(global: usize) -> Arc<DomainScheduler> {
        Arc::new(DomainScheduler::new(SchedulerConfig::new(global)))
    }

    #[tokio::test]
    async fn test_acquire_release_roundtrip() {
        let sched = scheduler(8);
        sched.acquire("example.com").await;
        sched.release("example.com").await;
        assert_eq!(sched.host_limit("example.com").await, DEFAULT_HOST_LIMIT);
    }

    #[tokio::test]
    async fn test_per_host_cap_is_never_exceeded() {
        let sched = Arc::new(DomainScheduler::new(
            SchedulerConfig::new(32).with_host_limit("busy.test", 2),
        ));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let sched = sched.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                sched.acquire("busy.test").await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                sched.release("busy.test").await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_global_cap_is_never_exceeded() {
        let sched = scheduler(8);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..32 {
            let sched = sched.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            // Spread across hosts so only the global limit binds.
            let host = format!("host{}.test", i % 16);
            handles.push(tokio::spawn(async move {
                sched.acquire(&host).await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(3)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                sched.release(&host).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 8);
    }

    #[tokio::test]
    async fn test_adaptive_clamp_reduces_host_limit_to_one() {
        let sched = scheduler(16);
        for _ in 0..3 {
            sched.record_error("flaky.test").await;
        }
        assert_eq!(sched.host_limit("flaky.test").await, DEFAULT_HOST_LIMIT);

        sched.record_captcha("flaky.test").await;
        sched.record_captcha("flaky.test").await;
        assert_eq!(sched.host_limit("flaky.test").await, 1);

        // Further errors keep it at 1.
        sched.record_error("flaky.test").await;
        assert_eq!(sched.host_limit("flaky.test").await, 1);
    }

    #[tokio::test]
    async fn test_clamp_does_not_deadlock_existing_holders() {
        let sched = scheduler(16);

        // Take two slots, then clamp while they are held.
        sched.acquire("held.test").await;
        sched.acquire("held.test").await;
        for _ in 0..DEFAULT_CLAMP_THRESHOLD {
            sched.record_error("held.test").await;
        }
        assert_eq!(sched.host_limit("held.test").await, 1);

        // Both holders release fine; afterwards only one slot remains.
        sched.release("held.test").await;
        sched.release("held.test").await;

        sched.acquire("held.test").await;
        sched.release("held.test").await;
    }

    #[tokio::test]
    async fn test_clamped_host_serializes_new_acquisitions() {
        let sched = scheduler(16);
        for _ in 0..DEFAULT_CLAMP_THRESHOLD {
            sched.record_error("slow.test").await;
        }

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let sched = sched.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                sched.acquire("slow.test").await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                sched.release("slow.test").await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reduce_global_halves_capacity() {
        let sched = scheduler(16);
        sched.reduce_global(8).await;
        assert_eq!(sched.global_limit(), 8);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..24 {
            let sched = sched.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let host = format!("h{i}.test");
            handles.push(tokio::spawn(async move {
                sched.acquire(&host).await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                sched.release(&host).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 8);
    }

    #[tokio::test]
    async fn test_counters_are_tracked_per_host() {
        let sched = scheduler(8);
        sched.record_error("a.test").await;
        sched.record_captcha("b.test").await;
        assert_eq!(sched.host_counters("a.test").await, (1, 0));
        assert_eq!(sched.host_counters("b.test").await, (0, 1));
    }
}
