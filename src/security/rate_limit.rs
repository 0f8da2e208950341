//! Sliding-window rate limiting.
//!
//! # Responsibilities
//! - Answer "may this key act again?" without consuming quota (`check_limit`)
//! - Record that an attempt happened (`record_attempt`)
//! - Keep window state in a swappable store
//!
//! # Design Decisions
//! - Windows are lists of millisecond timestamps; pruning happens on check
//! - A key exactly at `max_count` is rejected (strict less-than)
//! - Store is bounded: least-recently-accessed keys are evicted on overflow,
//!   and idle keys expire or are dropped by a periodic sweep
//! - Windows are pruned in place, never overwritten with a stale copy
//! - Per-process state; concurrent checks may both see the pre-record count

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::time;

use crate::observability::metrics;

/// Source of the current time in milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Storage for per-key attempt timestamps.
///
/// Implement this over a shared key-value cache to make limits global across
/// instances; the in-memory store only sees one process.
pub trait WindowStore: Send + Sync {
    /// Timestamps recorded for `key`, empty if unseen.
    fn get(&self, key: &str, now_ms: u64) -> Vec<u64>;

    /// Replace the timestamps for `key`.
    fn set(&self, key: &str, timestamps: Vec<u64>, now_ms: u64);

    /// Drop timestamps for `key` older than `cutoff_ms` in place and return how
    /// many remain. `None` if the key is unseen; nothing is created for it.
    fn prune(&self, key: &str, cutoff_ms: u64, now_ms: u64) -> Option<usize>;

    /// Append one timestamp for `key`.
    fn append(&self, key: &str, timestamp: u64);

    /// Drop keys not accessed since `idle_before`. Returns how many were removed.
    fn sweep(&self, idle_before: u64) -> usize;

    /// Number of tracked keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct WindowEntry {
    timestamps: Vec<u64>,
    last_access: u64,
}

type SharedEntry = Arc<Mutex<WindowEntry>>;

fn lock(entry: &SharedEntry) -> MutexGuard<'_, WindowEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded in-memory store.
///
/// Backed by a `moka` cache with LRU eviction at `max_keys`, so a full store
/// evicts in constant time. Each window sits behind its own mutex and is
/// pruned and appended in place.
pub struct InMemoryWindowStore {
    entries: Cache<String, SharedEntry>,
}

impl InMemoryWindowStore {
    pub fn new(max_keys: usize) -> Self {
        Self::build(max_keys, None)
    }

    /// Store that also expires keys untouched for `idle`.
    pub fn with_idle_expiry(max_keys: usize, idle: Duration) -> Self {
        Self::build(max_keys, Some(idle))
    }

    fn build(max_keys: usize, idle: Option<Duration>) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(max_keys.max(1) as u64)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(|key: Arc<String>, _, cause| {
                if cause == RemovalCause::Size {
                    tracing::debug!(key = %key, "Evicted rate limit window");
                }
            });
        if let Some(idle) = idle {
            builder = builder.time_to_idle(idle);
        }

        Self {
            entries: builder.build(),
        }
    }
}

impl Default for InMemoryWindowStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl std::fmt::Debug for InMemoryWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryWindowStore")
            .field("keys", &self.entries.entry_count())
            .finish()
    }
}

impl WindowStore for InMemoryWindowStore {
    fn get(&self, key: &str, now_ms: u64) -> Vec<u64> {
        match self.entries.get(key) {
            Some(entry) => {
                let mut entry = lock(&entry);
                entry.last_access = now_ms;
                entry.timestamps.clone()
            }
            None => Vec::new(),
        }
    }

    fn set(&self, key: &str, timestamps: Vec<u64>, now_ms: u64) {
        let entry = self.entries.get_with_by_ref(key, SharedEntry::default);
        let mut entry = lock(&entry);
        entry.timestamps = timestamps;
        entry.last_access = now_ms;
    }

    fn prune(&self, key: &str, cutoff_ms: u64, now_ms: u64) -> Option<usize> {
        let entry = self.entries.get(key)?;
        let mut entry = lock(&entry);
        entry.timestamps.retain(|&ts| ts >= cutoff_ms);
        entry.last_access = now_ms;
        Some(entry.timestamps.len())
    }

    fn append(&self, key: &str, timestamp: u64) {
        let entry = self.entries.get_with_by_ref(key, SharedEntry::default);
        let mut entry = lock(&entry);
        entry.timestamps.push(timestamp);
        entry.last_access = timestamp;
    }

    fn sweep(&self, idle_before: u64) -> usize {
        let idle: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(_, entry)| lock(entry).last_access < idle_before)
            .map(|(key, _)| key)
            .collect();
        for key in &idle {
            self.entries.invalidate(key.as_str());
        }
        idle.len()
    }

    fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }
}

/// Sliding-window limiter over an injectable store and clock.
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// In-memory limiter on the wall clock. Keys idle for `idle` expire.
    pub fn in_memory(max_keys: usize, idle: Duration) -> Self {
        Self::new(
            Arc::new(InMemoryWindowStore::with_idle_expiry(max_keys, idle)),
            Arc::new(SystemClock),
        )
    }

    /// Whether `key` may make another attempt.
    ///
    /// Prunes timestamps older than `window` in place. Does not record anything.
    pub fn check_limit(&self, key: &str, max_count: usize, window: Duration) -> bool {
        let now = self.clock.now_ms();
        let window_ms = as_millis_u64(window);
        // Keep timestamps with `now - ts < window`.
        let cutoff = if now >= window_ms { now - window_ms + 1 } else { 0 };

        match self.store.prune(key, cutoff, now) {
            Some(count) => count < max_count,
            // Nothing stored yet; don't materialize the key just for a probe.
            None => max_count > 0,
        }
    }

    /// Record that `key` made an attempt now.
    pub fn record_attempt(&self, key: &str) {
        self.store.append(key, self.clock.now_ms());
        metrics::record_rate_limit_keys(self.store.len());
    }

    /// Seconds until the oldest in-window attempt for `key` expires.
    pub fn retry_after(&self, key: &str, window: Duration) -> Duration {
        let now = self.clock.now_ms();
        let window_ms = as_millis_u64(window);
        let oldest = self
            .store
            .get(key, now)
            .into_iter()
            .filter(|&ts| now.saturating_sub(ts) < window_ms)
            .min();

        match oldest {
            Some(ts) => Duration::from_millis(ts.saturating_add(window_ms).saturating_sub(now)),
            None => Duration::ZERO,
        }
    }

    /// Drop keys idle for longer than `window`.
    pub fn sweep(&self, window: Duration) -> usize {
        let idle_before = self
            .clock
            .now_ms()
            .saturating_sub(as_millis_u64(window));
        let removed = self.store.sweep(idle_before);
        metrics::record_rate_limit_keys(self.store.len());
        removed
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

fn as_millis_u64(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}

/// Periodically sweep idle windows until shutdown.
pub fn spawn_sweeper(
    limiter: Arc<RateLimiter>,
    every: Duration,
    window: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = limiter.sweep(window);
                    if removed > 0 {
                        tracing::debug!(removed, remaining = limiter.tracked_keys(), "Swept idle rate limit windows");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate limit sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    })
}
