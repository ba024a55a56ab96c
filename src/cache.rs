//! Best-effort sample cache.
//!
//! Raw samples are handed to a dedicated writer thread through a bounded
//! channel, so a slow or unavailable store can never stall detection. Write
//! failures are logged and counted, nothing more.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::model::Sample;

/// Redis list holding the keys of the most recently cached samples.
pub const RECENT_SAMPLES_KEY: &str = "metrics:recent";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Log the first of a run of repeated events, then every 1000th.
fn should_log(count: u64) -> bool {
    count == 1 || count % 1000 == 0
}

/// Destination for raw samples.
pub trait SampleStore: Send {
    fn name(&self) -> &str;
    fn store(&mut self, sample: &Sample) -> Result<(), CacheError>;
}

// ============================================================================
// MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    samples: HashMap<String, Sample>,
    recent: VecDeque<String>,
}

/// Ephemeral store keeping only the newest `limit` samples.
///
/// Clones share the same contents, so a handle kept outside the writer
/// thread can read what was cached.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
    limit: usize,
}

impl MemoryStore {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner::default())),
            limit: limit.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<Sample> {
        self.lock().samples.get(key).cloned()
    }

    /// Up to `count` newest samples, newest first.
    pub fn recent(&self, count: usize) -> Vec<Sample> {
        let inner = self.lock();
        inner
            .recent
            .iter()
            .rev()
            .take(count)
            .filter_map(|key| inner.samples.get(key).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SampleStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn store(&mut self, sample: &Sample) -> Result<(), CacheError> {
        let key = sample.cache_key();
        let mut inner = self.lock();

        if inner.samples.insert(key.clone(), sample.clone()).is_none() {
            inner.recent.push_back(key);
        }
        while inner.recent.len() > self.limit {
            if let Some(old) = inner.recent.pop_front() {
                inner.samples.remove(&old);
            }
        }
        Ok(())
    }
}

// ============================================================================
// REDIS STORE
// ============================================================================

/// Samples as JSON under `metric:{device}:{nanos}` with a TTL, plus a capped
/// index list of recent keys.
pub struct RedisStore {
    client: redis::Client,
    conn: Option<redis::Connection>,
    /// No reconnect is attempted before this instant.
    retry_at: Option<Instant>,
    ttl_secs: u64,
    recent_limit: usize,
}

impl RedisStore {
    /// Connect and PING once so a bad address fails at startup.
    pub fn connect(url: &str, ttl_secs: u64, recent_limit: usize) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_connection_with_timeout(CONNECT_TIMEOUT)?;
        redis::cmd("PING").query::<String>(&mut conn)?;

        info!(ttl_secs, recent_limit, "Connected to Redis sample cache.");

        Ok(Self {
            client,
            conn: Some(conn),
            retry_at: None,
            ttl_secs,
            recent_limit: recent_limit.max(1),
        })
    }

    fn reconnect(&mut self) -> Result<redis::Connection, CacheError> {
        if self.retry_at.is_some_and(|at| Instant::now() < at) {
            return Err(CacheError::Unavailable("waiting to reconnect".into()));
        }

        debug!("Reconnecting to Redis");
        match self.client.get_connection_with_timeout(CONNECT_TIMEOUT) {
            Ok(conn) => {
                self.retry_at = None;
                Ok(conn)
            }
            Err(e) => {
                self.retry_at = Some(Instant::now() + RECONNECT_BACKOFF);
                Err(e.into())
            }
        }
    }

    fn write(
        &self,
        conn: &mut redis::Connection,
        key: &str,
        payload: &str,
    ) -> Result<(), CacheError> {
        redis::pipe()
            .atomic()
            .set_ex(key, payload, self.ttl_secs)
            .ignore()
            .lpush(RECENT_SAMPLES_KEY, key)
            .ignore()
            .ltrim(RECENT_SAMPLES_KEY, 0, self.recent_limit as isize - 1)
            .ignore()
            .query::<()>(conn)?;
        Ok(())
    }
}

impl SampleStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    fn store(&mut self, sample: &Sample) -> Result<(), CacheError> {
        let payload = serde_json::to_string(sample)?;
        let key = sample.cache_key();

        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.reconnect()?,
        };

        // A failed connection is dropped; a later sample reconnects.
        if let Err(e) = self.write(&mut conn, &key, &payload) {
            self.retry_at = Some(Instant::now() + RECONNECT_BACKOFF);
            return Err(e);
        }
        self.conn = Some(conn);
        Ok(())
    }
}

// ============================================================================
// FORWARDER
// ============================================================================

/// Totals reported by the writer thread when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheReport {
    pub stored: u64,
    pub failed: u64,
}

/// Producer side of the cache writer. Cheap to clone.
#[derive(Clone)]
pub struct CacheHandle {
    tx: Sender<Sample>,
    dropped: Arc<AtomicU64>,
}

impl CacheHandle {
    /// Hand `sample` to the writer without blocking. Returns `false` if it was dropped.
    pub fn forward(&self, sample: Sample) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(sample)) | Err(TrySendError::Disconnected(sample)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if should_log(dropped) {
                    warn!(
                        device = %sample.device_id,
                        dropped,
                        "Cache writer backlogged, sample not cached"
                    );
                }
                false
            }
        }
    }
}

pub struct CacheForwarder;

impl CacheForwarder {
    pub fn spawn(
        store: Box<dyn SampleStore>,
        capacity: usize,
    ) -> std::io::Result<(CacheHandle, thread::JoinHandle<CacheReport>)> {
        let (tx, rx) = bounded::<Sample>(capacity.max(1));

        let handle = thread::Builder::new()
            .name("pulsewatch-cache".into())
            .spawn(move || Self::run(store, rx))?;

        let cache = CacheHandle {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        Ok((cache, handle))
    }

    fn run(mut store: Box<dyn SampleStore>, rx: Receiver<Sample>) -> CacheReport {
        info!(store = store.name(), "Cache writer active.");
        let mut report = CacheReport::default();

        while let Ok(sample) = rx.recv() {
            match store.store(&sample) {
                Ok(()) => report.stored += 1,
                Err(e) => {
                    report.failed += 1;
                    if should_log(report.failed) {
                        warn!(
                            store = store.name(),
                            device = %sample.device_id,
                            failed = report.failed,
                            error = %e,
                            "Failed to cache sample"
                        );
                    }
                }
            }
        }

        info!(
            store = store.name(),
            stored = report.stored,
            failed = report.failed,
            "Cache writer stopped."
        );
        report
    }
}
