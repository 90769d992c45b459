//! In-Memory Record Store
//!
//! A [`RecordStore`] kept entirely in process memory. Clones share state, so
//! several electors in one process can contend for the same lock exactly as
//! they would through a real database. Timestamps used for expiry come from the
//! tokio clock, which keeps paused-time tests deterministic.

use crate::store::{ElectionRecord, InsertResult, RecordStore, StoreError, UpdateResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Sweep delay until an elector tunes it, like a store whose expiry monitor
/// runs once a minute.
pub const DEFAULT_SWEEP_DELAY: Duration = Duration::from_secs(60);

/// Store operations, used for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Ping,
    TuneExpirySweep,
    EnsureNamespace,
    ConfigureExpiry,
    ExpiryRule,
    DropExpiry,
    ConditionalInsert,
    ConditionalUpdate,
    FindOne,
}

#[derive(Debug)]
struct StoredRecord {
    record: ElectionRecord,
    acquired: Instant,
}

#[derive(Debug, Default)]
struct Namespace {
    record: Option<StoredRecord>,
    expiry_secs: Option<u64>,
}

impl Namespace {
    /// Drops the record once its expiry deadline plus the sweep delay has passed.
    fn purge_expired(&mut self, now: Instant, sweep_delay: Duration) {
        let (Some(ttl), Some(stored)) = (self.expiry_secs, self.record.as_ref()) else {
            return;
        };
        if stored.acquired + Duration::from_secs(ttl) + sweep_delay <= now {
            tracing::debug!(
                holder = %stored.record.holder_identity,
                "Expired election record removed"
            );
            self.record = None;
        }
    }
}

#[derive(Debug)]
struct MemoryState {
    namespaces: HashMap<String, Namespace>,
    sweep_delay: Duration,
    latency: Duration,
    available: bool,
    failures: HashMap<StoreOp, VecDeque<StoreError>>,
    calls: HashMap<StoreOp, usize>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            namespaces: HashMap::new(),
            sweep_delay: DEFAULT_SWEEP_DELAY,
            latency: Duration::ZERO,
            available: true,
            failures: HashMap::new(),
            calls: HashMap::new(),
        }
    }
}

impl MemoryState {
    fn namespace_mut(&mut self, key: &str) -> Result<&mut Namespace, StoreError> {
        let sweep_delay = self.sweep_delay;
        let ns = self
            .namespaces
            .get_mut(key)
            .ok_or_else(|| StoreError::Backend(format!("namespace '{}' does not exist", key)))?;
        ns.purge_expired(Instant::now(), sweep_delay);
        Ok(ns)
    }
}

/// Shared in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds artificial latency before every operation takes effect.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = latency;
    }

    /// Makes every subsequent operation fail with [`StoreError::Unavailable`] while `false`.
    pub fn set_available(&self, available: bool) {
        self.inner.lock().available = available;
    }

    /// Queues `err` as the result of the next call to `op`.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.inner.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Number of calls made to `op` so far, including failed ones.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Current expiry-sweep delay.
    pub fn sweep_delay(&self) -> Duration {
        self.inner.lock().sweep_delay
    }

    /// Pre-installs an expiry rule, creating the namespace if needed.
    pub fn install_expiry(&self, key: &str, ttl_secs: u64) {
        let mut state = self.inner.lock();
        state.namespaces.entry(key.to_string()).or_default().expiry_secs = Some(ttl_secs);
    }

    /// Returns the installed expiry rule for `key`, bypassing call accounting.
    pub fn expiry_of(&self, key: &str) -> Option<u64> {
        self.inner
            .lock()
            .namespaces
            .get(key)
            .and_then(|ns| ns.expiry_secs)
    }

    /// Returns the current holder of `key`, honouring expiry.
    pub fn holder(&self, key: &str) -> Option<String> {
        let mut state = self.inner.lock();
        let ns = state.namespace_mut(key).ok()?;
        ns.record.as_ref().map(|s| s.record.holder_identity.clone())
    }

    /// Removes the record for `key` as if the expiry sweep had collected it.
    pub fn evict(&self, key: &str) -> Option<ElectionRecord> {
        let mut state = self.inner.lock();
        state
            .namespaces
            .get_mut(key)
            .and_then(|ns| ns.record.take())
            .map(|s| s.record)
    }

    async fn begin(&self, op: StoreOp) -> Result<(), StoreError> {
        let latency = {
            let mut state = self.inner.lock();
            *state.calls.entry(op).or_default() += 1;
            state.latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.inner.lock();
        if !state.available {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        match state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    type Namespace = String;

    async fn ping(&self) -> Result<(), StoreError> {
        self.begin(StoreOp::Ping).await
    }

    async fn tune_expiry_sweep(&self, interval: Duration) -> Result<(), StoreError> {
        self.begin(StoreOp::TuneExpirySweep).await?;
        self.inner.lock().sweep_delay = interval;
        Ok(())
    }

    async fn ensure_namespace(&self, key: &str) -> Result<String, StoreError> {
        self.begin(StoreOp::EnsureNamespace).await?;
        let mut state = self.inner.lock();
        if !state.namespaces.contains_key(key) {
            tracing::debug!(namespace = key, "Creating namespace");
            state.namespaces.insert(key.to_string(), Namespace::default());
        }
        Ok(key.to_string())
    }

    async fn configure_expiry(&self, ns: &String, ttl_secs: u64) -> Result<(), StoreError> {
        self.begin(StoreOp::ConfigureExpiry).await?;
        let mut state = self.inner.lock();
        let namespace = state.namespace_mut(ns)?;
        match namespace.expiry_secs {
            Some(existing) if existing != ttl_secs => Err(StoreError::ExpiryConflict {
                existing,
                requested: ttl_secs,
            }),
            _ => {
                namespace.expiry_secs = Some(ttl_secs);
                Ok(())
            }
        }
    }

    async fn expiry_rule(&self, ns: &String) -> Result<Option<u64>, StoreError> {
        self.begin(StoreOp::ExpiryRule).await?;
        let mut state = self.inner.lock();
        Ok(state.namespace_mut(ns)?.expiry_secs)
    }

    async fn drop_expiry(&self, ns: &String) -> Result<(), StoreError> {
        self.begin(StoreOp::DropExpiry).await?;
        let mut state = self.inner.lock();
        state.namespace_mut(ns)?.expiry_secs = None;
        Ok(())
    }

    async fn conditional_insert(
        &self,
        ns: &String,
        record: &ElectionRecord,
    ) -> Result<InsertResult, StoreError> {
        self.begin(StoreOp::ConditionalInsert).await?;
        let mut state = self.inner.lock();
        let namespace = state.namespace_mut(ns)?;
        if namespace.record.is_some() {
            return Ok(InsertResult { inserted: false });
        }

        namespace.record = Some(StoredRecord {
            record: ElectionRecord {
                holder_identity: record.holder_identity.clone(),
                acquired_at: SystemTime::now(),
            },
            acquired: Instant::now(),
        });
        Ok(InsertResult { inserted: true })
    }

    async fn conditional_update(&self, ns: &String, holder: &str) -> Result<UpdateResult, StoreError> {
        self.begin(StoreOp::ConditionalUpdate).await?;
        let mut state = self.inner.lock();
        let namespace = state.namespace_mut(ns)?;
        match namespace.record.as_mut() {
            Some(stored) if stored.record.holder_identity == holder => {
                stored.record.acquired_at = SystemTime::now();
                stored.acquired = Instant::now();
                Ok(UpdateResult { matched: true })
            }
            _ => Ok(UpdateResult { matched: false }),
        }
    }

    async fn find_one(&self, ns: &String, holder: &str) -> Result<Option<ElectionRecord>, StoreError> {
        self.begin(StoreOp::FindOne).await?;
        let mut state = self.inner.lock();
        let namespace = state.namespace_mut(ns)?;
        Ok(namespace
            .record
            .as_ref()
            .filter(|s| s.record.holder_identity == holder)
            .map(|s| s.record.clone()))
    }
}
