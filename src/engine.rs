//! Election Engine Implementation
//!
//! Drives lease acquisition and renewal against a [`RecordStore`]. Each step
//! runs exactly one conditional write and then arms a one-shot timer for the
//! next step, so a single elector never has two writes racing each other.
//! The store's atomic conditional writes are the only coordination between
//! competing electors.

use crate::config::ElectionConfig;
use crate::identity::{derive_lock_key, generate_identity};
use crate::lifecycle::{share_start, StartPhase};
use crate::metrics::{self, ElectionMetrics, ElectionRoleMetric};
use crate::provision::provision;
use crate::store::{ElectionRecord, InsertResult, RecordStore, StoreError, UpdateResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

// ============================================================================
// ERRORS
// ============================================================================

/// Error type for elector operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ElectionError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Start failed: {0}")]
    Start(#[source] StoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Elector stopped")]
    Stopped,
}

// ============================================================================
// EVENTS AND STATE
// ============================================================================

/// Leadership signals delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderEvent {
    /// This elector acquired the lease.
    Elected,
    /// This elector lost a lease it held. Emitted once per loss.
    Revoked,
    /// A store call failed; the elector keeps retrying.
    Error(StoreError),
}

/// Observable state of an elector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectorState {
    Unprovisioned,
    Provisioning,
    Contending,
    Leading,
    Paused,
}

/// The step a pending timer will run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Elect,
    Renew,
}

#[derive(Debug)]
struct ArmedTimer {
    id: u64,
    step: Step,
    handle: AbortHandle,
}

/// Process-local bookkeeping. Never shared with other electors.
struct LocalState<N> {
    phase: StartPhase,
    namespace: Option<N>,
    paused: bool,
    holding_lease: bool,
    revoked_signaled: bool,
    /// Bumped by pause and stop; outcomes from an older epoch are dropped.
    epoch: u64,
    /// Bumped by stop; in-flight starts from an older generation are dropped.
    generation: u64,
    timer: Option<ArmedTimer>,
    next_timer_id: u64,
    events: broadcast::Sender<LeaderEvent>,
}

impl<N> LocalState<N> {
    fn new(event_capacity: usize) -> Self {
        Self {
            phase: StartPhase::Idle,
            namespace: None,
            paused: false,
            holding_lease: false,
            revoked_signaled: false,
            epoch: 0,
            generation: 0,
            timer: None,
            next_timer_id: 0,
            events: broadcast::channel(event_capacity).0,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            tracing::trace!(timer_id = timer.id, step = ?timer.step, "Cancelling timer");
            timer.handle.abort();
        }
    }

    fn emit(&self, event: LeaderEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ============================================================================
// ELECTOR
// ============================================================================

struct ElectorInner<S: RecordStore> {
    identity: String,
    lock_key: String,
    config: ElectionConfig,
    store: S,
    metrics: ElectionMetrics,
    state: Mutex<LocalState<S::Namespace>>,
}

/// Lease-based leader elector.
///
/// Cloning yields another handle to the same elector. Dropping every handle
/// ends the election loop.
pub struct Elector<S: RecordStore> {
    inner: Arc<ElectorInner<S>>,
}

impl<S: RecordStore> Clone for Elector<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RecordStore> fmt::Debug for Elector<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Elector")
            .field("lock_key", &self.inner.lock_key)
            .field("identity", &self.inner.identity)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<S: RecordStore> Elector<S> {
    /// Creates an elector contending for `lock_name`.
    ///
    /// Durations below their floors are raised to them. No store call is made.
    ///
    /// # Errors
    ///
    /// Returns [`ElectionError::Config`] if the lease is shorter than four retry intervals.
    pub fn new(store: S, lock_name: &str, config: ElectionConfig) -> Result<Self, ElectionError> {
        let config = config.with_floors();
        config.validate()?;

        let identity = generate_identity();
        let lock_key = derive_lock_key(lock_name);

        tracing::info!(
            lock_key = %lock_key,
            identity = %identity,
            lease_ms = config.lease_duration.as_millis(),
            retry_ms = config.retry_interval.as_millis(),
            "Creating elector"
        );

        Ok(Self {
            inner: Arc::new(ElectorInner {
                metrics: ElectionMetrics::new(lock_key.clone()),
                state: Mutex::new(LocalState::new(config.event_capacity)),
                identity,
                lock_key,
                config,
                store,
            }),
        })
    }

    /// This elector's holder identity.
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// The store key this elector contends for.
    pub fn lock_key(&self) -> &str {
        &self.inner.lock_key
    }

    /// Effective configuration, with floors applied.
    pub fn config(&self) -> &ElectionConfig {
        &self.inner.config
    }

    /// Counters and role gauge for this elector.
    pub fn metrics(&self) -> &ElectionMetrics {
        &self.inner.metrics
    }

    /// Subscribes to leadership events.
    ///
    /// Receivers are closed by [`Elector::stop`].
    pub fn subscribe(&self) -> broadcast::Receiver<LeaderEvent> {
        self.inner.state.lock().events.subscribe()
    }

    /// Current lifecycle state, derived from local bookkeeping.
    pub fn state(&self) -> ElectorState {
        let st = self.inner.state.lock();
        if st.paused {
            return ElectorState::Paused;
        }
        match st.phase {
            StartPhase::Idle => ElectorState::Unprovisioned,
            StartPhase::Starting(_) => ElectorState::Provisioning,
            StartPhase::Initiated if st.holding_lease => ElectorState::Leading,
            StartPhase::Initiated => ElectorState::Contending,
        }
    }

    /// The step the armed timer will run, if any.
    pub fn next_step(&self) -> Option<Step> {
        self.inner.state.lock().timer.as_ref().map(|t| t.step)
    }

    /// Provisions the lease namespace and makes the first election attempt.
    ///
    /// Returns immediately once started. Concurrent callers share a single
    /// in-flight start and all observe its outcome. A failed start leaves the
    /// elector ready to be started again from scratch.
    pub async fn start(&self) -> Result<(), ElectionError> {
        let pending = {
            let mut st = self.inner.state.lock();
            let in_flight = match &st.phase {
                StartPhase::Initiated => return Ok(()),
                StartPhase::Starting(pending) => Some(pending.clone()),
                StartPhase::Idle => None,
            };

            match in_flight {
                Some(pending) => pending,
                None => {
                    let generation = st.generation;
                    let task = tokio::spawn(Arc::clone(&self.inner).run_start(generation));
                    let weak = Arc::downgrade(&self.inner);
                    let pending = share_start(task, move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.reset_start(generation);
                        }
                    });
                    st.phase = StartPhase::Starting(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Cancels the pending timer. Leadership belief is kept but not reported.
    pub fn pause(&self) {
        let mut st = self.inner.state.lock();
        if st.paused {
            return;
        }
        st.paused = true;
        st.epoch += 1;
        st.cancel_timer();
        tracing::info!(lock_key = %self.inner.lock_key, "Elector paused");
    }

    /// Clears the pause and immediately contends for the lease again.
    ///
    /// A lease held before the pause is no longer trusted: it is revoked and
    /// must be won again. An elector that was never started is started instead.
    pub async fn resume(&self) -> Result<(), ElectionError> {
        let initiated = {
            let mut st = self.inner.state.lock();
            if !st.paused {
                return Ok(());
            }
            st.paused = false;
            if st.holding_lease {
                self.inner.revoke_once(&mut st);
            }
            st.phase.is_initiated()
        };

        tracing::info!(lock_key = %self.inner.lock_key, "Elector resumed");

        if initiated {
            self.inner.elect().await;
            Ok(())
        } else {
            self.start().await
        }
    }

    /// Cancels all timers, closes event receivers and forgets every local flag.
    ///
    /// The elector can be started again and will re-provision.
    pub fn stop(&self) {
        let mut st = self.inner.state.lock();
        st.cancel_timer();
        st.epoch += 1;
        st.generation += 1;
        st.phase = StartPhase::Idle;
        st.namespace = None;
        st.paused = false;
        st.holding_lease = false;
        st.revoked_signaled = false;
        st.events = broadcast::channel(self.inner.config.event_capacity).0;
        self.inner.metrics.set_role(ElectionRoleMetric::Contender);
        tracing::info!(lock_key = %self.inner.lock_key, "Elector stopped");
    }

    /// Asks the store whether this elector currently holds the lease.
    ///
    /// Always `false` while paused, without contacting the store. Starts the
    /// elector if needed.
    pub async fn is_leader(&self) -> Result<bool, ElectionError> {
        let initiated = {
            let st = self.inner.state.lock();
            if st.paused {
                return Ok(false);
            }
            st.phase.is_initiated()
        };

        if !initiated {
            self.start().await?;
        }

        let ns = self
            .inner
            .state
            .lock()
            .namespace
            .clone()
            .ok_or(ElectionError::Stopped)?;

        let started = Instant::now();
        let record = self.inner.store.find_one(&ns, &self.inner.identity).await;
        self.inner
            .metrics
            .observe_store_call("find_one", started.elapsed());

        Ok(record?.is_some_and(|r| r.holder_identity == self.inner.identity))
    }

    /// Local belief about leadership. May be stale between renewals.
    pub fn is_leader_cached(&self) -> bool {
        let st = self.inner.state.lock();
        !st.paused && st.holding_lease
    }
}

// ============================================================================
// ELECTION LOOP
// ============================================================================

impl<S: RecordStore> ElectorInner<S> {
    async fn run_start(self: Arc<Self>, generation: u64) -> Result<(), ElectionError> {
        tracing::info!(lock_key = %self.lock_key, "Starting elector");

        let ns = match provision(&self.store, &self.lock_key, &self.config).await {
            Ok(ns) => ns,
            Err(e) => {
                tracing::warn!(lock_key = %self.lock_key, error = %e, "Provisioning failed");
                self.reset_start(generation);
                return Err(ElectionError::Start(e));
            }
        };

        {
            let mut st = self.state.lock();
            if st.generation != generation {
                return Err(ElectionError::Stopped);
            }
            st.namespace = Some(ns);
        }

        let applied = self.elect().await;

        let retry = {
            let mut st = self.state.lock();
            if st.generation != generation {
                return Err(ElectionError::Stopped);
            }
            st.phase = StartPhase::Initiated;
            // A resume that raced a skipped or discarded attempt is waiting on us.
            !applied && !st.paused
        };

        if retry {
            self.elect().await;
        }

        Ok(())
    }

    fn reset_start(&self, generation: u64) {
        let mut st = self.state.lock();
        if st.generation == generation && !st.phase.is_initiated() {
            st.phase = StartPhase::Idle;
            st.namespace = None;
        }
    }

    /// Tries to insert the election record.
    ///
    /// Returns false if the attempt was skipped or its outcome discarded, in
    /// which case no timer was armed.
    async fn elect(self: &Arc<Self>) -> bool {
        let (ns, epoch) = {
            let st = self.state.lock();
            if st.paused {
                return false;
            }
            let Some(ns) = st.namespace.clone() else {
                return false;
            };
            (ns, st.epoch)
        };

        self.metrics.inc_elections();
        let record = ElectionRecord::claim(self.identity.as_str());
        let started = Instant::now();
        let outcome = self.store.conditional_insert(&ns, &record).await;
        self.metrics
            .observe_store_call("conditional_insert", started.elapsed());

        let mut st = self.state.lock();
        if st.epoch != epoch {
            tracing::debug!(lock_key = %self.lock_key, "Discarding election outcome after pause or stop");
            return false;
        }

        match outcome {
            Ok(InsertResult { inserted: true }) => {
                st.holding_lease = true;
                st.revoked_signaled = false;
                self.metrics.inc_elections_won();
                self.metrics.set_role(ElectionRoleMetric::Leader);
                metrics::trace_elected(&self.lock_key, &self.identity);
                st.emit(LeaderEvent::Elected);
                self.arm(&mut st, Step::Renew, self.config.renew_interval());
            }
            Ok(InsertResult { inserted: false }) => {
                self.metrics.inc_elections_lost();
                metrics::trace_election_lost(&self.lock_key, self.config.retry_interval.as_millis());
                self.arm(&mut st, Step::Elect, self.config.retry_interval);
            }
            Err(e) => {
                self.metrics.inc_store_errors();
                metrics::trace_store_error(&self.lock_key, "elect", &e);
                st.emit(LeaderEvent::Error(e));
                self.arm(&mut st, Step::Elect, self.config.retry_interval);
            }
        }

        true
    }

    /// Refreshes the held record; any doubt about the outcome counts as lost.
    async fn renew(self: &Arc<Self>) {
        let (ns, epoch) = {
            let st = self.state.lock();
            if st.paused || !st.holding_lease {
                return;
            }
            let Some(ns) = st.namespace.clone() else {
                return;
            };
            (ns, st.epoch)
        };

        let started = Instant::now();
        let outcome = self.store.conditional_update(&ns, &self.identity).await;
        self.metrics
            .observe_store_call("conditional_update", started.elapsed());

        let mut st = self.state.lock();
        if st.epoch != epoch {
            tracing::debug!(lock_key = %self.lock_key, "Discarding renewal outcome after pause or stop");
            return;
        }

        match outcome {
            Ok(UpdateResult { matched: true }) => {
                self.metrics.inc_renewals();
                tracing::debug!(lock_key = %self.lock_key, "Lease renewed");
                self.arm(&mut st, Step::Renew, self.config.renew_interval());
            }
            Ok(UpdateResult { matched: false }) => {
                self.metrics.inc_renewals_lost();
                tracing::warn!(lock_key = %self.lock_key, "Lease no longer held by this elector");
                self.revoke_once(&mut st);
                self.arm(&mut st, Step::Elect, self.config.retry_interval);
            }
            Err(e) => {
                self.metrics.inc_store_errors();
                metrics::trace_store_error(&self.lock_key, "renew", &e);
                st.emit(LeaderEvent::Error(e));
                self.revoke_once(&mut st);
                self.arm(&mut st, Step::Elect, self.config.retry_interval);
            }
        }
    }

    fn revoke_once(&self, st: &mut LocalState<S::Namespace>) {
        st.holding_lease = false;
        self.metrics.set_role(ElectionRoleMetric::Contender);
        if st.revoked_signaled {
            return;
        }
        st.revoked_signaled = true;
        self.metrics.inc_revocations();
        metrics::trace_revoked(&self.lock_key, &self.identity);
        st.emit(LeaderEvent::Revoked);
    }

    /// Replaces the pending timer with one running `step` after `delay`.
    fn arm(self: &Arc<Self>, st: &mut LocalState<S::Namespace>, step: Step, delay: Duration) {
        if st.paused {
            return;
        }
        st.cancel_timer();
        st.next_timer_id += 1;
        let id = st.next_timer_id;
        let weak = Arc::downgrade(self);

        tracing::trace!(
            lock_key = %self.lock_key,
            step = ?step,
            delay_ms = delay.as_millis(),
            "Arming timer"
        );

        let handle = tokio::spawn(fire_after(weak, id, step, delay));
        st.timer = Some(ArmedTimer {
            id,
            step,
            handle: handle.abort_handle(),
        });
    }

    /// Claims the timer slot for `id`. False if it was cancelled or replaced.
    fn take_timer(&self, id: u64) -> bool {
        let mut st = self.state.lock();
        if !st.timer.as_ref().is_some_and(|t| t.id == id) {
            return false;
        }
        st.timer = None;
        !st.paused
    }
}

async fn fire_after<S: RecordStore>(
    weak: Weak<ElectorInner<S>>,
    id: u64,
    step: Step,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;

    let Some(inner) = weak.upgrade() else {
        return;
    };
    if !inner.take_timer(id) {
        return;
    }

    match step {
        Step::Elect => {
            inner.elect().await;
        }
        Step::Renew => inner.renew().await,
    }
}

impl<S: RecordStore> Drop for ElectorInner<S> {
    fn drop(&mut self) {
        self.state.get_mut().cancel_timer();
    }
}

// ============================================================================
// TESTS
// ============================================================================
