//! Election Metrics and Observability
//!
//! Counters for election and renewal outcomes, exportable in Prometheus text
//! format, plus the structured tracing events the engine emits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Election metrics for Prometheus export.
#[derive(Debug, Clone)]
pub struct ElectionMetrics {
    inner: Arc<ElectionMetricsInner>,
}

#[derive(Debug)]
struct ElectionMetricsInner {
    /// Lock key label
    lock_key: String,

    // Gauges
    role: AtomicU64, // 0=contender, 1=leader

    // Counters
    elections_total: AtomicU64,
    elections_won: AtomicU64,
    elections_lost: AtomicU64,
    renewals_total: AtomicU64,
    renewals_lost: AtomicU64,
    revocations: AtomicU64,
    store_errors: AtomicU64,

    #[cfg(feature = "observability")]
    store_latency: prometheus::HistogramVec,
}

impl ElectionMetrics {
    /// Creates a new metrics instance for the given lock key.
    pub fn new(lock_key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ElectionMetricsInner {
                lock_key: lock_key.into(),
                role: AtomicU64::new(0),
                elections_total: AtomicU64::new(0),
                elections_won: AtomicU64::new(0),
                elections_lost: AtomicU64::new(0),
                renewals_total: AtomicU64::new(0),
                renewals_lost: AtomicU64::new(0),
                revocations: AtomicU64::new(0),
                store_errors: AtomicU64::new(0),
                #[cfg(feature = "observability")]
                store_latency: prometheus::HistogramVec::new(
                    prometheus::HistogramOpts::new(
                        "leader_store_latency_seconds",
                        "Record store call latency in seconds",
                    ),
                    &["operation"],
                )
                .expect("static histogram options are valid"),
            }),
        }
    }

    /// Returns the lock key these metrics are labelled with.
    pub fn lock_key(&self) -> &str {
        &self.inner.lock_key
    }

    // ========================================================================
    // UPDATES
    // ========================================================================

    /// Sets the current role.
    pub fn set_role(&self, role: ElectionRoleMetric) {
        self.inner.role.store(role as u64, Ordering::Relaxed);
    }

    pub fn inc_elections(&self) {
        self.inner.elections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_elections_won(&self) {
        self.inner.elections_won.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_elections_lost(&self) {
        self.inner.elections_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_renewals(&self) {
        self.inner.renewals_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_renewals_lost(&self) {
        self.inner.renewals_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_revocations(&self) {
        self.inner.revocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_store_errors(&self) {
        self.inner.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Observes the latency of one store call.
    #[cfg_attr(not(feature = "observability"), allow(unused_variables))]
    pub fn observe_store_call(&self, operation: &str, duration: std::time::Duration) {
        #[cfg(feature = "observability")]
        self.inner
            .store_latency
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Returns the latency histogram so callers can register it with their registry.
    #[cfg(feature = "observability")]
    pub fn store_latency_histogram(&self) -> prometheus::HistogramVec {
        self.inner.store_latency.clone()
    }

    // ========================================================================
    // GETTERS (for export)
    // ========================================================================

    pub fn role(&self) -> u64 {
        self.inner.role.load(Ordering::Relaxed)
    }
    pub fn elections_total(&self) -> u64 {
        self.inner.elections_total.load(Ordering::Relaxed)
    }
    pub fn elections_won(&self) -> u64 {
        self.inner.elections_won.load(Ordering::Relaxed)
    }
    pub fn elections_lost(&self) -> u64 {
        self.inner.elections_lost.load(Ordering::Relaxed)
    }
    pub fn renewals_total(&self) -> u64 {
        self.inner.renewals_total.load(Ordering::Relaxed)
    }
    pub fn renewals_lost(&self) -> u64 {
        self.inner.renewals_lost.load(Ordering::Relaxed)
    }
    pub fn revocations(&self) -> u64 {
        self.inner.revocations.load(Ordering::Relaxed)
    }
    pub fn store_errors(&self) -> u64 {
        self.inner.store_errors.load(Ordering::Relaxed)
    }

    // ========================================================================
    // PROMETHEUS EXPORT
    // ========================================================================

    /// Exports metrics in Prometheus text format.
    pub fn to_prometheus_text(&self) -> String {
        let lock_key = self.lock_key();

        let mut output = String::new();

        macro_rules! metric {
            ($kind:expr, $name:expr, $help:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{}{{lock_key=\"{}\"}} {}\n",
                    $name, $help, $name, $kind, $name, lock_key, $value
                ));
            };
        }

        metric!(
            "gauge",
            "leader_role",
            "Current role (0=contender, 1=leader)",
            self.role()
        );
        metric!(
            "counter",
            "leader_elections_total",
            "Election attempts",
            self.elections_total()
        );
        metric!(
            "counter",
            "leader_elections_won",
            "Elections won",
            self.elections_won()
        );
        metric!(
            "counter",
            "leader_elections_lost",
            "Elections lost to another holder",
            self.elections_lost()
        );
        metric!(
            "counter",
            "leader_renewals_total",
            "Successful lease renewals",
            self.renewals_total()
        );
        metric!(
            "counter",
            "leader_renewals_lost",
            "Renewals that found the lease gone",
            self.renewals_lost()
        );
        metric!(
            "counter",
            "leader_revocations_total",
            "Revocation signals emitted",
            self.revocations()
        );
        metric!(
            "counter",
            "leader_store_errors_total",
            "Store errors during election or renewal",
            self.store_errors()
        );

        output
    }
}

/// Role representation for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ElectionRoleMetric {
    Contender = 0,
    Leader = 1,
}

// ============================================================================
// TRACING HELPERS
// ============================================================================

/// Records winning the lease.
pub fn trace_elected(lock_key: &str, identity: &str) {
    tracing::info!(
        lock_key = lock_key,
        identity = identity,
        event = "elected",
        "Acquired leader lease"
    );
}

/// Records losing a race for the lease.
pub fn trace_election_lost(lock_key: &str, retry_ms: u128) {
    tracing::debug!(
        lock_key = lock_key,
        retry_ms = retry_ms,
        event = "election_lost",
        "Lease held elsewhere"
    );
}

/// Records the revocation signal.
pub fn trace_revoked(lock_key: &str, identity: &str) {
    tracing::info!(
        lock_key = lock_key,
        identity = identity,
        event = "revoked",
        "Leader lease revoked"
    );
}

/// Records a store failure absorbed by the retry loop.
pub fn trace_store_error(lock_key: &str, step: &str, error: &crate::store::StoreError) {
    tracing::warn!(
        lock_key = lock_key,
        step = step,
        error = %error,
        event = "store_error",
        "Store call failed, will retry"
    );
}

// ============================================================================
// TESTS
// ============================================================================
