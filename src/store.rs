//! Record Store Interface
//!
//! The election engine never talks to a database directly. Everything it needs
//! from the shared store is expressed by [`RecordStore`]: atomic conditional
//! writes on a single record per lock key, and a rule that removes that record
//! some time after its `acquired_at` timestamp.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::{Duration, SystemTime};

/// Expiry-sweep interval requested from the store when none is configured.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// RECORDS
// ============================================================================

/// The single contended record stored under a lock key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionRecord {
    /// Identity of the process currently believed to hold the lease.
    pub holder_identity: String,
    /// Store-side timestamp the expiry rule ages the record from.
    pub acquired_at: SystemTime,
}

impl ElectionRecord {
    /// Creates a record claimed by `holder`.
    ///
    /// `acquired_at` is a placeholder; stores overwrite it with their own clock.
    pub fn claim(holder: impl Into<String>) -> Self {
        Self {
            holder_identity: holder.into(),
            acquired_at: SystemTime::now(),
        }
    }
}

/// Outcome of [`RecordStore::conditional_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertResult {
    /// `false` iff a record already existed for the key.
    pub inserted: bool,
}

/// Outcome of [`RecordStore::conditional_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// `false` iff no record satisfied the holder predicate at the instant of the call.
    pub matched: bool,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Failure reported by a record store.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Expiry rule conflict: existing {existing}s, requested {requested}s")]
    ExpiryConflict { existing: u64, requested: u64 },
    #[error("Store timeout: {0}")]
    Timeout(String),
    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true for the conflict that provisioning reconciles locally.
    pub fn is_expiry_conflict(&self) -> bool {
        matches!(self, StoreError::ExpiryConflict { .. })
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Abstract interface to the shared record store.
///
/// Implementations must make `conditional_insert` and `conditional_update`
/// atomic with respect to every other client of the same store: they are the
/// only mutual exclusion the election relies on.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Handle to the namespace (collection, table, prefix) holding a lock's record.
    type Namespace: Clone + Debug + Send + Sync + 'static;

    /// Liveness check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Asks the store to sweep expired records at roughly `interval`.
    ///
    /// Callers treat failure as non-fatal.
    async fn tune_expiry_sweep(&self, interval: Duration) -> Result<(), StoreError>;

    /// Returns the namespace for `key`, creating it if absent.
    async fn ensure_namespace(&self, key: &str) -> Result<Self::Namespace, StoreError>;

    /// Installs a rule removing records `ttl_secs` after their `acquired_at`.
    ///
    /// Installing a rule identical to the existing one is a no-op. A differently
    /// configured rule yields [`StoreError::ExpiryConflict`].
    async fn configure_expiry(&self, ns: &Self::Namespace, ttl_secs: u64) -> Result<(), StoreError>;

    /// Returns the installed expiry, if any.
    async fn expiry_rule(&self, ns: &Self::Namespace) -> Result<Option<u64>, StoreError>;

    /// Removes the installed expiry rule.
    async fn drop_expiry(&self, ns: &Self::Namespace) -> Result<(), StoreError>;

    /// Inserts `record` only if no record exists, stamping `acquired_at` with the store clock.
    async fn conditional_insert(
        &self,
        ns: &Self::Namespace,
        record: &ElectionRecord,
    ) -> Result<InsertResult, StoreError>;

    /// Refreshes `acquired_at` only if the record is held by `holder`.
    async fn conditional_update(
        &self,
        ns: &Self::Namespace,
        holder: &str,
    ) -> Result<UpdateResult, StoreError>;

    /// Point lookup of the record held by `holder`.
    async fn find_one(
        &self,
        ns: &Self::Namespace,
        holder: &str,
    ) -> Result<Option<ElectionRecord>, StoreError>;
}
