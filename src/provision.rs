//! Namespace Provisioning
//!
//! Prepares the store location for a lock's election record: the namespace
//! itself and an expiry rule matching the configured lease duration.

use crate::config::ElectionConfig;
use crate::store::{RecordStore, StoreError};

/// Ensures the namespace for `lock_key` exists and carries the configured expiry.
///
/// Tuning the store's expiry sweep is best effort. A conflicting expiry rule
/// is reconciled by dropping and recreating it; every other failure aborts.
pub async fn provision<S: RecordStore>(
    store: &S,
    lock_key: &str,
    config: &ElectionConfig,
) -> Result<S::Namespace, StoreError> {
    store.ping().await?;

    if let Err(e) = store.tune_expiry_sweep(config.sweep_interval).await {
        tracing::warn!(
            lock_key = lock_key,
            sweep_ms = config.sweep_interval.as_millis(),
            error = %e,
            "Could not tune store expiry sweep; expired leases may linger longer than the lease duration"
        );
    }

    let ns = store.ensure_namespace(lock_key).await?;
    let ttl_secs = config.expiry_secs();

    match store.configure_expiry(&ns, ttl_secs).await {
        Ok(()) => {}
        Err(conflict) if conflict.is_expiry_conflict() => {
            reconcile_expiry(store, &ns, ttl_secs)
                .await
                .map_err(|e| {
                    tracing::warn!(lock_key = lock_key, error = %e, "Expiry reconciliation failed");
                    conflict
                })?;
        }
        Err(e) => return Err(e),
    }

    tracing::info!(
        lock_key = lock_key,
        expiry_secs = ttl_secs,
        "Lease namespace provisioned"
    );

    Ok(ns)
}

/// Replaces an expiry rule whose value differs from `ttl_secs`.
async fn reconcile_expiry<S: RecordStore>(
    store: &S,
    ns: &S::Namespace,
    ttl_secs: u64,
) -> Result<(), StoreError> {
    let existing = store.expiry_rule(ns).await?;
    if existing == Some(ttl_secs) {
        return Ok(());
    }

    tracing::info!(
        namespace = ?ns,
        existing_secs = ?existing,
        requested_secs = ttl_secs,
        "Lease duration changed, recreating expiry rule"
    );

    store.drop_expiry(ns).await?;
    store.configure_expiry(ns, ttl_secs).await
}
