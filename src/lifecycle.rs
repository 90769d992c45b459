//! Start/Stop Lifecycle
//!
//! `start` may be called from many tasks at once. The first caller spawns the
//! provisioning work; everyone else awaits a clone of the same shared handle,
//! so all of them observe one outcome.

use crate::engine::ElectionError;
use crate::store::StoreError;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use tokio::task::JoinHandle;

/// A start operation that any number of callers can await.
pub(crate) type SharedStart = Shared<BoxFuture<'static, Result<(), ElectionError>>>;

/// Where an elector is in its start lifecycle.
pub(crate) enum StartPhase {
    /// Never started, stopped, or the last start failed.
    Idle,
    /// Provisioning and the initial election are in flight.
    Starting(SharedStart),
    /// Provisioned; the election loop is running (or paused).
    Initiated,
}

impl StartPhase {
    pub(crate) fn is_initiated(&self) -> bool {
        matches!(self, StartPhase::Initiated)
    }
}

impl fmt::Debug for StartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartPhase::Idle => f.write_str("Idle"),
            StartPhase::Starting(_) => f.write_str("Starting"),
            StartPhase::Initiated => f.write_str("Initiated"),
        }
    }
}

/// Wraps a spawned start task into a shareable handle.
///
/// `on_abort` runs if the task panics or is cancelled, so the owner can put
/// its phase back to [`StartPhase::Idle`].
pub(crate) fn share_start<F>(task: JoinHandle<Result<(), ElectionError>>, on_abort: F) -> SharedStart
where
    F: FnOnce() + Send + 'static,
{
    async move {
        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Start task did not complete");
                on_abort();
                Err(ElectionError::Start(StoreError::Backend(format!(
                    "start task did not complete: {}",
                    e
                ))))
            }
        }
    }
    .boxed()
    .shared()
}
