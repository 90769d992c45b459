//! Election timing configuration.

use crate::engine::ElectionError;
use crate::store::DEFAULT_SWEEP_INTERVAL;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest lease accepted; shorter values are raised to it.
pub const MIN_LEASE_DURATION: Duration = Duration::from_millis(1000);

/// Shortest retry interval accepted; shorter values are raised to it.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Required ratio between lease duration and retry interval.
pub const LEASE_TO_RETRY_RATIO: u32 = 4;

/// Default capacity of the leadership event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Timing configuration for an elector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// How long a record lives in the store after its last renewal.
    pub lease_duration: Duration,
    /// Delay between election attempts while the lease is held elsewhere.
    pub retry_interval: Duration,
    /// Expiry-sweep frequency requested from the store (best effort).
    pub sweep_interval: Duration,
    /// Buffered leadership events per subscriber.
    pub event_capacity: usize,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration: MIN_LEASE_DURATION,
            retry_interval: MIN_RETRY_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ElectionConfig {
    /// Creates a validated configuration, raising both durations to their floors.
    ///
    /// # Errors
    ///
    /// Returns [`ElectionError::Config`] if the lease is shorter than four retry intervals.
    pub fn new(lease_duration: Duration, retry_interval: Duration) -> Result<Self, ElectionError> {
        let config = Self {
            lease_duration,
            retry_interval,
            ..Default::default()
        }
        .with_floors();
        config.validate()?;
        Ok(config)
    }

    /// Convenience constructor taking milliseconds.
    pub fn from_millis(lease_ms: u64, retry_ms: u64) -> Result<Self, ElectionError> {
        Self::new(Duration::from_millis(lease_ms), Duration::from_millis(retry_ms))
    }

    /// Raises lease duration, retry interval and event capacity to their minimums.
    pub fn with_floors(mut self) -> Self {
        self.lease_duration = self.lease_duration.max(MIN_LEASE_DURATION);
        self.retry_interval = self.retry_interval.max(MIN_RETRY_INTERVAL);
        self.event_capacity = self.event_capacity.max(1);
        self
    }

    /// Checks that a renewal at half the lease leaves two retries of margin.
    pub fn validate(&self) -> Result<(), ElectionError> {
        let min_lease = self.retry_interval * LEASE_TO_RETRY_RATIO;
        if self.lease_duration < min_lease {
            return Err(ElectionError::Config(format!(
                "lease duration ({}ms) is too short relative to retry interval ({}ms); \
                 it must be at least {}ms ({}x the retry interval) for reliable renewal",
                self.lease_duration.as_millis(),
                self.retry_interval.as_millis(),
                min_lease.as_millis(),
                LEASE_TO_RETRY_RATIO,
            )));
        }
        Ok(())
    }

    /// Delay between successful renewals.
    pub fn renew_interval(&self) -> Duration {
        self.lease_duration / 2
    }

    /// Expiry installed in the store, in whole seconds rounded up.
    pub fn expiry_secs(&self) -> u64 {
        let millis = self.lease_duration.as_millis() as u64;
        millis.div_ceil(1000).max(1)
    }
}
