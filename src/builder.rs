use crate::config::ElectionConfig;
use crate::engine::{ElectionError, Elector};
use crate::identity::DEFAULT_LOCK_NAME;
use crate::store::RecordStore;
use std::time::Duration;

/// Builder for [`Elector`].
///
/// Provides a fluent API for configuring and creating an elector.
pub struct ElectorBuilder<S> {
    store: Option<S>,
    lock_name: String,
    config: ElectionConfig,
}

impl<S: RecordStore> ElectorBuilder<S> {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            store: None,
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            config: ElectionConfig::default(),
        }
    }

    /// Sets the record store (Required).
    pub fn store(mut self, store: S) -> Self {
        self.store = Some(store);
        self
    }

    /// Names the lock to contend for. Electors with the same name compete.
    pub fn lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = name.into();
        self
    }

    pub fn lease_duration(mut self, lease: Duration) -> Self {
        self.config.lease_duration = lease;
        self
    }

    pub fn retry_interval(mut self, retry: Duration) -> Self {
        self.config.retry_interval = retry;
        self
    }

    /// Modifies the configuration via a closure.
    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut ElectionConfig),
    {
        f(&mut self.config);
        self
    }

    /// Builds the [`Elector`].
    ///
    /// # Errors
    ///
    /// Returns [`ElectionError::Config`] if no store was given or the timing is invalid.
    pub fn build(self) -> Result<Elector<S>, ElectionError> {
        let store = self
            .store
            .ok_or_else(|| ElectionError::Config("a record store is required".to_string()))?;

        Elector::new(store, &self.lock_name, self.config)
    }
}

impl<S: RecordStore> Default for ElectorBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
