//! Lease-Based Leader Election
//!
//! Electors in different processes contend for a single record in a shared
//! store. Whoever inserts the record first holds the lease and renews it at
//! half the lease duration; if the holder disappears, the store's expiry rule
//! removes the record and another elector takes over.

mod builder;
pub mod config;
pub mod engine;
pub mod identity;
mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod provision;
pub mod store;

pub use builder::ElectorBuilder;
pub use config::ElectionConfig;
pub use engine::{ElectionError, Elector, ElectorState, LeaderEvent, Step};
pub use memory::MemoryStore;
pub use store::{ElectionRecord, InsertResult, RecordStore, StoreError, UpdateResult};
