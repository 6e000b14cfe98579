//! Concern Defaults - Cluster-Wide Read/Write Concern Defaults
//!
//! The façade operation handlers and administrative commands talk to. Each
//! service owns one [`ReadWriteConcernDefaults`], usually through a
//! [`DefaultsRegistry`]. Reads are answered from an in-memory cache kept
//! coherent with the persisted document by explicit installs, commit-time
//! invalidation, and background refreshes.

pub mod config;
pub mod implicit;
pub mod manager;
pub mod registry;
pub mod telemetry;

pub use config::DefaultsConfig;
pub use implicit::ImplicitMajorityFlag;
pub use manager::ReadWriteConcernDefaults;
pub use registry::{DefaultsRegistry, ServiceHandle};
pub use telemetry::{init_tracing, TelemetryConfig};

// Re-export the types callers need alongside the manager
pub use concern_core::{
    DefaultsError, DefaultsResult, DefaultsSnapshot, DefaultsValue, Epoch, OperationContext,
    ReadConcern, ReadConcernLevel, SuitabilityPolicy, WriteAcknowledgment, WriteConcern,
};
pub use concern_storage::{
    CacheConfig, CacheStats, CommitCallback, CommitHooks, DefaultsFetcher, EntryState,
    ExecutorConfig, InMemoryDefaultsStore,
};
