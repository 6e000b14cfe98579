//! Concern Storage - Defaults Cache, Refresh Executor and Commit Observer
//!
//! Keeps an in-memory copy of the cluster-wide read/write concern defaults
//! coherent with the persisted document. Storage access goes through the
//! [`DefaultsFetcher`] trait; the durable store itself lives elsewhere.

pub mod cache;
pub mod commit;
pub mod executor;
pub mod fetcher;

pub use cache::{
    should_replace, CacheConfig, CacheInvalidator, CacheStats, DefaultsCache, EntryState,
};
pub use commit::{CommitCallback, CommitHooks, CommitObserver};
pub use executor::{ExecutorConfig, RefreshExecutor};
pub use fetcher::{DefaultsFetcher, InMemoryDefaultsStore};
