//! Defaults cache with epoch-based freshness.
//!
//! The cache holds one entry: the cluster-wide read/write concern defaults.
//! Reads are served from memory; storage is consulted only on a cold miss or
//! when an invalidation schedules a background refresh.
//!
//! # Freshness
//!
//! Whether a fetched value replaces the cached one is decided by epoch alone
//! (see [`should_replace`]). A refresh that observes an older document than
//! the one already cached is discarded, so the epoch a process observes never
//! moves backwards unless the document is deleted.
//!
//! # Example
//!
//! ```ignore
//! let cache = DefaultsCache::new(fetcher, executor, CacheConfig::default());
//!
//! let entry = cache.read(&ctx).await?;
//! if cache.state() == EntryState::Stale {
//!     tracing::debug!("Serving defaults while a refresh is in flight");
//! }
//! ```

pub mod freshness;
pub mod read_through;
pub mod stats;

pub use freshness::{should_replace, EntryState};
pub use read_through::{CacheConfig, CacheInvalidator, DefaultsCache};
pub use stats::CacheStats;
