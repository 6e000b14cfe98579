//! Concern Core - Read/Write Concern Default Types
//!
//! Pure data structures shared by the cache and the defaults manager:
//! read and write concern descriptors, the epoch-stamped defaults value, the
//! persisted document layout, suitability rules and the error taxonomy.
//! No I/O and no runtime live here.

pub mod context;
pub mod document;
pub mod error;
pub mod suitability;
pub mod types;

pub use context::OperationContext;
pub use document::{is_defaults_document_id, DefaultsDocument};
pub use error::{
    ConfigError, DefaultsError, DefaultsResult, InvariantError, StorageError, ValidationError,
};
pub use suitability::{SuitabilityPolicy, SuitableAsDefault};
pub use types::{
    CachedEntry, DefaultsSnapshot, DefaultsValue, Epoch, ReadConcern, ReadConcernLevel,
    WriteAcknowledgment, WriteConcern,
};

/// `_id` of the persisted read/write concern defaults document.
pub const PERSISTED_DOCUMENT_ID: &str = "ReadWriteConcernDefaults";

/// Namespace holding the persisted defaults document.
pub const CONFIG_SETTINGS_NAMESPACE: &str = "config.settings";
