//! Error types for read/write concern default operations

use std::time::Duration;
use thiserror::Error;

/// Fetch and background-execution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Fetching the persisted defaults failed: {reason}")]
    FetchFailed { reason: String },

    #[error("Fetching the persisted defaults timed out after {after:?}")]
    FetchTimedOut { after: Duration },

    #[error("Operation deadline expired while waiting for a defaults fetch")]
    WaitTimedOut,

    #[error("Refresh executor has been shut down")]
    ExecutorShutdown,

    #[error("No async runtime available to host the refresh executor")]
    NoRuntime,
}

/// Validation errors raised when a candidate value cannot serve as a default.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("At least one of the read or write concern must be set")]
    NoConcernsSupplied,

    #[error("level: '{level}' is not suitable for the default read concern")]
    UnsuitableReadConcernLevel { level: String },

    #[error("'{argument}' is not suitable for the default read concern")]
    UnsuitableReadConcernArgument { argument: String },

    #[error("Unacknowledged write concern is not suitable for the default write concern")]
    UnacknowledgedWriteConcern,

    #[error("Default write concern must have a 'w' field")]
    MissingAcknowledgment,

    #[error("Invalid acknowledgment target for the default write concern: {reason}")]
    InvalidAcknowledgment { reason: String },

    #[error("Malformed read/write concern defaults document: {reason}")]
    MalformedDocument { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to install tracing subscriber: {reason}")]
    SubscriberInit { reason: String },
}

/// Programming errors. Not recoverable by retrying.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error(
        "Implicit default write concern majority already set to {current}, cannot change it to {requested}"
    )]
    ImplicitMajorityConflict { current: bool, requested: bool },

    #[error("Read/write concern defaults already registered for service {handle}")]
    ServiceAlreadyRegistered { handle: String },
}

/// Master error type for read/write concern default operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefaultsError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantError),
}

impl DefaultsError {
    /// Returns true for errors the caller caused by supplying an unusable value.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Result type alias for read/write concern default operations.
pub type DefaultsResult<T> = Result<T, DefaultsError>;
