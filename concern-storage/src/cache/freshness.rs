//! Epoch-based freshness rule and the observable entry state.
//!
//! Freshness is decided purely by comparing epochs. Wall-clock timestamps
//! carried by values are diagnostic and never consulted here, so processes
//! with skewed clocks still converge on the same answer.

use concern_core::DefaultsValue;

/// Observable state of the single cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Nothing has been installed yet; the next read blocks on a fetch.
    Absent,
    /// The entry reflects the latest completed fetch or `set`.
    Valid,
    /// The entry has been invalidated and is served until a refresh lands.
    Stale,
}

impl EntryState {
    pub fn is_populated(&self) -> bool {
        !matches!(self, Self::Absent)
    }
}

/// Decide whether a fetched value replaces the cached one.
///
/// Replace when the store reports no document, when nothing is cached, or
/// when the fetched epoch is strictly greater. Equal or lower epochs are
/// discarded, which makes repeated refreshes idempotent.
pub fn should_replace(cached: Option<&DefaultsValue>, fetched: Option<&DefaultsValue>) -> bool {
    match (cached, fetched) {
        (_, None) => true,
        (None, Some(_)) => true,
        (Some(cached), Some(fetched)) => fetched.is_newer_than(cached),
    }
}
