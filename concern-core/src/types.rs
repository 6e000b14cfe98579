//! Read concern, write concern and defaults value types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// READ CONCERN
// ============================================================================

/// Read concern level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadConcernLevel {
    Local,
    Majority,
    Linearizable,
    Available,
    Snapshot,
}

impl ReadConcernLevel {
    pub const ALL: [ReadConcernLevel; 5] = [
        Self::Local,
        Self::Majority,
        Self::Linearizable,
        Self::Available,
        Self::Snapshot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Majority => "majority",
            Self::Linearizable => "linearizable",
            Self::Available => "available",
            Self::Snapshot => "snapshot",
        }
    }

    /// Parse a level name as it appears on the wire.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == name)
    }
}

impl fmt::Display for ReadConcernLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read concern descriptor: a level plus its level-specific arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadConcern {
    pub level: ReadConcernLevel,
    /// Causal consistency point, in cluster-time ticks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_cluster_time: Option<u64>,
    /// Snapshot read point, in cluster-time ticks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_cluster_time: Option<u64>,
}

impl ReadConcern {
    pub fn new(level: ReadConcernLevel) -> Self {
        Self {
            level,
            after_cluster_time: None,
            at_cluster_time: None,
        }
    }

    pub fn local() -> Self {
        Self::new(ReadConcernLevel::Local)
    }

    pub fn majority() -> Self {
        Self::new(ReadConcernLevel::Majority)
    }

    pub fn with_after_cluster_time(mut self, ticks: u64) -> Self {
        self.after_cluster_time = Some(ticks);
        self
    }

    pub fn with_at_cluster_time(mut self, ticks: u64) -> Self {
        self.at_cluster_time = Some(ticks);
        self
    }
}

// ============================================================================
// WRITE CONCERN
// ============================================================================

/// Acknowledgment requirement (`w`) of a write concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawAcknowledgment", into = "RawAcknowledgment")]
pub enum WriteAcknowledgment {
    /// Acknowledged by this many data-bearing members. Zero means unacknowledged.
    Nodes(u32),
    /// Acknowledged by a majority of voting members.
    Majority,
    /// Acknowledged by members matching a named tag set.
    Tag(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawAcknowledgment {
    Nodes(u32),
    Mode(String),
}

impl From<RawAcknowledgment> for WriteAcknowledgment {
    fn from(raw: RawAcknowledgment) -> Self {
        match raw {
            RawAcknowledgment::Nodes(n) => Self::Nodes(n),
            RawAcknowledgment::Mode(mode) if mode == "majority" => Self::Majority,
            RawAcknowledgment::Mode(tag) => Self::Tag(tag),
        }
    }
}

impl From<WriteAcknowledgment> for RawAcknowledgment {
    fn from(ack: WriteAcknowledgment) -> Self {
        match ack {
            WriteAcknowledgment::Nodes(n) => Self::Nodes(n),
            WriteAcknowledgment::Majority => Self::Mode("majority".to_string()),
            WriteAcknowledgment::Tag(tag) => Self::Mode(tag),
        }
    }
}

impl fmt::Display for WriteAcknowledgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nodes(n) => write!(f, "{}", n),
            Self::Majority => f.write_str("majority"),
            Self::Tag(tag) => write!(f, "\"{}\"", tag),
        }
    }
}

/// Write concern descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConcern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<WriteAcknowledgment>,
    #[serde(default, rename = "j", skip_serializing_if = "Option::is_none")]
    pub journal: Option<bool>,
    #[serde(default, rename = "wtimeout", skip_serializing_if = "Option::is_none")]
    pub wtimeout_ms: Option<u64>,
}

impl WriteConcern {
    pub fn new(w: WriteAcknowledgment) -> Self {
        Self {
            w: Some(w),
            journal: None,
            wtimeout_ms: None,
        }
    }

    pub fn majority() -> Self {
        Self::new(WriteAcknowledgment::Majority)
    }

    pub fn nodes(n: u32) -> Self {
        Self::new(WriteAcknowledgment::Nodes(n))
    }

    pub fn tagged(tag: impl Into<String>) -> Self {
        Self::new(WriteAcknowledgment::Tag(tag.into()))
    }

    pub fn with_journal(mut self, journal: bool) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.wtimeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.wtimeout_ms.map(Duration::from_millis)
    }

    pub fn is_majority(&self) -> bool {
        matches!(self.w, Some(WriteAcknowledgment::Majority))
    }
}

// ============================================================================
// DEFAULTS VALUE
// ============================================================================

/// Generation number of a defaults value. The only freshness comparator.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Epoch(pub u64);

impl Epoch {
    pub const ZERO: Epoch = Epoch(0);

    pub fn next(self) -> Epoch {
        Epoch(self.0.saturating_add(1))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The cluster-wide read/write concern defaults: the unit of caching and persistence.
///
/// "No defaults configured" is represented by the absence of a value
/// (`Option<DefaultsValue>`), never by a value with both concerns empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultsValue {
    pub epoch: Epoch,
    /// Diagnostic only; never used for ordering.
    pub set_time: DateTime<Utc>,
    #[serde(
        rename = "defaultReadConcern",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub read_concern: Option<ReadConcern>,
    #[serde(
        rename = "defaultWriteConcern",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub write_concern: Option<WriteConcern>,
}

impl DefaultsValue {
    pub fn new(
        epoch: Epoch,
        read_concern: Option<ReadConcern>,
        write_concern: Option<WriteConcern>,
    ) -> Self {
        Self {
            epoch,
            set_time: Utc::now(),
            read_concern,
            write_concern,
        }
    }

    /// Returns true if this value is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &DefaultsValue) -> bool {
        self.epoch > other.epoch
    }
}

/// A defaults value together with the moment it entered the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub defaults: DefaultsValue,
    /// Diagnostic only; never used for freshness decisions.
    pub local_cache_time: DateTime<Utc>,
}

impl CachedEntry {
    pub fn new(defaults: DefaultsValue) -> Self {
        Self {
            defaults,
            local_cache_time: Utc::now(),
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.defaults.epoch
    }
}

/// Diagnostic view of the cached defaults.
///
/// Empty (no value, zero time) when nothing is configured or nothing was ever cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultsSnapshot {
    pub defaults: Option<DefaultsValue>,
    pub local_cache_time: DateTime<Utc>,
}

impl DefaultsSnapshot {
    pub fn empty() -> Self {
        Self {
            defaults: None,
            local_cache_time: DateTime::UNIX_EPOCH,
        }
    }

    pub fn from_entry(entry: Option<&CachedEntry>) -> Self {
        match entry {
            Some(entry) => Self {
                defaults: Some(entry.defaults.clone()),
                local_cache_time: entry.local_cache_time,
            },
            None => Self::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.defaults.is_none()
    }

    pub fn epoch(&self) -> Option<Epoch> {
        self.defaults.as_ref().map(|d| d.epoch)
    }
}

impl Default for DefaultsSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_concern_level_round_trips_names() {
        for level in ReadConcernLevel::ALL {
            assert_eq!(ReadConcernLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(ReadConcernLevel::parse("eventual"), None);
    }

    #[test]
    fn test_write_acknowledgment_wire_forms() {
        let majority: WriteAcknowledgment = serde_json::from_value(json!("majority")).unwrap();
        assert_eq!(majority, WriteAcknowledgment::Majority);

        let nodes: WriteAcknowledgment = serde_json::from_value(json!(2)).unwrap();
        assert_eq!(nodes, WriteAcknowledgment::Nodes(2));

        let tag: WriteAcknowledgment = serde_json::from_value(json!("east")).unwrap();
        assert_eq!(tag, WriteAcknowledgment::Tag("east".to_string()));

        assert_eq!(
            serde_json::to_value(WriteAcknowledgment::Majority).unwrap(),
            json!("majority")
        );
    }

    #[test]
    fn test_write_concern_serializes_short_field_names() {
        let wc = WriteConcern::nodes(2)
            .with_journal(true)
            .with_timeout(Duration::from_millis(1500));
        let value = serde_json::to_value(&wc).unwrap();
        assert_eq!(value, json!({"w": 2, "j": true, "wtimeout": 1500}));
        assert_eq!(wc.timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_epoch_ordering_and_next() {
        assert!(Epoch(2) > Epoch(1));
        assert_eq!(Epoch(1).next(), Epoch(2));
        assert_eq!(Epoch(u64::MAX).next(), Epoch(u64::MAX));
    }

    #[test]
    fn test_defaults_value_newer_uses_epoch_only() {
        let older = DefaultsValue::new(Epoch(1), None, Some(WriteConcern::majority()));
        let mut newer = DefaultsValue::new(Epoch(2), Some(ReadConcern::local()), None);
        // A set time in the past must not change the ordering.
        newer.set_time = DateTime::UNIX_EPOCH;

        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
        assert!(!older.is_newer_than(&older));
    }

    #[test]
    fn test_snapshot_empty_has_zero_time() {
        let snapshot = DefaultsSnapshot::from_entry(None);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.local_cache_time, DateTime::UNIX_EPOCH);
        assert_eq!(snapshot.epoch(), None);
    }

    #[test]
    fn test_snapshot_from_entry_copies_cache_time() {
        let entry = CachedEntry::new(DefaultsValue::new(Epoch(7), None, Some(WriteConcern::nodes(1))));
        let snapshot = DefaultsSnapshot::from_entry(Some(&entry));
        assert_eq!(snapshot.epoch(), Some(Epoch(7)));
        assert_eq!(snapshot.local_cache_time, entry.local_cache_time);
    }
}
