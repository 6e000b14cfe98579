//! Concern Test Utilities
//!
//! Shared test infrastructure for the read/write concern defaults crates:
//! - A scriptable fetch collaborator (pausable, failure injection, call counts)
//! - A mock transaction implementing the commit-hook contract
//! - Proptest generators for concern descriptors
//! - Fixtures and custom assertions

pub use concern_core::{
    DefaultsError, DefaultsResult, DefaultsValue, Epoch, InvariantError, OperationContext,
    ReadConcern, ReadConcernLevel, StorageError, ValidationError, WriteAcknowledgment,
    WriteConcern,
};
pub use concern_storage::{CommitCallback, CommitHooks, DefaultsFetcher, InMemoryDefaultsStore};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

/// Fetch collaborator backed by an in-memory document that tests can steer.
///
/// Fetches can be held at a gate (`pause`/`resume`) to widen race windows,
/// and failures can be injected for the next N fetches.
pub struct ScriptedFetcher {
    store: InMemoryDefaultsStore,
    calls: AtomicUsize,
    failures: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            store: InMemoryDefaultsStore::new(),
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            gate,
        }
    }

    pub fn with_defaults(defaults: DefaultsValue) -> Self {
        let fetcher = Self::new();
        fetcher.persist(&defaults);
        fetcher
    }

    /// Replace the stored document, as a durable write would.
    pub fn persist(&self, defaults: &DefaultsValue) {
        self.store.persist(defaults);
    }

    pub fn delete(&self) {
        self.store.delete();
    }

    /// Fail the next `n` fetches with `StorageError::FetchFailed`.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Hold fetches that start from now on until `resume` is called.
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Number of fetches started so far, including ones held at the gate.
    pub fn fetch_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` fetches have started. False on timeout.
    pub async fn wait_for_fetch_count(&self, count: usize, timeout: Duration) -> bool {
        eventually(timeout, || self.fetch_count() >= count).await
    }
}

#[async_trait]
impl DefaultsFetcher for ScriptedFetcher {
    async fn fetch(&self, ctx: &OperationContext) -> DefaultsResult<Option<DefaultsValue>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let inject = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            return Err(StorageError::FetchFailed {
                reason: "injected failure".to_string(),
            }
            .into());
        }
        self.store.fetch(ctx).await
    }
}

/// Transaction stand-in that queues commit callbacks.
///
/// Callbacks run on `commit` and are dropped unrun on `rollback`.
#[derive(Default)]
pub struct MockTransaction {
    callbacks: Mutex<Vec<CommitCallback>>,
}

impl MockTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callbacks waiting for the transaction outcome.
    pub fn pending(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn commit(&self) {
        let callbacks: Vec<CommitCallback> = self.callbacks.lock().drain(..).collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn rollback(&self) {
        self.callbacks.lock().clear();
    }
}

impl CommitHooks for MockTransaction {
    fn on_commit(&self, callback: CommitCallback) {
        self.callbacks.lock().push(callback);
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for concern descriptors.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_read_concern_level() -> impl Strategy<Value = ReadConcernLevel> {
        prop::sample::select(ReadConcernLevel::ALL.to_vec())
    }

    /// Read concern acceptable as a default under the default policy.
    pub fn arb_suitable_read_concern() -> impl Strategy<Value = ReadConcern> {
        prop_oneof![
            Just(ReadConcernLevel::Local),
            Just(ReadConcernLevel::Majority),
            Just(ReadConcernLevel::Available),
        ]
        .prop_map(ReadConcern::new)
    }

    /// Acknowledgment that is well formed for a default.
    pub fn arb_valid_acknowledgment() -> impl Strategy<Value = WriteAcknowledgment> {
        prop_oneof![
            (1u32..=50).prop_map(WriteAcknowledgment::Nodes),
            Just(WriteAcknowledgment::Majority),
            "[a-zA-Z][a-zA-Z0-9_]{0,15}".prop_map(WriteAcknowledgment::Tag),
        ]
    }

    pub fn arb_suitable_write_concern() -> impl Strategy<Value = WriteConcern> {
        (
            arb_valid_acknowledgment(),
            proptest::option::of(any::<bool>()),
            proptest::option::of(0u64..60_000),
        )
            .prop_map(|(w, journal, wtimeout_ms)| WriteConcern {
                w: Some(w),
                journal,
                wtimeout_ms,
            })
    }

    /// Write concern that must be refused as a default.
    pub fn arb_unsuitable_write_concern() -> impl Strategy<Value = WriteConcern> {
        prop_oneof![
            Just(WriteConcern::default()),
            Just(WriteConcern::nodes(0)),
            "[ \t]{0,4}".prop_map(WriteConcern::tagged),
        ]
    }

    pub fn arb_epoch() -> impl Strategy<Value = Epoch> {
        (0u64..1_000_000).prop_map(Epoch)
    }

    /// Defaults value carrying at least one concern.
    pub fn arb_defaults_value() -> impl Strategy<Value = DefaultsValue> {
        (
            arb_epoch(),
            proptest::option::of(arb_suitable_read_concern()),
            proptest::option::of(arb_suitable_write_concern()),
        )
            .prop_filter("at least one concern", |(_, rc, wc)| {
                rc.is_some() || wc.is_some()
            })
            .prop_map(|(epoch, rc, wc)| DefaultsValue::new(epoch, rc, wc))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common scenarios.

    use super::*;

    /// Defaults with only a majority write concern.
    pub fn majority_write_defaults(epoch: u64) -> DefaultsValue {
        DefaultsValue::new(Epoch(epoch), None, Some(WriteConcern::majority()))
    }

    /// Defaults with only a read concern at `level`.
    pub fn read_defaults(epoch: u64, level: ReadConcernLevel) -> DefaultsValue {
        DefaultsValue::new(Epoch(epoch), Some(ReadConcern::new(level)), None)
    }

    /// Defaults with both concerns set.
    pub fn full_defaults(epoch: u64) -> DefaultsValue {
        DefaultsValue::new(
            Epoch(epoch),
            Some(ReadConcern::majority()),
            Some(WriteConcern::majority().with_journal(true)),
        )
    }

    /// A context that gives up waiting after `timeout`.
    pub fn short_deadline(timeout: Duration) -> OperationContext {
        OperationContext::new().with_timeout(timeout)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for defaults-specific error shapes.

    use super::*;

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &DefaultsResult<T>) {
        match result {
            Err(DefaultsError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(
        result: &DefaultsResult<T>,
        expected: StorageError,
    ) {
        match result {
            Err(DefaultsError::Storage(err)) => assert_eq!(*err, expected),
            other => panic!("Expected Storage error {:?}, got: {:?}", expected, other),
        }
    }

    #[track_caller]
    pub fn assert_invariant_error<T: std::fmt::Debug>(result: &DefaultsResult<T>) {
        match result {
            Err(DefaultsError::Invariant(_)) => {}
            other => panic!("Expected Invariant error, got: {:?}", other),
        }
    }

    /// Assert that an observed epoch sequence never decreases.
    #[track_caller]
    pub fn assert_monotonic(epochs: &[Epoch]) {
        for pair in epochs.windows(2) {
            assert!(
                pair[0] <= pair[1],
                "Epoch regressed from {} to {}",
                pair[0],
                pair[1]
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
