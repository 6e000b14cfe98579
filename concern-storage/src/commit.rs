//! Commit-time invalidation for direct writes to the settings collection.

use concern_core::{
    is_defaults_document_id, DefaultsDocument, DefaultsResult, OperationContext,
    CONFIG_SETTINGS_NAMESPACE,
};
use serde_json::Value;

use crate::cache::CacheInvalidator;

/// Callback run once the enclosing transaction commits.
pub type CommitCallback = Box<dyn FnOnce() + Send + 'static>;

/// Commit-hook collaborator of a storage transaction.
///
/// Implementations must run registered callbacks only if the transaction
/// commits, never on rollback, and never synchronously at registration.
pub trait CommitHooks {
    fn on_commit(&self, callback: CommitCallback);
}

/// Watches writes to the settings collection and invalidates the defaults
/// cache when the defaults document changes underneath it.
#[derive(Clone)]
pub struct CommitObserver {
    invalidator: CacheInvalidator,
}

impl CommitObserver {
    pub fn new(invalidator: CacheInvalidator) -> Self {
        Self { invalidator }
    }

    /// Inspect a write to the settings collection.
    ///
    /// Returns `Ok(true)` when `id` names the defaults document and an
    /// invalidation was registered with `hooks`, `Ok(false)` for unrelated
    /// documents. A replacement document that does not parse is rejected
    /// before anything is registered.
    pub fn observe_write(
        &self,
        ctx: &OperationContext,
        hooks: &dyn CommitHooks,
        id: &Value,
        new_doc: Option<&Value>,
    ) -> DefaultsResult<bool> {
        if !is_defaults_document_id(id) {
            return Ok(false);
        }
        if let Some(doc) = new_doc {
            DefaultsDocument::parse(doc)?;
        }

        let invalidator = self.invalidator.clone();
        let op_id = ctx.op_id();
        hooks.on_commit(Box::new(move || {
            if !invalidator.invalidate() {
                tracing::debug!(%op_id, "Defaults cache gone before commit; nothing to invalidate");
            }
        }));

        tracing::debug!(
            op_id = %ctx.op_id(),
            namespace = CONFIG_SETTINGS_NAMESPACE,
            deleted = new_doc.is_none(),
            "Registered commit-time invalidation of read/write concern defaults"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, DefaultsCache, EntryState};
    use crate::executor::{ExecutorConfig, RefreshExecutor};
    use crate::fetcher::InMemoryDefaultsStore;
    use concern_core::{DefaultsError, DefaultsValue, Epoch, ValidationError, WriteConcern};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    // Mock transaction: queues callbacks until commit or rollback.
    #[derive(Default)]
    struct MockTxn {
        callbacks: Mutex<Vec<CommitCallback>>,
    }

    impl MockTxn {
        fn pending(&self) -> usize {
            self.callbacks.lock().len()
        }

        fn commit(&self) {
            for callback in self.callbacks.lock().drain(..) {
                callback();
            }
        }

        fn rollback(&self) {
            self.callbacks.lock().clear();
        }
    }

    impl CommitHooks for MockTxn {
        fn on_commit(&self, callback: CommitCallback) {
            self.callbacks.lock().push(callback);
        }
    }

    async fn populated_cache() -> DefaultsCache {
        let value = DefaultsValue::new(Epoch(1), None, Some(WriteConcern::majority()));
        let store = Arc::new(InMemoryDefaultsStore::with_defaults(value));
        let executor = Arc::new(RefreshExecutor::new(ExecutorConfig::default()).unwrap());
        let cache = DefaultsCache::new(store, executor, CacheConfig::default());
        cache.read(&OperationContext::new()).await.unwrap();
        cache
    }

    fn valid_doc() -> Value {
        DefaultsDocument::new(DefaultsValue::new(Epoch(2), None, Some(WriteConcern::nodes(2))))
            .to_value()
    }

    #[tokio::test]
    async fn test_unrelated_document_is_ignored() {
        let cache = populated_cache().await;
        let observer = CommitObserver::new(cache.invalidator());
        let txn = MockTxn::default();

        let matched = observer
            .observe_write(&OperationContext::new(), &txn, &json!("balancer"), None)
            .unwrap();
        assert!(!matched);
        assert_eq!(txn.pending(), 0);
    }

    #[tokio::test]
    async fn test_invalidation_waits_for_commit() {
        let cache = populated_cache().await;
        let observer = CommitObserver::new(cache.invalidator());
        let txn = MockTxn::default();

        let doc = valid_doc();
        let matched = observer
            .observe_write(
                &OperationContext::new(),
                &txn,
                &json!("ReadWriteConcernDefaults"),
                Some(&doc),
            )
            .unwrap();
        assert!(matched);
        assert_eq!(cache.state(), EntryState::Valid);
        assert_eq!(cache.stats().invalidations, 0);

        txn.commit();
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_rollback_never_invalidates() {
        let cache = populated_cache().await;
        let observer = CommitObserver::new(cache.invalidator());
        let txn = MockTxn::default();

        observer
            .observe_write(
                &OperationContext::new(),
                &txn,
                &json!("ReadWriteConcernDefaults"),
                None,
            )
            .unwrap();
        txn.rollback();

        assert_eq!(cache.state(), EntryState::Valid);
        assert_eq!(cache.stats().invalidations, 0);
    }

    #[tokio::test]
    async fn test_malformed_replacement_is_rejected() {
        let cache = populated_cache().await;
        let observer = CommitObserver::new(cache.invalidator());
        let txn = MockTxn::default();

        let bad = json!({"_id": "ReadWriteConcernDefaults", "epoch": "not a number"});
        let err = observer
            .observe_write(
                &OperationContext::new(),
                &txn,
                &json!("ReadWriteConcernDefaults"),
                Some(&bad),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DefaultsError::Validation(ValidationError::MalformedDocument { .. })
        ));
        assert_eq!(txn.pending(), 0);
    }

    #[tokio::test]
    async fn test_commit_after_cache_dropped_is_harmless() {
        let cache = populated_cache().await;
        let observer = CommitObserver::new(cache.invalidator());
        let txn = MockTxn::default();

        observer
            .observe_write(
                &OperationContext::new(),
                &txn,
                &json!("ReadWriteConcernDefaults"),
                None,
            )
            .unwrap();
        drop(observer);
        drop(cache);
        txn.commit();
    }
}
