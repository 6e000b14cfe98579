//! The read/write concern defaults manager.
//!
//! Operation handlers ask the manager for the cluster-wide defaults; it answers
//! from the cache. Administrative writers use it to validate and generate a
//! new defaults value, persist that value themselves, then install it with
//! [`set_default`](ReadWriteConcernDefaults::set_default) or
//! [`invalidate`](ReadWriteConcernDefaults::invalidate). Writers that modify
//! the settings collection directly report the write through
//! [`observe_direct_write_to_config_settings`](ReadWriteConcernDefaults::observe_direct_write_to_config_settings).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use concern_core::{
    DefaultsResult, DefaultsSnapshot, DefaultsValue, Epoch, OperationContext, ReadConcern,
    ReadConcernLevel, StorageError, SuitabilityPolicy, SuitableAsDefault, ValidationError,
    WriteConcern,
};
use concern_storage::{
    CacheStats, CommitHooks, CommitObserver, DefaultsCache, DefaultsFetcher, EntryState,
    RefreshExecutor,
};
use serde_json::Value;
use tokio::runtime::Handle;

use crate::config::DefaultsConfig;
use crate::implicit::ImplicitMajorityFlag;

/// Cluster-wide read/write concern defaults for one service.
///
/// Owns the defaults cache, the refresh executor, the commit observer and the
/// implicit-majority flag. Call [`shutdown`](Self::shutdown) before dropping
/// it to let in-flight fetches finish.
pub struct ReadWriteConcernDefaults {
    cache: DefaultsCache,
    observer: CommitObserver,
    executor: Arc<RefreshExecutor>,
    policy: SuitabilityPolicy,
    implicit_majority: ImplicitMajorityFlag,
    last_issued_epoch: AtomicU64,
}

impl ReadWriteConcernDefaults {
    /// Build a manager whose fetches run on the current tokio runtime.
    pub fn new(fetcher: Arc<dyn DefaultsFetcher>, config: DefaultsConfig) -> DefaultsResult<Self> {
        let runtime = Handle::try_current().map_err(|_| StorageError::NoRuntime)?;
        Self::with_runtime(fetcher, config, runtime)
    }

    /// Build a manager whose fetches run on `runtime`.
    pub fn with_runtime(
        fetcher: Arc<dyn DefaultsFetcher>,
        config: DefaultsConfig,
        runtime: Handle,
    ) -> DefaultsResult<Self> {
        config.validate()?;
        let DefaultsConfig {
            cache,
            executor,
            policy,
        } = config;

        let executor = Arc::new(RefreshExecutor::with_handle(executor, runtime)?);
        let cache = DefaultsCache::new(fetcher, Arc::clone(&executor), cache);
        let observer = CommitObserver::new(cache.invalidator());

        Ok(Self {
            cache,
            observer,
            executor,
            policy,
            implicit_majority: ImplicitMajorityFlag::new(),
            last_issued_epoch: AtomicU64::new(0),
        })
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Default read concern, or `None` if none is configured.
    pub async fn default_read_concern(
        &self,
        ctx: &OperationContext,
    ) -> DefaultsResult<Option<ReadConcern>> {
        let entry = self.cache.read(ctx).await?;
        Ok(entry.and_then(|e| e.defaults.read_concern.clone()))
    }

    /// Default write concern, or `None` if none is configured.
    pub async fn default_write_concern(
        &self,
        ctx: &OperationContext,
    ) -> DefaultsResult<Option<WriteConcern>> {
        let entry = self.cache.read(ctx).await?;
        Ok(entry.and_then(|e| e.defaults.write_concern.clone()))
    }

    /// The configured default write concern, falling back to the implicit one.
    pub async fn effective_default_write_concern(
        &self,
        ctx: &OperationContext,
    ) -> DefaultsResult<Option<WriteConcern>> {
        let configured = self.default_write_concern(ctx).await?;
        Ok(configured.or_else(|| self.implicit_majority.implicit_default_write_concern()))
    }

    pub async fn is_cluster_wide_write_concern_set(
        &self,
        ctx: &OperationContext,
    ) -> DefaultsResult<bool> {
        Ok(self.default_write_concern(ctx).await?.is_some())
    }

    /// Full defaults and the time they were cached, for diagnostics.
    ///
    /// Empty with a zero cache time when no defaults are configured.
    pub async fn get_default(&self, ctx: &OperationContext) -> DefaultsResult<DefaultsSnapshot> {
        let entry = self.cache.read(ctx).await?;
        Ok(DefaultsSnapshot::from_entry(entry.as_deref()))
    }

    // ========================================================================
    // VALIDATION AND GENERATION
    // ========================================================================

    pub fn is_suitable_read_concern_level(&self, level: ReadConcernLevel) -> bool {
        self.policy.is_suitable_read_concern_level(level)
    }

    /// Check that a read or write concern may serve as a cluster-wide default.
    pub fn check_suitability_as_default<C: SuitableAsDefault>(
        &self,
        candidate: &C,
    ) -> DefaultsResult<()> {
        candidate.check_suitability(&self.policy)?;
        Ok(())
    }

    /// Produce a new defaults value from the supplied concerns.
    ///
    /// At least one concern must be supplied; the other is carried over from
    /// the current defaults. The result carries an epoch greater than both the
    /// cached one and any this manager issued before. Nothing is persisted and
    /// the cache is left untouched.
    pub async fn generate_new_concerns(
        &self,
        ctx: &OperationContext,
        read_concern: Option<ReadConcern>,
        write_concern: Option<WriteConcern>,
    ) -> DefaultsResult<DefaultsValue> {
        if read_concern.is_none() && write_concern.is_none() {
            return Err(ValidationError::NoConcernsSupplied.into());
        }
        if let Some(rc) = &read_concern {
            self.check_suitability_as_default(rc)?;
        }
        if let Some(wc) = &write_concern {
            self.check_suitability_as_default(wc)?;
        }

        let current = self.cache.read(ctx).await?;
        let current = current.as_ref().map(|entry| &entry.defaults);

        let read_concern =
            read_concern.or_else(|| current.and_then(|d| d.read_concern.clone()));
        let write_concern =
            write_concern.or_else(|| current.and_then(|d| d.write_concern.clone()));
        let epoch = self.issue_epoch(current.map(|d| d.epoch).unwrap_or(Epoch::ZERO));

        tracing::info!(
            op_id = %ctx.op_id(),
            %epoch,
            read_concern = ?read_concern,
            write_concern = ?write_concern,
            "Generated new read/write concern defaults"
        );
        Ok(DefaultsValue::new(epoch, read_concern, write_concern))
    }

    fn issue_epoch(&self, floor: Epoch) -> Epoch {
        let next = |last: u64| last.max(floor.as_u64()).saturating_add(1);
        let previous = self
            .last_issued_epoch
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last)))
            .unwrap_or_else(|last| last);
        Epoch(next(previous))
    }

    // ========================================================================
    // CACHE MAINTENANCE
    // ========================================================================

    /// Register commit-time invalidation for a direct write to the settings
    /// collection. Returns whether `id` named the defaults document.
    pub fn observe_direct_write_to_config_settings(
        &self,
        ctx: &OperationContext,
        hooks: &dyn CommitHooks,
        id: &Value,
        new_doc: Option<&Value>,
    ) -> DefaultsResult<bool> {
        self.observer.observe_write(ctx, hooks, id, new_doc)
    }

    /// Mark the cached defaults stale and refresh in the background.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Fetch the persisted defaults and wait until the cache reflects them.
    pub async fn refresh_if_necessary(&self, ctx: &OperationContext) -> DefaultsResult<()> {
        let before = self.cached_epoch();
        self.cache.refresh_now(ctx).await?;
        let after = self.cached_epoch();
        if before != after {
            tracing::info!(
                op_id = %ctx.op_id(),
                from = ?before,
                to = ?after,
                "Refreshed read/write concern defaults"
            );
        }
        Ok(())
    }

    /// Install a value the caller has already persisted.
    pub fn set_default(&self, ctx: &OperationContext, value: DefaultsValue) {
        tracing::debug!(op_id = %ctx.op_id(), epoch = %value.epoch, "Setting read/write concern defaults");
        self.cache.set(value);
    }

    fn cached_epoch(&self) -> Option<Epoch> {
        self.cache.peek().flatten().map(|entry| entry.epoch())
    }

    // ========================================================================
    // IMPLICIT DEFAULT WRITE CONCERN
    // ========================================================================

    /// Record whether the implicit default write concern is majority.
    ///
    /// Startup-only. Setting a different value later fails with
    /// `InvariantError::ImplicitMajorityConflict`.
    pub fn set_implicit_default_write_concern_majority(&self, majority: bool) -> DefaultsResult<()> {
        self.implicit_majority.set(majority)
    }

    pub fn implicit_default_write_concern_majority(&self) -> Option<bool> {
        self.implicit_majority.get()
    }

    pub fn implicit_default_write_concern(&self) -> Option<WriteConcern> {
        self.implicit_majority.implicit_default_write_concern()
    }

    // ========================================================================
    // DIAGNOSTICS AND LIFECYCLE
    // ========================================================================

    pub fn cache_state(&self) -> EntryState {
        self.cache.state()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn policy(&self) -> &SuitabilityPolicy {
        &self.policy
    }

    /// Stop background refreshes, waiting a bounded time for in-flight ones.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concern_core::{DefaultsError, WriteAcknowledgment};
    use concern_storage::InMemoryDefaultsStore;

    fn manager_with(store: Arc<InMemoryDefaultsStore>) -> ReadWriteConcernDefaults {
        ReadWriteConcernDefaults::new(store, DefaultsConfig::default()).unwrap()
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let store = Arc::new(InMemoryDefaultsStore::new());
        let result = ReadWriteConcernDefaults::new(store, DefaultsConfig::default());
        assert!(matches!(
            result.err(),
            Some(DefaultsError::Storage(StorageError::NoRuntime))
        ));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let store = Arc::new(InMemoryDefaultsStore::new());
        let config = DefaultsConfig::default().with_policy(SuitabilityPolicy::new(vec![]));
        assert!(matches!(
            ReadWriteConcernDefaults::new(store, config).err(),
            Some(DefaultsError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_projections_when_nothing_configured() {
        let manager = manager_with(Arc::new(InMemoryDefaultsStore::new()));
        let ctx = OperationContext::new();

        assert!(manager.default_read_concern(&ctx).await.unwrap().is_none());
        assert!(manager.default_write_concern(&ctx).await.unwrap().is_none());
        assert!(!manager.is_cluster_wide_write_concern_set(&ctx).await.unwrap());

        let snapshot = manager.get_default(&ctx).await.unwrap();
        assert_eq!(snapshot, DefaultsSnapshot::empty());
    }

    #[tokio::test]
    async fn test_projections_from_persisted_defaults() {
        let value = DefaultsValue::new(
            Epoch(3),
            Some(ReadConcern::majority()),
            Some(WriteConcern::nodes(2)),
        );
        let manager = manager_with(Arc::new(InMemoryDefaultsStore::with_defaults(value.clone())));
        let ctx = OperationContext::new();

        assert_eq!(
            manager.default_read_concern(&ctx).await.unwrap(),
            Some(ReadConcern::majority())
        );
        assert_eq!(
            manager.default_write_concern(&ctx).await.unwrap(),
            Some(WriteConcern::nodes(2))
        );
        let snapshot = manager.get_default(&ctx).await.unwrap();
        assert_eq!(snapshot.defaults, Some(value));
        assert_eq!(manager.cache_stats().fetches, 1);
    }

    #[tokio::test]
    async fn test_generate_requires_a_concern() {
        let manager = manager_with(Arc::new(InMemoryDefaultsStore::new()));
        let err = manager
            .generate_new_concerns(&OperationContext::new(), None, None)
            .await
            .unwrap_err();
        assert_eq!(err, DefaultsError::from(ValidationError::NoConcernsSupplied));
    }

    #[tokio::test]
    async fn test_generate_rejects_unsuitable_values() {
        let manager = manager_with(Arc::new(InMemoryDefaultsStore::new()));
        let ctx = OperationContext::new();

        let snapshot_level = ReadConcern::new(ReadConcernLevel::Snapshot);
        let err = manager
            .generate_new_concerns(&ctx, Some(snapshot_level), None)
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let unacknowledged = WriteConcern::new(WriteAcknowledgment::Nodes(0));
        let err = manager
            .generate_new_concerns(&ctx, None, Some(unacknowledged))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DefaultsError::from(ValidationError::UnacknowledgedWriteConcern)
        );
    }

    #[tokio::test]
    async fn test_generate_carries_other_concern_and_advances_epoch() {
        let existing = DefaultsValue::new(Epoch(7), Some(ReadConcern::local()), None);
        let store = Arc::new(InMemoryDefaultsStore::with_defaults(existing));
        let manager = manager_with(Arc::clone(&store));
        let ctx = OperationContext::new();

        let generated = manager
            .generate_new_concerns(&ctx, None, Some(WriteConcern::majority()))
            .await
            .unwrap();
        assert_eq!(generated.epoch, Epoch(8));
        assert_eq!(generated.read_concern, Some(ReadConcern::local()));
        assert_eq!(generated.write_concern, Some(WriteConcern::majority()));

        // Not persisted, not cached.
        assert_eq!(manager.get_default(&ctx).await.unwrap().epoch(), Some(Epoch(7)));

        // A second generation without persisting the first still moves forward.
        let again = manager
            .generate_new_concerns(&ctx, Some(ReadConcern::majority()), None)
            .await
            .unwrap();
        assert_eq!(again.epoch, Epoch(9));
    }

    #[tokio::test]
    async fn test_set_default_then_read() {
        let manager = manager_with(Arc::new(InMemoryDefaultsStore::new()));
        let ctx = OperationContext::new();

        let value = manager
            .generate_new_concerns(&ctx, Some(ReadConcern::majority()), None)
            .await
            .unwrap();
        manager.set_default(&ctx, value.clone());

        assert_eq!(manager.cache_state(), EntryState::Valid);
        assert_eq!(manager.get_default(&ctx).await.unwrap().defaults, Some(value));
    }

    #[tokio::test]
    async fn test_effective_write_concern_falls_back_to_implicit() {
        let manager = manager_with(Arc::new(InMemoryDefaultsStore::new()));
        let ctx = OperationContext::new();

        assert!(manager
            .effective_default_write_concern(&ctx)
            .await
            .unwrap()
            .is_none());

        manager.set_implicit_default_write_concern_majority(true).unwrap();
        assert_eq!(
            manager.effective_default_write_concern(&ctx).await.unwrap(),
            Some(WriteConcern::majority())
        );

        let err = manager
            .set_implicit_default_write_concern_majority(false)
            .unwrap_err();
        assert!(matches!(err, DefaultsError::Invariant(_)));
        assert_eq!(manager.implicit_default_write_concern_majority(), Some(true));
    }

    #[tokio::test]
    async fn test_refresh_if_necessary_picks_up_new_document() {
        let store = Arc::new(InMemoryDefaultsStore::with_defaults(DefaultsValue::new(
            Epoch(1),
            Some(ReadConcern::local()),
            None,
        )));
        let manager = manager_with(Arc::clone(&store));
        let ctx = OperationContext::new();
        manager.get_default(&ctx).await.unwrap();

        store.persist(&DefaultsValue::new(Epoch(2), Some(ReadConcern::majority()), None));
        manager.refresh_if_necessary(&ctx).await.unwrap();
        assert_eq!(
            manager.default_read_concern(&ctx).await.unwrap(),
            Some(ReadConcern::majority())
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_cold_reads() {
        let manager = manager_with(Arc::new(InMemoryDefaultsStore::new()));
        manager.shutdown().await;

        let err = manager
            .default_read_concern(&OperationContext::new())
            .await
            .unwrap_err();
        assert_eq!(err, DefaultsError::from(StorageError::ExecutorShutdown));
    }
}
