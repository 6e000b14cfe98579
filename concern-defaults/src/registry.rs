//! Service-scoped registry of defaults managers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use concern_core::{DefaultsResult, InvariantError};
use concern_storage::DefaultsFetcher;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::config::DefaultsConfig;
use crate::manager::ReadWriteConcernDefaults;

/// Opaque identity of the service that owns a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(Uuid);

impl ServiceHandle {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ServiceHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owns one manager per service.
#[derive(Default)]
pub struct DefaultsRegistry {
    services: RwLock<HashMap<ServiceHandle, Arc<ReadWriteConcernDefaults>>>,
}

impl DefaultsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register the manager for `handle`.
    ///
    /// Fails with `InvariantError::ServiceAlreadyRegistered` if the service
    /// already has one.
    pub fn create(
        &self,
        handle: ServiceHandle,
        fetcher: Arc<dyn DefaultsFetcher>,
        config: DefaultsConfig,
    ) -> DefaultsResult<Arc<ReadWriteConcernDefaults>> {
        let mut services = self.services.write();
        if services.contains_key(&handle) {
            return Err(InvariantError::ServiceAlreadyRegistered {
                handle: handle.to_string(),
            }
            .into());
        }
        let manager = Arc::new(ReadWriteConcernDefaults::new(fetcher, config)?);
        services.insert(handle, Arc::clone(&manager));
        tracing::info!(service = %handle, "Registered read/write concern defaults");
        Ok(manager)
    }

    pub fn get(&self, handle: ServiceHandle) -> Option<Arc<ReadWriteConcernDefaults>> {
        self.services.read().get(&handle).cloned()
    }

    /// Unregister the manager for `handle` and drain its background work.
    ///
    /// Returns false if nothing was registered.
    pub async fn teardown(&self, handle: ServiceHandle) -> bool {
        let removed = self.services.write().remove(&handle);
        match removed {
            Some(manager) => {
                manager.shutdown().await;
                tracing::info!(service = %handle, "Tore down read/write concern defaults");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concern_core::DefaultsError;
    use concern_storage::InMemoryDefaultsStore;

    #[tokio::test]
    async fn test_create_get_teardown() {
        let registry = DefaultsRegistry::new();
        let handle = ServiceHandle::new();
        assert!(registry.get(handle).is_none());

        let created = registry
            .create(handle, Arc::new(InMemoryDefaultsStore::new()), DefaultsConfig::default())
            .unwrap();
        let fetched = registry.get(handle).unwrap();
        assert!(Arc::ptr_eq(&created, &fetched));
        assert_eq!(registry.len(), 1);

        assert!(registry.teardown(handle).await);
        assert!(registry.get(handle).is_none());
        assert!(registry.is_empty());
        assert!(!registry.teardown(handle).await);
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let registry = DefaultsRegistry::new();
        let handle = ServiceHandle::new();
        registry
            .create(handle, Arc::new(InMemoryDefaultsStore::new()), DefaultsConfig::default())
            .unwrap();

        let err = registry
            .create(handle, Arc::new(InMemoryDefaultsStore::new()), DefaultsConfig::default())
            .err();
        assert!(matches!(
            err,
            Some(DefaultsError::Invariant(InvariantError::ServiceAlreadyRegistered { .. }))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_services_are_independent() {
        let registry = DefaultsRegistry::new();
        let first = ServiceHandle::new();
        let second = ServiceHandle::new();

        let a = registry
            .create(first, Arc::new(InMemoryDefaultsStore::new()), DefaultsConfig::default())
            .unwrap();
        let b = registry
            .create(second, Arc::new(InMemoryDefaultsStore::new()), DefaultsConfig::default())
            .unwrap();

        a.set_implicit_default_write_concern_majority(true).unwrap();
        b.set_implicit_default_write_concern_majority(false).unwrap();

        registry.teardown(first).await;
        assert!(registry.get(second).is_some());
    }
}
