//! Fetch collaborator for the persisted defaults document.

use async_trait::async_trait;
use concern_core::{
    DefaultsDocument, DefaultsResult, DefaultsValue, OperationContext, ValidationError,
};
use parking_lot::RwLock;
use serde_json::Value;

/// Point lookup of the persisted defaults document.
///
/// Implementations return `Ok(None)` when the document does not exist and
/// reserve `Err` for genuine I/O failures. They hold no caching logic.
#[async_trait]
pub trait DefaultsFetcher: Send + Sync {
    async fn fetch(&self, ctx: &OperationContext) -> DefaultsResult<Option<DefaultsValue>>;
}

/// In-process document store for single-node deployments and tests.
///
/// Holds the raw document the way the settings collection would, so every
/// fetch goes through the same parsing as a document read from storage.
#[derive(Debug, Default)]
pub struct InMemoryDefaultsStore {
    document: RwLock<Option<Value>>,
}

impl InMemoryDefaultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: DefaultsValue) -> Self {
        let store = Self::new();
        store.persist(&defaults);
        store
    }

    /// Write `defaults` as the persisted document, replacing any previous one.
    pub fn persist(&self, defaults: &DefaultsValue) {
        let doc = DefaultsDocument::new(defaults.clone()).to_value();
        *self.document.write() = Some(doc);
    }

    /// Write a raw document after checking that it parses.
    pub fn persist_raw(&self, doc: Value) -> Result<(), ValidationError> {
        DefaultsDocument::parse(&doc)?;
        *self.document.write() = Some(doc);
        Ok(())
    }

    pub fn delete(&self) {
        *self.document.write() = None;
    }

    pub fn raw(&self) -> Option<Value> {
        self.document.read().clone()
    }
}

#[async_trait]
impl DefaultsFetcher for InMemoryDefaultsStore {
    async fn fetch(&self, _ctx: &OperationContext) -> DefaultsResult<Option<DefaultsValue>> {
        let doc = self.document.read().clone();
        match doc {
            Some(doc) => Ok(Some(DefaultsDocument::parse(&doc)?.into_defaults())),
            None => Ok(None),
        }
    }
}
