//! Catalog collaborator consulted before an order is created.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by the catalog.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown catalog item: {0}")]
    ItemNotFound(String),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// Trait for looking up catalog items.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns the display name of an item.
    async fn item_name(&self, item_id: &str) -> Result<String, CatalogError>;
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    items: HashMap<String, String>,
    fail_on_lookup: bool,
}

/// In-memory catalog for testing and single-process runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryCatalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or renames an item.
    pub fn insert(&self, item_id: impl Into<String>, name: impl Into<String>) {
        self.write().items.insert(item_id.into(), name.into());
    }

    /// Configures every lookup to fail as if the catalog were down.
    pub fn set_fail_on_lookup(&self, fail: bool) {
        self.write().fail_on_lookup = fail;
    }

    // The state is a plain map with no cross-field invariant, so a panic
    // while the lock was held cannot leave it half-updated.
    fn read(&self) -> RwLockReadGuard<'_, InMemoryCatalogState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryCatalogState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn item_name(&self, item_id: &str) -> Result<String, CatalogError> {
        let state = self.read();

        if state.fail_on_lookup {
            return Err(CatalogError::Unavailable(
                "catalog did not respond".to_string(),
            ));
        }

        state
            .items
            .get(item_id)
            .cloned()
            .ok_or_else(|| CatalogError::ItemNotFound(item_id.to_string()))
    }
}
