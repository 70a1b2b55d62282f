//! In-memory node-source store for testing.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::traits::NodeSourceStore;
use crate::types::{NodeSourceData, SourceName};

/// In-memory node-source store for testing.
///
/// This implementation is not suitable for production use as data is lost
/// when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, NodeSourceData>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeSourceStore for MemoryStore {
    async fn insert(&self, data: &NodeSourceData) -> StoreResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))?;

        let key = data.name.as_str().to_owned();
        if records.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }

        records.insert(key, data.clone());
        Ok(())
    }

    async fn get(&self, name: &SourceName) -> StoreResult<Option<NodeSourceData>> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::internal("lock poisoned"))?;

        Ok(records.get(name.as_str()).cloned())
    }

    async fn update(&self, data: &NodeSourceData) -> StoreResult<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))?;

        match records.get_mut(data.name.as_str()) {
            Some(stored) => {
                *stored = data.clone();
                stored.updated_at = chrono::Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> StoreResult<Vec<NodeSourceData>> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::internal("lock poisoned"))?;

        let mut results: Vec<_> = records.values().cloned().collect();
        results.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(results)
    }

    async fn remove(&self, name: &SourceName) -> StoreResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))?;

        if records.remove(name.as_str()).is_none() {
            return Err(StoreError::NodeSourceNotFound(name.to_string()));
        }

        Ok(())
    }
}
