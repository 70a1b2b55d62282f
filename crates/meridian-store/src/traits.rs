//! Backend trait for node-source storage.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{NodeSourceData, SourceName};

/// Backend for storing node-source records.
///
/// One row per node source, keyed by name. The infrastructure manager is
/// the only writer for its own row.
#[async_trait]
pub trait NodeSourceStore: Send + Sync {
    /// Insert a new node-source record.
    ///
    /// Returns an error if a record with the same name already exists.
    async fn insert(&self, data: &NodeSourceData) -> StoreResult<()>;

    /// Get a record by name.
    ///
    /// Returns `None` if no record exists; a node source that is still
    /// being registered has no row yet and that is not an error.
    async fn get(&self, name: &SourceName) -> StoreResult<Option<NodeSourceData>>;

    /// Write a record through, replacing the stored row.
    ///
    /// Returns `true` if a row existed and was written, `false` if no row
    /// exists for this name. The `false` case performs no write and is not
    /// an error: callers flushing state for a node source that has not
    /// finished registering simply skip the write.
    async fn update(&self, data: &NodeSourceData) -> StoreResult<bool>;

    /// List all node-source records.
    async fn list(&self) -> StoreResult<Vec<NodeSourceData>>;

    /// Remove a record.
    ///
    /// Returns an error if no record exists for this name.
    async fn remove(&self, name: &SourceName) -> StoreResult<()>;
}
