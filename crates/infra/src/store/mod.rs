//! Key-value ride storage.
//!
//! Items are keyed by `skierID` (partition) and `liftInfo` (range key). Writes
//! go through [`StorageClient::batch_write`], which persists what it can and
//! hands back the rest; a non-empty return is the store's throttling signal.

use std::sync::Arc;

use liftride_core::StorageItem;
use thiserror::Error;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryRideStore;
pub use postgres::PostgresRideStore;

/// Items per batch-write call when the store does not say otherwise.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 25;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("stored row is malformed: {0}")]
    Corrupt(String),

    #[error("no async runtime available to drive the store")]
    NoRuntime,
}

/// Ride storage operations. Implementations are safe to share between threads.
pub trait StorageClient: Send + Sync {
    /// Persist `items` and return the ones that were **not** persisted.
    fn batch_write(&self, items: &[StorageItem]) -> Result<Vec<StorageItem>, StoreError>;

    /// Persist one item.
    fn put(&self, item: &StorageItem) -> Result<(), StoreError>;

    /// Every ride stored under a skier's partition.
    fn query_skier(&self, skier_id: &str) -> Result<Vec<StorageItem>, StoreError>;

    /// Every ride at a resort on one season day.
    fn scan_resort(
        &self,
        resort_id: &str,
        season_id: &str,
        day_id: &str,
    ) -> Result<Vec<StorageItem>, StoreError>;

    /// Upper bound on items per [`batch_write`](Self::batch_write) call.
    fn max_batch_size(&self) -> usize {
        DEFAULT_MAX_BATCH_SIZE
    }
}

impl<S> StorageClient for Arc<S>
where
    S: StorageClient + ?Sized,
{
    fn batch_write(&self, items: &[StorageItem]) -> Result<Vec<StorageItem>, StoreError> {
        (**self).batch_write(items)
    }

    fn put(&self, item: &StorageItem) -> Result<(), StoreError> {
        (**self).put(item)
    }

    fn query_skier(&self, skier_id: &str) -> Result<Vec<StorageItem>, StoreError> {
        (**self).query_skier(skier_id)
    }

    fn scan_resort(
        &self,
        resort_id: &str,
        season_id: &str,
        day_id: &str,
    ) -> Result<Vec<StorageItem>, StoreError> {
        (**self).scan_resort(resort_id, season_id, day_id)
    }

    fn max_batch_size(&self) -> usize {
        (**self).max_batch_size()
    }
}
