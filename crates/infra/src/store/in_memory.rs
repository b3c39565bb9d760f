use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use liftride_core::StorageItem;

use super::{DEFAULT_MAX_BATCH_SIZE, StorageClient, StoreError};

type RowKey = (String, String);

/// In-memory ride table for tests/dev.
///
/// `with_write_capacity(n)` makes every batch write persist at most `n` items
/// and return the remainder, the way a throttled table would.
#[derive(Debug)]
pub struct InMemoryRideStore {
    rows: RwLock<BTreeMap<RowKey, StorageItem>>,
    write_capacity: Option<usize>,
    batch_calls: AtomicU64,
}

impl InMemoryRideStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            write_capacity: None,
            batch_calls: AtomicU64::new(0),
        }
    }

    pub fn with_write_capacity(mut self, capacity: usize) -> Self {
        self.write_capacity = Some(capacity);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `batch_write` calls served so far.
    pub fn batch_calls(&self) -> u64 {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, skier_id: &str, range_key: &str) -> Option<StorageItem> {
        let map = self.rows.read().ok()?;
        map.get(&(skier_id.to_string(), range_key.to_string())).cloned()
    }

    fn insert(&self, items: &[StorageItem]) -> Result<(), StoreError> {
        let mut map = self
            .rows
            .write()
            .map_err(|_| StoreError::Unavailable("ride table lock poisoned".to_string()))?;
        for item in items {
            map.insert(
                (item.skier_id.clone(), item.range_key()),
                item.clone(),
            );
        }
        Ok(())
    }

    fn select(&self, pred: impl Fn(&StorageItem) -> bool) -> Result<Vec<StorageItem>, StoreError> {
        let map = self
            .rows
            .read()
            .map_err(|_| StoreError::Unavailable("ride table lock poisoned".to_string()))?;
        Ok(map.values().filter(|i| pred(i)).cloned().collect())
    }
}

impl Default for InMemoryRideStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageClient for InMemoryRideStore {
    fn batch_write(&self, items: &[StorageItem]) -> Result<Vec<StorageItem>, StoreError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);

        let accepted = self.write_capacity.unwrap_or(items.len()).min(items.len());
        let (written, unprocessed) = items.split_at(accepted);
        self.insert(written)?;

        Ok(unprocessed.to_vec())
    }

    fn put(&self, item: &StorageItem) -> Result<(), StoreError> {
        self.insert(std::slice::from_ref(item))
    }

    fn query_skier(&self, skier_id: &str) -> Result<Vec<StorageItem>, StoreError> {
        self.select(|i| i.skier_id == skier_id)
    }

    fn scan_resort(
        &self,
        resort_id: &str,
        season_id: &str,
        day_id: &str,
    ) -> Result<Vec<StorageItem>, StoreError> {
        self.select(|i| i.resort_id == resort_id && i.season_id() == season_id && i.day_id() == day_id)
    }

    fn max_batch_size(&self) -> usize {
        DEFAULT_MAX_BATCH_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liftride_core::RideEvent;

    fn item(skier: u32, resort: u32, lift: u32, day: &str, time: u32) -> StorageItem {
        StorageItem::from(&RideEvent {
            skier_id: skier,
            resort_id: resort,
            lift_id: lift,
            season_id: "2024".to_string(),
            day_id: day.to_string(),
            time,
        })
    }

    #[test]
    fn same_key_overwrites() {
        let store = InMemoryRideStore::new();
        store.put(&item(1, 1, 5, "1", 10)).unwrap();
        store.put(&item(1, 2, 5, "1", 10)).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("1", "2024:5:1:10").unwrap().resort_id, "2");
    }

    #[test]
    fn throttled_store_returns_the_tail() {
        let store = InMemoryRideStore::new().with_write_capacity(2);
        let items: Vec<_> = (1..=5).map(|t| item(7, 1, 1, "1", t)).collect();

        let unprocessed = store.batch_write(&items).unwrap();
        assert_eq!(unprocessed, items[2..].to_vec());
        assert_eq!(store.len(), 2);
        assert_eq!(store.batch_calls(), 1);
    }

    #[test]
    fn query_and_scan_filter_by_key_and_index() {
        let store = InMemoryRideStore::new();
        store
            .batch_write(&[
                item(1, 3, 5, "1", 10),
                item(1, 3, 6, "2", 10),
                item(2, 3, 7, "1", 11),
                item(3, 4, 7, "1", 11),
            ])
            .unwrap();

        assert_eq!(store.query_skier("1").unwrap().len(), 2);
        let scanned = store.scan_resort("3", "2024", "1").unwrap();
        let mut skiers: Vec<_> = scanned.iter().map(|i| i.skier_id.as_str()).collect();
        skiers.sort_unstable();
        assert_eq!(skiers, ["1", "2"]);
        assert!(store.scan_resort("3", "2023", "1").unwrap().is_empty());
    }
}
