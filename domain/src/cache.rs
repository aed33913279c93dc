use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use events::DataType;
use log::*;
use serde_json::Value;

/// Remembers the last payload seen per data type so identical re-pushes from
/// the server do not trigger listener notifications.
///
/// There is no TTL or eviction; the cache holds at most one entry per
/// `DataType`. Comparison is structural: two payloads that serialize to the
/// same JSON (object key order aside) are the same payload.
#[derive(Debug, Default)]
pub struct DataCacheManager {
    entries: DashMap<DataType, Value>,
}

impl DataCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true, and remembers `data`, when it differs from the last
    /// payload seen for `data_type`. Returns false otherwise.
    pub fn has_data_changed(&self, data_type: DataType, data: &Value) -> bool {
        match self.entries.entry(data_type) {
            Entry::Occupied(mut cached) => {
                if cached.get() == data {
                    trace!("{data_type} payload unchanged");
                    return false;
                }
                cached.insert(data.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(data.clone());
            }
        }
        true
    }

    /// Forget every cached payload.
    pub fn clear_cache(&self) {
        debug!("Clearing {} cached payload(s)", self.entries.len());
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_payload_reports_change_once() {
        let cache = DataCacheManager::new();
        let products = json!([{"id": "p1", "stock": 4}]);

        assert!(cache.has_data_changed(DataType::Products, &products));
        assert!(!cache.has_data_changed(DataType::Products, &products.clone()));
    }

    #[test]
    fn test_different_payload_reports_change_again() {
        let cache = DataCacheManager::new();
        let x = json!([{"id": "p1", "stock": 4}]);
        let y = json!([{"id": "p1", "stock": 3}]);

        assert!(cache.has_data_changed(DataType::Products, &x));
        assert!(cache.has_data_changed(DataType::Products, &y));
        assert!(!cache.has_data_changed(DataType::Products, &y));
        // Going back to an older payload is a change too
        assert!(cache.has_data_changed(DataType::Products, &x));
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let cache = DataCacheManager::new();
        let a: Value = serde_json::from_str(r#"{"id": "s1", "total": 10}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"total": 10, "id": "s1"}"#).unwrap();

        assert!(cache.has_data_changed(DataType::Sales, &a));
        assert!(!cache.has_data_changed(DataType::Sales, &b));
    }

    #[test]
    fn test_types_are_tracked_independently() {
        let cache = DataCacheManager::new();
        let empty = json!([]);

        for data_type in DataType::ALL {
            assert!(cache.has_data_changed(data_type, &empty));
        }
        assert_eq!(cache.len(), 5);
        assert!(!cache.has_data_changed(DataType::PretProduits, &empty));
    }

    #[test]
    fn test_first_null_payload_counts_as_change() {
        let cache = DataCacheManager::new();
        assert!(cache.has_data_changed(DataType::DepenseDuMois, &Value::Null));
        assert!(!cache.has_data_changed(DataType::DepenseDuMois, &Value::Null));
    }

    #[test]
    fn test_clear_cache_forgets_everything() {
        let cache = DataCacheManager::new();
        let sales = json!([{"id": "s1"}]);
        cache.has_data_changed(DataType::Sales, &sales);

        cache.clear_cache();

        assert!(cache.is_empty());
        assert!(cache.has_data_changed(DataType::Sales, &sales));
    }
}
