use crate::key::Key;
use crate::store::{Datastore, Query, QueryEntry, QueryResults, StoreError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory ordered store. Writes are immediately visible and `sync` only
/// counts invocations, which tests use to observe batching.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Key, Vec<u8>>>,
    syncs: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Key, Vec<u8>)>,
    {
        Self {
            entries: RwLock::new(entries.into_iter().collect()),
            syncs: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<Key, Vec<u8>> {
        self.entries.read().clone()
    }

    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    fn matching(&self, prefix: &Key, keys_only: bool) -> Vec<Result<QueryEntry, StoreError>> {
        let entries = self.entries.read();
        entries
            .range((Bound::Included(prefix.clone()), Bound::Unbounded))
            .take_while(|(key, _)| key.as_str().starts_with(prefix.as_str()))
            .filter(|(key, _)| key.has_prefix(prefix))
            .map(|(key, value)| {
                Ok(QueryEntry {
                    key: key.clone(),
                    value: (!keys_only).then(|| value.clone()),
                })
            })
            .collect()
    }
}

impl Datastore for MemoryStore {
    fn get(&self, key: &Key) -> Result<Vec<u8>, StoreError> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    fn has(&self, key: &Key) -> Result<bool, StoreError> {
        Ok(self.entries.read().contains_key(key))
    }

    fn put(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.write().insert(key.clone(), value);
        Ok(())
    }

    fn delete(&self, key: &Key) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn sync(&self, _prefix: &Key) -> Result<(), StoreError> {
        self.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn query(&self, query: &Query) -> Result<QueryResults, StoreError> {
        Ok(QueryResults::from_entries(
            self.matching(&query.prefix, query.keys_only),
        ))
    }
}
