pub mod memory;

use crate::key::Key;
use crossbeam::channel::{Receiver, unbounded};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(Key),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub prefix: Key,
    pub keys_only: bool,
}

impl Query {
    pub fn keys_under(prefix: Key) -> Self {
        Self {
            prefix,
            keys_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEntry {
    pub key: Key,
    /// Always `None` for keys-only queries.
    pub value: Option<Vec<u8>>,
}

/// Streaming result of a prefix query.
///
/// The underlying channel is multi-consumer: any number of threads may drain
/// `entries()` concurrently and each entry is delivered to exactly one of them.
/// The stream ends when the producer side is dropped.
pub struct QueryResults {
    rx: Receiver<Result<QueryEntry, StoreError>>,
}

impl QueryResults {
    pub fn from_receiver(rx: Receiver<Result<QueryEntry, StoreError>>) -> Self {
        Self { rx }
    }

    /// Builds an already-complete stream from materialized entries.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = Result<QueryEntry, StoreError>>,
    {
        let (tx, rx) = unbounded();
        for entry in entries {
            // the receiver is alive in this scope, so sending cannot fail
            let _ = tx.send(entry);
        }
        Self { rx }
    }

    /// Blocks until the next entry is available; `None` once the stream is
    /// exhausted.
    pub fn next_entry(&self) -> Option<Result<QueryEntry, StoreError>> {
        self.rx.recv().ok()
    }

    pub fn entries(&self) -> impl Iterator<Item = Result<QueryEntry, StoreError>> + '_ {
        self.rx.iter()
    }
}

/// Ordered key-value store consumed by the migration engine.
///
/// Implementations provide per-key atomicity only. `sync` makes every write
/// and delete under `prefix` durable; `delete` of an absent key succeeds.
pub trait Datastore: Send + Sync {
    fn get(&self, key: &Key) -> Result<Vec<u8>, StoreError>;

    fn has(&self, key: &Key) -> Result<bool, StoreError> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn put(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError>;

    fn delete(&self, key: &Key) -> Result<(), StoreError>;

    fn sync(&self, prefix: &Key) -> Result<(), StoreError>;

    fn query(&self, query: &Query) -> Result<QueryResults, StoreError>;
}
