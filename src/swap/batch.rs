use crate::key::Key;
use crate::store::{Datastore, StoreError};
use tracing::{debug, error};

/// Per-worker swap state. Never shared between threads.
///
/// A key enters `to_delete` only after its value has been written under the
/// replacement key, and it is deleted only after a successful sync of
/// `sync_prefix`. Deletions are synced again before the flush completes.
pub(crate) struct SwapBatch<'a> {
    store: &'a dyn Datastore,
    sync_prefix: Key,
    sync_size: u64,
    pub(crate) swapped: u64,
    pub(crate) errored: u64,
    cur_sync_size: u64,
    to_delete: Vec<Key>,
}

impl<'a> SwapBatch<'a> {
    pub(crate) fn new(store: &'a dyn Datastore, sync_prefix: Key, sync_size: u64) -> Self {
        Self {
            store,
            sync_prefix,
            sync_size,
            swapped: 0,
            errored: 0,
            cur_sync_size: 0,
            to_delete: Vec::new(),
        }
    }

    /// Copies the value at `from` to `to` and queues `from` for deletion.
    pub(crate) fn swap(&mut self, from: &Key, to: &Key) -> Result<(), StoreError> {
        let value = self.store.get(from)?;
        let len = value.len() as u64;
        self.store.put(to, value)?;
        self.to_delete.push(from.clone());
        self.swapped += 1;
        self.add_bytes(len);
        Ok(())
    }

    /// Copies the value already restored at `source` to `to` without queueing
    /// anything for deletion.
    pub(crate) fn copy(&mut self, source: &Key, to: &Key) -> Result<(), StoreError> {
        let value = self.store.get(source)?;
        let len = value.len() as u64;
        self.store.put(to, value)?;
        self.swapped += 1;
        self.add_bytes(len);
        Ok(())
    }

    pub(crate) fn record_error(&mut self) {
        self.errored += 1;
    }

    pub(crate) fn pending_deletes(&self) -> usize {
        self.to_delete.len()
    }

    fn add_bytes(&mut self, len: u64) {
        self.cur_sync_size = self.cur_sync_size.saturating_add(len);
        if self.cur_sync_size >= self.sync_size {
            self.flush();
        }
    }

    /// Sync, delete every pending old key, sync again. Failures are logged and
    /// counted; a failed first sync keeps the pending keys for the next flush
    /// so nothing is deleted before its replacement is durable.
    pub(crate) fn flush(&mut self) {
        self.cur_sync_size = 0;
        if let Err(e) = self.sync() {
            error!(prefix = %self.sync_prefix, error = %e, "sync before deletion failed");
            self.errored += 1;
            return;
        }
        if self.to_delete.is_empty() {
            return;
        }
        for key in self.to_delete.drain(..) {
            if let Err(e) = self.store.delete(&key) {
                error!(key = %key, error = %e, "failed to delete swapped key");
                self.errored += 1;
            }
        }
        if let Err(e) = self.sync() {
            error!(prefix = %self.sync_prefix, error = %e, "sync of deletions failed");
            self.errored += 1;
        }
    }

    fn sync(&self) -> Result<(), StoreError> {
        debug!(
            prefix = %self.sync_prefix,
            swapped = self.swapped,
            "migration worker syncing"
        );
        self.store.sync(&self.sync_prefix)
    }
}
