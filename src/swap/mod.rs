//! CID-keyed to multihash-keyed datastore swaps.
//!
//! [`CidSwapper::run`] walks every key under a prefix and rewrites the ones
//! holding a version 1+ content identifier so they are addressed by the
//! identifier's raw multihash instead. [`CidSwapper::revert`] undoes a set of
//! such rewrites.

pub(crate) mod batch;
pub(crate) mod pool;

use crate::codec::KeyCodec;
use crate::config::SwapConfig;
use crate::error::SwapError;
use crate::key::Key;
use crate::store::{Datastore, Query, QueryResults};
use batch::SwapBatch;
use crossbeam::channel::{Receiver, Sender};
use pool::{WorkerTally, run_workers};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info};

/// One rewrite: the value stored at `old` moves to `new`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Swap {
    pub old: Key,
    pub new: Key,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The last key segment does not decode as a content identifier.
    NotCid,
    /// Version 0 identifiers are already encoded as their multihash.
    CidV0,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Skip(SkipReason),
    Candidate(Swap),
}

/// Migrates keys under a single prefix.
///
/// `swap_sink`, when set, receives a [`Swap`] for every key that was (or, in a
/// dry run, would be) rewritten. `occupied_sink`, when set, receives every
/// dry-run target key that already holds a value. Dropping the swapper drops
/// both senders.
///
/// `retained` keys are restored from but never deleted by a revert.
pub struct CidSwapper<'a> {
    prefix: Key,
    store: &'a dyn Datastore,
    codec: &'a dyn KeyCodec,
    config: SwapConfig,
    swap_sink: Option<Sender<Swap>>,
    occupied_sink: Option<Sender<Key>>,
    retained: HashSet<Key>,
}

impl<'a> CidSwapper<'a> {
    pub fn new(
        prefix: Key,
        store: &'a dyn Datastore,
        codec: &'a dyn KeyCodec,
        config: SwapConfig,
    ) -> Self {
        Self {
            prefix,
            store,
            codec,
            config,
            swap_sink: None,
            occupied_sink: None,
            retained: HashSet::new(),
        }
    }

    pub fn with_swap_sink(mut self, sink: Sender<Swap>) -> Self {
        self.swap_sink = Some(sink);
        self
    }

    pub fn with_occupied_target_sink(mut self, sink: Sender<Key>) -> Self {
        self.occupied_sink = Some(sink);
        self
    }

    pub fn with_retained_keys(mut self, keys: HashSet<Key>) -> Self {
        self.retained = keys;
        self
    }

    /// Decides whether `key` must be rewritten and, if so, to what.
    pub fn classify(&self, key: &Key) -> Classification {
        let segment = Key::new(key.base_namespace());
        let cid = match self.codec.decode_key(&segment) {
            Ok(cid) => cid,
            Err(e) => {
                debug!(key = %key, error = %e, "could not parse key as a CID");
                return Classification::Skip(SkipReason::NotCid);
            }
        };
        if cid.version() == 0 {
            return Classification::Skip(SkipReason::CidV0);
        }
        let new = key.parent().child(&self.codec.hash_to_key(cid.hash()));
        Classification::Candidate(Swap {
            old: key.clone(),
            new,
        })
    }

    /// Swaps every CIDv1+ key under the prefix for its multihash key and
    /// returns how many keys were swapped. A dry run only counts and notifies
    /// the swap sink.
    pub fn run(&self, dry_run: bool) -> Result<u64, SwapError> {
        self.config.validate()?;
        let results = self.store.query(&Query::keys_under(self.prefix.clone()))?;
        info!(prefix = %self.prefix, dry_run, workers = self.config.worker_threads, "starting swap");
        let total = run_workers(self.config.worker_threads, || {
            self.swap_worker(dry_run, &results)
        })?;
        info!(prefix = %self.prefix, dry_run, total, "swap finished");
        Ok(total)
    }

    /// Undoes swaps as produced by [`CidSwapper::run`], restoring `old` from
    /// `new` for each record received until the channel closes.
    ///
    /// Always single-threaded: several old keys may share one new key, and the
    /// value for later ones is recovered from whichever old key was restored
    /// first. That bookkeeping lives in one worker's memory.
    pub fn revert(&self, records: Receiver<Swap>) -> Result<u64, SwapError> {
        self.config.validate()?;
        info!(prefix = %self.prefix, "starting revert");
        let total = run_workers(1, || self.unswap_worker(&records))?;
        info!(prefix = %self.prefix, total, "revert finished");
        Ok(total)
    }

    fn new_batch(&self) -> SwapBatch<'a> {
        SwapBatch::new(
            self.store,
            self.prefix.clone(),
            self.config.sync_size_bytes,
        )
    }

    fn notify(&self, batch: &mut SwapBatch<'_>, swap: Swap) {
        let Some(sink) = &self.swap_sink else {
            return;
        };
        if sink.send(swap).is_err() {
            error!("swap sink closed before the pass finished");
            batch.record_error();
        }
    }

    /// Reports `swap.new` when it already exists, e.g. as a CIDv0 key of the
    /// same content. Returns false if the check itself failed.
    fn note_occupied_target(&self, batch: &mut SwapBatch<'_>, swap: &Swap) -> bool {
        let Some(sink) = &self.occupied_sink else {
            return true;
        };
        match self.store.has(&swap.new) {
            Ok(false) => true,
            Ok(true) => {
                debug!(old = %swap.old, new = %swap.new, "target key already holds a value");
                if sink.send(swap.new.clone()).is_err() {
                    error!("occupied target sink closed before the pass finished");
                    batch.record_error();
                }
                true
            }
            Err(e) => {
                error!(new = %swap.new, error = %e, "could not check target key");
                batch.record_error();
                false
            }
        }
    }

    fn swap_worker(&self, dry_run: bool, results: &QueryResults) -> WorkerTally {
        let mut batch = self.new_batch();

        for res in results.entries() {
            let entry = match res {
                Ok(entry) => entry,
                Err(e) => {
                    error!(error = %e, "query result error");
                    batch.record_error();
                    continue;
                }
            };
            let swap = match self.classify(&entry.key) {
                Classification::Skip(_) => continue,
                Classification::Candidate(swap) => swap,
            };
            if dry_run {
                if !self.note_occupied_target(&mut batch, &swap) {
                    continue;
                }
                batch.swapped += 1;
            } else if let Err(e) = batch.swap(&swap.old, &swap.new) {
                error!(old = %swap.old, new = %swap.new, error = %e, "swap failed");
                batch.record_error();
                continue;
            }
            self.notify(&mut batch, swap);
        }

        if !dry_run {
            batch.flush();
        }
        WorkerTally {
            swapped: batch.swapped,
            errored: batch.errored,
        }
    }

    fn unswap_worker(&self, records: &Receiver<Swap>) -> WorkerTally {
        let mut batch = self.new_batch();
        // multihash key -> the old key it was first restored to
        let mut unswapped: HashMap<Key, Key> = HashMap::new();

        for sw in records.iter() {
            let restored = if self.retained.contains(&sw.new) {
                batch.copy(&sw.new, &sw.old)
            } else {
                batch.swap(&sw.new, &sw.old)
            };
            match restored {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    if let Some(restored) = unswapped.get(&sw.new) {
                        debug!(
                            new = %sw.new,
                            old = %sw.old,
                            "multihash is duplicated under additional CIDs"
                        );
                        if let Err(e) = batch.copy(restored, &sw.old) {
                            error!(
                                from = %restored,
                                to = %sw.old,
                                error = %e,
                                "could not copy previously reverted value"
                            );
                            batch.record_error();
                            continue;
                        }
                    } else {
                        match self.store.has(&sw.old) {
                            Ok(true) => {
                                debug!(old = %sw.old, "already reverted");
                                unswapped.entry(sw.new).or_insert(sw.old);
                                continue;
                            }
                            Ok(false) => {
                                error!(
                                    old = %sw.old,
                                    new = %sw.new,
                                    "could not revert: value missing under both keys"
                                );
                            }
                            Err(e) => {
                                error!(old = %sw.old, error = %e, "could not check reverted key");
                            }
                        }
                        batch.record_error();
                        continue;
                    }
                }
                Err(e) => {
                    error!(old = %sw.old, new = %sw.new, error = %e, "revert failed");
                    batch.record_error();
                    continue;
                }
            }
            self.notify(
                &mut batch,
                Swap {
                    old: sw.new.clone(),
                    new: sw.old.clone(),
                },
            );
            unswapped.entry(sw.new).or_insert(sw.old);
        }

        batch.flush();
        WorkerTally {
            swapped: batch.swapped,
            errored: batch.errored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CidSwapper, Classification, SkipReason, Swap};
    use crate::codec::{
        BinaryKeyCodec, ContentId, DAG_PB_CODEC, KeyCodec, RAW_CODEC, multihash_sha2_256,
    };
    use crate::config::SwapConfig;
    use crate::key::Key;
    use crate::store::Datastore;
    use crate::store::memory::MemoryStore;
    use crossbeam::channel::unbounded;

    fn cid_key(prefix: &str, cid: &ContentId) -> Key {
        Key::new(prefix).child(&BinaryKeyCodec.cid_to_key(cid))
    }

    #[test]
    fn classify_distinguishes_versions_and_garbage() {
        let store = MemoryStore::new();
        let codec = BinaryKeyCodec;
        let swapper = CidSwapper::new(Key::new("/blocks"), &store, &codec, SwapConfig::default());
        let mh = multihash_sha2_256(b"v");

        let v1 = cid_key("/blocks", &ContentId::v1(RAW_CODEC, mh.clone()).expect("v1"));
        match swapper.classify(&v1) {
            Classification::Candidate(Swap { old, new }) => {
                assert_eq!(old, v1);
                assert_eq!(new, Key::new("/blocks").child(&codec.hash_to_key(&mh)));
            }
            other => panic!("expected candidate, got {other:?}"),
        }

        let v0 = cid_key("/blocks", &ContentId::v0(mh).expect("v0"));
        assert_eq!(
            swapper.classify(&v0),
            Classification::Skip(SkipReason::CidV0)
        );
        assert_eq!(
            swapper.classify(&Key::new("/blocks/not-a-cid")),
            Classification::Skip(SkipReason::NotCid)
        );
    }

    #[test]
    fn revert_restores_collapsed_keys_after_flush() {
        let codec = BinaryKeyCodec;
        let mh = multihash_sha2_256(b"shared");
        let a = cid_key("/blocks", &ContentId::v1(RAW_CODEC, mh.clone()).expect("a"));
        let b = cid_key("/blocks", &ContentId::v1(DAG_PB_CODEC, mh.clone()).expect("b"));
        let c = Key::new("/blocks").child(&codec.hash_to_key(&mh));
        let store = MemoryStore::from_entries([(c.clone(), b"shared".to_vec())]);

        // threshold of one byte forces a flush (and deletion of `c`) after `a`
        let swapper = CidSwapper::new(
            Key::root(),
            &store,
            &codec,
            SwapConfig::default().with_sync_size(1),
        );
        let (tx, rx) = unbounded();
        tx.send(Swap {
            old: a.clone(),
            new: c.clone(),
        })
        .expect("send a");
        tx.send(Swap {
            old: b.clone(),
            new: c.clone(),
        })
        .expect("send b");
        drop(tx);

        assert_eq!(swapper.revert(rx).expect("revert"), 2);
        assert_eq!(store.get(&a).expect("a"), b"shared");
        assert_eq!(store.get(&b).expect("b"), b"shared");
        assert!(!store.has(&c).expect("has c"));
    }

    #[test]
    fn revert_of_missing_record_is_incomplete() {
        let codec = BinaryKeyCodec;
        let store = MemoryStore::new();
        let swapper = CidSwapper::new(Key::root(), &store, &codec, SwapConfig::default());
        let (tx, rx) = unbounded();
        tx.send(Swap {
            old: Key::new("/blocks/A"),
            new: Key::new("/blocks/B"),
        })
        .expect("send");
        drop(tx);
        let err = swapper.revert(rx).expect_err("missing");
        assert_eq!(err.partial_count(), Some(0));
    }

    #[test]
    fn retained_targets_survive_revert() {
        let codec = BinaryKeyCodec;
        let mh = multihash_sha2_256(b"both");
        let v0 = cid_key("/blocks", &ContentId::v0(mh.clone()).expect("v0"));
        let v1 = cid_key("/blocks", &ContentId::v1(RAW_CODEC, mh).expect("v1"));
        let store = MemoryStore::from_entries([(v0.clone(), b"both".to_vec())]);

        let swapper = CidSwapper::new(Key::root(), &store, &codec, SwapConfig::default())
            .with_retained_keys([v0.clone()].into());
        let (tx, rx) = unbounded();
        tx.send(Swap {
            old: v1.clone(),
            new: v0.clone(),
        })
        .expect("send");
        drop(tx);

        assert_eq!(swapper.revert(rx).expect("revert"), 1);
        assert_eq!(store.get(&v1).expect("v1"), b"both");
        assert_eq!(store.get(&v0).expect("v0"), b"both");
    }

    #[test]
    fn dry_run_reports_targets_that_already_exist() {
        let codec = BinaryKeyCodec;
        let shared = multihash_sha2_256(b"shared");
        let v0 = cid_key("/blocks", &ContentId::v0(shared.clone()).expect("v0"));
        let v1 = cid_key("/blocks", &ContentId::v1(DAG_PB_CODEC, shared).expect("v1"));
        let lone = cid_key(
            "/blocks",
            &ContentId::v1(RAW_CODEC, multihash_sha2_256(b"lone")).expect("lone"),
        );
        let store = MemoryStore::from_entries([
            (v0.clone(), b"shared".to_vec()),
            (v1, b"shared".to_vec()),
            (lone, b"lone".to_vec()),
        ]);
        let original = store.snapshot();

        let (tx, rx) = unbounded();
        let swapper = CidSwapper::new(Key::new("/blocks"), &store, &codec, SwapConfig::default())
            .with_occupied_target_sink(tx);
        assert_eq!(swapper.run(true).expect("dry run"), 2);
        drop(swapper);

        let occupied: Vec<Key> = rx.iter().collect();
        assert_eq!(occupied, vec![v0]);
        assert_eq!(store.snapshot(), original);
    }
}
