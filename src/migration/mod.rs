//! Repository step that moves block keys from CIDs to raw multihashes.
//!
//! `apply` records every key it will touch in the migration log before it
//! mutates anything, so a crash mid-migration can always be reverted from the
//! log. Multihash keys that were already occupied before that first mutation
//! (CIDv0 keys of the same content) go to the keep file, and revert never
//! deletes them. The caller is expected to hold the repository lock for the
//! duration.

pub mod log;
pub mod version;

use crate::codec::KeyCodec;
use crate::config::SwapConfig;
use crate::error::SwapError;
use crate::key::Key;
use crate::migration::log::{
    MigrationLogReader, MigrationLogWriter, keep_path, log_file_name, read_keep_file,
    reverted_path, validate_log, write_keep_file,
};
use crate::migration::version::{check_repo_version, write_repo_version};
use crate::store::Datastore;
use crate::swap::{CidSwapper, Swap};
use crossbeam::channel::{bounded, unbounded};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{error, info, warn};

pub const BLOCKS_PREFIX: &str = "/blocks";
pub const FILESTORE_PREFIX: &str = "/filestore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefixCount {
    pub prefix: Key,
    pub keys: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub log_path: PathBuf,
    pub logged: Vec<PrefixCount>,
    pub migrated: Vec<PrefixCount>,
    pub log_lines_written: u64,
    /// Target keys that already held a value and are kept on revert.
    pub retained_targets: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevertReport {
    pub log_path: PathBuf,
    pub reverted: u64,
    pub retained_targets: u64,
}

#[derive(Debug, Clone)]
pub struct KeyspaceMigration {
    from_version: u32,
    to_version: u32,
    prefixes: Vec<Key>,
    config: SwapConfig,
}

impl Default for KeyspaceMigration {
    fn default() -> Self {
        Self {
            from_version: 8,
            to_version: 9,
            prefixes: vec![Key::new(BLOCKS_PREFIX), Key::new(FILESTORE_PREFIX)],
            config: SwapConfig::default(),
        }
    }
}

impl KeyspaceMigration {
    pub fn new(config: SwapConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_versions(mut self, from_version: u32, to_version: u32) -> Self {
        self.from_version = from_version;
        self.to_version = to_version;
        self
    }

    pub fn with_prefixes(mut self, prefixes: Vec<Key>) -> Self {
        self.prefixes = prefixes;
        self
    }

    pub fn versions(&self) -> String {
        format!("{}-to-{}", self.from_version, self.to_version)
    }

    pub fn reversible(&self) -> bool {
        true
    }

    pub fn prefixes(&self) -> &[Key] {
        &self.prefixes
    }

    pub fn log_path(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(log_file_name(self.from_version, self.to_version))
    }

    /// Logs every key to migrate, migrates them, then bumps the repo version.
    pub fn apply(
        &self,
        repo_root: &Path,
        store: &dyn Datastore,
        codec: &dyn KeyCodec,
    ) -> Result<ApplyReport, SwapError> {
        info!(migration = %self.versions(), "applying repo migration");
        self.config.validate()?;
        check_repo_version(repo_root, self.from_version)?;

        let log_path = self.log_path(repo_root);
        info!(path = %log_path.display(), "writing migration log");
        let writer = MigrationLogWriter::open(&log_path, self.config.swap_queue_capacity)?;
        // an existing keep file was written before any earlier attempt mutated
        // the store; targets seen now may be our own partial work
        let keep = keep_path(&log_path);
        let reuse_keep = keep.exists();
        let (occupied_tx, occupied_rx) = unbounded();

        let mut logged = Vec::with_capacity(self.prefixes.len());
        let mut dry_run_error = None;
        for prefix in &self.prefixes {
            let mut swapper = CidSwapper::new(prefix.clone(), store, codec, self.config.clone())
                .with_swap_sink(writer.sender());
            if !reuse_keep {
                swapper = swapper.with_occupied_target_sink(occupied_tx.clone());
            }
            match swapper.run(true) {
                Ok(keys) => {
                    info!(prefix = %prefix, keys, "CIDv1 keys added to migration log");
                    logged.push(PrefixCount {
                        prefix: prefix.clone(),
                        keys,
                    });
                }
                Err(e) => {
                    dry_run_error = Some(e);
                    break;
                }
            }
        }
        // every swapper (and its sender) is gone, so the writer can drain
        let log_lines_written = match (writer.finish(), dry_run_error) {
            (Err(e), _) | (Ok(_), Some(e)) => {
                error!(error = %e, "could not complete migration log");
                return Err(e);
            }
            (Ok(lines), None) => lines,
        };
        drop(occupied_tx);

        let retained_targets = if reuse_keep {
            warn!(path = %keep.display(), "keeping target keys recorded by an earlier attempt");
            read_keep_file(&keep)?.len() as u64
        } else {
            let occupied: BTreeSet<Key> = occupied_rx.iter().collect();
            write_keep_file(&keep, &occupied)?;
            if !occupied.is_empty() {
                info!(keys = occupied.len(), "target keys already present will be kept on revert");
            }
            occupied.len() as u64
        };

        let mut migrated = Vec::with_capacity(self.prefixes.len());
        for prefix in &self.prefixes {
            let swapper = CidSwapper::new(prefix.clone(), store, codec, self.config.clone());
            let keys = swapper.run(false).inspect_err(|e| {
                error!(prefix = %prefix, error = %e, "migration pass failed");
            })?;
            info!(prefix = %prefix, keys, "CIDv1 keys migrated");
            migrated.push(PrefixCount {
                prefix: prefix.clone(),
                keys,
            });
        }

        write_repo_version(repo_root, self.to_version)?;
        info!(version = self.to_version, "updated version file");
        Ok(ApplyReport {
            log_path,
            logged,
            migrated,
            log_lines_written,
            retained_targets,
        })
    }

    /// Restores every key named in the migration log, resets the repo
    /// version, and marks the log as consumed.
    pub fn revert(
        &self,
        repo_root: &Path,
        store: &dyn Datastore,
        codec: &dyn KeyCodec,
    ) -> Result<RevertReport, SwapError> {
        info!(migration = %self.versions(), "reverting repo migration");
        self.config.validate()?;
        check_repo_version(repo_root, self.to_version)?;

        let log_path = self.log_path(repo_root);
        info!(path = %log_path.display(), "reading migration log");
        let planned = validate_log(&log_path, codec)
            .inspect_err(|e| error!(error = %e, "migration log is not usable"))?;
        let keep = keep_path(&log_path);
        let retained = read_keep_file(&keep)?;
        let retained_targets = retained.len() as u64;
        info!(planned, retained_targets, "migration log validated");
        let reader = MigrationLogReader::open(&log_path, codec)?;

        // logged keys carry their own prefix, so the reverter works from the root
        let swapper = CidSwapper::new(Key::root(), store, codec, self.config.clone())
            .with_retained_keys(retained);
        let (tx, rx) = bounded::<Swap>(self.config.swap_queue_capacity);

        let (reverted, read_result) = thread::scope(|scope| {
            let feeder = scope.spawn(move || -> Result<u64, SwapError> {
                let mut sent = 0u64;
                for swap in reader {
                    if tx.send(swap?).is_err() {
                        break;
                    }
                    sent += 1;
                }
                Ok(sent)
            });
            let reverted = swapper.revert(rx);
            let read_result = feeder.join().map_err(|_| SwapError::WorkerPanicked);
            (reverted, read_result)
        });

        // the log was validated, but a read failure is still the root cause
        if let Err(e) = read_result.and_then(|r| r) {
            error!(error = %e, "could not read migration log");
            return Err(e);
        }
        let reverted = reverted.inspect_err(|e| error!(error = %e, "revert failed"))?;
        info!(reverted, "multihashes reverted to CIDv1s");

        write_repo_version(repo_root, self.from_version)?;
        info!(version = self.from_version, "reverted version file");

        let consumed = reverted_path(&log_path);
        std::fs::rename(&log_path, &consumed).inspect_err(|e| {
            error!(error = %e, "could not rename the migration log, but the revert worked");
        })?;
        if keep.exists() {
            std::fs::rename(&keep, reverted_path(&keep))?;
        }
        Ok(RevertReport {
            log_path: consumed,
            reverted,
            retained_targets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::KeyspaceMigration;
    use crate::codec::BinaryKeyCodec;
    use crate::config::SwapConfig;
    use crate::error::SwapError;
    use crate::migration::version::write_repo_version;
    use crate::store::memory::MemoryStore;
    use tempfile::tempdir;

    #[test]
    fn versions_and_log_path_follow_convention() {
        let migration = KeyspaceMigration::default();
        assert_eq!(migration.versions(), "8-to-9");
        assert!(migration.reversible());
        assert_eq!(migration.prefixes().len(), 2);
        let custom = KeyspaceMigration::new(SwapConfig::default()).with_versions(10, 11);
        assert!(
            custom
                .log_path(std::path::Path::new("/repo"))
                .ends_with("10-to-11-cids.txt")
        );
    }

    #[test]
    fn apply_refuses_wrong_version() {
        let dir = tempdir().expect("temp");
        write_repo_version(dir.path(), 9).expect("version");
        let err = KeyspaceMigration::default()
            .apply(dir.path(), &MemoryStore::new(), &BinaryKeyCodec)
            .expect_err("wrong version");
        assert!(matches!(err, SwapError::VersionMismatch { .. }));
        assert!(!KeyspaceMigration::default().log_path(dir.path()).exists());
    }

    #[test]
    fn revert_without_log_fails_before_touching_version() {
        let dir = tempdir().expect("temp");
        write_repo_version(dir.path(), 9).expect("version");
        let err = KeyspaceMigration::default()
            .revert(dir.path(), &MemoryStore::new(), &BinaryKeyCodec)
            .expect_err("no log");
        assert!(matches!(err, SwapError::Io(_)));
        assert_eq!(
            crate::migration::version::read_repo_version(dir.path()).expect("read"),
            9
        );
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let dir = tempdir().expect("temp");
        write_repo_version(dir.path(), 8).expect("version");
        let err = KeyspaceMigration::new(SwapConfig::default().with_worker_threads(0))
            .apply(dir.path(), &MemoryStore::new(), &BinaryKeyCodec)
            .expect_err("invalid");
        assert_eq!(err.code_str(), "invalid_config");
    }
}
