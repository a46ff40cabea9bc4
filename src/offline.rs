use crate::codec::KeyCodec;
use crate::error::SwapError;
use crate::key::Key;
use crate::migration::log::{LogLines, MigrationLogReader, REVERTED_SUFFIX, swap_for_logged_key};
use crate::swap::Swap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollapseGroup {
    pub new_key: Key,
    pub old_keys: Vec<Key>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvalidLine {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogInspectReport {
    pub entries: u64,
    pub distinct_targets: u64,
    /// Lines repeating an old key already seen, e.g. after an interrupted
    /// apply was rerun.
    pub duplicate_lines: u64,
    /// Multihash keys that several distinct old keys collapse onto.
    pub collapse_groups: Vec<CollapseGroup>,
    pub invalid_lines: Vec<InvalidLine>,
    pub sha256_hex: String,
    pub reverted: bool,
}

impl LogInspectReport {
    pub fn ok(&self) -> bool {
        self.invalid_lines.is_empty()
    }
}

/// Summarizes a migration log without touching any store. Bad lines are
/// reported, not fatal.
pub fn inspect_migration_log(
    path: &Path,
    codec: &dyn KeyCodec,
) -> Result<LogInspectReport, SwapError> {
    let lines = LogLines::open(path)?;
    let mut entries = 0u64;
    let mut duplicate_lines = 0u64;
    let mut invalid_lines = Vec::new();
    let mut targets: BTreeMap<Key, BTreeSet<Key>> = BTreeMap::new();

    for numbered in lines {
        let (line_no, text) = numbered?;
        let parsed = text.and_then(|text| {
            if text.trim().is_empty() {
                return Ok(None);
            }
            swap_for_logged_key(codec, &text).map(Some)
        });
        match parsed {
            Ok(None) => {}
            Ok(Some(Swap { old, new })) => {
                entries += 1;
                if !targets.entry(new).or_default().insert(old) {
                    duplicate_lines += 1;
                }
            }
            Err(message) => invalid_lines.push(InvalidLine {
                line: line_no,
                message,
            }),
        }
    }

    let collapse_groups = targets
        .iter()
        .filter(|(_, olds)| olds.len() > 1)
        .map(|(new_key, olds)| CollapseGroup {
            new_key: new_key.clone(),
            old_keys: olds.iter().cloned().collect(),
        })
        .collect();

    Ok(LogInspectReport {
        entries,
        distinct_targets: targets.len() as u64,
        duplicate_lines,
        collapse_groups,
        invalid_lines,
        sha256_hex: sha256_file_hex(path)?,
        reverted: path.to_string_lossy().ends_with(REVERTED_SUFFIX),
    })
}

/// Every swap a revert of this log would perform, in log order.
pub fn planned_swaps(path: &Path, codec: &dyn KeyCodec) -> Result<Vec<Swap>, SwapError> {
    MigrationLogReader::open(path, codec)?.collect()
}

pub fn sha256_file_hex(path: &Path) -> Result<String, SwapError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
