//! The migration log: one old key per line, appended during the dry run and
//! replayed to revert. New keys are never stored; they are recomputed from
//! the old key with the codec.
//!
//! Next to the log sits the keep file (`<log>.keep`), one key per line: the
//! multihash keys that already held a value before the first mutation. A
//! CIDv0 key is spelled exactly like its multihash, so reverting must leave
//! those keys in place.

use crate::codec::KeyCodec;
use crate::error::SwapError;
use crate::key::Key;
use crate::migration::version::fsync_dir;
use crate::swap::Swap;
use crossbeam::channel::{Receiver, Sender, bounded};
use std::collections::{BTreeSet, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const REVERTED_SUFFIX: &str = ".reverted";
pub const KEEP_SUFFIX: &str = ".keep";

pub fn log_file_name(from_version: u32, to_version: u32) -> String {
    format!("{from_version}-to-{to_version}-cids.txt")
}

pub fn reverted_path(path: &Path) -> PathBuf {
    with_suffix(path, REVERTED_SUFFIX)
}

pub fn keep_path(log_path: &Path) -> PathBuf {
    with_suffix(log_path, KEEP_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Recomputes the swap a logged old key stood for.
pub fn swap_for_logged_key(codec: &dyn KeyCodec, line: &str) -> Result<Swap, String> {
    let old = Key::new(line.trim());
    if old.is_root() {
        return Err("empty key".into());
    }
    let cid = codec
        .decode_key(&Key::new(old.base_namespace()))
        .map_err(|e| format!("could not parse cid from {old}: {e}"))?;
    if cid.version() == 0 {
        return Err(format!("{old} is a version 0 identifier and is never swapped"));
    }
    let new = old.parent().child(&codec.hash_to_key(cid.hash()));
    Ok(Swap { old, new })
}

/// Background writer appending the old key of every received swap.
///
/// Producers get handles from [`MigrationLogWriter::sender`]. The writer
/// drains until every handle, including its own, is dropped;
/// [`MigrationLogWriter::finish`] is the point where the log is known to be
/// complete and durable.
pub struct MigrationLogWriter {
    path: PathBuf,
    tx: Sender<Swap>,
    handle: JoinHandle<Result<u64, SwapError>>,
}

impl MigrationLogWriter {
    pub fn open(path: &Path, capacity: usize) -> Result<Self, SwapError> {
        if path.exists() {
            warn!(
                path = %path.display(),
                "migration log already exists; entries will be appended"
            );
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (tx, rx) = bounded(capacity.max(1));
        let handle = thread::Builder::new()
            .name("migration-log-writer".into())
            .spawn(move || write_lines(file, rx))?;
        Ok(Self {
            path: path.to_path_buf(),
            tx,
            handle,
        })
    }

    pub fn sender(&self) -> Sender<Swap> {
        self.tx.clone()
    }

    /// Closes the writer's own handle, waits for the queue to drain, and
    /// returns the number of lines written after flush and fsync.
    ///
    /// Blocks until every sender handed out has been dropped.
    pub fn finish(self) -> Result<u64, SwapError> {
        let Self { path, tx, handle } = self;
        drop(tx);
        let lines = handle.join().map_err(|_| SwapError::WorkerPanicked)??;
        debug!(path = %path.display(), lines, "migration log flushed");
        Ok(lines)
    }
}

fn write_lines(file: File, rx: Receiver<Swap>) -> Result<u64, SwapError> {
    let mut out = BufWriter::new(file);
    let mut lines = 0u64;
    for swap in rx.iter() {
        writeln!(out, "{}", swap.old)?;
        lines += 1;
    }
    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(lines)
}

/// Numbered raw lines of a log file. A line that is not UTF-8 comes back as
/// an `Err(message)` with its number; only real I/O failures end the read.
pub(crate) struct LogLines {
    reader: BufReader<File>,
    line_no: u64,
}

impl LogLines {
    pub(crate) fn open(path: &Path) -> Result<Self, SwapError> {
        Ok(Self::from_file(File::open(path)?))
    }

    fn from_file(file: File) -> Self {
        Self {
            reader: BufReader::new(file),
            line_no: 0,
        }
    }
}

impl Iterator for LogLines {
    type Item = io::Result<(u64, Result<String, String>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => {
                self.line_no += 1;
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                let text =
                    String::from_utf8(buf).map_err(|e| format!("line is not valid UTF-8: {e}"));
                Some(Ok((self.line_no, text)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Iterates the swaps recorded in a migration log. Blank lines are skipped.
pub struct MigrationLogReader<'c> {
    lines: LogLines,
    codec: &'c dyn KeyCodec,
}

impl<'c> MigrationLogReader<'c> {
    pub fn open(path: &Path, codec: &'c dyn KeyCodec) -> Result<Self, SwapError> {
        Ok(Self {
            lines: LogLines::open(path)?,
            codec,
        })
    }
}

impl Iterator for MigrationLogReader<'_> {
    type Item = Result<Swap, SwapError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (line, text) = match self.lines.next()? {
                Ok(numbered) => numbered,
                Err(e) => return Some(Err(SwapError::Io(e))),
            };
            let parsed = text.and_then(|text| {
                if text.trim().is_empty() {
                    return Ok(None);
                }
                swap_for_logged_key(self.codec, &text).map(Some)
            });
            match parsed {
                Ok(None) => continue,
                Ok(Some(swap)) => return Some(Ok(swap)),
                Err(message) => return Some(Err(SwapError::LogCorrupt { line, message })),
            }
        }
    }
}

/// Parses the whole log and returns how many swaps it records. Run before
/// replaying so a bad line fails the revert before the store is touched.
pub fn validate_log(path: &Path, codec: &dyn KeyCodec) -> Result<u64, SwapError> {
    MigrationLogReader::open(path, codec)?.try_fold(0u64, |count, swap| swap.map(|_| count + 1))
}

/// Atomically replaces the keep file with `targets`.
pub fn write_keep_file(path: &Path, targets: &BTreeSet<Key>) -> Result<(), SwapError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        for key in targets {
            writeln!(out, "{key}")?;
        }
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| SwapError::Io(e.error))?;
    fsync_dir(dir)
}

/// Reads a keep file. A missing file means nothing has to be kept.
pub fn read_keep_file(path: &Path) -> Result<HashSet<Key>, SwapError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no keep file");
            return Ok(HashSet::new());
        }
        Err(e) => return Err(e.into()),
    };
    let mut keys = HashSet::new();
    for numbered in LogLines::from_file(file) {
        let (line, text) = numbered?;
        let text = text.map_err(|message| SwapError::LogCorrupt { line, message })?;
        if !text.trim().is_empty() {
            keys.insert(Key::new(text.trim()));
        }
    }
    Ok(keys)
}
