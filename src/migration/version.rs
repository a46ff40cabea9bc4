use crate::error::SwapError;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub const VERSION_FILE: &str = "version";

pub fn read_repo_version(root: &Path) -> Result<u32, SwapError> {
    let raw = fs::read_to_string(root.join(VERSION_FILE))?;
    raw.trim()
        .parse::<u32>()
        .map_err(|e| SwapError::Decode(format!("invalid repo version {:?}: {e}", raw.trim())))
}

pub fn check_repo_version(root: &Path, expected: u32) -> Result<(), SwapError> {
    let raw = fs::read_to_string(root.join(VERSION_FILE))?;
    let actual = raw.trim();
    if actual.parse::<u32>().ok() != Some(expected) {
        return Err(SwapError::VersionMismatch {
            expected,
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Replaces the version marker atomically: temp file, fsync, rename, fsync of
/// the directory.
pub fn write_repo_version(root: &Path, version: u32) -> Result<(), SwapError> {
    let mut tmp = NamedTempFile::new_in(root)?;
    writeln!(tmp, "{version}")?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(root.join(VERSION_FILE))
        .map_err(|e| SwapError::Io(e.error))?;
    fsync_dir(root)?;
    Ok(())
}

#[cfg(unix)]
pub(crate) fn fsync_dir(path: &Path) -> Result<(), SwapError> {
    let dir = fs::File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn fsync_dir(_path: &Path) -> Result<(), SwapError> {
    Ok(())
}
