//! Temp-then-rename writes
//!
//! Poka-Yoke: every artifact copy and every metadata rewrite lands under a
//! `.partial` name first and is renamed into place only once it is complete
//! and synced. An interrupted run leaves `.partial` files behind, never a
//! truncated file under a real episode name.

use crate::{Error, Result};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const PARTIAL_SUFFIX: &str = ".partial";

/// `<path>.partial`
#[must_use]
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Whether `path` is an in-flight temporary
#[must_use]
pub fn is_partial(path: &Path) -> bool {
    path.as_os_str().to_string_lossy().ends_with(PARTIAL_SUFFIX)
}

/// Write `bytes` to `path` atomically, creating parent directories
///
/// # Errors
///
/// Returns error if the temporary cannot be written, synced or renamed
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic_with(path, |file| {
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    })
}

/// Let `fill` write the temporary file, then sync and rename it into place
///
/// The temporary is removed if `fill` or the rename fails.
///
/// # Errors
///
/// Returns whatever `fill` returns, or the IO error from sync/rename
pub fn write_atomic_with<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(File) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = partial_path(path);

    let result = File::create(&temp_path)
        .map_err(Error::from)
        .and_then(fill)
        .and_then(|()| File::open(&temp_path)?.sync_all().map_err(Error::from))
        .and_then(|()| fs::rename(&temp_path, path).map_err(Error::from));

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Copy `src` to `dst` atomically; returns bytes copied
///
/// # Errors
///
/// Returns error if `src` cannot be read or `dst` cannot be written
pub fn copy_atomic(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0;
    write_atomic_with(dst, |file| {
        let mut reader = File::open(src)?;
        let mut writer = BufWriter::new(file);
        copied = std::io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        Ok(())
    })?;
    Ok(copied)
}
