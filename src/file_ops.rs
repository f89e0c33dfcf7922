//! Filesystem primitives used by the organize engine.
//!
//! Renames go through the [`FileOps`] trait so callers can substitute the
//! rename step; everything else works on the real filesystem directly.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The rename step of a move.
pub trait FileOps: Send + Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// [`FileOps`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileOps;

impl FileOps for StdFileOps {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

/// How a move completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Renamed,
    /// Rename crossed a filesystem boundary; the entry was copied then removed.
    CopiedAcrossDevices,
}

pub fn is_cross_device(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::CrossesDevices
}

/// Moves a file or directory, falling back to copy plus delete across devices.
pub fn move_path(ops: &dyn FileOps, from: &Path, to: &Path) -> io::Result<MoveOutcome> {
    match ops.rename(from, to) {
        Ok(()) => Ok(MoveOutcome::Renamed),
        Err(err) if is_cross_device(&err) => {
            info!(
                from = %from.display(),
                to = %to.display(),
                "rename crossed devices, copying instead"
            );
            copy_recursive(from, to, true)?;
            Ok(MoveOutcome::CopiedAcrossDevices)
        }
        Err(err) => Err(err),
    }
}

/// Copies one file's bytes, truncating any existing destination.
///
/// With `remove_source` the source is deleted once the copy is complete.
pub fn copy_file(from: &Path, to: &Path, remove_source: bool) -> io::Result<u64> {
    let mut reader = File::open(from)?;
    let mut writer = File::create(to)?;
    let copied = io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    drop(reader);

    // Permission bits are best-effort; the bytes are what matter.
    match fs::metadata(from) {
        Ok(meta) => {
            if let Err(err) = fs::set_permissions(to, meta.permissions()) {
                debug!(to = %to.display(), error = %err, "could not copy permissions");
            }
        }
        Err(err) => debug!(from = %from.display(), error = %err, "could not read permissions"),
    }
    if remove_source {
        fs::remove_file(from)?;
    }
    debug!(from = %from.display(), to = %to.display(), bytes = copied, "copied file");
    Ok(copied)
}

/// Copies a file or a whole directory tree.
///
/// Returns the number of bytes copied. With `remove_source` the source is
/// removed only after everything beneath it was copied.
pub fn copy_recursive(from: &Path, to: &Path, remove_source: bool) -> io::Result<u64> {
    let meta = fs::symlink_metadata(from)?;
    if !meta.is_dir() {
        return copy_file(from, to, remove_source);
    }

    fs::create_dir_all(to)?;
    let mut total = 0;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        total += copy_recursive(&entry.path(), &to.join(entry.file_name()), false)?;
    }
    if remove_source {
        fs::remove_dir_all(from)?;
    }
    Ok(total)
}

/// First `stem_<n>.ext` (n >= 1) next to `path` for which `taken` is false.
pub fn unique_destination(path: &Path, taken: impl Fn(&Path) -> bool) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n: u64 = 1;
    loop {
        let candidate = parent.join(format!("{stem}_{n}{ext}"));
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
