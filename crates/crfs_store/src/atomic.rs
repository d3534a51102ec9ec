//! Write-to-temporary-then-rename helper.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Writes `data` to `target` so readers see either the old file or the
/// complete new one, never a prefix.
///
/// The temporary file lives next to `target` (same directory, hence the
/// same filesystem) and is removed if anything fails before the rename.
/// The directory is synced after the rename so the new entry survives a
/// power loss.
pub(crate) fn write_atomically(target: &Path, data: &[u8]) -> io::Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no file name"))?;
    let temp = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&temp, target)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp);
    }
    result?;
    sync_directory(dir)
}

/// Syncs a directory so entries created, renamed or removed in it are
/// durable.
///
/// NTFS journals its metadata, so this is a no-op off unix.
#[cfg(unix)]
pub(crate) fn sync_directory(dir: &Path) -> io::Result<()> {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn sync_directory(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Returns true for the temporary names produced by [`write_atomically`].
pub(crate) fn is_temporary(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}
