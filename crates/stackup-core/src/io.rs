use crate::error::Result;
use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;
use tempfile::NamedTempFile;

/// Owner read/write only. Used for every secret-bearing file.
pub const PRIVATE_FILE_MODE: u32 = 0o600;
/// Owner-only directory, used for credential staging.
pub const PRIVATE_DIR_MODE: u32 = 0o700;

/// Atomically write `data` to `path` using a tempfile in the same directory.
///
/// The tempfile is created owner-only, so the result is 0600 unless `mode`
/// says otherwise.
pub fn atomic_write(path: &Path, data: &[u8], mode: Option<u32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    if let Some(mode) = mode {
        tmp.as_file().set_permissions(Permissions::from_mode(mode))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Atomically write a secret-bearing file with mode 0600.
pub fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    atomic_write(path, data, Some(PRIVATE_FILE_MODE))
}

/// Replace the contents of an existing file, keeping its permission bits.
pub fn rewrite_in_place(path: &Path, data: &[u8]) -> Result<()> {
    let mode = std::fs::metadata(path)?.permissions().mode();
    atomic_write(path, data, Some(mode))
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Create a fresh owner-only directory (parents are created normally).
pub fn create_private_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::DirBuilder::new()
        .mode(PRIVATE_DIR_MODE)
        .create(path)?;
    Ok(())
}

pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    std::fs::set_permissions(path, Permissions::from_mode(mode))?;
    Ok(())
}

/// Remove a file if present. Missing files are not an error.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
