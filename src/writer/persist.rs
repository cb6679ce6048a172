//! Atomic file persistence.
//!
//! Writes land in a temporary sibling file which is fsynced and then
//! renamed over the destination. A concurrent reader sees either the old
//! file or the new one, never a partial write.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;

use crate::document::Document;

use super::errors::{WriteError, WriteResult};
use super::serializer::serialize;

/// Serializes `doc` and writes it to `path` atomically.
pub fn write_document<P: AsRef<Path>>(doc: &Document, path: P) -> WriteResult<()> {
    let path = path.as_ref();
    let data = serialize(doc)?;
    write_bytes_atomic(&data, path)
}

fn write_bytes_atomic(data: &[u8], path: &Path) -> WriteResult<()> {
    let tmp_path = tmp_sibling(path)?;
    match write_and_rename(data, &tmp_path, path) {
        Ok(()) => {
            debug!("wrote {} bytes to {}", data.len(), path.display());
            Ok(())
        }
        Err(e) => {
            // Leave no orphaned temporary behind.
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

fn write_and_rename(data: &[u8], tmp_path: &Path, path: &Path) -> WriteResult<()> {
    let mut file = File::create(tmp_path).map_err(|e| {
        WriteError::Io(format!("Failed to create {}: {}", tmp_path.display(), e))
    })?;
    file.write_all(data)
        .map_err(|e| WriteError::Io(format!("Failed to write {}: {}", tmp_path.display(), e)))?;
    file.sync_all()
        .map_err(|e| WriteError::Io(format!("fsync failed for {}: {}", tmp_path.display(), e)))?;
    fs::rename(tmp_path, path).map_err(|e| {
        WriteError::Io(format!(
            "Failed to rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })?;
    Ok(())
}

/// `x.pfm` writes through `x.pfm.tmp` in the same directory, so the final
/// rename never crosses a filesystem boundary.
fn tmp_sibling(path: &Path) -> WriteResult<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| WriteError::Io(format!("Invalid destination path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}
