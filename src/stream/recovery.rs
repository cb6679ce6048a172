//! Crash recovery for streamed files.
//!
//! A streamed file that was never closed has durable sections but no
//! index. Recovery backs the file up, rebuilds the section list with a
//! forward byte scan, discards any stale trailing index or EOF marker so
//! the next append lands cleanly, and line-aligns the tail (FORMAT.md
//! §7). Marker checks apply to whole lines only: escaped marker lines
//! inside section content start with a backslash on disk and are never
//! mistaken for structure.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use sha2::{Digest, Sha256};

use crate::format::{
    EOF_MARKER, INDEX_SECTION, MAGIC, MAX_FILE_SIZE, META_SECTION, SECTION_PREFIX,
    TRAILING_INDEX_SECTION,
};
use crate::reader::{decode_chunk, parse_magic_line, ReadError};

use super::errors::{StreamError, StreamResult};

/// State reconstructed from an existing streamed file, ready for appends.
pub(crate) struct Recovered {
    /// Open read-write handle positioned at end of file.
    pub file: File,
    /// Current end-of-file offset.
    pub position: u64,
    /// Recovered `(name, offset, length)` entries in file order.
    pub sections: Vec<(String, u64, u64)>,
    /// Running content digest covering the recovered sections.
    pub hasher: Sha256,
}

/// Recovers a streamed file in place. The original bytes are copied to
/// `<path>.bak` before anything is modified.
pub(crate) fn recover(path: &Path) -> StreamResult<Recovered> {
    let size = fs::metadata(path)
        .map_err(|e| StreamError::Io(format!("Failed to stat {}: {}", path.display(), e)))?
        .len();
    if size > MAX_FILE_SIZE {
        return Err(ReadError::InputTooLarge {
            size,
            max: MAX_FILE_SIZE,
        }
        .into());
    }

    let backup = backup_path(path);
    fs::copy(path, &backup).map_err(|e| {
        StreamError::Io(format!(
            "Failed to back up {} to {}: {}",
            path.display(),
            backup.display(),
            e
        ))
    })?;
    info!("backed up {} to {}", path.display(), backup.display());

    let raw = fs::read(path)
        .map_err(|e| StreamError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    if raw.is_empty() {
        return Err(ReadError::MissingMagic.into());
    }

    let scan = scan_sections(path, &raw)?;

    let new_len = match scan.last_trailing.or(scan.last_eof) {
        Some(cut) => {
            info!(
                "discarding stale tail of {} from byte {}",
                path.display(),
                cut
            );
            cut
        }
        None => raw.len() as u64,
    };
    let mut sections = scan.sections;
    sections.retain(|(name, offset, length)| {
        let keep = offset + length <= new_len;
        if !keep {
            warn!("dropping section {:?} beyond the truncation point", name);
        }
        keep
    });

    // Digest of the surviving content, computed before tail repair: the
    // padded terminator below is stripped during decoding anyway.
    let mut hasher = Sha256::new();
    for (_, offset, length) in &sections {
        let chunk = &raw[*offset as usize..(*offset + *length) as usize];
        hasher.update(decode_chunk(&String::from_utf8_lossy(chunk)).as_bytes());
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| StreamError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    file.set_len(new_len)
        .map_err(|e| StreamError::Io(format!("Failed to truncate {}: {}", path.display(), e)))?;
    file.seek(SeekFrom::End(0))
        .map_err(|e| StreamError::Io(format!("Failed to seek in {}: {}", path.display(), e)))?;
    let mut position = new_len;

    // Line-align the tail so the next section header starts a fresh line.
    if raw[new_len as usize - 1] != b'\n' {
        file.write_all(b"\n")
            .map_err(|e| StreamError::Io(format!("Failed to repair {}: {}", path.display(), e)))?;
        position += 1;
        if let Some(last) = sections.last_mut() {
            last.2 += 1;
        }
    }
    file.sync_all()
        .map_err(|e| StreamError::Io(format!("fsync failed for {}: {}", path.display(), e)))?;

    info!(
        "recovered {} section(s) from {}, resuming at byte {}",
        sections.len(),
        path.display(),
        position
    );
    Ok(Recovered {
        file,
        position,
        sections,
        hasher,
    })
}

struct ScanOutcome {
    sections: Vec<(String, u64, u64)>,
    /// Line-start offset of the last trailing-index header, if any.
    last_trailing: Option<u64>,
    /// Line-start offset of the last EOF marker, if any.
    last_eof: Option<u64>,
}

/// Forward byte scan over the raw file. Offsets come from inclusive line
/// splitting, so they are exact even when the file does not end with a
/// newline.
fn scan_sections(path: &Path, raw: &[u8]) -> StreamResult<ScanOutcome> {
    let mut outcome = ScanOutcome {
        sections: Vec::new(),
        last_trailing: None,
        last_eof: None,
    };
    let mut current: Option<(String, u64)> = None;
    let mut pos: u64 = 0;
    let mut first = true;

    for line_bytes in raw.split_inclusive(|&b| b == b'\n') {
        let line_len = line_bytes.len() as u64;
        let line = strip_line_terminator(line_bytes);

        if first {
            first = false;
            let magic = parse_magic_line(&String::from_utf8_lossy(line))?;
            if !magic.streamed {
                return Err(StreamError::NotStreamFile(path.display().to_string()));
            }
            pos += line_len;
            continue;
        }

        if line.starts_with(SECTION_PREFIX.as_bytes()) {
            flush(&mut outcome.sections, &mut current, pos);
            let tag = &line[SECTION_PREFIX.len()..];
            if tag == META_SECTION.as_bytes() || tag == INDEX_SECTION.as_bytes() {
                // Reserved blocks carry no content entries.
            } else if tag == TRAILING_INDEX_SECTION.as_bytes() {
                outcome.last_trailing = Some(pos);
            } else {
                let name = String::from_utf8_lossy(tag).into_owned();
                current = Some((name, pos + line_len));
            }
        } else if is_eof_line(line) {
            flush(&mut outcome.sections, &mut current, pos);
            outcome.last_eof = Some(pos);
        } else if line.starts_with(MAGIC.as_bytes()) {
            // A stray magic line closes any open section, like a marker.
            flush(&mut outcome.sections, &mut current, pos);
        }
        pos += line_len;
    }
    flush(&mut outcome.sections, &mut current, pos);
    Ok(outcome)
}

fn flush(
    sections: &mut Vec<(String, u64, u64)>,
    current: &mut Option<(String, u64)>,
    end: u64,
) {
    if let Some((name, start)) = current.take() {
        sections.push((name, start, end.saturating_sub(start)));
    }
}

fn strip_line_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_eof_line(line: &[u8]) -> bool {
    line == EOF_MARKER.as_bytes()
        || (line.starts_with(EOF_MARKER.as_bytes()) && line.get(EOF_MARKER.len()) == Some(&b':'))
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_recover_rejects_batch_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "batch.pfm", "#!PFM/1.0\n#@meta\n#!END\n");
        assert!(matches!(
            recover(&path),
            Err(StreamError::NotStreamFile(_))
        ));
        // The backup is taken before the scan decides anything.
        assert!(dir.path().join("batch.pfm.bak").exists());
    }

    #[test]
    fn test_recover_rejects_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty.pfm", "");
        assert!(matches!(
            recover(&path),
            Err(StreamError::Read(ReadError::MissingMagic))
        ));
    }

    #[test]
    fn test_recover_crashed_stream() {
        let dir = TempDir::new().unwrap();
        // Crash mid-write: no trailing index, file ends without newline.
        let path = write_file(
            &dir,
            "crash.pfm",
            "#!PFM/1.0:STREAM\n#@meta\nagent: s\n#@log\nhello\n#@log\nworld",
        );
        let recovered = recover(&path).unwrap();

        // "world" gains a padded terminator, extending its entry.
        assert_eq!(
            recovered.sections,
            vec![
                ("log".to_string(), 39, 6),
                ("log".to_string(), 51, 6),
            ]
        );
        assert_eq!(recovered.position, 57);
        let repaired = fs::read_to_string(&path).unwrap();
        assert!(repaired.ends_with("world\n"));
        // Backup holds the pre-repair bytes.
        let backup = fs::read_to_string(dir.path().join("crash.pfm.bak")).unwrap();
        assert!(backup.ends_with("world"));
    }

    #[test]
    fn test_recover_strips_stale_trailing_index() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "closed.pfm",
            "#!PFM/1.0:STREAM\n#@meta\n#@a\nx\n#@index-trailing\na 28 2\nchecksum abc\n#!END:30\n",
        );
        let recovered = recover(&path).unwrap();
        assert_eq!(recovered.sections, vec![("a".to_string(), 28, 2)]);
        assert_eq!(recovered.position, 30);
        let repaired = fs::read_to_string(&path).unwrap();
        assert_eq!(repaired, "#!PFM/1.0:STREAM\n#@meta\n#@a\nx\n");
    }

    #[test]
    fn test_recover_ignores_escaped_markers() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "escaped.pfm",
            "#!PFM/1.0:STREAM\n#@meta\n#@log\n\\#@index-trailing\n\\#!END\ntail",
        );
        let recovered = recover(&path).unwrap();
        // Escaped marker lines stay inside the section; nothing is
        // truncated.
        assert_eq!(recovered.sections.len(), 1);
        let (name, offset, length) = &recovered.sections[0];
        assert_eq!(name, "log");
        assert_eq!((*offset, *length), (30, 30));
        assert!(fs::read_to_string(&path).unwrap().ends_with("tail\n"));
    }

    #[test]
    fn test_recover_drops_sections_beyond_truncation() {
        let dir = TempDir::new().unwrap();
        // A section appears after an EOF marker; truncation removes its
        // bytes, so its entry must go too.
        let path = write_file(
            &dir,
            "weird.pfm",
            "#!PFM/1.0:STREAM\n#@meta\n#@a\nx\n#!END:24\n#@late\nz\n",
        );
        let recovered = recover(&path).unwrap();
        assert_eq!(recovered.sections, vec![("a".to_string(), 28, 2)]);
        assert_eq!(recovered.position, 30);
    }

    #[test]
    fn test_recovered_digest_matches_content() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "digest.pfm",
            "#!PFM/1.0:STREAM\n#@meta\n#@log\nhello\n",
        );
        let recovered = recover(&path).unwrap();
        let mut expected = Sha256::new();
        expected.update(b"hello");
        assert_eq!(
            recovered.hasher.finalize(),
            expected.finalize(),
        );
    }
}
