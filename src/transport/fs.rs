use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::errors::IndexError;

/// Kind filter applied when listing a directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular files only.
    File,
    /// Directories only.
    Directory,
}

/// List the direct children of `dir` matching `kind`, sorted by file name.
///
/// Enumeration order is filesystem-dependent, so every caller that selects
/// "the first match" goes through this sorted listing.
pub fn sorted_entries(dir: &Path, kind: EntryKind) -> Result<Vec<PathBuf>, IndexError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let keep = match kind {
            EntryKind::File => entry.file_type().is_file(),
            EntryKind::Directory => entry.file_type().is_dir(),
        };
        if keep {
            entries.push(entry.into_path());
        }
    }
    Ok(entries)
}

/// True if the path has extension `ext` (case-insensitive).
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// File name of `path` as UTF-8, if representable.
pub fn file_name_str(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

/// Write a whole document to `path` through a temp file in the same directory.
///
/// The temp file is renamed over `path` only after `write` succeeds, so an
/// error or interruption never leaves a partially written document behind.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<(), IndexError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), IndexError>,
{
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    let temp = NamedTempFile::new_in(&parent)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        write(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| IndexError::Io(err.error))?;
    Ok(())
}
