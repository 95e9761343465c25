//! Stage 1: source tree scanning.
//!
//! Walks the source directory and lists every publishable file with its
//! declared media type. Reading the bytes is a separate step
//! ([`load`]) so the pipeline can run it on its worker pool.
//!
//! ## What is skipped
//!
//! - hidden files and directories (any component starting with `.`),
//!   including `.well-known/`: every published non-document is fingerprinted
//!   and moved, so nothing can be served from a fixed dotted path
//! - the policy file `seal.toml` at the source root
//! - symbolic links (they could point outside the tree)
//! - any directory listed in `exclude`, e.g. an output directory nested
//!   inside the source
//!
//! Paths are returned relative to the root, `/`-separated, in byte-wise
//! sorted order so every later stage sees files in the same order.

use crate::config::CONFIG_FILENAME;
use crate::types::{MediaType, SourceFile};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("source directory not found: {0}")]
    MissingSource(PathBuf),
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),
}

/// A file discovered in the source tree, not yet read.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    /// Path relative to the source root, `/`-separated.
    pub path: String,
    pub absolute: PathBuf,
    pub media_type: MediaType,
}

pub fn scan(root: &Path, exclude: &[PathBuf]) -> Result<Vec<SourceEntry>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::MissingSource(root.to_path_buf()));
    }
    let exclude: Vec<PathBuf> = exclude
        .iter()
        .filter_map(|p| p.canonicalize().ok())
        .collect();

    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(is_hidden(e.file_name())
                    || e.file_type().is_dir() && is_excluded(e.path(), &exclude))
        });
    for item in walker {
        let item = item?;
        if item.file_type().is_symlink() {
            warn!("skipping symbolic link {}", item.path().display());
            continue;
        }
        if !item.file_type().is_file() {
            continue;
        }
        let rel = relative_path(root, item.path())?;
        if rel == CONFIG_FILENAME {
            continue;
        }
        let media_type = MediaType::from_path(&rel);
        debug!("found {rel} ({media_type})");
        entries.push(SourceEntry {
            path: rel,
            absolute: item.into_path(),
            media_type,
        });
    }
    entries.sort_by(|a, b| a.path.as_bytes().cmp(b.path.as_bytes()));
    Ok(entries)
}

/// Read an entry's bytes.
pub fn load(entry: &SourceEntry) -> Result<SourceFile, ScanError> {
    let bytes = std::fs::read(&entry.absolute)?;
    Ok(SourceFile::new(entry.path.clone(), bytes))
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

fn is_excluded(path: &Path, exclude: &[PathBuf]) -> bool {
    !exclude.is_empty()
        && path
            .canonicalize()
            .is_ok_and(|p| exclude.iter().any(|e| *e == p))
}

fn relative_path(root: &Path, path: &Path) -> Result<String, ScanError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| ScanError::NonUtf8Path(path.to_path_buf()))?;
    let mut parts = Vec::new();
    for component in rel.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| ScanError::NonUtf8Path(path.to_path_buf()))?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}
