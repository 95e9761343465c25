//! Shared test utilities for the content-seal test suite.
//!
//! Builds throwaway source trees and reads output trees back, so stage tests
//! can describe a site inline instead of keeping fixture directories.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = site(&[
//!     ("index.html", "<link href=\"/style.css\" rel=\"stylesheet\">"),
//!     ("style.css", "body{}"),
//! ]);
//! let files = read_tree(&tmp.path().join("src"));
//! assert_eq!(tree_paths(&files), vec!["index.html", "style.css"]);
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

use crate::types::Violation;

// =========================================================================
// Tree setup
// =========================================================================

/// Write `(relative path, content)` pairs under `root`, creating directories.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
    }
}

/// A temp directory with the given files under `src/`.
///
/// `src/` and a sibling `dist/` path keep the output out of the source.
pub fn site(files: &[(&str, &str)]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_tree(&tmp.path().join("src"), files);
    tmp
}

// =========================================================================
// Tree inspection
// =========================================================================

/// Every file under `root`, keyed by `/`-separated relative path.
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap()
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(rel, std::fs::read(entry.path()).unwrap());
    }
    files
}

/// Paths of a tree in sorted order.
pub fn tree_paths(files: &BTreeMap<String, Vec<u8>>) -> Vec<&str> {
    files.keys().map(String::as_str).collect()
}

/// The single published path starting with `prefix`. Panics unless exactly one.
pub fn find_published<'a>(files: &'a BTreeMap<String, Vec<u8>>, prefix: &str) -> &'a str {
    let matches: Vec<&str> = files
        .keys()
        .map(String::as_str)
        .filter(|p| p.starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [one] => one,
        _ => panic!(
            "expected one path starting with '{prefix}', found {matches:?}. Available: {:?}",
            tree_paths(files)
        ),
    }
}

// =========================================================================
// Violation helpers
// =========================================================================

/// Patterns of all violations, in order.
pub fn patterns(violations: &[Violation]) -> Vec<&str> {
    violations.iter().map(|v| v.pattern.as_str()).collect()
}
