//! Integrity verification of a published tree against its manifest.
//!
//! Run as a separate invocation, typically after deployment. Every manifest
//! entry is re-hashed from disk; a changed or missing file is always fatal.
//! The tree is then walked for files the manifest does not know about
//! (orphans), whose severity depends on their media type and
//! `[verify] fail_orphans`. Links are never followed; a symlink the manifest
//! does not know is a critical orphan whatever its name.
//!
//! The manifest itself is untrusted input: an unknown algorithm or version,
//! a malformed hash, or an entry path that is absolute or climbs out of the
//! output root is rejected before any file is read.

use crate::config::VerifyConfig;
use crate::fingerprint::ContentHash;
use crate::manifest::{ALGORITHM, MANIFEST_VERSION, Manifest};
use crate::types::{MediaType, Severity};
use log::{debug, info};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchedHash {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanFile {
    pub path: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    /// Entries whose file content no longer matches.
    pub mismatches: Vec<MismatchedHash>,
    /// Entries whose file is gone.
    pub missing: Vec<String>,
    /// Files present on disk but absent from the manifest.
    pub orphans: Vec<OrphanFile>,
    /// Number of entries that matched.
    pub verified: usize,
}

impl VerificationReport {
    pub fn is_tampered(&self) -> bool {
        !self.mismatches.is_empty()
            || !self.missing.is_empty()
            || self.orphans.iter().any(|o| o.severity == Severity::Critical)
    }

    /// `0` verified, `1` only warn-level orphans, `2` tampered.
    pub fn exit_code(&self) -> u8 {
        if self.is_tampered() {
            2
        } else if self.orphans.is_empty() {
            0
        } else {
            1
        }
    }
}

/// Reject manifests this verifier cannot vouch for.
pub fn validate(manifest: &Manifest) -> Result<(), VerifyError> {
    if manifest.version != MANIFEST_VERSION {
        return Err(VerifyError::InvalidManifest(format!(
            "unsupported version {}",
            manifest.version
        )));
    }
    if manifest.algorithm != ALGORITHM {
        return Err(VerifyError::InvalidManifest(format!(
            "unsupported algorithm {:?}",
            manifest.algorithm
        )));
    }
    let mut paths = HashSet::new();
    for entry in &manifest.entries {
        if !is_safe_path(&entry.path) {
            return Err(VerifyError::InvalidManifest(format!(
                "unsafe entry path {:?}",
                entry.path
            )));
        }
        if ContentHash::from_hex(&entry.hash).is_none() {
            return Err(VerifyError::InvalidManifest(format!(
                "malformed hash for {}",
                entry.path
            )));
        }
        if !paths.insert(entry.path.as_str()) {
            return Err(VerifyError::InvalidManifest(format!(
                "duplicate entry path {}",
                entry.path
            )));
        }
    }
    Ok(())
}

/// Relative, `/`-separated, no `.`/`..` components, no backslashes.
fn is_safe_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && !path.contains(':')
        && path
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
}

/// Verify `output_root` against `manifest`.
///
/// `manifest_rel` is the manifest's own path relative to the root, if it
/// lives inside the tree; it and its `.sig` sidecar are never orphans.
pub fn verify(
    output_root: &Path,
    manifest: &Manifest,
    manifest_rel: Option<&str>,
    config: &VerifyConfig,
) -> Result<VerificationReport, VerifyError> {
    validate(manifest)?;
    let mut report = VerificationReport::default();

    for entry in &manifest.entries {
        let path = output_root.join(&entry.path);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                report.missing.push(entry.path.clone());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let actual = ContentHash::of(&bytes).to_string();
        if actual == entry.hash {
            debug!("verified {}", entry.path);
            report.verified += 1;
        } else {
            report.mismatches.push(MismatchedHash {
                path: entry.path.clone(),
                expected: entry.hash.clone(),
                actual,
            });
        }
    }

    let known: HashSet<&str> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
    let sidecar = manifest_rel.map(|m| format!("{m}.sig"));
    for item in WalkDir::new(output_root).sort_by_file_name() {
        let item = item?;
        if item.file_type().is_dir() {
            continue;
        }
        let Ok(rel) = item.path().strip_prefix(output_root) else {
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if known.contains(rel.as_str())
            || Some(rel.as_str()) == manifest_rel
            || sidecar.as_deref() == Some(rel.as_str())
        {
            continue;
        }
        let severity = if item.path_is_symlink()
            || config.fail_orphans.contains(&MediaType::from_path(&rel))
        {
            Severity::Critical
        } else {
            Severity::Warn
        };
        report.orphans.push(OrphanFile {
            path: rel,
            severity,
        });
    }

    info!(
        "verified {} of {} entries ({} mismatched, {} missing, {} orphans)",
        report.verified,
        manifest.entries.len(),
        report.mismatches.len(),
        report.missing.len(),
        report.orphans.len()
    );
    Ok(report)
}
