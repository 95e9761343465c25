//! The publish pipeline: scan, sanitize, fingerprint, rewrite, manifest.
//!
//! ```text
//! SCAN → SANITIZE → (QUARANTINE | FINGERPRINT) → REWRITE → MANIFEST → PASS
//! ```
//!
//! Per-file work (reading, sanitizing, hashing, rewriting) runs on a rayon
//! pool sized by [`effective_threads`]. Each phase collects its results into
//! a plain `Vec` before the next one starts; in particular the rename table
//! is complete before any file is rewritten.
//!
//! The run is fail-closed. The first quarantined file raises a shared
//! cancellation flag: workers that have not started their file skip it, and
//! the orchestrator returns [`PipelineError::Quarantined`] before anything
//! touches the output directory. A successful build stages the whole tree in
//! a hidden sibling directory and swaps it into place, so readers never see
//! a half-written output. The swap is two renames (old tree out, new tree
//! in); between them the output path does not exist, and a concurrent
//! `verify` fails with a missing manifest rather than passing a mixed tree.
//!
//! Stylesheets are named after their rewritten bytes. A stylesheet's
//! published content depends on the names of the assets it references, so
//! a changed image must also rename every stylesheet that points at it.
//! Other assets are named first; stylesheets are then rewritten and renamed
//! until no name moves (one round per level of `@import`).

use crate::config::{SealConfig, effective_threads};
use crate::fingerprint::{self, Asset, FingerprintError, RenameTable};
use crate::manifest::{self, Manifest, ManifestEntry, ManifestError};
use crate::rewrite;
use crate::sanitize::{self, ContentPolicy};
use crate::scan::{self, ScanError, SourceEntry};
use crate::types::{
    MediaType, MissingReference, SanitizationOutcome, Severity, SourceFile, Violation,
};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("{0}")]
    Fingerprint(#[from] FingerprintError),
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("{} file(s) quarantined; nothing was published", .files.len())]
    Quarantined {
        files: Vec<String>,
        violations: Vec<Violation>,
    },
    #[error("{0} would overwrite the manifest")]
    ManifestPathTaken(String),
    #[error("refusing to publish into {0}: it is or contains the source directory")]
    UnsafeOutput(PathBuf),
}

/// Whether a run publishes or only reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Build,
    Check,
}

/// One file as it would be (or was) published.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedFile {
    pub source: String,
    pub path: String,
    pub media_type: MediaType,
    pub outcome: SanitizationOutcome,
    pub size: u64,
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub files: Vec<PublishedFile>,
    /// WARN-level findings; a successful run has no critical ones.
    pub violations: Vec<Violation>,
    pub missing: Vec<MissingReference>,
    pub manifest: Manifest,
    /// False for [`Mode::Check`].
    pub written: bool,
}

impl PipelineReport {
    /// `0` clean, `1` published with warnings.
    pub fn exit_code(&self) -> u8 {
        if self.violations.is_empty() && self.missing.is_empty() {
            0
        } else {
            1
        }
    }
}

/// Run the pipeline over `source`, publishing into `output` in build mode.
pub fn run(
    source: &Path,
    output: &Path,
    config: &SealConfig,
    mode: Mode,
) -> Result<PipelineReport, PipelineError> {
    check_output(source, output)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(effective_threads(&config.processing))
        .build()?;

    info!("scanning {}", source.display());
    let entries = scan::scan(source, &[output.to_path_buf()])?;
    info!("found {} files", entries.len());

    let policy = ContentPolicy::from_config(&config.policy);
    let (files, violations) = pool.install(|| sanitize_all(&entries, &policy))?;

    let prepared = pool.install(|| prepare(files, config))?;
    let mut report = PipelineReport {
        files: prepared.files,
        violations,
        missing: prepared.missing,
        manifest: manifest::build(prepared.entries, manifest::generated_at()?),
        written: false,
    };

    if mode == Mode::Build {
        publish(output, &prepared.contents, &report.manifest, &config.manifest.file_name)?;
        report.written = true;
        info!("published {} files to {}", report.files.len(), output.display());
    }
    Ok(report)
}

/// The output directory is replaced wholesale, so it must not hold the source.
fn check_output(source: &Path, output: &Path) -> Result<(), PipelineError> {
    if output.file_name().is_none() {
        return Err(PipelineError::UnsafeOutput(output.to_path_buf()));
    }
    let source = source.canonicalize().map_err(|_| {
        PipelineError::Scan(ScanError::MissingSource(source.to_path_buf()))
    })?;
    if let Ok(output_abs) = output.canonicalize()
        && source.starts_with(&output_abs)
    {
        return Err(PipelineError::UnsafeOutput(output.to_path_buf()));
    }
    Ok(())
}

// ============================================================================
// Sanitize
// ============================================================================

/// Read and sanitize every entry. Returns the surviving files (bytes
/// replaced by their sanitized content) and all WARN violations.
fn sanitize_all(
    entries: &[SourceEntry],
    policy: &ContentPolicy,
) -> Result<(Vec<SourceFile>, Vec<Violation>), PipelineError> {
    let cancelled = AtomicBool::new(false);
    let results: Vec<Result<Option<(SourceFile, Vec<Violation>)>, ScanError>> = entries
        .par_iter()
        .map(|entry| {
            if cancelled.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let mut file = scan::load(entry)?;
            let result = sanitize::sanitize(&file, policy);
            if result.outcome == SanitizationOutcome::Quarantined {
                cancelled.store(true, Ordering::Relaxed);
            }
            debug!("{}: {:?}", file.path, result.outcome);
            file.outcome = result.outcome;
            file.bytes = result.content;
            Ok(Some((file, result.violations)))
        })
        .collect();

    let mut files = Vec::with_capacity(results.len());
    let mut quarantined = Vec::new();
    let mut violations = Vec::new();
    for result in results {
        let Some((file, found)) = result? else {
            continue;
        };
        if file.outcome == SanitizationOutcome::Quarantined {
            quarantined.push(file.path.clone());
        }
        violations.extend(found);
        files.push(file);
    }

    if cancelled.load(Ordering::Relaxed) {
        let critical: Vec<Violation> = violations
            .into_iter()
            .filter(|v| v.severity == Severity::Critical)
            .collect();
        for v in &critical {
            error!("{v}");
        }
        return Err(PipelineError::Quarantined {
            files: quarantined,
            violations: critical,
        });
    }
    for v in &violations {
        warn!("{v}");
    }
    Ok((files, violations))
}

// ============================================================================
// Fingerprint, rewrite, manifest entries
// ============================================================================

struct Prepared {
    files: Vec<PublishedFile>,
    /// `(published path, bytes)` in source order.
    contents: Vec<(String, Vec<u8>)>,
    entries: Vec<ManifestEntry>,
    missing: Vec<MissingReference>,
}

fn prepare(files: Vec<SourceFile>, config: &SealConfig) -> Result<Prepared, PipelineError> {
    let length = config.fingerprint.length;
    let assets_dir = config.fingerprint.assets_dir.as_str();

    let sources: Vec<&SourceFile> = files
        .iter()
        .filter(|f| !f.media_type.is_document())
        .collect();
    let mut assets: Vec<Asset> = sources
        .par_iter()
        .map(|f| Asset::new(&f.path, &f.bytes, length, assets_dir))
        .collect();
    let documents: Vec<String> = files
        .iter()
        .filter(|f| f.media_type.is_document())
        .map(|f| f.path.clone())
        .collect();
    let table = name_stylesheets(&sources, &mut assets, &documents, config)?;
    info!("fingerprinted {} assets", assets.len());

    // Every source is in the table once registration succeeds.
    let rewritten: Vec<(String, rewrite::RewrittenFile)> = files
        .par_iter()
        .map(|f| {
            let target = table.get(&f.path).unwrap_or(f.path.as_str()).to_string();
            (target, rewrite::rewrite(&f.path, f.media_type, &f.bytes, &table))
        })
        .collect();

    let mut prepared = Prepared {
        files: Vec::with_capacity(files.len()),
        contents: Vec::with_capacity(files.len()),
        entries: Vec::with_capacity(files.len()),
        missing: Vec::new(),
    };
    let manifest_name = config.manifest.file_name.as_str();
    for (file, (target, result)) in files.iter().zip(rewritten) {
        if target == manifest_name {
            return Err(PipelineError::ManifestPathTaken(file.path.clone()));
        }
        for m in &result.missing {
            warn!("{m}");
        }
        prepared.missing.extend(result.missing);
        prepared
            .entries
            .push(ManifestEntry::new(&file.path, &target, &result.content));
        prepared.files.push(PublishedFile {
            source: file.path.clone(),
            path: target.clone(),
            media_type: file.media_type,
            outcome: file.outcome,
            size: result.content.len() as u64,
        });
        prepared.contents.push((target, result.content));
    }
    Ok(prepared)
}

/// Rename every stylesheet after its rewritten bytes and return the final
/// rename table. `assets` is parallel to `sources`.
fn name_stylesheets(
    sources: &[&SourceFile],
    assets: &mut [Asset],
    documents: &[String],
    config: &SealConfig,
) -> Result<RenameTable, PipelineError> {
    let length = config.fingerprint.length;
    let assets_dir = config.fingerprint.assets_dir.as_str();
    let mut table = fingerprint::register(assets, documents)?;
    let rounds = sources
        .iter()
        .filter(|f| f.media_type == MediaType::Css)
        .count();
    if rounds == 0 {
        return Ok(table);
    }

    for round in 1..=rounds + 1 {
        let renamed: Vec<(usize, Asset)> = sources
            .par_iter()
            .enumerate()
            .filter(|(_, f)| f.media_type == MediaType::Css)
            .map(|(i, f)| {
                let content = rewrite::rewrite(&f.path, f.media_type, &f.bytes, &table).content;
                (i, Asset::new(&f.path, &content, length, assets_dir))
            })
            .collect();
        let mut moved = false;
        for (i, asset) in renamed {
            moved |= asset.fingerprinted_path != assets[i].fingerprinted_path;
            assets[i] = asset;
        }
        table = fingerprint::register(assets, documents)?;
        if !moved {
            debug!("stylesheet names settled after {round} round(s)");
            return Ok(table);
        }
    }
    warn!("stylesheet names did not settle; is there an @import cycle?");
    Ok(table)
}

// ============================================================================
// Publish
// ============================================================================

/// Write the tree and manifest into a staging directory next to `output`,
/// then swap it into place. `output` is briefly absent during the swap.
fn publish(
    output: &Path,
    contents: &[(String, Vec<u8>)],
    manifest: &Manifest,
    manifest_name: &str,
) -> Result<(), PipelineError> {
    let staging = sibling(output, "staging");
    let retired = sibling(output, "old");
    remove_if_exists(&staging)?;
    remove_if_exists(&retired)?;

    let written = write_staging(&staging, contents, manifest, manifest_name);
    if let Err(e) = written {
        remove_if_exists(&staging).ok();
        return Err(e);
    }

    if output.exists() {
        fs::rename(output, &retired)?;
    }
    if let Err(e) = fs::rename(&staging, output) {
        if retired.exists() {
            fs::rename(&retired, output).ok();
        }
        remove_if_exists(&staging).ok();
        return Err(e.into());
    }
    remove_if_exists(&retired)?;
    Ok(())
}

fn write_staging(
    root: &Path,
    contents: &[(String, Vec<u8>)],
    manifest: &Manifest,
    manifest_name: &str,
) -> Result<(), PipelineError> {
    fs::create_dir_all(root)?;
    for (path, bytes) in contents {
        let dest = root.join(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, bytes)?;
    }
    fs::write(root.join(manifest_name), manifest.to_json()?)?;
    Ok(())
}

/// `.{name}.{suffix}` next to `output`. Hidden, so a source scan skips it.
fn sibling(output: &Path, suffix: &str) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!(".{name}.{suffix}"))
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
