//! Canonical fingerprinted file names.
//!
//! Every fingerprinted asset, whatever its type, is named the same way:
//!
//! - `logo.png` → `logo-deadbeef01.png`
//! - `app.min.css` → `app.min-deadbeef01.css` (only the last extension splits)
//! - `CNAME` → `CNAME-deadbeef01` (no extension)
//! - `.htaccess` → `.htaccess-deadbeef01` (a leading dot is part of the name)
//!
//! The scanner never publishes hidden files, so the last case only comes up
//! for names built outside a pipeline run.
//!
//! Published paths for assets are placed under the configured assets
//! directory, keeping the original directory structure:
//! `img/logo.png` → `assets/img/logo-deadbeef01.png`.

/// File name split into stem and optional extension.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitName<'a> {
    pub stem: &'a str,
    pub extension: Option<&'a str>,
}

/// Split a file name on its last dot.
///
/// A dot at the start or end of the name does not start an extension.
pub fn split_name(name: &str) -> SplitName<'_> {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => SplitName {
            stem,
            extension: Some(ext),
        },
        _ => SplitName {
            stem: name,
            extension: None,
        },
    }
}

/// `{stem}-{fingerprint}.{ext}`, or `{name}-{fingerprint}` without an extension.
pub fn fingerprinted_name(name: &str, fingerprint: &str) -> String {
    let split = split_name(name);
    match split.extension {
        Some(ext) => format!("{}-{}.{}", split.stem, fingerprint, ext),
        None => format!("{}-{}", split.stem, fingerprint),
    }
}

/// Published path of an asset: `{assets_dir}/{dir}/{fingerprinted name}`.
pub fn fingerprinted_path(original: &str, fingerprint: &str, assets_dir: &str) -> String {
    let (dir, name) = match original.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, original),
    };
    let renamed = fingerprinted_name(name, fingerprint);
    match dir {
        Some(dir) => format!("{assets_dir}/{dir}/{renamed}"),
        None => format!("{assets_dir}/{renamed}"),
    }
}
