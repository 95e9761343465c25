//! Stage 5: the integrity manifest.
//!
//! The manifest is the only durable artifact of a run. It records, for every
//! published file, the source it came from, where it was published, and the
//! SHA-256 digest and size of the published bytes:
//!
//! ```json
//! {
//!   "version": 1,
//!   "generatedAt": "2024-01-01T00:00:00Z",
//!   "algorithm": "sha256",
//!   "entries": [
//!     {
//!       "source": "logo.png",
//!       "path": "assets/logo-deadbeef01.png",
//!       "hash": "deadbeef01…",
//!       "size": 1234
//!     }
//!   ]
//! }
//! ```
//!
//! Entries are sorted by source path and keys are emitted in a fixed order,
//! so byte-identical inputs give a byte-identical manifest once
//! `SOURCE_DATE_EPOCH` pins `generatedAt`.

use crate::fingerprint::ContentHash;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const MANIFEST_VERSION: u32 = 1;
pub const ALGORITHM: &str = "sha256";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid SOURCE_DATE_EPOCH: {0}")]
    SourceDateEpoch(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: u32,
    pub generated_at: String,
    pub algorithm: String,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Original source path.
    pub source: String,
    /// Published path, relative to the output root.
    pub path: String,
    /// Lowercase hex SHA-256 of the published bytes.
    pub hash: String,
    pub size: u64,
}

impl ManifestEntry {
    /// Entry for `bytes` as published at `path`.
    pub fn new(source: &str, path: &str, bytes: &[u8]) -> Self {
        Self {
            source: source.to_string(),
            path: path.to_string(),
            hash: ContentHash::of(bytes).to_string(),
            size: bytes.len() as u64,
        }
    }
}

/// Assemble a manifest, sorting entries by source path (byte-wise).
pub fn build(mut entries: Vec<ManifestEntry>, generated_at: String) -> Manifest {
    entries.sort_by(|a, b| a.source.as_bytes().cmp(b.source.as_bytes()));
    Manifest {
        version: MANIFEST_VERSION,
        generated_at,
        algorithm: ALGORITHM.to_string(),
        entries,
    }
}

impl Manifest {
    pub fn to_json(&self) -> Result<String, ManifestError> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// RFC 3339 timestamp for `generatedAt`: `SOURCE_DATE_EPOCH` when set,
/// otherwise the current time.
pub fn generated_at() -> Result<String, ManifestError> {
    timestamp(std::env::var("SOURCE_DATE_EPOCH").ok().as_deref(), Utc::now())
}

fn timestamp(epoch: Option<&str>, now: DateTime<Utc>) -> Result<String, ManifestError> {
    let time = match epoch.map(str::trim).filter(|e| !e.is_empty()) {
        Some(epoch) => epoch
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| ManifestError::SourceDateEpoch(epoch.to_string()))?,
        None => now,
    };
    Ok(time.to_rfc3339_opts(SecondsFormat::Secs, true))
}
