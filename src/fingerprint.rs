//! Stage 3: content fingerprints and the rename table.
//!
//! Every non-document file is hashed with SHA-256 over the bytes it will be
//! published with: its sanitized bytes, or for a stylesheet its rewritten
//! bytes (see [`crate::pipeline`]). The first `length` hex characters of the
//! digest become its fingerprint, embedded in the published file name (see
//! [`crate::naming`]).
//!
//! Hashing is per-file and runs in parallel. [`register`] is the single
//! aggregation point afterwards: it checks that no two different contents
//! share a fingerprint, that no two sources land on the same published path,
//! and produces the [`RenameTable`] the rewriter reads. The table has no
//! mutating methods; once built it is fixed for the rest of the run.

use crate::naming;
use crate::types::MediaType;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error(
        "hash collision: fingerprint {fingerprint} is shared by {first} and {second} with different contents"
    )]
    HashCollision {
        fingerprint: String,
        first: String,
        second: String,
    },
    #[error("path conflict: {first} and {second} both publish to {path}")]
    PathConflict {
        path: String,
        first: String,
        second: String,
    },
}

/// A 256-bit SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Parse a 64-character lowercase hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(out))
    }

    /// First `len` hex characters.
    pub fn prefix(&self, len: usize) -> String {
        let mut hex = self.to_string();
        hex.truncate(len);
        hex
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

/// Result of fingerprinting one file's bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub digest: ContentHash,
    pub fingerprint: String,
    pub canonical_name: String,
}

/// Hash `bytes` and derive the canonical name for a file called `name`.
pub fn fingerprint(name: &str, bytes: &[u8], length: usize) -> Fingerprint {
    let digest = ContentHash::of(bytes);
    let fingerprint = digest.prefix(length);
    let canonical_name = naming::fingerprinted_name(name, &fingerprint);
    Fingerprint {
        digest,
        fingerprint,
        canonical_name,
    }
}

/// A fingerprinted, publishable asset.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub original_path: String,
    pub content_hash: ContentHash,
    pub fingerprint: String,
    pub fingerprinted_path: String,
    pub size_bytes: u64,
    pub media_type: MediaType,
}

impl Asset {
    /// Fingerprint a sanitized file and place it under `assets_dir`.
    pub fn new(path: &str, bytes: &[u8], length: usize, assets_dir: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path);
        let fp = fingerprint(name, bytes, length);
        Self {
            original_path: path.to_string(),
            fingerprinted_path: naming::fingerprinted_path(path, &fp.fingerprint, assets_dir),
            content_hash: fp.digest,
            fingerprint: fp.fingerprint,
            size_bytes: bytes.len() as u64,
            media_type: MediaType::from_path(path),
        }
    }
}

/// Immutable mapping from original source path to published path.
///
/// Documents map to themselves, so every published file can be looked up.
#[derive(Debug, Clone, Default)]
pub struct RenameTable {
    entries: BTreeMap<String, String>,
}

impl RenameTable {
    pub fn get(&self, original: &str) -> Option<&str> {
        self.entries.get(original).map(String::as_str)
    }

    pub fn contains(&self, original: &str) -> bool {
        self.entries.contains_key(original)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in original-path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Check every asset for fingerprint collisions and every published path for
/// conflicts, then build the rename table.
///
/// `documents` are published at their own path.
pub fn register(assets: &[Asset], documents: &[String]) -> Result<RenameTable, FingerprintError> {
    let mut ordered: Vec<&Asset> = assets.iter().collect();
    ordered.sort_by(|a, b| a.original_path.cmp(&b.original_path));

    let mut seen: HashMap<&str, &Asset> = HashMap::new();
    for &asset in &ordered {
        match seen.get(asset.fingerprint.as_str()) {
            Some(prior) if prior.content_hash != asset.content_hash => {
                return Err(FingerprintError::HashCollision {
                    fingerprint: asset.fingerprint.clone(),
                    first: prior.original_path.clone(),
                    second: asset.original_path.clone(),
                });
            }
            Some(_) => {}
            None => {
                seen.insert(asset.fingerprint.as_str(), asset);
            }
        }
    }

    let mut entries = BTreeMap::new();
    let mut published: HashMap<String, &str> = HashMap::new();
    let pairs = ordered
        .iter()
        .map(|a| (a.original_path.as_str(), a.fingerprinted_path.as_str()))
        .chain(documents.iter().map(|d| (d.as_str(), d.as_str())));
    for (original, target) in pairs {
        // Case-insensitive file systems would merge these.
        let key = target.to_lowercase();
        if let Some(first) = published.insert(key, original) {
            return Err(FingerprintError::PathConflict {
                path: target.to_string(),
                first: first.to_string(),
                second: original.to_string(),
            });
        }
        entries.insert(original.to_string(), target.to_string());
    }
    Ok(RenameTable { entries })
}
