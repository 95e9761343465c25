//! # Content Seal
//!
//! Publishes a zero-script static site from an author-supplied source tree.
//! Markdown and HTML are sanitized against an allowlist policy, every other
//! asset is republished under a content-derived file name, references are
//! rewritten to match, and an integrity manifest records the hash of every
//! published byte.
//!
//! # Architecture: Five Stages and a Verifier
//!
//! ```text
//! 1. Scan         source/   →  files + media types
//! 2. Sanitize     files     →  clean | sanitized | quarantined
//! 3. Fingerprint  assets    →  rename table (original → assets/name-<hash>.ext)
//! 4. Rewrite      documents →  references point at fingerprinted paths
//! 5. Manifest     output    →  integrity-manifest.json
//!
//!    Verify       output/ + manifest  →  verified | tampered   (separate run)
//! ```
//!
//! Stages 2 and 3 are per-file and run in parallel; stage 4 waits for every
//! fingerprint so the rename table is complete before any file is rewritten.
//! A single critical finding anywhere aborts the run before the output
//! directory is touched.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Stage 1: walks the source directory and classifies files by extension |
//! | [`sanitize`] | Stage 2: tag/attribute-aware walk of HTML, Markdown, CSS and SVG against the policy |
//! | [`fingerprint`] | Stage 3: SHA-256 digests, fingerprints, collision checks, the rename table |
//! | [`rewrite`] | Stage 4: rewrites `href`/`src`, Markdown links and CSS `url()` through the rename table |
//! | [`manifest`] | Stage 5: deterministic JSON manifest of published paths and hashes |
//! | [`verify`] | Re-hashes a published tree against its manifest |
//! | [`pipeline`] | Runs stages 1–5 on a worker pool and publishes atomically |
//! | [`config`] | `seal.toml` loading, validation and merging over stock defaults |
//! | [`naming`] | `{stem}-{fingerprint}.{ext}` naming and output layout |
//! | [`types`] | Shared types: media types, outcomes, violations |
//! | [`output`] | CLI output formatting for build, check and verify |
//!
//! # Design Decisions
//!
//! ## A Document Walk, Not Pattern Substitution
//!
//! Sanitizing with ordered regex replacements is bypassable: entity-encoded
//! schemes, whitespace inside `javascript:`, and attribute-quoting tricks all
//! survive text substitution. The [`sanitize`] module tokenizes markup and
//! makes an explicit allow/deny decision for every tag and attribute. URL
//! values are entity-decoded, stripped of control characters and lowercased
//! before they are compared with the scheme blocklist.
//!
//! ## Fail Closed
//!
//! A file with any critical finding is quarantined, and one quarantined file
//! stops the whole run. Nothing is published rather than something partially
//! sanitized. Malformed markup that cannot be assessed (an unterminated tag or
//! comment) counts as critical.
//!
//! ## Content-Addressed Assets
//!
//! Non-document files are published as `assets/{dir}/{stem}-{fp}.{ext}` where
//! `fp` is a prefix of the SHA-256 of their sanitized bytes. Identical bytes
//! always give the same name, so published assets can be cached forever. Two
//! different contents sharing a prefix is reported as a collision and aborts
//! the run; it is never resolved by overwriting.
//!
//! ## Reproducible Manifests
//!
//! Manifest entries are sorted by source path and serialized with a fixed key
//! order. With `SOURCE_DATE_EPOCH` set, byte-identical inputs give a
//! byte-identical manifest, which is what a signing step downstream wants.

pub mod config;
pub mod fingerprint;
pub mod manifest;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod rewrite;
pub mod sanitize;
pub mod scan;
pub mod types;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_helpers;
