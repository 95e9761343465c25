//! Policy configuration module.
//!
//! Handles loading, validating, and merging the `seal.toml` policy file. The
//! file is sparse: stock defaults are overridden by whatever keys the user
//! writes, so a site only states what it changes.
//!
//! ## Config File Location
//!
//! The pipeline looks for the policy in this order:
//!
//! 1. `--config <path>` on the command line
//! 2. `seal.toml` at the root of the source tree (never published)
//! 3. stock defaults
//!
//! ## Configuration Options
//!
//! ```toml
//! [policy]
//! strict = true                  # form controls become critical elements
//! forbid_scripts = true          # .js/.mjs sources are quarantined
//! critical_elements = ["script", "iframe", "frame", "frameset",
//!                      "object", "embed", "applet", "base"]
//! scheme_blocklist = ["javascript:", "vbscript:", "data:text/html", ...]
//!
//! [policy.allowed_tags]          # tag -> permitted attributes
//! "*" = ["class", "id", "title", "lang"]   # allowed on every allowed tag
//! a = ["href", "rel"]
//! img = ["src", "alt", "width", "height"]
//!
//! [fingerprint]
//! length = 10                    # hex characters of the SHA-256 digest
//! assets_dir = "assets"          # output prefix for fingerprinted files
//!
//! [manifest]
//! file_name = "integrity-manifest.json"
//!
//! [verify]
//! fail_orphans = ["html", "css", "image", "font", "markdown"]
//!
//! [processing]
//! max_processes = 4              # omit for auto = CPU cores
//! ```
//!
//! Unknown keys are rejected to catch typos early. Unlike every other table,
//! `[policy.allowed_tags]` is replaced wholesale when a user file provides it:
//! an allowlist that could only grow by merging would make it impossible to
//! remove a stock tag.

use crate::types::MediaType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default name of the policy file at the source root.
pub const CONFIG_FILENAME: &str = "seal.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Full pipeline configuration loaded from `seal.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SealConfig {
    /// Sanitizer allowlist and blocklists.
    pub policy: PolicyConfig,
    /// Fingerprint length and output layout.
    pub fingerprint: FingerprintConfig,
    /// Manifest file naming.
    pub manifest: ManifestConfig,
    /// Orphan severity for the verifier.
    pub verify: VerifyConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl SealConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let len = self.fingerprint.length;
        if !(1..=64).contains(&len) {
            return Err(ConfigError::Validation(
                "fingerprint.length must be 1-64".into(),
            ));
        }
        let assets_dir = &self.fingerprint.assets_dir;
        if assets_dir.is_empty()
            || assets_dir.contains(['/', '\\'])
            || assets_dir == "."
            || assets_dir == ".."
        {
            return Err(ConfigError::Validation(
                "fingerprint.assets_dir must be a single directory name".into(),
            ));
        }
        let manifest_name = &self.manifest.file_name;
        if manifest_name.is_empty() || manifest_name.contains(['/', '\\']) {
            return Err(ConfigError::Validation(
                "manifest.file_name must be a plain file name".into(),
            ));
        }
        if manifest_name == assets_dir {
            return Err(ConfigError::Validation(
                "manifest.file_name must differ from fingerprint.assets_dir".into(),
            ));
        }
        if self.policy.scheme_blocklist.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "policy.scheme_blocklist entries must not be empty".into(),
            ));
        }
        for tag in &self.policy.critical_elements {
            if self.policy.allowed_tags.contains_key(tag) {
                return Err(ConfigError::Validation(format!(
                    "tag '{tag}' is both critical and allowed"
                )));
            }
        }
        Ok(())
    }
}

/// Sanitizer policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Treat form controls as critical elements.
    pub strict: bool,
    /// Quarantine `.js` / `.mjs` sources.
    pub forbid_scripts: bool,
    /// Elements deleted with their children; always a critical violation.
    pub critical_elements: Vec<String>,
    /// URL prefixes (after normalization) that make an element critical.
    pub scheme_blocklist: Vec<String>,
    /// Permitted tags and, per tag, permitted attributes. `"*"` lists
    /// attributes permitted on every allowed tag.
    pub allowed_tags: BTreeMap<String, Vec<String>>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            strict: true,
            forbid_scripts: true,
            critical_elements: [
                "script", "iframe", "frame", "frameset", "object", "embed", "applet", "base",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            scheme_blocklist: [
                "javascript:",
                "vbscript:",
                "livescript:",
                "data:text/html",
                "data:text/javascript",
                "data:application/",
                "data:image/svg+xml",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allowed_tags: default_allowed_tags(),
        }
    }
}

/// Stock allowlist: prose, lists, tables, media, and the document skeleton.
fn default_allowed_tags() -> BTreeMap<String, Vec<String>> {
    let bare: &[&str] = &[
        "abbr", "article", "aside", "b", "blockquote", "body", "br", "caption", "code", "dd",
        "del", "div", "dl", "dt", "em", "figcaption", "figure", "footer", "h1", "h2", "h3", "h4",
        "h5", "h6", "head", "header", "hr", "i", "ins", "kbd", "li", "main", "mark", "nav", "ol",
        "p", "pre", "s", "section", "small", "span", "strong", "sub", "sup", "table", "tbody",
        "tfoot", "thead", "title", "tr", "u", "ul",
    ];
    let with_attrs: &[(&str, &[&str])] = &[
        ("*", &["class", "id", "title", "lang"]),
        ("a", &["href", "rel", "hreflang"]),
        ("html", &["lang"]),
        ("img", &["src", "alt", "width", "height", "loading"]),
        ("link", &["rel", "href", "type", "media", "sizes"]),
        ("meta", &["charset", "name", "content"]),
        ("td", &["colspan", "rowspan"]),
        ("th", &["colspan", "rowspan", "scope"]),
        ("time", &["datetime"]),
    ];
    let mut tags: BTreeMap<String, Vec<String>> = bare
        .iter()
        .map(|t| (t.to_string(), Vec::new()))
        .collect();
    for (tag, attrs) in with_attrs {
        tags.insert(
            tag.to_string(),
            attrs.iter().map(|a| a.to_string()).collect(),
        );
    }
    tags
}

/// Fingerprint and output layout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FingerprintConfig {
    /// Number of hex characters of the digest embedded in file names.
    pub length: usize,
    /// Output directory prefix for fingerprinted assets.
    pub assets_dir: String,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            length: 10,
            assets_dir: "assets".to_string(),
        }
    }
}

/// Manifest settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManifestConfig {
    /// File name of the manifest at the output root.
    pub file_name: String,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            file_name: "integrity-manifest.json".to_string(),
        }
    }
}

/// Verifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifyConfig {
    /// Media types whose orphan files fail verification; others only warn.
    pub fail_orphans: Vec<MediaType>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            fail_orphans: vec![
                MediaType::Html,
                MediaType::Css,
                MediaType::Image,
                MediaType::Font,
                MediaType::Markdown,
            ],
        }
    }
}

/// Worker pool settings for the sanitize and fingerprint stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Upper bound on worker threads; unset means one per core.
    pub max_processes: Option<usize>,
}

/// Worker count for a run: `max_processes` clamped to `1..=cores`, or the
/// core count when unset.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// The stock policy as a TOML table, the bottom layer of every merge.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SealConfig::default()).expect("default config must serialize")
}

/// Deep-merge `overlay` into `base`. Tables merge per key; any other
/// overlay value (arrays included) replaces the base value.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Parse a policy file without interpreting it. A missing file is `None`.
pub fn load_raw_config(config_path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Apply a user overlay to `base`, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SealConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => {
            let base = if overrides_allowlist(&ov) {
                drop_allowlist(base)
            } else {
                base
            };
            merge_toml(base, ov)
        }
        None => base,
    };
    let config: SealConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

fn overrides_allowlist(overlay: &toml::Value) -> bool {
    overlay
        .get("policy")
        .and_then(|p| p.get("allowed_tags"))
        .is_some()
}

fn drop_allowlist(mut base: toml::Value) -> toml::Value {
    if let Some(toml::Value::Table(policy)) = base.get_mut("policy") {
        policy.remove("allowed_tags");
    }
    base
}

/// Load the policy for a run.
///
/// An explicit path must exist. Without one, `seal.toml` at the source root
/// is used when present, otherwise the stock defaults.
pub fn load_config(
    source_root: &Path,
    explicit: Option<&Path>,
) -> Result<SealConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::Validation(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            load_raw_config(path)?
        }
        None => load_raw_config(&source_root.join(CONFIG_FILENAME))?,
    };
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `seal.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# content-seal policy
# ====================
# All settings are optional. Values shown below are the defaults.
# Place this file at the source root as seal.toml, or pass --config.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Sanitizer policy
# ---------------------------------------------------------------------------
[policy]
# Form controls (form, input, button, textarea, select, option) become
# critical elements: deleted with their children and the file quarantined.
strict = true

# Quarantine .js / .mjs files. The published site carries no script.
forbid_scripts = true

# Elements that are always deleted, children included. Any occurrence
# quarantines the file.
critical_elements = ["script", "iframe", "frame", "frameset", "object", "embed", "applet", "base"]

# URL prefixes that quarantine a document when they appear in href/src (or
# another URL-bearing attribute, or a Markdown link). Values are compared
# after entity decoding, whitespace removal and lowercasing.
scheme_blocklist = [
    "javascript:",
    "vbscript:",
    "livescript:",
    "data:text/html",
    "data:text/javascript",
    "data:application/",
    "data:image/svg+xml",
]

# Permitted tags and their permitted attributes. Tags not listed here are
# unwrapped (markers removed, text kept). "*" lists attributes allowed on
# every permitted tag. Providing this table replaces the stock one entirely.
[policy.allowed_tags]
"*" = ["class", "id", "title", "lang"]
a = ["href", "rel", "hreflang"]
abbr = []
article = []
aside = []
b = []
blockquote = []
body = []
br = []
caption = []
code = []
dd = []
del = []
div = []
dl = []
dt = []
em = []
figcaption = []
figure = []
footer = []
h1 = []
h2 = []
h3 = []
h4 = []
h5 = []
h6 = []
head = []
header = []
hr = []
html = ["lang"]
i = []
img = ["src", "alt", "width", "height", "loading"]
ins = []
kbd = []
li = []
link = ["rel", "href", "type", "media", "sizes"]
main = []
mark = []
meta = ["charset", "name", "content"]
nav = []
ol = []
p = []
pre = []
s = []
section = []
small = []
span = []
strong = []
sub = []
sup = []
table = []
tbody = []
td = ["colspan", "rowspan"]
tfoot = []
th = ["colspan", "rowspan", "scope"]
thead = []
time = ["datetime"]
title = []
tr = []
u = []
ul = []

# ---------------------------------------------------------------------------
# Fingerprinting
# ---------------------------------------------------------------------------
[fingerprint]
# Hex characters of the SHA-256 digest embedded in file names (1-64).
# Published names follow {stem}-{fingerprint}.{ext}.
length = 10

# Output directory that receives every fingerprinted (non-document) file.
assets_dir = "assets"

# ---------------------------------------------------------------------------
# Manifest
# ---------------------------------------------------------------------------
[manifest]
file_name = "integrity-manifest.json"

# ---------------------------------------------------------------------------
# Verification
# ---------------------------------------------------------------------------
[verify]
# Media types whose unlisted (orphan) files fail verification.
# Orphans of other types only produce a warning.
fail_orphans = ["html", "css", "image", "font", "markdown"]

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
