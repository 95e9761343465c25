//! Shared types used across all pipeline stages.
//!
//! Scanner, sanitizer, fingerprinter and rewriter all speak in terms of these
//! types. Paths are always relative, `/`-separated strings so they serialize
//! identically on every platform.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared media type of a source file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Markdown,
    Html,
    Css,
    Image,
    Font,
    Script,
    Other,
}

impl MediaType {
    /// Classify a file by its (case-insensitive) extension.
    pub fn from_path(path: &str) -> Self {
        let ext = path
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "md" | "markdown" => MediaType::Markdown,
            "html" | "htm" => MediaType::Html,
            "css" => MediaType::Css,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "avif" | "svg" | "ico" | "bmp" => {
                MediaType::Image
            }
            "woff" | "woff2" | "ttf" | "otf" | "eot" => MediaType::Font,
            "js" | "mjs" => MediaType::Script,
            _ => MediaType::Other,
        }
    }

    /// Documents keep their published path; everything else is fingerprinted.
    pub fn is_document(self) -> bool {
        matches!(self, MediaType::Markdown | MediaType::Html)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Markdown => "markdown",
            MediaType::Html => "html",
            MediaType::Css => "css",
            MediaType::Image => "image",
            MediaType::Font => "font",
            MediaType::Script => "script",
            MediaType::Other => "other",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a file stands after the sanitize stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizationOutcome {
    Unprocessed,
    /// No violations; bytes pass through unchanged.
    Clean,
    /// Only WARN violations; stripped content proceeds.
    Sanitized,
    /// At least one CRITICAL violation; nothing is emitted.
    Quarantined,
}

/// A file discovered by the scanner.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the source root, `/`-separated.
    pub path: String,
    pub bytes: Vec<u8>,
    pub media_type: MediaType,
    pub outcome: SanitizationOutcome,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        let path = path.into();
        let media_type = MediaType::from_path(&path);
        Self {
            path,
            bytes,
            media_type,
            outcome: SanitizationOutcome::Unprocessed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warn,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warn => f.write_str("WARN"),
            Severity::Critical => f.write_str("CRITICAL"),
        }
    }
}

/// A single policy finding, located by file and 1-based line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub file: String,
    pub line: usize,
    pub pattern: String,
    pub severity: Severity,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{}: {}",
            self.severity, self.file, self.line, self.pattern
        )
    }
}

/// An internal reference that could not be resolved against the rename table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingReference {
    pub file: String,
    pub reference: String,
}

impl fmt::Display for MissingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: unresolved reference {}", self.file, self.reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension_case_insensitively() {
        assert_eq!(MediaType::from_path("posts/a.MD"), MediaType::Markdown);
        assert_eq!(MediaType::from_path("index.htm"), MediaType::Html);
        assert_eq!(MediaType::from_path("css/site.css"), MediaType::Css);
        assert_eq!(MediaType::from_path("img/logo.PNG"), MediaType::Image);
        assert_eq!(MediaType::from_path("fonts/x.woff2"), MediaType::Font);
        assert_eq!(MediaType::from_path("app.js"), MediaType::Script);
        assert_eq!(MediaType::from_path("robots.txt"), MediaType::Other);
    }

    #[test]
    fn extensionless_file_is_other() {
        assert_eq!(MediaType::from_path("CNAME"), MediaType::Other);
        assert_eq!(MediaType::from_path("dir.v2/LICENSE"), MediaType::Other);
    }

    #[test]
    fn only_markdown_and_html_are_documents() {
        assert!(MediaType::Markdown.is_document());
        assert!(MediaType::Html.is_document());
        assert!(!MediaType::Css.is_document());
        assert!(!MediaType::Image.is_document());
    }

    #[test]
    fn violation_display_includes_location() {
        let v = Violation {
            file: "a.html".into(),
            line: 3,
            pattern: "<script>".into(),
            severity: Severity::Critical,
        };
        assert_eq!(v.to_string(), "CRITICAL a.html:3: <script>");
    }
}
