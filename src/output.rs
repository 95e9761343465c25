//! CLI output formatting for the build, check and verify commands.
//!
//! Output is **file-centric**: every line starts from a path the author
//! recognises (the source path), with the published path or the reason for
//! failure as context. Findings use the same `SEVERITY file:line: pattern`
//! shape everywhere so they can be grepped across runs.
//!
//! # Output Format
//!
//! ## Build / check
//!
//! ```text
//! Files
//!     about.md (sanitized)
//!     img/logo.png → assets/img/logo-3f2a9c01be.png
//!     index.html
//!
//! Warnings
//!     WARN about.md:3: unwrapped element <blink>
//!     index.html: unresolved reference missing.html
//!
//! 3 files, 1 asset fingerprinted, 2 warnings
//! Manifest: integrity-manifest.json (3 entries)
//! ```
//!
//! ## Quarantine
//!
//! ```text
//! Quarantined
//!     evil.md
//!         CRITICAL evil.md:1: blocked scheme javascript: in href
//! ```
//!
//! ## Verify
//!
//! ```text
//! MISMATCH assets/img/logo-3f2a9c01be.png
//!     expected 3f2a9c01be…
//!     actual   77e0c2d4aa…
//! MISSING  index.html
//! ORPHAN   notes.txt (WARN)
//!
//! Verified 2 of 4 entries: TAMPERED
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::pipeline::PipelineReport;
use crate::types::{SanitizationOutcome, Violation};
use crate::verify::VerificationReport;

// ============================================================================
// Shared helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 file`, `2 files`.
fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// A source path, its published path when it moved, and its outcome when
/// it is worth mentioning.
///
/// ```text
/// img/logo.png → assets/img/logo-3f2a9c01be.png
/// about.md (sanitized)
/// ```
fn file_line(source: &str, published: &str, outcome: SanitizationOutcome) -> String {
    let mut line = if source == published {
        source.to_string()
    } else {
        format!("{source} → {published}")
    };
    if outcome == SanitizationOutcome::Sanitized {
        line.push_str(" (sanitized)");
    }
    line
}

// ============================================================================
// Build / check
// ============================================================================

/// Format a successful pipeline run.
pub fn format_pipeline_report(report: &PipelineReport, manifest_name: &str) -> Vec<String> {
    let mut lines = Vec::new();

    if !report.files.is_empty() {
        lines.push("Files".to_string());
        for file in &report.files {
            lines.push(format!(
                "{}{}",
                indent(1),
                file_line(&file.source, &file.path, file.outcome)
            ));
        }
    }

    let warnings = report.violations.len() + report.missing.len();
    if warnings > 0 {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push("Warnings".to_string());
        for v in &report.violations {
            lines.push(format!("{}{v}", indent(1)));
        }
        for m in &report.missing {
            lines.push(format!("{}{m}", indent(1)));
        }
    }

    if !lines.is_empty() {
        lines.push(String::new());
    }
    let moved = report.files.iter().filter(|f| f.source != f.path).count();
    lines.push(format!(
        "{}, {} fingerprinted, {}",
        plural(report.files.len(), "file"),
        plural(moved, "asset"),
        plural(warnings, "warning")
    ));
    let state = if report.written { "" } else { " (not written)" };
    let entries = report.manifest.entries.len();
    let noun = if entries == 1 { "entry" } else { "entries" };
    lines.push(format!("Manifest: {manifest_name}{state} ({entries} {noun})"));
    lines
}

pub fn print_pipeline_report(report: &PipelineReport, manifest_name: &str) {
    for line in format_pipeline_report(report, manifest_name) {
        println!("{line}");
    }
}

/// Format a quarantine abort: each offending file with its critical findings.
pub fn format_quarantine(files: &[String], violations: &[Violation]) -> Vec<String> {
    let mut lines = vec!["Quarantined".to_string()];
    for file in files {
        lines.push(format!("{}{file}", indent(1)));
        for v in violations.iter().filter(|v| &v.file == file) {
            lines.push(format!("{}{v}", indent(2)));
        }
    }
    lines
}

pub fn print_quarantine(files: &[String], violations: &[Violation]) {
    for line in format_quarantine(files, violations) {
        println!("{line}");
    }
}

// ============================================================================
// Verify
// ============================================================================

/// Format a verification report.
pub fn format_verification(report: &VerificationReport) -> Vec<String> {
    let mut lines = Vec::new();
    for m in &report.mismatches {
        lines.push(format!("MISMATCH {}", m.path));
        lines.push(format!("{}expected {}", indent(1), m.expected));
        lines.push(format!("{}actual   {}", indent(1), m.actual));
    }
    for path in &report.missing {
        lines.push(format!("MISSING  {path}"));
    }
    for orphan in &report.orphans {
        lines.push(format!("ORPHAN   {} ({})", orphan.path, orphan.severity));
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }
    let total = report.verified + report.mismatches.len() + report.missing.len();
    let verdict = match report.exit_code() {
        0 => "OK",
        1 => "OK with warnings",
        _ => "TAMPERED",
    };
    lines.push(format!(
        "Verified {} of {total} entries: {verdict}",
        report.verified
    ));
    lines
}

pub fn print_verification(report: &VerificationReport) {
    for line in format_verification(report) {
        println!("{line}");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestEntry, build};
    use crate::pipeline::PublishedFile;
    use crate::types::{MediaType, MissingReference, Severity};
    use crate::verify::{MismatchedHash, OrphanFile};

    fn report(files: Vec<PublishedFile>, violations: Vec<Violation>) -> PipelineReport {
        let entries = files
            .iter()
            .map(|f| ManifestEntry::new(&f.source, &f.path, b""))
            .collect();
        PipelineReport {
            files,
            violations,
            missing: Vec::new(),
            manifest: build(entries, "2024-01-01T00:00:00Z".into()),
            written: true,
        }
    }

    fn file(source: &str, path: &str, outcome: SanitizationOutcome) -> PublishedFile {
        PublishedFile {
            source: source.into(),
            path: path.into(),
            media_type: MediaType::from_path(source),
            outcome,
            size: 0,
        }
    }

    fn warn(file: &str, line: usize, pattern: &str) -> Violation {
        Violation {
            file: file.into(),
            line,
            pattern: pattern.into(),
            severity: Severity::Warn,
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[test]
    fn indent_levels() {
        assert_eq!(indent(0), "");
        assert_eq!(indent(2), "        ");
    }

    #[test]
    fn plural_forms() {
        assert_eq!(plural(1, "file"), "1 file");
        assert_eq!(plural(0, "file"), "0 files");
        assert_eq!(plural(3, "warning"), "3 warnings");
    }

    #[test]
    fn file_line_shows_move_and_sanitized() {
        assert_eq!(
            file_line("a.png", "assets/a-1.png", SanitizationOutcome::Clean),
            "a.png → assets/a-1.png"
        );
        assert_eq!(
            file_line("a.md", "a.md", SanitizationOutcome::Sanitized),
            "a.md (sanitized)"
        );
        assert_eq!(file_line("a.md", "a.md", SanitizationOutcome::Clean), "a.md");
    }

    // =========================================================================
    // Pipeline report
    // =========================================================================

    #[test]
    fn clean_report() {
        let r = report(
            vec![
                file("index.html", "index.html", SanitizationOutcome::Clean),
                file("logo.png", "assets/logo-ab.png", SanitizationOutcome::Clean),
            ],
            Vec::new(),
        );
        let lines = format_pipeline_report(&r, "integrity-manifest.json");
        assert_eq!(
            lines,
            vec![
                "Files",
                "    index.html",
                "    logo.png → assets/logo-ab.png",
                "",
                "2 files, 1 asset fingerprinted, 0 warnings",
                "Manifest: integrity-manifest.json (2 entries)",
            ]
        );
    }

    #[test]
    fn report_lists_warnings_and_missing() {
        let mut r = report(
            vec![file("a.md", "a.md", SanitizationOutcome::Sanitized)],
            vec![warn("a.md", 3, "unwrapped element <blink>")],
        );
        r.missing.push(MissingReference {
            file: "a.md".into(),
            reference: "gone.png".into(),
        });
        r.written = false;
        let lines = format_pipeline_report(&r, "m.json");
        assert!(lines.contains(&"Warnings".to_string()));
        assert!(lines.contains(&"    WARN a.md:3: unwrapped element <blink>".to_string()));
        assert!(lines.contains(&"    a.md: unresolved reference gone.png".to_string()));
        assert!(lines.contains(&"1 file, 0 assets fingerprinted, 2 warnings".to_string()));
        assert_eq!(lines.last().unwrap(), "Manifest: m.json (not written) (1 entry)");
    }

    #[test]
    fn quarantine_groups_by_file() {
        let critical = Violation {
            file: "evil.md".into(),
            line: 1,
            pattern: "blocked scheme javascript: in href".into(),
            severity: Severity::Critical,
        };
        let lines = format_quarantine(&["evil.md".to_string()], &[critical]);
        assert_eq!(
            lines,
            vec![
                "Quarantined",
                "    evil.md",
                "        CRITICAL evil.md:1: blocked scheme javascript: in href",
            ]
        );
    }

    // =========================================================================
    // Verification report
    // =========================================================================

    #[test]
    fn verification_ok() {
        let r = VerificationReport {
            verified: 3,
            ..Default::default()
        };
        assert_eq!(format_verification(&r), vec!["Verified 3 of 3 entries: OK"]);
    }

    #[test]
    fn verification_tampered() {
        let r = VerificationReport {
            mismatches: vec![MismatchedHash {
                path: "a.css".into(),
                expected: "aa".into(),
                actual: "bb".into(),
            }],
            missing: vec!["b.html".into()],
            orphans: vec![OrphanFile {
                path: "x.txt".into(),
                severity: Severity::Warn,
            }],
            verified: 1,
        };
        assert_eq!(
            format_verification(&r),
            vec![
                "MISMATCH a.css",
                "    expected aa",
                "    actual   bb",
                "MISSING  b.html",
                "ORPHAN   x.txt (WARN)",
                "",
                "Verified 1 of 3 entries: TAMPERED",
            ]
        );
    }

    #[test]
    fn verification_warn_orphan_only() {
        let r = VerificationReport {
            orphans: vec![OrphanFile {
                path: "x.txt".into(),
                severity: Severity::Warn,
            }],
            verified: 2,
            ..Default::default()
        };
        assert_eq!(
            format_verification(&r).last().unwrap(),
            "Verified 2 of 2 entries: OK with warnings"
        );
    }
}
