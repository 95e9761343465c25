//! Stage 2: the content sanitizer.
//!
//! Every source file passes through [`sanitize`], which dispatches on the
//! declared media type:
//!
//! | Media type | Treatment |
//! |------------|-----------|
//! | HTML | full tag/attribute walk, output re-serialized |
//! | Markdown | raw HTML regions walked, link destinations checked |
//! | CSS | inspected, never modified |
//! | SVG image | inspected as markup, never modified |
//! | Script | quarantined when the policy forbids scripts |
//! | anything else | passed through |
//!
//! The walk is tokenizer-based, never text substitution: each tag and
//! attribute gets an explicit allow/deny decision from [`ContentPolicy`].
//! A document with any CRITICAL finding is quarantined and produces no
//! content at all.
//!
//! Sanitized output is run through the sanitizer a second time. If that pass
//! finds anything (removing one construct exposed another) the file is
//! quarantined, so published output is always a fixed point.

pub mod css;
pub mod html;
pub mod markdown;
pub mod policy;
pub mod tokenizer;

use crate::types::{MediaType, SanitizationOutcome, Severity, SourceFile, Violation};
use html::Mode;
use log::debug;
pub use policy::{ContentPolicy, Finding};
use tokenizer::line_of;

/// Immutable per-file result, aggregated by the pipeline.
#[derive(Debug, Clone)]
pub struct SanitizationResult {
    /// Bytes to publish. Empty when quarantined.
    pub content: Vec<u8>,
    pub violations: Vec<Violation>,
    pub outcome: SanitizationOutcome,
}

impl SanitizationResult {
    pub fn has_critical(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == Severity::Critical)
    }
}

/// Findings plus, for rewritten types, the new text.
struct Pass {
    findings: Vec<(usize, Finding)>,
    output: Option<String>,
}

pub fn sanitize(file: &SourceFile, policy: &ContentPolicy) -> SanitizationResult {
    let text = std::str::from_utf8(&file.bytes);
    let pass = match (file.media_type, &text) {
        (MediaType::Html | MediaType::Markdown | MediaType::Css, Err(e)) => Pass {
            findings: vec![(e.valid_up_to(), Finding::Parse("invalid UTF-8".into()))],
            output: None,
        },
        (MediaType::Html, Ok(src)) => sanitize_html(src, policy),
        (MediaType::Markdown, Ok(src)) => sanitize_markdown(src, policy),
        (MediaType::Css, Ok(src)) => Pass {
            findings: css::inspect(src, policy),
            output: None,
        },
        (MediaType::Image, _) if is_svg(&file.path) => match &text {
            Ok(src) => Pass {
                findings: html::walk(src, policy, Mode::Inspect).findings,
                output: None,
            },
            Err(e) => Pass {
                findings: vec![(e.valid_up_to(), Finding::Parse("invalid UTF-8".into()))],
                output: None,
            },
        },
        (MediaType::Script, _) if policy.forbids_scripts() => Pass {
            findings: vec![(0, Finding::ScriptFile)],
            output: None,
        },
        _ => Pass {
            findings: Vec::new(),
            output: None,
        },
    };

    let src = text.as_deref().unwrap_or("");
    let mut violations: Vec<Violation> = pass
        .findings
        .iter()
        .map(|(offset, finding)| Violation {
            file: file.path.clone(),
            line: line_of(src, *offset),
            pattern: finding.to_string(),
            severity: policy.classify(finding),
        })
        .collect();

    let critical = violations.iter().any(|v| v.severity == Severity::Critical);
    let result = if critical {
        SanitizationResult {
            content: Vec::new(),
            violations,
            outcome: SanitizationOutcome::Quarantined,
        }
    } else if violations.is_empty() {
        SanitizationResult {
            content: file.bytes.clone(),
            violations,
            outcome: SanitizationOutcome::Clean,
        }
    } else {
        match pass.output {
            Some(output) if !is_fixed_point(file, &output, policy) => {
                violations.push(Violation {
                    file: file.path.clone(),
                    line: 1,
                    pattern: Finding::UnstableOutput.to_string(),
                    severity: policy.classify(&Finding::UnstableOutput),
                });
                SanitizationResult {
                    content: Vec::new(),
                    violations,
                    outcome: SanitizationOutcome::Quarantined,
                }
            }
            Some(output) => SanitizationResult {
                content: output.into_bytes(),
                violations,
                outcome: SanitizationOutcome::Sanitized,
            },
            None => SanitizationResult {
                content: file.bytes.clone(),
                violations,
                outcome: SanitizationOutcome::Sanitized,
            },
        }
    };
    debug!(
        "{}: {:?} ({} violations)",
        file.path,
        result.outcome,
        result.violations.len()
    );
    result
}

fn sanitize_html(src: &str, policy: &ContentPolicy) -> Pass {
    let walk = html::walk(src, policy, Mode::Sanitize);
    Pass {
        findings: walk.findings,
        output: Some(walk.output),
    }
}

fn sanitize_markdown(src: &str, policy: &ContentPolicy) -> Pass {
    let scan = markdown::scan(src);
    let walk = html::walk_segments(src, &scan.segments, policy, Mode::Sanitize);
    let mut findings = walk.findings;
    for link in &scan.links {
        if let Some(scheme) = policy.blocked_scheme(&link.dest) {
            findings.push((
                link.offset,
                Finding::BlockedScheme {
                    attr: "link".into(),
                    scheme: scheme.to_string(),
                },
            ));
        }
    }
    findings.sort_by_key(|(offset, _)| *offset);
    Pass {
        findings,
        output: Some(walk.output),
    }
}

/// Re-sanitizing the output must find nothing.
fn is_fixed_point(file: &SourceFile, output: &str, policy: &ContentPolicy) -> bool {
    let pass = match file.media_type {
        MediaType::Markdown => sanitize_markdown(output, policy),
        _ => sanitize_html(output, policy),
    };
    pass.findings.is_empty()
}

fn is_svg(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("svg"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;

    fn policy() -> ContentPolicy {
        ContentPolicy::from_config(&PolicyConfig::default())
    }

    fn run(path: &str, content: &str) -> SanitizationResult {
        sanitize(&SourceFile::new(path, content.as_bytes().to_vec()), &policy())
    }

    fn text(result: &SanitizationResult) -> &str {
        std::str::from_utf8(&result.content).unwrap()
    }

    // =========================================================================
    // Outcome rules
    // =========================================================================

    #[test]
    fn clean_html_passes_through_byte_identical() {
        let src = "<!DOCTYPE html>\n<html lang=\"en\"><body><p>1 < 2</p></body></html>\n";
        let result = run("index.html", src);
        assert_eq!(result.outcome, SanitizationOutcome::Clean);
        assert!(result.violations.is_empty());
        assert_eq!(text(&result), src);
    }

    #[test]
    fn warnings_only_means_sanitized() {
        let result = run("a.html", "<p>\n<marquee>hi</marquee>\n</p>");
        assert_eq!(result.outcome, SanitizationOutcome::Sanitized);
        assert_eq!(text(&result), "<p>\nhi\n</p>");
        assert_eq!(result.violations.len(), 2);
        assert_eq!(result.violations[0].line, 2);
        assert_eq!(result.violations[0].severity, Severity::Warn);
    }

    #[test]
    fn script_quarantines_and_emits_nothing() {
        let result = run("a.html", "<p>x</p>\n<script>alert(1)</script>");
        assert_eq!(result.outcome, SanitizationOutcome::Quarantined);
        assert!(result.content.is_empty());
        assert!(result.has_critical());
        let v = &result.violations[0];
        assert_eq!(v.line, 2);
        assert_eq!(v.pattern, "critical element <script>");
    }

    #[test]
    fn parse_error_quarantines() {
        let result = run("a.html", "<p>fine</p>\n<a href=\"x>broken");
        assert_eq!(result.outcome, SanitizationOutcome::Quarantined);
        assert!(result.violations[0].pattern.starts_with("parse error"));
    }

    #[test]
    fn invalid_utf8_quarantines() {
        let file = SourceFile::new("a.html", vec![b'<', b'p', b'>', 0xff]);
        let result = sanitize(&file, &policy());
        assert_eq!(result.outcome, SanitizationOutcome::Quarantined);
    }

    // =========================================================================
    // Idempotence
    // =========================================================================

    #[test]
    fn sanitized_output_is_stable() {
        let src = "<div><font color=red>a</font><!-- c --><p data-x>b</p></div>";
        let first = run("a.html", src);
        assert_eq!(first.outcome, SanitizationOutcome::Sanitized);
        let second = run("a.html", text(&first));
        assert_eq!(second.outcome, SanitizationOutcome::Clean);
        assert_eq!(second.content, first.content);
    }

    #[test]
    fn markdown_sanitized_output_is_stable() {
        let src = "# T\n\nSome <u>u</u> and <blink>b</blink>.\n\n```\n<script>\n```\n";
        let first = run("a.md", src);
        assert_eq!(first.outcome, SanitizationOutcome::Sanitized);
        assert_eq!(
            text(&first),
            "# T\n\nSome <u>u</u> and b.\n\n```\n<script>\n```\n"
        );
        let second = run("a.md", text(&first));
        assert_eq!(second.outcome, SanitizationOutcome::Clean);
    }

    // =========================================================================
    // Markdown
    // =========================================================================

    #[test]
    fn markdown_javascript_image_is_quarantined() {
        let result = run("post.md", "![x](javascript:alert(1))");
        assert_eq!(result.outcome, SanitizationOutcome::Quarantined);
        assert!(!text(&result).contains("javascript:"));
    }

    #[test]
    fn markdown_code_is_literal() {
        let src = "Use `<script>` or:\n\n    <iframe src=x></iframe>\n";
        let result = run("a.md", src);
        assert_eq!(result.outcome, SanitizationOutcome::Clean);
        assert_eq!(text(&result), src);
    }

    #[test]
    fn markdown_inline_title_is_kept() {
        let src = "Read <title>x</title> here\n";
        let result = run("a.md", src);
        assert_eq!(result.outcome, SanitizationOutcome::Clean);
        assert_eq!(text(&result), src);
    }

    #[test]
    fn markdown_inline_noscript_is_unwrapped() {
        let result = run("a.md", "Some <noscript>fallback</noscript> text\n");
        assert_eq!(result.outcome, SanitizationOutcome::Sanitized);
        assert_eq!(text(&result), "Some fallback text\n");
        assert!(result.violations.iter().all(|v| v.severity == Severity::Warn));
    }

    #[test]
    fn markdown_raw_script_is_quarantined() {
        let result = run("a.md", "Hello\n\n<script>alert(1)</script>\n");
        assert_eq!(result.outcome, SanitizationOutcome::Quarantined);
    }

    // =========================================================================
    // Inspected types
    // =========================================================================

    #[test]
    fn css_is_inspected_not_modified() {
        let src = "@import url(https://cdn.example.com/x.css);\nbody{}";
        let result = run("a.css", src);
        assert_eq!(result.outcome, SanitizationOutcome::Sanitized);
        assert_eq!(text(&result), src);
        let result = run("b.css", "a{width:expression(1)}");
        assert_eq!(result.outcome, SanitizationOutcome::Quarantined);
    }

    #[test]
    fn svg_with_script_is_quarantined() {
        let src = "<svg xmlns=\"http://www.w3.org/2000/svg\"><script>x</script></svg>";
        assert_eq!(run("logo.svg", src).outcome, SanitizationOutcome::Quarantined);
        let safe = "<?xml version=\"1.0\"?><svg><circle r=\"1\"/></svg>";
        let result = run("logo.svg", safe);
        assert_eq!(result.outcome, SanitizationOutcome::Clean);
        assert_eq!(text(&result), safe);
    }

    #[test]
    fn svg_script_hidden_from_html_rules_is_quarantined() {
        for src in [
            "<svg><title><script>alert(1)</script></title></svg>",
            "<svg><style><script>alert(1)</script></style></svg>",
            "<svg xmlns:h=\"http://www.w3.org/1999/xhtml\"><h:script>alert(1)</h:script></svg>",
            "<svg><a><animate attributeName=\"href\" values=\"javascript:alert(1)\"/>\
<text>x</text></a></svg>",
        ] {
            let result = run("logo.svg", src);
            assert_eq!(result.outcome, SanitizationOutcome::Quarantined, "{src}");
            assert!(result.content.is_empty());
        }
    }

    #[test]
    fn script_files_are_forbidden_by_default() {
        assert_eq!(run("app.js", "x()").outcome, SanitizationOutcome::Quarantined);
        let relaxed = ContentPolicy::from_config(&PolicyConfig {
            forbid_scripts: false,
            ..PolicyConfig::default()
        });
        let file = SourceFile::new("app.js", b"x()".to_vec());
        assert_eq!(sanitize(&file, &relaxed).outcome, SanitizationOutcome::Clean);
    }

    #[test]
    fn binary_assets_pass_through() {
        let file = SourceFile::new("img/a.png", vec![0x89, b'P', b'N', b'G', 0xff, 0x00]);
        let result = sanitize(&file, &policy());
        assert_eq!(result.outcome, SanitizationOutcome::Clean);
        assert_eq!(result.content, file.bytes);
    }
}
