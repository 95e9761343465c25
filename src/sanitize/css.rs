//! Stylesheet inspection.
//!
//! CSS is never rewritten by the sanitizer, only inspected. The source is
//! first reduced to a compact form (comments removed, escapes decoded,
//! whitespace dropped, lowercased) so that `exp/**/ression(` and
//! `\65 xpression(` are seen for what they are. Each compact character keeps
//! the byte offset it came from, so findings still point at the right line.

use super::policy::{ContentPolicy, Finding};
use crate::types::Severity;

/// Constructs that execute code in some browser.
const DANGEROUS: &[&str] = &["expression(", "behavior:", "-moz-binding"];

/// Inspect a stylesheet. Offsets are byte positions in `src`.
pub fn inspect(src: &str, policy: &ContentPolicy) -> Vec<(usize, Finding)> {
    let compact = match Compact::new(src) {
        Ok(compact) => compact,
        Err(offset) => {
            return vec![(offset, Finding::Parse("unterminated CSS comment".into()))];
        }
    };
    let mut findings = Vec::new();

    for pattern in DANGEROUS {
        for at in compact.find_all(pattern) {
            findings.push((
                compact.offsets[at],
                Finding::DangerousCss(pattern.trim_end_matches(['(', ':']).to_string()),
            ));
        }
    }

    for at in compact.find_all("url(") {
        let start = at + 4;
        let end = compact.chars[start..]
            .iter()
            .position(|&c| c == ')')
            .map_or(compact.chars.len(), |p| start + p);
        let target: String = compact.chars[start..end].iter().collect();
        let target = target.trim_matches(['"', '\'']);
        if let Some(scheme) = policy.blocked_scheme(target) {
            findings.push((
                compact.offsets[at],
                Finding::BlockedScheme {
                    attr: "url()".into(),
                    scheme: scheme.to_string(),
                },
            ));
        }
    }

    for at in compact.find_all("@import") {
        let start = at + "@import".len();
        let Some(target) = compact.import_target(start) else {
            continue;
        };
        if let Some(scheme) = policy.blocked_scheme(&target) {
            findings.push((
                compact.offsets[at],
                Finding::BlockedScheme {
                    attr: "@import".into(),
                    scheme: scheme.to_string(),
                },
            ));
        } else if is_external(&target) {
            findings.push((compact.offsets[at], Finding::ExternalImport(target)));
        }
    }

    findings.sort_by_key(|(offset, _)| *offset);
    findings
}

/// Inspect a `style` attribute value. Returns the first critical finding.
pub fn inspect_inline(value: &str, policy: &ContentPolicy) -> Option<Finding> {
    let decoded = super::policy::decode_entities(value);
    inspect(&decoded, policy)
        .into_iter()
        .map(|(_, finding)| finding)
        .find(|finding| policy.classify(finding) == Severity::Critical)
}

fn is_external(target: &str) -> bool {
    target.starts_with("http:") || target.starts_with("https:") || target.starts_with("//")
}

/// Lowercased, comment-free, escape-decoded, whitespace-free view of a
/// stylesheet with a source offset per character.
struct Compact {
    chars: Vec<char>,
    offsets: Vec<usize>,
}

impl Compact {
    /// Fails with the offset of an unterminated comment.
    fn new(src: &str) -> Result<Self, usize> {
        let mut chars = Vec::with_capacity(src.len());
        let mut offsets = Vec::with_capacity(src.len());
        let mut iter = src.char_indices().peekable();

        while let Some((offset, c)) = iter.next() {
            match c {
                '/' if iter.peek().is_some_and(|&(_, n)| n == '*') => {
                    iter.next();
                    let mut closed = false;
                    let mut prev = '\0';
                    for (_, n) in iter.by_ref() {
                        if prev == '*' && n == '/' {
                            closed = true;
                            break;
                        }
                        prev = n;
                    }
                    if !closed {
                        return Err(offset);
                    }
                }
                '\\' => {
                    let mut hex = String::new();
                    while hex.len() < 6
                        && let Some(&(_, n)) = iter.peek()
                        && n.is_ascii_hexdigit()
                    {
                        hex.push(n);
                        iter.next();
                    }
                    let decoded = if hex.is_empty() {
                        iter.next().map(|(_, n)| n)
                    } else {
                        // One whitespace character terminates a hex escape.
                        if iter.peek().is_some_and(|&(_, n)| n.is_whitespace()) {
                            iter.next();
                        }
                        Some(
                            u32::from_str_radix(&hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .unwrap_or('\u{fffd}'),
                        )
                    };
                    if let Some(d) = decoded
                        && !d.is_whitespace()
                    {
                        for l in d.to_lowercase() {
                            chars.push(l);
                            offsets.push(offset);
                        }
                    }
                }
                c if c.is_whitespace() => {}
                c => {
                    for l in c.to_lowercase() {
                        chars.push(l);
                        offsets.push(offset);
                    }
                }
            }
        }
        Ok(Self { chars, offsets })
    }

    fn find_all(&self, pattern: &str) -> Vec<usize> {
        let needle: Vec<char> = pattern.chars().collect();
        if self.chars.len() < needle.len() {
            return Vec::new();
        }
        (0..=self.chars.len() - needle.len())
            .filter(|&i| self.chars[i..i + needle.len()] == needle[..])
            .collect()
    }

    /// Target of an `@import` starting at `start`: a quoted string or `url(...)`.
    fn import_target(&self, start: usize) -> Option<String> {
        let rest = &self.chars[start..];
        let body: &[char] = match *rest.first()? {
            '"' | '\'' => {
                let quote = rest[0];
                let end = rest[1..].iter().position(|&c| c == quote)?;
                &rest[1..1 + end]
            }
            'u' if rest.starts_with(&['u', 'r', 'l', '(']) => {
                let end = rest.iter().position(|&c| c == ')')?;
                &rest[4..end]
            }
            _ => return None,
        };
        let target: String = body.iter().collect();
        Some(target.trim_matches(['"', '\'']).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;

    fn policy() -> ContentPolicy {
        ContentPolicy::from_config(&PolicyConfig::default())
    }

    fn findings(src: &str) -> Vec<Finding> {
        inspect(src, &policy()).into_iter().map(|(_, f)| f).collect()
    }

    #[test]
    fn plain_stylesheet_is_clean() {
        let src = "body { background: url(logo.png); color: #333 }\n@import \"base.css\";";
        assert!(findings(src).is_empty());
    }

    #[test]
    fn expression_is_dangerous() {
        let f = findings("p { width: expression(alert(1)) }");
        assert_eq!(f, vec![Finding::DangerousCss("expression".into())]);
    }

    #[test]
    fn comment_and_escape_obfuscation_is_seen_through() {
        assert_eq!(findings("p{width:exp/**/ression(1)}").len(), 1);
        assert_eq!(findings("p{width:\\65 xpression(1)}").len(), 1);
        assert_eq!(findings("p{width:EXPRESSION (1)}").len(), 1);
    }

    #[test]
    fn behavior_and_binding() {
        let f = findings("a{behavior:url(x.htc)} b{-moz-binding:url(x.xml#y)}");
        assert_eq!(f.len(), 2);
    }

    #[test]
    fn blocked_scheme_in_url() {
        let f = findings("a { background: url( 'javascript:alert(1)' ) }");
        assert!(matches!(&f[0], Finding::BlockedScheme { scheme, .. } if scheme == "javascript:"));
    }

    #[test]
    fn data_image_url_is_fine() {
        assert!(findings("a{background:url(data:image/png;base64,AAAA)}").is_empty());
    }

    #[test]
    fn external_import_is_a_warning() {
        let f = findings("@import url(https://fonts.example.com/a.css);");
        assert_eq!(
            f,
            vec![Finding::ExternalImport("https://fonts.example.com/a.css".into())]
        );
        assert_eq!(policy().classify(&f[0]), Severity::Warn);
    }

    #[test]
    fn offsets_point_into_source() {
        let src = "a{}\n\np{width:expression(1)}";
        let found = inspect(src, &policy());
        assert_eq!(found[0].0, src.find("expression").unwrap());
    }

    #[test]
    fn unterminated_comment_is_parse_error() {
        let found = inspect("a{} /* open", &policy());
        assert_eq!(found, vec![(4, Finding::Parse("unterminated CSS comment".into()))]);
    }

    #[test]
    fn inline_style_reports_only_critical() {
        let p = policy();
        assert!(inspect_inline("color: red", &p).is_none());
        assert!(inspect_inline("width: expression(1)", &p).is_some());
        assert!(inspect_inline("background:url(&#106;avascript:x)", &p).is_some());
    }
}
