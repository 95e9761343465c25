//! Tag/attribute walk over an HTML fragment.
//!
//! Each token gets an explicit allow/deny decision:
//!
//! | Token | Decision |
//! |-------|----------|
//! | critical element | deleted with its children, CRITICAL |
//! | allowed element | kept; disallowed attributes dropped (WARN) |
//! | any other element | unwrapped: markers removed, text kept (WARN) |
//! | `on*` attribute | CRITICAL, element deleted |
//! | blocked URL scheme | CRITICAL, element deleted |
//! | comment / PI / CDATA | stripped (WARN) |
//! | doctype, text | kept |
//!
//! In [`Mode::Inspect`] nothing is emitted and only critical findings are
//! collected. SVG images are walked this way: their markup is not ours to
//! rewrite, but a script inside one must still stop the run. Inspection
//! tokenizes with XML rules, matches critical elements by local name
//! (`h:script` is a script), and checks SMIL animations that set a URL
//! attribute (`<animate attributeName="href" values="javascript:...">`).

use super::css;
use super::policy::{
    ANIMATION_VALUE_ATTRIBUTES, ContentPolicy, Finding, URL_ATTRIBUTES, VOID_ELEMENTS,
};
use super::tokenizer::{Attribute, StartTag, Token, Tokenizer, local_name};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sanitize,
    Inspect,
}

/// A region of a document handed to the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Tokenized and filtered.
    Markup(Range<usize>),
    /// Copied verbatim, unless it falls inside a deleted element.
    Literal(Range<usize>),
}

/// Result of walking one document.
#[derive(Debug, Default)]
pub struct Walk {
    /// Findings with byte offsets into the document.
    pub findings: Vec<(usize, Finding)>,
    /// Emitted markup (empty in inspect mode).
    pub output: String,
}

/// Walk a whole document as markup.
pub fn walk(src: &str, policy: &ContentPolicy, mode: Mode) -> Walk {
    walk_segments(src, &[Segment::Markup(0..src.len())], policy, mode)
}

/// Walk a document split into segments. Element state (a critical element
/// being deleted) carries across segment boundaries; a parse error stops the
/// walk.
pub fn walk_segments(
    src: &str,
    segments: &[Segment],
    policy: &ContentPolicy,
    mode: Mode,
) -> Walk {
    let mut walker = Walker {
        src,
        base: 0,
        policy,
        mode,
        walk: Walk::default(),
        deleting: None,
        style_body: false,
    };
    for segment in segments {
        match segment {
            Segment::Literal(range) => {
                if walker.deleting.is_none() {
                    walker.emit(&src[range.clone()]);
                }
            }
            Segment::Markup(range) => {
                walker.src = &src[range.clone()];
                walker.base = range.start;
                let failed = walker.markup();
                if failed {
                    break;
                }
            }
        }
    }
    walker.walk
}

struct Walker<'a, 'p> {
    /// Current markup segment and its offset in the document.
    src: &'a str,
    base: usize,
    policy: &'p ContentPolicy,
    mode: Mode,
    walk: Walk,
    /// Critical element being deleted: lowercase name and nesting depth.
    deleting: Option<(String, usize)>,
    /// Inside the body of an effective `<style>` element.
    style_body: bool,
}

impl<'a> Walker<'a, '_> {
    /// Walk the current markup segment. Returns true on a parse error.
    fn markup(&mut self) -> bool {
        let tokenizer = match self.mode {
            Mode::Sanitize => Tokenizer::new(self.src),
            Mode::Inspect => Tokenizer::xml(self.src),
        };
        for token in tokenizer {
            match token {
                Ok(token) => self.token(token),
                Err(e) => {
                    self.report(e.offset, Finding::Parse(e.message));
                    return true;
                }
            }
        }
        false
    }

    fn report(&mut self, offset: usize, finding: Finding) {
        self.walk.findings.push((self.base + offset, finding));
    }

    fn emit(&mut self, text: &str) {
        if self.mode == Mode::Sanitize {
            self.walk.output.push_str(text);
        }
    }

    fn token(&mut self, token: Token<'a>) {
        if let Some((name, depth)) = &mut self.deleting {
            match &token {
                Token::Start(tag) if !tag.self_closing && tag.name.eq_ignore_ascii_case(name) => {
                    *depth += 1;
                }
                Token::End { name: end, .. } if end.eq_ignore_ascii_case(name) => {
                    *depth -= 1;
                    if *depth == 0 {
                        self.deleting = None;
                    }
                }
                _ => {}
            }
            return;
        }

        let inspect = self.mode == Mode::Inspect;
        if self.style_body {
            let css_span = match &token {
                Token::Text(span) => Some(span.clone()),
                Token::Cdata(span) => Some(span.start + 9..span.end - 3),
                _ => None,
            };
            match css_span {
                Some(span) => {
                    let src = self.src;
                    for (offset, finding) in css::inspect(&src[span.clone()], self.policy) {
                        self.report(span.start + offset, finding);
                    }
                }
                None => self.style_body = false,
            }
        }
        match token {
            Token::Text(span) => {
                if !inspect {
                    // A `<` that starts nothing stays harmless only while it is
                    // not adjacent to markup we remove, so it is always escaped.
                    let text = self.src[span].replace('<', "&lt;");
                    self.walk.output.push_str(&text);
                }
            }
            Token::Doctype(span) => {
                let src = self.src;
                self.emit(&src[span]);
            }
            Token::Comment(span) if !inspect => self.report(span.start, Finding::Comment),
            Token::ProcessingInstruction(span) if !inspect => {
                self.report(span.start, Finding::ProcessingInstruction)
            }
            Token::Cdata(span) if !inspect => self.report(span.start, Finding::Cdata),
            Token::Comment(_) | Token::ProcessingInstruction(_) | Token::Cdata(_) => {}
            Token::Start(tag) => self.start_tag(tag),
            Token::End { name, span } => {
                if inspect {
                    return;
                }
                let lower = name.to_ascii_lowercase();
                if self.policy.is_allowed(&lower) {
                    let src = self.src;
                    self.emit(&src[span]);
                } else {
                    self.report(span.start, Finding::StrayEndTag(lower));
                }
            }
        }
    }

    fn start_tag(&mut self, tag: StartTag<'a>) {
        let lower = tag.lower_name();
        let offset = tag.span.start;
        let mut critical = false;

        if self.policy.is_critical(&lower) || self.policy.is_critical(local_name(&lower)) {
            self.report(offset, Finding::CriticalElement(lower.clone()));
            critical = true;
        }

        let animates_url = tag.attrs.iter().any(|a| {
            a.name.eq_ignore_ascii_case("attributename")
                && a.value.is_some_and(|v| {
                    URL_ATTRIBUTES.contains(&local_name(&v.trim().to_ascii_lowercase()))
                })
        });
        let allowed = self.policy.is_allowed(&lower);
        let mut kept: Vec<&Attribute<'a>> = Vec::with_capacity(tag.attrs.len());
        let mut dropped = false;
        for attr in &tag.attrs {
            let name = attr.name.to_ascii_lowercase();
            let local = local_name(&name);
            if local.starts_with("on") {
                self.report(
                    attr.span.start,
                    Finding::EventHandler {
                        tag: lower.clone(),
                        attr: name,
                    },
                );
                critical = true;
                continue;
            }
            if let Some(value) = attr.value
                && (URL_ATTRIBUTES.contains(&name.as_str())
                    || URL_ATTRIBUTES.contains(&local)
                    || (animates_url && ANIMATION_VALUE_ATTRIBUTES.contains(&local)))
            {
                let blocked = if local == "srcset" {
                    self.policy.blocked_in_srcset(value)
                } else if local == "values" {
                    self.policy.blocked_in_values(value)
                } else {
                    self.policy.blocked_scheme(value)
                };
                if let Some(scheme) = blocked {
                    let scheme = scheme.to_string();
                    self.report(attr.span.start, Finding::BlockedScheme { attr: name, scheme });
                    critical = true;
                    continue;
                }
            }
            if self.mode == Mode::Sanitize && allowed && !self.policy.attr_allowed(&lower, &name)
            {
                self.report(
                    attr.span.start,
                    Finding::DisallowedAttribute {
                        tag: lower.clone(),
                        attr: name,
                    },
                );
                dropped = true;
                continue;
            }
            if name == "style"
                && let Some(value) = attr.value
                && let Some(finding) = css::inspect_inline(value, self.policy)
            {
                self.report(attr.span.start, finding);
                critical = true;
                continue;
            }
            kept.push(attr);
        }

        if critical {
            if !tag.self_closing && !VOID_ELEMENTS.contains(&lower.as_str()) {
                self.deleting = Some((lower, 1));
            }
            return;
        }
        if !tag.self_closing && lower == "style" {
            self.style_body = self.mode == Mode::Inspect || allowed;
        }
        if self.mode == Mode::Inspect {
            return;
        }
        if !allowed {
            self.report(offset, Finding::UnknownElement(lower));
            return;
        }
        if dropped {
            let rebuilt = rebuild_tag(self.src, &tag, &kept);
            self.walk.output.push_str(&rebuilt);
        } else {
            let text = &self.src[tag.span.clone()];
            self.walk.output.push_str(text);
        }
    }
}

/// Re-serialize a start tag with only the kept attributes, each copied as
/// written.
fn rebuild_tag(src: &str, tag: &StartTag<'_>, kept: &[&Attribute<'_>]) -> String {
    let mut out = String::with_capacity(tag.span.len());
    out.push('<');
    out.push_str(tag.name);
    for attr in kept {
        out.push(' ');
        out.push_str(&src[attr.span.clone()]);
    }
    if tag.self_closing {
        out.push_str(" /");
    }
    out.push('>');
    out
}
