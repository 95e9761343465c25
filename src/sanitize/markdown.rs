//! Markdown structure as seen by the sanitizer and the rewriter.
//!
//! Markdown is not rendered. `pulldown-cmark` is used only to find, with
//! byte offsets, the two things that matter for injection:
//!
//! - raw HTML (block and inline), which is walked like an HTML document;
//! - link and image destinations, which are checked against the scheme
//!   blocklist and later rewritten.
//!
//! Everything else is literal: code blocks and code spans never produce HTML
//! events, so `` `<script>` `` inside backticks is copied through untouched.

use super::html::Segment;
use super::tokenizer::open_raw_text;
use pulldown_cmark::{Event, LinkType, Options, Parser, Tag};
use std::ops::Range;

/// A link or image destination found in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDest {
    /// Start of the construct that carries the destination.
    pub offset: usize,
    /// Destination as the renderer will see it (escapes resolved).
    pub dest: String,
    /// Source span of the destination text, when it is written literally
    /// and can be replaced in place.
    pub span: Option<Range<usize>>,
}

#[derive(Debug, Default)]
pub struct MarkdownScan {
    /// Literal and markup regions covering the whole document, in order.
    pub segments: Vec<Segment>,
    pub links: Vec<LinkDest>,
}

fn options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH
}

pub fn scan(src: &str) -> MarkdownScan {
    let parser = Parser::new_ext(src, options());
    let mut links = Vec::new();

    for (_, def) in parser.reference_definitions().iter() {
        let span = locate(src, def.span.clone(), "]:", &def.dest);
        links.push(LinkDest {
            offset: def.span.start,
            dest: def.dest.to_string(),
            span,
        });
    }

    let mut html: Vec<Range<usize>> = Vec::new();
    for (event, range) in parser.into_offset_iter() {
        match event {
            // Lines of one HTML block arrive as separate events, and an inline
            // raw-text element (`<title>x</title>`) arrives as two tags with
            // its body in between.
            Event::Html(_) | Event::InlineHtml(_) => match html.last_mut() {
                Some(last)
                    if is_line_break(&src[last.end..range.start])
                        || open_raw_text(&src[last.clone()]).is_some() =>
                {
                    last.end = range.end
                }
                _ => html.push(range),
            },
            Event::Start(Tag::Link {
                link_type,
                dest_url,
                ..
            })
            | Event::Start(Tag::Image {
                link_type,
                dest_url,
                ..
            }) => {
                let span = match link_type {
                    LinkType::Inline => locate(src, range.clone(), "](", &dest_url),
                    LinkType::Autolink | LinkType::Email => {
                        Some(range.start + 1..range.end.saturating_sub(1))
                            .filter(|s| src.get(s.clone()) == Some(&*dest_url))
                    }
                    // Reference links resolve through a definition, which is
                    // reported on its own.
                    _ => continue,
                };
                links.push(LinkDest {
                    offset: range.start,
                    dest: dest_url.to_string(),
                    span,
                });
            }
            _ => {}
        }
    }
    links.sort_by_key(|l| l.offset);

    let mut segments = Vec::with_capacity(html.len() * 2 + 1);
    let mut pos = 0;
    for range in html {
        if range.start > pos {
            segments.push(Segment::Literal(pos..range.start));
        }
        pos = range.end;
        segments.push(Segment::Markup(range));
    }
    if pos < src.len() {
        segments.push(Segment::Literal(pos..src.len()));
    }
    MarkdownScan { segments, links }
}

fn is_line_break(gap: &str) -> bool {
    gap.bytes().all(|b| b == b'\n' || b == b'\r')
}

/// Find the literal destination text inside `range`, after the last
/// occurrence of `marker`. Returns `None` when the destination is written in
/// a form that differs from `dest` (escapes, entities).
fn locate(src: &str, range: Range<usize>, marker: &str, dest: &str) -> Option<Range<usize>> {
    if dest.is_empty() {
        return None;
    }
    let text = src.get(range.clone())?;
    let after = text.rfind(marker)? + marker.len();
    let rest = &text[after..];
    let lead = rest.len() - rest.trim_start().len();
    let rest = &rest[lead..];
    let (skip, raw) = match rest.strip_prefix('<') {
        Some(inner) => (1, &inner[..inner.find('>')?]),
        None => (0, &rest[..raw_dest_len(rest)]),
    };
    if raw != dest {
        return None;
    }
    let start = range.start + after + lead + skip;
    Some(start..start + raw.len())
}

/// Length of an unbracketed destination: up to whitespace or an unbalanced
/// closing parenthesis.
fn raw_dest_len(s: &str) -> usize {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            c if c.is_whitespace() => return i,
            '(' => depth += 1,
            ')' if depth == 0 => return i,
            ')' => depth -= 1,
            _ => {}
        }
    }
    s.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markup<'a>(src: &'a str, scan: &MarkdownScan) -> Vec<&'a str> {
        scan.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Markup(r) => Some(&src[r.clone()]),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    #[test]
    fn segments_cover_the_document() {
        let src = "# Title\n\nSome <em>inline</em> text.\n\n<div class=\"x\">\nblock\n</div>\n";
        let scan = scan(src);
        let mut pos = 0;
        for segment in &scan.segments {
            let (Segment::Markup(r) | Segment::Literal(r)) = segment;
            assert_eq!(r.start, pos);
            pos = r.end;
        }
        assert_eq!(pos, src.len());
        let found = markup(src, &scan);
        assert_eq!(found[0], "<em>");
        assert_eq!(found[1], "</em>");
        assert!(found[2].starts_with("<div class=\"x\">"));
    }

    #[test]
    fn inline_raw_text_element_is_one_segment() {
        let src = "Read <title>x</title> here and <noscript>a *b*</noscript>.";
        let scan = scan(src);
        assert_eq!(
            markup(src, &scan),
            vec!["<title>x</title>", "<noscript>a *b*</noscript>"]
        );
    }

    #[test]
    fn code_is_literal() {
        let src = "Use `<script>` here.\n\n```html\n<script>alert(1)</script>\n```\n";
        assert!(markup(src, &scan(src)).is_empty());
    }

    #[test]
    fn inline_image_destination_is_located() {
        let src = "![x](javascript:alert(1))";
        let scan = scan(src);
        assert_eq!(scan.links.len(), 1);
        assert_eq!(scan.links[0].dest, "javascript:alert(1)");
        let span = scan.links[0].span.clone().unwrap();
        assert_eq!(&src[span], "javascript:alert(1)");
    }

    #[test]
    fn link_with_title_and_brackets() {
        let src = "[a](<img/a b.png> \"T\") and [b](/c.css 'x')";
        let scan = scan(src);
        assert_eq!(scan.links.len(), 2);
        assert_eq!(&src[scan.links[0].span.clone().unwrap()], "img/a b.png");
        assert_eq!(&src[scan.links[1].span.clone().unwrap()], "/c.css");
    }

    #[test]
    fn nested_image_in_link() {
        let src = "[![logo](logo.png)](index.html)";
        let scan = scan(src);
        let dests: Vec<_> = scan.links.iter().map(|l| l.dest.as_str()).collect();
        assert_eq!(dests, vec!["index.html", "logo.png"]);
        for link in &scan.links {
            assert_eq!(&src[link.span.clone().unwrap()], link.dest);
        }
    }

    #[test]
    fn reference_definition_is_reported_once() {
        let src = "See [docs][d] and [again][d].\n\n[d]: guide/intro.md\n";
        let scan = scan(src);
        assert_eq!(scan.links.len(), 1);
        assert_eq!(&src[scan.links[0].span.clone().unwrap()], "guide/intro.md");
    }

    #[test]
    fn autolink_is_reported() {
        let src = "Go to <javascript:alert(1)> now";
        let scan = scan(src);
        assert_eq!(scan.links[0].dest, "javascript:alert(1)");
        assert!(markup(src, &scan).is_empty());
    }

    #[test]
    fn escaped_destination_has_no_span() {
        let src = "[a](x\\_y.png)";
        let scan = scan(src);
        assert_eq!(scan.links[0].dest, "x_y.png");
        assert!(scan.links[0].span.is_none());
    }
}
