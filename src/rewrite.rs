//! Stage 4: reference rewriting.
//!
//! Runs once the [`RenameTable`] is complete. Internal references in HTML
//! (`href`, `src`, `style` attributes and `<style>` bodies), Markdown (link
//! and image destinations, raw HTML) and CSS (`url(...)`, `@import "..."`)
//! are resolved the way a static file server would resolve them, looked up
//! in the table, and replaced with the published path.
//!
//! ## Resolution
//!
//! | Reference | Resolved against |
//! |-----------|------------------|
//! | `/img/a.png` | output root |
//! | `a.png`, `../a.png` | the referencing file's source directory |
//! | `docs/` | `docs/index.html` |
//! | `https:`, `mailto:`, any scheme, `//host`, `#frag` | not rewritten |
//!
//! Query strings and fragments are carried over unchanged. A relative
//! reference is re-expressed relative to the referencing file's *published*
//! location, since stylesheets move into the assets directory. References
//! that resolve to nothing in the table are left as written and reported as
//! [`MissingReference`].

use crate::fingerprint::RenameTable;
use crate::sanitize::html::Segment;
use crate::sanitize::markdown;
use crate::sanitize::policy::decode_entities;
use crate::sanitize::tokenizer::{Token, Tokenizer};
use crate::types::{MediaType, MissingReference};
use std::ops::Range;

/// A file after rewriting.
#[derive(Debug, Clone)]
pub struct RewrittenFile {
    pub content: Vec<u8>,
    pub missing: Vec<MissingReference>,
}

/// Rewrite the references in one sanitized file.
///
/// `path` is the file's original source path; its published path is looked
/// up in `table`. Files without text references are returned unchanged.
pub fn rewrite(
    path: &str,
    media_type: MediaType,
    content: &[u8],
    table: &RenameTable,
) -> RewrittenFile {
    let unchanged = || RewrittenFile {
        content: content.to_vec(),
        missing: Vec::new(),
    };
    if !matches!(
        media_type,
        MediaType::Html | MediaType::Markdown | MediaType::Css
    ) {
        return unchanged();
    }
    let Ok(src) = std::str::from_utf8(content) else {
        return unchanged();
    };

    let resolver = Resolver {
        source: path,
        source_dir: parent(path),
        published_dir: parent(table.get(path).unwrap_or(path)),
        table,
    };
    let mut edits = Edits::default();
    match media_type {
        MediaType::Html => html_references(src, 0..src.len(), &resolver, &mut edits),
        MediaType::Markdown => markdown_references(src, &resolver, &mut edits),
        _ => css_references(src, 0, &resolver, &mut edits),
    }
    let missing = std::mem::take(&mut edits.missing);
    RewrittenFile {
        content: edits.apply(src).into_bytes(),
        missing,
    }
}

/// Replacements sorted by position, plus unresolved references.
#[derive(Default)]
struct Edits {
    replacements: Vec<(Range<usize>, String)>,
    missing: Vec<MissingReference>,
}

impl Edits {
    fn apply(mut self, src: &str) -> String {
        self.replacements.sort_by_key(|(range, _)| range.start);
        let mut out = String::with_capacity(src.len());
        let mut pos = 0;
        for (range, text) in self.replacements {
            if range.start < pos {
                continue;
            }
            out.push_str(&src[pos..range.start]);
            out.push_str(&text);
            pos = range.end;
        }
        out.push_str(&src[pos..]);
        out
    }
}

struct Resolver<'a> {
    source: &'a str,
    source_dir: &'a str,
    published_dir: &'a str,
    table: &'a RenameTable,
}

impl Resolver<'_> {
    /// Handle one reference whose raw text sits at `span` in the document.
    /// `value` is the reference as the browser will read it.
    fn reference(&self, span: Range<usize>, raw: &str, value: &str, edits: &mut Edits) {
        if is_external(value) {
            return;
        }
        let cut = value.find(['?', '#']).unwrap_or(value.len());
        let (path_part, suffix) = value.split_at(cut);
        let Some(decoded) = percent_decode(path_part) else {
            return;
        };
        let absolute = decoded.starts_with('/');
        let resolved = if absolute {
            normalize("", &decoded)
        } else {
            normalize(self.source_dir, &decoded)
        };

        let Some((resolved, target)) = self.lookup(resolved) else {
            edits.missing.push(MissingReference {
                file: self.source.to_string(),
                reference: value.to_string(),
            });
            return;
        };
        if resolved == target && self.source_dir == self.published_dir {
            return;
        }

        let new_path = if absolute {
            format!("/{}", encode_path(target))
        } else {
            encode_path(&relative(self.published_dir, target))
        };
        // Keep the suffix exactly as written in the source.
        let raw_suffix = raw.find(['?', '#']).map_or("", |i| &raw[i..]);
        let suffix = if raw_suffix.is_empty() { suffix } else { raw_suffix };
        edits.replacements.push((span, format!("{new_path}{suffix}")));
    }

    /// Look up a resolved path, falling back to `{path}/index.html`.
    fn lookup(&self, resolved: String) -> Option<(String, &str)> {
        if resolved.is_empty() || resolved.ends_with('/') {
            let index = format!("{resolved}index.html");
            let target = self.table.get(&index)?;
            return Some((index, target));
        }
        if let Some(target) = self.table.get(&resolved) {
            return Some((resolved, target));
        }
        let index = format!("{resolved}/index.html");
        let target = self.table.get(&index)?;
        Some((index, target))
    }
}

// ============================================================================
// HTML
// ============================================================================

fn html_references(src: &str, range: Range<usize>, resolver: &Resolver, edits: &mut Edits) {
    let base = range.start;
    let fragment = &src[range];
    let mut style_body = false;
    for token in Tokenizer::new(fragment) {
        // Sanitized input always tokenizes; stop quietly if it does not.
        let Ok(token) = token else { break };
        match token {
            Token::Start(tag) => {
                style_body = !tag.self_closing && tag.name.eq_ignore_ascii_case("style");
                for attr in &tag.attrs {
                    let (Some(value), Some(span)) = (attr.value, attr.value_span.clone()) else {
                        continue;
                    };
                    let name = attr.name.to_ascii_lowercase();
                    if name == "href" || name == "src" {
                        let span = base + span.start..base + span.end;
                        resolver.reference(span, value, &decode_entities(value), edits);
                    } else if name == "style" {
                        css_references(value, base + span.start, resolver, edits);
                    }
                }
            }
            Token::Text(span) if style_body => {
                style_body = false;
                css_references(&fragment[span.clone()], base + span.start, resolver, edits);
            }
            _ => style_body = false,
        }
    }
}

// ============================================================================
// Markdown
// ============================================================================

fn markdown_references(src: &str, resolver: &Resolver, edits: &mut Edits) {
    let scan = markdown::scan(src);
    for link in &scan.links {
        match &link.span {
            Some(span) => resolver.reference(span.clone(), &src[span.clone()], &link.dest, edits),
            None if !is_external(&link.dest) => edits.missing.push(MissingReference {
                file: resolver.source.to_string(),
                reference: link.dest.clone(),
            }),
            None => {}
        }
    }
    for segment in &scan.segments {
        if let Segment::Markup(range) = segment {
            html_references(src, range.clone(), resolver, edits);
        }
    }
}

// ============================================================================
// CSS
// ============================================================================

/// Find `url(...)` and `@import "..."` references in a stylesheet fragment
/// starting at document offset `base`.
fn css_references(css: &str, base: usize, resolver: &Resolver, edits: &mut Edits) {
    let bytes = css.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if css[i..].starts_with("/*") {
            i = css[i + 2..].find("*/").map_or(bytes.len(), |p| i + 2 + p + 2);
            continue;
        }
        if starts_with_ignore_case(&css[i..], "url(") {
            let (span, next) = url_argument(css, i + 4);
            if let Some(span) = span {
                let value = &css[span.clone()];
                resolver.reference(base + span.start..base + span.end, value, value, edits);
            }
            i = next;
            continue;
        }
        if starts_with_ignore_case(&css[i..], "@import") {
            let mut j = i + "@import".len();
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if let Some(&quote @ (b'"' | b'\'')) = bytes.get(j)
                && let Some(len) = css[j + 1..].find(quote as char)
            {
                let span = j + 1..j + 1 + len;
                let value = &css[span.clone()];
                resolver.reference(base + span.start..base + span.end, value, value, edits);
                i = span.end + 1;
                continue;
            }
            i = j;
            continue;
        }
        i += css[i..].chars().next().map_or(1, char::len_utf8);
    }
}

/// Span of the value inside `url(` starting at `start`, quotes excluded, and
/// the position after the closing parenthesis.
fn url_argument(css: &str, start: usize) -> (Option<Range<usize>>, usize) {
    let bytes = css.as_bytes();
    let mut i = start;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let (value_start, terminator) = match bytes.get(i) {
        Some(&q @ (b'"' | b'\'')) => (i + 1, q),
        _ => (i, b')'),
    };
    let Some(len) = bytes[value_start..].iter().position(|&b| b == terminator) else {
        return (None, bytes.len());
    };
    let mut value_end = value_start + len;
    let close = css[value_end..].find(')').map_or(bytes.len(), |p| value_end + p + 1);
    if terminator == b')' {
        while value_end > value_start && bytes[value_end - 1].is_ascii_whitespace() {
            value_end -= 1;
        }
    }
    if value_end == value_start || css[value_start..value_end].contains('\\') {
        return (None, close);
    }
    (Some(value_start..value_end), close)
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}

// ============================================================================
// Path helpers
// ============================================================================

/// Any scheme, protocol-relative URL, fragment-only or empty reference.
pub fn is_external(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() || value.starts_with('#') || value.starts_with("//") {
        return true;
    }
    if value.starts_with('?') {
        return true;
    }
    match value.find(':') {
        Some(colon) => {
            let scheme = &value[..colon];
            !scheme.is_empty()
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Directory part of a `/`-separated path (empty at the root).
fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Join `reference` onto `dir` and collapse `.` and `..`. A trailing `/` is
/// kept. `..` at the root stays at the root, as it does for a browser.
fn normalize(dir: &str, reference: &str) -> String {
    let mut parts: Vec<&str> = if reference.starts_with('/') {
        Vec::new()
    } else {
        dir.split('/').filter(|p| !p.is_empty()).collect()
    };
    for part in reference.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    let mut joined = parts.join("/");
    let trailing = reference.ends_with('/') || reference.ends_with("/.") || reference.ends_with("/..");
    if trailing && !joined.is_empty() {
        joined.push('/');
    }
    joined
}

/// Path of `target` relative to directory `from_dir`.
fn relative(from_dir: &str, target: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|p| !p.is_empty()).collect();
    let to: Vec<&str> = target.split('/').collect();
    let common = from
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count()
        .min(to.len().saturating_sub(1));
    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend(&to[common..]);
    parts.join("/")
}

/// Decode `%XX` escapes. `None` if the result is not UTF-8.
fn percent_decode(value: &str) -> Option<String> {
    if !value.contains('%') {
        return Some(value.to_string());
    }
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = value.get(i + 1..i + 3)
            && let Ok(b) = u8::from_str_radix(hex, 16)
        {
            out.push(b);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).ok()
}

/// Escape the characters that would end or break a URL in HTML, CSS or
/// Markdown.
fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            ' ' | '"' | '\'' | '#' | '%' | '?' | '<' | '>' | '(' | ')' | '`' | '\\' => {
                out.push_str(&format!("%{:02X}", c as u32));
            }
            c if c.is_ascii_control() => out.push_str(&format!("%{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{Asset, register};

    /// Table with `style.css`, `logo.png`, `img/a b.png` as assets and the
    /// given documents.
    fn table(documents: &[&str]) -> RenameTable {
        let mut assets = vec![
            Asset::new("style.css", b"body{}", 10, "assets"),
            Asset::new("logo.png", b"logo", 10, "assets"),
            Asset::new("img/a b.png", b"ab", 10, "assets"),
        ];
        for asset in &mut assets {
            // Predictable names for assertions.
            asset.fingerprinted_path = match asset.original_path.as_str() {
                "style.css" => "assets/style-ab12cd34ef.css".into(),
                "logo.png" => "assets/logo-deadbeef01.png".into(),
                _ => "assets/img/a b-0123456789.png".into(),
            };
        }
        let documents: Vec<String> = documents.iter().map(|d| d.to_string()).collect();
        register(&assets, &documents).unwrap()
    }

    fn rewrite_str(path: &str, src: &str, table: &RenameTable) -> (String, Vec<MissingReference>) {
        let out = rewrite(path, MediaType::from_path(path), src.as_bytes(), table);
        (String::from_utf8(out.content).unwrap(), out.missing)
    }

    // =========================================================================
    // HTML
    // =========================================================================

    #[test]
    fn absolute_reference_is_rewritten() {
        let t = table(&["index.html"]);
        let (out, missing) = rewrite_str(
            "index.html",
            "<link rel=\"stylesheet\" href=\"/style.css\">",
            &t,
        );
        assert_eq!(out, "<link rel=\"stylesheet\" href=\"/assets/style-ab12cd34ef.css\">");
        assert!(!out.contains("/style.css"));
        assert!(missing.is_empty());
    }

    #[test]
    fn relative_reference_from_subdirectory() {
        let t = table(&["blog/post.html"]);
        let (out, _) = rewrite_str("blog/post.html", "<img src=\"../logo.png\">", &t);
        assert_eq!(out, "<img src=\"../assets/logo-deadbeef01.png\">");
    }

    #[test]
    fn query_and_fragment_are_kept() {
        let t = table(&["index.html"]);
        let (out, _) = rewrite_str("index.html", "<a href=\"logo.png?v=1#top\">x</a>", &t);
        assert_eq!(out, "<a href=\"assets/logo-deadbeef01.png?v=1#top\">x</a>");
    }

    #[test]
    fn external_references_are_untouched() {
        let t = table(&["index.html"]);
        let src = "<a href=\"http://example.com/x.css\">a</a><a href=\"#top\">b</a>\
                   <a href=\"mailto:a@b.c\">c</a><img src=\"data:image/png;base64,AA\">\
                   <a href=\"//cdn.example.com/style.css\">d</a><a href=\"tel:+1\">e</a>";
        let (out, missing) = rewrite_str("index.html", src, &t);
        assert_eq!(out, src);
        assert!(missing.is_empty());
    }

    #[test]
    fn unknown_reference_is_reported_and_kept() {
        let t = table(&["index.html"]);
        let (out, missing) = rewrite_str("index.html", "<img src=\"nope.png\">", &t);
        assert_eq!(out, "<img src=\"nope.png\">");
        assert_eq!(
            missing,
            vec![MissingReference {
                file: "index.html".into(),
                reference: "nope.png".into()
            }]
        );
    }

    #[test]
    fn document_links_stay_as_written() {
        let t = table(&["index.html", "docs/index.html", "about.html"]);
        let src = "<a href=\"./about.html\">a</a><a href=\"docs/\">d</a><a href=\"/\">h</a>";
        let (out, missing) = rewrite_str("index.html", src, &t);
        assert_eq!(out, src);
        assert!(missing.is_empty());
    }

    #[test]
    fn percent_encoded_reference_resolves() {
        let t = table(&["index.html"]);
        let (out, _) = rewrite_str("index.html", "<img src=\"img/a%20b.png\">", &t);
        assert_eq!(out, "<img src=\"assets/img/a%20b-0123456789.png\">");
    }

    #[test]
    fn climbing_above_root_stays_at_root() {
        let t = table(&["index.html"]);
        let src = "<img src=\"../logo.png\"><img src=\"/../logo.png\">";
        let (out, missing) = rewrite_str("index.html", src, &t);
        assert!(missing.is_empty());
        assert_eq!(
            out,
            "<img src=\"assets/logo-deadbeef01.png\"><img src=\"/assets/logo-deadbeef01.png\">"
        );
    }

    #[test]
    fn style_attribute_and_element_urls() {
        let t = table(&["index.html"]);
        let src = "<p style=\"background:url(logo.png)\"></p><style>a{background:url('/logo.png')}</style>";
        let (out, _) = rewrite_str("index.html", src, &t);
        assert_eq!(
            out,
            "<p style=\"background:url(assets/logo-deadbeef01.png)\"></p>\
             <style>a{background:url('/assets/logo-deadbeef01.png')}</style>"
        );
    }

    // =========================================================================
    // CSS
    // =========================================================================

    #[test]
    fn css_url_relative_to_published_stylesheet() {
        let t = table(&[]);
        let (out, _) = rewrite_str("style.css", "body{background:url(logo.png)}", &t);
        assert_eq!(out, "body{background:url(logo-deadbeef01.png)}");
    }

    #[test]
    fn css_quoted_urls_and_import() {
        let t = table(&[]);
        let src = "@import \"style.css\";\na{background:url( \"logo.png\" )}\n/* url(logo.png) */";
        let (out, missing) = rewrite_str("style.css", src, &t);
        assert_eq!(
            out,
            "@import \"style-ab12cd34ef.css\";\na{background:url( \"logo-deadbeef01.png\" )}\n/* url(logo.png) */"
        );
        assert!(missing.is_empty());
    }

    #[test]
    fn css_external_and_data_urls_untouched() {
        let t = table(&[]);
        let src = "a{background:url(https://x.example/logo.png)}b{background:url(data:image/png;base64,AA)}";
        let (out, _) = rewrite_str("style.css", src, &t);
        assert_eq!(out, src);
    }

    // =========================================================================
    // Markdown
    // =========================================================================

    #[test]
    fn markdown_image_and_raw_html() {
        let t = table(&["post.md"]);
        let src = "![logo](logo.png \"Logo\")\n\n<img src=\"/logo.png\">\n\n`![x](logo.png)`\n";
        let (out, _) = rewrite_str("post.md", src, &t);
        assert_eq!(
            out,
            "![logo](assets/logo-deadbeef01.png \"Logo\")\n\n<img src=\"/assets/logo-deadbeef01.png\">\n\n`![x](logo.png)`\n"
        );
    }

    #[test]
    fn markdown_reference_definition() {
        let t = table(&["post.md"]);
        let (out, _) = rewrite_str("post.md", "![l][x]\n\n[x]: ./logo.png\n", &t);
        assert_eq!(out, "![l][x]\n\n[x]: assets/logo-deadbeef01.png\n");
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[test]
    fn external_detection() {
        assert!(is_external("https://a"));
        assert!(is_external("HTTP://a"));
        assert!(is_external("javascript:x"));
        assert!(is_external("#x"));
        assert!(is_external("//cdn/x"));
        assert!(!is_external("a/b:c.png"));
        assert!(!is_external("/x.css"));
        assert!(!is_external("x.css"));
    }

    #[test]
    fn normalize_paths() {
        assert_eq!(normalize("a/b", "../c.png"), "a/c.png");
        assert_eq!(normalize("a", "./x/"), "a/x/");
        assert_eq!(normalize("a", "/x.png"), "x.png");
        assert_eq!(normalize("", "../x.png"), "x.png");
        assert_eq!(normalize("a", "../../../b/c.png"), "b/c.png");
        assert_eq!(normalize("", ".."), "");
    }

    #[test]
    fn relative_paths() {
        assert_eq!(relative("", "assets/a.png"), "assets/a.png");
        assert_eq!(relative("assets", "assets/a.png"), "a.png");
        assert_eq!(relative("assets/css", "assets/img/a.png"), "../img/a.png");
        assert_eq!(relative("blog", "index.html"), "../index.html");
    }
}
