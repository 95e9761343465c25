//! Minimal HTML tokenizer with byte spans.
//!
//! Not a full HTML5 tokenizer: it recognizes exactly the constructs the
//! sanitizer needs to make an allow/deny decision (tags, attributes, comments,
//! doctypes, processing instructions, CDATA and raw-text element bodies) and
//! reports anything it cannot delimit as a [`ParseError`]. Tag opening follows
//! the browser rule: `<` followed by an ASCII letter starts a tag, and the
//! name runs until whitespace, `/` or `>`. A `<` that starts nothing is text.
//!
//! Every token carries its byte span in the input so callers can copy
//! retained markup verbatim and rewrite attribute values in place.
//!
//! [`Tokenizer::xml`] drops the raw-text rule: XML has no raw-text elements,
//! so `<title><script/></title>` in an SVG image holds a real `<script>`.

use std::fmt;
use std::ops::Range;

/// Elements whose content is raw text up to the matching end tag.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "textarea", "title", "xmp", "iframe", "noembed", "noframes", "noscript",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.message, self.offset)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute<'a> {
    /// Attribute name as written.
    pub name: &'a str,
    /// Unquoted value, if the attribute has one.
    pub value: Option<&'a str>,
    /// Span of the whole attribute (`name="value"`).
    pub span: Range<usize>,
    /// Span of the value without its quotes.
    pub value_span: Option<Range<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag<'a> {
    /// Tag name as written.
    pub name: &'a str,
    pub attrs: Vec<Attribute<'a>>,
    pub self_closing: bool,
    pub span: Range<usize>,
}

impl StartTag<'_> {
    pub fn lower_name(&self) -> String {
        self.name.to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Text(Range<usize>),
    Start(StartTag<'a>),
    End { name: &'a str, span: Range<usize> },
    Comment(Range<usize>),
    Doctype(Range<usize>),
    ProcessingInstruction(Range<usize>),
    Cdata(Range<usize>),
}

impl Token<'_> {
    pub fn span(&self) -> Range<usize> {
        match self {
            Token::Text(s)
            | Token::Comment(s)
            | Token::Doctype(s)
            | Token::ProcessingInstruction(s)
            | Token::Cdata(s) => s.clone(),
            Token::Start(tag) => tag.span.clone(),
            Token::End { span, .. } => span.clone(),
        }
    }
}

/// Iterator over the tokens of an HTML fragment.
pub struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
    /// Set after a raw-text start tag: the next token is its body.
    raw_text: Option<String>,
    xml: bool,
    failed: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            raw_text: None,
            xml: false,
            failed: false,
        }
    }

    /// Tokenize with XML rules: every element body is markup.
    pub fn xml(src: &'a str) -> Self {
        Self {
            xml: true,
            ..Self::new(src)
        }
    }

    fn error(&mut self, offset: usize, message: impl Into<String>) -> ParseError {
        self.failed = true;
        ParseError {
            offset,
            message: message.into(),
        }
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn next_token(&mut self) -> Result<Token<'a>, ParseError> {
        if let Some(element) = self.raw_text.take() {
            return self.raw_text_body(&element);
        }
        let start = self.pos;
        let bytes = self.bytes();
        if bytes[start] != b'<' {
            let end = memchr_lt(bytes, start + 1);
            self.pos = end;
            return Ok(Token::Text(start..end));
        }
        let rest = &self.src[start..];
        if rest.starts_with("<!--") {
            return self.delimited(start, 4, "-->", "unterminated comment", Token::Comment);
        }
        if rest.starts_with("<![CDATA[") {
            return self.delimited(start, 9, "]]>", "unterminated CDATA section", Token::Cdata);
        }
        if rest.starts_with("<!") {
            let is_doctype = rest.len() >= 9 && rest[..9].eq_ignore_ascii_case("<!doctype");
            let ctor = if is_doctype {
                Token::Doctype
            } else {
                Token::Comment
            };
            return self.delimited(start, 2, ">", "unterminated declaration", ctor);
        }
        if rest.starts_with("<?") {
            return self.delimited(
                start,
                2,
                ">",
                "unterminated processing instruction",
                Token::ProcessingInstruction,
            );
        }
        match bytes.get(start + 1) {
            Some(b'/') if bytes.get(start + 2).is_some_and(u8::is_ascii_alphabetic) => {
                self.end_tag(start)
            }
            Some(c) if c.is_ascii_alphabetic() => self.start_tag(start),
            _ => {
                // A lone `<` is text.
                let end = memchr_lt(bytes, start + 1);
                self.pos = end;
                Ok(Token::Text(start..end))
            }
        }
    }

    fn delimited(
        &mut self,
        start: usize,
        open_len: usize,
        close: &str,
        message: &str,
        ctor: fn(Range<usize>) -> Token<'a>,
    ) -> Result<Token<'a>, ParseError> {
        match self.src[start + open_len..].find(close) {
            Some(idx) => {
                let end = start + open_len + idx + close.len();
                self.pos = end;
                Ok(ctor(start..end))
            }
            None => Err(self.error(start, message)),
        }
    }

    fn end_tag(&mut self, start: usize) -> Result<Token<'a>, ParseError> {
        let name_start = start + 2;
        let name_end = self.scan_name(name_start);
        match self.src[name_end..].find('>') {
            Some(idx) => {
                let end = name_end + idx + 1;
                self.pos = end;
                Ok(Token::End {
                    name: &self.src[name_start..name_end],
                    span: start..end,
                })
            }
            None => Err(self.error(start, "unterminated end tag")),
        }
    }

    fn scan_name(&self, from: usize) -> usize {
        let bytes = self.bytes();
        let mut i = from;
        while i < bytes.len() && !is_space(bytes[i]) && bytes[i] != b'/' && bytes[i] != b'>' {
            i += 1;
        }
        i
    }

    fn start_tag(&mut self, start: usize) -> Result<Token<'a>, ParseError> {
        let bytes = self.bytes();
        let name_start = start + 1;
        let name_end = self.scan_name(name_start);
        let name = &self.src[name_start..name_end];
        let mut attrs = Vec::new();
        let mut i = name_end;
        let mut self_closing = false;

        loop {
            while i < bytes.len() && is_space(bytes[i]) {
                i += 1;
            }
            let Some(&c) = bytes.get(i) else {
                return Err(self.error(start, format!("tag <{name}> never closed")));
            };
            match c {
                b'>' => {
                    i += 1;
                    break;
                }
                b'/' => {
                    if bytes.get(i + 1) == Some(&b'>') {
                        self_closing = true;
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                b'"' | b'\'' | b'<' | b'=' => {
                    return Err(self.error(i, format!("malformed attribute in <{name}>")));
                }
                _ => {
                    let attr = self.attribute(i, name)?;
                    i = attr.span.end;
                    attrs.push(attr);
                }
            }
        }

        self.pos = i;
        let lower = name.to_ascii_lowercase();
        if !self.xml && !self_closing && RAW_TEXT_ELEMENTS.contains(&lower.as_str()) {
            self.raw_text = Some(lower);
        }
        Ok(Token::Start(StartTag {
            name,
            attrs,
            self_closing,
            span: start..i,
        }))
    }

    fn attribute(&mut self, from: usize, tag: &str) -> Result<Attribute<'a>, ParseError> {
        let bytes = self.bytes();
        let mut i = from;
        while i < bytes.len()
            && !is_space(bytes[i])
            && !matches!(bytes[i], b'/' | b'>' | b'=' | b'"' | b'\'' | b'<')
        {
            i += 1;
        }
        let name = &self.src[from..i];
        if matches!(bytes.get(i), Some(b'"' | b'\'' | b'<')) {
            return Err(self.error(i, format!("malformed attribute name in <{tag}>")));
        }

        // Optional `= value`, whitespace allowed around `=`.
        let mut j = i;
        while j < bytes.len() && is_space(bytes[j]) {
            j += 1;
        }
        if bytes.get(j) != Some(&b'=') {
            return Ok(Attribute {
                name,
                value: None,
                span: from..i,
                value_span: None,
            });
        }
        j += 1;
        while j < bytes.len() && is_space(bytes[j]) {
            j += 1;
        }
        match bytes.get(j) {
            Some(&q @ (b'"' | b'\'')) => {
                let value_start = j + 1;
                let Some(len) = bytes[value_start..].iter().position(|&b| b == q) else {
                    return Err(self.error(j, format!("unterminated attribute value in <{tag}>")));
                };
                let value_end = value_start + len;
                Ok(Attribute {
                    name,
                    value: Some(&self.src[value_start..value_end]),
                    span: from..value_end + 1,
                    value_span: Some(value_start..value_end),
                })
            }
            Some(_) => {
                let value_start = j;
                let mut k = j;
                while k < bytes.len() && !is_space(bytes[k]) && bytes[k] != b'>' {
                    if matches!(bytes[k], b'"' | b'\'' | b'<' | b'=' | b'`') {
                        return Err(
                            self.error(k, format!("malformed unquoted value in <{tag}>"))
                        );
                    }
                    k += 1;
                }
                Ok(Attribute {
                    name,
                    value: Some(&self.src[value_start..k]),
                    span: from..k,
                    value_span: Some(value_start..k),
                })
            }
            None => Err(self.error(from, format!("tag <{tag}> never closed"))),
        }
    }

    /// Body of a raw-text element: everything up to `</name` followed by a
    /// delimiter. The end tag itself is left for the next call.
    fn raw_text_body(&mut self, element: &str) -> Result<Token<'a>, ParseError> {
        let start = self.pos;
        let bytes = self.bytes();
        let needle_len = element.len() + 2;
        let mut i = start;
        while i < bytes.len() {
            if bytes[i] == b'<'
                && bytes.get(i + 1) == Some(&b'/')
                && i + needle_len <= bytes.len()
                && self.src.is_char_boundary(i + needle_len)
                && self.src[i + 2..i + needle_len].eq_ignore_ascii_case(element)
                && bytes
                    .get(i + needle_len)
                    .is_none_or(|&b| is_space(b) || b == b'/' || b == b'>')
            {
                self.pos = i;
                return Ok(Token::Text(start..i));
            }
            i += 1;
        }
        Err(self.error(start, format!("<{element}> never closed")))
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<Token<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.pos >= self.src.len() {
            return match self.raw_text.take() {
                Some(element) => Some(Err(self.error(self.pos, format!("<{element}> never closed")))),
                None => None,
            };
        }
        Some(self.next_token())
    }
}

/// The raw-text element still open at the end of `src`, if any. A Markdown
/// inline tag such as `<title>` ends its segment before its body does.
pub fn open_raw_text(src: &str) -> Option<String> {
    let mut tokenizer = Tokenizer::new(src);
    while tokenizer.pos < src.len() {
        let pending = tokenizer.raw_text.clone();
        if tokenizer.next_token().is_err() {
            return pending;
        }
    }
    tokenizer.raw_text
}

/// Element or attribute name without its namespace prefix.
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c')
}

/// Position of the next `<` at or after `from`, or the end of input.
fn memchr_lt(bytes: &[u8], from: usize) -> usize {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|&b| b == b'<')
        .map(|p| from + p)
        .unwrap_or(bytes.len())
}

/// Convert a byte offset into a 1-based line number.
pub fn line_of(src: &str, offset: usize) -> usize {
    let end = offset.min(src.len());
    src.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}
