//! The content policy: allowlist, critical elements, scheme blocklist, and
//! the classification of every finding into WARN or CRITICAL.

use crate::config::PolicyConfig;
use crate::types::Severity;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Form controls promoted to critical elements in strict mode.
const STRICT_ELEMENTS: &[&str] = &["form", "input", "button", "textarea", "select", "option"];

/// Attributes whose values are URLs and are checked against the blocklist.
pub const URL_ATTRIBUTES: &[&str] = &[
    "href",
    "src",
    "action",
    "formaction",
    "poster",
    "background",
    "cite",
    "data",
    "xlink:href",
    "srcset",
];

/// SMIL attributes carrying the value an animation assigns.
pub const ANIMATION_VALUE_ATTRIBUTES: &[&str] = &["values", "from", "to", "by"];

/// Elements that never have children or an end tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Something the sanitizer noticed. The policy decides how severe it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    CriticalElement(String),
    UnknownElement(String),
    StrayEndTag(String),
    EventHandler { tag: String, attr: String },
    BlockedScheme { attr: String, scheme: String },
    DisallowedAttribute { tag: String, attr: String },
    Comment,
    ProcessingInstruction,
    Cdata,
    DangerousCss(String),
    ExternalImport(String),
    ScriptFile,
    Parse(String),
    UnstableOutput,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::CriticalElement(tag) => write!(f, "critical element <{tag}>"),
            Finding::UnknownElement(tag) => write!(f, "unwrapped element <{tag}>"),
            Finding::StrayEndTag(tag) => write!(f, "stripped end tag </{tag}>"),
            Finding::EventHandler { tag, attr } => {
                write!(f, "event handler {attr} on <{tag}>")
            }
            Finding::BlockedScheme { attr, scheme } => {
                write!(f, "blocked scheme {scheme} in {attr}")
            }
            Finding::DisallowedAttribute { tag, attr } => {
                write!(f, "dropped attribute {attr} on <{tag}>")
            }
            Finding::Comment => f.write_str("stripped comment"),
            Finding::ProcessingInstruction => f.write_str("stripped processing instruction"),
            Finding::Cdata => f.write_str("stripped CDATA section"),
            Finding::DangerousCss(pattern) => write!(f, "dangerous CSS {pattern}"),
            Finding::ExternalImport(url) => write!(f, "external @import {url}"),
            Finding::ScriptFile => f.write_str("script file"),
            Finding::Parse(message) => write!(f, "parse error: {message}"),
            Finding::UnstableOutput => f.write_str("sanitized output is not stable"),
        }
    }
}

/// Compiled form of [`PolicyConfig`] used by the sanitizer.
#[derive(Debug, Clone)]
pub struct ContentPolicy {
    tag_allowlist: HashMap<String, HashSet<String>>,
    global_attributes: HashSet<String>,
    scheme_blocklist: Vec<String>,
    critical_elements: HashSet<String>,
    forbid_scripts: bool,
}

impl ContentPolicy {
    pub fn from_config(config: &PolicyConfig) -> Self {
        let mut tag_allowlist = HashMap::new();
        let mut global_attributes = HashSet::new();
        for (tag, attrs) in &config.allowed_tags {
            let attrs: HashSet<String> = attrs.iter().map(|a| a.to_ascii_lowercase()).collect();
            if tag == "*" {
                global_attributes = attrs;
            } else {
                tag_allowlist.insert(tag.to_ascii_lowercase(), attrs);
            }
        }
        let mut critical_elements: HashSet<String> = config
            .critical_elements
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();
        if config.strict {
            critical_elements.extend(STRICT_ELEMENTS.iter().map(|t| t.to_string()));
        }
        Self {
            tag_allowlist,
            global_attributes,
            scheme_blocklist: config
                .scheme_blocklist
                .iter()
                .map(|s| normalize_url(s))
                .collect(),
            critical_elements,
            forbid_scripts: config.forbid_scripts,
        }
    }

    pub fn is_critical(&self, tag: &str) -> bool {
        self.critical_elements.contains(tag)
    }

    pub fn is_allowed(&self, tag: &str) -> bool {
        self.tag_allowlist.contains_key(tag)
    }

    pub fn attr_allowed(&self, tag: &str, attr: &str) -> bool {
        self.global_attributes.contains(attr)
            || self
                .tag_allowlist
                .get(tag)
                .is_some_and(|attrs| attrs.contains(attr))
    }

    pub fn forbids_scripts(&self) -> bool {
        self.forbid_scripts
    }

    /// Returns the blocklist entry matched by a URL value, if any.
    ///
    /// The value is normalized first (entities decoded, ASCII whitespace and
    /// control characters removed, lowercased) so that `jav&#x61;script:` and
    /// `java\tscript:` are caught.
    pub fn blocked_scheme(&self, value: &str) -> Option<&str> {
        let normalized = normalize_url(value);
        self.scheme_blocklist
            .iter()
            .find(|blocked| normalized.starts_with(blocked.as_str()))
            .map(|s| s.as_str())
    }

    /// Check every candidate of a `srcset` value.
    pub fn blocked_in_srcset(&self, value: &str) -> Option<&str> {
        value
            .split(',')
            .filter_map(|candidate| candidate.split_whitespace().next())
            .find_map(|url| self.blocked_scheme(url))
    }

    /// Check every `;`-separated entry of a SMIL `values` list.
    pub fn blocked_in_values(&self, value: &str) -> Option<&str> {
        decode_entities(value)
            .split(';')
            .find_map(|v| self.blocked_scheme(v))
    }

    /// Severity classification of a finding.
    pub fn classify(&self, finding: &Finding) -> Severity {
        match finding {
            Finding::CriticalElement(_)
            | Finding::EventHandler { .. }
            | Finding::BlockedScheme { .. }
            | Finding::DangerousCss(_)
            | Finding::ScriptFile
            | Finding::Parse(_)
            | Finding::UnstableOutput => Severity::Critical,
            Finding::UnknownElement(_)
            | Finding::StrayEndTag(_)
            | Finding::DisallowedAttribute { .. }
            | Finding::Comment
            | Finding::ProcessingInstruction
            | Finding::Cdata
            | Finding::ExternalImport(_) => Severity::Warn,
        }
    }
}

/// Canonical form of a URL value for scheme comparison.
pub fn normalize_url(value: &str) -> String {
    decode_entities(value)
        .chars()
        .filter(|c| !(c.is_ascii_whitespace() || c.is_ascii_control()))
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Decode numeric character references and the handful of named entities
/// that matter for scheme obfuscation. Unknown entities are left as written.
pub fn decode_entities(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        match decode_one(rest) {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode a single reference at the start of `s` (which begins with `&`).
/// Returns the character and the number of bytes consumed. The trailing `;`
/// is optional, as browsers accept it missing for numeric references.
fn decode_one(s: &str) -> Option<(char, usize)> {
    let body = &s[1..];
    if let Some(num) = body.strip_prefix('#') {
        let (digits, radix, prefix) = match num.strip_prefix(['x', 'X']) {
            Some(hex) => (hex, 16, 2),
            None => (num, 10, 1),
        };
        let len = digits
            .bytes()
            .take_while(|b| match radix {
                16 => b.is_ascii_hexdigit(),
                _ => b.is_ascii_digit(),
            })
            .count();
        if len == 0 {
            return None;
        }
        let ch = u32::from_str_radix(&digits[..len], radix)
            .ok()
            .and_then(char::from_u32)
            .unwrap_or('\u{fffd}');
        let mut consumed = 1 + prefix + len;
        if digits[len..].starts_with(';') {
            consumed += 1;
        }
        return Some((ch, consumed));
    }
    const NAMED: &[(&str, char)] = &[
        ("colon;", ':'),
        ("Tab;", '\t'),
        ("NewLine;", '\n'),
        ("amp;", '&'),
        ("lt;", '<'),
        ("gt;", '>'),
        ("quot;", '"'),
        ("apos;", '\''),
        ("sol;", '/'),
        ("lpar;", '('),
        ("rpar;", ')'),
    ];
    NAMED
        .iter()
        .find(|(name, _)| body.starts_with(name))
        .map(|(name, ch)| (*ch, 1 + name.len()))
}
