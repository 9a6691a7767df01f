//! HTML → plain text normalization for inbound message bodies.
//!
//! Pure string processing, never fails. Malformed markup degrades to
//! best-effort text: a `<` or `>` that does not open or close a tag stays
//! as a literal character.

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").unwrap()
});

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static BLOCK_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:br|p|div|li|ul|ol|tr|table|h[1-6]|blockquote)\b[^<>]*>").unwrap()
});

/// A tag starts with `<` immediately followed by a letter, `/`, `!` or `?`.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[A-Za-z/!?][^<>]*>").unwrap());

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap()
});

/// Invisible formatting characters that can be used to split phrases.
const INVISIBLE_CHARS: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

/// Plain text produced by [`normalize`]. Contains no markup tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText(String);

impl NormalizedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<str> for NormalizedText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip markup from a raw message body.
///
/// Entities are decoded before tags are removed, so entity-encoded tags
/// (`&lt;b&gt;`) are stripped along with real ones.
pub fn normalize(raw: &str) -> NormalizedText {
    let visible: String = raw.chars().filter(|c| !INVISIBLE_CHARS.contains(c)).collect();
    let mut text = decode_entities(&visible);

    // Removing one tag can join its neighbours into a new one, so strip
    // until a pass changes nothing. Every removal shortens the text.
    loop {
        let stripped = strip_markup(&text);
        if stripped == text {
            break;
        }
        text = stripped;
    }

    NormalizedText(collapse_whitespace(&text))
}

/// One pass of script/style, comment and tag removal.
fn strip_markup(text: &str) -> String {
    let text = SCRIPT_STYLE_RE.replace_all(text, "");
    let text = COMMENT_RE.replace_all(&text, "");
    let text = BLOCK_TAG_RE.replace_all(&text, "\n");
    TAG_RE.replace_all(&text, "").into_owned()
}

/// Decode the common named entities plus decimal/hex character references.
/// Anything unrecognized is left as written.
fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(num) = body.strip_prefix('#') {
                let code = match num.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => num.parse::<u32>().ok(),
                };
                code.and_then(char::from_u32).map(String::from)
            } else {
                named_entity(body).map(String::from)
            };
            decoded.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "ndash" => "–",
        "mdash" => "—",
        "hellip" => "…",
        "rsquo" => "’",
        "lsquo" => "‘",
        "rdquo" => "”",
        "ldquo" => "“",
        "copy" => "©",
        _ => return None,
    })
}

/// Collapse space runs inside lines, keep at most one blank line between
/// paragraphs, trim the result.
fn collapse_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() && lines.last().is_some_and(|l| l.is_empty()) {
            continue;
        }
        lines.push(collapsed);
    }

    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}
