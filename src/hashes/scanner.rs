//! Inline style extraction from rendered HTML.
//!
//! Finds `style="..."` attribute values and `<style>` element bodies in
//! snapshots of pages taken after the animation layer has run. The component
//! hint comes from a `data-component` (or `data-motion-component`) attribute on
//! the same element.

use regex::Regex;
use std::sync::LazyLock;

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<([a-zA-Z][a-zA-Z0-9-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#).unwrap());

static STYLE_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:^|\s)style\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

static COMPONENT_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|\s)data-(?:motion-)?component\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b([^>]*)>(.*?)</style\s*>").unwrap());

static CHAR_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(?:#([0-9]{1,8})|#[xX]([0-9a-fA-F]{1,6})|([a-zA-Z][a-zA-Z0-9]*));").unwrap());

/// Named references that show up in serialized style values.
const NAMED_REFS: &[(&str, &str)] = &[
    ("amp", "&"),
    ("lt", "<"),
    ("gt", ">"),
    ("quot", "\""),
    ("apos", "'"),
    ("nbsp", "\u{a0}"),
    ("semi", ";"),
    ("colon", ":"),
    ("comma", ","),
    ("period", "."),
    ("lpar", "("),
    ("rpar", ")"),
    ("num", "#"),
    ("percnt", "%"),
    ("excl", "!"),
    ("sol", "/"),
    ("bsol", "\\"),
    ("equals", "="),
    ("plus", "+"),
    ("ast", "*"),
    ("lbrace", "{"),
    ("rbrace", "}"),
    ("lsqb", "["),
    ("rsqb", "]"),
    ("Tab", "\t"),
    ("NewLine", "\n"),
];

/// Where an inline style came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleSource {
    Attribute,
    Element,
}

/// One inline style found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineStyle {
    pub content: String,
    pub component: Option<String>,
    pub source: StyleSource,
}

/// Extract every inline style from `html`, in document order per kind.
pub fn extract_inline_styles(html: &str) -> Vec<InlineStyle> {
    let mut styles = Vec::new();

    for tag in OPEN_TAG.captures_iter(html) {
        let attrs = tag.get(2).map_or("", |m| m.as_str());
        if let Some(content) = attr_value(&STYLE_ATTR, attrs) {
            styles.push(InlineStyle {
                content: decode_entities(&content),
                component: attr_value(&COMPONENT_ATTR, attrs),
                source: StyleSource::Attribute,
            });
        }
    }

    for block in STYLE_BLOCK.captures_iter(html) {
        let attrs = block.get(1).map_or("", |m| m.as_str());
        let content = block.get(2).map_or("", |m| m.as_str());
        if content.trim().is_empty() {
            continue;
        }
        // Element bodies are raw text; browsers hash them verbatim.
        styles.push(InlineStyle {
            content: content.to_string(),
            component: attr_value(&COMPONENT_ATTR, attrs),
            source: StyleSource::Element,
        });
    }

    styles
}

fn attr_value(pattern: &Regex, attrs: &str) -> Option<String> {
    pattern
        .captures(attrs)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
}

/// Decode the character references that commonly appear in attribute values.
fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    CHAR_REF
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let decoded = if let Some(dec) = caps.get(1) {
                dec.as_str().parse::<u32>().ok().map(code_point)
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16).ok().map(code_point)
            } else {
                caps.get(3).and_then(|name| {
                    NAMED_REFS
                        .iter()
                        .find(|(n, _)| *n == name.as_str())
                        .map(|(_, text)| text.to_string())
                })
            };
            // Unknown names stay literal, as browsers leave them.
            decoded.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Numeric references to NUL, surrogates or out-of-range values become U+FFFD.
fn code_point(value: u32) -> String {
    match value {
        0 => '\u{fffd}'.to_string(),
        v => char::from_u32(v).unwrap_or('\u{fffd}').to_string(),
    }
}
