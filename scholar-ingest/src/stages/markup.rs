//! Minimal selector matching over directory listing markup
//!
//! Supported grammar: compound selectors made of an optional tag name (or
//! `*`) followed by any number of `.class`, `#id`, `[attr]`, `[attr=v]`,
//! `[attr^=v]`, `[attr*=v]` and `[attr$=v]` parts, joined by whitespace as
//! descendant combinators. Child/sibling combinators, selector lists and
//! pseudo-classes are rejected.
//!
//! Matching is lenient: elements without a closing tag end at the next
//! opening tag of the same name.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{IngestError, IngestResult};

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<(/?)([A-Za-z][A-Za-z0-9:-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#)
        .expect("tag regex")
});

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("attribute regex")
});

static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex"));
static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("script regex"));
static STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b.*?</style\s*>").expect("style regex"));

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals,
    Prefix,
    Contains,
    Suffix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrMatch {
    name: String,
    op: AttrOp,
    value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

/// A parsed selector: one or more compounds joined by descendant combinators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    parts: Vec<Compound>,
}

impl Selector {
    /// Parse a selector string, rejecting anything outside the supported grammar
    pub fn parse(selector: &str) -> IngestResult<Self> {
        let invalid = |reason: &str| IngestError::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = selector.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty selector"));
        }

        let mut parts = Vec::new();
        for token in split_outside_brackets(trimmed).map_err(|r| invalid(&r))? {
            parts.push(parse_compound(&token).map_err(|r| invalid(&r))?);
        }

        Ok(Self {
            source: trimmed.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Split on whitespace that is not inside `[...]`
fn split_outside_brackets(s: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in s.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') if depth > 0 => {
                quote = Some(c);
                current.push(c);
            }
            (None, '[') => {
                depth += 1;
                current.push(c);
            }
            (None, ']') => {
                if depth == 0 {
                    return Err("unbalanced ']'".to_string());
                }
                depth -= 1;
                current.push(c);
            }
            (None, c) if depth == 0 && c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            (None, '>') | (None, '+') | (None, '~') if depth == 0 => {
                return Err(format!("combinator '{}' is not supported", c));
            }
            (None, ',') if depth == 0 => {
                return Err("selector lists are not supported".to_string());
            }
            (None, ':') if depth == 0 => {
                return Err("pseudo-classes are not supported".to_string());
            }
            (None, c) => current.push(c),
        }
    }

    if depth > 0 || quote.is_some() {
        return Err("unterminated attribute selector".to_string());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && is_ident_char(chars[*pos]) {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

fn parse_compound(token: &str) -> Result<Compound, String> {
    let chars: Vec<char> = token.chars().collect();
    let mut pos = 0;
    let mut compound = Compound::default();

    if chars.first() == Some(&'*') {
        pos = 1;
    } else if chars.first().is_some_and(|c| c.is_ascii_alphabetic()) {
        compound.tag = Some(read_ident(&chars, &mut pos).to_lowercase());
    }

    while pos < chars.len() {
        match chars[pos] {
            '.' => {
                pos += 1;
                let class = read_ident(&chars, &mut pos);
                if class.is_empty() {
                    return Err("empty class name".to_string());
                }
                compound.classes.push(class);
            }
            '#' => {
                pos += 1;
                let id = read_ident(&chars, &mut pos);
                if id.is_empty() {
                    return Err("empty id".to_string());
                }
                compound.id = Some(id);
            }
            '[' => {
                let close = closing_bracket(&chars, pos)
                    .ok_or_else(|| "unterminated attribute selector".to_string())?;
                let body: String = chars[pos + 1..close].iter().collect();
                compound.attrs.push(parse_attr_match(&body)?);
                pos = close + 1;
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    if compound == Compound::default() && token != "*" {
        return Err("selector matches nothing".to_string());
    }
    Ok(compound)
}

/// Index of the `]` closing the `[` at `open`, skipping quoted values
fn closing_bracket(chars: &[char], open: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, &c) in chars.iter().enumerate().skip(open + 1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == ']' => return Some(i),
            None => {}
        }
    }
    None
}

fn parse_attr_match(body: &str) -> Result<AttrMatch, String> {
    let (name, op, raw_value) = if let Some((name, value)) = body.split_once("^=") {
        (name, AttrOp::Prefix, value)
    } else if let Some((name, value)) = body.split_once("*=") {
        (name, AttrOp::Contains, value)
    } else if let Some((name, value)) = body.split_once("$=") {
        (name, AttrOp::Suffix, value)
    } else if let Some((name, value)) = body.split_once('=') {
        (name, AttrOp::Equals, value)
    } else {
        (body, AttrOp::Exists, "")
    };

    let name = name.trim();
    if name.is_empty() || !name.chars().all(is_ident_char) {
        return Err(format!("invalid attribute name '{}'", name));
    }

    let value = raw_value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Ok(AttrMatch {
        name: name.to_lowercase(),
        op,
        value: value.to_string(),
    })
}

impl Compound {
    fn matches(&self, name: &str, attrs: &[(String, String)]) -> bool {
        let attr = |key: &str| attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

        if let Some(tag) = &self.tag {
            if tag != name {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class_attr = attr("class").unwrap_or("");
            let present: Vec<&str> = class_attr.split_whitespace().collect();
            if !self.classes.iter().all(|c| present.contains(&c.as_str())) {
                return false;
            }
        }
        self.attrs.iter().all(|m| match attr(&m.name) {
            None => false,
            Some(value) => match m.op {
                AttrOp::Exists => true,
                AttrOp::Equals => value == m.value,
                AttrOp::Prefix => value.starts_with(&m.value),
                AttrOp::Contains => value.contains(&m.value),
                AttrOp::Suffix => value.ends_with(&m.value),
            },
        })
    }
}

#[derive(Debug)]
struct Tag<'a> {
    closing: bool,
    self_closing: bool,
    name: String,
    attrs_raw: &'a str,
    start: usize,
    end: usize,
}

fn scan_tags(markup: &str) -> Vec<Tag<'_>> {
    TAG_RE
        .captures_iter(markup)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let attrs_raw = caps.get(3).map_or("", |m| m.as_str());
            Some(Tag {
                closing: !caps.get(1).map_or("", |m| m.as_str()).is_empty(),
                self_closing: attrs_raw.trim_end().ends_with('/'),
                name: caps.get(2)?.as_str().to_lowercase(),
                attrs_raw,
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

fn parse_attrs(raw: &str) -> Vec<(String, String)> {
    ATTR_RE
        .captures_iter(raw)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or(String::new(), |m| decode_entities(m.as_str()));
            Some((name, value))
        })
        .collect()
}

/// A matched element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element<'a> {
    pub name: String,
    attrs: Vec<(String, String)>,
    /// Markup between the opening and closing tags
    pub inner: &'a str,
}

impl<'a> Element<'a> {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Visible text with tags stripped, entities decoded and whitespace collapsed
    pub fn text(&self) -> String {
        text_content(self.inner)
    }
}

/// Remove comments, scripts and style blocks
pub fn clean(markup: &str) -> String {
    let without_comments = COMMENT_RE.replace_all(markup, " ");
    let without_scripts = SCRIPT_RE.replace_all(&without_comments, " ");
    STYLE_RE.replace_all(&without_scripts, " ").into_owned()
}

/// All non-overlapping matches of `selector`, in document order
pub fn select<'a>(markup: &'a str, selector: &Selector) -> Vec<Element<'a>> {
    let Some((first, rest)) = selector.parts.split_first() else {
        return Vec::new();
    };

    let mut current = select_compound(markup, first);
    for part in rest {
        current = current
            .iter()
            .flat_map(|el| select_compound(el.inner, part))
            .collect();
    }
    current
}

/// First match of `selector`
pub fn select_first<'a>(markup: &'a str, selector: &Selector) -> Option<Element<'a>> {
    select(markup, selector).into_iter().next()
}

fn select_compound<'a>(markup: &'a str, compound: &Compound) -> Vec<Element<'a>> {
    let tags = scan_tags(markup);
    let mut found = Vec::new();
    let mut i = 0;

    while i < tags.len() {
        let tag = &tags[i];
        if tag.closing {
            i += 1;
            continue;
        }

        let attrs = parse_attrs(tag.attrs_raw);
        if !compound.matches(&tag.name, &attrs) {
            i += 1;
            continue;
        }

        let (inner_end, next) = if tag.self_closing || VOID_ELEMENTS.contains(&tag.name.as_str()) {
            (tag.end, i + 1)
        } else {
            match find_close(&tags, i) {
                Some(close) => (tags[close].start, close + 1),
                None => {
                    let sibling = tags[i + 1..]
                        .iter()
                        .position(|t| !t.closing && t.name == tag.name)
                        .map(|offset| i + 1 + offset);
                    match sibling {
                        Some(j) => (tags[j].start, j),
                        None => (markup.len(), tags.len()),
                    }
                }
            }
        };

        found.push(Element {
            name: tag.name.clone(),
            attrs,
            inner: &markup[tag.end..inner_end],
        });
        i = next;
    }

    found
}

fn find_close(tags: &[Tag<'_>], open: usize) -> Option<usize> {
    let name = &tags[open].name;
    let mut depth = 1usize;
    for (j, tag) in tags.iter().enumerate().skip(open + 1) {
        if &tag.name != name {
            continue;
        }
        if tag.closing {
            depth -= 1;
            if depth == 0 {
                return Some(j);
            }
        } else if !tag.self_closing {
            depth += 1;
        }
    }
    None
}

/// Strip tags, decode entities, collapse whitespace
pub fn text_content(markup: &str) -> String {
    let stripped = TAG_RE.replace_all(markup, " ");
    crate::utils::text::collapse_whitespace(&decode_entities(&stripped))
}

/// Every `a[href]` target resolved against `base_url` (http/https only)
pub fn links(markup: &str, base_url: &str) -> Vec<String> {
    let base = url::Url::parse(base_url).ok();
    let anchors = Selector {
        source: "a[href]".to_string(),
        parts: vec![Compound {
            tag: Some("a".to_string()),
            attrs: vec![AttrMatch {
                name: "href".to_string(),
                op: AttrOp::Exists,
                value: String::new(),
            }],
            ..Default::default()
        }],
    };

    let mut out: Vec<String> = Vec::new();
    for el in select(markup, &anchors) {
        let Some(href) = el.attr("href") else { continue };
        if let Some(resolved) = resolve_url(base.as_ref(), href) {
            if !out.contains(&resolved) {
                out.push(resolved);
            }
        }
    }
    out
}

/// Resolve `href` against an optional base, keeping only http(s) results
pub fn resolve_url(base: Option<&url::Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let resolved = match url::Url::parse(href) {
        Ok(absolute) => absolute,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(href).ok()?,
        Err(_) => return None,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Decode the common named entities and numeric character references
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&tail[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                entity.strip_prefix('#')?.parse::<u32>().ok()?
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <ul>
          <li class="person card"><span class="name">Jane Doe</span>
              <a href="mailto:jane@x.edu">email</a>
              <!-- <span class="name">Hidden</span> -->
          </li>
          <li class="person"><span class="name">John &amp; Co</span></li>
        </ul>"#;

    #[test]
    fn test_parse_supported_forms() {
        for s in [
            "div",
            ".person",
            "#main",
            "li.person.card",
            "a[href^=mailto:]",
            "a[href*='profile']",
            "div.list span.name",
            "*[data-role]",
        ] {
            assert!(Selector::parse(s).is_ok(), "{} should parse", s);
        }
    }

    #[test]
    fn test_parse_rejects_unsupported_forms() {
        for s in ["", "div > span", "a, b", "li:first-child", "[", ".", "div ~ p"] {
            assert!(
                matches!(Selector::parse(s), Err(IngestError::InvalidSelector { .. })),
                "{} should be rejected",
                s
            );
        }
    }

    #[test]
    fn test_select_containers_and_fields() {
        let cleaned = clean(LISTING);
        let container = Selector::parse(".person").unwrap();
        let name = Selector::parse(".name").unwrap();
        let email = Selector::parse("a[href^=mailto:]").unwrap();

        let people = select(&cleaned, &container);
        assert_eq!(people.len(), 2);
        assert_eq!(select_first(people[0].inner, &name).unwrap().text(), "Jane Doe");
        assert_eq!(
            select_first(people[0].inner, &email).unwrap().attr("href"),
            Some("mailto:jane@x.edu")
        );
        assert_eq!(select_first(people[1].inner, &name).unwrap().text(), "John & Co");
        assert!(select_first(people[1].inner, &email).is_none());
    }

    #[test]
    fn test_nested_same_tag_is_balanced() {
        let markup = r#"<div class="p"><div>inner</div><span>tail</span></div><div class="p">b</div>"#;
        let found = select(markup, &Selector::parse("div.p").unwrap());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].text(), "inner tail");
    }

    #[test]
    fn test_unclosed_elements_end_at_next_sibling() {
        let markup = "<ul><li class=x>one<li class=x>two</ul>";
        let found = select(markup, &Selector::parse("li.x").unwrap());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].text(), "one");
    }

    #[test]
    fn test_links_resolve_relative_and_skip_other_schemes() {
        let markup = r#"<a href="/people/jane">J</a><a href="mailto:a@b.c">m</a><a href="https://y.org/">y</a>"#;
        assert_eq!(
            links(markup, "https://x.edu/dir/"),
            vec!["https://x.edu/people/jane".to_string(), "https://y.org/".to_string()]
        );
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a&nbsp;b &#65;&#x42; &bogus; &"), "a b AB &bogus; &");
    }
}
