//! Normalize: raw fragments -> candidate records
//!
//! Per-field problems never fail the stage. A candidate without a usable name
//! is dropped; any other unparseable field is omitted and reported.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::markup;
use crate::models::{CandidateRecord, FieldError, RawCandidate};
use crate::utils::text;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9-]+(?:\.[a-z0-9-]+)*\.[a-z]{2,}$").expect("email regex")
});

static AT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(?:\[at\]|\(at\)|\{at\}|\sat\s)\s*").expect("at regex"));

static DOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(?:\[dot\]|\(dot\)|\{dot\}|\sdot\s)\s*").expect("dot regex"));

const HONORIFICS: &[&str] = &["dr", "prof", "professor", "mr", "mrs", "ms", "mx", "sir"];

const CREDENTIALS: &[&str] = &[
    "phd", "ph.d", "md", "m.d", "jr", "sr", "ii", "iii", "iv", "mba", "msc", "ms", "ma", "dphil",
    "facs", "faaas",
];

const MIN_PHONE_DIGITS: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeInput {
    pub candidates: Vec<RawCandidate>,
    pub affiliation: String,
    pub sub_unit: Option<String>,
    /// Sample cap (test runs)
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizeOutput {
    pub records: Vec<CandidateRecord>,
    pub errors: Vec<FieldError>,
}

/// Parsed name parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameParts {
    pub first: String,
    pub middle: Option<String>,
    pub last: String,
    pub full: String,
}

pub fn normalize_candidates(input: &NormalizeInput) -> NormalizeOutput {
    let mut out = NormalizeOutput::default();
    let limit = input.limit.unwrap_or(usize::MAX);

    for raw in input.candidates.iter().take(limit) {
        let mut field_error = |field: &str, value: &str, reason: &str, dropped: bool| {
            debug!(candidate = raw.index, field, reason, "Field parse error");
            out.errors.push(FieldError {
                candidate_index: raw.index,
                field: field.to_string(),
                value: value.to_string(),
                reason: reason.to_string(),
                dropped,
            });
        };

        let raw_name = raw.name.as_deref().unwrap_or("");
        let name = match parse_name(raw_name) {
            Ok(name) => name,
            Err(reason) => {
                field_error("name", raw_name, &reason, true);
                continue;
            }
        };

        let email = raw.email.as_deref().and_then(|value| match normalize_email(value) {
            Ok(email) => Some(email),
            Err(reason) => {
                field_error("email", value, &reason, false);
                None
            }
        });

        let phone = raw.phone.as_deref().and_then(|value| match normalize_phone(value) {
            Ok(phone) => Some(phone),
            Err(reason) => {
                field_error("phone", value, &reason, false);
                None
            }
        });

        let base = raw.source_url.as_deref().and_then(|u| url::Url::parse(u).ok());
        let profile_url = raw.profile_url.as_deref().and_then(|href| {
            let resolved = markup::resolve_url(base.as_ref(), href);
            if resolved.is_none() {
                field_error("profile_url", href, "not an http(s) link", false);
            }
            resolved
        });

        out.records.push(CandidateRecord {
            first_name: name.first,
            middle_name: name.middle,
            last_name: name.last,
            full_name: name.full,
            title: non_empty(raw.title.as_deref()),
            affiliation: input.affiliation.clone(),
            sub_unit: input.sub_unit.clone(),
            email,
            phone,
            location: non_empty(raw.location.as_deref()),
            profile_url,
            research_areas: split_tags(&raw.research_areas),
            source_url: raw.source_url.clone(),
        });
    }

    out
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(text::collapse_whitespace)
        .filter(|v| !v.is_empty())
}

fn bare_token(token: &str) -> String {
    token
        .trim_matches(|c: char| c == '.' || c == ',')
        .to_lowercase()
}

/// Split a display name into parts
///
/// Handles leading honorifics, trailing credentials and "Last, First Middle"
/// ordering. A single token is accepted as a first name with an empty last
/// name.
pub fn parse_name(raw: &str) -> Result<NameParts, String> {
    let collapsed = text::collapse_whitespace(&markup::decode_entities(raw));
    if collapsed.is_empty() {
        return Err("missing name".to_string());
    }
    if collapsed.contains('@') || collapsed.chars().any(|c| c.is_ascii_digit()) {
        return Err("unparseable name".to_string());
    }

    // Drop credential segments after commas ("Jane Doe, PhD")
    let mut segments: Vec<&str> = collapsed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    while segments.len() > 1
        && segments
            .last()
            .is_some_and(|s| s.split_whitespace().all(|t| CREDENTIALS.contains(&bare_token(t).as_str())))
    {
        segments.pop();
    }

    let ordered: Vec<String> = match segments.as_slice() {
        [last, rest] => rest
            .split_whitespace()
            .chain(last.split_whitespace())
            .map(str::to_string)
            .collect(),
        _ => segments
            .join(" ")
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    };

    let mut tokens: Vec<String> = ordered;
    while tokens.len() > 1 && HONORIFICS.contains(&bare_token(&tokens[0]).as_str()) {
        tokens.remove(0);
    }
    while tokens.len() > 1
        && tokens
            .last()
            .is_some_and(|t| CREDENTIALS.contains(&bare_token(t).as_str()))
    {
        tokens.pop();
    }

    if !tokens.iter().any(|t| t.chars().any(char::is_alphabetic)) {
        return Err("unparseable name".to_string());
    }

    let (first, middle, last) = match tokens.as_slice() {
        [] => return Err("missing name".to_string()),
        [only] => (only.clone(), None, String::new()),
        [first, inner @ .., last] => (
            first.clone(),
            (!inner.is_empty()).then(|| inner.join(" ")),
            last.clone(),
        ),
    };

    Ok(NameParts {
        full: tokens.join(" "),
        first,
        middle,
        last,
    })
}

/// Lowercase, strip `mailto:`, undo common obfuscation, validate
pub fn normalize_email(raw: &str) -> Result<String, String> {
    let decoded = markup::decode_entities(raw.trim());
    let without_scheme = if decoded.to_ascii_lowercase().starts_with("mailto:") {
        &decoded["mailto:".len()..]
    } else {
        decoded.as_str()
    };
    let without_query = without_scheme.split('?').next().unwrap_or("");

    let at_replaced = AT_RE.replace_all(without_query, "@");
    let deobfuscated = DOT_RE.replace_all(&at_replaced, ".");
    let email: String = deobfuscated
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    if EMAIL_RE.is_match(&email) {
        Ok(email)
    } else {
        Err("malformed email address".to_string())
    }
}

/// Keep the display form; require at least seven digits
pub fn normalize_phone(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .strip_prefix("tel:")
        .or_else(|| trimmed.strip_prefix("TEL:"))
        .unwrap_or(trimmed);
    let display = text::collapse_whitespace(without_scheme);

    if text::digits(&display).len() < MIN_PHONE_DIGITS {
        return Err("too few digits for a phone number".to_string());
    }
    Ok(display)
}

/// Split tag fragments on `;`, `,` and `|`, de-duplicating in order
pub fn split_tags(fragments: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for fragment in fragments {
        for piece in fragment.split([';', ',', '|']) {
            let tag = text::collapse_whitespace(piece);
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}
