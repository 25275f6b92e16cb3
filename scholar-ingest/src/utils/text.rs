//! Text keys shared by normalization, reconciliation and persistence

/// Collapse runs of whitespace into single spaces and trim
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-folded, whitespace-collapsed key for names and titles
pub fn name_key(s: &str) -> String {
    collapse_whitespace(s).to_lowercase()
}

/// Domain part of an email address, if well formed
pub fn email_domain(email: &str) -> Option<&str> {
    let (local, domain) = email.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

/// Decimal digits of a phone number
pub fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Lowercased host of an absolute URL, without a leading `www.`
pub fn url_host(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}
